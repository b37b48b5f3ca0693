//! YAML-backed plan store.
//!
//! One `<plan_id>.yaml` artifact per document under an artifact root.
//! Commits are atomic: the document is written to a temp file and renamed
//! into place, so readers never observe a half-written document. Writers
//! to the same plan id are serialized through a per-plan async mutex;
//! distinct plans commit concurrently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::debug;

use agentflow_core::traits::PlanStore;
use agentflow_core::{AgentFlowError, PlanDocument, PlanId, Result};

pub struct YamlPlanStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl YamlPlanStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| AgentFlowError::Store(format!("failed to create store root: {}", e)))?;
        debug!(root = %root.display(), "Plan store opened");
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Path of the artifact backing a plan id.
    pub fn plan_path(&self, id: &PlanId) -> PathBuf {
        self.root.join(format!("{}.yaml", id))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn writer_lock(&self, id: &PlanId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(id.0.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl PlanStore for YamlPlanStore {
    fn append(&self, plan: &PlanDocument) -> BoxFuture<'_, Result<()>> {
        // Serialize outside the async block so encoding errors surface
        // before any file is touched.
        let encoded = serde_yaml::to_string(plan);
        let id = plan.id.clone();

        Box::pin(async move {
            let encoded = encoded?;
            let lock = self.writer_lock(&id).await;
            let _guard = lock.lock().await;

            let path = self.plan_path(&id);
            let tmp = self.root.join(format!("{}.yaml.tmp", id));
            tokio::fs::write(&tmp, encoded)
                .await
                .map_err(|e| AgentFlowError::Store(format!("write failed: {}", e)))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .map_err(|e| AgentFlowError::Store(format!("commit failed: {}", e)))?;

            debug!(plan_id = %id, path = %path.display(), "Plan committed");
            Ok(())
        })
    }

    fn load(&self, id: &PlanId) -> BoxFuture<'_, Result<PlanDocument>> {
        let id = id.clone();
        Box::pin(async move {
            let path = self.plan_path(&id);
            let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AgentFlowError::Store(format!("plan '{}' not found", id))
                } else {
                    AgentFlowError::Store(format!("read failed: {}", e))
                }
            })?;
            Ok(serde_yaml::from_str(&raw)?)
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<PlanId>>> {
        Box::pin(async move {
            let mut ids = Vec::new();
            let mut entries = tokio::fs::read_dir(&self.root)
                .await
                .map_err(|e| AgentFlowError::Store(format!("list failed: {}", e)))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| AgentFlowError::Store(format!("list failed: {}", e)))?
            {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        ids.push(PlanId::from_string(stem));
                    }
                }
            }
            ids.sort();
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::{Exchange, PlanStatus, Usage};

    fn sample_plan(id: &str) -> PlanDocument {
        let mut plan = PlanDocument::new(PlanId::from_string(id));
        plan.exchanges
            .push(Exchange::new("ask", "answer", Usage::new(2, 3), "mock"));
        plan
    }

    #[tokio::test]
    async fn test_append_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlPlanStore::open(dir.path()).unwrap();

        let plan = sample_plan("plan-roundtrip");
        store.append(&plan).await.unwrap();

        let loaded = store.load(&plan.id).await.unwrap();
        assert_eq!(loaded.id, plan.id);
        assert_eq!(loaded.status, PlanStatus::Planning);
        assert_eq!(loaded.exchanges.len(), 1);
        assert_eq!(loaded.exchanges[0].usage.total_tokens, 5);
    }

    #[tokio::test]
    async fn test_append_replaces_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlPlanStore::open(dir.path()).unwrap();

        let mut plan = sample_plan("plan-update");
        store.append(&plan).await.unwrap();
        plan.status = PlanStatus::Completed;
        store.append(&plan).await.unwrap();

        let loaded = store.load(&plan.id).await.unwrap();
        assert_eq!(loaded.status, PlanStatus::Completed);
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlPlanStore::open(dir.path()).unwrap();
        store.append(&sample_plan("plan-tmp")).await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_list_plans() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlPlanStore::open(dir.path()).unwrap();
        store.append(&sample_plan("plan-b")).await.unwrap();
        store.append(&sample_plan("plan-a")).await.unwrap();

        let ids = store.list().await.unwrap();
        assert_eq!(
            ids,
            vec![
                PlanId::from_string("plan-a"),
                PlanId::from_string("plan-b")
            ]
        );
    }

    #[tokio::test]
    async fn test_load_missing_plan() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlPlanStore::open(dir.path()).unwrap();

        let err = store
            .load(&PlanId::from_string("plan-ghost"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
