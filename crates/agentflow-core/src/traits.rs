use std::path::Path;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{PlanDocument, PlanId, Usage};

/// Successful adapter invocation: the raw response text plus token usage.
#[derive(Debug, Clone)]
pub struct AdapterResponse {
    pub text: String,
    pub usage: Usage,
}

/// Adapter — turns a prompt into a model response.
///
/// The sole operation permitted to block, bounded by the caller-supplied
/// timeout. Failures surface as the typed `AdapterTimeout` /
/// `AdapterProcess` / `AdapterOutput` errors.
pub trait Adapter: Send + Sync + 'static {
    /// Adapter identifier recorded on each Exchange (e.g., "codex").
    fn name(&self) -> &str;

    /// Invoke the model with a prompt, bounded by `timeout`, running in
    /// `working_dir`.
    fn invoke(
        &self,
        prompt: &str,
        timeout: Duration,
        working_dir: &Path,
    ) -> BoxFuture<'_, Result<AdapterResponse>>;
}

/// Plan store — durable document persistence.
///
/// `append` must be atomic per plan id: readers never observe a
/// half-written document, and concurrent writers to the same id are
/// serialized. Distinct documents may be written concurrently.
pub trait PlanStore: Send + Sync + 'static {
    /// Persist the current state of a plan document, replacing any prior
    /// committed state for the same id.
    fn append(&self, plan: &PlanDocument) -> BoxFuture<'_, Result<()>>;

    /// Load the last committed state of a plan.
    fn load(&self, id: &PlanId) -> BoxFuture<'_, Result<PlanDocument>>;

    /// List all plan ids known to the store.
    fn list(&self) -> BoxFuture<'_, Result<Vec<PlanId>>>;
}
