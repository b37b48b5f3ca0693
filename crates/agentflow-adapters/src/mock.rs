use std::path::Path;
use std::time::Duration;

use futures::future::BoxFuture;

use agentflow_core::traits::{Adapter, AdapterResponse};
use agentflow_core::{AgentFlowError, Result, Usage};

/// Canned-response adapter for tests and offline runs.
pub struct MockAdapter {
    response: String,
    usage: Usage,
    failure: Option<String>,
}

impl MockAdapter {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            usage: Usage::new(1, 1),
            failure: None,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// An adapter whose every invocation fails with a process error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            response: String::new(),
            usage: Usage::default(),
            failure: Some(message.into()),
        }
    }
}

impl Adapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    fn invoke(
        &self,
        _prompt: &str,
        _timeout: Duration,
        _working_dir: &Path,
    ) -> BoxFuture<'_, Result<AdapterResponse>> {
        Box::pin(async move {
            if let Some(message) = &self.failure {
                return Err(AgentFlowError::AdapterProcess {
                    adapter: "mock".to_string(),
                    message: message.clone(),
                });
            }
            Ok(AdapterResponse {
                text: self.response.clone(),
                usage: self.usage,
            })
        })
    }
}
