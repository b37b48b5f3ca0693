//! Adapter implementations that turn a prompt into a model response.
//!
//! Each adapter drives an external agent CLI as a subprocess, bounded by
//! the caller's timeout, and maps its output into an `AdapterResponse` or
//! one of the typed adapter failures.

pub mod claude;
pub mod codex;
pub mod mock;

use std::sync::Arc;

use agentflow_core::config::AdapterConfig;
use agentflow_core::traits::Adapter;
use agentflow_core::{AgentFlowError, Result};

pub use claude::ClaudeCliAdapter;
pub use codex::CodexCliAdapter;
pub use mock::MockAdapter;

/// Build the adapter selected by configuration.
pub fn create_adapter(config: &AdapterConfig) -> Result<Arc<dyn Adapter>> {
    match config.name.as_str() {
        "codex" => Ok(Arc::new(CodexCliAdapter::new(
            config.command.as_deref().unwrap_or("codex"),
        ))),
        "claude" => Ok(Arc::new(ClaudeCliAdapter::new(
            config.command.as_deref().unwrap_or("claude"),
        ))),
        "mock" => Ok(Arc::new(MockAdapter::new(
            "Mock adapter response with no structured flow.",
        ))),
        other => Err(AgentFlowError::Config(format!(
            "unknown adapter '{}'; use 'codex', 'claude', or 'mock'",
            other
        ))),
    }
}
