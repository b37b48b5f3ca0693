use std::path::Path;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use agentflow_core::traits::{Adapter, AdapterResponse};
use agentflow_core::{AgentFlowError, Result, Usage};

/// Adapter driving the Codex CLI (`codex exec --json`).
///
/// Codex emits a JSONL event stream on stdout; the final `agent_message`
/// event carries the response text and `token_count` events carry usage.
pub struct CodexCliAdapter {
    command: String,
}

impl CodexCliAdapter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Adapter for CodexCliAdapter {
    fn name(&self) -> &str {
        "codex"
    }

    fn invoke(
        &self,
        prompt: &str,
        timeout: Duration,
        working_dir: &Path,
    ) -> BoxFuture<'_, Result<AdapterResponse>> {
        let prompt = prompt.to_string();
        let working_dir = working_dir.to_path_buf();

        Box::pin(async move {
            debug!(command = %self.command, "Invoking codex CLI");

            let result = tokio::time::timeout(timeout, async {
                tokio::process::Command::new(&self.command)
                    .arg("exec")
                    .arg("--json")
                    .arg(&prompt)
                    .current_dir(&working_dir)
                    .output()
                    .await
            })
            .await;

            let output = match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Err(AgentFlowError::AdapterProcess {
                        adapter: "codex".to_string(),
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    return Err(AgentFlowError::AdapterTimeout {
                        adapter: "codex".to_string(),
                        timeout_secs: timeout.as_secs(),
                    });
                }
            };

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(AgentFlowError::AdapterProcess {
                    adapter: "codex".to_string(),
                    message: format!(
                        "exit code {}: {}",
                        output.status.code().unwrap_or(-1),
                        truncate(&stderr, 500)
                    ),
                });
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            let (text, usage) = parse_event_stream(&stdout)?;
            Ok(AdapterResponse { text, usage })
        })
    }
}

/// Pull the final agent message and accumulated token usage out of a codex
/// JSONL event stream. Unparseable lines are skipped; a stream with no
/// `agent_message` event is malformed output.
fn parse_event_stream(stdout: &str) -> Result<(String, Usage)> {
    let mut message: Option<String> = None;
    let mut usage = Usage::default();

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        // Events arrive as {"id": ..., "msg": {...}} or bare {...}.
        let event = value.get("msg").unwrap_or(&value);
        match event.get("type").and_then(Value::as_str) {
            Some("agent_message") => {
                if let Some(text) = event.get("message").and_then(Value::as_str) {
                    message = Some(text.to_string());
                }
            }
            Some("token_count") => {
                usage = Usage::new(
                    event
                        .get("input_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                    event
                        .get("output_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                );
            }
            _ => {}
        }
    }

    match message {
        Some(text) => Ok((text, usage)),
        None => Err(AgentFlowError::AdapterOutput {
            adapter: "codex".to_string(),
            message: "no agent_message event in output".to_string(),
        }),
    }
}

fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        &s[..max_len]
    }
}
