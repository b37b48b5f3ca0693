use std::path::Path;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use agentflow_core::traits::{Adapter, AdapterResponse};
use agentflow_core::{AgentFlowError, Result, Usage};

/// Adapter driving the Claude CLI (`claude -p --output-format json`).
///
/// The CLI prints a single JSON object with the result text and usage.
pub struct ClaudeCliAdapter {
    command: String,
}

#[derive(Deserialize)]
struct ClaudeOutput {
    #[serde(default)]
    result: String,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    usage: ClaudeUsage,
}

#[derive(Deserialize, Default)]
struct ClaudeUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl ClaudeCliAdapter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Adapter for ClaudeCliAdapter {
    fn name(&self) -> &str {
        "claude"
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
            debug!(command = %self.command, "Invoking claude CLI");

            let result = tokio::time::timeout(timeout, async {
                tokio::process::Command::new(&self.command)
                    .arg("-p")
                    .arg(&prompt)
                    .arg("--output-format")
                    .arg("json")
                    .current_dir(&working_dir)
                    .output()
                    .await
            })
            .await;

            let output = match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Err(AgentFlowError::AdapterProcess {
                        adapter: "claude".to_string(),
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    return Err(AgentFlowError::AdapterTimeout {
                        adapter: "claude".to_string(),
                        timeout_secs: timeout.as_secs(),
                    });
                }
            };

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(AgentFlowError::AdapterProcess {
                    adapter: "claude".to_string(),
                    message: format!(
                        "exit code {}: {}",
                        output.status.code().unwrap_or(-1),
                        stderr.chars().take(500).collect::<String>()
                    ),
                });
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            parse_result(&stdout)
        })
    }
}

fn parse_result(stdout: &str) -> Result<AdapterResponse> {
    let parsed: ClaudeOutput =
        serde_json::from_str(stdout.trim()).map_err(|e| AgentFlowError::AdapterOutput {
            adapter: "claude".to_string(),
            message: format!("invalid JSON result: {}", e),
        })?;

    if parsed.is_error {
        return Err(AgentFlowError::AdapterProcess {
            adapter: "claude".to_string(),
            message: parsed.result,
        });
    }

    Ok(AdapterResponse {
        text: parsed.result,
        usage: Usage::new(parsed.usage.input_tokens, parsed.usage.output_tokens),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_result() {
        let stdout = r#"{"result":"All done.","is_error":false,"usage":{"input_tokens":10,"output_tokens":3}}"#;
        let response = parse_result(stdout).unwrap();
        assert_eq!(response.text, "All done.");
        assert_eq!(response.usage.total_tokens, 13);
    }

    #[test]
    fn test_error_result_is_process_failure() {
        let stdout = r#"{"result":"credit exhausted","is_error":true}"#;
        let err = parse_result(stdout).unwrap_err();
        assert!(matches!(err, AgentFlowError::AdapterProcess { .. }));
    }

    #[test]
    fn test_invalid_json_is_malformed_output() {
        let err = parse_result("garbage").unwrap_err();
        assert!(matches!(err, AgentFlowError::AdapterOutput { .. }));
    }
}
