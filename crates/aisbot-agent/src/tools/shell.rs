//! Shell execution tool.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::base::{require_string, Tool};

/// Output is capped so a noisy command cannot flood the context window.
const MAX_OUTPUT_CHARS: usize = 20_000;

/// Runs a shell command in the workspace with a timeout.
pub struct ExecTool {
    working_dir: PathBuf,
    timeout: Duration,
    restrict_to_workspace: bool,
}

impl ExecTool {
    pub fn new(working_dir: PathBuf, timeout_secs: u64, restrict_to_workspace: bool) -> Arc<Self> {
        Arc::new(Self {
            working_dir,
            timeout: Duration::from_secs(timeout_secs),
            restrict_to_workspace,
        })
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output. The command runs in the \
         workspace directory with a timeout."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to run"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Directory to run in (optional, defaults to the workspace)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let command = require_string(&params, "command")?;

        let cwd = match params.get("working_dir").and_then(Value::as_str) {
            Some(dir) => {
                let requested = PathBuf::from(dir);
                if self.restrict_to_workspace && !requested.starts_with(&self.working_dir) {
                    anyhow::bail!(
                        "Access denied: working_dir '{}' is outside the workspace",
                        requested.display()
                    );
                }
                requested
            }
            None => self.working_dir.clone(),
        };

        debug!(command = %command, cwd = %cwd.display(), "running shell command");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&cwd)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => result.map_err(|e| anyhow::anyhow!("Failed to run command: {e}"))?,
            Err(_) => {
                anyhow::bail!(
                    "Command timed out after {} seconds: {command}",
                    self.timeout.as_secs()
                )
            }
        };

        let mut sections = Vec::new();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            sections.push(stdout.trim_end().to_string());
        }
        if !stderr.trim().is_empty() {
            sections.push(format!("stderr:\n{}", stderr.trim_end()));
        }
        if !output.status.success() {
            sections.push(format!(
                "exit code: {}",
                output.status.code().unwrap_or(-1)
            ));
        }

        let mut result = if sections.is_empty() {
            "(no output)".to_string()
        } else {
            sections.join("\n\n")
        };
        if result.chars().count() > MAX_OUTPUT_CHARS {
            result = aisbot_core::utils::truncate_string(&result, MAX_OUTPUT_CHARS);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(timeout: u64) -> Arc<ExecTool> {
        ExecTool::new(std::env::temp_dir(), timeout, false)
    }

    fn command(cmd: &str) -> HashMap<String, Value> {
        let mut params = HashMap::new();
        params.insert("command".to_string(), json!(cmd));
        params
    }

    #[tokio::test]
    async fn captures_stdout() {
        let result = tool(10).execute(command("echo hello")).await.unwrap();
        assert_eq!(result, "hello");
    }

    #[tokio::test]
    async fn captures_stderr_and_exit_code() {
        let result = tool(10)
            .execute(command("echo oops >&2; exit 3"))
            .await
            .unwrap();
        assert!(result.contains("stderr:\noops"));
        assert!(result.contains("exit code: 3"));
    }

    #[tokio::test]
    async fn silent_command_reports_no_output() {
        let result = tool(10).execute(command("true")).await.unwrap();
        assert_eq!(result, "(no output)");
    }

    #[tokio::test]
    async fn times_out() {
        let result = tool(1).execute(command("sleep 5")).await;
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn restricted_working_dir_is_enforced() {
        let workspace = tempfile::tempdir().unwrap();
        let tool = ExecTool::new(workspace.path().to_path_buf(), 10, true);

        let mut params = command("pwd");
        params.insert("working_dir".to_string(), json!("/"));
        let result = tool.execute(params).await;
        assert!(result.unwrap_err().to_string().contains("Access denied"));
    }
}
