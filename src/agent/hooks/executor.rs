use super::{HookDecisionKind, HookOutcome, HookOutput, HookPlan, PlannedCommand};
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncWriteExt, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs a [`HookPlan`]: spawns each command as a subprocess using the
/// configured shell, writes the event payload to its stdin, reads stdout
/// and stderr, and aggregates decisions per §4.6. Subprocess mechanics
/// (spawn, timeout, `kill_on_drop`) mirror
/// [`crate::agent::tools::shell::ExecTool`], extended with a piped stdin.
pub struct HookExecutor {
    shell: String,
}

impl Default for HookExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl HookExecutor {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub async fn run(&self, plan: &HookPlan, payload: &Value) -> HookOutcome {
        let mut outcome = HookOutcome::default();
        if plan.is_empty() {
            return outcome;
        }

        if plan.sequential {
            for command in &plan.commands {
                let output = self.run_one(command, payload).await;
                let stop = self.fold(&mut outcome, output);
                if stop {
                    break;
                }
            }
        } else {
            let payload = payload.clone();
            let futures = plan.commands.iter().map(|command| {
                let command = command.clone();
                let payload = payload.clone();
                let shell = self.shell.clone();
                async move { run_command(&shell, &command, &payload).await }
            });
            let results = futures_util::future::join_all(futures).await;
            for output in results {
                // continue:false in a parallel plan only affects the overall
                // outcome, not already-running peers — ignore the stop signal here.
                let _ = self.fold(&mut outcome, output);
            }
        }

        outcome
    }

    async fn run_one(&self, command: &PlannedCommand, payload: &Value) -> Option<HookOutput> {
        run_command(&self.shell, command, payload).await
    }

    /// Merge one hook's parsed output into the running outcome. Returns
    /// true if a sequential plan should stop (blocking decision or
    /// `continue: false`).
    fn fold(&self, outcome: &mut HookOutcome, output: Option<HookOutput>) -> bool {
        let Some(output) = output else {
            outcome.failures += 1;
            return false;
        };

        if let Some(decision) = output.decision {
            if decision.is_blocking() && outcome.blocked.is_none() {
                outcome.blocked = Some(
                    output
                        .reason
                        .clone()
                        .unwrap_or_else(|| "denied by hook".to_string()),
                );
            } else if decision.is_ask() {
                outcome.ask = true;
            }
        }

        if let Some(msg) = output.system_message {
            outcome.system_messages.push(msg);
        }
        if let Some(ctx) = output
            .hook_specific_output
            .as_ref()
            .and_then(|h| h.additional_context.clone())
            .or(output.additional_context.clone())
        {
            outcome.additional_context.push(ctx);
        }
        if outcome.modified_request.is_none() {
            outcome.modified_request = output.modified_request.clone();
        }
        if outcome.synthetic_response.is_none() {
            outcome.synthetic_response = output.synthetic_response.clone();
        }
        if outcome.modified_response.is_none() {
            outcome.modified_response = output.modified_response.clone();
        }
        if outcome.tool_config.is_none() {
            outcome.tool_config = output.tool_config.clone();
        }

        outcome.blocked.is_some() || !output.r#continue
    }
}

async fn run_command(shell: &str, command: &PlannedCommand, payload: &Value) -> Option<HookOutput> {
    let payload_str = serde_json::to_vec(payload).ok()?;

    let mut child = match Command::new(shell)
        .arg("-c")
        .arg(&command.command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            warn!("hook command '{}' failed to spawn: {}", command.command, e);
            return None;
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(&payload_str).await {
            warn!("hook command '{}' stdin write failed: {}", command.command, e);
        }
        drop(stdin);
    }

    let timeout = std::time::Duration::from_millis(command.timeout_ms);
    let wait = async {
        let output = child.wait_with_output().await;
        output
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(Ok(output)) => {
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                debug!(
                    "hook command '{}' exited non-zero: {}",
                    command.command, stderr
                );
                return None;
            }
            let stdout = output.stdout;
            if stdout.trim_ascii().is_empty() {
                return Some(HookOutput::default());
            }
            match serde_json::from_slice::<HookOutput>(&stdout) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!("hook command '{}' produced invalid JSON: {}", command.command, e);
                    None
                }
            }
        }
        Ok(Err(e)) => {
            warn!("hook command '{}' failed: {}", command.command, e);
            None
        }
        Err(_) => {
            warn!(
                "hook command '{}' timed out after {:?}",
                command.command, timeout
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::hooks::HookEvent;

    fn plan(commands: Vec<&str>, sequential: bool) -> HookPlan {
        HookPlan {
            event: Some(HookEvent::BeforeTool),
            commands: commands
                .into_iter()
                .map(|c| PlannedCommand {
                    command: c.to_string(),
                    timeout_ms: 5_000,
                })
                .collect(),
            sequential,
        }
    }

    #[tokio::test]
    async fn empty_plan_is_non_blocking() {
        let executor = HookExecutor::new();
        let outcome = executor.run(&HookPlan::default(), &serde_json::json!({})).await;
        assert!(outcome.blocked.is_none());
        assert_eq!(outcome.failures, 0);
    }

    #[tokio::test]
    async fn empty_stdout_treated_as_no_decision() {
        let executor = HookExecutor::new();
        let p = plan(vec!["true"], false);
        let outcome = executor.run(&p, &serde_json::json!({"hook_event_name": "BeforeTool"})).await;
        assert!(outcome.blocked.is_none());
        assert_eq!(outcome.failures, 0);
    }

    #[tokio::test]
    async fn deny_decision_blocks() {
        let executor = HookExecutor::new();
        let p = plan(
            vec![r#"echo '{"decision":"deny","reason":"protected path"}'"#],
            false,
        );
        let outcome = executor.run(&p, &serde_json::json!({})).await;
        assert_eq!(outcome.blocked.as_deref(), Some("protected path"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_advisory_failure() {
        let executor = HookExecutor::new();
        let p = plan(vec!["exit 1"], false);
        let outcome = executor.run(&p, &serde_json::json!({})).await;
        assert!(outcome.blocked.is_none());
        assert_eq!(outcome.failures, 1);
        assert!(outcome.is_non_blocking_advisory(1));
    }

    #[tokio::test]
    async fn timeout_counts_as_failure_not_block() {
        let executor = HookExecutor::new();
        let mut p = plan(vec!["sleep 5"], false);
        p.commands[0].timeout_ms = 50;
        let outcome = executor.run(&p, &serde_json::json!({})).await;
        assert!(outcome.blocked.is_none());
        assert_eq!(outcome.failures, 1);
    }

    #[tokio::test]
    async fn sequential_stops_on_continue_false() {
        let executor = HookExecutor::new();
        let p = plan(
            vec![
                r#"echo '{"continue":false}'"#,
                r#"echo '{"systemMessage":"should not run"}'"#,
            ],
            true,
        );
        let outcome = executor.run(&p, &serde_json::json!({})).await;
        assert!(outcome.system_messages.is_empty());
    }
}
