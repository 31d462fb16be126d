//! Agent Executor: the turn loop orchestrator shared by the top-level
//! interactive agent and by sub-agents invoked as tools.
//!
//! Given an [`AgentDefinition`] and an input string, drives Chat Session
//! turns against the Tool Scheduler until the model calls `complete_task`,
//! the turn or time budget is exhausted, or the run is cancelled — mirroring
//! the same BeforeModel/AfterModel/BeforeToolSelection hook wrapping
//! `AgentLoop` and the subagent runner already perform around their own
//! provider calls.

use crate::agent::hooks::executor::HookExecutor;
use crate::agent::hooks::planner::HookPlanner;
use crate::agent::hooks::registry::HookRegistry;
use crate::agent::hooks::{HookEvent, HookOutcome};
use crate::agent::scheduler::{CancelToken, PendingCall, ToolScheduler};
use crate::agent::tools::base::ExecutionContext;
use crate::agent::tools::registry::ToolRegistry;
use crate::providers::base::{ChatRequest, LLMProvider, Message, RetryConfig, ToolDefinition};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const COMPLETE_TASK_TOOL_NAME: &str = "complete_task";

/// Side-channel for a caller to observe turn-loop events it needs for its
/// own bookkeeping (activity logs, output scanning, budget preflight)
/// without the executor itself knowing about that bookkeeping.
///
/// All methods default to no-ops so callers only override what they need.
#[async_trait]
pub trait ExecutorObserver: Send + Sync {
    /// Called before each turn's model call. Returning `Some(reason)` aborts
    /// the run immediately with `TerminateReason::QuotaExceeded` and that
    /// reason as the result.
    async fn before_turn(&self, _turn: usize) -> Option<String> {
        None
    }
    async fn on_tool_call(&self, _name: &str, _arguments: &Value) {}
    async fn on_tool_result(&self, _name: &str, _content: &str, _is_error: bool) {}
    async fn on_empty_response(&self, _turn: usize, _retries_left: usize) {}
    /// Called after each successful model response with its token usage, for
    /// callers that meter spend (e.g. a cost guard) outside the executor.
    async fn on_model_response(&self, _model: &str, _usage: &ModelUsage) {}
}

/// Token usage reported by a single model call, as surfaced by [`LLMResponse`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
}

/// Static description of an agent (top-level or sub-agent): constant for
/// the run.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub system_prompt: String,
    pub model: String,
    /// `None` means every tool in the registry handed to the executor is
    /// reachable; `Some` restricts to the named subset (sub-agent allow-lists).
    pub allowed_tools: Option<Vec<String>>,
    /// Used to path-sanitize tool execution failure messages before they
    /// reach the model, same as the main turn loop does.
    pub workspace: PathBuf,
    pub max_turns: usize,
    pub time_budget: Option<Duration>,
    /// JSON Schema the `complete_task` `result` argument is validated
    /// against. `None` accepts any JSON value as the final result.
    pub output_schema: Option<Value>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Retries (with exponential backoff) when the model returns neither
    /// text nor a tool call. `0` disables retrying.
    pub empty_response_retries: usize,
}

/// Why an [`AgentExecutor::run`] call stopped looping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    TaskComplete,
    MaxTurns,
    Cancelled,
    QuotaExceeded,
    Timeout,
}

impl TerminateReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminateReason::TaskComplete => "task_complete",
            TerminateReason::MaxTurns => "max_turns",
            TerminateReason::Cancelled => "cancelled",
            TerminateReason::QuotaExceeded => "quota_exceeded",
            TerminateReason::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentExecutorOutput {
    pub result: Option<String>,
    pub terminate_reason: TerminateReason,
    pub turns: usize,
}

/// The JSON Schema function declaration for `complete_task`, wrapping
/// `output_schema` (if any) as the shape of its `result` argument.
fn complete_task_definition(output_schema: Option<&Value>) -> ToolDefinition {
    let result_schema = output_schema
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    ToolDefinition {
        name: COMPLETE_TASK_TOOL_NAME.to_string(),
        description: "Call this when the task is finished to return your final result and end the turn loop.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "result": result_schema,
            },
            "required": ["result"],
        }),
    }
}

/// Validates `value` against `schema` with the `jsonschema` crate, returning
/// a human-readable reason on mismatch.
fn validate_output(schema: &Value, value: &Value) -> Option<String> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(e) => {
            warn!("complete_task output_schema failed to compile: {}", e);
            return None;
        }
    };
    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        None
    } else {
        Some(errors.join("; "))
    }
}

/// Flattens a scheduler [`crate::agent::scheduler::ToolCall`] into the
/// `(content, is_error)` shape a chat turn expects. Execution failures get
/// their workspace paths redacted; policy/approval/validation errors surface
/// verbatim since they never touch the filesystem.
fn tool_call_outcome(
    call: crate::agent::scheduler::ToolCall,
    workspace: &std::path::Path,
) -> (String, bool) {
    use crate::agent::scheduler::{ToolCallErrorKind, ToolCallStatus};

    match call.status {
        ToolCallStatus::Successful => {
            let mut content = call.result.map(|r| r.content).unwrap_or_default();
            for extra in call.additional_context {
                content.push('\n');
                content.push_str(&extra);
            }
            (content, false)
        }
        ToolCallStatus::Cancelled => ("Tool call was cancelled".to_string(), true),
        _ => {
            let message = call
                .error
                .map(|e| {
                    if e.kind == ToolCallErrorKind::ToolFailure {
                        crate::utils::path_sanitize::sanitize_error_message(
                            &format!("Tool execution failed: {}", e.message),
                            Some(workspace),
                        )
                    } else {
                        e.message
                    }
                })
                .unwrap_or_else(|| "tool call failed".to_string());
            (message, true)
        }
    }
}

/// Drives one agent's turn loop: Chat Session <-> Tool Scheduler, sharing
/// the registry/scheduler/hook plumbing its caller already constructed.
pub struct AgentExecutor {
    provider: Arc<dyn LLMProvider>,
    tools: Arc<ToolRegistry>,
    scheduler: Arc<ToolScheduler>,
    hook_registry: Arc<HookRegistry>,
    hook_executor: Arc<HookExecutor>,
    observer: Option<Arc<dyn ExecutorObserver>>,
}

impl AgentExecutor {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        tools: Arc<ToolRegistry>,
        scheduler: Arc<ToolScheduler>,
        hook_registry: Arc<HookRegistry>,
        hook_executor: Arc<HookExecutor>,
    ) -> Self {
        Self {
            provider,
            tools,
            scheduler,
            hook_registry,
            hook_executor,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutorObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    async fn fire_hook(&self, event: HookEvent, context: &str, payload: Value) -> HookOutcome {
        let plan = HookPlanner::new(&self.hook_registry).build_plan(event, context);
        self.hook_executor.run(&plan, &payload).await
    }

    fn scoped_tool_definitions(&self, def: &AgentDefinition) -> Vec<ToolDefinition> {
        let all = self.tools.get_tool_definitions();
        match &def.allowed_tools {
            None => all,
            Some(allowed) => all
                .into_iter()
                .filter(|td| allowed.iter().any(|name| name == &td.name))
                .collect(),
        }
    }

    /// Runs `def` to completion against `input`. Never returns `Err` for
    /// ordinary termination paths (max turns, cancellation, quota, timeout)
    /// — those are reported via `terminate_reason`; `Err` is reserved for
    /// setup failures outside the loop itself.
    pub async fn run(
        &self,
        def: &AgentDefinition,
        input: &str,
        exec_ctx: &ExecutionContext,
    ) -> Result<AgentExecutorOutput> {
        let start = Instant::now();

        let before = self
            .fire_hook(
                HookEvent::BeforeAgent,
                &def.name,
                serde_json::json!({"agent": def.name, "input": input}),
            )
            .await;
        if let Some(reason) = before.blocked {
            self.fire_hook(
                HookEvent::AfterAgent,
                &def.name,
                serde_json::json!({"agent": def.name, "success": false}),
            )
            .await;
            return Ok(AgentExecutorOutput {
                result: Some(reason),
                terminate_reason: TerminateReason::Cancelled,
                turns: 0,
            });
        }

        let mut messages = vec![
            Message::system(def.system_prompt.clone()),
            Message::user(input.to_string()),
        ];

        self.fire_hook(
            HookEvent::BeforeToolSelection,
            &def.name,
            serde_json::json!({"agent": def.name}),
        )
        .await;
        let mut tool_defs = self.scoped_tool_definitions(def);
        tool_defs.push(complete_task_definition(def.output_schema.as_ref()));

        let (_cancel_handle, cancel) = CancelToken::new();

        // Default wrap-up threshold: nudge the model to call `complete_task`
        // once 70% of its turn budget is spent, rather than waiting for the
        // hard cutoff to force the final-warning turn below.
        let wrap_up_turn = ((def.max_turns as f64) * 0.7).ceil() as usize;

        let mut turns = 0usize;
        let mut terminate_reason = TerminateReason::MaxTurns;
        let mut result: Option<String> = None;
        let mut empty_retries_left = def.empty_response_retries;

        'turns: while turns < def.max_turns {
            turns += 1;

            if let Some(budget) = def.time_budget
                && start.elapsed() >= budget
            {
                terminate_reason = TerminateReason::Timeout;
                break;
            }
            if cancel.is_cancelled() {
                terminate_reason = TerminateReason::Cancelled;
                break;
            }
            if let Some(observer) = &self.observer
                && let Some(reason) = observer.before_turn(turns).await
            {
                result = Some(reason);
                terminate_reason = TerminateReason::QuotaExceeded;
                break;
            }

            let final_warning = turns == def.max_turns;
            if final_warning {
                messages.push(Message::user(format!(
                    "You've reached the turn limit for this task. Call `{}` now with whatever result you have.",
                    COMPLETE_TASK_TOOL_NAME
                )));
            } else if wrap_up_turn > 0 && wrap_up_turn < def.max_turns && turns == wrap_up_turn {
                messages.push(Message::user(format!(
                    "You're approaching the turn limit ({} of {} turns used). Wrap up soon and call `{}` with your result.",
                    turns, def.max_turns, COMPLETE_TASK_TOOL_NAME
                )));
            }

            self.fire_hook(
                HookEvent::BeforeModel,
                &def.model,
                serde_json::json!({"model": def.model, "turn": turns}),
            )
            .await;

            let response = self
                .provider
                .chat_with_retry(
                    ChatRequest {
                        messages: messages.clone(),
                        tools: Some(tool_defs.clone()),
                        model: Some(def.model.as_str()),
                        max_tokens: def.max_tokens,
                        temperature: def.temperature,
                        tool_choice: None,
                        response_format: None,
                    },
                    Some(RetryConfig::default()),
                )
                .await;

            self.fire_hook(
                HookEvent::AfterModel,
                &def.model,
                serde_json::json!({"model": def.model, "turn": turns, "success": response.is_ok()}),
            )
            .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    warn!("agent '{}' turn {} model call failed: {}", def.name, turns, e);
                    if matches!(
                        e.downcast_ref::<crate::errors::OxicrabError>(),
                        Some(crate::errors::OxicrabError::RateLimit { .. })
                    ) {
                        terminate_reason = TerminateReason::QuotaExceeded;
                    }
                    break;
                }
            };

            if let Some(observer) = &self.observer {
                observer
                    .on_model_response(
                        &def.model,
                        &ModelUsage {
                            input_tokens: response.input_tokens,
                            output_tokens: response.output_tokens,
                            cache_creation_input_tokens: response.cache_creation_input_tokens,
                            cache_read_input_tokens: response.cache_read_input_tokens,
                        },
                    )
                    .await;
            }

            if !response.has_tool_calls() {
                match response.content.filter(|c| !c.trim().is_empty()) {
                    // No complete_task call and no more tool calls: treat a
                    // non-empty text response as an implicit result rather
                    // than looping forever on a model that forgot the contract.
                    Some(text) => {
                        result = Some(text);
                        terminate_reason = TerminateReason::TaskComplete;
                        break;
                    }
                    None if empty_retries_left > 0 => {
                        empty_retries_left -= 1;
                        if let Some(observer) = &self.observer {
                            observer.on_empty_response(turns, empty_retries_left).await;
                        }
                        let retry_num = def.empty_response_retries - empty_retries_left;
                        let delay =
                            (2_u64.pow(retry_num as u32) as f64 + fastrand::f64()).min(10.0);
                        tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
                        continue;
                    }
                    None => {
                        if let Some(observer) = &self.observer {
                            observer.on_empty_response(turns, 0).await;
                        }
                        break;
                    }
                }
            }

            messages.push(Message::assistant_with_thinking(
                response.content.clone().unwrap_or_default(),
                Some(response.tool_calls.clone()),
                response.reasoning_content.clone(),
            ));

            let mut pending = Vec::new();
            for tc in &response.tool_calls {
                if tc.name == COMPLETE_TASK_TOOL_NAME {
                    let arg = tc.arguments.get("result").cloned().unwrap_or(Value::Null);
                    if let Some(schema) = &def.output_schema
                        && let Some(reason) = validate_output(schema, &arg)
                    {
                        debug!("complete_task output failed validation: {}", reason);
                        messages.push(Message::tool_result(
                            tc.id.clone(),
                            format!("complete_task result failed schema validation: {reason}. Correct it and call complete_task again."),
                            true,
                        ));
                        continue;
                    }
                    result = Some(match &arg {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    });
                    terminate_reason = TerminateReason::TaskComplete;
                    break 'turns;
                }
                if let Some(observer) = &self.observer {
                    observer.on_tool_call(&tc.name, &tc.arguments).await;
                }
                pending.push(PendingCall {
                    id: tc.id.clone(),
                    tool_name: tc.name.clone(),
                    params: tc.arguments.clone(),
                });
            }

            if pending.is_empty() {
                continue;
            }

            let calls = self
                .scheduler
                .run_batch(pending, exec_ctx.clone(), cancel.clone())
                .await;
            for call in calls {
                let tool_name = call.tool_name.clone();
                let call_id = call.id.clone();
                let (content, is_error) = tool_call_outcome(call, &def.workspace);
                if let Some(observer) = &self.observer {
                    observer.on_tool_result(&tool_name, &content, is_error).await;
                }
                messages.push(Message::tool_result(call_id, content, is_error));
            }
        }

        self.fire_hook(
            HookEvent::AfterAgent,
            &def.name,
            serde_json::json!({
                "agent": def.name,
                "success": terminate_reason == TerminateReason::TaskComplete,
                "terminate_reason": terminate_reason.as_str(),
            }),
        )
        .await;

        Ok(AgentExecutorOutput {
            result,
            terminate_reason,
            turns,
        })
    }
}
