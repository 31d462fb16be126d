//! Tool Scheduler: drives a `ToolCall` through
//! `validating -> awaiting_approval -> scheduled -> executing -> terminal`,
//! wrapping each dispatch with the Hook Executor (`BeforeTool`/`AfterTool`)
//! and the Policy Engine.
//!
//! Execution itself reuses [`crate::agent::tools::registry::ToolRegistry`]'s
//! spawn+timeout+panic-guard dispatch; batch fan-out follows the same
//! single-vs-parallel shape as [`crate::agent::loop::AgentLoop::execute_tools`].

use crate::agent::hooks::executor::HookExecutor;
use crate::agent::hooks::planner::HookPlanner;
use crate::agent::hooks::registry::HookRegistry;
use crate::agent::hooks::HookEvent;
use crate::agent::policy::{PolicyDecision, PolicyEngine};
use crate::agent::tools::base::{ExecutionContext, Tool, ToolResult};
use crate::agent::tools::registry::ToolRegistry;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Cooperative cancellation signal shared across a batch, built on a
/// `watch::channel` the same way [`crate::config::watcher`] bridges external
/// events into an awaitable receiver. Cheaper than polling an atomic flag:
/// `cancelled()` resolves as soon as the sender flips to `true`.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelToken {
    pub fn new() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Self { rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled; resolves immediately if it
    /// already is.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    Validating,
    AwaitingApproval,
    Scheduled,
    Executing,
    Successful,
    Errored,
    Cancelled,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ToolCallStatus::Successful | ToolCallStatus::Errored | ToolCallStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallErrorKind {
    InvalidParams,
    PolicyDenied,
    UserDenied,
    Cancelled,
    ToolFailure,
}

#[derive(Debug, Clone)]
pub struct ToolCallError {
    pub kind: ToolCallErrorKind,
    pub message: String,
}

/// A single binding of a tool name to concrete parameters, as emitted by
/// the model in one turn's function calls.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub id: String,
    pub tool_name: String,
    pub params: Value,
}

/// The scheduler's record of an Invocation. Never transitions backward;
/// `Cancelled` absorbs any in-flight state once a cancel signal fires.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    pub params: Value,
    pub status: ToolCallStatus,
    pub result: Option<ToolResult>,
    pub error: Option<ToolCallError>,
    /// `AfterTool` hook `additionalContext`, folded into the FunctionResponse
    /// payload (Open Question #2 in DESIGN.md) rather than surfaced as a
    /// separate message.
    pub additional_context: Vec<String>,
}

impl ToolCall {
    fn errored(pending: &PendingCall, kind: ToolCallErrorKind, message: impl Into<String>) -> Self {
        Self {
            id: pending.id.clone(),
            tool_name: pending.tool_name.clone(),
            params: pending.params.clone(),
            status: ToolCallStatus::Errored,
            result: None,
            error: Some(ToolCallError {
                kind,
                message: message.into(),
            }),
            additional_context: vec![],
        }
    }

    fn cancelled(pending: &PendingCall) -> Self {
        Self {
            id: pending.id.clone(),
            tool_name: pending.tool_name.clone(),
            params: pending.params.clone(),
            status: ToolCallStatus::Cancelled,
            result: None,
            error: Some(ToolCallError {
                kind: ToolCallErrorKind::Cancelled,
                message: "cancelled".to_string(),
            }),
            additional_context: vec![],
        }
    }

    fn successful(pending: &PendingCall, result: ToolResult, additional_context: Vec<String>) -> Self {
        Self {
            id: pending.id.clone(),
            tool_name: pending.tool_name.clone(),
            params: pending.params.clone(),
            status: ToolCallStatus::Successful,
            result: Some(result),
            error: None,
            additional_context,
        }
    }
}

/// Asks the user to approve a pending call. The scheduler never blocks the
/// whole batch on this — only one outstanding `awaiting_approval` runs at a
/// time (serialize-on-approval, DESIGN.md Open Question #1), enforced by the
/// scheduler's internal approval gate.
#[async_trait]
pub trait ApprovalSink: Send + Sync {
    async fn ask(&self, tool_name: &str, display: &str, params: &Value) -> bool;
}

/// An `ApprovalSink` that always denies — useful for headless / CI contexts
/// where nothing should ever reach `awaiting_approval` undecided.
pub struct AlwaysDeny;

#[async_trait]
impl ApprovalSink for AlwaysDeny {
    async fn ask(&self, _tool_name: &str, _display: &str, _params: &Value) -> bool {
        false
    }
}

pub struct ToolScheduler {
    registry: Arc<ToolRegistry>,
    policy: Arc<PolicyEngine>,
    hook_registry: Arc<HookRegistry>,
    hook_executor: Arc<HookExecutor>,
    approval: Arc<dyn ApprovalSink>,
    cwd: PathBuf,
    approval_gate: Arc<tokio::sync::Mutex<()>>,
    concurrency: Arc<tokio::sync::Semaphore>,
}

impl ToolScheduler {
    pub fn new(
        registry: Arc<ToolRegistry>,
        policy: Arc<PolicyEngine>,
        hook_registry: Arc<HookRegistry>,
        hook_executor: Arc<HookExecutor>,
        approval: Arc<dyn ApprovalSink>,
        cwd: PathBuf,
        max_concurrent: usize,
    ) -> Self {
        Self {
            registry,
            policy,
            hook_registry,
            hook_executor,
            approval,
            cwd,
            approval_gate: Arc::new(tokio::sync::Mutex::new(())),
            concurrency: Arc::new(tokio::sync::Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Dispatch one batch. All non-confirmation calls execute in parallel;
    /// each call still walks the state machine independently. The returned
    /// vector preserves the original call order regardless of completion
    /// order — the model relies on this positional alignment.
    pub async fn run_batch(
        &self,
        calls: Vec<PendingCall>,
        ctx: ExecutionContext,
        cancel: CancelToken,
    ) -> Vec<ToolCall> {
        if calls.len() == 1 {
            let call = calls.into_iter().next().unwrap();
            return vec![self.run_one(call, &ctx, cancel).await];
        }

        let handles: Vec<_> = calls
            .into_iter()
            .enumerate()
            .map(|(idx, call)| {
                let this = self.clone_for_task();
                let ctx = ctx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { (idx, this.run_one(call, &ctx, cancel).await) })
            })
            .collect();

        let mut slots: Vec<Option<ToolCall>> = (0..handles.len()).map(|_| None).collect();
        for handle in handles {
            match handle.await {
                Ok((idx, call)) => slots[idx] = Some(call),
                Err(join_err) => {
                    warn!("tool call task panicked: {:?}", join_err);
                }
            }
        }
        slots.into_iter().flatten().collect()
    }

    fn clone_for_task(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            policy: self.policy.clone(),
            hook_registry: self.hook_registry.clone(),
            hook_executor: self.hook_executor.clone(),
            approval: self.approval.clone(),
            cwd: self.cwd.clone(),
            approval_gate: self.approval_gate.clone(),
            concurrency: self.concurrency.clone(),
        }
    }

    async fn run_one(
        &self,
        pending: PendingCall,
        ctx: &ExecutionContext,
        cancel: CancelToken,
    ) -> ToolCall {
        // validating
        let Some(tool) = self.registry.get(&pending.tool_name) else {
            return ToolCall::errored(
                &pending,
                ToolCallErrorKind::InvalidParams,
                format!("tool '{}' does not exist", pending.tool_name),
            );
        };

        if cancel.is_cancelled() {
            return ToolCall::cancelled(&pending);
        }

        if let Some(reason) = validate_against_schema(tool.as_ref(), &pending.params) {
            return ToolCall::errored(&pending, ToolCallErrorKind::InvalidParams, reason);
        }

        // BeforeTool hooks
        let before_payload = serde_json::json!({
            "tool_name": pending.tool_name,
            "tool_input": pending.params,
        });
        let before_plan = HookPlanner::new(&self.hook_registry)
            .build_plan(HookEvent::BeforeTool, &pending.tool_name);
        let before_outcome = self.hook_executor.run(&before_plan, &before_payload).await;

        if let Some(reason) = before_outcome.blocked {
            // Policy dominance (§8): a hook deny/block causes PolicyDenied
            // regardless of the Policy Engine's own answer, and AfterTool
            // never fires for a call blocked before dispatch.
            return ToolCall::errored(&pending, ToolCallErrorKind::PolicyDenied, reason);
        }

        let decision = self.policy.evaluate(tool.as_ref(), &pending.params, &self.cwd);
        if let PolicyDecision::Deny { reason } = decision {
            return ToolCall::errored(&pending, ToolCallErrorKind::PolicyDenied, reason);
        }

        let needs_approval =
            matches!(decision, PolicyDecision::AskUser) || before_outcome.ask || tool.requires_approval();

        if needs_approval {
            if cancel.is_cancelled() {
                return ToolCall::cancelled(&pending);
            }
            // Serialize on approval: at most one outstanding awaiting_approval
            // at a time; other calls in the batch keep running independently.
            let _permit = self.approval_gate.lock().await;
            if cancel.is_cancelled() {
                return ToolCall::cancelled(&pending);
            }
            let display = display_name(tool.as_ref(), &pending.params);
            let approved = self.approval.ask(&pending.tool_name, &display, &pending.params).await;
            if !approved {
                return ToolCall::errored(&pending, ToolCallErrorKind::UserDenied, "user denied".to_string());
            }
        }

        if cancel.is_cancelled() {
            return ToolCall::cancelled(&pending);
        }

        let _permit = match self.concurrency.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return ToolCall::cancelled(&pending),
        };

        debug!("executing tool call {}: {}", pending.id, pending.tool_name);

        // Dispatch through the registry so its middleware chain (truncation,
        // caching, logging) and spawn+timeout+panic-guard wrapper still run;
        // the scheduler only adds the cooperative-cancel race on top.
        let exec_future = self
            .registry
            .execute(&pending.tool_name, pending.params.clone(), ctx);
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ExecOutcome::Cancelled),
            result = exec_future => Ok(result),
        };

        let (after_response, call) = match outcome {
            Err(ExecOutcome::Cancelled) => (None, ToolCall::cancelled(&pending)),
            Ok(Ok(result)) => {
                let response = Some(result.content.clone());
                (response, ToolCall::from((result, pending.clone())))
            }
            Ok(Err(e)) => (
                None,
                ToolCall::errored(&pending, ToolCallErrorKind::ToolFailure, e.to_string()),
            ),
        };

        if call.status == ToolCallStatus::Cancelled {
            return call;
        }

        // AfterTool hooks. Fired for every call that reached execution,
        // success or failure, but never for calls blocked before dispatch.
        let after_payload = serde_json::json!({
            "tool_name": pending.tool_name,
            "tool_input": pending.params,
            "tool_response": after_response,
        });
        let after_plan = HookPlanner::new(&self.hook_registry)
            .build_plan(HookEvent::AfterTool, &pending.tool_name);
        let after_outcome = self.hook_executor.run(&after_plan, &after_payload).await;

        let mut call = call;
        call.additional_context = after_outcome.additional_context;
        call
    }
}

/// Helper to build a `Successful` ToolCall from an execution result,
/// expressed as a `From` impl so the match arm above stays a one-liner.
impl From<(ToolResult, PendingCall)> for ToolCall {
    fn from((result, pending): (ToolResult, PendingCall)) -> Self {
        if result.is_error {
            ToolCall::errored(&pending, ToolCallErrorKind::ToolFailure, result.content)
        } else {
            ToolCall::successful(&pending, result, vec![])
        }
    }
}

enum ExecOutcome {
    Cancelled,
}

fn display_name(tool: &dyn Tool, params: &Value) -> String {
    format!("{}({})", tool.name(), params)
}

/// Re-validates parameters against the tool's declared JSON schema, using
/// the same strict-mode shape check the registry already performs: unknown
/// top-level properties are rejected, required properties must be present.
fn validate_against_schema(tool: &dyn Tool, params: &Value) -> Option<String> {
    let schema = tool.parameters();
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return None;
    };
    if let Some(obj) = params.as_object() {
        for key in obj.keys() {
            if !props.contains_key(key) {
                return Some(format!("unknown parameter '{}' for tool '{}'", key, tool.name()));
            }
        }
    } else if !props.is_empty() {
        return Some(format!("expected an object of parameters for tool '{}'", tool.name()));
    }
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for req in required {
            if let Some(name) = req.as_str() {
                if params.get(name).is_none() {
                    return Some(format!("missing required parameter '{}' for tool '{}'", name, tool.name()));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests;
