use super::*;
use crate::agent::hooks::executor::HookExecutor;
use crate::agent::hooks::registry::HookRegistry;
use crate::agent::hooks::{HookCommand, HookEntry, HookEvent, HookSource};
use crate::agent::policy::{PolicyEngine, PolicyEntry, PolicyMode};
use crate::agent::tools::base::{Kind, ToolResult};
use crate::agent::tools::registry::ToolRegistry;
use async_trait::async_trait;
use std::collections::HashMap;

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo_tool"
    }
    fn description(&self) -> &str {
        "echoes its `text` parameter"
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"],
        })
    }
    fn kind(&self) -> Kind {
        Kind::Read
    }
    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        let text = params.get("text").and_then(Value::as_str).unwrap_or_default();
        Ok(ToolResult::new(text.to_string()))
    }
}

struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit_file"
    }
    fn description(&self) -> &str {
        "pretends to edit a file"
    }
    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}}})
    }
    fn kind(&self) -> Kind {
        Kind::Edit
    }
    async fn execute(&self, _params: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::new("edited"))
    }
}

struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow_tool"
    }
    fn description(&self) -> &str {
        "sleeps longer than its timeout"
    }
    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    fn kind(&self) -> Kind {
        Kind::Read
    }
    fn execution_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(30)
    }
    async fn execute(&self, _params: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        Ok(ToolResult::new("too late"))
    }
}

fn registry_with(tools: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    Arc::new(registry)
}

fn scheduler(
    registry: Arc<ToolRegistry>,
    policy: PolicyEngine,
    hooks: HookRegistry,
    approval: Arc<dyn ApprovalSink>,
) -> ToolScheduler {
    ToolScheduler::new(
        registry,
        Arc::new(policy),
        Arc::new(hooks),
        Arc::new(HookExecutor::new()),
        approval,
        PathBuf::from("/tmp"),
        4,
    )
}

struct AlwaysApprove;

#[async_trait]
impl ApprovalSink for AlwaysApprove {
    async fn ask(&self, _tool_name: &str, _display: &str, _params: &Value) -> bool {
        true
    }
}

#[tokio::test]
async fn simple_read_succeeds_without_approval() {
    let registry = registry_with(vec![Arc::new(EchoTool)]);
    let sched = scheduler(registry, PolicyEngine::default(), HookRegistry::new(), Arc::new(AlwaysDeny));

    let (_handle, cancel) = CancelToken::new();
    let calls = vec![PendingCall {
        id: "1".to_string(),
        tool_name: "echo_tool".to_string(),
        params: serde_json::json!({"text": "hi"}),
    }];
    let results = sched.run_batch(calls, ExecutionContext::default(), cancel).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ToolCallStatus::Successful);
    assert_eq!(results[0].result.as_ref().unwrap().content, "hi");
}

#[tokio::test]
async fn mutator_without_policy_entry_is_denied_by_headless_approval_sink() {
    let registry = registry_with(vec![Arc::new(EditTool)]);
    let sched = scheduler(registry, PolicyEngine::default(), HookRegistry::new(), Arc::new(AlwaysDeny));

    let (_handle, cancel) = CancelToken::new();
    let calls = vec![PendingCall {
        id: "1".to_string(),
        tool_name: "edit_file".to_string(),
        params: serde_json::json!({"path": "/tmp/x"}),
    }];
    let results = sched.run_batch(calls, ExecutionContext::default(), cancel).await;
    assert_eq!(results[0].status, ToolCallStatus::Errored);
    assert_eq!(results[0].error.as_ref().unwrap().kind, ToolCallErrorKind::UserDenied);
}

#[tokio::test]
async fn approved_mutator_runs() {
    let registry = registry_with(vec![Arc::new(EditTool)]);
    let sched = scheduler(registry, PolicyEngine::default(), HookRegistry::new(), Arc::new(AlwaysApprove));

    let (_handle, cancel) = CancelToken::new();
    let calls = vec![PendingCall {
        id: "1".to_string(),
        tool_name: "edit_file".to_string(),
        params: serde_json::json!({"path": "/tmp/x"}),
    }];
    let results = sched.run_batch(calls, ExecutionContext::default(), cancel).await;
    assert_eq!(results[0].status, ToolCallStatus::Successful);
}

#[tokio::test]
async fn policy_always_deny_wins_over_approval_sink() {
    let mut table = HashMap::new();
    table.insert(
        "edit_file".to_string(),
        PolicyEntry {
            mode: PolicyMode::AlwaysDeny,
            reason: Some("edits disabled".to_string()),
            exclude_globs: vec![],
        },
    );
    let policy = PolicyEngine::new(table, vec![]);
    let registry = registry_with(vec![Arc::new(EditTool)]);
    let sched = scheduler(registry, policy, HookRegistry::new(), Arc::new(AlwaysApprove));

    let (_handle, cancel) = CancelToken::new();
    let calls = vec![PendingCall {
        id: "1".to_string(),
        tool_name: "edit_file".to_string(),
        params: Value::Null,
    }];
    let results = sched.run_batch(calls, ExecutionContext::default(), cancel).await;
    assert_eq!(results[0].status, ToolCallStatus::Errored);
    assert_eq!(results[0].error.as_ref().unwrap().kind, ToolCallErrorKind::PolicyDenied);
}

#[tokio::test]
async fn hook_block_denies_before_dispatch_and_skips_after_tool() {
    let mut hooks = HookRegistry::new();
    hooks.register(HookEntry {
        event: HookEvent::BeforeTool,
        matcher: Some("edit_file".to_string()),
        sequential: false,
        hooks: vec![HookCommand {
            kind: "command".to_string(),
            command: r#"echo '{"decision":"block","reason":"protected path"}'"#.to_string(),
            timeout_ms: None,
        }],
        source: HookSource::Project,
        enabled: true,
    });
    // AfterTool hook that would be visible via additional_context if it ran.
    hooks.register(HookEntry {
        event: HookEvent::AfterTool,
        matcher: None,
        sequential: false,
        hooks: vec![HookCommand {
            kind: "command".to_string(),
            command: r#"echo '{"additionalContext":"should not appear"}'"#.to_string(),
            timeout_ms: None,
        }],
        source: HookSource::Project,
        enabled: true,
    });

    let registry = registry_with(vec![Arc::new(EditTool)]);
    let sched = scheduler(registry, PolicyEngine::default(), hooks, Arc::new(AlwaysApprove));

    let (_handle, cancel) = CancelToken::new();
    let calls = vec![PendingCall {
        id: "1".to_string(),
        tool_name: "edit_file".to_string(),
        params: Value::Null,
    }];
    let results = sched.run_batch(calls, ExecutionContext::default(), cancel).await;
    assert_eq!(results[0].status, ToolCallStatus::Errored);
    assert_eq!(results[0].error.as_ref().unwrap().kind, ToolCallErrorKind::PolicyDenied);
    assert!(results[0].additional_context.is_empty());
}

#[tokio::test]
async fn parallel_batch_preserves_call_order() {
    let registry = registry_with(vec![Arc::new(EchoTool)]);
    let sched = scheduler(registry, PolicyEngine::default(), HookRegistry::new(), Arc::new(AlwaysDeny));

    let (_handle, cancel) = CancelToken::new();
    let calls = vec![
        PendingCall {
            id: "a".to_string(),
            tool_name: "echo_tool".to_string(),
            params: serde_json::json!({"text": "first"}),
        },
        PendingCall {
            id: "b".to_string(),
            tool_name: "echo_tool".to_string(),
            params: serde_json::json!({"text": "second"}),
        },
        PendingCall {
            id: "c".to_string(),
            tool_name: "echo_tool".to_string(),
            params: serde_json::json!({"text": "third"}),
        },
    ];
    let results = sched.run_batch(calls, ExecutionContext::default(), cancel).await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].id, "a");
    assert_eq!(results[1].id, "b");
    assert_eq!(results[2].id, "c");
    assert_eq!(results[0].result.as_ref().unwrap().content, "first");
    assert_eq!(results[1].result.as_ref().unwrap().content, "second");
    assert_eq!(results[2].result.as_ref().unwrap().content, "third");
}

#[tokio::test]
async fn unknown_tool_is_invalid_params() {
    let registry = registry_with(vec![]);
    let sched = scheduler(registry, PolicyEngine::default(), HookRegistry::new(), Arc::new(AlwaysDeny));

    let (_handle, cancel) = CancelToken::new();
    let calls = vec![PendingCall {
        id: "1".to_string(),
        tool_name: "nonexistent".to_string(),
        params: Value::Null,
    }];
    let results = sched.run_batch(calls, ExecutionContext::default(), cancel).await;
    assert_eq!(results[0].error.as_ref().unwrap().kind, ToolCallErrorKind::InvalidParams);
}

#[tokio::test]
async fn missing_required_param_is_invalid_params() {
    let registry = registry_with(vec![Arc::new(EchoTool)]);
    let sched = scheduler(registry, PolicyEngine::default(), HookRegistry::new(), Arc::new(AlwaysDeny));

    let (_handle, cancel) = CancelToken::new();
    let calls = vec![PendingCall {
        id: "1".to_string(),
        tool_name: "echo_tool".to_string(),
        params: serde_json::json!({}),
    }];
    let results = sched.run_batch(calls, ExecutionContext::default(), cancel).await;
    assert_eq!(results[0].error.as_ref().unwrap().kind, ToolCallErrorKind::InvalidParams);
}

#[tokio::test]
async fn timeout_is_reported_as_tool_failure() {
    let registry = registry_with(vec![Arc::new(SlowTool)]);
    let sched = scheduler(registry, PolicyEngine::default(), HookRegistry::new(), Arc::new(AlwaysDeny));

    let (_handle, cancel) = CancelToken::new();
    let calls = vec![PendingCall {
        id: "1".to_string(),
        tool_name: "slow_tool".to_string(),
        params: Value::Null,
    }];
    let results = sched.run_batch(calls, ExecutionContext::default(), cancel).await;
    assert_eq!(results[0].status, ToolCallStatus::Errored);
    assert_eq!(results[0].error.as_ref().unwrap().kind, ToolCallErrorKind::ToolFailure);
}

#[tokio::test]
async fn cancel_before_dispatch_short_circuits_to_cancelled() {
    let registry = registry_with(vec![Arc::new(EchoTool)]);
    let sched = scheduler(registry, PolicyEngine::default(), HookRegistry::new(), Arc::new(AlwaysDeny));

    let (handle, cancel) = CancelToken::new();
    handle.cancel();
    let calls = vec![PendingCall {
        id: "1".to_string(),
        tool_name: "echo_tool".to_string(),
        params: serde_json::json!({"text": "hi"}),
    }];
    let results = sched.run_batch(calls, ExecutionContext::default(), cancel).await;
    assert_eq!(results[0].status, ToolCallStatus::Cancelled);
}
