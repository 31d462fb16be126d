//! Lifecycle hook interception pipeline: registry, planner, and executor.
//!
//! A hook is an external command run at a named lifecycle event, fed a JSON
//! payload on stdin and parsed back off stdout. This mirrors the subprocess
//! mechanics already used by [`crate::agent::tools::shell::ExecTool`]
//! (spawn, timeout, `kill_on_drop`) extended with a piped stdin.

pub mod executor;
pub mod planner;
pub mod registry;

use serde::{Deserialize, Serialize};

/// The lifecycle events the core fires hooks for. Serialized exactly as
/// named in settings (`hooks.<EventName>[]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    SessionStart,
    SessionEnd,
    BeforeAgent,
    AfterAgent,
    BeforeModel,
    AfterModel,
    BeforeToolSelection,
    BeforeTool,
    AfterTool,
    PreCompress,
    Notification,
}

impl HookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            HookEvent::SessionStart => "SessionStart",
            HookEvent::SessionEnd => "SessionEnd",
            HookEvent::BeforeAgent => "BeforeAgent",
            HookEvent::AfterAgent => "AfterAgent",
            HookEvent::BeforeModel => "BeforeModel",
            HookEvent::AfterModel => "AfterModel",
            HookEvent::BeforeToolSelection => "BeforeToolSelection",
            HookEvent::BeforeTool => "BeforeTool",
            HookEvent::AfterTool => "AfterTool",
            HookEvent::PreCompress => "PreCompress",
            HookEvent::Notification => "Notification",
        }
    }
}

/// Where a hook entry was declared. Determines dedup precedence and
/// sequential-plan ordering (Project > User > Extension); does not
/// determine whether it runs — all matching entries from every source run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HookSource {
    Project,
    User,
    Extension,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookCommand {
    #[serde(rename = "type")]
    pub kind: String,
    pub command: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

pub const DEFAULT_HOOK_TIMEOUT_MS: u64 = 60_000;

impl HookCommand {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_HOOK_TIMEOUT_MS))
    }

    /// Validation: a command-type entry must name its `type` as `"command"`
    /// and must not have an empty `command` string.
    pub fn is_valid(&self) -> bool {
        self.kind == "command" && !self.command.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEntry {
    pub event: HookEvent,
    #[serde(default)]
    pub matcher: Option<String>,
    #[serde(default)]
    pub sequential: bool,
    pub hooks: Vec<HookCommand>,
    pub source: HookSource,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl HookEntry {
    /// Rejects entries with no valid commands at all.
    pub fn is_valid(&self) -> bool {
        self.enabled && self.hooks.iter().any(HookCommand::is_valid)
    }
}

/// A single command+timeout pair, the unit the planner deduplicates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlannedCommand {
    pub command: String,
    pub timeout_ms: u64,
}

/// Hooks selected to run for one triggered event.
#[derive(Debug, Clone, Default)]
pub struct HookPlan {
    pub event: Option<HookEvent>,
    pub commands: Vec<PlannedCommand>,
    pub sequential: bool,
}

impl HookPlan {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Recognized decision values a hook's stdout JSON may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookDecisionKind {
    Allow,
    Approve,
    Deny,
    Block,
    Ask,
}

impl HookDecisionKind {
    pub fn is_blocking(self) -> bool {
        matches!(self, HookDecisionKind::Deny | HookDecisionKind::Block)
    }

    pub fn is_ask(self) -> bool {
        matches!(self, HookDecisionKind::Ask)
    }
}

/// Parsed stdout of a single hook command.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookOutput {
    pub decision: Option<HookDecisionKind>,
    pub reason: Option<String>,
    #[serde(rename = "systemMessage")]
    pub system_message: Option<String>,
    #[serde(default = "default_true")]
    pub r#continue: bool,
    #[serde(rename = "hookSpecificOutput")]
    pub hook_specific_output: Option<HookSpecificOutput>,
    #[serde(rename = "modifiedRequest")]
    pub modified_request: Option<serde_json::Value>,
    #[serde(rename = "syntheticResponse")]
    pub synthetic_response: Option<serde_json::Value>,
    #[serde(rename = "modifiedResponse")]
    pub modified_response: Option<serde_json::Value>,
    #[serde(rename = "toolConfig")]
    pub tool_config: Option<serde_json::Value>,
    #[serde(rename = "additionalContext")]
    pub additional_context: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookSpecificOutput {
    #[serde(rename = "additionalContext")]
    pub additional_context: Option<String>,
}

/// Outcome of running an entire plan, aggregated per §4.6's rules:
/// any blocking decision blocks the event; `ask` routes through the same
/// confirmation path as an ASK_USER policy answer; `allow`/`approve` are
/// advisory; a non-blocking hook failure (timeout, non-zero exit, invalid
/// JSON) never blocks.
#[derive(Debug, Clone, Default)]
pub struct HookOutcome {
    pub blocked: Option<String>,
    pub ask: bool,
    pub system_messages: Vec<String>,
    pub additional_context: Vec<String>,
    pub modified_request: Option<serde_json::Value>,
    pub synthetic_response: Option<serde_json::Value>,
    pub modified_response: Option<serde_json::Value>,
    pub tool_config: Option<serde_json::Value>,
    pub failures: usize,
}

impl HookOutcome {
    /// True when every hook for the event failed but none blocked — the
    /// event proceeds as if no hooks existed.
    pub fn is_non_blocking_advisory(&self, total_hooks: usize) -> bool {
        self.blocked.is_none() && self.failures == total_hooks && total_hooks > 0
    }
}

#[cfg(test)]
mod tests;
