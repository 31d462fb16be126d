//! Declarative policy table answering ALLOW / DENY / ASK_USER for a (tool, params) pair.
//!
//! Generalizes the approval logic that used to live ad hoc on individual tools
//! (`Tool::requires_approval()`, `AttenuatedMcpTool`'s forced approval for
//! untrusted MCP tools) into a single table-driven engine the Tool Scheduler
//! consults before a call leaves `validating`.

use crate::agent::tools::base::{Kind, Tool};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny { reason: String },
    AskUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    AlwaysAllow,
    AlwaysDeny,
    AskUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub mode: PolicyMode,
    #[serde(default)]
    pub reason: Option<String>,
    /// Glob patterns (e.g. `/etc/**`) that, if any path-like parameter
    /// matches, downgrade an `always_allow` entry back to `ASK_USER`.
    #[serde(default, rename = "excludeGlobs")]
    pub exclude_globs: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    table: HashMap<String, PolicyEntry>,
    trusted_folders: Vec<PathBuf>,
}

impl PolicyEngine {
    pub fn new(table: HashMap<String, PolicyEntry>, trusted_folders: Vec<PathBuf>) -> Self {
        Self {
            table,
            trusted_folders,
        }
    }

    /// Evaluate the policy table for one (tool, params) pair, given the
    /// process's current working directory (for the trusted-folders upgrade).
    ///
    /// The trusted-folders rule is a final, independent pass: any outcome
    /// that comes out of the table as `ASK_USER` for a mutator tool is
    /// upgraded to `ALLOW` when `cwd` sits under a trusted folder, regardless
    /// of which table arm produced it.
    pub fn evaluate(&self, tool: &dyn Tool, params: &Value, cwd: &Path) -> PolicyDecision {
        let decision = self.raw_decision(tool, params);
        if decision == PolicyDecision::AskUser && tool.kind().is_mutator() && self.is_trusted(cwd)
        {
            return PolicyDecision::Allow;
        }
        decision
    }

    fn raw_decision(&self, tool: &dyn Tool, params: &Value) -> PolicyDecision {
        let Some(entry) = self.table.get(tool.name()) else {
            return if tool.kind().is_mutator() {
                PolicyDecision::AskUser
            } else {
                PolicyDecision::Allow
            };
        };

        match entry.mode {
            PolicyMode::AlwaysDeny => PolicyDecision::Deny {
                reason: entry
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("tool '{}' is denied by policy", tool.name())),
            },
            PolicyMode::AlwaysAllow => {
                if path_params_match_any(params, &entry.exclude_globs) {
                    PolicyDecision::AskUser
                } else {
                    PolicyDecision::Allow
                }
            }
            PolicyMode::AskUser => PolicyDecision::AskUser,
        }
    }

    fn is_trusted(&self, cwd: &Path) -> bool {
        self.trusted_folders
            .iter()
            .any(|trusted| cwd.starts_with(trusted))
    }
}

/// Extract every string-valued leaf of a JSON params object that looks
/// path-like (contains a `/` or starts with `~`) and test it against the
/// exclusion globs.
fn path_params_match_any(params: &Value, globs: &[String]) -> bool {
    if globs.is_empty() {
        return false;
    }
    let mut candidates = Vec::new();
    collect_path_like_strings(params, &mut candidates);
    candidates
        .iter()
        .any(|candidate| globs.iter().any(|g| glob_match(g, candidate)))
}

fn collect_path_like_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if s.contains('/') || s.starts_with('~') => out.push(s.clone()),
        Value::Object(map) => {
            for v in map.values() {
                collect_path_like_strings(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_path_like_strings(v, out);
            }
        }
        _ => {}
    }
}

/// Minimal glob matcher supporting `*` (any run of characters) and `?` (one
/// character), translated to an anchored regex. Falls back to a literal
/// match if the pattern fails to compile, mirroring the hook matcher's
/// regex-with-literal-fallback behavior.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    let mut regex_src = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => regex_src.push_str(".*"),
            '?' => regex_src.push('.'),
            c => regex_src.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex_src.push('$');
    match regex::Regex::new(&regex_src) {
        Ok(re) => re.is_match(candidate),
        Err(_) => pattern == candidate,
    }
}

/// Default posture for a tool with no table entry, exposed so callers that
/// need to preview a decision without a full engine instance (e.g. the
/// Tool Registry's schema listing) can reuse the same rule.
pub fn default_decision(kind: Kind) -> PolicyDecision {
    if kind.is_mutator() {
        PolicyDecision::AskUser
    } else {
        PolicyDecision::Allow
    }
}
