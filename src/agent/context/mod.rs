pub mod providers;

use crate::agent::context::providers::ContextProviderRunner;
use crate::agent::memory::MemoryStore;
use crate::agent::skills::SkillsLoader;
use crate::providers::base::{ImageData, Message, ToolCallRequest};
use anyhow::{Context as _, Result};
use chrono::{Datelike, Local};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Workspace files loaded verbatim into every system prompt. `AGENTS.md` is
/// handled separately by [`ContextBuilder::get_identity`] since it replaces
/// the default identity rather than appending to it.
const BOOTSTRAP_FILES: &[&str] = &["USER.md", "TOOLS.md", "AGENTS.md"];

/// Assembles the system prompt and message list sent to the model each turn:
/// identity, bootstrap files, dynamic provider context, memory, skills, and
/// the current conversation history.
pub struct ContextBuilder {
    workspace: PathBuf,
    memory: MemoryStore,
    skills: SkillsLoader,
    bootstrap_cache: Option<String>,
    bootstrap_mtimes: HashMap<String, u64>,
    context_providers: Option<Arc<ContextProviderRunner>>,
    dynamic_context_cache: Option<String>,
}

impl ContextBuilder {
    pub fn new(workspace: impl AsRef<Path>) -> Result<Self> {
        let workspace = workspace.as_ref().to_path_buf();
        std::fs::create_dir_all(&workspace)
            .with_context(|| format!("creating workspace dir {}", workspace.display()))?;
        let memory = MemoryStore::new(&workspace)?;
        let builtin_skills = std::env::var("OXICRAB_BUILTIN_SKILLS")
            .ok()
            .map(PathBuf::from);
        let skills = SkillsLoader::new(&workspace, builtin_skills);

        Ok(Self {
            workspace,
            memory,
            skills,
            bootstrap_cache: None,
            bootstrap_mtimes: HashMap::new(),
            context_providers: None,
            dynamic_context_cache: None,
        })
    }

    /// Wires in a dynamic context provider runner. Call [`Self::refresh_provider_context`]
    /// before building messages to populate its cached output.
    pub fn set_providers(&mut self, runner: Arc<ContextProviderRunner>) {
        self.context_providers = Some(runner);
    }

    /// Re-executes configured context providers and caches their combined output.
    /// A no-op if no providers were configured via [`Self::set_providers`].
    pub async fn refresh_provider_context(&mut self) {
        if let Some(runner) = &self.context_providers {
            self.dynamic_context_cache = Some(runner.get_all_context().await);
        }
    }

    /// Returns a formatting hint for channels with markdown quirks (e.g. no
    /// table support), or `None` for channels that render standard markdown.
    pub fn channel_formatting_hint(channel: &str) -> Option<&'static str> {
        match channel {
            "discord" => Some(
                "Format for Discord: use **bold**, *italics*, and code blocks. \
                 Formatting note: NOT tables — Discord does not render markdown tables, \
                 use bullet lists instead.",
            ),
            "slack" => Some(
                "Format for Slack: use *bold* (single asterisk) and `code`. \
                 Avoid nested bullet lists deeper than one level.",
            ),
            "whatsapp" => Some(
                "Format for WhatsApp: use *bold* and _italics_ (single markers). \
                 Do not use markdown tables, headers, or links — WhatsApp renders plain text only.",
            ),
            _ => None,
        }
    }

    fn current_context_fields() -> (String, String, String) {
        let now = Local::now();
        let date = format!(
            "{}-{:02}-{:02} ({})",
            now.year(),
            now.month(),
            now.day(),
            now.format("%A")
        );
        let timezone = now.format("%Z").to_string();
        let runtime = format!("Rust {}", env!("CARGO_PKG_VERSION"));
        (date, timezone, runtime)
    }

    /// Loads `AGENTS.md` from the workspace if present and wraps it with the
    /// current-context block; otherwise falls back to the built-in default
    /// identity.
    pub fn get_identity(&self) -> String {
        let (date, timezone, runtime) = Self::current_context_fields();
        let workspace_path = self
            .workspace
            .canonicalize()
            .unwrap_or_else(|_| self.workspace.clone())
            .to_string_lossy()
            .to_string();

        let identity_file = self.workspace.join("AGENTS.md");
        if identity_file.exists() {
            match std::fs::read_to_string(&identity_file) {
                Ok(content) => {
                    return Self::build_identity_with_context(
                        &content,
                        &date,
                        &timezone,
                        &runtime,
                        &workspace_path,
                    );
                }
                Err(e) => warn!("failed to read AGENTS.md, using default identity: {}", e),
            }
        }

        Self::get_default_identity(&date, &timezone, &runtime, &workspace_path)
    }

    fn current_context_block(date: &str, timezone: &str, runtime: &str, workspace_path: &str) -> String {
        format!(
            "## Current Context\n\n\
             **Date**: {date}\n\
             **Timezone**: {timezone}\n\
             **Runtime**: {runtime}\n\
             **Workspace**: {workspace_path}\n\
             - Memory files: {workspace_path}/memory/MEMORY.md\n\
             - Daily notes: {workspace_path}/memory/YYYY-MM-DD.md\n\
             - Custom skills: {workspace_path}/skills/{{skill-name}}/SKILL.md"
        )
    }

    /// Built-in identity used when the workspace has no `AGENTS.md`.
    pub fn get_default_identity(date: &str, timezone: &str, runtime: &str, workspace_path: &str) -> String {
        format!(
            "# oxicrab\n\n\
             I am oxicrab, a personal AI assistant running continuously on behalf of my user.\n\n\
             ## Capabilities\n\n\
             I have access to tools for file operations, web search, shell commands, messaging, \
             and scheduling. When you need to use a tool, call them directly rather than \
             describing what you would do.\n\n\
             {}",
            Self::current_context_block(date, timezone, runtime, workspace_path)
        )
    }

    /// Appends the current-context block to a user-supplied `AGENTS.md` body.
    pub fn build_identity_with_context(
        identity_content: &str,
        date: &str,
        timezone: &str,
        runtime: &str,
        workspace_path: &str,
    ) -> String {
        format!(
            "{}\n\n{}",
            identity_content.trim_end(),
            Self::current_context_block(date, timezone, runtime, workspace_path)
        )
    }

    /// Loads `USER.md`/`TOOLS.md` (all of [`BOOTSTRAP_FILES`] except `AGENTS.md`,
    /// which [`Self::get_identity`] handles) into a single string, cached until
    /// any of the source files' mtimes change.
    pub fn load_bootstrap_files(&mut self) -> String {
        let mut current_mtimes = HashMap::new();
        for filename in BOOTSTRAP_FILES {
            if *filename == "AGENTS.md" {
                continue;
            }
            let file_path = self.workspace.join(filename);
            if let Ok(metadata) = std::fs::metadata(&file_path)
                && let Ok(mtime) = metadata.modified()
                && let Ok(duration) = mtime.duration_since(std::time::UNIX_EPOCH)
            {
                current_mtimes.insert((*filename).to_string(), duration.as_secs());
            }
        }

        if let Some(ref cache) = self.bootstrap_cache
            && current_mtimes == self.bootstrap_mtimes
        {
            return cache.clone();
        }

        let mut parts = Vec::new();
        for filename in BOOTSTRAP_FILES {
            if *filename == "AGENTS.md" {
                continue;
            }
            let file_path = self.workspace.join(filename);
            if let Ok(content) = std::fs::read_to_string(&file_path) {
                parts.push(format!("## {}\n\n{}", filename, content));
            }
        }

        let cache = parts.join("\n\n");
        self.bootstrap_cache = Some(cache.clone());
        self.bootstrap_mtimes = current_mtimes;
        cache
    }

    fn build_system_prompt(
        &mut self,
        query: Option<&str>,
        channel: Option<&str>,
        sender_id: Option<&str>,
        is_group: bool,
    ) -> Result<String> {
        let mut parts = vec![self.get_identity()];

        let bootstrap = self.load_bootstrap_files();
        if !bootstrap.is_empty() {
            parts.push(bootstrap);
        }

        if let Some(dynamic) = &self.dynamic_context_cache
            && !dynamic.is_empty()
        {
            parts.push(dynamic.clone());
        }

        if !is_group {
            let memory = self.memory.get_memory_context(query)?;
            if !memory.is_empty() {
                parts.push(format!("# Memory\n\n{}", memory));
            }
        }

        let always_skills = self.skills.get_always_skills();
        if !always_skills.is_empty() {
            let always_content = self.skills.load_skills_for_context(&always_skills);
            if !always_content.is_empty() {
                parts.push(format!("# Active Skills\n\n{}", always_content));
            }
        }

        let skills_summary = self.skills.build_skills_summary();
        if !skills_summary.is_empty() {
            parts.push(format!("# Available Skills\n\n{}", skills_summary));
        }

        if let Some(sender) = sender_id {
            parts.push(format!("Sender: {}", sender));
        }

        if let Some(hint) = channel.and_then(Self::channel_formatting_hint) {
            parts.push(hint.to_string());
        }

        Ok(parts.join("\n\n---\n\n"))
    }

    /// Builds the full message list sent to the model this turn: system
    /// prompt (identity, bootstrap, dynamic context, memory unless
    /// `is_group`, skills, sender/channel hints, recent-entity context),
    /// conversation history, and the current user message.
    #[allow(clippy::too_many_arguments)]
    pub fn build_messages(
        &mut self,
        history: &[HashMap<String, Value>],
        current_message: &str,
        channel: Option<&str>,
        chat_id: Option<&str>,
        sender_id: Option<&str>,
        images: Vec<ImageData>,
        is_group: bool,
        entity_context: Option<&str>,
    ) -> Result<Vec<Message>> {
        let mut system_prompt =
            self.build_system_prompt(Some(current_message), channel, sender_id, is_group)?;

        if let (Some(ch), Some(cid)) = (channel, chat_id) {
            system_prompt.push_str(&format!(
                "\n\n## Current Session\nChannel: {}\nChat ID: {}",
                ch, cid
            ));
        }

        if let Some(entities) = entity_context
            && !entities.is_empty()
        {
            system_prompt.push_str(&format!("\n\n## Recent Entities\n{}", entities));
        }

        let mut messages = vec![Message::system(system_prompt)];

        for msg in history {
            let role = msg.get("role").and_then(Value::as_str);
            let content = msg.get("content").and_then(Value::as_str);
            if let (Some(role), Some(content)) = (role, content)
                && !content.is_empty()
            {
                messages.push(Message {
                    role: role.to_string(),
                    content: content.to_string(),
                    ..Default::default()
                });
            }
        }

        let time_prefix = format!("[{}] ", Local::now().format("%H:%M"));
        let content = format!("{}{}", time_prefix, current_message);
        if images.is_empty() {
            messages.push(Message::user(content));
        } else {
            messages.push(Message::user_with_images(content, images));
        }

        Ok(messages)
    }

    /// Appends an assistant turn (with optional tool calls and reasoning) to
    /// an in-flight message list. Static so callers holding `messages`
    /// outside the builder's lock can still use it.
    pub fn add_assistant_message(
        messages: &mut Vec<Message>,
        content: Option<&str>,
        tool_calls: Option<Vec<ToolCallRequest>>,
        reasoning_content: Option<&str>,
    ) {
        messages.push(Message {
            role: "assistant".into(),
            content: content.unwrap_or_default().to_string(),
            tool_calls,
            reasoning_content: reasoning_content.map(str::to_string),
            ..Default::default()
        });
    }

    /// Appends a tool result to an in-flight message list.
    pub fn add_tool_result(messages: &mut Vec<Message>, tool_call_id: &str, _name: &str, result: &str, is_error: bool) {
        messages.push(Message::tool_result(tool_call_id, result, is_error));
    }
}
