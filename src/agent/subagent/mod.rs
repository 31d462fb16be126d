mod activity_log;

use crate::agent::cost_guard::CostGuard;
use crate::agent::executor::{AgentDefinition, AgentExecutor, ExecutorObserver};
use crate::agent::hooks::executor::HookExecutor;
use crate::agent::hooks::registry::HookRegistry;
use crate::agent::policy::PolicyEngine;
use crate::agent::scheduler::{AlwaysDeny, ToolScheduler};
use crate::agent::tools::ToolRegistry;
use crate::bus::{InboundMessage, MessageBus};
use crate::config::PromptGuardConfig;
use crate::providers::base::{LLMProvider, Message};
use crate::safety::prompt_guard::PromptGuard;
use activity_log::ActivityLog;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EMPTY_RESPONSE_RETRIES: usize = 2;
const MAX_SUBAGENT_ITERATIONS: usize = 15;
const MAX_CONTEXT_CHARS: usize = 2000;
/// Overall timeout for a subagent run (5 minutes)
const SUBAGENT_TIMEOUT: std::time::Duration = std::time::Duration::from_mins(5);

/// Immutable configuration shared across all subagent tasks via `Arc`.
#[derive(Clone)]
pub struct SubagentConfig {
    pub provider: Arc<dyn LLMProvider>,
    pub workspace: PathBuf,
    pub model: Option<String>,
    pub max_tokens: u32,
    pub tool_temperature: f32,
    pub max_concurrent: usize,
    /// Shared cost guard for budget/rate enforcement across main agent and subagents.
    pub cost_guard: Option<Arc<CostGuard>>,
    /// Prompt guard config for injection scanning on subagent inputs/outputs.
    pub prompt_guard_config: PromptGuardConfig,
    /// Exfiltration guard config — network-outbound tools are excluded unless allow-listed.
    pub exfil_guard: crate::config::ExfiltrationGuardConfig,
    /// Main agent's tool registry, used to build subagent tools from capabilities.
    /// Set after `register_all_tools()` returns via `SubagentManager::set_main_tools()`.
    pub main_tools: Option<Arc<ToolRegistry>>,
}

pub struct SubagentManager {
    config: Arc<SubagentInner>,
    running_tasks: Arc<Mutex<HashMap<String, tokio::task::JoinHandle<()>>>>,
    bus: Arc<Mutex<MessageBus>>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

/// Resolved immutable config (model already resolved, no Option).
struct SubagentInner {
    provider: Arc<dyn LLMProvider>,
    workspace: PathBuf,
    model: String,
    max_tokens: u32,
    tool_temperature: f32,
    cost_guard: Option<Arc<CostGuard>>,
    prompt_guard: Option<PromptGuard>,
    prompt_guard_config: PromptGuardConfig,
    exfil_guard: crate::config::ExfiltrationGuardConfig,
    main_tools: std::sync::OnceLock<Arc<ToolRegistry>>,
}

impl SubagentManager {
    pub fn new(config: SubagentConfig, bus: Arc<Mutex<MessageBus>>) -> Self {
        let model = config
            .model
            .unwrap_or_else(|| config.provider.default_model().to_string());
        let max_concurrent = config.max_concurrent;
        let prompt_guard = if config.prompt_guard_config.enabled {
            Some(PromptGuard::new())
        } else {
            None
        };
        let inner = Arc::new(SubagentInner {
            provider: config.provider,
            workspace: config.workspace,
            model,
            max_tokens: config.max_tokens,
            tool_temperature: config.tool_temperature,
            cost_guard: config.cost_guard,
            prompt_guard,
            prompt_guard_config: config.prompt_guard_config,
            exfil_guard: config.exfil_guard,
            main_tools: {
                let lock = std::sync::OnceLock::new();
                if let Some(tools) = config.main_tools {
                    let _ = lock.set(tools);
                }
                lock
            },
        });
        Self {
            config: inner,
            running_tasks: Arc::new(Mutex::new(HashMap::new())),
            bus,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent)),
        }
    }

    pub async fn spawn(
        &self,
        task: String,
        label: Option<String>,
        origin_channel: String,
        origin_chat_id: String,
        silent: bool,
        context: Option<String>,
    ) -> Result<String> {
        let task_id = Uuid::new_v4().to_string()[..8].to_string();
        let display_label = label.unwrap_or_else(|| {
            if task.chars().count() > 30 {
                let truncated: String = task.chars().take(30).collect();
                format!("{}...", truncated)
            } else {
                task.clone()
            }
        });
        let display_label_clone = display_label.clone();
        let task_id_clone = task_id.clone();

        let origin = (origin_channel.clone(), origin_chat_id.clone());

        // Capture Arc references for the spawned task (no cloning of Strings/Vecs)
        let config = self.config.clone();
        let bus = self.bus.clone();
        let running_tasks = self.running_tasks.clone();
        let semaphore = self.semaphore.clone();

        // Hold the lock while spawning to prevent the race where the task
        // finishes and tries to remove itself before we insert the handle.
        let mut tasks = self.running_tasks.lock().await;
        // Prune finished tasks and enforce capacity limit
        tasks.retain(|_, handle| !handle.is_finished());
        if tasks.len() >= 100 {
            anyhow::bail!(
                "too many tracked subagent tasks ({}), try again later",
                tasks.len()
            );
        }
        let bg_task = tokio::spawn(async move {
            // Acquire semaphore permit — blocks if all slots are busy.
            // The permit is held for the duration of the task and released
            // on drop (including abort/cancellation).
            let Ok(_permit) = semaphore.acquire().await else {
                warn!("Subagent [{}] semaphore closed", task_id_clone);
                return;
            };

            // Use AssertUnwindSafe + catch_unwind pattern via select to ensure
            // cleanup runs even if the task is aborted. The permit is released
            // automatically by drop when the spawned task exits (including abort).
            run_subagent(
                &config,
                &bus,
                &running_tasks,
                SubagentTask {
                    task_id: task_id_clone,
                    task,
                    label: display_label_clone,
                    origin,
                    silent,
                    context,
                },
            )
            .await;
            // NOTE: If this task is aborted, the permit (_permit) is still
            // dropped correctly by tokio's task cleanup. The running_tasks
            // cleanup below won't run, but cancel() already removes the entry.
        });
        tasks.insert(task_id.clone(), bg_task);
        drop(tasks);

        info!("Spawned subagent [{}]: {}", task_id, display_label);
        Ok(format!(
            "Subagent [{}] started (id: {}). I'll notify you when it completes.",
            display_label, task_id
        ))
    }

    pub async fn list_running(&self) -> Vec<HashMap<String, Value>> {
        let tasks = self.running_tasks.lock().await;
        tasks
            .iter()
            .map(|(id, handle)| {
                let mut map = HashMap::new();
                map.insert("id".to_string(), Value::String(id.clone()));
                map.insert("done".to_string(), Value::Bool(handle.is_finished()));
                map.insert("cancelled".to_string(), Value::Bool(false));
                map
            })
            .collect()
    }

    pub async fn cancel(&self, task_id: &str) -> bool {
        let mut tasks = self.running_tasks.lock().await;
        if let Some(handle) = tasks.remove(task_id) {
            handle.abort();
            true
        } else {
            false
        }
    }

    /// Set the main agent's tool registry after `register_all_tools()` returns.
    /// This enables capability-based subagent tool filtering.
    pub fn set_main_tools(&self, tools: Arc<ToolRegistry>) {
        let _ = self.config.main_tools.set(tools);
    }

    /// Returns (running, max, available) capacity info.
    pub async fn capacity(&self) -> (usize, usize, usize) {
        let running = self.running_tasks.lock().await.len();
        let max = self.semaphore.available_permits() + running;
        let available = self.semaphore.available_permits();
        (running, max, available)
    }
}

/// Parameters for a subagent task.
struct SubagentTask {
    task_id: String,
    task: String,
    label: String,
    origin: (String, String),
    silent: bool,
    context: Option<String>,
}

/// Run a subagent task (called inside `tokio::spawn`).
async fn run_subagent(
    config: &SubagentInner,
    bus: &Arc<Mutex<MessageBus>>,
    running_tasks: &Arc<Mutex<HashMap<String, tokio::task::JoinHandle<()>>>>,
    params: SubagentTask,
) {
    let SubagentTask {
        task_id,
        task,
        label,
        origin,
        silent,
        context,
    } = params;
    info!("Subagent [{}] starting task: {}", task_id, label);

    let result = if let Ok(r) = tokio::time::timeout(
        SUBAGENT_TIMEOUT,
        run_subagent_inner(config, &task_id, &task, context.as_deref(), &origin),
    )
    .await
    {
        r
    } else {
        warn!(
            "Subagent [{}] timed out after {}s",
            task_id,
            SUBAGENT_TIMEOUT.as_secs()
        );
        Ok(format!(
            "Task timed out after {} seconds",
            SUBAGENT_TIMEOUT.as_secs()
        ))
    };

    // Cleanup
    running_tasks.lock().await.remove(&task_id);

    match result {
        Ok(final_result) => {
            info!("Subagent [{}] completed successfully", task_id);
            if !silent {
                announce_result(bus, &task_id, &label, &task, &final_result, &origin, "ok").await;
            }
        }
        Err(e) => {
            warn!("Subagent [{}] failed: {}", task_id, e);
            if !silent {
                announce_result(
                    bus,
                    &task_id,
                    &label,
                    &task,
                    &format!("Error: {}", e),
                    &origin,
                    "error",
                )
                .await;
            }
        }
    }
}

/// Build the tool registry for a subagent by querying capabilities from the
/// main agent's tool registry. Tools with `SubagentAccess::Full` are passed
/// through (network-outbound tools respect the exfil block list), tools with
/// `SubagentAccess::ReadOnly` are wrapped to expose only read-only actions,
/// and `SubagentAccess::Denied` tools are excluded.
fn build_subagent_tools(config: &SubagentInner) -> ToolRegistry {
    use crate::agent::tools::base::SubagentAccess;
    use crate::agent::tools::read_only_wrapper::ReadOnlyToolWrapper;

    let main_tools = config
        .main_tools
        .get()
        .expect("main_tools must be set before spawning subagents");

    let mut tools = ToolRegistry::new();
    for (name, tool) in main_tools.iter() {
        let caps = tool.capabilities();
        match caps.subagent_access {
            SubagentAccess::Full => {
                if caps.network_outbound
                    && config.exfil_guard.enabled
                    && !config.exfil_guard.allow_tools.contains(&name.to_string())
                {
                    continue;
                }
                tools.register(tool.clone());
            }
            SubagentAccess::ReadOnly => {
                if let Some(wrapped) = ReadOnlyToolWrapper::new(tool.clone()) {
                    tools.register(Arc::new(wrapped));
                }
            }
            SubagentAccess::Denied => {}
        }
    }
    tools
}

/// Thin entry point: builds this task's hook registry/executor pair and
/// hands off to `run_subagent_core`. BeforeAgent/AfterAgent are fired inside
/// `AgentExecutor::run` itself, not here — `run_subagent_core` constructs
/// the executor with `def.name` set to this task's id as the hook context.
async fn run_subagent_inner(
    config: &SubagentInner,
    task_id: &str,
    task: &str,
    context: Option<&str>,
    origin: &(String, String),
) -> Result<String> {
    let hook_registry = Arc::new(HookRegistry::new());
    let hook_executor = Arc::new(HookExecutor::new());

    run_subagent_core(
        config,
        task_id,
        task,
        context,
        origin,
        hook_registry,
        hook_executor,
    )
    .await
}

/// Bridges a subagent's bookkeeping (activity log, prompt-injection output
/// scanning, cost-guard preflight) into the generic turn loop's
/// [`ExecutorObserver`] hooks, so `run_subagent_core` keeps its existing
/// observable behavior while the loop itself lives in `AgentExecutor`.
struct SubagentObserver {
    task_id: String,
    log: Mutex<Option<ActivityLog>>,
    prompt_guard: Option<PromptGuard>,
    cost_guard: Option<Arc<CostGuard>>,
}

#[async_trait]
impl ExecutorObserver for SubagentObserver {
    async fn before_turn(&self, _turn: usize) -> Option<String> {
        let cg = self.cost_guard.as_ref()?;
        let msg = cg.check_allowed().err()?;
        warn!(
            "Subagent [{}] cost guard blocked LLM call: {}",
            self.task_id, msg
        );
        let mut log = self.log.lock().await;
        if let Some(l) = log.as_mut() {
            l.log_cost_blocked(&msg);
            l.log_end("cost-blocked");
        }
        Some(format!("Budget limit reached: {}", msg))
    }

    async fn on_tool_call(&self, name: &str, arguments: &Value) {
        let mut log = self.log.lock().await;
        if let Some(l) = log.as_mut() {
            l.log_tool_call(name, arguments);
        }
    }

    async fn on_tool_result(&self, name: &str, content: &str, is_error: bool) {
        {
            let mut log = self.log.lock().await;
            if let Some(l) = log.as_mut() {
                l.log_tool_result(name, content, is_error);
            }
        }
        // Scan tool output for prompt injection (warn only, matching main loop)
        if let Some(ref guard) = self.prompt_guard {
            for m in guard.scan(content) {
                warn!(
                    "Subagent [{}] prompt injection in tool '{}' output ({:?}): {}",
                    self.task_id, name, m.category, m.pattern_name
                );
            }
        }
    }

    async fn on_empty_response(&self, turn: usize, retries_left: usize) {
        let mut log = self.log.lock().await;
        if let Some(l) = log.as_mut() {
            l.log_iteration_empty(turn, retries_left);
        }
        if retries_left == 0 {
            warn!(
                "Subagent [{}] empty response, no retries left - giving up",
                self.task_id
            );
        }
    }

    async fn on_model_response(&self, model: &str, usage: &crate::agent::executor::ModelUsage) {
        if let Some(ref cg) = self.cost_guard {
            cg.record_llm_call(
                model,
                usage.input_tokens,
                usage.output_tokens,
                usage.cache_creation_input_tokens,
                usage.cache_read_input_tokens,
            );
        }
    }
}

async fn run_subagent_core(
    config: &SubagentInner,
    task_id: &str,
    task: &str,
    context: Option<&str>,
    origin: &(String, String),
    hook_registry: Arc<HookRegistry>,
    hook_executor: Arc<HookExecutor>,
) -> Result<String> {
    let mut log = ActivityLog::new(task_id);
    if let Some(ref mut l) = log {
        info!(
            "Subagent [{}] activity log: {}",
            task_id,
            l.path().display()
        );
        l.log_start(task);
    }

    // Build tools from main registry capabilities
    let tools = Arc::new(build_subagent_tools(config));
    // Subagents get their own scheduler instance with an empty policy table
    // (so mutators still ask and readers still allow) and the same empty
    // hook registry used for this task's BeforeAgent/AfterAgent/BeforeModel/
    // AfterModel firing — subagents don't carry their own settings layers.
    let scheduler = Arc::new(ToolScheduler::new(
        tools.clone(),
        Arc::new(PolicyEngine::default()),
        hook_registry.clone(),
        hook_executor.clone(),
        Arc::new(AlwaysDeny),
        config.workspace.clone(),
        4,
    ));

    // Log registered tools
    let registered_names = tools.tool_names();
    info!(
        "Subagent [{}] tools registered: [{}], exfil_guard: {}",
        task_id,
        registered_names.join(", "),
        if config.exfil_guard.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    if let Some(ref mut l) = log {
        l.log_tools(&registered_names, &[]);
    }

    // Scan task input for prompt injection if configured to block
    if let Some(ref guard) = config.prompt_guard
        && config.prompt_guard_config.should_block()
    {
        let matches = guard.scan(task);
        if !matches.is_empty() {
            for m in &matches {
                warn!(
                    "Subagent [{}] prompt injection in task input ({:?}): {}",
                    task_id, m.category, m.pattern_name
                );
            }
            if let Some(ref mut l) = log {
                l.log_end("blocked-injection");
            }
            anyhow::bail!("prompt injection detected in subagent task input");
        }
    }

    let system_prompt = build_subagent_prompt(task, &config.workspace, context);
    let def = AgentDefinition {
        name: format!("subagent-{}", task_id),
        system_prompt,
        model: config.model.clone(),
        allowed_tools: None,
        workspace: config.workspace.clone(),
        max_turns: MAX_SUBAGENT_ITERATIONS,
        time_budget: None,
        output_schema: None,
        temperature: config.tool_temperature,
        max_tokens: config.max_tokens,
        empty_response_retries: EMPTY_RESPONSE_RETRIES,
    };
    let exec_ctx = crate::agent::tools::base::ExecutionContext {
        channel: origin.0.clone(),
        chat_id: origin.1.clone(),
        context_summary: None,
        metadata: std::collections::HashMap::new(),
    };
    let observer = Arc::new(SubagentObserver {
        task_id: task_id.to_string(),
        log: Mutex::new(log),
        prompt_guard: config.prompt_guard.clone(),
        cost_guard: config.cost_guard.clone(),
    });
    let executor = AgentExecutor::new(
        config.provider.clone(),
        tools,
        scheduler,
        hook_registry,
        hook_executor,
    )
    .with_observer(observer.clone());

    let output = executor.run(&def, task, &exec_ctx).await?;

    let mut log = observer.log.lock().await;
    match output.terminate_reason {
        crate::agent::executor::TerminateReason::TaskComplete => {
            if let Some(l) = log.as_mut() {
                l.log_end("ok");
            }
            Ok(output
                .result
                .unwrap_or_else(|| "Task completed with no result.".to_string()))
        }
        crate::agent::executor::TerminateReason::QuotaExceeded => {
            if let Some(l) = log.as_mut() {
                l.log_end("cost-blocked");
            }
            Ok(output
                .result
                .unwrap_or_else(|| "Budget limit reached.".to_string()))
        }
        crate::agent::executor::TerminateReason::MaxTurns => {
            warn!(
                "Subagent [{}] reached max iterations ({})",
                task_id, MAX_SUBAGENT_ITERATIONS
            );
            if let Some(l) = log.as_mut() {
                l.log_max_iterations(MAX_SUBAGENT_ITERATIONS);
                l.log_end("no-final-response");
            }
            Ok("Task completed but no final response was generated.".to_string())
        }
        crate::agent::executor::TerminateReason::Cancelled
        | crate::agent::executor::TerminateReason::Timeout => {
            if let Some(l) = log.as_mut() {
                l.log_end(output.terminate_reason.as_str());
            }
            Ok(output
                .result
                .unwrap_or_else(|| "Task did not complete.".to_string()))
        }
    }
}

async fn announce_result(
    bus: &Arc<Mutex<MessageBus>>,
    task_id: &str,
    label: &str,
    task: &str,
    result: &str,
    origin: &(String, String),
    status: &str,
) {
    let status_text = if status == "ok" {
        "completed successfully"
    } else {
        "failed"
    };
    let announce_content = format!(
        "[Subagent '{}' {}]\n\nTask: {}\n\nResult:\n{}\n\nSummarize this naturally for the user. Keep it brief (1-2 sentences). Do not mention technical details like \"subagent\" or task IDs.",
        label, status_text, task, result
    );

    let msg = InboundMessage {
        channel: "system".to_string(),
        sender_id: "subagent".to_string(),
        chat_id: format!("{}:{}", origin.0, origin.1),
        content: announce_content,
        timestamp: Utc::now(),
        media: vec![],
        metadata: HashMap::new(),
    };

    if let Err(e) = bus.lock().await.publish_inbound(msg).await {
        warn!("Failed to publish inbound message from subagent: {}", e);
    }
    debug!(
        "Subagent [{}] announced result to {}:{}",
        task_id, origin.0, origin.1
    );
}

fn build_subagent_prompt(task: &str, workspace: &std::path::Path, context: Option<&str>) -> String {
    let context_section = if let Some(ctx) = context {
        // Cap context to avoid bloating subagent token usage
        let trimmed: String = ctx.chars().take(MAX_CONTEXT_CHARS).collect();
        format!(
            "\n## Conversation Context\nThe main agent's recent conversation (for reference):\n{}\n",
            trimmed
        )
    } else {
        String::new()
    };

    format!(
        r"# Subagent

You are a subagent spawned by the main agent to complete a specific task.

## Your Task
{}
{}
## Rules
1. Stay focused - complete only the assigned task, nothing else
2. Your final response will be reported back to the main agent
3. Do not initiate conversations or take on side tasks
4. Be concise but informative in your findings

## What You Can Do
- Read and write files in the workspace
- Execute shell commands
- Search the web and fetch web pages
- Complete the task thoroughly

## What You Cannot Do
- Send messages directly to users
- Spawn other subagents
- Access the main agent's full conversation history

## Workspace
Your workspace is at: {}

When you have completed the task, provide a clear summary of your findings or actions.",
        task,
        context_section,
        workspace.display()
    )
}
