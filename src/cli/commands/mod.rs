mod subcommands;

#[cfg(test)]
mod tests;

use crate::agent::AgentLoop;
use crate::bus::MessageBus;
use crate::config::{Config, load_config};
use crate::cron::service::CronService;
use crate::cron::types::{CronJob, CronJobState, CronPayload, CronSchedule};
use crate::heartbeat::service::HeartbeatService;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "agentcore")]
#[command(about = "Terminal conversation-and-tool-execution engine for LLM agents")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize agentcore configuration and workspace
    Onboard,
    /// Interact with the agent directly
    Agent {
        #[arg(short, long)]
        message: Option<String>,
        #[arg(short, long, default_value = "cli:default")]
        session: String,
        /// Override the LLM provider (e.g. anthropic, openai, groq, ollama)
        #[arg(long)]
        provider: Option<String>,
    },
    /// Manage cron jobs
    Cron {
        #[command(subcommand)]
        cmd: CronCommands,
    },
    /// Show agentcore status
    Status,
    /// Run system diagnostics
    Doctor,
    /// Manage credentials (keyring, env vars, credential helpers)
    Credentials {
        #[command(subcommand)]
        cmd: CredentialCommands,
    },
    /// Show memory and cost statistics
    Stats {
        #[command(subcommand)]
        cmd: StatsCommands,
    },
}

#[derive(Subcommand)]
enum CronCommands {
    /// List scheduled jobs
    List {
        #[arg(long, short = 'a')]
        all: bool,
    },
    /// Add a new job
    Add {
        #[arg(long, short = 'n')]
        name: String,
        #[arg(long, short = 'm')]
        message: String,
        #[arg(long, short = 'e')]
        every: Option<u64>,
        #[arg(long, short = 'c')]
        cron: Option<String>,
        #[arg(long)]
        tz: Option<String>,
        #[arg(long)]
        at: Option<String>,
        #[arg(long)]
        agent_echo: bool,
        #[arg(long)]
        to: Option<String>,
    },
    /// Remove a job
    Remove {
        #[arg(long)]
        id: String,
    },
    /// Enable or disable a job
    Enable {
        #[arg(long)]
        id: String,
        #[arg(long)]
        disable: bool,
    },
    /// Edit an existing job
    Edit {
        #[arg(long)]
        id: String,
        #[arg(long, short = 'n')]
        name: Option<String>,
        #[arg(long, short = 'm')]
        message: Option<String>,
        #[arg(long, short = 'e')]
        every: Option<u64>,
        #[arg(long, short = 'c')]
        cron: Option<String>,
        #[arg(long)]
        tz: Option<String>,
        #[arg(long)]
        at: Option<String>,
        #[arg(long)]
        agent_echo: Option<bool>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Manually run a job
    Run {
        #[arg(long)]
        id: String,
        #[arg(long, short = 'f')]
        force: bool,
    },
}

#[derive(Subcommand)]
enum StatsCommands {
    /// Show LLM cost summary
    Costs {
        /// Number of days to look back (default: 7)
        #[arg(long, short = 'd', default_value = "7")]
        days: u32,
    },
    /// Show memory search statistics
    Search,
    /// Show cost for today
    Today,
}

#[derive(Subcommand)]
enum CredentialCommands {
    /// Store a credential in the OS keyring
    Set {
        /// Credential slot name (e.g. "anthropic-api-key")
        name: String,
        /// Value to store (reads from stdin if omitted)
        value: Option<String>,
    },
    /// Check if a credential exists (shows \[set\] or \[empty\])
    Get {
        /// Credential slot name
        name: String,
    },
    /// Remove a credential from the OS keyring
    Delete {
        /// Credential slot name
        name: String,
    },
    /// List all credential slots and their sources
    List,
    /// Import non-empty credentials from config.json into the OS keyring
    Import,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Onboard => {
            onboard()?;
        }
        Commands::Agent {
            message,
            session,
            provider,
        } => {
            subcommands::agent(message, session, provider).await?;
        }
        Commands::Cron { cmd } => {
            subcommands::cron_command(cmd).await?;
        }
        Commands::Status => {
            subcommands::status_command()?;
        }
        Commands::Doctor => {
            crate::cli::doctor::doctor_command().await?;
        }
        Commands::Credentials { cmd } => {
            subcommands::credentials_command(cmd)?;
        }
        Commands::Stats { ref cmd } => {
            subcommands::stats_command(cmd)?;
        }
    }

    Ok(())
}

fn onboard() -> Result<()> {
    println!("\u{1f916} Initializing agentcore...");

    let config_path = crate::config::get_config_path()?;
    if config_path.exists() {
        println!(
            "\u{26a0}\u{fe0f}  Config already exists at {}",
            config_path.display()
        );
        println!("Overwrite? (y/N): ");
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            return Ok(());
        }
    }

    let config = Config::default();
    crate::config::save_config(&config, Some(config_path.as_path()))?;
    println!("\u{2713} Created config at {}", config_path.display());

    let workspace = config.workspace_path();
    crate::utils::ensure_dir(&workspace)?;
    println!("\u{2713} Created workspace at {}", workspace.display());

    create_workspace_templates(&workspace)?;

    println!("\n\u{1f916} agentcore is ready!");
    println!("\nNext steps:");
    println!("  1. Add your API key to ~/.agentcore/config.json");
    println!("     Get one at: https://openrouter.ai/keys");
    println!("  2. Chat: agentcore agent -m \"Hello!\"");

    Ok(())
}

fn create_workspace_templates(workspace: &std::path::Path) -> Result<()> {
    let templates = vec![
        (
            "USER.md",
            r"# User

Information about the user goes here.

## Preferences

- Communication style: (casual/formal)
- Timezone: (your timezone)
- Language: (your preferred language)
",
        ),
        (
            "AGENTS.md",
            r#"# agentcore

I am agentcore, a terminal conversation-and-tool-execution agent.

## Personality

- Friendly but professional
- Direct and concise, with detail when needed
- Accuracy over speed

## Capabilities

I have access to a small set of tools: file read/write/edit, shell execution, web fetch, web search, and memory search.

## Behavioral Rules

- When responding to direct questions or conversations, reply directly with text. Your text response will be delivered to the user automatically.
- Always be helpful, accurate, and concise. When using tools, explain what you're doing.
- Ask for clarification when the request is ambiguous.
- Never invent, guess, or make up information. If you don't know something:
  - Say "I don't know" or "I'm not sure" clearly
  - Use tools (web_search, read_file) to find accurate information before answering
  - Never guess file paths, command syntax, API details, or factual claims

### Action Integrity

Never claim you performed an action (created, updated, wrote, deleted, configured, set up, etc.) unless you actually called a tool to do it in this conversation turn. If you cannot perform the requested action, explain what you would need to do and offer to do it.

When asked to retry, re-run, or re-check something, you MUST actually call the tool again. Never repeat a previous result from conversation history.

## Memory Management

I actively maintain my memory to be useful across sessions:

- **MEMORY.md**: Long-term facts, user preferences, and important context
- **Daily notes** (`memory/YYYY-MM-DD.md`): Session summaries and daily context
- **AGENTS.md**: My own identity. Update the "Learned Adaptations" section when I discover consistent user preferences
- **USER.md**: User preferences and habits. Update when I notice patterns

Be selective — only record genuinely useful facts, not transient conversation details.

## Learned Adaptations

*(This section is updated as I learn about user preferences)*
"#,
        ),
        (
            "TOOLS.md",
            r"# Tool Notes

Notes and configuration details for tools.

## Configured Tools

*(List tools you've configured and any important notes about them)*

## API Keys & Services

*(Record which services are set up — do NOT store actual keys here)*
",
        ),
    ];

    for (filename, content) in templates {
        let file_path = workspace.join(filename);
        if !file_path.exists() {
            std::fs::write(&file_path, content)?;
            println!("  Created {}", filename);
        }
    }

    // Create memory directory and MEMORY.md
    let memory_dir = workspace.join("memory");
    crate::utils::ensure_dir(&memory_dir)?;
    let memory_file = memory_dir.join("MEMORY.md");
    if !memory_file.exists() {
        let memory_content = r"# Long-term Memory

This file stores important information that should persist across sessions.

## User Information

(Important facts about the user)

## Preferences

(User preferences learned over time)

## Important Notes

(Things to remember)
";
        std::fs::write(&memory_file, memory_content)?;
        println!("  Created memory/MEMORY.md");
    }

    Ok(())
}

fn setup_provider(
    config: &Config,
    model: Option<&str>,
) -> Result<Arc<dyn crate::providers::base::LLMProvider>> {
    let effective_model = model.unwrap_or(&config.agents.defaults.model);
    info!("Creating LLM provider for model: {}", effective_model);
    let provider = config.create_provider(model)?;
    info!(
        "Provider created successfully. Default model: {}",
        provider.default_model()
    );

    // Wrap with circuit breaker if enabled
    let provider = if config.providers.circuit_breaker.enabled {
        info!(
            "circuit breaker enabled (threshold={}, recovery={}s, probes={})",
            config.providers.circuit_breaker.failure_threshold,
            config.providers.circuit_breaker.recovery_timeout_secs,
            config.providers.circuit_breaker.half_open_probes,
        );
        crate::providers::circuit_breaker::CircuitBreakerProvider::wrap(
            provider,
            &config.providers.circuit_breaker,
        )
    } else {
        provider
    };

    Ok(provider)
}

type MessageBusSetup = (
    tokio::sync::mpsc::Sender<crate::bus::InboundMessage>,
    Arc<tokio::sync::mpsc::Sender<crate::bus::OutboundMessage>>,
    tokio::sync::mpsc::Receiver<crate::bus::OutboundMessage>,
    Arc<Mutex<MessageBus>>,
);

fn setup_message_bus(config: &Config) -> Result<MessageBusSetup> {
    debug!("Creating message bus...");
    let mut bus = MessageBus::default();

    // Register known secrets so the leak detector can find encoded variants
    let secrets = config.collect_secrets();
    if !secrets.is_empty() {
        debug!(
            "registering {} known secrets with leak detector",
            secrets.len()
        );
        bus.add_known_secrets(&secrets);
    }

    let inbound_tx = bus.inbound_tx.clone();
    let outbound_tx = Arc::new(bus.outbound_tx.clone());
    let outbound_rx = bus
        .take_outbound_rx()
        .ok_or_else(|| anyhow::anyhow!("Outbound receiver already taken"))?;
    let bus_for_agent = Arc::new(Mutex::new(bus));
    debug!("Message bus initialized");
    Ok((inbound_tx, outbound_tx, outbound_rx, bus_for_agent))
}

fn setup_cron_service() -> Result<Arc<CronService>> {
    debug!("Initializing cron service...");
    let cron_store_path = crate::utils::get_oxicrab_home()?
        .join("cron")
        .join("jobs.json");
    let cron = CronService::new(cron_store_path);
    debug!("Cron service initialized");
    Ok(Arc::new(cron))
}

struct SetupAgentParams {
    bus: Arc<Mutex<MessageBus>>,
    provider: Arc<dyn crate::providers::base::LLMProvider>,
    model: Option<String>,
    outbound_tx: Arc<tokio::sync::mpsc::Sender<crate::bus::OutboundMessage>>,
    cron: Option<Arc<CronService>>,
}



async fn setup_agent(params: SetupAgentParams, config: &Config) -> Result<Arc<AgentLoop>> {
    info!("Initializing agent loop...");
    debug!(
        "  - Max tool iterations: {}",
        config.agents.defaults.max_tool_iterations
    );
    debug!("  - Exec timeout: {}s", config.tools.exec.timeout);
    debug!(
        "  - Restrict to workspace: {}",
        config.tools.restrict_to_workspace
    );
    debug!(
        "  - Compaction enabled: {}",
        config.agents.defaults.compaction.enabled
    );
    let agent = Arc::new(
        AgentLoop::new(crate::agent::AgentLoopConfig::from_config(
            config,
            crate::agent::AgentLoopRuntimeParams {
                bus: params.bus,
                provider: params.provider,
                model: params.model,
                outbound_tx: params.outbound_tx,
                cron_service: params.cron,
                typing_tx: None,
            },
        ))
        .await?,
    );
    info!("Agent loop initialized");
    Ok(agent)
}

async fn setup_cron_callbacks(
    cron: Arc<CronService>,
    agent: Arc<AgentLoop>,
    bus: Arc<Mutex<MessageBus>>,
    memory_db: Arc<crate::agent::memory::memory_db::MemoryDB>,
) -> Result<()> {
    debug!("Setting up cron job callback...");
    let agent_clone = agent.clone();
    let bus_clone = bus.clone();
    let db_clone = memory_db;
    cron.set_on_job(move |job| {
        debug!("Cron job triggered: {} - {}", job.id, job.payload.message);
        let agent = agent_clone.clone();
        let bus = bus_clone.clone();
        let db = db_clone.clone();
        Box::pin(async move {
            let result = cron_job_execute(&job, &agent, &bus).await;

            if let Err(ref e) = result {
                let payload_json =
                    serde_json::to_string(&job.payload).unwrap_or_else(|_| "{}".to_string());
                if let Err(dlq_err) =
                    db.insert_dlq_entry(&job.id, &job.name, &payload_json, &e.to_string())
                {
                    warn!("failed to insert DLQ entry for job {}: {}", job.id, dlq_err);
                }
            }

            result
        })
    })
    .await;
    Ok(())
}

async fn cron_job_execute(
    job: &CronJob,
    agent: &Arc<AgentLoop>,
    bus: &Arc<Mutex<MessageBus>>,
) -> Result<Option<String>> {
    if job.payload.kind == "echo" {
        // Echo mode: deliver message directly without invoking the LLM
        let mut bus_guard = bus.lock().await;
        if let Err(e) = bus_guard
            .publish_outbound(crate::bus::OutboundMessage {
                channel: "cli".to_string(),
                chat_id: "direct".to_string(),
                content: job.payload.message.clone(),
                reply_to: None,
                media: vec![],
                metadata: job.payload.origin_metadata.clone(),
            })
            .await
        {
            error!("Failed to publish echo message from cron: {}", e);
        }
        return Ok(Some(job.payload.message.clone()));
    }

    let response = agent
        .process_direct(&job.payload.message, &format!("cron:{}", job.id), "cli", "direct")
        .await?;

    if job.payload.agent_echo {
        let mut bus_guard = bus.lock().await;
        if let Err(e) = bus_guard
            .publish_outbound(crate::bus::OutboundMessage {
                channel: "cli".to_string(),
                chat_id: "direct".to_string(),
                content: response.clone(),
                reply_to: None,
                media: vec![],
                metadata: job.payload.origin_metadata.clone(),
            })
            .await
        {
            error!("Failed to publish outbound message from cron: {}", e);
        }
    }

    Ok(Some(response))
}

fn setup_heartbeat(config: &Config, agent: &Arc<AgentLoop>) -> Arc<HeartbeatService> {
    debug!("Initializing heartbeat service...");
    debug!("  - Enabled: {}", config.agents.defaults.daemon.enabled);
    debug!("  - Interval: {}s", config.agents.defaults.daemon.interval);
    debug!(
        "  - Strategy file: {}",
        config.agents.defaults.daemon.strategy_file
    );

    // Build daemon-specific overrides from config
    let daemon_cfg = &config.agents.defaults.daemon;
    let daemon_overrides = Arc::new(crate::agent::AgentRunOverrides {
        model: daemon_cfg.execution_model.clone(),
        max_iterations: Some(daemon_cfg.max_iterations),
    });

    if daemon_cfg.execution_model.is_some() {
        info!(
            "daemon will use model override: {}",
            daemon_cfg.execution_model.as_deref().unwrap_or("(none)")
        );
    }
    if daemon_cfg.execution_provider.is_some() {
        warn!(
            "daemon executionProvider is not yet supported and will be ignored; \
             the default provider will be used"
        );
    }

    let agent_for_heartbeat = agent.clone();
    let heartbeat = HeartbeatService::new(
        config.workspace_path(),
        Some(Arc::new(move |prompt| {
            debug!("Heartbeat triggered with prompt: {}", prompt);
            let agent = agent_for_heartbeat.clone();
            let overrides = daemon_overrides.clone();
            Box::pin(async move {
                agent
                    .process_direct_with_overrides(&prompt, "daemon", "cli", "direct", &overrides)
                    .await
            })
        })),
        config.agents.defaults.daemon.interval,
        config.agents.defaults.daemon.enabled,
        config.agents.defaults.daemon.strategy_file.clone(),
    );
    debug!("Heartbeat service initialized");
    Arc::new(heartbeat)
}

async fn start_services(cron: Arc<CronService>, heartbeat: Arc<HeartbeatService>) -> Result<()> {
    info!("Starting cron service...");
    cron.start().await?;
    info!("Cron service started");

    info!("Starting heartbeat service...");
    heartbeat.start().await?;
    info!("Heartbeat service started");
    Ok(())
}
