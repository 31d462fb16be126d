use super::{
    AgentLoop, Context, CredentialCommands, CronCommands, CronJob, CronJobState, CronPayload,
    CronSchedule, CronService, MessageBus, SetupAgentParams, StatsCommands, SystemTime,
    UNIX_EPOCH, setup_agent, setup_cron_callbacks, setup_heartbeat, start_services,
};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::load_config;

pub(super) async fn agent(
    message: Option<String>,
    session: String,
    provider: Option<String>,
) -> Result<()> {
    let mut config = load_config(None)?;
    if let Some(ref p) = provider {
        config.agents.defaults.provider = Some(p.clone());
    }
    config.validate()?;

    let provider = config.create_provider(None)?;

    let mut bus = MessageBus::default();
    let secrets = config.collect_secrets();
    if !secrets.is_empty() {
        bus.add_known_secrets(&secrets);
    }
    let outbound_tx = Arc::new(bus.outbound_tx.clone());
    let bus_for_agent = Arc::new(Mutex::new(bus));

    let cron_store_path = crate::utils::get_oxicrab_home()?
        .join("cron")
        .join("jobs.json");
    let cron = Arc::new(CronService::new(cron_store_path));

    let agent = setup_agent(
        SetupAgentParams {
            bus: bus_for_agent.clone(),
            provider,
            model: None,
            outbound_tx,
            cron: Some(cron.clone()),
        },
        &config,
    )
    .await?;

    let memory_db_for_dlq = agent.memory_db();
    setup_cron_callbacks(cron.clone(), agent.clone(), bus_for_agent, memory_db_for_dlq).await?;
    let heartbeat = setup_heartbeat(&config, &agent);
    start_services(cron.clone(), heartbeat.clone()).await?;

    if let Some(msg) = message {
        let response = agent
            .process_direct(&msg, &session, "cli", "direct")
            .await?;
        println!("\u{1f916} {}", response);
        heartbeat.stop().await;
        cron.stop().await;
    } else {
        let result = interactive_repl(&agent, &session).await;
        heartbeat.stop().await;
        cron.stop().await;
        result?;
    }

    Ok(())
}

async fn interactive_repl(agent: &AgentLoop, session: &str) -> Result<()> {
    use std::io::{self, BufRead, Write};

    println!("\u{1f916} Interactive mode (Ctrl+C to exit)\n");
    loop {
        print!("You: ");
        io::stdout().flush()?;

        let stdin = io::stdin();
        let mut input = String::new();
        let bytes = stdin.lock().read_line(&mut input)?;
        if bytes == 0 {
            // EOF (e.g. piped stdin closed)
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        let response = agent
            .process_direct(input, session, "cli", "direct")
            .await?;
        println!("\n\u{1f916} {}\n", response);
    }
    Ok(())
}

#[allow(clippy::too_many_lines)]
pub(super) async fn cron_command(cmd: CronCommands) -> Result<()> {
    let _config = load_config(None)?;
    let cron_store_path = crate::utils::get_oxicrab_home()?
        .join("cron")
        .join("jobs.json");
    let cron = CronService::new(cron_store_path);

    match cmd {
        CronCommands::List { all } => {
            let jobs = cron.list_jobs(all).await?;
            if jobs.is_empty() {
                println!("No cron jobs found.");
            } else {
                println!("Cron jobs:");
                for job in jobs {
                    let status = if job.enabled { "enabled" } else { "disabled" };
                    let next_run = job.state.next_run_at_ms.map_or_else(
                        || "never".to_string(),
                        |ms| {
                            chrono::DateTime::from_timestamp(ms / 1000, 0).map_or_else(
                                || "invalid timestamp".to_string(),
                                |dt| format!("{}", dt.format("%Y-%m-%d %H:%M:%S")),
                            )
                        },
                    );
                    println!(
                        "  [{}] {} - {} (next: {})",
                        job.id, job.name, status, next_run
                    );
                }
            }
        }
        CronCommands::Add {
            name,
            message,
            every,
            cron: cron_expr,
            tz,
            at,
            agent_echo,
            to,
        } => {
            use crate::cron::types::CronTarget;

            let targets = vec![CronTarget {
                channel: "cli".to_string(),
                to: to.unwrap_or_else(|| "direct".to_string()),
            }];

            let schedule = if let Some(every_sec) = every {
                CronSchedule::Every {
                    every_ms: Some(every_sec.saturating_mul(1000).min(i64::MAX as u64) as i64),
                }
            } else if let Some(expr) = cron_expr {
                // Validate the expression parses
                crate::cron::service::validate_cron_expr(&expr)?;
                let tz = tz.or_else(crate::cron::service::detect_system_timezone);
                CronSchedule::Cron {
                    expr: Some(expr),
                    tz,
                }
            } else if let Some(at_str) = at {
                let dt = chrono::DateTime::parse_from_rfc3339(&at_str)
                    .or_else(|_| chrono::DateTime::parse_from_str(&at_str, "%Y-%m-%d %H:%M:%S"))
                    .context("Invalid date format. Use ISO 8601 or YYYY-MM-DD HH:MM:SS")?;
                CronSchedule::At {
                    at_ms: Some(dt.timestamp_millis()),
                }
            } else {
                anyhow::bail!("Must specify --every, --cron, or --at");
            };

            let now_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .context("System time is before UNIX epoch")
                .map(|d| d.as_millis() as i64)?;

            let job = CronJob {
                id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
                name,
                enabled: true,
                schedule,
                payload: CronPayload {
                    kind: "agent_turn".to_string(),
                    message,
                    agent_echo,
                    targets,
                    origin_metadata: std::collections::HashMap::new(),
                },
                state: CronJobState {
                    next_run_at_ms: None, // Will be computed by service
                    last_run_at_ms: None,
                    last_status: None,
                    last_error: None,
                    run_count: 0,
                    last_fired_at_ms: None,
                },
                created_at_ms: now_ms,
                updated_at_ms: now_ms,
                delete_after_run: false,
                expires_at_ms: None,
                max_runs: None,
                cooldown_secs: None,
                max_concurrent: None,
            };

            cron.add_job(job).await?;
            println!("Cron job added successfully.");
        }
        CronCommands::Remove { id } => match cron.remove_job(&id).await? {
            Some(job) => {
                println!("Removed cron job: {} ({})", job.name, job.id);
            }
            None => {
                println!("Cron job {} not found.", id);
            }
        },
        CronCommands::Enable { id, disable } => match cron.enable_job(&id, !disable).await? {
            Some(job) => {
                let status = if job.enabled { "enabled" } else { "disabled" };
                println!("Job {} ({}) {}", job.name, job.id, status);
            }
            None => {
                println!("Cron job {} not found.", id);
            }
        },
        CronCommands::Edit {
            id,
            name,
            message,
            every,
            cron: cron_expr,
            tz,
            at,
            agent_echo,
            to,
        } => {
            use crate::cron::types::CronTarget;

            let schedule = if let Some(every_sec) = every {
                Some(CronSchedule::Every {
                    every_ms: Some(every_sec.saturating_mul(1000).min(i64::MAX as u64) as i64),
                })
            } else if let Some(expr) = cron_expr {
                crate::cron::service::validate_cron_expr(&expr)?;
                Some(CronSchedule::Cron {
                    expr: Some(expr),
                    tz,
                })
            } else if let Some(at_str) = at {
                let dt = chrono::DateTime::parse_from_rfc3339(&at_str)
                    .or_else(|_| chrono::DateTime::parse_from_str(&at_str, "%Y-%m-%d %H:%M:%S"))
                    .context("Invalid date format. Use ISO 8601 or YYYY-MM-DD HH:MM:SS")?;
                Some(CronSchedule::At {
                    at_ms: Some(dt.timestamp_millis()),
                })
            } else if tz.is_some() {
                // Just updating timezone - need to get current job
                let jobs = cron.list_jobs(true).await?;
                let current_job = jobs.iter().find(|j| j.id == id);
                if let Some(job) = current_job {
                    if let CronSchedule::Cron { expr, .. } = &job.schedule {
                        Some(CronSchedule::Cron {
                            expr: expr.clone(),
                            tz,
                        })
                    } else {
                        None
                    }
                } else {
                    None
                }
            } else {
                None
            };

            let targets = to.map(|to_val| {
                vec![crate::cron::types::CronTarget {
                    channel: "cli".to_string(),
                    to: to_val,
                }]
            });

            match cron
                .update_job(
                    &id,
                    crate::cron::types::UpdateJobParams {
                        name,
                        message,
                        schedule,
                        agent_echo,
                        targets,
                    },
                )
                .await?
            {
                Some(job) => {
                    println!("Updated job: {} ({})", job.name, job.id);
                }
                None => {
                    println!("Cron job {} not found.", id);
                }
            }
        }
        CronCommands::Run { id, force } => match cron.run_job(&id, force).await? {
            Some(result) => {
                println!("Job executed successfully.");
                if let Some(output) = result {
                    println!("{}", output);
                }
            }
            None => {
                println!("Failed to run job {} (not found or disabled)", id);
            }
        },
    }

    Ok(())
}

pub(super) fn status_command() -> Result<()> {
    let config = load_config(None)?;
    let config_path = crate::config::get_config_path()?;
    let workspace = config.workspace_path();

    println!("\u{1f916} agentcore Status\n");

    println!(
        "Config: {} {}",
        config_path.display(),
        if config_path.exists() {
            "\u{2713}"
        } else {
            "\u{2717}"
        }
    );
    println!(
        "Workspace: {} {}",
        workspace.display(),
        if workspace.exists() {
            "\u{2713}"
        } else {
            "\u{2717}"
        }
    );

    if config_path.exists() {
        println!("Model: {}", config.agents.defaults.model);

        // Check API keys
        let has_openrouter = !config.providers.openrouter.api_key.is_empty();
        let has_anthropic = !config.providers.anthropic.api_key.is_empty();
        let has_openai = !config.providers.openai.api_key.is_empty();
        let has_gemini = !config.providers.gemini.api_key.is_empty();
        let has_vllm = config.providers.vllm.api_base.is_some();

        println!(
            "OpenRouter API: {}",
            if has_openrouter {
                "\u{2713}"
            } else {
                "not set"
            }
        );
        println!(
            "Anthropic API: {}",
            if has_anthropic { "\u{2713}" } else { "not set" }
        );
        println!(
            "OpenAI API: {}",
            if has_openai { "\u{2713}" } else { "not set" }
        );
        println!(
            "Gemini API: {}",
            if has_gemini { "\u{2713}" } else { "not set" }
        );
        if has_vllm {
            if let Some(api_base) = config.providers.vllm.api_base.as_ref() {
                println!("vLLM/Local: \u{2713} {}", api_base);
            } else {
                println!("vLLM/Local: not set");
            }
        } else {
            println!("vLLM/Local: not set");
        }
    }

    Ok(())
}

pub(super) fn credentials_command(cmd: CredentialCommands) -> Result<()> {
    use crate::config::credentials::{
        CREDENTIAL_ENV_VARS, CREDENTIAL_NAMES, detect_source, get_credential_value,
    };

    match cmd {
        CredentialCommands::Set { name, value } => {
            if !CREDENTIAL_NAMES.contains(&name.as_str()) {
                anyhow::bail!(
                    "unknown credential: {name}\nRun `agentcore credentials list` to see valid names"
                );
            }

            #[cfg(not(feature = "keyring-store"))]
            {
                let _ = value;
                anyhow::bail!("keyring support not compiled (enable 'keyring-store' feature)");
            }

            #[cfg(feature = "keyring-store")]
            {
                let secret = if let Some(v) = value {
                    v
                } else {
                    use std::io::BufRead;
                    eprint!("Enter value for {name}: ");
                    let stdin = std::io::stdin();
                    let mut line = String::new();
                    stdin.lock().read_line(&mut line)?;
                    line.trim().to_string()
                };

                if secret.is_empty() {
                    anyhow::bail!("value cannot be empty");
                }

                crate::config::credentials::keyring_set(&name, &secret)?;
                println!("Stored {name} in keyring");
            }
        }
        CredentialCommands::Get { name } => {
            if !CREDENTIAL_NAMES.contains(&name.as_str()) {
                anyhow::bail!(
                    "unknown credential: {name}\nRun `agentcore credentials list` to see valid names"
                );
            }

            #[cfg(not(feature = "keyring-store"))]
            {
                println!("{name}: keyring support not compiled");
            }

            #[cfg(feature = "keyring-store")]
            {
                let status = if crate::config::credentials::keyring_has(&name) {
                    "[set]"
                } else {
                    "[empty]"
                };
                println!("{name}: {status}");
            }
        }
        CredentialCommands::Delete { name } => {
            if !CREDENTIAL_NAMES.contains(&name.as_str()) {
                anyhow::bail!(
                    "unknown credential: {name}\nRun `agentcore credentials list` to see valid names"
                );
            }

            #[cfg(not(feature = "keyring-store"))]
            anyhow::bail!("keyring support not compiled (enable 'keyring-store' feature)");

            #[cfg(feature = "keyring-store")]
            {
                crate::config::credentials::keyring_delete(&name)?;
                println!("Deleted {name} from keyring");
            }
        }
        CredentialCommands::List => {
            let config = load_config(None)?;

            println!("{:<30} Source", "Credential");
            println!("{}", "\u{2500}".repeat(50));

            for &name in CREDENTIAL_NAMES {
                let source = detect_source(name, &config);
                println!("{:<30} {}", name, source);
            }

            println!(
                "\n{} credential slot(s), {} populated",
                CREDENTIAL_NAMES.len(),
                CREDENTIAL_NAMES
                    .iter()
                    .filter(|&&n| {
                        get_credential_value(&config, n).is_some_and(|v: &str| !v.is_empty())
                    })
                    .count()
            );

            // Show env var hint
            let env_count = CREDENTIAL_ENV_VARS
                .iter()
                .filter(|(_, env)| std::env::var(env).ok().is_some_and(|v| !v.is_empty()))
                .count();
            if env_count > 0 {
                println!("{env_count} credential(s) from environment variables");
            }
        }
        CredentialCommands::Import => {
            #[cfg(not(feature = "keyring-store"))]
            anyhow::bail!("keyring support not compiled (enable 'keyring-store' feature)");

            #[cfg(feature = "keyring-store")]
            {
                let config = load_config(None)?;
                let mut imported = 0u32;

                for &name in CREDENTIAL_NAMES {
                    if let Some(val) = get_credential_value(&config, name)
                        && !val.is_empty()
                    {
                        match crate::config::credentials::keyring_set(name, val) {
                            Ok(()) => {
                                println!("  Imported {name}");
                                imported += 1;
                            }
                            Err(e) => {
                                eprintln!("  Failed to import {name}: {e}");
                            }
                        }
                    }
                }

                if imported == 0 {
                    println!("No credentials to import (all slots empty in config).");
                } else {
                    println!(
                        "\nImported {imported} credential(s) into keyring.\n\
                         You can now remove them from config.json if desired."
                    );
                }
            }
        }
    }
    Ok(())
}

pub(super) fn stats_command(cmd: &StatsCommands) -> Result<()> {
    let config = load_config(None)?;
    let workspace = config.workspace_path();
    let db_path = workspace.join("memory").join("memory.sqlite3");

    if !db_path.exists() {
        anyhow::bail!(
            "memory database not found at {}. Run the agent first to initialize it.",
            db_path.display()
        );
    }

    let db = crate::agent::memory::MemoryDB::new(&db_path)?;

    match cmd {
        StatsCommands::Today => {
            let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
            let daily = db.get_daily_cost(&today)?;
            println!(
                "Cost today ({}): {:.2} cents (${:.4})",
                today,
                daily,
                daily / 100.0
            );
        }
        StatsCommands::Costs { days } => {
            let since = (chrono::Utc::now().date_naive()
                - chrono::Duration::days(i64::from(*days)))
            .format("%Y-%m-%d")
            .to_string();
            let summary = db.get_cost_summary(&since)?;

            if summary.is_empty() {
                println!("No cost data in the last {} days.", days);
                return Ok(());
            }

            println!(
                "{:<12} {:<30} {:>8} {:>10} {:>10} {:>6}",
                "Date", "Model", "Cents", "Input", "Output", "Calls"
            );
            println!("{}", "\u{2500}".repeat(80));

            let mut total_cents = 0.0;
            let mut total_calls = 0i64;
            for row in &summary {
                println!(
                    "{:<12} {:<30} {:>8.2} {:>10} {:>10} {:>6}",
                    row.date,
                    row.model,
                    row.total_cents,
                    row.total_input_tokens,
                    row.total_output_tokens,
                    row.call_count,
                );
                total_cents += row.total_cents;
                total_calls += row.call_count;
            }

            println!("{}", "\u{2500}".repeat(80));
            println!(
                "Total: {:.2} cents (${:.4}) across {} calls",
                total_cents,
                total_cents / 100.0,
                total_calls
            );
        }
        StatsCommands::Search => {
            let stats = db.get_search_stats()?;
            println!("Memory Search Statistics");
            println!("{}", "\u{2500}".repeat(40));
            println!("Total searches:       {}", stats.total_searches);
            println!("Total hits:           {}", stats.total_hits);
            println!("Avg results/search:   {:.1}", stats.avg_results_per_search);

            let top = db.get_top_sources(10)?;
            if !top.is_empty() {
                println!("\nTop Sources by Hit Count:");
                for (key, count) in &top {
                    println!("  {:<30} {} hits", key, count);
                }
            }
        }
    }

    Ok(())
}
