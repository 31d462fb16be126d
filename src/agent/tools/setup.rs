use crate::agent::memory::MemoryStore;
use crate::agent::memory::memory_db::MemoryDB;
use crate::agent::subagent::{SubagentConfig, SubagentManager};
use crate::agent::tools::mcp::McpManager;
use crate::agent::tools::mcp::proxy::AttenuatedMcpTool;
use crate::agent::tools::{Tool, ToolRegistry};
use crate::bus::{MessageBus, OutboundMessage};
use crate::config;
use crate::cron::service::CronService;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// All configuration and shared state needed to construct tools.
/// Built once during `AgentLoop::new()` and passed to each module's `register()`.
pub struct ToolBuildContext {
    pub workspace: PathBuf,
    pub restrict_to_workspace: bool,
    pub exec_timeout: u64,
    pub allowed_commands: Vec<String>,
    pub sandbox_config: config::SandboxConfig,
    pub outbound_tx: Arc<tokio::sync::mpsc::Sender<OutboundMessage>>,
    pub bus: Arc<Mutex<MessageBus>>,
    pub brave_api_key: Option<String>,
    pub web_search_config: Option<config::WebSearchConfig>,
    pub cron_service: Option<Arc<CronService>>,
    pub memory: Arc<MemoryStore>,
    pub subagent_config: SubagentConfig,
    pub mcp_config: Option<config::McpConfig>,
    pub memory_db: Option<Arc<MemoryDB>>,
    pub workspace_manager: Option<Arc<crate::agent::workspace::WorkspaceManager>>,
}

/// Register all tools into the registry using decentralized per-module `register()` functions.
/// Returns `(ToolRegistry, SubagentManager, Option<McpManager>)`.
pub async fn register_all_tools(
    ctx: &ToolBuildContext,
) -> Result<(ToolRegistry, Arc<SubagentManager>, Option<McpManager>)> {
    let mut tools = ToolRegistry::new();

    register_filesystem(&mut tools, ctx);
    register_shell(&mut tools, ctx)?;
    register_web(&mut tools, ctx);
    let subagents = register_subagents(&mut tools, ctx);
    register_cron(&mut tools, ctx);
    register_memory_search(&mut tools, ctx);

    let mcp_result = create_mcp(ctx).await;

    let mcp_manager = if let Some((mcp_tools, manager)) = mcp_result {
        for tool in mcp_tools {
            let name = tool.name().to_string();
            // Reject MCP tools that shadow built-in tools (capability-based)
            if let Some(existing) = tools.get(&name)
                && existing.capabilities().origin.is_built_in()
            {
                warn!("MCP tool '{}' rejected: shadows a built-in tool", name);
                continue;
            }
            tools.register(tool);
        }
        Some(manager)
    } else {
        None
    };

    Ok((tools, subagents, mcp_manager))
}

fn register_filesystem(registry: &mut ToolRegistry, ctx: &ToolBuildContext) {
    use crate::agent::tools::filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};

    let allowed_roots = if ctx.restrict_to_workspace {
        let mut roots = vec![ctx.workspace.clone()];
        if let Some(home) = dirs::home_dir() {
            roots.push(home.join(".oxicrab"));
        }
        Some(roots)
    } else {
        None
    };

    let backup_dir = dirs::home_dir().map(|h| h.join(".oxicrab/backups"));
    let workspace = Some(ctx.workspace.clone());
    let ws_mgr = ctx.workspace_manager.clone();

    let mut read_tool = ReadFileTool::new(allowed_roots.clone(), workspace.clone());
    if let Some(ref mgr) = ws_mgr {
        read_tool = read_tool.with_workspace_manager(mgr.clone());
    }
    registry.register(Arc::new(read_tool));

    let mut write_tool =
        WriteFileTool::new(allowed_roots.clone(), backup_dir.clone(), workspace.clone());
    if let Some(ref mgr) = ws_mgr {
        write_tool = write_tool.with_workspace_manager(mgr.clone());
    }
    registry.register(Arc::new(write_tool));

    registry.register(Arc::new(EditFileTool::new(
        allowed_roots.clone(),
        backup_dir,
        workspace.clone(),
    )));
    registry.register(Arc::new(ListDirTool::new(allowed_roots, workspace)));
}

fn register_shell(registry: &mut ToolRegistry, ctx: &ToolBuildContext) -> Result<()> {
    use crate::agent::tools::shell::ExecTool;

    registry.register(Arc::new(ExecTool::new(
        ctx.exec_timeout,
        Some(ctx.workspace.clone()),
        ctx.restrict_to_workspace,
        ctx.allowed_commands.clone(),
        ctx.sandbox_config.clone(),
    )?));
    Ok(())
}

fn register_web(registry: &mut ToolRegistry, ctx: &ToolBuildContext) {
    use crate::agent::tools::web::{WebFetchTool, WebSearchTool};

    if let Some(ref ws_cfg) = ctx.web_search_config {
        registry.register(Arc::new(WebSearchTool::from_config(ws_cfg)));
    } else {
        registry.register(Arc::new(WebSearchTool::new(ctx.brave_api_key.clone(), 5)));
    }
    if let Ok(fetch) = WebFetchTool::new(50000) {
        registry.register(Arc::new(fetch));
    }
}

fn register_subagents(registry: &mut ToolRegistry, ctx: &ToolBuildContext) -> Arc<SubagentManager> {
    use crate::agent::tools::spawn::SpawnTool;
    use crate::agent::tools::subagent_control::SubagentControlTool;

    let subagents = Arc::new(SubagentManager::new(
        ctx.subagent_config.clone(),
        ctx.bus.clone(),
    ));

    registry.register(Arc::new(SpawnTool::new(subagents.clone())));
    registry.register(Arc::new(SubagentControlTool::new(subagents.clone())));

    subagents
}

fn register_cron(registry: &mut ToolRegistry, ctx: &ToolBuildContext) {
    use crate::agent::tools::cron::CronTool;

    if let Some(ref cron_svc) = ctx.cron_service {
        registry.register(Arc::new(CronTool::new(cron_svc.clone(), ctx.memory_db.clone())));
    }
}

fn register_memory_search(registry: &mut ToolRegistry, ctx: &ToolBuildContext) {
    use crate::agent::tools::memory_search::MemorySearchTool;

    registry.register(Arc::new(MemorySearchTool::new(ctx.memory.clone())));
}

/// Check whether a tool name is safe for community-trust MCP servers.
/// Uses word-boundary matching (camelCase → segments) to avoid substring
/// false positives like "breadcrumb" containing "read".
fn is_community_safe(tool_name: &str) -> bool {
    const SAFE_KEYWORDS: &[&str] = &[
        "read", "list", "get", "search", "find", "query", "fetch", "view", "show", "count",
    ];
    // Normalize camelCase to snake_case, then check word segments
    let mut normalized = String::with_capacity(tool_name.len() + 10);
    for (i, ch) in tool_name.char_indices() {
        if ch.is_ascii_uppercase() && i > 0 {
            normalized.push('_');
        }
        normalized.push(ch.to_ascii_lowercase());
    }
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .any(|seg| SAFE_KEYWORDS.contains(&seg))
}

async fn create_mcp(ctx: &ToolBuildContext) -> Option<(Vec<Arc<dyn Tool>>, McpManager)> {
    let mcp_cfg = ctx.mcp_config.as_ref()?;
    if mcp_cfg.servers.is_empty() {
        return None;
    }
    match McpManager::new(mcp_cfg, &ctx.workspace).await {
        Ok(manager) => {
            let discovered = manager.discover_tools().await;
            let mut accepted: Vec<Arc<dyn Tool>> = Vec::new();
            for (trust, tool) in discovered {
                let name = tool.name().to_string();
                match trust.as_str() {
                    "local" => {
                        accepted.push(tool);
                    }
                    "verified" => {
                        accepted.push(Arc::new(AttenuatedMcpTool::new(tool)));
                    }
                    "community" => {
                        if is_community_safe(&name) {
                            accepted.push(Arc::new(AttenuatedMcpTool::new(tool)));
                        } else {
                            warn!(
                                "MCP tool '{}' rejected: community trust, name does not contain a safe keyword",
                                name
                            );
                        }
                    }
                    other => {
                        warn!(
                            "MCP tool '{}' rejected: unknown trust level '{}'",
                            name, other
                        );
                    }
                }
            }
            if !accepted.is_empty() {
                info!("Registered {} MCP tool(s)", accepted.len());
            }
            Some((accepted, manager))
        }
        Err(e) => {
            error!("MCP initialization failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_community_safe_keyword_matching() {
        // Read-only tool names should pass (snake_case, camelCase, PascalCase)
        assert!(is_community_safe("list_users"));
        assert!(is_community_safe("get_document"));
        assert!(is_community_safe("search_records"));
        assert!(is_community_safe("ReadConfig"));
        assert!(is_community_safe("fetchData"));
        assert!(is_community_safe("showStatus"));
        assert!(is_community_safe("count-items"));

        // Mutating tool names should be rejected
        assert!(!is_community_safe("delete_users"));
        assert!(!is_community_safe("create_record"));
        assert!(!is_community_safe("execute_command"));
        assert!(!is_community_safe("send_email"));

        // Substring false positives must be rejected (word-boundary check)
        assert!(!is_community_safe("breadcrumb")); // contains "read" substring
        assert!(!is_community_safe("overwrite")); // contains "view" substring
        assert!(!is_community_safe("altogether")); // contains "get" substring
    }

    #[test]
    fn test_builtin_tools_have_builtin_capability() {
        // Verify that all built-in tool types declare origin: Builtin
        use crate::agent::tools::filesystem::ReadFileTool;
        use crate::agent::tools::shell::ExecTool;
        use crate::agent::tools::web::WebSearchTool;

        assert!(
            ReadFileTool::new(None, None)
                .capabilities()
                .origin
                .is_built_in()
        );
        assert!(
            ExecTool::new(10, None, false, vec![], config::SandboxConfig::default())
                .unwrap()
                .capabilities()
                .origin
                .is_built_in()
        );
        assert!(
            WebSearchTool::new(None, 5)
                .capabilities()
                .origin
                .is_built_in()
        );
    }
}
