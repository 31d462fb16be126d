pub mod base;
pub mod cron;
pub mod filesystem;
pub mod mcp;
pub mod memory_search;
pub mod message;
pub mod read_only_wrapper;
pub mod registry;
pub mod setup;
pub mod shell;
pub mod spawn;
pub mod subagent_control;
pub mod web;

pub use base::{
    ActionDescriptor, ExecutionContext, SubagentAccess, Tool, ToolCapabilities, ToolMiddleware,
    ToolOrigin, ToolResult, ToolVersion,
};
pub use registry::ToolRegistry;
