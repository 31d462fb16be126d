pub mod credentials;
pub mod loader;
pub mod schema;
pub mod watcher;

pub use loader::{get_config_path, load_config, save_config};
pub use schema::{
    AgentDefaults, AgentsConfig, AnthropicOAuthConfig, CheckpointConfig, CircuitBreakerConfig,
    ClassifierConfig, CognitiveConfig, CompactionConfig, Config, ContextProviderConfig,
    CostGuardConfig, CredentialHelperConfig, ExecToolConfig, ExfiltrationGuardConfig,
    FusionStrategy, McpConfig, MemoryConfig, ModelCost, PromptGuardAction, PromptGuardConfig,
    ProviderConfig, ProvidersConfig, RouterConfig, SandboxConfig, ToolsConfig,
    TranscriptionConfig, VoiceConfig, WebSearchConfig, normalize_provider,
};
