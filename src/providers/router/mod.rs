use crate::config::schema::ClassifierConfig;
use crate::providers::base::{ChatRequest, LLMProvider, Message, ResponseFormat};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Sentinel meaning "let the router decide" rather than a concrete model id.
pub const AUTO_MODEL: &str = "auto";

/// Flag the Chat Session trips when a provider reports quota exhaustion
/// (`OxicrabError::RateLimit`/`QuotaExceeded`-classified failures), and that
/// the router's [`FallbackStrategy`] reads. Mirrors the circuit breaker's
/// `Closed`/`Open` split, minus the half-open recovery probing: degraded
/// mode is binary and cleared explicitly by a successful recovery probe.
#[derive(Default)]
pub struct DegradedMode {
    active: AtomicBool,
}

impl DegradedMode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn trip(&self) {
        warn!("model router: degraded mode activated");
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    Fallback,
    Override,
    Classifier,
    Default,
}

impl std::fmt::Display for RouteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fallback => write!(f, "fallback"),
            Self::Override => write!(f, "override"),
            Self::Classifier => write!(f, "classifier"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Routing decision for one turn, carried for telemetry.
#[derive(Debug, Clone)]
pub struct ModelRoute {
    pub model: String,
    pub source: RouteSource,
    pub latency: Duration,
    pub reasoning: Option<String>,
}

/// What a strategy needs to decide: the user's requested model (or the
/// `auto` sentinel) and the last few clean turns for the classifier.
pub struct RoutingTurn<'a> {
    pub requested_model: &'a str,
    pub recent_turns: &'a [Message],
}

#[async_trait]
trait RoutingStrategy: Send + Sync {
    fn source(&self) -> RouteSource;

    /// Return `Some((model, reasoning))` to decide this turn, or `None` to
    /// pass to the next strategy in the chain.
    async fn try_route(&self, turn: &RoutingTurn<'_>) -> Option<(String, Option<String>)>;
}

struct FallbackStrategy {
    degraded: Arc<DegradedMode>,
    fallback_model: String,
}

#[async_trait]
impl RoutingStrategy for FallbackStrategy {
    fn source(&self) -> RouteSource {
        RouteSource::Fallback
    }

    async fn try_route(&self, _turn: &RoutingTurn<'_>) -> Option<(String, Option<String>)> {
        if self.degraded.is_active() {
            Some((
                self.fallback_model.clone(),
                Some("runtime is in degraded mode".to_string()),
            ))
        } else {
            None
        }
    }
}

struct OverrideStrategy;

#[async_trait]
impl RoutingStrategy for OverrideStrategy {
    fn source(&self) -> RouteSource {
        RouteSource::Override
    }

    async fn try_route(&self, turn: &RoutingTurn<'_>) -> Option<(String, Option<String>)> {
        if turn.requested_model.is_empty() || turn.requested_model == AUTO_MODEL {
            None
        } else {
            Some((turn.requested_model.to_string(), None))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClassifierDecision {
    reasoning: String,
    model_choice: String,
}

const CLASSIFIER_PROMPT: &str = "You route conversation turns to one of two model tiers based on \
how demanding the turn is. Reply with strict JSON only: \
{\"reasoning\": \"<one sentence>\", \"model_choice\": \"flash\" | \"pro\"}. \
Choose \"flash\" for simple, short, or conversational turns; choose \"pro\" for turns that need \
careful reasoning, multi-step planning, or code generation.";

struct ClassifierStrategy {
    provider: Arc<dyn LLMProvider>,
    config: ClassifierConfig,
}

impl ClassifierStrategy {
    fn format_turns(turns: &[Message]) -> String {
        turns
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn resolve(&self, choice: &str) -> Option<&str> {
        match choice {
            "flash" => Some(&self.config.flash_model),
            "pro" => Some(&self.config.pro_model),
            _ => None,
        }
    }
}

#[async_trait]
impl RoutingStrategy for ClassifierStrategy {
    fn source(&self) -> RouteSource {
        RouteSource::Classifier
    }

    async fn try_route(&self, turn: &RoutingTurn<'_>) -> Option<(String, Option<String>)> {
        if !self.config.enabled {
            return None;
        }

        let clean_turns: Vec<Message> = turn
            .recent_turns
            .iter()
            .filter(|m| (m.role == "user" || m.role == "assistant") && !m.content.is_empty())
            .rev()
            .take(4)
            .rev()
            .cloned()
            .collect();
        if clean_turns.is_empty() {
            return None;
        }

        let req = ChatRequest {
            messages: vec![
                Message::system(CLASSIFIER_PROMPT),
                Message::user(Self::format_turns(&clean_turns)),
            ],
            tools: None,
            model: Some(&self.config.model),
            max_tokens: 256,
            temperature: 0.0,
            tool_choice: None,
            response_format: Some(ResponseFormat::JsonObject),
        };

        let response = match self.provider.chat(req).await {
            Ok(resp) => resp,
            Err(e) => {
                debug!("model router classifier transport failure, passing: {}", e);
                return None;
            }
        };

        let content = response.content?;
        let decision: ClassifierDecision = match serde_json::from_str(&content) {
            Ok(d) => d,
            Err(e) => {
                debug!("model router classifier parse failure, passing: {}", e);
                return None;
            }
        };

        self.resolve(&decision.model_choice)
            .map(|model| (model.to_string(), Some(decision.reasoning)))
    }
}

struct DefaultStrategy {
    default_model: String,
}

#[async_trait]
impl RoutingStrategy for DefaultStrategy {
    fn source(&self) -> RouteSource {
        RouteSource::Default
    }

    async fn try_route(&self, _turn: &RoutingTurn<'_>) -> Option<(String, Option<String>)> {
        Some((self.default_model.clone(), None))
    }
}

/// Composite-strategy model router: Fallback → Override → Classifier →
/// Default, each strategy returning a decision or passing to the next.
/// The `Default` strategy is terminal and always decides, so `route()`
/// never needs to handle an empty chain.
pub struct ModelRouter {
    strategies: Vec<Box<dyn RoutingStrategy>>,
}

impl ModelRouter {
    pub fn new(
        degraded: Arc<DegradedMode>,
        fallback_model: String,
        classifier_provider: Arc<dyn LLMProvider>,
        classifier: ClassifierConfig,
        default_model: String,
    ) -> Self {
        Self {
            strategies: vec![
                Box::new(FallbackStrategy {
                    degraded,
                    fallback_model,
                }),
                Box::new(OverrideStrategy),
                Box::new(ClassifierStrategy {
                    provider: classifier_provider,
                    config: classifier,
                }),
                Box::new(DefaultStrategy { default_model }),
            ],
        }
    }

    pub async fn route(&self, requested_model: &str, recent_turns: &[Message]) -> ModelRoute {
        let turn = RoutingTurn {
            requested_model,
            recent_turns,
        };

        for strategy in &self.strategies {
            let start = Instant::now();
            if let Some((model, reasoning)) = strategy.try_route(&turn).await {
                let route = ModelRoute {
                    model,
                    source: strategy.source(),
                    latency: start.elapsed(),
                    reasoning,
                };
                debug!(
                    "model router: chose {} via {} ({}ms)",
                    route.model,
                    route.source,
                    route.latency.as_millis()
                );
                return route;
            }
        }

        unreachable!("DefaultStrategy always decides")
    }
}
