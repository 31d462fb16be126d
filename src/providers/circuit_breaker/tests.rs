use super::*;
use crate::providers::base::LLMResponse;
use std::sync::atomic::{AtomicU32, Ordering};

struct MockProvider {
    responses: Mutex<Vec<Result<LLMResponse, String>>>,
    call_count: AtomicU32,
}

impl MockProvider {
    fn always_ok() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(vec![]),
            call_count: AtomicU32::new(0),
        })
    }

    fn with_responses(responses: Vec<Result<LLMResponse, String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            call_count: AtomicU32::new(0),
        })
    }

    fn ok_response() -> LLMResponse {
        LLMResponse {
            content: Some("ok".into()),
            tool_calls: vec![],
            reasoning_content: None,
            input_tokens: None,
            output_tokens: None,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        }
    }
}

#[async_trait]
impl LLMProvider for MockProvider {
    async fn chat(&self, _req: ChatRequest<'_>) -> anyhow::Result<LLMResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().await;
        if let Some(response) = responses.pop() {
            match response {
                Ok(r) => Ok(r),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        } else {
            Ok(Self::ok_response())
        }
    }

    fn default_model(&self) -> &'static str {
        "mock"
    }
}

fn test_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        enabled: true,
        failure_threshold: 3,
        recovery_timeout_secs: 1,
        half_open_probes: 2,
    }
}

fn make_request() -> ChatRequest<'static> {
    ChatRequest {
        messages: vec![],
        tools: None,
        model: None,
        max_tokens: 1024,
        temperature: 0.7,
        tool_choice: None,
        response_format: None,
    }
}

#[tokio::test]
async fn test_closed_passes_through() {
    let inner = MockProvider::always_ok();
    let config = test_config();
    let provider = CircuitBreakerProvider::wrap(inner.clone(), &config);

    let result = provider.chat(make_request()).await;
    assert!(result.is_ok());
    assert_eq!(inner.call_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_opens_after_threshold_failures() {
    let inner = MockProvider::with_responses(vec![
        Err("500 internal error".to_string()),
        Err("500 internal error".to_string()),
        Err("500 internal error".to_string()),
    ]);
    let config = test_config();
    let provider = CircuitBreakerProvider::wrap(inner, &config);

    for _ in 0..3 {
        let _ = provider.chat(make_request()).await;
    }

    let result = provider.chat(make_request()).await;
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("Circuit breaker is open"));
}

#[tokio::test]
async fn test_open_rejects_immediately() {
    let inner = MockProvider::with_responses(vec![
        Err("503 unavailable".to_string()),
        Err("503 unavailable".to_string()),
        Err("503 unavailable".to_string()),
    ]);
    let config = test_config();
    let provider = CircuitBreakerProvider::wrap(inner.clone(), &config);

    for _ in 0..3 {
        let _ = provider.chat(make_request()).await;
    }
    let before = inner.call_count.load(Ordering::SeqCst);
    let _ = provider.chat(make_request()).await;
    assert_eq!(inner.call_count.load(Ordering::SeqCst), before);
}

#[tokio::test]
async fn test_half_open_after_timeout() {
    let inner = MockProvider::with_responses(vec![
        Ok(MockProvider::ok_response()),
        Err("500".to_string()),
        Err("500".to_string()),
        Err("500".to_string()),
    ]);
    let config = test_config();
    let provider = CircuitBreakerProvider::wrap(inner.clone(), &config);

    for _ in 0..3 {
        let _ = provider.chat(make_request()).await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let result = provider.chat(make_request()).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_half_open_success_closes() {
    let inner = MockProvider::with_responses(vec![
        Ok(MockProvider::ok_response()),
        Ok(MockProvider::ok_response()),
        Err("500".to_string()),
        Err("500".to_string()),
        Err("500".to_string()),
    ]);
    let config = test_config();
    let provider = CircuitBreakerProvider::wrap(inner.clone(), &config);

    for _ in 0..3 {
        let _ = provider.chat(make_request()).await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    // half_open_probes = 2: two consecutive successful probes close the circuit.
    assert!(provider.chat(make_request()).await.is_ok());
    assert!(provider.chat(make_request()).await.is_ok());
    assert!(provider.chat(make_request()).await.is_ok());
}

#[tokio::test]
async fn test_half_open_failure_reopens() {
    let inner = MockProvider::with_responses(vec![
        Err("500".to_string()),
        Err("500".to_string()),
        Err("500".to_string()),
        Err("500".to_string()),
    ]);
    let config = test_config();
    let provider = CircuitBreakerProvider::wrap(inner.clone(), &config);

    for _ in 0..3 {
        let _ = provider.chat(make_request()).await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let result = provider.chat(make_request()).await;
    assert!(result.is_err());

    let before = inner.call_count.load(Ordering::SeqCst);
    let _ = provider.chat(make_request()).await;
    assert_eq!(inner.call_count.load(Ordering::SeqCst), before);
}

#[tokio::test]
async fn test_non_transient_errors_dont_trip() {
    let inner = MockProvider::with_responses(vec![
        Err("401 unauthorized".to_string()),
        Err("401 unauthorized".to_string()),
        Err("401 unauthorized".to_string()),
    ]);
    let config = test_config();
    let provider = CircuitBreakerProvider::wrap(inner.clone(), &config);

    for _ in 0..3 {
        let _ = provider.chat(make_request()).await;
    }
    // Still closed: non-transient failures never count toward the threshold.
    let result = provider.chat(make_request()).await;
    assert!(result.is_err());
    assert!(!result.unwrap_err().to_string().contains("Circuit breaker is open"));
}

#[test]
fn test_is_transient_classification() {
    assert!(CircuitBreakerProvider::is_transient("rate limit exceeded"));
    assert!(CircuitBreakerProvider::is_transient("HTTP 429 too many requests"));
    assert!(CircuitBreakerProvider::is_transient("500 internal server error"));
    assert!(CircuitBreakerProvider::is_transient("connection reset by peer"));
    assert!(CircuitBreakerProvider::is_transient("request timeout"));
    assert!(!CircuitBreakerProvider::is_transient("401 unauthorized"));
    assert!(!CircuitBreakerProvider::is_transient("invalid api key"));
    assert!(!CircuitBreakerProvider::is_transient("context length exceeded"));
    // "50000" must not false-positive match "500" at a non-boundary.
    assert!(!CircuitBreakerProvider::is_transient("processed 50000 tokens"));
}

#[tokio::test]
async fn test_success_resets_counter() {
    let inner = MockProvider::with_responses(vec![
        Err("500".to_string()),
        Err("500".to_string()),
        Ok(MockProvider::ok_response()),
    ]);
    let config = test_config();
    let provider = CircuitBreakerProvider::wrap(inner, &config);

    assert!(provider.chat(make_request()).await.is_ok());
    let _ = provider.chat(make_request()).await;
    let _ = provider.chat(make_request()).await;
    // Two failures reset by the prior success never reach the threshold of 3.
    assert!(provider.chat(make_request()).await.is_ok());
}
