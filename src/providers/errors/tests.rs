use super::*;
use crate::errors::OxicrabError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn metrics() -> Arc<Mutex<ProviderMetrics>> {
    Arc::new(Mutex::new(ProviderMetrics::default()))
}

async fn get(server: &MockServer) -> Response {
    reqwest::Client::new()
        .get(server.uri())
        .send()
        .await
        .expect("request to mock server should succeed")
}

#[tokio::test]
async fn success_passes_body_through_and_leaves_metrics_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&server)
        .await;

    let metrics = metrics();
    let json = ProviderErrorHandler::check_response(get(&server).await, "Test", &metrics)
        .await
        .unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(metrics.lock().unwrap().error_count, 0);
}

#[tokio::test]
async fn rate_limit_reads_retry_after_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "30")
                .set_body_json(serde_json::json!({"error": {"type": "rate_limit_error", "message": "slow down"}})),
        )
        .mount(&server)
        .await;

    let metrics = metrics();
    let err = ProviderErrorHandler::check_response(get(&server).await, "Test", &metrics)
        .await
        .unwrap_err();
    let oxicrab_err = err.downcast_ref::<OxicrabError>().expect("should be an OxicrabError");
    assert!(matches!(oxicrab_err, OxicrabError::RateLimit { retry_after: Some(30) }));
    assert_eq!(metrics.lock().unwrap().error_count, 1);
}

#[tokio::test]
async fn rate_limit_without_header_has_no_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({"error": {"message": "slow down"}})))
        .mount(&server)
        .await;

    let err = ProviderErrorHandler::check_response(get(&server).await, "Test", &metrics())
        .await
        .unwrap_err();
    let oxicrab_err = err.downcast_ref::<OxicrabError>().unwrap();
    assert!(matches!(oxicrab_err, OxicrabError::RateLimit { retry_after: None }));
}

#[tokio::test]
async fn unauthorized_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({"error": {"message": "invalid token"}})))
        .mount(&server)
        .await;

    let err = ProviderErrorHandler::check_response(get(&server).await, "Test", &metrics())
        .await
        .unwrap_err();
    let oxicrab_err = err.downcast_ref::<OxicrabError>().unwrap();
    assert!(matches!(oxicrab_err, OxicrabError::Auth(msg) if msg.contains("invalid token")));
    assert!(err.to_string().contains("Authentication failed"));
}

#[tokio::test]
async fn server_error_is_retryable_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({"error": {"type": "api_error", "message": "internal failure"}})))
        .mount(&server)
        .await;

    let err = ProviderErrorHandler::check_response(get(&server).await, "Test", &metrics())
        .await
        .unwrap_err();
    let oxicrab_err = err.downcast_ref::<OxicrabError>().unwrap();
    match oxicrab_err {
        OxicrabError::Provider { message, retryable } => {
            assert!(*retryable);
            assert!(message.contains("internal failure"));
        }
        other => panic!("expected Provider error, got {other:?}"),
    }
}

#[tokio::test]
async fn bad_request_is_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({"error": {"type": "invalid_request_error", "message": "bad request"}})))
        .mount(&server)
        .await;

    let err = ProviderErrorHandler::check_response(get(&server).await, "Test", &metrics())
        .await
        .unwrap_err();
    let oxicrab_err = err.downcast_ref::<OxicrabError>().unwrap();
    match oxicrab_err {
        OxicrabError::Provider { retryable, .. } => assert!(!retryable),
        other => panic!("expected Provider error, got {other:?}"),
    }
}

#[tokio::test]
async fn non_json_body_is_preserved_in_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("plain text failure"))
        .mount(&server)
        .await;

    let err = ProviderErrorHandler::check_response(get(&server).await, "Test", &metrics())
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("500"));
    assert!(message.contains("plain text failure"));
}

#[tokio::test]
async fn model_not_found_rewrites_message_with_recommended_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": {"type": "not_found_error", "message": "model: claude-9000 not found"}
        })))
        .mount(&server)
        .await;

    let err = ProviderErrorHandler::check_response(get(&server).await, "Test", &metrics())
        .await
        .unwrap_err();
    let oxicrab_err = err.downcast_ref::<OxicrabError>().unwrap();
    match oxicrab_err {
        OxicrabError::Provider { message, retryable } => {
            assert!(!retryable);
            assert!(message.contains("not found"));
            assert!(message.contains("claude-sonnet-4-6"));
        }
        other => panic!("expected Provider error, got {other:?}"),
    }
}

#[tokio::test]
async fn check_http_status_returns_response_for_retry_flows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&server)
        .await;

    let resp = ProviderErrorHandler::check_http_status(get(&server).await, "Test")
        .await
        .unwrap();
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["ok"], true);
}
