use crate::errors::OxicrabError;
use crate::providers::base::ProviderMetrics;
use anyhow::Context;
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Common HTTP error handling for LLM provider clients.
///
/// Every provider sends its own request but funnels the response through
/// here so that rate limits, auth failures, and model errors get the same
/// [`OxicrabError`] classification (and the same metrics bump) regardless
/// of which backend produced them.
pub struct ProviderErrorHandler;

impl ProviderErrorHandler {
    /// Check the response status, parse the JSON body on success.
    ///
    /// On failure, bumps `metrics.error_count` and returns a classified
    /// [`OxicrabError`].
    pub async fn check_response(
        resp: Response,
        provider_name: &str,
        metrics: &Arc<Mutex<ProviderMetrics>>,
    ) -> anyhow::Result<Value> {
        let resp = Self::check_status(resp, provider_name, Some(metrics)).await?;
        resp.json::<Value>()
            .await
            .with_context(|| format!("failed to parse {} response body", provider_name))
    }

    /// Check the response status without consuming the body.
    ///
    /// Used where the caller needs the raw [`Response`] afterwards, e.g. to
    /// retry a request with a refreshed token before reading the body.
    pub async fn check_http_status(resp: Response, provider_name: &str) -> anyhow::Result<Response> {
        Self::check_status(resp, provider_name, None).await
    }

    async fn check_status(
        resp: Response,
        provider_name: &str,
        metrics: Option<&Arc<Mutex<ProviderMetrics>>>,
    ) -> anyhow::Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        if let Some(metrics) = metrics {
            if let Ok(mut metrics) = metrics.lock() {
                metrics.error_count += 1;
            }
        }

        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = resp.text().await.unwrap_or_default();

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("{} rate limited (retry_after={:?})", provider_name, retry_after);
                Err(OxicrabError::RateLimit { retry_after }.into())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!("{} authentication error: {}", provider_name, body);
                Err(OxicrabError::Auth(format!("{}: {}", provider_name, body)).into())
            }
            _ => Err(Self::classify(status.as_u16(), &body, provider_name).into()),
        }
    }

    /// Classify a non-2xx, non-429/401/403 response body into a [`OxicrabError::Provider`].
    fn classify(status: u16, body: &str, provider_name: &str) -> OxicrabError {
        let retryable = matches!(status, 500..=599);

        if let Ok(parsed) = serde_json::from_str::<Value>(body) {
            if let Some(error) = parsed.get("error") {
                let error_type = error.get("type").and_then(Value::as_str).unwrap_or("unknown");
                let error_msg = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error");

                if error_type == "not_found_error" && error_msg.contains("model:") {
                    let model_name = error_msg.replace("model:", "").trim().to_string();
                    return OxicrabError::Provider {
                        message: format!(
                            "Model '{}' not found. This model may be deprecated or incorrect.\n\
                            Please update your config file (~/.oxicrab/config.json) to use a valid model:\n\
                            - claude-sonnet-4-6 (recommended)\n\
                            - claude-haiku-4-5-20251001 (fastest)\n\
                            - claude-opus-4-5-20251101 (most capable)\n\
                            \n\
                            Or remove the 'model' field from your config to use the default.",
                            model_name
                        ),
                        retryable: false,
                    };
                }

                return OxicrabError::Provider {
                    message: format!("{} API error ({}): {}", provider_name, error_type, error_msg),
                    retryable,
                };
            }
        }

        OxicrabError::Provider {
            message: format!("{} API error ({}): {}", provider_name, status, body),
            retryable,
        }
    }
}

#[cfg(test)]
mod tests;
