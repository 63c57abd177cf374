//! Gemini `generateContent` provider
//!
//! One `reqwest::Client` is shared by every identity; the identity only
//! selects which API key and which model a call uses. The key travels in the
//! `x-goog-api-key` header so it never appears in URLs or logs.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::ApiKey;
use serde::Deserialize;
use tracing::debug;

use crate::{Provider, ProviderError, ResourceIdentity, Result, ServiceTier};

/// Default public endpoint for the Generative Language API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Model bound to a tier.
#[derive(Debug, Clone)]
pub struct TierModel {
    pub tier: ServiceTier,
    pub model: String,
}

/// Provider backed by the Gemini REST API.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    keys: Vec<ApiKey>,
    models: BTreeMap<ServiceTier, String>,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        keys: Vec<ApiKey>,
        models: Vec<TierModel>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            keys,
            models: models.into_iter().map(|m| (m.tier, m.model)).collect(),
            timeout,
        }
    }

    /// Number of credentials this provider can call with.
    pub fn credential_count(&self) -> usize {
        self.keys.len()
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:generateContent",
            self.base_url.trim_end_matches('/')
        )
    }

    async fn call(&self, identity: ResourceIdentity, prompt: &str) -> Result<String> {
        let key = self.keys.get(identity.credential_index).ok_or_else(|| {
            ProviderError::Internal(format!("no API key configured for {identity}"))
        })?;
        let model = self.models.get(&identity.tier).ok_or_else(|| {
            ProviderError::Internal(format!("no model configured for tier {}", identity.tier))
        })?;

        let body = serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }]
            }]
        });

        debug!(%identity, model = %model, key = %key.preview(), "sending generateContent request");

        let response = self
            .client
            .post(self.endpoint(model))
            .header(API_KEY_HEADER, key.expose().as_str())
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: GenerateContentResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(format!("reading response body: {e}"))
            } else {
                ProviderError::InvalidResponse(format!("undecodable response envelope: {e}"))
            }
        })?;

        envelope.into_text()
    }
}

impl Provider for GeminiProvider {
    fn id(&self) -> &str {
        "gemini"
    }

    fn generate<'a>(
        &'a self,
        identity: ResourceIdentity,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.call(identity, prompt))
    }
}

fn map_send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() {
        ProviderError::Connection(e.to_string())
    } else {
        ProviderError::Internal(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenate the text parts of the first candidate.
    fn into_text(self) -> Result<String> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ProviderError::InvalidResponse(format!(
                "prompt blocked (blockReason: {reason})"
            )));
        }

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("response has no candidates".into()))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            let reason = candidate.finish_reason.as_deref().unwrap_or("unknown");
            return Err(ProviderError::InvalidResponse(format!(
                "no candidate text (finishReason: {reason})"
            )));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FailureClass, classify};
    use axum::http::{HeaderMap, StatusCode};
    use common::Secret;
    use tokio::net::TcpListener;

    fn models() -> Vec<TierModel> {
        vec![
            TierModel {
                tier: ServiceTier::Pro,
                model: "gemini-2.5-pro".into(),
            },
            TierModel {
                tier: ServiceTier::Flash,
                model: "gemini-2.5-flash".into(),
            },
        ]
    }

    fn provider(base_url: &str, timeout: Duration) -> GeminiProvider {
        GeminiProvider::new(
            reqwest::Client::new(),
            base_url,
            vec![
                Secret::new("key-zero-aaaaaaaa".to_string()),
                Secret::new("key-one-bbbbbbbbb".to_string()),
            ],
            models(),
            timeout,
        )
    }

    /// Mock upstream that echoes the model path segment and API key back as
    /// candidate text.
    async fn start_echo_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let app = axum::Router::new().fallback(
                |headers: HeaderMap, uri: axum::http::Uri, body: String| async move {
                    let key = headers
                        .get(API_KEY_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    let request: serde_json::Value = serde_json::from_str(&body).unwrap();
                    let prompt = request["contents"][0]["parts"][0]["text"].clone();
                    let text = serde_json::json!({
                        "path": uri.path(),
                        "key": key,
                        "prompt": prompt,
                    })
                    .to_string();
                    axum::Json(serde_json::json!({
                        "candidates": [{
                            "content": { "parts": [{ "text": text }], "role": "model" },
                            "finishReason": "STOP"
                        }]
                    }))
                },
            );
            axum::serve(listener, app).await.unwrap();
        });

        (url, handle)
    }

    /// Mock upstream that always answers with the given status and body.
    async fn start_status_server(
        status: StatusCode,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let app = axum::Router::new().fallback(move || async move { (status, body) });
            axum::serve(listener, app).await.unwrap();
        });

        (url, handle)
    }

    #[tokio::test]
    async fn identity_selects_key_and_model() {
        let (url, _server) = start_echo_server().await;
        let provider = provider(&url, Duration::from_secs(5));

        let text = provider
            .generate(ResourceIdentity::new(1, ServiceTier::Flash), "categorize this")
            .await
            .unwrap();
        let echoed: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(
            echoed["path"],
            "/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(echoed["key"], "key-one-bbbbbbbbb");
        assert_eq!(echoed["prompt"], "categorize this");
    }

    #[tokio::test]
    async fn too_many_requests_classifies_as_quota() {
        let (url, _server) = start_status_server(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#,
        )
        .await;
        let provider = provider(&url, Duration::from_secs(5));

        let err = provider
            .generate(ResourceIdentity::new(0, ServiceTier::Pro), "x")
            .await
            .unwrap_err();

        match &err {
            ProviderError::Upstream { status, body } => {
                assert_eq!(*status, 429);
                assert!(body.contains("RESOURCE_EXHAUSTED"));
            }
            other => panic!("expected Upstream error, got {other:?}"),
        }
        assert_eq!(classify(&err), FailureClass::QuotaExceeded);
    }

    #[tokio::test]
    async fn unavailable_classifies_as_transient() {
        let (url, _server) =
            start_status_server(StatusCode::SERVICE_UNAVAILABLE, "The model is overloaded").await;
        let provider = provider(&url, Duration::from_secs(5));

        let err = provider
            .generate(ResourceIdentity::new(0, ServiceTier::Pro), "x")
            .await
            .unwrap_err();
        assert_eq!(classify(&err), FailureClass::Transient);
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let _server = tokio::spawn(async move {
            let app = axum::Router::new().fallback(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            });
            axum::serve(listener, app).await.unwrap();
        });

        let provider = provider(&url, Duration::from_millis(100));
        let err = provider
            .generate(ResourceIdentity::new(0, ServiceTier::Pro), "x")
            .await
            .unwrap_err();

        assert!(
            matches!(err, ProviderError::Timeout(_)),
            "expected Timeout, got {err:?}"
        );
    }

    #[tokio::test]
    async fn dead_upstream_is_connection_error() {
        let provider = provider("http://127.0.0.1:1", Duration::from_secs(2));
        let err = provider
            .generate(ResourceIdentity::new(0, ServiceTier::Pro), "x")
            .await
            .unwrap_err();
        assert_eq!(classify(&err), FailureClass::Transient);
    }

    #[tokio::test]
    async fn unknown_credential_index_is_internal_error() {
        let provider = provider("http://127.0.0.1:1", Duration::from_secs(2));
        let err = provider
            .generate(ResourceIdentity::new(7, ServiceTier::Pro), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Internal(_)));
        assert!(err.to_string().contains("key#8/pro"));
    }

    #[test]
    fn envelope_concatenates_parts() {
        let envelope: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"a\":"},{"text":"1}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(envelope.into_text().unwrap(), "{\"a\":1}");
    }

    #[test]
    fn envelope_without_text_reports_finish_reason() {
        let envelope: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        let err = envelope.into_text().unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn blocked_prompt_is_invalid_response() {
        let envelope: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"OTHER"}}"#).unwrap();
        let err = envelope.into_text().unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let provider = provider("https://example.test/", Duration::from_secs(1));
        assert_eq!(
            provider.endpoint("gemini-2.5-pro"),
            "https://example.test/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }
}
