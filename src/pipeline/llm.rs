//! Model interaction: send the prompt, get text back.
//!
//! Prompt wording lives in [`crate::prompts`], body layout in
//! [`crate::pipeline::request`] and interpretation of the answer in
//! [`crate::pipeline::parse`].
//!
//! ## No retries
//!
//! Exactly one call is made per request. A failed call is reported as
//! [`ListingCopyError::ModelUnavailable`]; retry policy belongs to the caller
//! (see [`ListingCopyError::is_retryable`]).

use crate::config::GenerationConfig;
use crate::error::ListingCopyError;
use crate::pipeline::request::{PromptRequest, SamplingOptions};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Text produced by the model plus token accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReply {
    pub text: String,
    pub prompt_tokens: u32,
    pub output_tokens: u32,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            prompt_tokens: 0,
            output_tokens: 0,
        }
    }
}

/// A generative vision/text model.
///
/// Implementations make one attempt per call and map every transport or API
/// failure to [`ListingCopyError::ModelUnavailable`], and a successful call
/// without text to [`ListingCopyError::EmptyResponse`].
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &str;

    async fn generate(&self, request: &PromptRequest) -> Result<ModelReply, ListingCopyError>;
}

/// Invoke `model` once, bounded by `timeout`.
///
/// Expiry of the timeout is reported as `ModelUnavailable`.
pub async fn invoke_model(
    model: &dyn GenerativeModel,
    request: &PromptRequest,
    timeout: Duration,
) -> Result<ModelReply, ListingCopyError> {
    let start = Instant::now();
    match tokio::time::timeout(timeout, model.generate(request)).await {
        Ok(Ok(reply)) => {
            debug!(
                "{}: {} input tokens, {} output tokens, {:?}",
                model.name(),
                reply.prompt_tokens,
                reply.output_tokens,
                start.elapsed()
            );
            Ok(reply)
        }
        Ok(Err(e)) => {
            warn!("{}: call failed: {}", model.name(), e);
            Err(e)
        }
        Err(_) => {
            warn!("{}: call timed out after {:?}", model.name(), timeout);
            Err(ListingCopyError::ModelUnavailable {
                reason: format!("timed out after {}ms", timeout.as_millis()),
            })
        }
    }
}

/// Build `SamplingOptions` from the generation config.
pub fn build_options(config: &GenerationConfig) -> SamplingOptions {
    SamplingOptions {
        temperature: config.temperature,
        max_output_tokens: config.max_output_tokens,
    }
}

// ── Gemini REST client ───────────────────────────────────────────────────

/// How the client authenticates.
#[derive(Clone)]
pub enum Credential {
    /// Google AI Studio key, sent as `x-goog-api-key`.
    ApiKey(String),
    /// OAuth access token, sent as `Authorization: Bearer`.
    Bearer(String),
}

impl Credential {
    fn secret(&self) -> &str {
        match self {
            Credential::ApiKey(s) | Credential::Bearer(s) => s,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Credential::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// [`GenerativeModel`] over the `generateContent` REST endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_base: String,
    model: String,
    credential: Credential,
    options: SamplingOptions,
}

impl GeminiClient {
    /// Create a client. A blank credential is a configuration error.
    pub fn new(config: &GenerationConfig, credential: Credential) -> Result<Self, ListingCopyError> {
        if credential.secret().trim().is_empty() {
            return Err(ListingCopyError::ProviderNotConfigured {
                provider: "gemini".to_string(),
                hint: "The API credential is empty. Set GEMINI_API_KEY or pass --api-key.".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.api_timeout)
            .build()
            .map_err(|e| ListingCopyError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.trim().to_string(),
            credential,
            options: build_options(config),
        })
    }

    /// Full URL of the `generateContent` call for the configured model.
    pub fn endpoint(&self) -> String {
        let model_path = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &PromptRequest) -> Result<ModelReply, ListingCopyError> {
        let body = request.to_wire(&self.options);
        let builder = self.http.post(self.endpoint()).json(&body);
        let builder = match &self.credential {
            Credential::ApiKey(key) => builder.header("x-goog-api-key", key),
            Credential::Bearer(token) => builder.bearer_auth(token),
        };

        let response = builder.send().await.map_err(|e| ListingCopyError::ModelUnavailable {
            reason: if e.is_timeout() {
                "request timed out".to_string()
            } else {
                format!("request failed: {e}")
            },
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ListingCopyError::ModelUnavailable {
                reason: format!("HTTP {}: {}", status, truncate(&detail, 200)),
            });
        }

        let payload: GenerateContentResponse =
            response
                .json()
                .await
                .map_err(|e| ListingCopyError::ModelUnavailable {
                    reason: format!("invalid response body: {e}"),
                })?;

        let text = payload.text().ok_or(ListingCopyError::EmptyResponse)?;
        let usage = payload.usage_metadata.unwrap_or_default();

        Ok(ModelReply {
            text,
            prompt_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        })
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

// ── Response wire format ─────────────────────────────────────────────────

/// Body returned by `generateContent`. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsePart {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate, `None` when blank.
    pub fn text(&self) -> Option<String> {
        let text: String = self
            .candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::intake::ImageAsset;
    use crate::pipeline::request::build_prompt;
    use mockito::Matcher;

    fn prompt() -> PromptRequest {
        build_prompt(vec![ImageAsset::new("a.jpg", "image/jpeg", vec![1u8, 2, 3])]).unwrap()
    }

    fn config(base: &str) -> GenerationConfig {
        GenerationConfig::builder()
            .api_base(base)
            .model("gemini-test")
            .api_timeout_secs(5)
            .build()
            .unwrap()
    }

    const PATH: &str = "/models/gemini-test:generateContent";

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&GenerationConfig::default());
        assert_eq!(opts.temperature, 0.4);
        assert_eq!(opts.max_output_tokens, 2048);
    }

    #[test]
    fn endpoint_accepts_prefixed_model() {
        let mut c = config("https://example.test/v1beta");
        c.model = "models/gemini-pro-vision".into();
        let client = GeminiClient::new(&c, Credential::ApiKey("k".into())).unwrap();
        assert_eq!(
            client.endpoint(),
            "https://example.test/v1beta/models/gemini-pro-vision:generateContent"
        );
    }

    #[test]
    fn blank_credential_is_config_error() {
        let err = GeminiClient::new(&config("https://example.test"), Credential::ApiKey("  ".into()))
            .unwrap_err();
        assert!(matches!(err, ListingCopyError::ProviderNotConfigured { .. }));
    }

    #[test]
    fn credential_debug_is_redacted() {
        let dbg = format!("{:?}", Credential::Bearer("ya29.secret".into()));
        assert!(!dbg.contains("ya29"));
    }

    #[test]
    fn response_text_concatenates_parts() {
        let payload: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"title\":"},{"text":"\"Lamp\"}"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(payload.text().as_deref(), Some(r#"{"title":"Lamp"}"#));
    }

    #[test]
    fn response_without_candidates_has_no_text() {
        let payload: GenerateContentResponse = serde_json::from_str(r#"{"promptFeedback":{}}"#).unwrap();
        assert!(payload.text().is_none());
    }

    #[tokio::test]
    async fn successful_call_returns_text_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", PATH)
            .match_header("x-goog-api-key", "test-key")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Regex(r#""inline_data":\{"#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"candidates":[{"content":{"parts":[{"text":"hello"}]}}],
                    "usageMetadata":{"promptTokenCount":1200,"candidatesTokenCount":85}}"#,
            )
            .create_async()
            .await;

        let client = GeminiClient::new(&config(&server.url()), Credential::ApiKey("test-key".into())).unwrap();
        let reply = client.generate(&prompt()).await.unwrap();

        assert_eq!(reply.text, "hello");
        assert_eq!(reply.prompt_tokens, 1200);
        assert_eq!(reply.output_tokens, 85);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn bearer_credential_uses_authorization_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", PATH)
            .match_header("authorization", "Bearer ya29.token")
            .with_status(200)
            .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"ok"}]}}]}"#)
            .create_async()
            .await;

        let client = GeminiClient::new(&config(&server.url()), Credential::Bearer("ya29.token".into())).unwrap();
        let reply = client.generate(&prompt()).await.unwrap();
        assert_eq!(reply, ModelReply::text("ok"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_is_model_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .with_status(500)
            .with_body("internal")
            .create_async()
            .await;

        let client = GeminiClient::new(&config(&server.url()), Credential::ApiKey("k".into())).unwrap();
        let err = client.generate(&prompt()).await.unwrap_err();
        match err {
            ListingCopyError::ModelUnavailable { reason } => assert!(reason.contains("500"), "got: {reason}"),
            other => panic!("expected ModelUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_key_is_model_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .with_status(403)
            .with_body(r#"{"error":{"message":"API key not valid"}}"#)
            .create_async()
            .await;

        let client = GeminiClient::new(&config(&server.url()), Credential::ApiKey("bad".into())).unwrap();
        let err = client.generate(&prompt()).await.unwrap_err();
        assert!(matches!(err, ListingCopyError::ModelUnavailable { .. }));
    }

    #[tokio::test]
    async fn empty_candidates_is_empty_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .with_status(200)
            .with_body(r#"{"candidates":[]}"#)
            .create_async()
            .await;

        let client = GeminiClient::new(&config(&server.url()), Credential::ApiKey("k".into())).unwrap();
        let err = client.generate(&prompt()).await.unwrap_err();
        assert!(matches!(err, ListingCopyError::EmptyResponse));
    }

    #[tokio::test]
    async fn malformed_body_is_model_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .with_status(200)
            .with_body("<html>proxy error</html>")
            .create_async()
            .await;

        let client = GeminiClient::new(&config(&server.url()), Credential::ApiKey("k".into())).unwrap();
        let err = client.generate(&prompt()).await.unwrap_err();
        assert!(matches!(err, ListingCopyError::ModelUnavailable { .. }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_model_unavailable() {
        // Port 9 (discard) on localhost is closed on test machines.
        let client = GeminiClient::new(&config("http://127.0.0.1:9"), Credential::ApiKey("k".into())).unwrap();
        let err = client.generate(&prompt()).await.unwrap_err();
        assert!(matches!(err, ListingCopyError::ModelUnavailable { .. }));
    }

    struct StalledModel;

    #[async_trait]
    impl GenerativeModel for StalledModel {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn generate(&self, _request: &PromptRequest) -> Result<ModelReply, ListingCopyError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ModelReply::text("too late"))
        }
    }

    #[tokio::test]
    async fn invoke_model_times_out() {
        let err = invoke_model(&StalledModel, &prompt(), Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            ListingCopyError::ModelUnavailable { reason } => assert!(reason.contains("timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("héllo", 2), "hé…");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
