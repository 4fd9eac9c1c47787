//! Clients for the completion and moderation services.
//!
//! The session talks to the services through the [`CompletionClient`] and
//! [`ModerationClient`] traits; [`OpenAi`] implements both against an OpenAI-compatible HTTP
//! API.

use std::pin::Pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::Stream;
use futures::stream::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::observability::{
    CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS, STREAM_CHUNKS,
};
use crate::render::Renderer;
use crate::sse::{StreamEvent, process_sse};
use crate::types::{ChatCompletion, CompletionRequest, ModerationRequest, ModerationResponse};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// Produces text for a prompt.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Returns the full completion for `request`.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;

    /// Prints the completion through `renderer` as it arrives and returns the full text.
    ///
    /// Clients without incremental output print the whole completion at once.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        renderer: &mut dyn Renderer,
    ) -> Result<String> {
        let text = self.complete(request).await?;
        renderer.print_text(&text);
        renderer.finish_response();
        Ok(text)
    }
}

/// Decides whether text should be withheld from the user.
#[async_trait]
pub trait ModerationClient: Send + Sync {
    async fn is_flagged(&self, text: &str) -> Result<bool>;
}

/// Client for an OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenAi {
    api_key: String,
    organization: Option<String>,
    client: ReqwestClient,
    base_url: Url,
    timeout: Duration,
}

impl OpenAi {
    /// Create a new client for the default endpoint.
    pub fn new(credentials: &Credentials) -> Result<Self> {
        Self::with_options(credentials, None, None)
    }

    /// Create a new client with custom settings.
    pub fn with_options(
        credentials: &Credentials,
        base_url: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            api_key: credentials.api_key.clone(),
            organization: credentials.organization.clone(),
            client,
            base_url: normalize_base_url(base_url.unwrap_or(DEFAULT_API_URL))?,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|_| {
            Error::authentication("API key contains characters not allowed in a header")
        })?;
        headers.insert(header::AUTHORIZATION, bearer);
        if let Some(organization) = &self.organization {
            let value = HeaderValue::from_str(organization).map_err(|_| {
                Error::validation(
                    "organization contains characters not allowed in a header",
                    Some("organization".to_string()),
                )
            })?;
            headers.insert("openai-organization", value);
        }
        Ok(headers)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|val| val.to_str().ok())
            .map(String::from);

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {e}"),
                    Some(Box::new(e)),
                );
            }
        };

        error_from_status(status_code, &error_body, request_id, retry_after)
    }

    fn map_send_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {e}"),
                Some(self.timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
        }
    }

    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        headers: HeaderMap,
    ) -> Result<Response> {
        let url = self.endpoint(path)?;
        CLIENT_REQUESTS.click();
        let start = Instant::now();
        let result = self
            .client
            .post(url.clone())
            .headers(headers)
            .json(body)
            .send()
            .await;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());

        let response = result.map_err(|e| {
            CLIENT_REQUEST_ERRORS.click();
            self.map_send_error(e)
        })?;
        debug!(url = %url, status = %response.status(), "response received");
        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            return Err(Self::process_error_response(response).await);
        }
        Ok(response)
    }

    /// Request a chat completion and wait for the whole body.
    pub async fn chat(&self, request: CompletionRequest) -> Result<ChatCompletion> {
        let request = request.with_stream(false);
        let response = self
            .post("chat/completions", &request, self.default_headers()?)
            .await?;
        response.json::<ChatCompletion>().await.map_err(|e| {
            Error::serialization(format!("Failed to parse response: {e}"), Some(Box::new(e)))
        })
    }

    /// Request a chat completion as a stream of server-sent events.
    pub async fn chat_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>> {
        let request = request.with_stream(true);
        let mut headers = self.default_headers()?;
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        let response = self.post("chat/completions", &request, headers).await?;
        Ok(Box::pin(process_sse(response.bytes_stream())))
    }

    /// Run `text` through the moderation endpoint.
    pub async fn moderate(&self, text: &str) -> Result<ModerationResponse> {
        let request = ModerationRequest {
            input: text.to_string(),
        };
        let response = self
            .post("moderations", &request, self.default_headers()?)
            .await?;
        response.json::<ModerationResponse>().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse moderation response: {e}"),
                Some(Box::new(e)),
            )
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAi {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let completion = self.chat(request).await?;
        if let Some(usage) = &completion.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion usage"
            );
        }
        Ok(completion.text().to_string())
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        renderer: &mut dyn Renderer,
    ) -> Result<String> {
        let mut stream = self.chat_stream(request).await?;
        let mut text = String::new();
        loop {
            let next = tokio::time::timeout(INTERRUPT_POLL, stream.next()).await;
            if renderer.should_interrupt() {
                warn!(received = text.len(), "stream interrupted by user");
                renderer.print_interrupted();
                return Err(Error::abort("interrupted by user"));
            }
            let event = match next {
                Err(_) => continue,
                Ok(None) => break,
                Ok(Some(event)) => event?,
            };
            match event {
                StreamEvent::Chunk(chunk) => {
                    if let Some(delta) = chunk.text() {
                        STREAM_CHUNKS.click();
                        renderer.print_text(delta);
                        text.push_str(delta);
                    }
                }
                StreamEvent::Done => break,
            }
        }
        renderer.finish_response();
        Ok(text)
    }
}

#[async_trait]
impl ModerationClient for OpenAi {
    async fn is_flagged(&self, text: &str) -> Result<bool> {
        Ok(self.moderate(text).await?.flagged())
    }
}

fn normalize_base_url(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Maps an error status and body to an [`Error`].
fn error_from_status(
    status_code: u16,
    body: &str,
    request_id: Option<String>,
    retry_after: Option<u64>,
) -> Error {
    #[derive(Deserialize)]
    struct ErrorResponse {
        error: Option<ErrorDetail>,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        #[serde(rename = "type")]
        error_type: Option<String>,
        message: Option<String>,
    }

    let detail = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|e| e.error);
    let error_type = detail.as_ref().and_then(|d| d.error_type.clone());
    let message = detail
        .and_then(|d| d.message)
        .unwrap_or_else(|| body.to_string());

    match status_code {
        401 => Error::authentication(message),
        408 => Error::timeout(message, None),
        429 => Error::rate_limit(message, retry_after),
        _ => Error::api(status_code, error_type, message, request_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Language;

    fn credentials() -> Credentials {
        Credentials {
            api_key: "sk-test".to_string(),
            organization: Some("org-test".to_string()),
            model: "gpt-4o".to_string(),
            language: Language::English,
        }
    }

    #[test]
    fn client_creation() {
        let client = OpenAi::new(&credentials()).unwrap();
        assert_eq!(client.base_url().as_str(), DEFAULT_API_URL);
        assert_eq!(
            client.endpoint("chat/completions").unwrap().as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let client =
            OpenAi::with_options(&credentials(), Some("http://localhost:8080/v1"), None).unwrap();
        assert_eq!(
            client.endpoint("moderations").unwrap().as_str(),
            "http://localhost:8080/v1/moderations"
        );
        assert!(OpenAi::with_options(&credentials(), Some("not a url"), None).is_err());
    }

    #[test]
    fn headers_carry_auth_and_organization() {
        let client = OpenAi::new(&credentials()).unwrap();
        let headers = client.default_headers().unwrap();
        assert_eq!(headers[header::AUTHORIZATION], "Bearer sk-test");
        assert_eq!(headers["openai-organization"], "org-test");
    }

    #[test]
    fn status_mapping() {
        let body = r#"{"error": {"message": "slow down", "type": "rate_limit_exceeded"}}"#;
        let err = error_from_status(429, body, None, Some(20));
        assert!(err.is_rate_limit());
        assert!(err.to_string().contains("slow down"));

        assert!(matches!(
            error_from_status(401, "{}", None, None),
            Error::Authentication { .. }
        ));
        assert!(matches!(
            error_from_status(408, "", None, None),
            Error::Timeout { .. }
        ));

        let err = error_from_status(503, "upstream down", Some("req-1".to_string()), None);
        assert_eq!(err.status_code(), Some(503));
        assert!(err.to_string().contains("upstream down"));
        assert!(err.is_external_service());
    }

    struct Fixed(&'static str);

    #[async_trait]
    impl CompletionClient for Fixed {
        async fn complete(&self, _request: CompletionRequest) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn default_streaming_prints_whole_text() {
        let mut renderer = crate::render::RecordingRenderer::new();
        let request = CompletionRequest::new("m1", Vec::new());
        let text = Fixed("ls -la\n")
            .complete_streaming(request, &mut renderer)
            .await
            .unwrap();
        assert_eq!(text, "ls -la\n");
        assert_eq!(renderer.text, "ls -la\n");
        assert_eq!(renderer.finished, 1);
    }
}
