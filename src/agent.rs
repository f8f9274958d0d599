//! HTTP client for the remote summarizer agent.
//!
//! The agent endpoint is environment-configured and its response shape is
//! loosely typed by design: non-streaming calls return whatever JSON-ish
//! value the agent produced, and streaming calls return a [`StreamBody`]
//! whose capability slots depend on the response content type.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::AgentConfig;
use crate::stream::{ChunkStream, StreamBody, StreamError};

/// User-Agent string identifying this client
const USER_AGENT: &str = concat!("condense/", env!("CARGO_PKG_VERSION"));

/// Default timeout for agent requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("agent returned status {0}")]
    Status(reqwest::StatusCode),
}

/// User-facing classification of a transport failure. Display only, never
/// used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Unreachable,
    TimedOut,
    Other,
}

impl FailureKind {
    pub fn message(self) -> &'static str {
        match self {
            FailureKind::Unreachable => "cannot reach the summarizer service",
            FailureKind::TimedOut => "the request timed out",
            FailureKind::Other => "analysis failed, please try again",
        }
    }
}

/// Classify a transport failure into a user-facing category.
pub fn classify_failure(error: &AgentError) -> FailureKind {
    match error {
        AgentError::Http(http) if http.is_timeout() => FailureKind::TimedOut,
        AgentError::Http(http) if http.is_connect() => FailureKind::Unreachable,
        AgentError::Http(http) => {
            let message = http.to_string().to_ascii_lowercase();
            if message.contains("dns") || message.contains("connection") {
                FailureKind::Unreachable
            } else if message.contains("timed out") {
                FailureKind::TimedOut
            } else {
                FailureKind::Other
            }
        }
        AgentError::Status(_) => FailureKind::Other,
    }
}

/// One conversational message in an agent request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request body sent to the agent endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct StreamingEnvelope<'a> {
    stream: bool,
    #[serde(flatten)]
    request: &'a AgentRequest,
}

/// Client for the summarizer agent endpoint.
///
/// Constructed once from configuration and passed explicitly to whoever
/// needs it; there is no ambient shared instance.
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
    agent_id: String,
}

impl AgentClient {
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            agent_id: config.agent_id.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/agents/{}/generate", self.base_url, self.agent_id)
    }

    /// Issue the request and return the complete response as a
    /// loosely-typed value: an object when the body is JSON, otherwise the
    /// body text. Downstream normalization is the defensive boundary.
    pub async fn complete(&self, request: &AgentRequest) -> Result<Value, AgentError> {
        debug!(messages = request.messages.len(), "issuing agent request");
        let response = self.http.post(self.endpoint()).json(request).send().await?;
        if !response.status().is_success() {
            return Err(AgentError::Status(response.status()));
        }

        let text = response.text().await?;
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Ok(value),
            Err(_) => Ok(Value::String(text)),
        }
    }

    /// Issue the request in streaming mode and expose whatever streaming
    /// capabilities the response carries.
    pub async fn stream(&self, request: &AgentRequest) -> Result<StreamBody, AgentError> {
        debug!(messages = request.messages.len(), "issuing streaming agent request");
        let response = self
            .http
            .post(self.endpoint())
            .json(&StreamingEnvelope {
                stream: true,
                request,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AgentError::Status(response.status()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let mut body = StreamBody::default();
        if content_type.contains("text/event-stream") {
            body.chunks = Some(sse_chunks(response.bytes_stream()));
        } else if content_type.contains("application/json") {
            body.content = Some(response.json::<Value>().await?);
        } else {
            body.bytes = Some(Box::pin(response.bytes_stream().map(|item| {
                item.map_err(|error| StreamError::Transport(error.to_string()))
            })));
        }
        Ok(body)
    }
}

/// Decode an SSE byte stream into the text parts carried by its `data:`
/// lines.
fn sse_chunks(
    bytes: impl futures_util::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> ChunkStream {
    Box::pin(
        bytes
            .map(|item| item.map_err(|error| StreamError::Transport(error.to_string())))
            .scan(String::new(), |buffer, item| {
                let parts: Vec<Result<String, StreamError>> = match item {
                    Ok(chunk) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));
                        let mut decoded = Vec::new();
                        while let Some(newline) = buffer.find('\n') {
                            let line = buffer[..newline].trim().to_string();
                            buffer.replace_range(..=newline, "");
                            if let Some(part) = decode_sse_line(&line) {
                                decoded.push(Ok(part));
                            }
                        }
                        decoded
                    }
                    Err(error) => vec![Err(error)],
                };
                futures_util::future::ready(Some(futures_util::stream::iter(parts)))
            })
            .flatten(),
    )
}

fn decode_sse_line(line: &str) -> Option<String> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let data = line.strip_prefix("data:").map(str::trim_start)?;
    if data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(event) => extract_text_part(&event),
        // Plain-text data lines pass through as-is.
        Err(_) => Some(data.to_string()),
    }
}

/// Pull the text delta out of the common streaming event shapes.
fn extract_text_part(event: &Value) -> Option<String> {
    for pointer in [
        "/delta/text",
        "/choices/0/delta/content",
        "/text",
        "/content",
    ] {
        if let Some(text) = event.pointer(pointer).and_then(Value::as_str) {
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_with_wire_field_names() {
        let request = AgentRequest {
            messages: vec![ChatMessage::user("hello")],
            temperature: Some(0.2),
            max_tokens: Some(1024),
        };
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["maxTokens"], 1024);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn optional_request_fields_are_omitted() {
        let request = AgentRequest {
            messages: vec![],
            temperature: None,
            max_tokens: None,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("temperature").is_none());
        assert!(body.get("maxTokens").is_none());
    }

    #[test]
    fn streaming_envelope_flattens_the_request() {
        let request = AgentRequest {
            messages: vec![ChatMessage::system("s")],
            temperature: None,
            max_tokens: None,
        };
        let body = serde_json::to_value(StreamingEnvelope {
            stream: true,
            request: &request,
        })
        .unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn sse_lines_decode_known_event_shapes() {
        let event = json!({"choices": [{"delta": {"content": "hi"}}]});
        let line = format!("data: {}", event);
        assert_eq!(decode_sse_line(&line), Some("hi".to_string()));

        assert_eq!(
            decode_sse_line("data: {\"delta\":{\"text\":\"t\"}}"),
            Some("t".to_string())
        );
        assert_eq!(decode_sse_line("data: [DONE]"), None);
        assert_eq!(decode_sse_line(": keepalive"), None);
        assert_eq!(decode_sse_line(""), None);
        assert_eq!(decode_sse_line("event: ping"), None);
        // Non-JSON data lines are passed through verbatim.
        assert_eq!(
            decode_sse_line("data: raw words"),
            Some("raw words".to_string())
        );
    }

    #[tokio::test]
    async fn sse_byte_stream_yields_text_parts_across_read_boundaries() {
        let reads: Vec<Result<bytes::Bytes, reqwest::Error>> = vec![
            Ok(bytes::Bytes::from_static(b"data: {\"text\":\"fo")),
            Ok(bytes::Bytes::from_static(b"o\"}\n\ndata: {\"text\":\"bar\"}\n")),
            Ok(bytes::Bytes::from_static(b"data: [DONE]\n")),
        ];
        let mut parts = sse_chunks(futures_util::stream::iter(reads));

        let mut collected = Vec::new();
        while let Some(part) = parts.next().await {
            collected.push(part.unwrap());
        }
        assert_eq!(collected, vec!["foo", "bar"]);
    }

    #[test]
    fn status_errors_classify_as_generic() {
        let error = AgentError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(classify_failure(&error), FailureKind::Other);
    }
}
