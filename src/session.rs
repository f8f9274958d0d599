//! Request orchestration: one summarizer session per sequence of analysis
//! requests.
//!
//! Both the streaming and non-streaming paths converge on the same
//! normalized record, which becomes the current result and is persisted to
//! history. A new request supersedes the previous one; whatever response
//! body the abandoned request still held is dropped with it, which closes
//! the underlying connection.

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::agent::{AgentClient, AgentRequest, ChatMessage};
use crate::history::History;
use crate::normalizer;
use crate::record::SummaryRecord;
use crate::scraper;
use crate::stream::{Accumulator, StreamError};

const SYSTEM_PROMPT: &str = "You are a summarization agent. Respond with a JSON object \
containing title, summary, keyPoints, keywords, and highlights for the provided content.";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Agent(#[from] crate::agent::AgentError),
    #[error(transparent)]
    Format(#[from] crate::normalizer::FormatError),
    #[error(transparent)]
    Scrape(#[from] crate::scraper::ScraperError),
    #[error(transparent)]
    History(#[from] crate::history::HistoryError),
    #[error("failed to read input file: {0}")]
    Io(#[from] std::io::Error),
}

/// What the user asked to have analyzed.
#[derive(Debug, Clone)]
pub enum AnalysisInput {
    Url(String),
    File(PathBuf),
    Text(String),
}

impl AnalysisInput {
    /// Treat anything that looks like an http(s) URL as one, everything
    /// else as inline text.
    pub fn detect(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            AnalysisInput::Url(trimmed.to_string())
        } else {
            AnalysisInput::Text(raw.to_string())
        }
    }
}

/// Sampling options forwarded with every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Orchestrates analysis requests against the summarizer agent.
pub struct SummarizerSession {
    client: AgentClient,
    history: History,
    options: RequestOptions,
    current: Option<SummaryRecord>,
    partial: Option<watch::Receiver<String>>,
}

impl SummarizerSession {
    pub fn new(client: AgentClient, history: History, options: RequestOptions) -> Self {
        Self {
            client,
            history,
            options,
            current: None,
            partial: None,
        }
    }

    /// The record produced by the most recent completed request.
    pub fn current_result(&self) -> Option<&SummaryRecord> {
        self.current.as_ref()
    }

    /// Throttled partial text of the in-flight (or last) streaming request.
    pub fn partial_text(&self) -> Option<watch::Receiver<String>> {
        self.partial.clone()
    }

    /// Analyze the input, waiting for the complete response.
    pub async fn analyze(&mut self, input: &AnalysisInput) -> Result<SummaryRecord, SessionError> {
        let (source_url, content) = self.resolve_input(input).await?;
        let request = build_request(&content, self.options);
        let raw = self.client.complete(&request).await?;
        self.finish(&raw, &source_url)
    }

    /// Analyze the input, receiving incremental text through `on_chunk`
    /// while the response streams in.
    ///
    /// When the streaming attempt produces no text at all, the same
    /// request is re-issued once through the non-streaming path.
    pub async fn analyze_streaming(
        &mut self,
        input: &AnalysisInput,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<SummaryRecord, SessionError> {
        let (source_url, content) = self.resolve_input(input).await?;
        let request = build_request(&content, self.options);

        let (mut accumulator, partial) = Accumulator::new();
        self.partial = Some(partial);

        let outcome = match self.client.stream(&request).await {
            Ok(body) => accumulator.drain(body, on_chunk).await,
            Err(error) => {
                warn!(%error, "streaming request failed before any chunk");
                Err(StreamError::NoProtocol)
            }
        };

        match outcome {
            Ok(text) => self.finish(&Value::String(text), &source_url),
            // Mid-flight failures already surfaced as partial text above;
            // reaching here means the stream produced nothing at all.
            Err(error) => {
                warn!(%error, "streaming produced no text, re-issuing non-streaming");
                let raw = self.client.complete(&request).await?;
                self.finish(&raw, &source_url)
            }
        }
    }

    fn finish(&mut self, raw: &Value, source_url: &str) -> Result<SummaryRecord, SessionError> {
        let record = normalizer::normalize(raw, source_url)?;
        self.history.save(&record)?;
        info!(url = %record.source_url, "analysis complete");
        self.current = Some(record.clone());
        Ok(record)
    }

    /// Turn the input into (source URL, content to summarize).
    async fn resolve_input(
        &self,
        input: &AnalysisInput,
    ) -> Result<(String, String), SessionError> {
        match input {
            AnalysisInput::Url(url) => {
                let page = scraper::fetch_content(url).await?;
                let content = match &page.title {
                    Some(title) => format!("{}\n\n{}", title, page.text),
                    None => page.text,
                };
                Ok((url.clone(), content))
            }
            AnalysisInput::File(path) => {
                let content = std::fs::read_to_string(path)?;
                Ok((format!("file://{}", path.display()), content))
            }
            AnalysisInput::Text(text) => Ok((pseudo_url(text), text.clone())),
        }
    }
}

/// Build the agent request for a piece of content.
fn build_request(content: &str, options: RequestOptions) -> AgentRequest {
    AgentRequest {
        messages: vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(content),
        ],
        temperature: options.temperature,
        max_tokens: options.max_tokens,
    }
}

/// Stable pseudo-URL for inline text, so history dedup works per content.
fn pseudo_url(text: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    format!("text:{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn urls_and_text_are_told_apart() {
        assert!(matches!(
            AnalysisInput::detect("https://example.test/post"),
            AnalysisInput::Url(_)
        ));
        assert!(matches!(
            AnalysisInput::detect("  http://example.test  "),
            AnalysisInput::Url(_)
        ));
        assert!(matches!(
            AnalysisInput::detect("just some prose about http servers"),
            AnalysisInput::Text(_)
        ));
    }

    #[test]
    fn request_carries_system_and_user_messages() {
        let request = build_request(
            "the content",
            RequestOptions {
                temperature: Some(0.1),
                max_tokens: None,
            },
        );
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].role, "user");
        assert_eq!(request.messages[1].content, "the content");
        assert_eq!(request.temperature, Some(0.1));
    }

    #[test]
    fn inline_text_gets_a_stable_pseudo_url() {
        assert_eq!(pseudo_url("same text"), pseudo_url("same text"));
        assert_ne!(pseudo_url("one"), pseudo_url("two"));
        assert!(pseudo_url("x").starts_with("text:"));
    }

    #[tokio::test]
    async fn file_input_resolves_to_its_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "file body").unwrap();

        let client = AgentClient::new(&crate::config::AgentConfig::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let history = History::open(dir.path().join("history")).unwrap();
        let session = SummarizerSession::new(client, history, RequestOptions::default());

        let input = AnalysisInput::File(file.path().to_path_buf());
        let (source_url, content) = session.resolve_input(&input).await.unwrap();
        assert!(source_url.starts_with("file://"));
        assert_eq!(content.trim(), "file body");
    }
}
