//! Web content extraction for URL analysis.
//!
//! Uses reqwest for fetching and scraper for HTML parsing. The goal is
//! readable article text, not a faithful DOM rendering.

use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// User-Agent string identifying this fetcher
const USER_AGENT: &str = concat!("condense/", env!("CARGO_PKG_VERSION"));

/// Default timeout for page fetches
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Paragraph fragments shorter than this are treated as navigation noise
const MIN_FRAGMENT_CHARS: usize = 25;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("failed to fetch URL: {0}")]
    FetchError(#[from] reqwest::Error),
    #[error("no readable content found at URL")]
    NoContent,
}

/// Extracted content from a webpage
#[derive(Debug, Clone)]
pub struct PageContent {
    /// The original URL
    pub url: String,
    /// Page title, when one could be found
    pub title: Option<String>,
    /// Main readable text
    pub text: String,
}

/// Fetch a page and extract its readable content
pub async fn fetch_content(url: &str) -> Result<PageContent, ScraperError> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(FETCH_TIMEOUT)
        .build()?;

    let html = client.get(url).send().await?.text().await?;
    let document = Html::parse_document(&html);

    let title = extract_title(&document);
    let text = extract_text(&document);
    debug!(url, chars = text.len(), "extracted page content");

    if text.trim().is_empty() {
        return Err(ScraperError::NoContent);
    }

    Ok(PageContent {
        url: url.to_string(),
        title,
        text,
    })
}

/// Extract a title from og:title, <title>, or the first <h1>
fn extract_title(document: &Html) -> Option<String> {
    let og_selector = Selector::parse("meta[property='og:title']").unwrap();
    if let Some(element) = document.select(&og_selector).next() {
        if let Some(content) = element.value().attr("content") {
            if !content.trim().is_empty() {
                return Some(content.trim().to_string());
            }
        }
    }

    for selector_str in ["title", "h1"] {
        let selector = Selector::parse(selector_str).unwrap();
        if let Some(element) = document.select(&selector).next() {
            let title: String = element.text().collect();
            if !title.trim().is_empty() {
                return Some(title.trim().to_string());
            }
        }
    }

    None
}

/// Extract readable text, preferring dedicated content containers
fn extract_text(document: &Html) -> String {
    let containers = ["article", "main", "[role='main']", ".content", "#content"];

    for selector_str in containers {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                let fragment = Html::parse_fragment(&element.html());
                let text = collect_fragments(&fragment);
                if !text.trim().is_empty() {
                    return text;
                }
            }
        }
    }

    collect_fragments(document)
}

/// Collect paragraph-like fragments, skipping short navigation strings
fn collect_fragments(document: &Html) -> String {
    let selector = Selector::parse("p, h1, h2, h3, h4, h5, h6, li, blockquote").unwrap();

    let mut fragments: Vec<String> = Vec::new();
    for element in document.select(&selector) {
        let text: String = element.text().collect::<Vec<_>>().join(" ");
        let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if cleaned.chars().count() >= MIN_FRAGMENT_CHARS {
            fragments.push(cleaned);
        }
    }

    fragments.join("\n\n")
}
