//! Knowledge-retrieval collaborator.

use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use kai_core::config::KnowledgeConfig;

/// Answers caller questions from the support knowledge base.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn answer(&self, query: &str) -> anyhow::Result<String>;
}

/// Vector-search service reached over HTTP.
///
/// `POST {base_url}/search` with `{"query", "top_k"}` returns
/// `{"matches": [{"title", "url", "content", "score"}]}`.
pub struct HttpKnowledgeBase {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    top_k: usize,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    matches: Vec<Match>,
}

#[derive(Debug, Deserialize)]
struct Match {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
}

impl HttpKnowledgeBase {
    pub fn new(config: &KnowledgeConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("building knowledge HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key(),
            top_k: config.top_k,
        })
    }
}

/// Join matched passages into one answer text, best match first.
fn compose_answer(mut matches: Vec<Match>) -> Option<String> {
    matches.retain(|m| !m.content.trim().is_empty());
    if matches.is_empty() {
        return None;
    }
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    let passages: Vec<String> = matches
        .into_iter()
        .map(|m| {
            if m.title.is_empty() {
                m.content.trim().to_string()
            } else {
                format!("{}: {}", m.title, m.content.trim())
            }
        })
        .collect();
    Some(passages.join("\n\n"))
}

#[async_trait]
impl KnowledgeBase for HttpKnowledgeBase {
    async fn answer(&self, query: &str) -> anyhow::Result<String> {
        let url = format!("{}/search", self.base_url);
        let mut req = self.client.post(&url).json(&SearchRequest {
            query,
            top_k: self.top_k,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.context("knowledge search request")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("knowledge search returned {status}: {body}");
        }

        let parsed: SearchResponse = resp.json().await.context("decoding knowledge search")?;
        debug!(query, matches = parsed.matches.len(), "Knowledge search complete");

        match compose_answer(parsed.matches) {
            Some(answer) => Ok(answer),
            None => bail!("no relevant information found for {query:?}"),
        }
    }
}

/// Stand-in used when no knowledge backend is configured. Every lookup fails,
/// which the dispatcher turns into the no-information fallback.
pub struct UnconfiguredKnowledgeBase;

#[async_trait]
impl KnowledgeBase for UnconfiguredKnowledgeBase {
    async fn answer(&self, _query: &str) -> anyhow::Result<String> {
        bail!("knowledge backend is not configured")
    }
}
