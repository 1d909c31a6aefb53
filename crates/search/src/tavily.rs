//! Tavily search backend.
//!
//! `POST {base_url}/search` with a Bearer key. Results carry a snippet
//! (`content`) and, when requested, the cleaned page text (`raw_content`).

use std::time::Duration;

use async_trait::async_trait;
use delve_core::{SearchError, SearchHit, SearchProvider};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";

pub struct TavilySearch {
    base_url: String,
    api_key: String,
    max_results: usize,
    topic: String,
    include_raw_content: bool,
    client: reqwest::Client,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            max_results: 5,
            topic: "general".into(),
            include_raw_content: true,
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_raw_content(mut self, include: bool) -> Self {
        self.include_raw_content = include;
        self
    }

    fn request_body<'a>(&'a self, query: &'a str) -> TavilyRequest<'a> {
        TavilyRequest {
            query,
            max_results: self.max_results,
            topic: &self.topic,
            include_raw_content: self.include_raw_content,
        }
    }

    fn into_hits(response: TavilyResponse) -> Vec<SearchHit> {
        response
            .results
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                snippet: r.content,
                raw_content: r.raw_content.filter(|c| !c.trim().is_empty()),
            })
            .collect()
    }
}

/// Map an HTTP status to a search error: throttling and server errors are
/// worth retrying, the rest are not.
fn classify_status(status: u16, body: String) -> SearchError {
    match status {
        429 | 500..=599 => SearchError::Transient(format!("Tavily returned {status}: {body}")),
        401 | 403 => SearchError::NotConfigured("Tavily rejected the API key".into()),
        _ => SearchError::Permanent(format!("Tavily returned {status}: {body}")),
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let url = format!("{}/search", self.base_url);
        debug!(query, max_results = self.max_results, "Tavily search");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(query))
            .send()
            .await
            .map_err(|e| SearchError::Transient(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status, "Tavily search failed");
            return Err(classify_status(status, body));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Permanent(format!("Failed to parse Tavily response: {e}")))?;

        Ok(Self::into_hits(parsed))
    }
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
    topic: &'a str,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: Option<String>,
}
