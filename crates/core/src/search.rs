//! Search backend abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// One search result, in backend ranking order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Full page text, when the backend provides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
}

impl SearchHit {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
            raw_content: None,
        }
    }

    pub fn with_raw_content(mut self, raw: impl Into<String>) -> Self {
        self.raw_content = Some(raw.into());
        self
    }
}

/// A web (or model-native) search capability.
///
/// Implementations must be safe to call from many research units at once.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Backend name (e.g., "tavily", "native", "none").
    fn name(&self) -> &str;

    /// Run one query and return hits in ranking order.
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}
