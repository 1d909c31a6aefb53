//! Model-native search: the research model answers the query itself and
//! lists the sources it relied on.
//!
//! Useful with models that have built-in browsing. Hits without a URL are
//! discarded, so the model cannot introduce uncitable sources.

use async_trait::async_trait;
use delve_core::structured::parse_json;
use delve_core::{LanguageModel, Message, SearchError, SearchHit, SearchProvider};
use serde::Deserialize;
use tracing::debug;

const NATIVE_SEARCH_PROMPT: &str = "You are a web search engine. For the query you receive, \
return the most relevant sources you know of as JSON only, in this shape:\n\
{\"sources\": [{\"title\": \"...\", \"url\": \"https://...\", \"snippet\": \"key facts from the page\"}]}\n\
Only include sources with a real, specific URL.";

pub struct ModelNativeSearch {
    model: LanguageModel,
    max_results: usize,
}

impl ModelNativeSearch {
    pub fn new(model: LanguageModel) -> Self {
        Self {
            model,
            max_results: 5,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }
}

#[derive(Debug, Deserialize)]
struct NativeSources {
    #[serde(default)]
    sources: Vec<NativeSource>,
}

#[derive(Debug, Deserialize)]
struct NativeSource {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    snippet: String,
}

#[async_trait]
impl SearchProvider for ModelNativeSearch {
    fn name(&self) -> &str {
        "native"
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let messages = vec![Message::system(NATIVE_SEARCH_PROMPT), Message::user(query)];
        let reply = self.model.complete(messages, Vec::new()).await.map_err(|e| {
            if e.transient {
                SearchError::Transient(e.to_string())
            } else {
                SearchError::Permanent(e.to_string())
            }
        })?;

        let parsed: NativeSources = parse_json(&reply.content)
            .map_err(|e| SearchError::Permanent(format!("native search returned malformed JSON: {e}")))?;

        let hits: Vec<SearchHit> = parsed
            .sources
            .into_iter()
            .filter(|s| s.url.starts_with("http://") || s.url.starts_with("https://"))
            .take(self.max_results)
            .map(|s| SearchHit::new(s.title, s.url, s.snippet))
            .collect();

        debug!(query, hits = hits.len(), "Native search");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::error::ProviderError;
    use delve_core::model::ModelRole;
    use delve_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use std::sync::Arc;

    struct FixedProvider(Result<String, ProviderError>);

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn complete(&self, req: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let content = self.0.clone()?;
            Ok(ProviderResponse {
                message: Message::assistant(content),
                usage: None,
                model: req.model,
                metadata: serde_json::Map::new(),
            })
        }
    }

    fn search_with(reply: Result<String, ProviderError>) -> ModelNativeSearch {
        let model = LanguageModel::new(ModelRole::Research, Arc::new(FixedProvider(reply)), "m", 500);
        ModelNativeSearch::new(model).with_max_results(2)
    }

    #[tokio::test]
    async fn parses_sources_and_drops_urlless() {
        let reply = r#"```json
{"sources": [
  {"title": "A", "url": "https://a.example", "snippet": "one"},
  {"title": "B", "url": "not a url", "snippet": "two"},
  {"title": "C", "url": "https://c.example", "snippet": "three"},
  {"title": "D", "url": "https://d.example", "snippet": "four"}
]}
```"#;
        let hits = search_with(Ok(reply.into())).search("q").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://a.example");
        assert_eq!(hits[1].url, "https://c.example");
    }

    #[tokio::test]
    async fn malformed_reply_is_permanent() {
        let err = search_with(Ok("no idea".into())).search("q").await.unwrap_err();
        assert!(matches!(err, SearchError::Permanent(_)));
    }

    #[tokio::test]
    async fn rate_limit_is_transient() {
        let err = search_with(Err(ProviderError::RateLimited { retry_after_secs: 1 }))
            .search("q")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
