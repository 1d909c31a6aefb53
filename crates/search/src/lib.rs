//! Search backends for Delve.
//!
//! All backends implement `delve_core::SearchProvider`. The backend is chosen
//! once from `research.search_api`:
//!
//! | name     | backend                                   |
//! |----------|-------------------------------------------|
//! | `tavily` | Tavily search API (needs `TAVILY_API_KEY`) |
//! | `native` | the research model lists sources itself   |
//! | `none`   | searching disabled, every query is empty  |

pub mod disabled;
pub mod native;
pub mod tavily;

pub use disabled::DisabledSearch;
pub use native::ModelNativeSearch;
pub use tavily::TavilySearch;

use std::sync::Arc;

use delve_config::{AppConfig, ConfigError};
use delve_core::{ModelSet, SearchProvider};
use tracing::info;

/// Select and build the configured search backend.
///
/// An unknown backend name or a Tavily backend without an API key is a
/// configuration error, reported before any research starts.
pub fn build_from_config(
    config: &AppConfig,
    models: &ModelSet,
) -> Result<Arc<dyn SearchProvider>, ConfigError> {
    let backend: Arc<dyn SearchProvider> = match config.research.search_api.as_str() {
        "tavily" => Arc::new(tavily_from_config(config)?),
        "native" => Arc::new(
            ModelNativeSearch::new(models.research.clone()).with_max_results(config.search.max_results),
        ),
        "none" => Arc::new(DisabledSearch),
        other => {
            return Err(ConfigError::ValidationError(format!(
                "unknown search_api '{other}' (expected tavily, native or none)"
            )));
        }
    };

    info!(backend = backend.name(), "Search backend ready");
    Ok(backend)
}

/// Build the Tavily backend from `[search]`, ignoring `search_api`.
///
/// Used directly by diagnostics that probe Tavily without resolving models.
pub fn tavily_from_config(config: &AppConfig) -> Result<TavilySearch, ConfigError> {
    let key = config
        .search
        .tavily_api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            ConfigError::ValidationError(
                "Tavily search needs an API key (TAVILY_API_KEY or search.tavily_api_key)".into(),
            )
        })?;
    let mut tavily = TavilySearch::new(key)
        .with_max_results(config.search.max_results)
        .with_topic(&config.search.topic)
        .with_raw_content(config.search.include_raw_content);
    if let Some(url) = &config.search.base_url {
        tavily = tavily.with_base_url(url);
    }
    Ok(tavily)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use delve_core::error::ProviderError;
    use delve_core::provider::{Provider, ProviderRequest, ProviderResponse};

    struct NullProvider;

    #[async_trait]
    impl Provider for NullProvider {
        fn name(&self) -> &str {
            "null"
        }
        async fn complete(&self, _: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::NotConfigured("null".into()))
        }
    }

    fn models() -> ModelSet {
        ModelSet::uniform(Arc::new(NullProvider), "m", 100)
    }

    #[test]
    fn tavily_without_key_is_rejected() {
        let config = AppConfig::default();
        let err = build_from_config(&config, &models()).err().unwrap();
        assert!(err.to_string().contains("TAVILY_API_KEY"));
    }

    #[test]
    fn tavily_with_key() {
        let mut config = AppConfig::default();
        config.search.tavily_api_key = Some("tvly-test".into());
        let backend = build_from_config(&config, &models()).unwrap();
        assert_eq!(backend.name(), "tavily");
    }

    #[test]
    fn native_and_none_backends() {
        let mut config = AppConfig::default();
        config.research.search_api = "native".into();
        assert_eq!(build_from_config(&config, &models()).unwrap().name(), "native");
        config.research.search_api = "none".into();
        assert_eq!(build_from_config(&config, &models()).unwrap().name(), "none");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut config = AppConfig::default();
        config.research.search_api = "bing".into();
        let err = build_from_config(&config, &models()).err().unwrap();
        assert!(err.to_string().contains("bing"));
    }
}
