//! Provider router: builds LLM providers from config and binds model roles.
//!
//! Each role's model is written `provider:model` (e.g. `openai:gpt-4.1`,
//! `anthropic:claude-sonnet-4`). Providers are created once per name and
//! shared by every role that uses them.

use std::collections::HashMap;
use std::sync::Arc;

use delve_config::{AppConfig, ConfigError};
use delve_core::model::{LanguageModel, ModelRole, ModelSet};
use delve_core::provider::Provider;
use tracing::debug;

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Providers by name.
#[derive(Default)]
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Bind every role in `config.models` to a registered provider.
    pub fn bind_models(&self, config: &AppConfig) -> Result<ModelSet, ConfigError> {
        let bind = |role: ModelRole| -> Result<LanguageModel, ConfigError> {
            let model_config = config.models.get(role);
            let (provider_name, model) = model_config.split()?;
            let provider = self.get(provider_name).ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "models.{role}: provider '{provider_name}' is not available"
                ))
            })?;
            debug!(role = %role, provider = provider_name, model, "Bound model role");
            Ok(LanguageModel::new(
                role,
                provider,
                model,
                model_config.max_tokens,
            ))
        };

        Ok(ModelSet {
            summarization: bind(ModelRole::Summarization)?,
            research: bind(ModelRole::Research)?,
            compression: bind(ModelRole::Compression)?,
            final_report: bind(ModelRole::FinalReport)?,
        })
    }
}

/// Build a provider for every name referenced by a model role or listed
/// under `[providers]`.
///
/// Remote providers without an API key are a configuration error; local
/// servers (ollama, vllm, llamacpp) need none.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderRouter, ConfigError> {
    let mut names: Vec<String> = config.providers.keys().cloned().collect();
    for role in ModelRole::ALL {
        let (provider, _) = config.models.get(role).split()?;
        if !names.iter().any(|n| n == provider) {
            names.push(provider.to_string());
        }
    }

    let mut router = ProviderRouter::new();
    for name in names {
        let provider_config = config.providers.get(&name);
        let api_url = provider_config.and_then(|p| p.api_url.clone());
        let api_key = config.api_key_for(&name);

        let api_key = match (api_key, is_local(&name)) {
            (Some(key), _) => key,
            (None, true) => String::new(),
            (None, false) => {
                return Err(ConfigError::ValidationError(format!(
                    "no API key configured for provider '{name}'"
                )));
            }
        };

        let provider: Arc<dyn Provider> = if name == "anthropic" {
            let mut p = AnthropicProvider::new(&api_key);
            if let Some(url) = &api_url {
                p = p.with_base_url(url);
            }
            Arc::new(p)
        } else {
            let base_url = match api_url {
                Some(url) => url,
                None => default_base_url(&name).ok_or_else(|| {
                    ConfigError::ValidationError(format!(
                        "unknown provider '{name}': set providers.{name}.api_url"
                    ))
                })?,
            };
            Arc::new(OpenAiCompatProvider::new(&name, base_url, &api_key))
        };

        router.register(name, provider);
    }

    Ok(router)
}

/// Build providers and bind all four model roles.
pub fn resolve_models(config: &AppConfig) -> Result<ModelSet, ConfigError> {
    build_from_config(config)?.bind_models(config)
}

fn is_local(provider_name: &str) -> bool {
    matches!(provider_name, "ollama" | "vllm" | "llamacpp" | "llama.cpp")
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> Option<String> {
    let url = match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "openai" => "https://api.openai.com/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "fireworks" => "https://api.fireworks.ai/inference/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1",
        _ => return None,
    };
    Some(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_config::ProviderConfig;

    fn config_with_key() -> AppConfig {
        AppConfig {
            api_key: Some("sk-test".into()),
            ..AppConfig::default()
        }
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").unwrap().contains("openrouter.ai"));
        assert!(default_base_url("openai").unwrap().contains("api.openai.com"));
        assert!(default_base_url("mystery").is_none());
    }

    #[test]
    fn resolve_default_models() {
        let models = resolve_models(&config_with_key()).unwrap();
        assert_eq!(models.research.model(), "gpt-4.1");
        assert_eq!(models.summarization.model(), "gpt-4.1-mini");
        assert_eq!(models.final_report.max_tokens(), 10000);
        assert_eq!(models.compression.provider_name(), "openai");
    }

    #[test]
    fn missing_key_is_configuration_error() {
        let err = resolve_models(&AppConfig::default()).unwrap_err();
        assert!(err.to_string().contains("no API key"));
    }

    #[test]
    fn local_provider_needs_no_key() {
        let mut config = AppConfig::default();
        for m in [
            &mut config.models.summarization,
            &mut config.models.research,
            &mut config.models.compression,
            &mut config.models.final_report,
        ] {
            m.model = "ollama:llama3.1".into();
        }
        let models = resolve_models(&config).unwrap();
        assert_eq!(models.research.provider_name(), "ollama");
    }

    #[test]
    fn mixed_providers_share_instances() {
        let mut config = config_with_key();
        config.models.final_report.model = "anthropic:claude-sonnet-4".into();
        config.providers.insert(
            "anthropic".into(),
            ProviderConfig {
                api_key: Some("ant".into()),
                api_url: None,
            },
        );
        let router = build_from_config(&config).unwrap();
        assert_eq!(router.list(), vec!["anthropic", "openai"]);
        let models = router.bind_models(&config).unwrap();
        assert_eq!(models.final_report.provider_name(), "anthropic");
        assert_eq!(models.final_report.model(), "claude-sonnet-4");
    }

    #[test]
    fn unknown_provider_without_url_rejected() {
        let mut config = config_with_key();
        config.models.research.model = "acme:big-model".into();
        let err = build_from_config(&config).err().unwrap();
        assert!(err.to_string().contains("acme"));
    }
}
