//! `delve config`: Configuration management commands.

use delve_config::AppConfig;

const REDACTED: &str = "[REDACTED]";

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed and validated");

            let mut warnings = Vec::new();
            if !config.has_api_key() {
                warnings.push("No model API key set (OPENAI_API_KEY, OPENROUTER_API_KEY, ANTHROPIC_API_KEY or DELVE_API_KEY)");
            }
            if config.research.search_api == "tavily" && config.search.tavily_api_key.is_none() {
                warnings.push("search_api is tavily but TAVILY_API_KEY is not set");
            }
            if config.research.search_api == "none" {
                warnings.push("Search is disabled; research will produce no findings");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Research model: {}", config.models.research.model);
            println!("   Search:         {}", config.research.search_api);
            println!(
                "   Budgets:        {} units, {} rounds, {} searches/unit",
                config.research.max_concurrent_research_units,
                config.research.max_researcher_iterations,
                config.research.max_react_tool_calls
            );
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}

/// Copy of `config` with every secret replaced.
fn redacted(mut config: AppConfig) -> AppConfig {
    let mask = |key: &mut Option<String>| {
        if key.is_some() {
            *key = Some(REDACTED.into());
        }
    };
    mask(&mut config.api_key);
    mask(&mut config.search.tavily_api_key);
    for provider in config.providers.values_mut() {
        mask(&mut provider.api_key);
    }
    config
}
