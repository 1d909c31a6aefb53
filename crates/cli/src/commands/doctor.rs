//! `delve doctor`: Diagnose configuration and credentials.

use delve_config::AppConfig;
use delve_core::{ModelRole, Provider};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Delve Doctor — System Diagnostics");
    println!("====================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_path();
    if config_path.exists() {
        println!("  ✅ Config file found: {}", config_path.display());
    } else {
        println!("  ⚠️  No config file, using defaults (run `delve onboard`)");
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  1 issue(s) found. Fix the config and re-run.");
            return Ok(());
        }
    };

    // Models
    match delve_providers::resolve_models(&config) {
        Ok(_) => println!("  ✅ Model providers configured"),
        Err(e) => {
            println!("  ❌ Models: {e}");
            issues += 1;
        }
    }
    if let Ok(router) = delve_providers::build_from_config(&config) {
        for name in router.list() {
            let Some(provider) = router.get(name) else {
                continue;
            };
            match provider.health_check().await {
                Ok(true) => println!("  ✅ Provider '{name}' reachable"),
                Ok(false) => {
                    println!("  ❌ Provider '{name}' rejected the health check");
                    issues += 1;
                }
                Err(e) => {
                    println!("  ❌ Provider '{name}' unreachable: {e}");
                    issues += 1;
                }
            }
        }
    }
    for role in ModelRole::ALL {
        let model = config.models.get(role);
        println!("       {role:<14} {} (max {} tokens)", model.model, model.max_tokens);
    }

    // Search
    match config.research.search_api.as_str() {
        "tavily" => match delve_search::tavily_from_config(&config) {
            Ok(_) => println!("  ✅ Tavily search key configured"),
            Err(e) => {
                println!("  ❌ Search: {e}");
                issues += 1;
            }
        },
        "native" => println!("  ✅ Search: model-native (research model lists its sources)"),
        "none" => {
            println!("  ⚠️  Search disabled: reports will have no findings");
            issues += 1;
        }
        other => {
            println!("  ❌ Unknown search backend '{other}'");
            issues += 1;
        }
    }

    let r = &config.research;
    println!(
        "\n  Budgets: {} units × {} rounds, {} searches per unit",
        r.max_concurrent_research_units, r.max_researcher_iterations, r.max_react_tool_calls
    );

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
