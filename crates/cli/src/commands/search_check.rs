//! `delve search-check`: Probe the configured search backend.

use std::sync::Arc;

use delve_config::AppConfig;
use delve_core::SearchProvider;

pub async fn run(query: &str, max_results: usize) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    config.search.max_results = max_results.max(1);

    println!("🔍 Search check");
    println!("   Backend: {}", config.research.search_api);
    println!("   Query:   {query}\n");

    let search = backend(&config)?;
    let hits = search.search(query).await?;

    if hits.is_empty() {
        println!("   ⚠️  No results returned");
        return Ok(());
    }

    for (i, hit) in hits.iter().take(max_results).enumerate() {
        println!("   {}. {}", i + 1, hit.title);
        println!("      {}", hit.url);
        println!("      {}\n", preview(&hit.snippet, 150));
    }
    println!("   ✅ Search backend is working ({} results)", hits.len());
    Ok(())
}

/// Tavily is probed directly so a missing model key does not hide a
/// working search key. Other backends go through the normal builder.
fn backend(config: &AppConfig) -> Result<Arc<dyn SearchProvider>, Box<dyn std::error::Error>> {
    if config.research.search_api == "tavily" {
        return Ok(Arc::new(delve_search::tavily_from_config(config)?));
    }
    let models = delve_providers::resolve_models(config)?;
    Ok(delve_search::build_from_config(config, &models)?)
}

fn preview(text: &str, max_chars: usize) -> String {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("héllo  wörld", 5), "héllo...");
        assert_eq!(preview("short", 150), "short");
    }

    #[test]
    fn tavily_without_key_is_rejected() {
        let mut config = AppConfig::default();
        config.research.search_api = "tavily".into();
        assert!(backend(&config).is_err());
    }
}
