//! `delve onboard`: First-time setup.

use delve_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = AppConfig::config_path();

    println!("🔬 Delve — First-Time Setup");
    println!("===========================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Created config.toml at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Set a model key:   export OPENAI_API_KEY=sk-...");
    println!("      (or DELVE_API_KEY / OPENROUTER_API_KEY / ANTHROPIC_API_KEY)");
    println!("   2. Set a search key:  export TAVILY_API_KEY=tvly-...");
    println!("      (or set research.search_api = \"native\" in the config)");
    println!("   3. Run: delve doctor");
    println!("   4. Run: delve research \"your question\"\n");

    Ok(())
}
