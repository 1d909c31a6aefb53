//! Delve CLI: the main entry point.
//!
//! Commands:
//! - `research`: run a deep-research request and print the report
//! - `search-check`: probe the configured search backend
//! - `onboard`: create the config directory and a default config
//! - `doctor`: diagnose configuration and credentials
//! - `config`: show, locate or validate the configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "delve",
    about = "Delve: deep research with concurrent search agents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging and per-event progress output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Research a question and print a cited report
    Research(commands::research::ResearchArgs),

    /// Check that the search backend answers queries
    SearchCheck {
        /// Query to run
        #[arg(default_value = "artificial intelligence")]
        query: String,

        /// Number of results to show
        #[arg(short = 'n', long, default_value_t = 3)]
        max_results: usize,
    },

    /// Initialize configuration
    Onboard,

    /// Diagnose configuration and credentials
    Doctor,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Print the config file path
    Path,
    /// Validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing. Logs go to stderr so stdout carries only results.
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Research(args) => commands::research::run(args, cli.verbose).await?,
        Commands::SearchCheck { query, max_results } => {
            commands::search_check::run(&query, max_results).await?
        }
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Doctor => commands::doctor::run().await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
        },
    }

    Ok(())
}
