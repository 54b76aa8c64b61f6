// Helix genome browser assistant
// Main entry point for the Helix binary

use clap::Parser;
use helix_engine::cli::{Cli, Command, ConfigAction};
use helix_engine::config::Config;
use helix_engine::handlers::{
    handle_config_show, handle_run, handle_tools, OutputFormat, RunOverrides,
};
use helix_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    tracing::info!("Helix v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run {
            message,
            max_rounds,
            context_mode,
        } => {
            tracing::info!("Running turn: {}", message);
            let overrides = RunOverrides {
                max_rounds,
                context_mode,
            };
            handle_run(message, overrides, &config, format).await
        }

        Command::Tools => handle_tools(&config, format),

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
        },
    }
}
