use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use sinkhound::{cli, config, errors};

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!cli.no_color)
        .init();

    debug!(
        git = option_env!("GIT_HASH").unwrap_or("dev"),
        build = option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        "sinkhound starting"
    );

    let result = match cli.command {
        cli::Commands::Analyze(args) => cli::analyze::handle_analyze(args).await,
        cli::Commands::Show(args) => cli::show::handle_show(args).await,
        cli::Commands::List(args) => cli::show::handle_list(args).await,
        cli::Commands::Validate(args) => handle_validate(args).await,
    };

    match result {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            let exit_code = match &e {
                errors::HoundError::Config(_) => 2,
                errors::HoundError::Environment(_) => 3,
                errors::HoundError::Registry(_)
                | errors::HoundError::Network(_)
                | errors::HoundError::Http(_) => 4,
                errors::HoundError::Database(_) => 5,
                _ => 1,
            };
            std::process::exit(exit_code);
        }
    }
}

async fn handle_validate(args: cli::commands::ValidateArgs) -> Result<(), errors::HoundError> {
    let path = std::path::PathBuf::from(&args.config);
    let config = config::parse_config(&path).await?;
    config::validate(&config)?;
    println!("Configuration is valid: {}", args.config);
    Ok(())
}
