use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dashpack::cli::{self, Cli, Commands};
use dashpack::{Builder, Config, DashpackError, HashProvider};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose)?;

    // The hash fallback is installed before anything else can request a digest
    let hash = Arc::new(HashProvider::default());

    match cli.command.unwrap_or(Commands::Build) {
        Commands::Build => {
            let config = match Config::load(cli.config.as_deref()) {
                Ok(config) => config,
                Err(e) => fail("Configuration", &format!("{:#}", e)),
            };

            info!("Starting dashpack v{}", dashpack::VERSION);

            let mut builder = Builder::new(config, hash);
            if let Some(mode) = cli.mode {
                builder = builder.with_mode(mode);
            }

            match builder.build().await {
                Ok(report) => {
                    for bundle in &report.published.bundles {
                        info!("  {} ({} bytes, {})", bundle.file, bundle.size, bundle.hash);
                    }
                    for removed in &report.published.removed {
                        warn!("Removed stale bundle {}", removed.display());
                    }
                    info!(
                        "Built {} bundles for {} in {}ms",
                        report.published.bundles.len(),
                        report.level,
                        report.elapsed_ms
                    );
                }
                Err(e) => report_error(&e),
            }
        }

        Commands::Init { output_dir } => {
            let path = Config::init(&output_dir)?;
            info!("Initialized dashpack configuration in {}", path.display());
        }

        Commands::Completions { shell } => {
            cli::generate_completions(shell);
        }
    }

    Ok(())
}

fn report_error(error: &DashpackError) -> ! {
    let category = format!("{:?}", error.category());
    fail(&category, &error.to_string())
}

fn fail(category: &str, message: &str) -> ! {
    eprintln!("{} {}", format!("error[{}]:", category.to_lowercase()).red().bold(), message);
    std::process::exit(1);
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default_filter = if verbose { "dashpack=debug" } else { "dashpack=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
        )
        .with(filter)
        .init();

    Ok(())
}
