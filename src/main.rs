use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use strdb::cli_types::{Cli, Commands};
use strdb::ui::UIManager;
use strdb::{CliApp, IndexerConfig};

const EXIT_FAILURE: u8 = 1;
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);
    let ui = UIManager::new(!cli.no_color);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            ui.print_error(&format!("{:#}", e));
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// Logs go to stderr; `RUST_LOG` overrides the verbosity flag.
fn init_tracing(verbose: u8, json: bool) {
    let default = match verbose {
        0 => "warn",
        1 => "strdb=info",
        _ => "strdb=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = IndexerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_to(&mut config);

    let app = CliApp::new(config, cli.verbose > 0, !cli.no_color)?;

    match cli.command {
        Commands::Build(args) => {
            let cancel = app.cancel_flag();
            let signals = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing files in flight");
                    cancel.store(true, Ordering::SeqCst);
                }
            });

            let summary = app.build(args).await;
            signals.abort();

            if summary?.cancelled {
                Ok(ExitCode::from(EXIT_CANCELLED))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Commands::Query(args) => {
            app.query(args).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Dump(args) => {
            app.dump(args).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Info(args) => {
            app.info(args).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
