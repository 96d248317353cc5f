//! regionwall - region-based firewall rule daemon

use clap::Parser;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use regionwall::cli::{Cli, Commands};
use regionwall::commands::{action, daemon};
use regionwall::error::exit_code;
use regionwall::protocol::Request;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    // RUST_LOG wins over -v/-q
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    // stdout carries protocol responses; logs go to stderr
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let code = match cli.command {
        Commands::Daemon {
            guard,
            ref program_name,
        } => daemon::run(&cli, guard, program_name).await,
        Commands::Block { ref region } => {
            let request = Request::Block {
                region: region.clone(),
                ip_dir: None,
            };
            action::run(&cli, request).await
        }
        Commands::Unblock { ref region } => {
            let request = Request::Unblock {
                region: region.clone(),
            };
            action::run(&cli, request).await
        }
        Commands::UnblockAll => action::run(&cli, Request::UnblockAll).await,
        Commands::Status => action::run(&cli, Request::Status).await,
        Commands::SetPath { ref path } => action::run(&cli, Request::SetPath(path.clone())).await,
        Commands::GetPath => action::run(&cli, Request::GetPath).await,
        Commands::Version => {
            println!("regionwall {}", env!("CARGO_PKG_VERSION"));
            exit_code::SUCCESS
        }
    };

    // Exit right away: a pending stdin read would otherwise hold the runtime
    std::process::exit(code);
}
