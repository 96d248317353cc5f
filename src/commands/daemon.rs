//! Daemon mode: serve the control protocol over stdin/stdout.

use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::Cli;
use crate::cmd_abstraction::RealCommandExecutor;
use crate::process::ProcessListMonitor;
use crate::protocol::serve;
use crate::signal::ShutdownGuard;

use super::build_session;

/// Run until `exit`, end of input or a termination signal. Owned rules are
/// removed before returning the exit code.
pub async fn run(cli: &Cli, guard: bool, program_name: &str) -> i32 {
    let session = match build_session(cli) {
        Ok(session) => session,
        Err(e) => {
            println!("ERROR: {}", e);
            return e.exit_code();
        }
    };
    let monitor = ProcessListMonitor::new(RealCommandExecutor::shared(), program_name);
    let session = session.with_monitor(Arc::new(monitor), guard);

    let token = CancellationToken::new();
    let _guard = ShutdownGuard::new(token.clone());

    info!("Starting firewall daemon");
    let reader = BufReader::new(tokio::io::stdin());
    let reason = serve(&session, reader, tokio::io::stdout(), &token).await;

    info!("Daemon stopped: {:?}", reason);
    reason.exit_code()
}
