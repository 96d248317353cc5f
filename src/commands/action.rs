//! One-shot commands: run a single request and exit.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::Cli;
use crate::error::exit_code;
use crate::protocol::{Outcome, Request, Session};
use crate::signal::ShutdownGuard;

use super::build_session;

/// How a one-shot request ended.
#[derive(Debug)]
pub enum Completion {
    Finished(Outcome),
    /// Shutdown was requested while the request ran. The request was still
    /// driven to its end, then every owned rule was removed.
    Interrupted(Outcome),
}

/// Run `request` once, print its response line and return the exit code.
///
/// An interrupt while the request runs removes every owned rule once the
/// request has finished.
pub async fn run(cli: &Cli, request: Request) -> i32 {
    let session = match build_session(cli) {
        Ok(session) => session,
        Err(e) => {
            println!("ERROR: {}", e);
            return e.exit_code();
        }
    };

    let token = CancellationToken::new();
    let _guard = ShutdownGuard::new(token.clone());

    match execute_until_cancelled(&session, &request, &token).await {
        Completion::Finished(outcome) => {
            println!("{}", outcome.line);
            outcome.exit_code()
        }
        Completion::Interrupted(outcome) => {
            debug!("Interrupted request ended with: {}", outcome.line);
            exit_code::SUCCESS
        }
    }
}

/// Execute `request`, cleaning up afterwards if `token` fires meanwhile.
///
/// The request is never dropped halfway. Its backend calls run on blocking
/// threads, and cleanup must not list rules while any of them is in flight.
pub async fn execute_until_cancelled(
    session: &Session,
    request: &Request,
    token: &CancellationToken,
) -> Completion {
    let execute = session.execute(request);
    tokio::pin!(execute);

    tokio::select! {
        outcome = &mut execute => Completion::Finished(outcome),
        _ = token.cancelled() => {
            info!("Interrupted, waiting for the running request to finish...");
            let outcome = execute.await;
            session.cleanup().await;
            Completion::Interrupted(outcome)
        }
    }
}
