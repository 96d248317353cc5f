//! Line-oriented control protocol.
//!
//! Requests are `action[|arg1[|arg2]]`, one per line. Every request gets
//! exactly one response line; failures start with `ERROR:`. Requests are
//! handled strictly one after another so a controller can pair each line it
//! sends with the next line it reads.
//!
//! When the session ends for any reason (`exit`, closed input, a signal)
//! all owned rules are removed before returning.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{exit_code, FirewallError};
use crate::manager::FirewallManager;
use crate::process::ProgramMonitor;
use crate::region::Region;

pub const ACTION_BLOCK: &str = "block";
pub const ACTION_UNBLOCK: &str = "unblock";
pub const ACTION_UNBLOCK_ALL: &str = "unblock-all";
pub const ACTION_STATUS: &str = "status";
pub const ACTION_SET_PATH: &str = "set-path";
pub const ACTION_GET_PATH: &str = "get-path";
pub const ACTION_EXIT: &str = "exit";

/// A parsed control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Block {
        region: String,
        ip_dir: Option<PathBuf>,
    },
    Unblock {
        region: String,
    },
    UnblockAll,
    Status,
    SetPath(String),
    GetPath,
}

/// One input line, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Blank,
    Exit,
    Request(Request),
}

/// Parse one input line.
pub fn parse_request(line: &str) -> Result<Input, FirewallError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Blank);
    }

    let mut parts = line.splitn(3, '|');
    let action = parts.next().unwrap_or_default().trim();
    let arg1 = parts.next().map(str::trim).filter(|s| !s.is_empty());
    let arg2 = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let region_required =
        || FirewallError::MissingArgument("Region is required for block/unblock actions".into());

    let request = match action {
        ACTION_BLOCK => Request::Block {
            region: arg1.ok_or_else(region_required)?.to_string(),
            ip_dir: arg2.map(PathBuf::from),
        },
        ACTION_UNBLOCK => Request::Unblock {
            region: arg1.ok_or_else(region_required)?.to_string(),
        },
        ACTION_UNBLOCK_ALL => Request::UnblockAll,
        ACTION_STATUS => Request::Status,
        ACTION_SET_PATH => Request::SetPath(
            arg1.ok_or_else(|| {
                FirewallError::MissingArgument(
                    "Path parameter is required for set-path action".into(),
                )
            })?
            .to_string(),
        ),
        ACTION_GET_PATH => Request::GetPath,
        ACTION_EXIT => return Ok(Input::Exit),
        other => return Err(FirewallError::UnknownAction(other.to_string())),
    };
    Ok(Input::Request(request))
}

/// Result of one request: the response line and the error behind it.
#[derive(Debug)]
pub struct Outcome {
    pub line: String,
    pub error: Option<FirewallError>,
}

impl Outcome {
    fn ok(line: String) -> Self {
        Self { line, error: None }
    }

    fn failed(context: &str, error: FirewallError) -> Self {
        let line = if context.is_empty() {
            format!("ERROR: {}", error)
        } else {
            format!("ERROR: {}: {}", context, error)
        };
        Self {
            line: one_line(&line),
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn exit_code(&self) -> i32 {
        self.error
            .as_ref()
            .map(FirewallError::exit_code)
            .unwrap_or(exit_code::SUCCESS)
    }
}

/// Collapse embedded line breaks (external tools love them).
fn one_line(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Make `dir` absolute against the working directory.
fn resolve_dir(dir: &Path) -> io::Result<PathBuf> {
    if dir.is_absolute() {
        Ok(dir.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(dir))
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    ExitCommand,
    InputClosed,
    OutputClosed,
    Signal,
    ReadError(String),
}

impl ExitReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::ReadError(_) => exit_code::INVALID_ARGS,
            _ => exit_code::SUCCESS,
        }
    }
}

/// Executes requests against a manager.
pub struct Session {
    manager: Arc<FirewallManager>,
    default_ip_dir: PathBuf,
    monitor: Option<Arc<dyn ProgramMonitor>>,
    refuse_while_running: bool,
}

impl Session {
    pub fn new(manager: Arc<FirewallManager>, default_ip_dir: impl Into<PathBuf>) -> Self {
        Self {
            manager,
            default_ip_dir: default_ip_dir.into(),
            monitor: None,
            refuse_while_running: false,
        }
    }

    /// Attach a program monitor. With `refuse_while_running`, `block` is
    /// rejected while the program runs.
    pub fn with_monitor(mut self, monitor: Arc<dyn ProgramMonitor>, refuse_while_running: bool) -> Self {
        self.monitor = Some(monitor);
        self.refuse_while_running = refuse_while_running;
        self
    }

    pub fn manager(&self) -> &FirewallManager {
        &self.manager
    }

    /// Run one request to completion.
    pub async fn execute(&self, request: &Request) -> Outcome {
        match request {
            Request::Block { region, ip_dir } => self.block(region, ip_dir.as_deref()).await,
            Request::Unblock { region } => {
                const CONTEXT: &str = "Failed to unblock IPs";
                let region = match region.parse::<Region>() {
                    Ok(r) => r,
                    Err(e) => return Outcome::failed(CONTEXT, e),
                };
                match self.manager.unblock_region(region).await {
                    Ok(outcome) => Outcome::ok(format!(
                        "Successfully unblocked IPs for region {} ({} rules removed)",
                        region, outcome.removed
                    )),
                    Err(e) => Outcome::failed(CONTEXT, e),
                }
            }
            Request::UnblockAll => match self.manager.unblock_all().await {
                Ok(outcome) => Outcome::ok(format!(
                    "Successfully unblocked all IPs ({} rules removed)",
                    outcome.removed
                )),
                Err(e) => Outcome::failed("Failed to unblock all IPs", e),
            },
            Request::Status => Outcome::ok(self.status_line().await),
            Request::SetPath(path) => match self.manager.set_path(path) {
                Ok(path) => Outcome::ok(format!("Overwatch path set to: {}", path.display())),
                Err(e) => Outcome::failed("Failed to set Overwatch path", e),
            },
            Request::GetPath => Outcome::ok(match self.manager.get_path() {
                Some(path) => format!("Current Overwatch path: {}", path.display()),
                None => "Overwatch path not configured".to_string(),
            }),
        }
    }

    async fn block(&self, region: &str, ip_dir: Option<&Path>) -> Outcome {
        const CONTEXT: &str = "Failed to block IPs";

        let region = match region.parse::<Region>() {
            Ok(r) => r,
            Err(e) => return Outcome::failed(CONTEXT, e),
        };
        let dir = match resolve_dir(ip_dir.unwrap_or(self.default_ip_dir.as_path())) {
            Ok(dir) => dir,
            Err(e) => {
                return Outcome::failed(
                    CONTEXT,
                    FirewallError::InvalidPath(format!("cannot resolve IP directory: {}", e)),
                )
            }
        };

        if self.refuse_while_running {
            if let Some(ref monitor) = self.monitor {
                match monitor.is_running().await {
                    Ok(true) => {
                        return Outcome::failed(
                            CONTEXT,
                            FirewallError::ProgramRunning(monitor.program_name().to_string()),
                        )
                    }
                    Ok(false) => {}
                    Err(e) => {
                        return Outcome::failed(
                            CONTEXT,
                            FirewallError::ProcessCheck(format!("{:#}", e)),
                        )
                    }
                }
            }
        }

        info!("Blocking IPs for region {} from directory {}", region, dir.display());
        match self.manager.block_region(region, &dir).await {
            Ok(outcome) => Outcome::ok(format!(
                "Successfully blocked {} IPs for region {} ({} rules created)",
                outcome.entries, region, outcome.rules
            )),
            Err(e) => Outcome::failed(CONTEXT, e),
        }
    }

    async fn status_line(&self) -> String {
        let mut line = String::from("Status: Ready");
        if !self.manager.status().path_configured {
            line.push_str(" - Overwatch path not configured");
        }
        if let Some(ref monitor) = self.monitor {
            match monitor.is_running().await {
                Ok(true) => line.push_str(&format!(" - {} running", monitor.program_name())),
                Ok(false) => line.push_str(&format!(" - {} not running", monitor.program_name())),
                Err(e) => warn!("Process check failed: {:#}", e),
            }
        }
        line
    }

    /// Remove every owned rule; failures are logged, never retried.
    pub async fn cleanup(&self) {
        info!("Cleaning up firewall rules...");
        match self.manager.unblock_all().await {
            Ok(outcome) => info!("Cleanup completed ({} rules removed)", outcome.removed),
            Err(e) => warn!("Cleanup failed: {}", e),
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Serve requests from `reader` until the session ends, then clean up.
pub async fn serve<R, W>(
    session: &Session,
    mut reader: R,
    mut writer: W,
    shutdown: &CancellationToken,
) -> ExitReason
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();

    let reason = loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break ExitReason::Signal,
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => break ExitReason::InputClosed,
            Ok(_) => {}
            Err(e) => break ExitReason::ReadError(e.to_string()),
        }

        // Undecodable bytes only spoil this request, never the session
        let line = String::from_utf8_lossy(&buf);

        let response = match parse_request(&line) {
            Ok(Input::Blank) => continue,
            Ok(Input::Exit) => break ExitReason::ExitCommand,
            Ok(Input::Request(request)) => {
                debug!("Request: {:?}", request);
                session.execute(&request).await.line
            }
            Err(e) => Outcome::failed("", e).line,
        };

        if let Err(e) = write_line(&mut writer, &response).await {
            warn!("Failed to write response: {}", e);
            break ExitReason::OutputClosed;
        }
    };

    match &reason {
        ExitReason::ExitCommand => info!("Received exit command, cleaning up..."),
        ExitReason::InputClosed | ExitReason::OutputClosed => {
            info!("Controller closed connection, cleaning up...")
        }
        ExitReason::Signal => info!("Shutdown signal received, cleaning up..."),
        ExitReason::ReadError(e) => warn!("Error reading input: {}, cleaning up...", e),
    }
    session.cleanup().await;

    if reason == ExitReason::ExitCommand {
        // The controller may already be gone; nothing left to do about it
        let _ = write_line(&mut writer, "Cleanup completed, exiting...").await;
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcer::MemoryBackend;
    use crate::manager::ManagerSettings;
    use crate::process::NoopMonitor;
    use async_trait::async_trait;

    /// Monitor with a fixed answer.
    struct FixedMonitor(Option<bool>);

    #[async_trait]
    impl ProgramMonitor for FixedMonitor {
        fn program_name(&self) -> &str {
            "Overwatch.exe"
        }

        async fn is_running(&self) -> anyhow::Result<bool> {
            self.0.ok_or_else(|| anyhow::anyhow!("tasklist exited with 1"))
        }
    }

    fn session() -> (Arc<MemoryBackend>, Session) {
        let backend = Arc::new(MemoryBackend::new());
        let manager =
            FirewallManager::new(backend.clone(), ManagerSettings::default(), None).unwrap();
        (backend, Session::new(Arc::new(manager), "ips"))
    }

    #[test]
    fn test_parse_requests() {
        assert_eq!(parse_request("").unwrap(), Input::Blank);
        assert_eq!(parse_request("   ").unwrap(), Input::Blank);
        assert_eq!(
            parse_request("block|EU|C:\\ip-lists").unwrap(),
            Input::Request(Request::Block {
                region: "EU".into(),
                ip_dir: Some(PathBuf::from("C:\\ip-lists"))
            })
        );
        assert_eq!(
            parse_request("block|NA").unwrap(),
            Input::Request(Request::Block {
                region: "NA".into(),
                ip_dir: None
            })
        );
        assert_eq!(
            parse_request("unblock|EU\r").unwrap(),
            Input::Request(Request::Unblock { region: "EU".into() })
        );
        assert_eq!(
            parse_request("unblock-all").unwrap(),
            Input::Request(Request::UnblockAll)
        );
        assert_eq!(parse_request("status").unwrap(), Input::Request(Request::Status));
        assert_eq!(
            parse_request("set-path|C:\\Games\\Overwatch.exe").unwrap(),
            Input::Request(Request::SetPath("C:\\Games\\Overwatch.exe".into()))
        );
        assert_eq!(parse_request("get-path").unwrap(), Input::Request(Request::GetPath));
        assert_eq!(parse_request("exit\r\n").unwrap(), Input::Exit);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_request("block"),
            Err(FirewallError::MissingArgument(_))
        ));
        assert!(matches!(
            parse_request("unblock|"),
            Err(FirewallError::MissingArgument(_))
        ));
        assert!(matches!(
            parse_request("set-path"),
            Err(FirewallError::MissingArgument(_))
        ));
        assert!(matches!(
            parse_request("dance|EU"),
            Err(FirewallError::UnknownAction(ref a)) if a == "dance"
        ));
    }

    #[test]
    fn test_one_line() {
        assert_eq!(one_line("a\r\n\r\nb\nc"), "a b c");
        assert_eq!(one_line("single"), "single");
    }

    #[test]
    fn test_exit_reason_codes() {
        assert_eq!(ExitReason::InputClosed.exit_code(), 0);
        assert_eq!(ExitReason::ReadError("x".into()).exit_code(), 5);
    }

    #[tokio::test]
    async fn test_get_path_unconfigured() {
        let (_, session) = session();
        let outcome = session.execute(&Request::GetPath).await;
        assert_eq!(outcome.line, "Overwatch path not configured");
        assert!(!outcome.is_error());
    }

    #[tokio::test]
    async fn test_status_unconfigured() {
        let (_, session) = session();
        let outcome = session.execute(&Request::Status).await;
        assert_eq!(outcome.line, "Status: Ready - Overwatch path not configured");
    }

    #[tokio::test]
    async fn test_status_with_monitor() {
        let (_, session) = session();
        let session = session.with_monitor(Arc::new(NoopMonitor), true);
        let outcome = session.execute(&Request::Status).await;
        assert!(outcome.line.ends_with("program not running"));
    }

    #[tokio::test]
    async fn test_block_without_path() {
        let (_, session) = session();
        let outcome = session
            .execute(&Request::Block {
                region: "EU".into(),
                ip_dir: None,
            })
            .await;
        assert_eq!(
            outcome.line,
            "ERROR: Failed to block IPs: Overwatch path not configured"
        );
        assert_eq!(outcome.exit_code(), exit_code::FIREWALL);
    }

    #[tokio::test]
    async fn test_block_invalid_region() {
        let (_, session) = session();
        let outcome = session
            .execute(&Request::Block {
                region: "Mars".into(),
                ip_dir: None,
            })
            .await;
        assert!(outcome.line.starts_with("ERROR:"));
        assert_eq!(outcome.exit_code(), exit_code::INVALID_ARGS);
    }

    #[tokio::test]
    async fn test_set_path_missing_file() {
        let (_, session) = session();
        let outcome = session
            .execute(&Request::SetPath("/nonexistent/x.exe".into()))
            .await;
        assert!(outcome.line.starts_with("ERROR: Failed to set Overwatch path"));
    }

    #[tokio::test]
    async fn test_unblock_all_reports_count() {
        let (backend, session) = session();
        backend.insert_rule("OW-VPN-EU-Batch1");
        backend.insert_rule("Someone else's rule");
        let outcome = session.execute(&Request::UnblockAll).await;
        assert_eq!(outcome.line, "Successfully unblocked all IPs (1 rules removed)");
        assert_eq!(backend.rule_names(), vec!["Someone else's rule"]);
    }

    #[tokio::test]
    async fn test_serve_ignores_blank_lines_and_reports_unknown() {
        let (backend, session) = session();
        backend.insert_rule("OW-VPN-ME-Batch1");
        let input: &[u8] = b"\n\nget-path\nbogus\n";
        let mut output = Vec::new();

        let reason = serve(&session, input, &mut output, &CancellationToken::new()).await;
        assert_eq!(reason, ExitReason::InputClosed);

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec!["Overwatch path not configured", "ERROR: Unknown action 'bogus'"]
        );
        // Closing the input cleans up
        assert!(backend.rule_names().is_empty());
    }

    #[tokio::test]
    async fn test_serve_exit_command() {
        let (backend, session) = session();
        backend.insert_rule("OW-VPN-EU-Batch1-In");
        let input: &[u8] = b"status\nexit\nget-path\n";
        let mut output = Vec::new();

        let reason = serve(&session, input, &mut output, &CancellationToken::new()).await;
        assert_eq!(reason, ExitReason::ExitCommand);

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "Cleanup completed, exiting...");
        assert!(backend.rule_names().is_empty());
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancelled_token() {
        let (backend, session) = session();
        backend.insert_rule("OW-VPN-As-Batch2");
        let token = CancellationToken::new();
        token.cancel();

        // Never-ending input: only the token can stop the loop
        let (_client, server) = tokio::io::duplex(64);
        let reader = tokio::io::BufReader::new(server);
        let reason = serve(&session, reader, tokio::io::sink(), &token).await;
        assert_eq!(reason, ExitReason::Signal);
        assert!(backend.rule_names().is_empty());
    }

    #[tokio::test]
    async fn test_block_refused_while_program_running() {
        let (backend, session) = session();
        let session = session.with_monitor(Arc::new(FixedMonitor(Some(true))), true);
        let outcome = session
            .execute(&Request::Block {
                region: "EU".into(),
                ip_dir: None,
            })
            .await;
        assert_eq!(
            outcome.line,
            "ERROR: Failed to block IPs: Cannot block while Overwatch.exe is running. Please close it first."
        );
        assert_eq!(outcome.exit_code(), exit_code::PROCESS_CHECK);
        assert!(backend.rule_names().is_empty());
    }

    #[tokio::test]
    async fn test_block_reports_failed_process_check() {
        let (_, session) = session();
        let session = session.with_monitor(Arc::new(FixedMonitor(None)), true);
        let outcome = session
            .execute(&Request::Block {
                region: "EU".into(),
                ip_dir: None,
            })
            .await;
        assert_eq!(
            outcome.line,
            "ERROR: Failed to block IPs: Process check failed: tasklist exited with 1"
        );
        assert_eq!(outcome.exit_code(), exit_code::PROCESS_CHECK);
    }

    #[tokio::test]
    async fn test_block_allowed_without_guard() {
        let (_, session) = session();
        // Guard off: the running program is not consulted, the missing path is
        let session = session.with_monitor(Arc::new(FixedMonitor(Some(true))), false);
        let outcome = session
            .execute(&Request::Block {
                region: "EU".into(),
                ip_dir: None,
            })
            .await;
        assert_eq!(
            outcome.line,
            "ERROR: Failed to block IPs: Overwatch path not configured"
        );
    }

    #[tokio::test]
    async fn test_serve_survives_non_utf8_line() {
        let (backend, session) = session();
        backend.insert_rule("OW-VPN-EU-Batch1-Out");
        let input: &[u8] = b"set-path|C:\\Jeux\\\xC9diteur\\x.exe\nstatus\n";
        let mut output = Vec::new();

        let reason = serve(&session, input, &mut output, &CancellationToken::new()).await;
        assert_eq!(reason, ExitReason::InputClosed);

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ERROR: Failed to set Overwatch path"));
        assert_eq!(lines[1], "Status: Ready - Overwatch path not configured");
        assert!(backend.rule_names().is_empty());
    }

    #[tokio::test]
    async fn test_serve_last_line_without_newline() {
        let (_, session) = session();
        let input: &[u8] = b"get-path";
        let mut output = Vec::new();

        let reason = serve(&session, input, &mut output, &CancellationToken::new()).await;
        assert_eq!(reason, ExitReason::InputClosed);
        assert_eq!(String::from_utf8(output).unwrap(), "Overwatch path not configured\n");
    }
}
