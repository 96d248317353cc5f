//! Run-state of the protected program.
//!
//! The daemon never decides on its own whether the program is running; a
//! [`ProgramMonitor`] is handed to the control session, which uses it as a
//! precondition for blocking.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::cmd_abstraction::{args_to_strings, SharedExecutor};
use crate::enforcer::run_blocking;

#[async_trait]
pub trait ProgramMonitor: Send + Sync {
    /// Name shown to the user ("Overwatch.exe").
    fn program_name(&self) -> &str;

    async fn is_running(&self) -> Result<bool>;
}

/// Always reports the program as stopped.
#[derive(Debug, Clone, Default)]
pub struct NoopMonitor;

#[async_trait]
impl ProgramMonitor for NoopMonitor {
    fn program_name(&self) -> &str {
        "program"
    }

    async fn is_running(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Looks the program up in the OS process list by image name.
pub struct ProcessListMonitor {
    executor: SharedExecutor,
    image_name: String,
}

impl ProcessListMonitor {
    pub fn new(executor: SharedExecutor, image_name: impl Into<String>) -> Self {
        Self {
            executor,
            image_name: image_name.into(),
        }
    }
}

#[async_trait]
impl ProgramMonitor for ProcessListMonitor {
    fn program_name(&self) -> &str {
        &self.image_name
    }

    async fn is_running(&self) -> Result<bool> {
        let executor = self.executor.clone();
        let image = self.image_name.clone();
        let running = run_blocking(move || {
            if cfg!(windows) {
                let filter = format!("IMAGENAME eq {}", image);
                let output = executor.execute(
                    "tasklist",
                    &args_to_strings(&["/FI", &filter, "/NH", "/FO", "CSV"]),
                )?;
                if !output.success {
                    anyhow::bail!("tasklist failed: {}", output.combined());
                }
                Ok(tasklist_contains(&output.stdout, &image))
            } else {
                let output = executor.execute("pgrep", &args_to_strings(&["-x", &image]))?;
                // pgrep: 0 = match, 1 = no match, anything else is an error
                match output.code {
                    Some(0) => Ok(true),
                    Some(1) => Ok(false),
                    _ => anyhow::bail!("pgrep failed: {}", output.combined()),
                }
            }
        })
        .await?;

        debug!("{} running: {}", self.image_name, running);
        Ok(running)
    }
}

/// Whether CSV `tasklist` output lists `image`.
fn tasklist_contains(output: &str, image: &str) -> bool {
    output.lines().any(|line| {
        line.split(',')
            .next()
            .map(|first| first.trim().trim_matches('"'))
            .is_some_and(|name| name.eq_ignore_ascii_case(image))
    })
}
