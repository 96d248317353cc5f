//! Bounded-parallel execution of rule mutations.
//!
//! All tasks of one request are driven through a single stream with at most
//! `concurrency` calls in flight, then joined into one [`ExecutionReport`].
//! There are no retries: a failed task is recorded and the rest carry on.

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::enforcer::{PacketFilterBackend, RuleSpec};

/// Default ceiling on simultaneous backend calls.
pub const DEFAULT_CONCURRENCY: usize = 20;

/// One rule mutation.
#[derive(Debug, Clone)]
pub enum RuleTask {
    Add(RuleSpec),
    Delete(String),
}

impl RuleTask {
    pub fn rule_name(&self) -> &str {
        match self {
            RuleTask::Add(spec) => spec.name.as_str(),
            RuleTask::Delete(name) => name,
        }
    }
}

/// A task that failed, with the backend's message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub rule: String,
    pub message: String,
}

/// Aggregate of one executor run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<TaskFailure>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// First failure, used as the representative error.
    pub fn first_failure(&self) -> Option<&TaskFailure> {
        self.failures.first()
    }
}

/// Runs [`RuleTask`]s against a backend with bounded parallelism.
#[derive(Debug, Clone, Copy)]
pub struct RuleExecutor {
    concurrency: usize,
}

impl Default for RuleExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl RuleExecutor {
    /// A ceiling of zero is treated as one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Execute every task once and wait for all of them.
    pub async fn run(
        &self,
        backend: &dyn PacketFilterBackend,
        tasks: Vec<RuleTask>,
    ) -> ExecutionReport {
        let attempted = tasks.len();
        debug!(
            "Executing {} rule tasks on {} (max {} in flight)",
            attempted,
            backend.name(),
            self.concurrency
        );

        let results: Vec<(String, anyhow::Result<()>)> = stream::iter(tasks)
            .map(|task| async move {
                let result = match &task {
                    RuleTask::Add(spec) => backend.add(spec).await,
                    RuleTask::Delete(name) => backend.delete(name).await,
                };
                (task.rule_name().to_string(), result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = ExecutionReport {
            attempted,
            ..ExecutionReport::default()
        };
        for (rule, result) in results {
            match result {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!("Rule task for {} failed: {:#}", rule, e);
                    report.failures.push(TaskFailure {
                        rule,
                        message: format!("{:#}", e),
                    });
                }
            }
        }
        report
    }
}
