//! Windows Defender Firewall backend driven through `netsh advfirewall`.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::debug;

use super::{run_blocking, PacketFilterBackend, RuleSpec};
use crate::cmd_abstraction::{args_to_strings, run_checked, SharedExecutor};

const NETSH: &str = "netsh";

/// netsh prints this (and exits 1) when a name matches nothing.
const NO_MATCH: &str = "No rules match the specified criteria";

pub struct NetshBackend {
    executor: SharedExecutor,
}

impl NetshBackend {
    pub fn new(executor: SharedExecutor) -> Self {
        Self { executor }
    }

    fn firewall_args(args: &[&str]) -> Vec<String> {
        let mut full = args_to_strings(&["advfirewall", "firewall"]);
        full.extend(args_to_strings(args));
        full
    }

    fn add_args(rule: &RuleSpec) -> Vec<String> {
        let mut args = Self::firewall_args(&["add", "rule"]);
        args.push(format!("name={}", rule.name));
        args.push(format!("dir={}", rule.direction.keyword()));
        args.push("action=block".to_string());
        args.push(format!("program={}", rule.program.display()));
        args.push(format!("remoteip={}", rule.remote_addresses()));
        args
    }
}

#[async_trait]
impl PacketFilterBackend for NetshBackend {
    fn name(&self) -> &'static str {
        "netsh"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let executor = self.executor.clone();
        let prefix = prefix.to_string();
        run_blocking(move || {
            let args = Self::firewall_args(&["show", "rule", "name=all"]);
            let output = executor.execute(NETSH, &args)?;
            if !output.success {
                if output.combined().contains(NO_MATCH) {
                    return Ok(Vec::new());
                }
                anyhow::bail!("Failed to list firewall rules: {}", output.combined());
            }
            Ok(parse_rule_names(&output.stdout, &prefix))
        })
        .await
    }

    async fn add(&self, rule: &RuleSpec) -> Result<()> {
        let executor = self.executor.clone();
        let args = Self::add_args(rule);
        let name = rule.name.to_string();
        run_blocking(move || {
            run_checked(executor.as_ref(), NETSH, &args)
                .map_err(|e| anyhow::anyhow!("Failed to create rule {}: {}", name, e))?;
            debug!("Created rule {}", name);
            Ok(())
        })
        .await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let executor = self.executor.clone();
        let name = name.to_string();
        run_blocking(move || {
            let args = Self::firewall_args(&["delete", "rule", &format!("name={}", name)]);
            let output = executor.execute(NETSH, &args)?;
            if output.success || output.combined().contains(NO_MATCH) {
                debug!("Deleted rule {}", name);
                Ok(())
            } else {
                anyhow::bail!("Failed to delete rule {}: {}", name, output.combined())
            }
        })
        .await
    }
}

/// Pull `Rule Name:` values starting with `prefix` out of `show rule` output.
fn parse_rule_names(output: &str, prefix: &str) -> Vec<String> {
    let names: BTreeSet<String> = output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.trim() != "Rule Name" {
                return None;
            }
            let value = value.trim();
            value.starts_with(prefix).then(|| value.to_string())
        })
        .collect();
    names.into_iter().collect()
}
