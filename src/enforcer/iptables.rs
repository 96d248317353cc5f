//! iptables backend for Linux hosts.
//!
//! Each logical rule becomes one iptables rule per address entry, all tagged
//! with `-m comment --comment <name>`. A logical rule is written with a
//! single `iptables-restore --noflush` call so it lands all at once.
//!
//! iptables cannot match the sending executable, so these rules drop the
//! listed addresses for every local process.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{debug, info};

use super::{run_blocking, PacketFilterBackend, RuleSpec};
use crate::batcher::Direction;
use crate::cmd_abstraction::{args_to_strings, CommandExecutor, SharedExecutor};
use crate::validation::AddressEntry;

/// Save/restore tool pair for one address family.
#[derive(Debug, Clone, Copy)]
struct Family {
    save: &'static str,
    restore: &'static str,
    ipv4: bool,
}

const FAMILIES: [Family; 2] = [
    Family {
        save: "iptables-save",
        restore: "iptables-restore",
        ipv4: true,
    },
    Family {
        save: "ip6tables-save",
        restore: "ip6tables-restore",
        ipv4: false,
    },
];

pub struct IptablesBackend {
    executor: SharedExecutor,
}

impl IptablesBackend {
    pub fn new(executor: SharedExecutor) -> Self {
        Self { executor }
    }
}

/// `-t filter` dump of one family.
fn save_table(executor: &dyn CommandExecutor, family: Family) -> Result<String> {
    let output = executor
        .execute(family.save, &args_to_strings(&["-t", "filter"]))
        .with_context(|| format!("Failed to run {}", family.save))?;
    if !output.success {
        anyhow::bail!("{} failed: {}", family.save, output.combined());
    }
    Ok(output.stdout)
}

/// Feed a filter-table script to `iptables-restore --noflush`.
fn restore(executor: &dyn CommandExecutor, family: Family, lines: &[String]) -> Result<()> {
    let mut script = String::from("*filter\n");
    for line in lines {
        script.push_str(line);
        script.push('\n');
    }
    script.push_str("COMMIT\n");

    let output = executor.execute_with_stdin(
        family.restore,
        &args_to_strings(&["--noflush", "--wait"]),
        &script,
    )?;
    if !output.success {
        anyhow::bail!("{} failed: {}", family.restore, output.combined());
    }
    Ok(())
}

/// One `-A` line per entry for `rule`, limited to the entries of `family`.
fn rule_lines(rule: &RuleSpec, family: Family) -> Vec<String> {
    let (chain, addr_flag, range_flag) = match rule.direction {
        Direction::Outbound => ("OUTPUT", "-d", "--dst-range"),
        Direction::Inbound => ("INPUT", "-s", "--src-range"),
    };

    rule.remote
        .iter()
        .filter(|entry| entry.is_ipv4() == family.ipv4)
        .map(|entry| {
            let matcher = match entry {
                AddressEntry::Range(start, end) => {
                    format!("-m iprange {} {}-{}", range_flag, start, end)
                }
                other => format!("{} {}", addr_flag, other),
            };
            format!(
                "-A {} {} -m comment --comment \"{}\" -j DROP",
                chain, matcher, rule.name
            )
        })
        .collect()
}

/// Comment value of an `iptables-save` rule line, quoted or bare.
fn comment_of(line: &str) -> Option<&str> {
    let rest = line.split("--comment ").nth(1)?;
    if let Some(quoted) = rest.strip_prefix('"') {
        quoted.split('"').next()
    } else {
        rest.split_whitespace().next()
    }
}

/// Distinct comments starting with `prefix` in a saved table.
fn parse_rule_names(saved: &str, prefix: &str) -> BTreeSet<String> {
    saved
        .lines()
        .filter(|line| line.starts_with("-A "))
        .filter_map(comment_of)
        .filter(|name| name.starts_with(prefix))
        .map(str::to_string)
        .collect()
}

/// Turn every saved `-A` line tagged `name` into the matching `-D` line.
fn delete_lines(saved: &str, name: &str) -> Vec<String> {
    saved
        .lines()
        .filter(|line| line.starts_with("-A ") && comment_of(line) == Some(name))
        .map(|line| format!("-D {}", &line[3..]))
        .collect()
}

#[async_trait]
impl PacketFilterBackend for IptablesBackend {
    fn name(&self) -> &'static str {
        "iptables"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let executor = self.executor.clone();
        let prefix = prefix.to_string();
        run_blocking(move || {
            let mut names = BTreeSet::new();
            for family in FAMILIES {
                let saved = save_table(executor.as_ref(), family)?;
                names.extend(parse_rule_names(&saved, &prefix));
            }
            Ok(names.into_iter().collect())
        })
        .await
    }

    async fn add(&self, rule: &RuleSpec) -> Result<()> {
        let executor = self.executor.clone();
        let rule = rule.clone();
        run_blocking(move || {
            for family in FAMILIES {
                let lines = rule_lines(&rule, family);
                if lines.is_empty() {
                    continue;
                }
                restore(executor.as_ref(), family, &lines)
                    .with_context(|| format!("Failed to create rule {}", rule.name))?;
            }
            info!(
                "Created rule {} ({} entries, program {} not matchable by iptables)",
                rule.name,
                rule.remote.len(),
                rule.program.display()
            );
            Ok(())
        })
        .await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let executor = self.executor.clone();
        let name = name.to_string();
        run_blocking(move || {
            for family in FAMILIES {
                let saved = save_table(executor.as_ref(), family)?;
                let lines = delete_lines(&saved, &name);
                if lines.is_empty() {
                    continue;
                }
                restore(executor.as_ref(), family, &lines)
                    .with_context(|| format!("Failed to delete rule {}", name))?;
            }
            debug!("Deleted rule {}", name);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::RuleName;
    use crate::cmd_abstraction::{CommandOutput, MockCommandExecutor};
    use crate::region::Region;
    use crate::validation::validate_entry;
    use std::path::PathBuf;
    use std::sync::Arc;

    const SAVED_V4: &str = "# Generated by iptables-save v1.8.9\n\
*filter\n\
:INPUT ACCEPT [0:0]\n\
:OUTPUT ACCEPT [0:0]\n\
-A INPUT -s 1.2.3.4/32 -m comment --comment \"OW-VPN-EU-Batch1-In\" -j DROP\n\
-A OUTPUT -d 1.2.3.4/32 -m comment --comment \"OW-VPN-EU-Batch1\" -j DROP\n\
-A OUTPUT -m iprange --dst-range 9.9.9.1-9.9.9.5 -m comment --comment \"OW-VPN-EU-Batch1\" -j DROP\n\
-A OUTPUT -d 8.8.8.8/32 -m comment --comment docker-dns -j ACCEPT\n\
-A INPUT -p tcp --dport 22 -j ACCEPT\n\
COMMIT\n";

    fn spec(direction: Direction) -> RuleSpec {
        RuleSpec {
            name: RuleName::new("OW-VPN-", Region::Europe, 1, direction),
            direction,
            program: PathBuf::from("/opt/game/game"),
            remote: vec![
                validate_entry("1.2.3.4").unwrap(),
                validate_entry("9.9.9.1-9.9.9.5").unwrap(),
                validate_entry("2001:db8::/48").unwrap(),
            ],
        }
    }

    #[test]
    fn test_rule_lines_outbound_v4() {
        let lines = rule_lines(&spec(Direction::Outbound), FAMILIES[0]);
        assert_eq!(
            lines,
            vec![
                "-A OUTPUT -d 1.2.3.4/32 -m comment --comment \"OW-VPN-EU-Batch1\" -j DROP",
                "-A OUTPUT -m iprange --dst-range 9.9.9.1-9.9.9.5 -m comment --comment \"OW-VPN-EU-Batch1\" -j DROP",
            ]
        );
    }

    #[test]
    fn test_rule_lines_inbound_v6() {
        let lines = rule_lines(&spec(Direction::Inbound), FAMILIES[1]);
        assert_eq!(
            lines,
            vec!["-A INPUT -s 2001:db8::/48 -m comment --comment \"OW-VPN-EU-Batch1-In\" -j DROP"]
        );
    }

    #[test]
    fn test_comment_of() {
        assert_eq!(
            comment_of("-A OUTPUT -m comment --comment \"a b\" -j DROP"),
            Some("a b")
        );
        assert_eq!(comment_of("-A OUTPUT -m comment --comment bare -j DROP"), Some("bare"));
        assert_eq!(comment_of("-A INPUT -j ACCEPT"), None);
    }

    #[test]
    fn test_parse_rule_names() {
        let names = parse_rule_names(SAVED_V4, "OW-VPN-");
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["OW-VPN-EU-Batch1", "OW-VPN-EU-Batch1-In"]
        );
        assert!(parse_rule_names(SAVED_V4, "OW-VPN-NA-").is_empty());
    }

    #[test]
    fn test_delete_lines() {
        let lines = delete_lines(SAVED_V4, "OW-VPN-EU-Batch1");
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.starts_with("-D OUTPUT ")));
        assert!(delete_lines(SAVED_V4, "OW-VPN-EU-Batch1-In")[0].starts_with("-D INPUT -s 1.2.3.4/32"));
    }

    #[tokio::test]
    async fn test_add_restores_each_family() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute_with_stdin()
            .withf(|cmd, args, stdin| {
                cmd == "iptables-restore"
                    && args.contains(&"--noflush".to_string())
                    && stdin.starts_with("*filter\n")
                    && stdin.matches("-A OUTPUT").count() == 2
                    && stdin.ends_with("COMMIT\n")
            })
            .times(1)
            .returning(|_, _, _| Ok(CommandOutput::ok("")));
        mock.expect_execute_with_stdin()
            .withf(|cmd, _, stdin| cmd == "ip6tables-restore" && stdin.contains("2001:db8::/48"))
            .times(1)
            .returning(|_, _, _| Ok(CommandOutput::ok("")));

        let backend = IptablesBackend::new(Arc::new(mock));
        backend.add(&spec(Direction::Outbound)).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_merges_families() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|cmd, _| cmd == "iptables-save")
            .returning(|_, _| Ok(CommandOutput::ok(SAVED_V4)));
        mock.expect_execute()
            .withf(|cmd, _| cmd == "ip6tables-save")
            .returning(|_, _| {
                Ok(CommandOutput::ok(
                    "*filter\n-A OUTPUT -d 2001:db8::/48 -m comment --comment \"OW-VPN-As-Batch1\" -j DROP\nCOMMIT\n",
                ))
            });

        let backend = IptablesBackend::new(Arc::new(mock));
        let names = backend.list("OW-VPN-").await.unwrap();
        assert_eq!(
            names,
            vec!["OW-VPN-As-Batch1", "OW-VPN-EU-Batch1", "OW-VPN-EU-Batch1-In"]
        );
    }

    #[tokio::test]
    async fn test_delete_skips_family_without_rule() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|cmd, _| cmd == "iptables-save")
            .returning(|_, _| Ok(CommandOutput::ok(SAVED_V4)));
        mock.expect_execute()
            .withf(|cmd, _| cmd == "ip6tables-save")
            .returning(|_, _| Ok(CommandOutput::ok("*filter\nCOMMIT\n")));
        mock.expect_execute_with_stdin()
            .withf(|cmd, _, stdin| cmd == "iptables-restore" && stdin.contains("-D INPUT"))
            .times(1)
            .returning(|_, _, _| Ok(CommandOutput::ok("")));

        let backend = IptablesBackend::new(Arc::new(mock));
        backend.delete("OW-VPN-EU-Batch1-In").await.unwrap();
    }

    #[tokio::test]
    async fn test_save_failure_propagates() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().returning(|_, _| {
            Ok(CommandOutput {
                stderr: "Permission denied (you must be root)".into(),
                ..CommandOutput::default()
            })
        });

        let backend = IptablesBackend::new(Arc::new(mock));
        let err = backend.list("OW-VPN-").await.unwrap_err();
        assert!(err.to_string().contains("must be root"));
    }
}
