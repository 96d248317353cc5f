//! Splitting address lists into rule-sized batches and naming the rules.

use std::fmt;

use crate::region::Region;
use crate::validation::AddressEntry;

/// Traffic direction of a block rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    /// Keyword used by `netsh ... dir=`.
    pub fn keyword(&self) -> &'static str {
        match self {
            Direction::Inbound => "in",
            Direction::Outbound => "out",
        }
    }
}

/// How many entries go into one rule.
///
/// netsh rejects overly long `remoteip=` arguments, so large lists are split
/// across several rules. Small lists use small batches to keep failures
/// contained, large lists use big batches to keep the rule count down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPolicy {
    Fixed(usize),
    Adaptive {
        small: usize,
        default: usize,
        large: usize,
        /// Lists shorter than this use `small`
        small_below: usize,
        /// Lists longer than this use `large`
        large_above: usize,
    },
}

impl Default for BatchPolicy {
    fn default() -> Self {
        BatchPolicy::Adaptive {
            small: 10,
            default: 25,
            large: 50,
            small_below: 100,
            large_above: 1000,
        }
    }
}

impl BatchPolicy {
    /// Batch size for a list of `total` entries (never zero).
    pub fn batch_size(&self, total: usize) -> usize {
        let size = match *self {
            BatchPolicy::Fixed(size) => size,
            BatchPolicy::Adaptive {
                small,
                default,
                large,
                small_below,
                large_above,
            } => {
                if total > large_above {
                    large
                } else if total < small_below {
                    small
                } else {
                    default
                }
            }
        };
        size.max(1)
    }
}

/// Name of a rule owned by this daemon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleName(String);

impl RuleName {
    /// `<prefix><region>-Batch<n>`, with `-In` appended for inbound rules.
    pub fn new(prefix: &str, region: Region, batch: usize, direction: Direction) -> Self {
        let mut name = format!("{}{}-Batch{}", prefix, region.code(), batch);
        if direction == Direction::Inbound {
            name.push_str("-In");
        }
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RuleName> for String {
    fn from(name: RuleName) -> Self {
        name.0
    }
}

/// Prefix shared by all rules of `region`.
///
/// The trailing dash keeps one region code from matching another that
/// happens to start with it.
pub fn region_prefix(owner_prefix: &str, region: Region) -> String {
    format!("{}{}-", owner_prefix, region.code())
}

/// One group of entries and the pair of rules that will carry it.
#[derive(Debug, Clone)]
pub struct Batch {
    /// 1-based, in creation order
    pub index: usize,
    pub entries: Vec<AddressEntry>,
    pub outbound: RuleName,
    pub inbound: RuleName,
}


/// Split `entries` into batches for `region`.
pub fn plan_batches(
    entries: &[AddressEntry],
    region: Region,
    owner_prefix: &str,
    policy: BatchPolicy,
) -> Vec<Batch> {
    let size = policy.batch_size(entries.len());
    entries
        .chunks(size)
        .enumerate()
        .map(|(i, chunk)| {
            let index = i + 1;
            Batch {
                index,
                entries: chunk.to_vec(),
                outbound: RuleName::new(owner_prefix, region, index, Direction::Outbound),
                inbound: RuleName::new(owner_prefix, region, index, Direction::Inbound),
            }
        })
        .collect()
}
