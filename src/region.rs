//! Geographic regions that can be blocked.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::FirewallError;

/// A region as produced by the IP-list fetcher.
///
/// The string codes double as list file stems and as the region part of rule
/// names, so they must stay in sync with the fetcher's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    Europe,
    NorthAmerica,
    SouthAmerica,
    Africa,
    Asia,
    MiddleEast,
    Oceania,
    /// Addresses without a known country; never turned into rules.
    Unknown,
}

impl Region {
    /// Regions that can be blocked.
    pub const BLOCKABLE: [Region; 7] = [
        Region::Europe,
        Region::NorthAmerica,
        Region::SouthAmerica,
        Region::Africa,
        Region::Asia,
        Region::MiddleEast,
        Region::Oceania,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Region::Europe => "EU",
            Region::NorthAmerica => "NA",
            Region::SouthAmerica => "SA",
            Region::Africa => "Afr",
            Region::Asia => "As",
            Region::MiddleEast => "ME",
            Region::Oceania => "Oce",
            Region::Unknown => "Unknown",
        }
    }

    pub fn is_blockable(&self) -> bool {
        *self != Region::Unknown
    }

    /// Path of this region's list file inside `dir`.
    pub fn list_file(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.txt", self.code()))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Region {
    type Err = FirewallError;

    /// Case-insensitive match on the region code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Region::BLOCKABLE
            .iter()
            .chain(std::iter::once(&Region::Unknown))
            .find(|r| r.code().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| FirewallError::InvalidRegion(s.to_string()))
    }
}
