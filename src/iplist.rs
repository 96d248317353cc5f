//! Region IP list reader.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{FirewallError, FirewallResult};
use crate::region::Region;
use crate::validation::{validate_entry, AddressEntry};

/// Validated contents of one region list file.
#[derive(Debug, Clone)]
pub struct IpList {
    pub path: PathBuf,
    /// Deduplicated entries in first-seen order
    pub entries: Vec<AddressEntry>,
    /// Lines dropped because they failed validation
    pub invalid: usize,
    /// Valid lines dropped because they repeated an earlier entry
    pub duplicates: usize,
}

impl IpList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Load and validate the list for `region` from `dir`.
pub fn read_region_list(region: Region, dir: &Path) -> FirewallResult<IpList> {
    read_list_file(&region.list_file(dir))
}

/// Load and validate one list file.
pub fn read_list_file(path: &Path) -> FirewallResult<IpList> {
    let metadata =
        fs::metadata(path).map_err(|_| FirewallError::ListNotFound(path.to_path_buf()))?;
    if !metadata.is_file() {
        return Err(FirewallError::ListNotFound(path.to_path_buf()));
    }
    if metadata.len() == 0 {
        return Err(FirewallError::ListEmpty(path.to_path_buf()));
    }

    let bytes = fs::read(path).map_err(|source| FirewallError::ListRead {
        path: path.to_path_buf(),
        source,
    })?;

    // Undecodable bytes become U+FFFD, so only the lines holding them fail
    let content = String::from_utf8_lossy(&bytes);
    let list = parse_list(path, &content);
    if list.is_empty() {
        return Err(FirewallError::NoValidEntries(path.to_path_buf()));
    }

    if list.invalid > 0 {
        warn!(
            "Removed {} invalid entries from {}",
            list.invalid,
            path.display()
        );
    }
    debug!(
        "Read {} entries from {} ({} duplicates skipped)",
        list.len(),
        path.display(),
        list.duplicates
    );
    Ok(list)
}

/// Parse list text: skip blanks and `#` comments, validate, deduplicate.
pub fn parse_list(path: &Path, content: &str) -> IpList {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    let mut invalid = 0;
    let mut duplicates = 0;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match validate_entry(line) {
            Ok(entry) => {
                // Key on the rendered form so "1.2.3.4" and "1.2.3.4/32" collapse
                if seen.insert(entry.to_string()) {
                    entries.push(entry);
                } else {
                    duplicates += 1;
                }
            }
            Err(e) => {
                debug!("Skipping entry: {}", e);
                invalid += 1;
            }
        }
    }

    IpList {
        path: path.to_path_buf(),
        entries,
        invalid,
        duplicates,
    }
}
