//! Schema version strings.
//!
//! Versions look like `7.1.0`, `7.1.0.2` or `7.1.0-SNAPSHOT`. A snapshot sorts
//! before the release it leads up to.

use flowstore_core::{Error, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

fn version_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:\.(\d+))?(-SNAPSHOT)?$").ok())
        .as_ref()
}

/// A parsed schema version.
///
/// A missing build number compares equal to build `0`.
#[derive(Debug, Clone, Copy)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: Option<u32>,
    pub snapshot: bool,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            build: None,
            snapshot: false,
        }
    }

    /// Whether a store at this version must be upgraded to run `library`.
    pub fn requires_upgrade(&self, library: &SchemaVersion) -> bool {
        self < library
    }

    fn release_key(&self) -> (u32, u32, u32, u32) {
        (self.major, self.minor, self.patch, self.build.unwrap_or(0))
    }
}

impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release_key()
            .cmp(&other.release_key())
            .then_with(|| other.snapshot.cmp(&self.snapshot))
    }
}

impl PartialEq for SchemaVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SchemaVersion {}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(build) = self.build {
            write!(f, ".{build}")?;
        }
        if self.snapshot {
            f.write_str("-SNAPSHOT")?;
        }
        Ok(())
    }
}

impl FromStr for SchemaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Config(format!("invalid schema version '{s}'"));
        let captures = version_pattern()
            .and_then(|pattern| pattern.captures(s.trim()))
            .ok_or_else(invalid)?;
        let number = |index: usize| -> Result<Option<u32>> {
            captures
                .get(index)
                .map(|m| m.as_str().parse::<u32>().map_err(|_| invalid()))
                .transpose()
        };
        Ok(Self {
            major: number(1)?.ok_or_else(invalid)?,
            minor: number(2)?.ok_or_else(invalid)?,
            patch: number(3)?.ok_or_else(invalid)?,
            build: number(4)?,
            snapshot: captures.get(5).is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> SchemaVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(v("7.1.0"), SchemaVersion::new(7, 1, 0));
        let build = v("7.1.0.2");
        assert_eq!(build.build, Some(2));
        assert!(!build.snapshot);
        let snapshot = v("7.2.0-SNAPSHOT");
        assert!(snapshot.snapshot);
        assert_eq!(snapshot.to_string(), "7.2.0-SNAPSHOT");
        assert_eq!(build.to_string(), "7.1.0.2");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "7", "7.1", "v7.1.0", "7.1.0-beta", "7.1.0.1.1", "99999999999.0.0"] {
            let err = bad.parse::<SchemaVersion>().unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{bad}");
        }
    }

    #[test]
    fn test_ordering() {
        assert!(v("6.8.0") < v("7.0.0"));
        assert!(v("7.0.0") < v("7.0.0.1"));
        assert_eq!(v("7.0.0").cmp(&v("7.0.0.0")), Ordering::Equal);
        assert!(v("7.1.0-SNAPSHOT") < v("7.1.0"));
        assert!(v("7.0.9") < v("7.1.0-SNAPSHOT"));
    }

    #[test]
    fn test_requires_upgrade() {
        let library = v("7.1.0");
        assert!(v("7.0.3").requires_upgrade(&library));
        assert!(!v("7.1.0").requires_upgrade(&library));
        assert!(!v("7.2.0").requires_upgrade(&library));
    }
}
