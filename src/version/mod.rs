//! Version parsing and comparison.
//!
//! Manifests across ecosystems use wildly different version spellings
//! (`v1.2.3`, `2.5.0.RELEASE`, `1.0rc1`, `4.17`). [`Version`] parses all of
//! them leniently into a numeric release tuple plus an optional pre-release
//! tag, and orders them the way SemVer would. Pre-release tags are compared
//! with `semver::Prerelease` rules when they are valid identifiers.
//!
//! Declared constraints (`^1.2`, `>=1.0,<2`, `[1.0,2.0)`, `~> 3.1`) live in
//! [`constraint`].

mod constraint;

pub use constraint::{affected_interval, Bound, Interval, VersionConstraint};

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::VersionError;

/// Qualifiers that mark a final release rather than a pre-release.
const RELEASE_QUALIFIERS: &[&str] = &["release", "final", "ga"];

/// A leniently parsed version.
#[derive(Debug, Clone)]
pub struct Version {
    release: Vec<u64>,
    pre: Option<String>,
    raw: String,
}

impl Version {
    /// Parses a version string, accepting a leading `v`/`=` and any number of
    /// numeric components.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let raw = input.trim();
        let trimmed = raw
            .trim_start_matches(['v', 'V', '='])
            .trim();

        // Fast path: strict SemVer.
        if let Ok(v) = semver::Version::parse(trimmed) {
            let pre = (!v.pre.is_empty()).then(|| v.pre.to_string());
            return Ok(Self {
                release: vec![v.major, v.minor, v.patch],
                pre,
                raw: raw.to_string(),
            });
        }

        let numeric_end = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (numeric, rest) = trimmed.split_at(numeric_end);
        let numeric = numeric.trim_end_matches('.');

        if numeric.is_empty() {
            return Err(VersionError::InvalidVersion(input.to_string()));
        }

        let mut release = Vec::new();
        for part in numeric.split('.') {
            let n = part
                .parse::<u64>()
                .map_err(|_| VersionError::InvalidVersion(input.to_string()))?;
            release.push(n);
        }

        // Build metadata never participates in ordering.
        let rest = rest.split('+').next().unwrap_or_default();
        let qualifier = rest.trim_start_matches(['-', '.', '_']);
        let pre = if qualifier.is_empty()
            || RELEASE_QUALIFIERS.contains(&qualifier.to_ascii_lowercase().as_str())
        {
            None
        } else {
            Some(qualifier.to_string())
        };

        Ok(Self {
            release,
            pre,
            raw: raw.to_string(),
        })
    }

    /// Builds a version from a release tuple; used for computed bounds.
    pub fn from_release(release: Vec<u64>) -> Self {
        let raw = release
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Self {
            release,
            pre: None,
            raw,
        }
    }

    /// Numeric release components as written (not padded).
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    /// The component at `idx`, with missing components read as zero.
    pub fn component(&self, idx: usize) -> u64 {
        self.release.get(idx).copied().unwrap_or(0)
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    /// The string this version was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether both versions share the same `major.minor.patch` tuple.
    pub fn same_patch_level(&self, other: &Version) -> bool {
        (0..3).all(|i| self.component(i) == other.component(i))
    }
}

fn compare_pre(a: &str, b: &str) -> Ordering {
    match (semver::Prerelease::new(a), semver::Prerelease::new(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            match self.component(i).cmp(&other.component(i)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => compare_pre(a, b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Returns true if `latest` is strictly newer than `current`.
///
/// Falls back to string inequality when either side does not parse, which
/// treats an unknown current version as not outdated.
pub fn is_newer(latest: &str, current: &str) -> bool {
    if let (Ok(latest_ver), Ok(current_ver)) = (Version::parse(latest), Version::parse(current)) {
        return latest_ver > current_ver;
    }

    if current == "unknown" {
        return false;
    }

    latest != current
}

/// Picks the higher of two version strings, preferring parseable ones.
pub fn max_version<'a>(a: &'a str, b: &'a str) -> &'a str {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(va), Ok(vb)) => {
            if vb > va {
                b
            } else {
                a
            }
        }
        (Err(_), Ok(_)) => b,
        _ => a,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_semver() {
        let ver = v("4.17.21");
        assert_eq!(ver.release(), &[4, 17, 21]);
        assert!(!ver.is_prerelease());
    }

    #[test]
    fn test_parse_lenient_forms() {
        assert_eq!(v("v1.2.3").release(), &[1, 2, 3]);
        assert_eq!(v("=2.0").release(), &[2, 0]);
        assert_eq!(v("1.2.3.4").release(), &[1, 2, 3, 4]);
        assert!(!v("5.3.20.RELEASE").is_prerelease());
        assert!(v("1.0rc1").is_prerelease());
        assert!(v("2.0.0-beta.2").is_prerelease());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Version::parse("latest").is_err());
        assert!(Version::parse("").is_err());
        assert!(Version::parse("${project.version}").is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(v("4.17.21") > v("4.17.19"));
        assert!(v("1.10.0") > v("1.9.9"));
        assert!(v("1.2") == v("1.2.0"));
        assert!(v("1.2.3.4") > v("1.2.3"));
        assert!(v("1.0.0-alpha") < v("1.0.0"));
        assert!(v("1.0.0-alpha.2") < v("1.0.0-alpha.10"));
    }

    #[test]
    fn test_same_patch_level() {
        assert!(v("4.17.21").same_patch_level(&v("v4.17.21")));
        assert!(v("1.2").same_patch_level(&v("1.2.0")));
        assert!(!v("4.17.21").same_patch_level(&v("4.17.19")));
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("4.17.21", "4.17.15"));
        assert!(!is_newer("4.17.15", "4.17.21"));
        assert!(!is_newer("1.0.0", "unknown"));
    }

    #[test]
    fn test_max_version() {
        assert_eq!(max_version("4.17.19", "4.17.21"), "4.17.21");
        assert_eq!(max_version("2.0.0", "1.9.9"), "2.0.0");
        assert_eq!(max_version("garbage", "1.0.0"), "1.0.0");
    }
}
