use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::Dependency;

/// Four-level severity. Ordering is by criticality, so `max()` picks the
/// most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Parses the textual labels sources use (`HIGH`, `moderate`, ...).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_uppercase().as_str() {
            "CRITICAL" => Some(Severity::Critical),
            "HIGH" | "IMPORTANT" => Some(Severity::High),
            "MEDIUM" | "MODERATE" => Some(Severity::Medium),
            "LOW" => Some(Severity::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The vulnerability databases consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceKind {
    Nvd,
    Osv,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Nvd => "NVD",
            SourceKind::Osv => "OSV",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A version range reported as vulnerable: `introduced <= v < fixed`, or
/// `introduced <= v <= last_affected`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introduced: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_affected: Option<String>,
}

/// One advisory as a single source reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawVulnerabilityRecord {
    pub source: SourceKind,
    /// `CVE-...` for NVD; `GHSA-...`, `PYSEC-...`, `CVE-...` etc. for OSV.
    pub source_id: String,
    /// Other identifiers for the same advisory.
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub affected_ranges: Vec<AffectedRange>,
    pub fixed_version: Option<String>,
    pub severity: Severity,
    pub cvss_score: Option<f32>,
    /// Short title, when the source has one.
    pub summary: Option<String>,
    pub description: String,
    #[serde(default)]
    pub references: Vec<String>,
}

impl RawVulnerabilityRecord {
    /// Every identifier attached to this record, primary id first.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.source_id.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    pub fn cve_ids(&self) -> impl Iterator<Item = &str> {
        self.identifiers().filter(|id| is_cve_id(id))
    }

    pub fn has_cve(&self) -> bool {
        self.cve_ids().next().is_some()
    }
}

pub fn is_cve_id(id: &str) -> bool {
    id.len() > 4 && id.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("CVE-"))
}

/// A group of raw records judged to describe the same vulnerability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityCluster {
    pub cve_ids: BTreeSet<String>,
    pub advisory_ids: BTreeSet<String>,
    pub severity: Severity,
    pub fixed_version: Option<String>,
    pub sources: BTreeSet<SourceKind>,
}

/// Cross-source view of everything known to affect one dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedFinding {
    pub dependency: Dependency,
    pub cve_ids: BTreeSet<String>,
    /// Non-CVE identifiers (GHSA, PYSEC, RUSTSEC...).
    pub advisory_ids: BTreeSet<String>,
    pub severity: Severity,
    pub fixed_version: Option<String>,
    pub sources: BTreeSet<SourceKind>,
    pub descriptions: Vec<String>,
    pub summary: String,
    pub changelog_url: Option<String>,
    pub clusters: Vec<VulnerabilityCluster>,
}

impl MergedFinding {
    /// All identifiers, CVEs first, for display.
    pub fn all_ids(&self) -> Vec<String> {
        self.cve_ids
            .iter()
            .chain(self.advisory_ids.iter())
            .cloned()
            .collect()
    }
}
