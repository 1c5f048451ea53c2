use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::{Dependency, Ecosystem, MergedFinding, Severity, SourceKind};

/// What the caller asks to scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub root: PathBuf,
    /// Restrict the scan to these ecosystems; empty means all.
    #[serde(default)]
    pub ecosystems: Vec<Ecosystem>,
}

impl ScanRequest {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ecosystems: Vec::new(),
        }
    }

    pub fn with_ecosystems(mut self, ecosystems: Vec<Ecosystem>) -> Self {
        self.ecosystems = ecosystems;
        self
    }

    pub fn includes(&self, ecosystem: Ecosystem) -> bool {
        self.ecosystems.is_empty() || self.ecosystems.contains(&ecosystem)
    }
}

/// The remediation instructions for one merged finding.
///
/// `warning.is_some() == requires_upgrade` always holds; plans are only built
/// by [`crate::remediation::classify`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "FindingRecord")]
pub struct RemediationPlan {
    pub dependency: Dependency,
    pub merged_finding: MergedFinding,
    pub requires_upgrade: bool,
    pub target_version: Option<String>,
    pub warning: Option<String>,
    pub steps: Vec<String>,
    /// Prose produced by an optional external narrator.
    pub narrative: Option<String>,
}

impl RemediationPlan {
    pub fn severity(&self) -> Severity {
        self.merged_finding.severity
    }
}

/// Flat, stable wire shape of a [`RemediationPlan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingRecord {
    pub package: String,
    pub ecosystem: Ecosystem,
    pub current_version: String,
    pub manifest_path: PathBuf,
    pub severity: Severity,
    pub cve_ids: BTreeSet<String>,
    pub advisory_ids: BTreeSet<String>,
    pub fixed_version: Option<String>,
    pub requires_upgrade: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub steps: Vec<String>,
    pub sources: BTreeSet<SourceKind>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
}

impl From<RemediationPlan> for FindingRecord {
    fn from(plan: RemediationPlan) -> Self {
        let finding = plan.merged_finding;
        Self {
            package: plan.dependency.name,
            ecosystem: plan.dependency.ecosystem,
            current_version: plan.dependency.declared_version,
            manifest_path: plan.dependency.manifest_path,
            severity: finding.severity,
            cve_ids: finding.cve_ids,
            advisory_ids: finding.advisory_ids,
            fixed_version: plan.target_version,
            requires_upgrade: plan.requires_upgrade,
            warning: plan.warning,
            steps: plan.steps,
            sources: finding.sources,
            summary: finding.summary,
            narrative: plan.narrative,
        }
    }
}

/// Why something was degraded during the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    ManifestParse,
    SourceUnavailable,
    RateLimited,
    MalformedResponse,
    AmbiguousVersionRange,
}

/// A recoverable problem recorded in the report instead of failing the scan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScanWarning {
    pub kind: WarningKind,
    /// The manifest path or package the warning is about.
    pub subject: String,
    pub message: String,
}

/// A dependency whose queries did not finish before the scan deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteDependency {
    pub package: String,
    pub ecosystem: Ecosystem,
    pub current_version: String,
    pub manifest_path: PathBuf,
    pub reason: String,
}

/// Complete scan results.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_time: DateTime<Utc>,
    pub root: PathBuf,
    pub total_scanned: usize,
    pub vulnerable_count: usize,
    pub manifests_found: Vec<PathBuf>,
    pub findings: Vec<RemediationPlan>,
    pub incomplete: Vec<IncompleteDependency>,
    pub warnings: Vec<ScanWarning>,
    pub notices: Vec<String>,
}

impl ScanReport {
    pub fn new(root: PathBuf) -> Self {
        Self {
            scan_time: Utc::now(),
            root,
            total_scanned: 0,
            vulnerable_count: 0,
            manifests_found: Vec::new(),
            findings: Vec::new(),
            incomplete: Vec::new(),
            warnings: Vec::new(),
            notices: Vec::new(),
        }
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(RemediationPlan::severity).max()
    }

    /// Number of findings at each severity, most severe first.
    pub fn severity_counts(&self) -> [(Severity, usize); 4] {
        [Severity::Critical, Severity::High, Severity::Medium, Severity::Low].map(|sev| {
            (
                sev,
                self.findings.iter().filter(|p| p.severity() == sev).count(),
            )
        })
    }

    pub fn is_complete(&self) -> bool {
        self.incomplete.is_empty()
    }
}
