use async_trait::async_trait;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vulscan::error::{ScanError, SourceError};
use vulscan::model::{
    AffectedRange, Dependency, RawVulnerabilityRecord, ScanRequest, Severity, SourceKind, WarningKind,
};
use vulscan::orchestrator::Orchestrator;
use vulscan::remediation::UPGRADE_WARNING;
use vulscan::source::VulnerabilitySource;

enum Behavior {
    Answer,
    RateLimitedFirst(u32),
    Malformed,
    HangOn(&'static str),
}

/// A source that answers from a fixed table keyed by package name.
struct Scripted {
    kind: SourceKind,
    records: Vec<(&'static str, RawVulnerabilityRecord)>,
    behavior: Behavior,
    calls: AtomicU32,
}

impl Scripted {
    fn new(kind: SourceKind, records: Vec<(&'static str, RawVulnerabilityRecord)>) -> Self {
        Self {
            kind,
            records,
            behavior: Behavior::Answer,
            calls: AtomicU32::new(0),
        }
    }

    fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }
}

#[async_trait]
impl VulnerabilitySource for Scripted {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn query(&self, dependency: &Dependency) -> Result<Vec<RawVulnerabilityRecord>, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::RateLimitedFirst(n) if call < n => {
                return Err(SourceError::RateLimited {
                    source_kind: self.kind,
                    retry_after: None,
                })
            }
            Behavior::Malformed => {
                return Err(SourceError::MalformedResponse {
                    source_kind: self.kind,
                    reason: "missing field `vulns`".to_string(),
                })
            }
            Behavior::HangOn(name) if dependency.name == name => {
                std::future::pending::<()>().await;
            }
            _ => {}
        }

        Ok(self
            .records
            .iter()
            .filter(|(name, _)| *name == dependency.name)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

fn record(
    source: SourceKind,
    id: &str,
    aliases: &[&str],
    severity: Severity,
    fixed: Option<&str>,
    description: &str,
) -> RawVulnerabilityRecord {
    RawVulnerabilityRecord {
        source,
        source_id: id.to_string(),
        aliases: aliases.iter().map(|s| s.to_string()).collect(),
        affected_ranges: fixed
            .map(|f| {
                vec![AffectedRange {
                    introduced: Some("0".to_string()),
                    fixed: Some(f.to_string()),
                    last_affected: None,
                }]
            })
            .unwrap_or_default(),
        fixed_version: fixed.map(str::to_string),
        severity,
        cvss_score: None,
        summary: None,
        description: description.to_string(),
        references: vec![],
    }
}

fn lodash_nvd() -> Scripted {
    Scripted::new(
        SourceKind::Nvd,
        vec![
            (
                "lodash",
                record(SourceKind::Nvd, "CVE-2021-23337", &[], Severity::High, Some("4.17.21"), "Command injection via template."),
            ),
            (
                "lodash",
                record(SourceKind::Nvd, "CVE-2020-28500", &[], Severity::Medium, Some("4.17.21"), "ReDoS via toNumber."),
            ),
        ],
    )
}

fn lodash_osv() -> Scripted {
    Scripted::new(
        SourceKind::Osv,
        vec![
            (
                "lodash",
                record(SourceKind::Osv, "GHSA-35jh-r3h4-6jhm", &["CVE-2021-23337"], Severity::High, Some("4.17.21"), "Command injection via template."),
            ),
            (
                "lodash",
                record(SourceKind::Osv, "GHSA-29mw-wpgm-hmr9", &["CVE-2020-28500"], Severity::Medium, Some("4.17.21"), "ReDoS via toNumber."),
            ),
        ],
    )
}

fn npm_project(dir: &Path) {
    fs::write(
        dir.join("package.json"),
        r#"{"name": "app", "dependencies": {"lodash": "4.17.15", "express": "4.18.2"}}"#,
    )
    .unwrap();
}

fn orchestrator(sources: Vec<Arc<dyn VulnerabilitySource>>) -> Orchestrator {
    Orchestrator::new(sources)
}

#[tokio::test]
async fn lodash_merges_across_sources() {
    let dir = tempfile::tempdir().unwrap();
    npm_project(dir.path());

    let report = orchestrator(vec![Arc::new(lodash_nvd()), Arc::new(lodash_osv())])
        .scan(&ScanRequest::new(dir.path()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total_scanned, 2);
    assert_eq!(report.vulnerable_count, 1);
    assert!(report.warnings.is_empty());
    assert!(report.is_complete());

    let plan = &report.findings[0];
    let finding = &plan.merged_finding;
    assert_eq!(plan.dependency.name, "lodash");
    assert_eq!(
        finding.cve_ids.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["CVE-2020-28500", "CVE-2021-23337"]
    );
    assert_eq!(finding.severity, Severity::High);
    assert_eq!(finding.fixed_version.as_deref(), Some("4.17.21"));
    assert_eq!(finding.sources.len(), 2);

    assert!(plan.requires_upgrade);
    assert_eq!(plan.warning.as_deref(), Some(UPGRADE_WARNING));
    assert_eq!(plan.steps.len(), 5);
    assert_eq!(plan.steps[0], "Update lodash in package.json to version 4.17.21");
    assert_eq!(plan.steps[1], "npm install lodash@4.17.21");
    assert!(plan.steps[2].starts_with("Review changelog: "));
    assert_eq!(plan.steps[3], "Run full test suite");
    assert_eq!(plan.steps[4], "Deploy to staging and monitor");
}

#[tokio::test]
async fn lodash_conflicting_fixes_resolve_to_highest() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("package.json"), r#"{"dependencies": {"lodash": "4.17.15"}}"#).unwrap();

    let mut redos = record(SourceKind::Nvd, "CVE-2020-28500", &[], Severity::Medium, Some("4.17.19"), "ReDoS via toNumber.");
    redos.cvss_score = Some(5.3);
    let nvd = Scripted::new(SourceKind::Nvd, vec![("lodash", redos)]);
    let osv = Scripted::new(
        SourceKind::Osv,
        vec![(
            "lodash",
            record(SourceKind::Osv, "GHSA-35jh-r3h4-6jhm", &["CVE-2021-23337"], Severity::High, Some("4.17.21"), "Command injection via template."),
        )],
    );

    let report = orchestrator(vec![Arc::new(nvd), Arc::new(osv)])
        .scan(&ScanRequest::new(dir.path()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.vulnerable_count, 1);
    let plan = &report.findings[0];
    let finding = &plan.merged_finding;
    assert_eq!(
        finding.cve_ids.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["CVE-2020-28500", "CVE-2021-23337"]
    );
    assert_eq!(finding.severity, Severity::High);
    assert_eq!(finding.fixed_version.as_deref(), Some("4.17.21"));
    assert_eq!(finding.sources.len(), 2);
    assert!(plan.requires_upgrade);
    assert_eq!(plan.warning.as_deref(), Some(UPGRADE_WARNING));
    assert_eq!(plan.steps[0], "Update lodash in package.json to version 4.17.21");
}

#[tokio::test]
async fn finding_without_fix_is_not_an_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("requirements.txt"), "user_input==1.0.0\n").unwrap();

    let source = Scripted::new(
        SourceKind::Osv,
        vec![(
            "user-input",
            record(
                SourceKind::Osv,
                "PYSEC-2024-1",
                &[],
                Severity::Medium,
                None,
                "Improper validation of user input allows injection when strict mode is disabled.",
            ),
        )],
    );

    let report = orchestrator(vec![Arc::new(source)])
        .scan(&ScanRequest::new(dir.path()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.vulnerable_count, 1);
    let plan = &report.findings[0];
    assert!(!plan.requires_upgrade);
    assert!(plan.warning.is_none());
    assert!(plan.steps.iter().all(|s| !s.contains(UPGRADE_WARNING)));
    assert!(plan.steps.iter().all(|s| !s.starts_with("Update ")));
    assert_eq!(plan.steps.last().map(String::as_str), Some("Deploy to staging and monitor"));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_source_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("package.json"), r#"{"dependencies": {"lodash": "4.17.15"}}"#).unwrap();

    let osv = Arc::new(lodash_osv().with_behavior(Behavior::RateLimitedFirst(3)));
    let report = orchestrator(vec![osv.clone()])
        .scan(&ScanRequest::new(dir.path()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(osv.calls.load(Ordering::SeqCst), 4);
    assert!(report.warnings.is_empty());
    assert_eq!(report.vulnerable_count, 1);
    assert_eq!(report.findings[0].merged_finding.cve_ids.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn retried_source_joins_with_the_prompt_one() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("package.json"), r#"{"dependencies": {"lodash": "4.17.15"}}"#).unwrap();

    let nvd = Arc::new(lodash_nvd().with_behavior(Behavior::RateLimitedFirst(3)));
    let osv = Arc::new(lodash_osv());
    let report = orchestrator(vec![nvd.clone(), osv.clone()])
        .scan(&ScanRequest::new(dir.path()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(nvd.calls.load(Ordering::SeqCst), 4);
    assert_eq!(osv.calls.load(Ordering::SeqCst), 1);
    assert!(report.warnings.is_empty());
    assert!(report.is_complete());
    assert_eq!(report.vulnerable_count, 1);
    let finding = &report.findings[0].merged_finding;
    assert_eq!(finding.sources.iter().collect::<Vec<_>>(), vec![&SourceKind::Nvd, &SourceKind::Osv]);
    assert_eq!(finding.cve_ids.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_source_degrades_to_the_other() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("package.json"), r#"{"dependencies": {"lodash": "4.17.15"}}"#).unwrap();

    let nvd = lodash_nvd().with_behavior(Behavior::RateLimitedFirst(u32::MAX));
    let report = orchestrator(vec![Arc::new(nvd), Arc::new(lodash_osv())])
        .scan(&ScanRequest::new(dir.path()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.vulnerable_count, 1);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].kind, WarningKind::RateLimited);
    let finding = &report.findings[0].merged_finding;
    assert_eq!(finding.sources.iter().collect::<Vec<_>>(), vec![&SourceKind::Osv]);
    assert_eq!(finding.cve_ids.len(), 2);
}

#[tokio::test]
async fn malformed_response_counts_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    npm_project(dir.path());

    let nvd = lodash_nvd().with_behavior(Behavior::Malformed);
    let report = orchestrator(vec![Arc::new(nvd)])
        .scan(&ScanRequest::new(dir.path()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.vulnerable_count, 0);
    assert_eq!(report.warnings.len(), 2);
    assert!(report.warnings.iter().all(|w| w.kind == WarningKind::MalformedResponse));
}

#[tokio::test(start_paused = true)]
async fn timeout_reports_incomplete_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    npm_project(dir.path());

    let osv = lodash_osv().with_behavior(Behavior::HangOn("express"));
    let report = orchestrator(vec![Arc::new(osv)])
        .with_scan_timeout(Duration::from_secs(10))
        .scan(&ScanRequest::new(dir.path()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total_scanned, 2);
    assert_eq!(report.vulnerable_count, 1);
    assert_eq!(report.findings[0].dependency.name, "lodash");
    assert_eq!(report.incomplete.len(), 1);
    assert_eq!(report.incomplete[0].package, "express");
    assert!(!report.is_complete());
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_without_report() {
    let dir = tempfile::tempdir().unwrap();
    npm_project(dir.path());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let osv = lodash_osv().with_behavior(Behavior::HangOn("express"));
    let result = orchestrator(vec![Arc::new(osv)])
        .scan(&ScanRequest::new(dir.path()), cancel)
        .await;

    assert!(matches!(result, Err(ScanError::Cancelled)));
}

#[tokio::test]
async fn repeated_scans_are_identical() {
    let dir = tempfile::tempdir().unwrap();
    npm_project(dir.path());
    fs::create_dir(dir.path().join("api")).unwrap();
    fs::write(dir.path().join("api/package.json"), r#"{"dependencies": {"lodash": "^4.16.0"}}"#).unwrap();

    let scan = || async {
        let report = orchestrator(vec![Arc::new(lodash_nvd()), Arc::new(lodash_osv())])
            .with_concurrency(1)
            .scan(&ScanRequest::new(dir.path()), CancellationToken::new())
            .await
            .unwrap();
        serde_json::to_value(&report.findings).unwrap()
    };

    let first = scan().await;
    let second = scan().await;
    assert_eq!(first, second);

    let packages: HashSet<_> = first
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["current_version"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(packages, HashSet::from(["4.17.15".to_string(), "^4.16.0".to_string()]));
}

#[tokio::test]
async fn empty_project_yields_notice() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("README.md"), "# nothing here").unwrap();

    let report = orchestrator(vec![Arc::new(lodash_osv())])
        .scan(&ScanRequest::new(dir.path()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total_scanned, 0);
    assert!(report.findings.is_empty());
    assert_eq!(report.notices.len(), 1);
}
