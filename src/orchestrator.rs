//! Runs a complete scan: discovery, per-dependency source fan-out, merge and
//! classification.
//!
//! Dependencies are queried concurrently, bounded by a semaphore. For each
//! dependency every source is queried at once and the results are joined
//! before merging, so batches always arrive in source order. The whole fan-out
//! races the scan deadline and the cancellation token: on deadline the report
//! is built from what finished, on cancellation no report is produced.

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, IgnoreConfig};
use crate::error::{ScanError, SourceError, VersionError};
use crate::manifest::ProjectManifests;
use crate::merge::merge;
use crate::model::{
    Dependency, IncompleteDependency, RawVulnerabilityRecord, ScanReport, ScanRequest, ScanWarning,
    WarningKind,
};
use crate::remediation::classify;
use crate::source::{query_with_retry, RetryPolicy, VulnerabilitySource};

type SourceResults = Vec<Result<Vec<RawVulnerabilityRecord>, SourceError>>;

/// Drives scans against an ordered list of sources.
///
/// # Example
///
/// ```no_run
/// use tokio_util::sync::CancellationToken;
/// use vulscan::model::ScanRequest;
/// use vulscan::orchestrator::Orchestrator;
/// use vulscan::source::default_sources;
/// use vulscan::Config;
///
/// # async fn run() -> anyhow::Result<()> {
/// let config = Config::load()?;
/// let sources = default_sources(&config, None)?;
/// let orchestrator = Orchestrator::from_config(&config, sources);
/// let report = orchestrator
///     .scan(&ScanRequest::new("."), CancellationToken::new())
///     .await?;
/// println!("{} of {} dependencies vulnerable", report.vulnerable_count, report.total_scanned);
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    sources: Vec<Arc<dyn VulnerabilitySource>>,
    concurrency: usize,
    scan_timeout: Duration,
    retry: RetryPolicy,
    skip_dirs: Vec<String>,
    ignore: IgnoreConfig,
}

impl Orchestrator {
    /// `sources` are consulted, and merged, in the order given.
    pub fn new(sources: Vec<Arc<dyn VulnerabilitySource>>) -> Self {
        Self::from_config(&Config::default(), sources)
    }

    pub fn from_config(config: &Config, sources: Vec<Arc<dyn VulnerabilitySource>>) -> Self {
        Self {
            sources,
            concurrency: config.concurrency,
            scan_timeout: config.scan_timeout(),
            retry: config.retry,
            skip_dirs: config.skip_dirs.clone(),
            ignore: config.ignore.clone(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ignore(mut self, ignore: IgnoreConfig) -> Self {
        self.ignore = ignore;
        self
    }

    /// Scans `request.root`.
    ///
    /// Only an invalid root and cancellation are errors; every other failure
    /// is recorded in the report.
    pub async fn scan(&self, request: &ScanRequest, cancel: CancellationToken) -> Result<ScanReport, ScanError> {
        let root = &request.root;
        if !root.is_dir() {
            return Err(ScanError::InvalidRoot(root.display().to_string()));
        }

        let mut report = ScanReport::new(root.clone());
        let manifests = ProjectManifests::discover(root, &self.skip_dirs, &request.ecosystems);
        report.manifests_found = manifests.paths();

        if manifests.is_empty() {
            info!(root = %root.display(), "no dependency manifests found");
            report
                .notices
                .push(format!("No supported dependency manifests found under {}", root.display()));
            return Ok(report);
        }

        let dependencies = self.collect_dependencies(&manifests, &mut report);
        report.total_scanned = dependencies.len();

        info!(
            root = %root.display(),
            manifests = report.manifests_found.len(),
            dependencies = dependencies.len(),
            sources = self.sources.len(),
            "starting scan"
        );

        let outcomes = self.query_all(&dependencies, &cancel).await?;

        for (dependency, outcome) in dependencies.into_iter().zip(outcomes) {
            let Some(results) = outcome else {
                report.incomplete.push(IncompleteDependency {
                    package: dependency.name.clone(),
                    ecosystem: dependency.ecosystem,
                    current_version: dependency.declared_version.clone(),
                    manifest_path: dependency.manifest_path.clone(),
                    reason: format!(
                        "scan timeout of {}s elapsed before all sources answered",
                        self.scan_timeout.as_secs()
                    ),
                });
                continue;
            };

            let batches = self.collect_batches(&dependency, results, &mut report);
            if let Some(finding) = merge(&dependency, &batches) {
                report.findings.push(classify(finding));
            }
        }

        report.findings.sort_by(|a, b| {
            b.severity()
                .cmp(&a.severity())
                .then_with(|| a.dependency.name.cmp(&b.dependency.name))
                .then_with(|| a.dependency.ecosystem.cmp(&b.dependency.ecosystem))
                .then_with(|| a.dependency.declared_version.cmp(&b.dependency.declared_version))
                .then_with(|| a.dependency.manifest_path.cmp(&b.dependency.manifest_path))
        });
        report.vulnerable_count = report.findings.len();

        info!(
            scanned = report.total_scanned,
            vulnerable = report.vulnerable_count,
            incomplete = report.incomplete.len(),
            warnings = report.warnings.len(),
            "scan complete"
        );

        Ok(report)
    }

    /// Parses every manifest, recording failures, and returns the unique,
    /// non-ignored dependencies in manifest order.
    fn collect_dependencies(&self, manifests: &ProjectManifests, report: &mut ScanReport) -> Vec<Dependency> {
        let mut seen = HashSet::new();
        let mut dependencies = Vec::new();

        for outcome in manifests.iter() {
            let deps = match outcome.result {
                Ok(deps) => deps,
                Err(e) => {
                    report.warnings.push(ScanWarning {
                        kind: WarningKind::ManifestParse,
                        subject: outcome.path.display().to_string(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            for dep in deps {
                if self.ignore.should_ignore_dependency(&dep) {
                    debug!(package = %dep.name, "package ignored by config");
                    continue;
                }
                let (ecosystem, name) = dep.identity_key();
                if !seen.insert((ecosystem, name, dep.declared_version.clone())) {
                    continue;
                }
                if let Err(VersionError::AmbiguousVersionRange(declared)) = dep.constraint() {
                    report.warnings.push(ScanWarning {
                        kind: WarningKind::AmbiguousVersionRange,
                        subject: dep.name.clone(),
                        message: format!(
                            "cannot interpret declared version '{declared}' in {}; treating it as vulnerable to every reported range",
                            dep.manifest_path.display()
                        ),
                    });
                }
                dependencies.push(dep);
            }
        }

        dependencies
    }

    /// Queries every source for every dependency. `None` marks dependencies
    /// still pending at the deadline.
    async fn query_all(
        &self,
        dependencies: &[Dependency],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<SourceResults>>, ScanError> {
        let permits = Semaphore::new(self.concurrency.max(1));
        let semaphore = &permits;
        let mut outcomes: Vec<Option<SourceResults>> = (0..dependencies.len()).map(|_| None).collect();

        let mut pending: FuturesUnordered<_> = dependencies
            .iter()
            .enumerate()
            .map(move |(idx, dependency)| async move {
                // the semaphore is never closed
                let _permit = semaphore.acquire().await.ok();
                let results = join_all(
                    self.sources
                        .iter()
                        .map(|source| query_with_retry(source.as_ref(), dependency, self.retry, cancel)),
                )
                .await;
                (idx, results)
            })
            .collect();

        let deadline = tokio::time::sleep(self.scan_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("scan cancelled");
                    return Err(ScanError::Cancelled);
                }
                _ = &mut deadline => {
                    warn!(
                        timeout_secs = self.scan_timeout.as_secs(),
                        pending = pending.len(),
                        "scan timeout reached, finalizing partial report"
                    );
                    break;
                }
                next = pending.next() => match next {
                    Some((idx, results)) => outcomes[idx] = Some(results),
                    None => break,
                },
            }
        }

        Ok(outcomes)
    }

    /// Turns per-source results into merge batches, dropping ignored
    /// advisories and recording source failures.
    fn collect_batches(
        &self,
        dependency: &Dependency,
        results: SourceResults,
        report: &mut ScanReport,
    ) -> Vec<Vec<RawVulnerabilityRecord>> {
        results
            .into_iter()
            .map(|result| match result {
                Ok(records) => records
                    .into_iter()
                    .filter(|record| {
                        !record
                            .identifiers()
                            .any(|id| self.ignore.should_ignore_vulnerability(id))
                    })
                    .collect(),
                Err(e) => {
                    let kind = match &e {
                        SourceError::Unavailable { .. } => WarningKind::SourceUnavailable,
                        SourceError::RateLimited { .. } => WarningKind::RateLimited,
                        SourceError::MalformedResponse { .. } => WarningKind::MalformedResponse,
                    };
                    warn!(
                        source = %e.source_kind(),
                        package = %dependency.name,
                        error = %e,
                        "source returned no usable data"
                    );
                    report.warnings.push(ScanWarning {
                        kind,
                        subject: dependency.name.clone(),
                        message: e.to_string(),
                    });
                    Vec::new()
                }
            })
            .collect()
    }
}
