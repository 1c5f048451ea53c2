use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{fetch_json, SeverityPolicy, VulnerabilitySource};
use crate::config::OsvConfig;
use crate::error::SourceError;
use crate::model::{AffectedRange, Dependency, RawVulnerabilityRecord, Severity, SourceKind};
use crate::version::max_version;

/// Upper bound on followed `next_page_token`s per query.
const MAX_PAGES: usize = 10;

/// Queries `POST /v1/query` on OSV.dev by package, ecosystem and (for pinned
/// declarations) version.
pub struct OsvSource {
    client: reqwest::Client,
    url: String,
    policy: SeverityPolicy,
}

impl OsvSource {
    pub fn new(client: reqwest::Client, config: &OsvConfig, policy: SeverityPolicy) -> Self {
        Self {
            client,
            url: config.base_url.clone(),
            policy,
        }
    }

    fn build_query(dependency: &Dependency, page_token: Option<String>) -> Option<OsvQuery> {
        let ecosystem = dependency.ecosystem.osv_name()?;
        Some(OsvQuery {
            package: OsvPackage {
                name: osv_package_name(dependency),
                ecosystem: ecosystem.to_string(),
            },
            version: dependency.query_version(),
            page_token,
        })
    }
}

/// The name OSV indexes the package under.
fn osv_package_name(dependency: &Dependency) -> String {
    use crate::model::Ecosystem;
    match dependency.ecosystem {
        // PyPI, Go and Conan names are matched on their canonical form
        Ecosystem::PyPI | Ecosystem::Go | Ecosystem::Conan => dependency.normalized_name(),
        _ => dependency.name.clone(),
    }
}

#[derive(Serialize)]
struct OsvQuery {
    package: OsvPackage,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct OsvPackage {
    #[serde(default)]
    name: String,
    #[serde(default)]
    ecosystem: String,
}

#[derive(Deserialize)]
struct OsvResponse {
    #[serde(default)]
    vulns: Vec<OsvVuln>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct OsvVuln {
    id: String,
    #[serde(default)]
    aliases: Vec<String>,
    summary: Option<String>,
    details: Option<String>,
    #[serde(default)]
    severity: Vec<OsvSeverity>,
    #[serde(default)]
    affected: Vec<OsvAffected>,
    #[serde(default)]
    references: Vec<OsvReference>,
    database_specific: Option<DatabaseSpecific>,
}

#[derive(Deserialize)]
struct OsvSeverity {
    #[serde(rename = "type")]
    severity_type: Option<String>,
    score: Option<String>,
}

#[derive(Deserialize)]
struct OsvAffected {
    package: Option<OsvPackage>,
    #[serde(default)]
    ranges: Vec<OsvRange>,
    #[serde(default)]
    severity: Vec<OsvSeverity>,
    database_specific: Option<DatabaseSpecific>,
}

#[derive(Deserialize)]
struct OsvRange {
    #[serde(rename = "type")]
    range_type: Option<String>,
    #[serde(default)]
    events: Vec<OsvEvent>,
}

#[derive(Deserialize)]
struct OsvEvent {
    introduced: Option<String>,
    fixed: Option<String>,
    last_affected: Option<String>,
}

#[derive(Deserialize)]
struct OsvReference {
    url: Option<String>,
}

#[derive(Deserialize)]
struct DatabaseSpecific {
    severity: Option<String>,
}

#[async_trait]
impl VulnerabilitySource for OsvSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Osv
    }

    async fn query(&self, dependency: &Dependency) -> Result<Vec<RawVulnerabilityRecord>, SourceError> {
        let Some(mut query) = Self::build_query(dependency, None) else {
            debug!(ecosystem = %dependency.ecosystem, "ecosystem not indexed by OSV, skipping");
            return Ok(Vec::new());
        };

        let mut vulns = Vec::new();
        for _ in 0..MAX_PAGES {
            let response: OsvResponse =
                fetch_json(SourceKind::Osv, self.client.post(&self.url).json(&query)).await?;
            vulns.extend(response.vulns);

            match response.next_page_token {
                Some(token) if !token.is_empty() => query.page_token = Some(token),
                _ => break,
            }
        }

        Ok(vulns
            .into_iter()
            .map(|vuln| map_vuln(vuln, dependency, &self.policy))
            .collect())
    }
}

fn map_vuln(vuln: OsvVuln, dependency: &Dependency, policy: &SeverityPolicy) -> RawVulnerabilityRecord {
    let target = dependency.normalized_name();
    let relevant: Vec<&OsvAffected> = vuln
        .affected
        .iter()
        .filter(|affected| match &affected.package {
            Some(pkg) if !pkg.name.is_empty() => dependency.ecosystem.normalize_name(&pkg.name) == target,
            _ => true,
        })
        .collect();

    let affected_ranges: Vec<AffectedRange> = relevant
        .iter()
        .flat_map(|affected| affected.ranges.iter())
        .filter(|range| range.range_type.as_deref() != Some("GIT"))
        .flat_map(|range| ranges_from_events(&range.events))
        .collect();

    let fixed_version = affected_ranges
        .iter()
        .filter_map(|r| r.fixed.as_deref())
        .reduce(|a, b| max_version(a, b))
        .map(str::to_string);

    let (cvss_score, severity) = rate(&vuln, &relevant, policy);

    let description = vuln
        .details
        .clone()
        .filter(|d| !d.trim().is_empty())
        .or_else(|| vuln.summary.clone())
        .unwrap_or_default();

    RawVulnerabilityRecord {
        source: SourceKind::Osv,
        source_id: vuln.id,
        aliases: vuln.aliases,
        affected_ranges,
        fixed_version,
        severity,
        cvss_score,
        summary: vuln.summary.filter(|s| !s.trim().is_empty()),
        description,
        references: vuln.references.into_iter().filter_map(|r| r.url).collect(),
    }
}

/// Splits an OSV event list into ranges. An `introduced` opens a range and the
/// next `fixed` or `last_affected` closes it; a trailing open range is left
/// unbounded above.
fn ranges_from_events(events: &[OsvEvent]) -> Vec<AffectedRange> {
    let mut ranges = Vec::new();
    let mut open: Option<AffectedRange> = None;

    for event in events {
        if let Some(introduced) = &event.introduced {
            if let Some(range) = open.take() {
                ranges.push(range);
            }
            open = Some(AffectedRange {
                introduced: Some(introduced.clone()),
                ..AffectedRange::default()
            });
        }
        if event.fixed.is_some() || event.last_affected.is_some() {
            let mut range = open.take().unwrap_or_default();
            range.fixed = event.fixed.clone();
            range.last_affected = event.last_affected.clone();
            ranges.push(range);
        }
    }

    ranges.extend(open);
    ranges
}

/// Severity from, in order: a CVSS v3 vector or score, a
/// `database_specific.severity` label, the policy default.
fn rate(vuln: &OsvVuln, relevant: &[&OsvAffected], policy: &SeverityPolicy) -> (Option<f32>, Severity) {
    let scored = vuln
        .severity
        .iter()
        .chain(relevant.iter().flat_map(|a| a.severity.iter()))
        .filter(|s| s.severity_type.as_deref().is_none_or(|t| t.starts_with("CVSS_V3")))
        .filter_map(|s| s.score.as_deref())
        .filter_map(|score| policy.rate(score))
        .max_by(|a, b| a.0.total_cmp(&b.0));
    if let Some((score, severity)) = scored {
        return (Some(score), severity);
    }

    let label = vuln
        .database_specific
        .iter()
        .chain(relevant.iter().filter_map(|a| a.database_specific.as_ref()))
        .filter_map(|d| d.severity.as_deref())
        .find_map(Severity::from_label);

    (None, label.unwrap_or(policy.osv_default))
}
