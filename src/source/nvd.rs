use async_trait::async_trait;
use serde::Deserialize;

use super::{fetch_json, SeverityPolicy, VulnerabilitySource};
use crate::config::NvdConfig;
use crate::error::SourceError;
use crate::model::{AffectedRange, Dependency, Ecosystem, RawVulnerabilityRecord, Severity, SourceKind};
use crate::version::max_version;

const RESULTS_PER_PAGE: usize = 200;
const MAX_PAGES: usize = 5;

/// Queries the NVD CVE API 2.0 by keyword and keeps the CVEs that name the
/// package, either as a CPE product or in the English description.
pub struct NvdSource {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    policy: SeverityPolicy,
}

impl NvdSource {
    pub fn new(client: reqwest::Client, config: &NvdConfig, policy: SeverityPolicy) -> Self {
        Self {
            client,
            url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            policy,
        }
    }
}

/// The product name NVD files the package under: the artifact for Maven
/// coordinates, the last path segment for Go modules and scoped npm packages.
pub(crate) fn search_term(dependency: &Dependency) -> String {
    let name = dependency.normalized_name();
    let term = match dependency.ecosystem {
        Ecosystem::Maven => name.rsplit(':').next(),
        Ecosystem::Go | Ecosystem::Npm | Ecosystem::Packagist => name.rsplit('/').next(),
        _ => None,
    };
    term.unwrap_or(name.as_str()).to_string()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdResponse {
    #[serde(default)]
    total_results: usize,
    #[serde(default)]
    vulnerabilities: Vec<NvdItem>,
}

#[derive(Deserialize)]
struct NvdItem {
    cve: NvdCve,
}

#[derive(Deserialize)]
struct NvdCve {
    id: String,
    #[serde(default)]
    descriptions: Vec<NvdDescription>,
    #[serde(default)]
    metrics: NvdMetrics,
    #[serde(default)]
    configurations: Vec<NvdConfiguration>,
    #[serde(default)]
    references: Vec<NvdReference>,
}

#[derive(Deserialize)]
struct NvdDescription {
    lang: String,
    value: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct NvdMetrics {
    #[serde(default)]
    cvss_metric_v31: Vec<NvdCvssMetric>,
    #[serde(default)]
    cvss_metric_v30: Vec<NvdCvssMetric>,
    #[serde(default)]
    cvss_metric_v2: Vec<NvdCvssMetric>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdCvssMetric {
    cvss_data: NvdCvssData,
    /// v2 metrics carry the label here rather than in `cvssData`.
    base_severity: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdCvssData {
    base_score: Option<f32>,
    base_severity: Option<String>,
}

#[derive(Deserialize)]
struct NvdConfiguration {
    #[serde(default)]
    nodes: Vec<NvdNode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdNode {
    #[serde(default)]
    cpe_match: Vec<NvdCpeMatch>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdCpeMatch {
    #[serde(default)]
    vulnerable: bool,
    criteria: String,
    version_start_including: Option<String>,
    version_start_excluding: Option<String>,
    version_end_including: Option<String>,
    version_end_excluding: Option<String>,
}

#[derive(Deserialize)]
struct NvdReference {
    url: String,
}

#[async_trait]
impl VulnerabilitySource for NvdSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Nvd
    }

    async fn query(&self, dependency: &Dependency) -> Result<Vec<RawVulnerabilityRecord>, SourceError> {
        let term = search_term(dependency);
        let mut items = Vec::new();

        for page in 0..MAX_PAGES {
            let start_index = page * RESULTS_PER_PAGE;
            let mut request = self.client.get(&self.url).query(&[
                ("keywordSearch", term.clone()),
                ("resultsPerPage", RESULTS_PER_PAGE.to_string()),
                ("startIndex", start_index.to_string()),
            ]);
            if let Some(key) = &self.api_key {
                request = request.header("apiKey", key);
            }

            let response: NvdResponse = fetch_json(SourceKind::Nvd, request).await?;
            let fetched = response.vulnerabilities.len();
            items.extend(response.vulnerabilities);

            if fetched == 0 || start_index + fetched >= response.total_results {
                break;
            }
        }

        Ok(items
            .into_iter()
            .filter_map(|item| map_cve(item.cve, &term, &self.policy))
            .collect())
    }
}

/// Maps one CVE if it concerns `term`; `None` otherwise.
fn map_cve(cve: NvdCve, term: &str, policy: &SeverityPolicy) -> Option<RawVulnerabilityRecord> {
    let description = cve
        .descriptions
        .iter()
        .find(|d| d.lang == "en")
        .or_else(|| cve.descriptions.first())
        .map(|d| d.value.trim().to_string())
        .unwrap_or_default();

    let matches: Vec<&NvdCpeMatch> = cve
        .configurations
        .iter()
        .flat_map(|c| c.nodes.iter())
        .flat_map(|n| n.cpe_match.iter())
        .filter(|m| m.vulnerable && cpe_product(&m.criteria).is_some_and(|p| normalize_product(p) == term))
        .collect();

    if matches.is_empty() && !mentions(&description, term) {
        return None;
    }

    let affected_ranges: Vec<AffectedRange> = matches.iter().filter_map(|m| cpe_range(m)).collect();
    let fixed_version = affected_ranges
        .iter()
        .filter_map(|r| r.fixed.as_deref())
        .reduce(|a, b| max_version(a, b))
        .map(str::to_string);

    let (cvss_score, severity) = rate(&cve.metrics, policy);

    Some(RawVulnerabilityRecord {
        source: SourceKind::Nvd,
        source_id: cve.id,
        aliases: Vec::new(),
        affected_ranges,
        fixed_version,
        severity,
        cvss_score,
        summary: None,
        description,
        references: cve.references.into_iter().map(|r| r.url).collect(),
    })
}

/// `cpe:2.3:a:vendor:product:version:...` -> `product`.
fn cpe_product(criteria: &str) -> Option<&str> {
    criteria.split(':').nth(4)
}

fn normalize_product(product: &str) -> String {
    product.to_lowercase().replace('_', "-").replace("\\", "")
}

/// Whether `text` mentions `term` as a whole word.
fn mentions(text: &str, term: &str) -> bool {
    let text = text.to_lowercase();
    text.split(|c: char| !(c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '@')))
        .map(|word| word.trim_end_matches('.'))
        .any(|word| word == term)
}

fn cpe_range(m: &NvdCpeMatch) -> Option<AffectedRange> {
    let has_bounds = m.version_start_including.is_some()
        || m.version_start_excluding.is_some()
        || m.version_end_including.is_some()
        || m.version_end_excluding.is_some();

    if has_bounds {
        return Some(AffectedRange {
            // exclusive starts are treated as inclusive
            introduced: m
                .version_start_including
                .clone()
                .or_else(|| m.version_start_excluding.clone()),
            fixed: m.version_end_excluding.clone(),
            last_affected: m.version_end_including.clone(),
        });
    }

    let version = m.criteria.split(':').nth(5)?;
    if version == "*" || version == "-" {
        return None;
    }
    Some(AffectedRange {
        introduced: Some(version.to_string()),
        fixed: None,
        last_affected: Some(version.to_string()),
    })
}

/// CVSS v3.1, then v3.0, then v2 base score; then any textual label; then the
/// policy default.
fn rate(metrics: &NvdMetrics, policy: &SeverityPolicy) -> (Option<f32>, Severity) {
    let all = || {
        metrics
            .cvss_metric_v31
            .iter()
            .chain(&metrics.cvss_metric_v30)
            .chain(&metrics.cvss_metric_v2)
    };

    if let Some(score) = all().find_map(|m| m.cvss_data.base_score) {
        return (Some(score), policy.from_score(score));
    }

    let label = all()
        .filter_map(|m| m.cvss_data.base_severity.as_deref().or(m.base_severity.as_deref()))
        .find_map(Severity::from_label);
    (None, label.unwrap_or(policy.osv_default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestKind;
    use std::path::PathBuf;

    const LODASH_RESPONSE: &str = r#"{
        "resultsPerPage": 3,
        "startIndex": 0,
        "totalResults": 3,
        "vulnerabilities": [
            {"cve": {
                "id": "CVE-2021-23337",
                "descriptions": [
                    {"lang": "es", "value": "Lodash anterior a 4.17.21"},
                    {"lang": "en", "value": "Lodash versions prior to 4.17.21 are vulnerable to Command Injection via the template function."}
                ],
                "metrics": {"cvssMetricV31": [{"cvssData": {"baseScore": 7.2, "baseSeverity": "HIGH"}}]},
                "configurations": [{"nodes": [{"cpeMatch": [
                    {"vulnerable": true, "criteria": "cpe:2.3:a:lodash:lodash:*:*:*:*:*:node.js:*:*", "versionEndExcluding": "4.17.21"}
                ]}]}],
                "references": [{"url": "https://github.com/lodash/lodash/blob/master/lodash.js"}]
            }},
            {"cve": {
                "id": "CVE-2020-28500",
                "descriptions": [{"lang": "en", "value": "Lodash versions prior to 4.17.21 are vulnerable to Regular Expression Denial of Service (ReDoS) via the toNumber, trim and trimEnd functions."}],
                "metrics": {"cvssMetricV31": [{"cvssData": {"baseScore": 5.3, "baseSeverity": "MEDIUM"}}]},
                "configurations": [{"nodes": [{"cpeMatch": [
                    {"vulnerable": true, "criteria": "cpe:2.3:a:lodash:lodash:*:*:*:*:*:node.js:*:*", "versionEndExcluding": "4.17.21"}
                ]}]}]
            }},
            {"cve": {
                "id": "CVE-2019-99999",
                "descriptions": [{"lang": "en", "value": "A plugin that wraps lodash-like helpers in ExampleCMS allows XSS."}],
                "metrics": {},
                "configurations": [{"nodes": [{"cpeMatch": [
                    {"vulnerable": true, "criteria": "cpe:2.3:a:example:examplecms:3.1:*:*:*:*:*:*:*"}
                ]}]}]
            }}
        ]
    }"#;

    fn dep(ecosystem: Ecosystem, name: &str) -> Dependency {
        Dependency::new(ecosystem, name, "1.0.0", PathBuf::from("m"), ManifestKind::PackageJson)
    }

    fn map_all(json: &str, term: &str) -> Vec<RawVulnerabilityRecord> {
        let response: NvdResponse = serde_json::from_str(json).unwrap();
        response
            .vulnerabilities
            .into_iter()
            .filter_map(|item| map_cve(item.cve, term, &SeverityPolicy::default()))
            .collect()
    }

    #[test]
    fn test_search_terms() {
        assert_eq!(search_term(&dep(Ecosystem::Npm, "lodash")), "lodash");
        assert_eq!(search_term(&dep(Ecosystem::Npm, "@babel/core")), "core");
        assert_eq!(
            search_term(&dep(Ecosystem::Maven, "org.apache.logging.log4j:log4j-core")),
            "log4j-core"
        );
        assert_eq!(search_term(&dep(Ecosystem::Go, "github.com/gin-gonic/gin")), "gin");
        assert_eq!(search_term(&dep(Ecosystem::PyPI, "Django")), "django");
    }

    #[test]
    fn test_maps_matching_cves_only() {
        let records = map_all(LODASH_RESPONSE, "lodash");
        let ids: Vec<_> = records.iter().map(|r| r.source_id.as_str()).collect();
        assert_eq!(ids, vec!["CVE-2021-23337", "CVE-2020-28500"]);

        let first = &records[0];
        assert_eq!(first.severity, Severity::High);
        assert_eq!(first.cvss_score, Some(7.2));
        assert_eq!(first.fixed_version.as_deref(), Some("4.17.21"));
        assert!(first.description.starts_with("Lodash versions prior"));
        assert_eq!(
            first.affected_ranges,
            vec![AffectedRange {
                introduced: None,
                fixed: Some("4.17.21".to_string()),
                last_affected: None,
            }]
        );
        assert_eq!(records[1].severity, Severity::Medium);
    }

    #[test]
    fn test_description_mention_without_cpe() {
        let json = r#"{"totalResults": 1, "vulnerabilities": [{"cve": {
            "id": "CVE-2022-1111",
            "descriptions": [{"lang": "en", "value": "The requests library for Python leaks credentials."}],
            "metrics": {"cvssMetricV2": [{"cvssData": {"baseScore": 4.3}, "baseSeverity": "MEDIUM"}]}
        }}]}"#;
        let records = map_all(json, "requests");
        assert_eq!(records.len(), 1);
        assert!(records[0].affected_ranges.is_empty());
        assert_eq!(records[0].severity, Severity::Medium);
    }

    #[test]
    fn test_unscored_cve_uses_label_then_default() {
        let labelled = r#"{"vulnerabilities": [{"cve": {
            "id": "CVE-2023-0001",
            "descriptions": [{"lang": "en", "value": "flask issue"}],
            "metrics": {"cvssMetricV31": [{"cvssData": {"baseSeverity": "CRITICAL"}}]}
        }}]}"#;
        assert_eq!(map_all(labelled, "flask")[0].severity, Severity::Critical);

        let bare = r#"{"vulnerabilities": [{"cve": {
            "id": "CVE-2023-0002",
            "descriptions": [{"lang": "en", "value": "flask issue"}]
        }}]}"#;
        let record = &map_all(bare, "flask")[0];
        assert_eq!(record.severity, Severity::Medium);
        assert_eq!(record.cvss_score, None);
    }

    #[test]
    fn test_exact_cpe_version_becomes_point_range() {
        let m = NvdCpeMatch {
            vulnerable: true,
            criteria: "cpe:2.3:a:pallets:flask:2.0.1:*:*:*:*:*:*:*".to_string(),
            version_start_including: None,
            version_start_excluding: None,
            version_end_including: None,
            version_end_excluding: None,
        };
        let range = cpe_range(&m).unwrap();
        assert_eq!(range.introduced.as_deref(), Some("2.0.1"));
        assert_eq!(range.last_affected.as_deref(), Some("2.0.1"));
    }

    #[test]
    fn test_mentions_whole_words() {
        assert!(mentions("Lodash versions prior to 4.17.21", "lodash"));
        assert!(mentions("A flaw in gin.", "gin"));
        assert!(!mentions("lodash-like helpers", "lodash"));
        assert!(!mentions("engine failure", "gin"));
    }
}
