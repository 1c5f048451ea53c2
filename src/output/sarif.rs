//! SARIF (Static Analysis Results Interchange Format) output for GitHub Actions integration.
//!
//! When used with `--format sarif`, the output can be uploaded to GitHub Code Scanning
//! to show vulnerability annotations on the manifest that declares each dependency.

use crate::model::{RemediationPlan, ScanReport, Severity};
use anyhow::Result;
use serde::Serialize;

/// SARIF v2.1.0 schema root
#[derive(Serialize)]
struct SarifReport {
    #[serde(rename = "$schema")]
    schema: &'static str,
    version: &'static str,
    runs: Vec<SarifRun>,
}

#[derive(Serialize)]
struct SarifRun {
    tool: SarifTool,
    results: Vec<SarifResult>,
}

#[derive(Serialize)]
struct SarifTool {
    driver: SarifDriver,
}

#[derive(Serialize)]
struct SarifDriver {
    name: &'static str,
    version: &'static str,
    rules: Vec<SarifRule>,
}

#[derive(Serialize)]
struct SarifRule {
    id: String,
    name: String,
    #[serde(rename = "shortDescription")]
    short_description: SarifMessage,
    #[serde(rename = "fullDescription", skip_serializing_if = "Option::is_none")]
    full_description: Option<SarifMessage>,
    #[serde(rename = "helpUri", skip_serializing_if = "Option::is_none")]
    help_uri: Option<String>,
    help: SarifMessage,
    #[serde(rename = "defaultConfiguration")]
    default_configuration: SarifRuleConfiguration,
}

#[derive(Serialize)]
struct SarifRuleConfiguration {
    level: &'static str,
}

#[derive(Serialize)]
struct SarifResult {
    #[serde(rename = "ruleId")]
    rule_id: String,
    #[serde(rename = "ruleIndex")]
    rule_index: usize,
    level: &'static str,
    message: SarifMessage,
    locations: Vec<SarifLocation>,
}

#[derive(Serialize)]
struct SarifMessage {
    text: String,
}

#[derive(Serialize)]
struct SarifLocation {
    #[serde(rename = "physicalLocation")]
    physical_location: SarifPhysicalLocation,
}

#[derive(Serialize)]
struct SarifPhysicalLocation {
    #[serde(rename = "artifactLocation")]
    artifact_location: SarifArtifactLocation,
}

#[derive(Serialize)]
struct SarifArtifactLocation {
    uri: String,
    #[serde(rename = "uriBaseId")]
    uri_base_id: &'static str,
}

fn severity_to_sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "error",
        Severity::Medium => "warning",
        Severity::Low => "note",
    }
}

/// One rule per finding, keyed by package and declared version.
fn rule_id(plan: &RemediationPlan) -> String {
    format!(
        "{}/{}@{}",
        plan.dependency.ecosystem.as_str(),
        plan.dependency.name,
        plan.dependency.declared_version
    )
}

pub fn render_sarif(report: &ScanReport) -> Result<String> {
    let mut rules = Vec::new();
    let mut results = Vec::new();

    for (idx, plan) in report.findings.iter().enumerate() {
        let finding = &plan.merged_finding;
        let ids = finding.all_ids().join(", ");
        let level = severity_to_sarif_level(finding.severity);

        let mut help = String::new();
        if let Some(warning) = &plan.warning {
            help.push_str(warning);
            help.push('\n');
        }
        for (step_idx, step) in plan.steps.iter().enumerate() {
            help.push_str(&format!("{}. {}\n", step_idx + 1, step));
        }

        rules.push(SarifRule {
            id: rule_id(plan),
            name: format!("{} {}", plan.dependency.name, ids),
            short_description: SarifMessage {
                text: finding.summary.clone(),
            },
            full_description: (!finding.descriptions.is_empty()).then(|| SarifMessage {
                text: finding.descriptions.join("\n\n"),
            }),
            help_uri: finding.changelog_url.clone(),
            help: SarifMessage { text: help },
            default_configuration: SarifRuleConfiguration { level },
        });

        results.push(SarifResult {
            rule_id: rule_id(plan),
            rule_index: idx,
            level,
            message: SarifMessage {
                text: format!(
                    "{} vulnerability in {} {} ({}){}",
                    finding.severity.as_str(),
                    plan.dependency.name,
                    plan.dependency.declared_version,
                    ids,
                    plan.target_version
                        .as_ref()
                        .map(|v| format!(", fixed in {v}"))
                        .unwrap_or_default()
                ),
            },
            locations: vec![SarifLocation {
                physical_location: SarifPhysicalLocation {
                    artifact_location: SarifArtifactLocation {
                        uri: plan.dependency.manifest_path.to_string_lossy().replace('\\', "/"),
                        uri_base_id: "%SRCROOT%",
                    },
                },
            }],
        });
    }

    let sarif = SarifReport {
        schema: "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json",
        version: "2.1.0",
        runs: vec![SarifRun {
            tool: SarifTool {
                driver: SarifDriver {
                    name: "vulscan",
                    version: env!("CARGO_PKG_VERSION"),
                    rules,
                },
            },
            results,
        }],
    };

    Ok(serde_json::to_string_pretty(&sarif)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestKind;
    use crate::model::{Dependency, Ecosystem, MergedFinding};
    use crate::remediation::classify;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    #[test]
    fn test_one_rule_and_result_per_finding() {
        let plan = classify(MergedFinding {
            dependency: Dependency::new(
                Ecosystem::PyPI,
                "django",
                "3.2.0",
                PathBuf::from("backend/requirements.txt"),
                ManifestKind::RequirementsTxt,
            ),
            cve_ids: BTreeSet::from(["CVE-2023-31047".to_string()]),
            advisory_ids: BTreeSet::new(),
            severity: Severity::Critical,
            fixed_version: Some("3.2.19".to_string()),
            sources: BTreeSet::new(),
            descriptions: vec!["Potential bypass of validation".to_string()],
            summary: "Potential bypass of validation".to_string(),
            changelog_url: None,
            clusters: vec![],
        });
        let mut report = ScanReport::new(PathBuf::from("."));
        report.findings.push(plan);

        let value: serde_json::Value = serde_json::from_str(&render_sarif(&report).unwrap()).unwrap();
        let run = &value["runs"][0];

        assert_eq!(value["version"], "2.1.0");
        assert_eq!(run["tool"]["driver"]["name"], "vulscan");
        assert!(run["tool"]["driver"].get("informationUri").is_none());
        assert_eq!(run["tool"]["driver"]["rules"].as_array().unwrap().len(), 1);
        assert_eq!(run["results"][0]["level"], "error");
        assert_eq!(run["results"][0]["ruleId"], "pypi/django@3.2.0");
        assert_eq!(
            run["results"][0]["locations"][0]["physicalLocation"]["artifactLocation"]["uri"],
            "backend/requirements.txt"
        );
    }
}
