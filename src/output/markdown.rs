//! Markdown report, suitable for pull request comments and chat tools.
//!
//! Every finding gets the same three sections (Library Affected, CVE Details,
//! Mitigation Steps) so downstream readers can rely on the layout. The upgrade
//! warning is rendered as a block quote ahead of the numbered steps.

use crate::model::{RemediationPlan, ScanReport};
use std::fmt::Write;

pub fn render_markdown(report: &ScanReport) -> String {
    let mut out = String::new();
    // writing to a String cannot fail
    let _ = write_markdown(&mut out, report);
    out
}

fn write_markdown(out: &mut String, report: &ScanReport) -> std::fmt::Result {
    writeln!(out, "# Vulnerability Scan Report")?;
    writeln!(out)?;
    writeln!(out, "## Summary")?;
    writeln!(out)?;
    writeln!(out, "- **Project:** `{}`", report.root.display())?;
    writeln!(
        out,
        "- **Scanned at:** {}",
        report.scan_time.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(out, "- **Manifests found:** {}", report.manifests_found.len())?;
    writeln!(out, "- **Dependencies scanned:** {}", report.total_scanned)?;
    writeln!(out, "- **Vulnerable dependencies:** {}", report.vulnerable_count)?;
    for (severity, count) in report.severity_counts() {
        if count > 0 {
            writeln!(out, "- **{severity}:** {count}")?;
        }
    }
    writeln!(out)?;

    for notice in &report.notices {
        writeln!(out, "> {notice}")?;
        writeln!(out)?;
    }

    if report.findings.is_empty() {
        writeln!(out, "## No Vulnerabilities Found")?;
        writeln!(out)?;
    } else {
        writeln!(out, "## Findings")?;
        writeln!(out)?;
        for (idx, plan) in report.findings.iter().enumerate() {
            write_finding(out, idx + 1, plan)?;
        }
    }

    if !report.incomplete.is_empty() {
        writeln!(out, "## Incomplete")?;
        writeln!(out)?;
        for dep in &report.incomplete {
            writeln!(
                out,
                "- `{}` @ `{}` ({}): {}",
                dep.package,
                dep.current_version,
                dep.manifest_path.display(),
                dep.reason
            )?;
        }
        writeln!(out)?;
    }

    if !report.warnings.is_empty() {
        writeln!(out, "## Warnings")?;
        writeln!(out)?;
        for warning in &report.warnings {
            writeln!(out, "- `{}`: {}", warning.subject, warning.message)?;
        }
        writeln!(out)?;
    }

    Ok(())
}

fn write_finding(out: &mut String, idx: usize, plan: &RemediationPlan) -> std::fmt::Result {
    let dep = &plan.dependency;
    let finding = &plan.merged_finding;

    writeln!(out, "### {}. {} @ {}", idx, dep.name, dep.declared_version)?;
    writeln!(out)?;

    writeln!(out, "#### Library Affected")?;
    writeln!(out, "- **Package:** `{}`", dep.name)?;
    writeln!(out, "- **Ecosystem:** {}", dep.ecosystem)?;
    writeln!(out, "- **Current Version:** `{}`", dep.declared_version)?;
    writeln!(out, "- **Manifest:** `{}`", dep.manifest_path.display())?;
    writeln!(out, "- **Severity:** `{}`", finding.severity)?;
    writeln!(out)?;

    writeln!(out, "#### CVE Details")?;
    let ids = finding.all_ids();
    if !ids.is_empty() {
        writeln!(out, "- **IDs:** {}", ids.join(", "))?;
    }
    if let Some(fixed) = &plan.target_version {
        writeln!(out, "- **Fixed Version:** `{fixed}`")?;
    }
    writeln!(out, "- **What is it:** {}", finding.summary)?;
    if let Some(narrative) = &plan.narrative {
        writeln!(out)?;
        writeln!(out, "{narrative}")?;
    }
    writeln!(out)?;

    writeln!(out, "#### Mitigation Steps")?;
    if let Some(warning) = &plan.warning {
        writeln!(out)?;
        writeln!(out, "> **{warning}**")?;
        writeln!(out)?;
    }
    for (step_idx, step) in plan.steps.iter().enumerate() {
        writeln!(out, "{}. {}", step_idx + 1, step)?;
    }
    writeln!(out)?;
    writeln!(out, "---")?;
    writeln!(out)
}
