use crate::model::{RemediationPlan, ScanReport, Severity};
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct FindingRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "CVE")]
    cve: String,
    #[tabled(rename = "Fixed In")]
    fixed_in: String,
    #[tabled(rename = "Upgrade")]
    upgrade: String,
    #[tabled(rename = "Manifest")]
    manifest: String,
}

#[derive(Tabled)]
struct IncompleteRow {
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Manifest")]
    manifest: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

pub fn print_cli_table(report: &ScanReport) {
    print!("{}", render_table(report));
}

pub fn render_table(report: &ScanReport) -> String {
    let mut out = String::new();
    // writing to a String cannot fail
    let _ = write_table(&mut out, report);
    out
}

fn write_table(out: &mut String, report: &ScanReport) -> std::fmt::Result {
    writeln!(out)?;
    writeln!(
        out,
        "Scan completed at: {}",
        report.scan_time.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(out, "Project: {}", report.root.display())?;
    writeln!(out)?;

    for notice in &report.notices {
        writeln!(out, "{notice}")?;
    }

    if report.findings.is_empty() {
        if report.total_scanned > 0 {
            writeln!(
                out,
                "No known vulnerabilities in {} dependencies.",
                report.total_scanned
            )?;
        }
    } else {
        writeln!(
            out,
            "Found {} vulnerable dependencies:",
            report.findings.len()
        )?;
        writeln!(out)?;

        let rows: Vec<FindingRow> = report
            .findings
            .iter()
            .map(|plan| FindingRow {
                severity: format_severity(plan.severity()),
                package: truncate(&plan.dependency.name, 40),
                version: truncate(&plan.dependency.declared_version, 20),
                cve: format_ids(plan),
                fixed_in: plan.target_version.clone().unwrap_or_else(|| "-".to_string()),
                upgrade: if plan.requires_upgrade { "yes" } else { "no" }.to_string(),
                manifest: plan.dependency.manifest_path.display().to_string(),
            })
            .collect();

        writeln!(out, "{}", Table::new(rows).with(Style::rounded()))?;

        writeln!(out)?;
        writeln!(out, "Remediation:")?;
        for plan in &report.findings {
            write_plan(out, plan)?;
        }
    }

    if !report.incomplete.is_empty() {
        writeln!(out)?;
        writeln!(
            out,
            "{} dependencies were not fully checked:",
            report.incomplete.len()
        )?;
        writeln!(out)?;

        let rows: Vec<IncompleteRow> = report
            .incomplete
            .iter()
            .map(|d| IncompleteRow {
                package: truncate(&d.package, 40),
                version: d.current_version.clone(),
                manifest: d.manifest_path.display().to_string(),
                reason: truncate(&d.reason, 60),
            })
            .collect();
        writeln!(out, "{}", Table::new(rows).with(Style::rounded()))?;
    }

    if !report.warnings.is_empty() {
        writeln!(out)?;
        writeln!(out, "Warnings:")?;
        for warning in &report.warnings {
            writeln!(out, "  - {}: {}", warning.subject, warning.message)?;
        }
    }

    writeln!(out)?;
    write_summary(out, report)
}

fn write_plan(out: &mut String, plan: &RemediationPlan) -> std::fmt::Result {
    writeln!(out)?;
    writeln!(
        out,
        "  {} {} ({})",
        plan.dependency.name,
        plan.dependency.declared_version,
        plan.dependency.manifest_path.display()
    )?;
    writeln!(out, "  {}", truncate(&plan.merged_finding.summary, 160))?;
    if let Some(warning) = &plan.warning {
        writeln!(out, "  \x1b[33m{warning}\x1b[0m")?;
    }
    for (idx, step) in plan.steps.iter().enumerate() {
        writeln!(out, "    {}. {}", idx + 1, step)?;
    }
    if let Some(narrative) = &plan.narrative {
        writeln!(out, "  {narrative}")?;
    }
    Ok(())
}

fn format_severity(severity: Severity) -> String {
    match severity {
        Severity::Critical => "\x1b[31mCRITICAL\x1b[0m".to_string(),
        Severity::High => "\x1b[91mHIGH\x1b[0m".to_string(),
        Severity::Medium => "\x1b[33mMEDIUM\x1b[0m".to_string(),
        Severity::Low => "\x1b[32mLOW\x1b[0m".to_string(),
    }
}

/// First identifier plus a count of the rest.
fn format_ids(plan: &RemediationPlan) -> String {
    let ids = plan.merged_finding.all_ids();
    match ids.as_slice() {
        [] => "-".to_string(),
        [only] => only.clone(),
        [first, rest @ ..] => format!("{} (+{})", first, rest.len()),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

/// A 0-100 score: findings deduct by severity, unchecked dependencies by a
/// flat amount.
fn calculate_health_score(report: &ScanReport) -> u8 {
    if report.total_scanned == 0 {
        return 100;
    }

    let mut score: i32 = 100;
    for plan in &report.findings {
        score -= match plan.severity() {
            Severity::Critical => 25,
            Severity::High => 15,
            Severity::Medium => 8,
            Severity::Low => 3,
        };
    }
    score -= 2 * report.incomplete.len() as i32;

    score.clamp(0, 100) as u8
}

fn health_score_indicator(score: u8) -> &'static str {
    match score {
        90..=100 => "[Excellent]",
        70..=89 => "[Good]",
        50..=69 => "[Fair]",
        25..=49 => "[Poor]",
        _ => "[Critical]",
    }
}

fn write_summary(out: &mut String, report: &ScanReport) -> std::fmt::Result {
    let mut by_ecosystem: BTreeMap<&str, usize> = BTreeMap::new();
    for plan in &report.findings {
        *by_ecosystem
            .entry(plan.dependency.ecosystem.display_name())
            .or_default() += 1;
    }

    writeln!(out, "Summary:")?;
    writeln!(out, "  Manifests found: {}", report.manifests_found.len())?;
    writeln!(out, "  Dependencies scanned: {}", report.total_scanned)?;
    writeln!(out, "  Vulnerable: {}", report.vulnerable_count)?;

    if !report.findings.is_empty() {
        let counts: Vec<String> = report
            .severity_counts()
            .iter()
            .map(|(sev, count)| format!("{} {}", count, sev.as_str().to_lowercase()))
            .collect();
        writeln!(out, "  By severity: {}", counts.join(", "))?;

        let upgrades = report.findings.iter().filter(|p| p.requires_upgrade).count();
        writeln!(out, "  Require version upgrade: {upgrades}")?;
    }

    if by_ecosystem.len() > 1 {
        let breakdown: Vec<String> = by_ecosystem
            .iter()
            .map(|(eco, count)| format!("{count} {eco}"))
            .collect();
        writeln!(out, "  By ecosystem: {}", breakdown.join(", "))?;
    }

    if !report.is_complete() {
        writeln!(out, "  Incomplete: {}", report.incomplete.len())?;
    }

    let score = calculate_health_score(report);
    writeln!(out)?;
    writeln!(out, "Health Score: {}/100 {}", score, health_score_indicator(score))
}
