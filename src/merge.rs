//! Cross-source deduplication of vulnerability records.
//!
//! Records from every source for one dependency are first filtered to the ones
//! whose affected ranges admit the declared version, then grouped into
//! clusters of records describing the same vulnerability, and finally folded
//! into a single [`MergedFinding`].
//!
//! Two records belong to the same cluster when they share an identifier (a
//! CVE id, or a GHSA/PYSEC id appearing as an alias), or, when at least one of
//! them carries no CVE, when their affected ranges intersect and their fixed
//! versions agree on `major.minor.patch`. Grouping is transitive.

use std::collections::BTreeSet;

use crate::error::VersionError;
use crate::model::{
    is_cve_id, Dependency, MergedFinding, RawVulnerabilityRecord, Severity, SourceKind,
    VulnerabilityCluster,
};
use crate::version::{affected_interval, max_version, Version, VersionConstraint};

/// Longest summary kept, in characters.
pub const SUMMARY_MAX_CHARS: usize = 600;

/// Merges the records each source returned for `dependency`.
///
/// `batches` must be in source order; descriptions keep that order. Returns
/// `None` when no record applies to the declared version.
pub fn merge(dependency: &Dependency, batches: &[Vec<RawVulnerabilityRecord>]) -> Option<MergedFinding> {
    let constraint = dependency.constraint();
    let records: Vec<&RawVulnerabilityRecord> = batches
        .iter()
        .flatten()
        .filter(|record| applies(&constraint, record))
        .collect();

    if records.is_empty() {
        return None;
    }

    let fixed: Vec<Option<&str>> = records
        .iter()
        .map(|record| effective_fixed(&constraint, record))
        .collect();

    let mut groups = DisjointSet::new(records.len());
    for i in 0..records.len() {
        for j in i + 1..records.len() {
            if same_vulnerability(records[i], fixed[i], records[j], fixed[j]) {
                groups.union(i, j);
            }
        }
    }

    let clusters: Vec<VulnerabilityCluster> = groups
        .groups()
        .into_iter()
        .map(|members| build_cluster(&records, &fixed, &members))
        .collect();

    let cve_ids: BTreeSet<String> = clusters.iter().flat_map(|c| c.cve_ids.iter().cloned()).collect();
    let advisory_ids: BTreeSet<String> = clusters
        .iter()
        .flat_map(|c| c.advisory_ids.iter().cloned())
        .collect();
    let sources: BTreeSet<SourceKind> = clusters.iter().flat_map(|c| c.sources.iter().copied()).collect();
    let severity = clusters.iter().map(|c| c.severity).max()?;
    let fixed_version = clusters
        .iter()
        .filter_map(|c| c.fixed_version.as_deref())
        .reduce(|a, b| max_version(a, b))
        .map(str::to_string);

    let descriptions = unique_descriptions(&records);
    let summary = records
        .iter()
        .filter(|r| r.source == SourceKind::Osv)
        .find_map(|r| r.summary.as_deref())
        .or_else(|| descriptions.first().map(String::as_str))
        .map(|text| truncate_summary(text, SUMMARY_MAX_CHARS))
        .unwrap_or_else(|| fallback_summary(&dependency.name));

    let changelog_url = records
        .iter()
        .flat_map(|r| r.references.iter())
        .find(|url| is_changelog_url(url))
        .cloned();

    Some(MergedFinding {
        dependency: dependency.clone(),
        cve_ids,
        advisory_ids,
        severity,
        fixed_version,
        sources,
        descriptions,
        summary,
        changelog_url,
        clusters,
    })
}

/// Whether `record` can affect the declared version. Records without ranges,
/// and declarations that cannot be interpreted, always apply.
fn applies(constraint: &Result<VersionConstraint, VersionError>, record: &RawVulnerabilityRecord) -> bool {
    match constraint {
        Ok(constraint) => {
            record.affected_ranges.is_empty()
                || record.affected_ranges.iter().any(|r| constraint.intersects(r))
        }
        Err(_) => true,
    }
}

/// The fix relevant to the declared version: the highest `fixed` among the
/// ranges that admit it, else the record's own fixed version.
fn effective_fixed<'a>(
    constraint: &Result<VersionConstraint, VersionError>,
    record: &'a RawVulnerabilityRecord,
) -> Option<&'a str> {
    record
        .affected_ranges
        .iter()
        .filter(|r| match constraint {
            Ok(c) => c.intersects(r),
            Err(_) => true,
        })
        .filter_map(|r| r.fixed.as_deref())
        .reduce(|a, b| max_version(a, b))
        .or(record.fixed_version.as_deref())
}

fn same_vulnerability(
    a: &RawVulnerabilityRecord,
    a_fixed: Option<&str>,
    b: &RawVulnerabilityRecord,
    b_fixed: Option<&str>,
) -> bool {
    let shares_id = a
        .identifiers()
        .any(|x| b.identifiers().any(|y| x.eq_ignore_ascii_case(y)));
    if shares_id {
        return true;
    }

    if a.has_cve() && b.has_cve() {
        return false;
    }

    ranges_intersect(a, b) && fixes_agree(a_fixed, b_fixed)
}

/// Missing ranges are unknown, and unknown overlaps everything.
fn ranges_intersect(a: &RawVulnerabilityRecord, b: &RawVulnerabilityRecord) -> bool {
    if a.affected_ranges.is_empty() || b.affected_ranges.is_empty() {
        return true;
    }
    a.affected_ranges.iter().any(|ra| {
        let ia = affected_interval(ra);
        b.affected_ranges
            .iter()
            .any(|rb| ia.overlaps(&affected_interval(rb)))
    })
}

fn fixes_agree(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => match (Version::parse(a), Version::parse(b)) {
            (Ok(va), Ok(vb)) => va.same_patch_level(&vb),
            _ => a == b,
        },
        _ => false,
    }
}

fn build_cluster(
    records: &[&RawVulnerabilityRecord],
    fixed: &[Option<&str>],
    members: &[usize],
) -> VulnerabilityCluster {
    let mut cve_ids = BTreeSet::new();
    let mut advisory_ids = BTreeSet::new();
    for id in members.iter().flat_map(|&i| records[i].identifiers()) {
        if is_cve_id(id) {
            cve_ids.insert(id.to_ascii_uppercase());
        } else {
            advisory_ids.insert(id.to_string());
        }
    }

    VulnerabilityCluster {
        cve_ids,
        advisory_ids,
        severity: members
            .iter()
            .map(|&i| records[i].severity)
            .max()
            .unwrap_or(Severity::Low),
        fixed_version: members
            .iter()
            .filter_map(|&i| fixed[i])
            .reduce(|a, b| max_version(a, b))
            .map(str::to_string),
        sources: members.iter().map(|&i| records[i].source).collect(),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Descriptions in record order, skipping blanks and whitespace-insensitive
/// repeats.
fn unique_descriptions(records: &[&RawVulnerabilityRecord]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    records
        .iter()
        .map(|r| collapse_whitespace(&r.description))
        .filter(|d| !d.is_empty())
        .filter(|d| seen.insert(d.to_lowercase()))
        .collect()
}

/// Collapses whitespace and cuts `text` to at most `max_chars` characters on a
/// word boundary, appending `...` when shortened.
pub fn truncate_summary(text: &str, max_chars: usize) -> String {
    let text = collapse_whitespace(text);
    if text.chars().count() <= max_chars {
        return text;
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(idx, _)| idx);
    let head = &text[..cut];
    let head = match head.rfind(' ') {
        Some(space) if space > 0 => &head[..space],
        _ => head,
    };
    format!("{}...", head.trim_end_matches([',', ';', ':', '.']))
}

pub fn fallback_summary(package: &str) -> String {
    format!("A vulnerability was reported for {package}. Review CVE details for more information.")
}

fn is_changelog_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    ["changelog", "/releases", "release-notes", "releasenotes", "history.md", "changes.md"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Union-find over record indices.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // the smaller index stays root so groups keep first-seen order
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }

    /// Groups of member indices, ordered by their smallest member.
    fn groups(mut self) -> Vec<Vec<usize>> {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut slot_of_root: Vec<Option<usize>> = vec![None; self.parent.len()];
        for i in 0..self.parent.len() {
            let root = self.find(i);
            match slot_of_root[root] {
                Some(slot) => groups[slot].push(i),
                None => {
                    slot_of_root[root] = Some(groups.len());
                    groups.push(vec![i]);
                }
            }
        }
        groups
    }
}
