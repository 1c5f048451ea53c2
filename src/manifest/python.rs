use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use toml::Value;

use super::ManifestKind;
use crate::error::ManifestError;
use crate::model::{Dependency, Ecosystem};

/// `name[extras] spec ; markers` as used by requirements files and PEP 508.
fn requirement_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[[^\]]*\])?\s*(.*)$")
            .expect("requirement regex is valid")
    })
}

/// Splits one PEP 508 requirement into `(normalized name, version spec)`.
///
/// Returns `None` for direct URL references and unparseable lines.
fn parse_requirement(line: &str) -> Option<(String, String)> {
    let line = line.split(';').next().unwrap_or(line).trim();
    if line.is_empty() || line.contains(" @ ") || line.contains("://") {
        return None;
    }

    let caps = requirement_regex().captures(line)?;
    let name = Ecosystem::PyPI.normalize_name(&caps[1]);
    let spec: String = caps[2]
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    Some((name, if spec.is_empty() { "*".to_string() } else { spec }))
}

pub(super) fn parse_requirements(content: &str, manifest: &Path) -> Result<Vec<Dependency>, ManifestError> {
    let deps = content
        .lines()
        .map(|line| match line.find(" #") {
            Some(idx) => &line[..idx],
            None => line,
        })
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .filter_map(parse_requirement)
        .map(|(name, spec)| {
            Dependency::new(
                Ecosystem::PyPI,
                name,
                spec,
                manifest.to_path_buf(),
                ManifestKind::RequirementsTxt,
            )
        })
        .collect();

    Ok(deps)
}

pub(super) fn parse_pyproject(content: &str, manifest: &Path) -> Result<Vec<Dependency>, ManifestError> {
    let doc: Value = toml::from_str(content)
        .map_err(|e| ManifestError::parse(manifest.display().to_string(), e))?;
    let make = |name: String, spec: String| {
        Dependency::new(
            Ecosystem::PyPI,
            name,
            spec,
            manifest.to_path_buf(),
            ManifestKind::PyprojectToml,
        )
    };

    let mut deps = Vec::new();

    // PEP 621
    if let Some(project) = doc.get("project") {
        let required = project.get("dependencies").and_then(Value::as_array);
        let optional = project
            .get("optional-dependencies")
            .and_then(Value::as_table)
            .into_iter()
            .flat_map(|groups| groups.values())
            .filter_map(Value::as_array);

        for entry in required.into_iter().chain(optional).flatten() {
            if let Some((name, spec)) = entry.as_str().and_then(parse_requirement) {
                deps.push(make(name, spec));
            }
        }
    }

    // Poetry
    if let Some(poetry) = doc.get("tool").and_then(|t| t.get("poetry")) {
        let main = poetry.get("dependencies").and_then(Value::as_table);
        let dev = poetry.get("dev-dependencies").and_then(Value::as_table);
        let groups = poetry
            .get("group")
            .and_then(Value::as_table)
            .into_iter()
            .flat_map(|groups| groups.values())
            .filter_map(|g| g.get("dependencies").and_then(Value::as_table));

        for table in main.into_iter().chain(dev).chain(groups) {
            for (name, value) in table {
                if name.eq_ignore_ascii_case("python") {
                    continue;
                }
                if let Some(spec) = table_version(value) {
                    deps.push(make(Ecosystem::PyPI.normalize_name(name), spec));
                }
            }
        }
    }

    Ok(deps)
}

pub(super) fn parse_pipfile(content: &str, manifest: &Path) -> Result<Vec<Dependency>, ManifestError> {
    let doc: Value = toml::from_str(content)
        .map_err(|e| ManifestError::parse(manifest.display().to_string(), e))?;

    let mut deps = Vec::new();
    for section in ["packages", "dev-packages"] {
        let Some(table) = doc.get(section).and_then(Value::as_table) else {
            continue;
        };
        for (name, value) in table {
            if let Some(spec) = table_version(value) {
                deps.push(Dependency::new(
                    Ecosystem::PyPI,
                    Ecosystem::PyPI.normalize_name(name),
                    spec,
                    manifest.to_path_buf(),
                    ManifestKind::Pipfile,
                ));
            }
        }
    }

    Ok(deps)
}

/// Version from `name = "spec"` or `name = { version = "spec", ... }`.
///
/// Path, git and url dependencies have no registry version and yield `None`.
fn table_version(value: &Value) -> Option<String> {
    match value {
        Value::String(spec) => Some(spec.replace(' ', "")),
        Value::Table(table) => {
            if ["path", "git", "url", "file"].iter().any(|k| table.contains_key(*k)) {
                return None;
            }
            Some(
                table
                    .get("version")
                    .and_then(Value::as_str)
                    .map(|s| s.replace(' ', ""))
                    .unwrap_or_else(|| "*".to_string()),
            )
        }
        _ => None,
    }
}
