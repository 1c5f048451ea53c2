use std::path::Path;
use toml::Value;

use super::ManifestKind;
use crate::error::ManifestError;
use crate::model::{Dependency, Ecosystem};

const SECTIONS: [&str; 3] = ["dependencies", "dev-dependencies", "build-dependencies"];

pub(super) fn parse_cargo_toml(content: &str, manifest: &Path) -> Result<Vec<Dependency>, ManifestError> {
    let doc: Value = toml::from_str(content)
        .map_err(|e| ManifestError::parse(manifest.display().to_string(), e))?;

    let top_level = SECTIONS.iter().filter_map(|s| doc.get(*s));
    let workspace = doc
        .get("workspace")
        .and_then(|w| w.get("dependencies"));
    let per_target = doc
        .get("target")
        .and_then(Value::as_table)
        .into_iter()
        .flat_map(|targets| targets.values())
        .flat_map(|target| SECTIONS.iter().filter_map(move |s| target.get(*s)));

    let mut deps = Vec::new();
    for table in top_level
        .chain(workspace)
        .chain(per_target)
        .filter_map(Value::as_table)
    {
        for (key, value) in table {
            let Some((name, version)) = crate_version(key, value) else {
                continue;
            };
            deps.push(Dependency::new(
                Ecosystem::CratesIo,
                name,
                version,
                manifest.to_path_buf(),
                ManifestKind::CargoToml,
            ));
        }
    }

    Ok(deps)
}

/// `(crate name, version requirement)` for a registry dependency.
///
/// Path, git and `workspace = true` entries are skipped: the first two are not
/// registry packages and the last is declared in the workspace root.
fn crate_version(key: &str, value: &Value) -> Option<(String, String)> {
    match value {
        Value::String(req) => Some((key.to_string(), req.clone())),
        Value::Table(table) => {
            if table.contains_key("path") || table.contains_key("git") || table.contains_key("workspace") {
                return None;
            }
            let name = table
                .get("package")
                .and_then(Value::as_str)
                .unwrap_or(key)
                .to_string();
            let version = table.get("version").and_then(Value::as_str)?.to_string();
            Some((name, version))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{Version, VersionConstraint};

    #[test]
    fn test_parse_cargo_sections() {
        let content = r#"
[package]
name = "svc"
version = "0.1.0"

[dependencies]
serde = { version = "1.0", features = ["derive"] }
tokio = "1.28"
local = { path = "../local" }
shared = { workspace = true }
json = { package = "serde_json", version = "=1.0.96" }

[dev-dependencies]
tempfile = "3"

[target.'cfg(unix)'.dependencies]
libc = "0.2"
"#;
        let deps = parse_cargo_toml(content, Path::new("Cargo.toml")).unwrap();
        let found: Vec<_> = deps
            .iter()
            .map(|d| (d.name.as_str(), d.declared_version.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("serde_json", "=1.0.96"),
                ("serde", "1.0"),
                ("tokio", "1.28"),
                ("tempfile", "3"),
                ("libc", "0.2"),
            ]
        );
    }

    #[test]
    fn test_workspace_dependencies() {
        let content = r#"
[workspace]
members = ["a"]

[workspace.dependencies]
regex = "1.9"
"#;
        let deps = parse_cargo_toml(content, Path::new("Cargo.toml")).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "regex");
    }

    #[test]
    fn test_bare_cargo_version_is_caret() {
        let deps = parse_cargo_toml("[dependencies]\ntokio = \"1.28\"\n", Path::new("Cargo.toml")).unwrap();
        let constraint = deps[0].constraint().unwrap();
        assert!(matches!(constraint, VersionConstraint::Range(_)));
        assert!(constraint.matches(&Version::parse("1.35.0").unwrap()));
        assert!(!constraint.matches(&Version::parse("2.0.0").unwrap()));
    }
}
