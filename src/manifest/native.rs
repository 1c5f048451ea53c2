//! C and C++ package managers: vcpkg and Conan.

use serde_json::Value;
use std::path::Path;

use super::ManifestKind;
use crate::error::ManifestError;
use crate::model::{Dependency, Ecosystem};

/// Parses `dependencies` and `overrides` from a vcpkg manifest.
///
/// Dependencies may be bare port names or objects carrying a `version>=`
/// minimum; overrides pin an exact `version`. An override replaces the
/// dependency entry of the same name.
pub(super) fn parse_vcpkg_json(content: &str, manifest: &Path) -> Result<Vec<Dependency>, ManifestError> {
    let json: Value = serde_json::from_str(content)
        .map_err(|e| ManifestError::parse(manifest.display().to_string(), e))?;

    let mut entries: Vec<(String, String)> = Vec::new();

    for dep in json
        .get("dependencies")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let entry = match dep {
            Value::String(name) => Some((name.clone(), "*".to_string())),
            Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(|name| {
                let version = obj
                    .get("version>=")
                    .and_then(Value::as_str)
                    .map(|v| format!(">={v}"))
                    .unwrap_or_else(|| "*".to_string());
                (name.to_string(), version)
            }),
            _ => None,
        };
        entries.extend(entry);
    }

    for over in json
        .get("overrides")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let (Some(name), Some(version)) = (
            over.get("name").and_then(Value::as_str),
            over.get("version")
                .or_else(|| over.get("version-string"))
                .or_else(|| over.get("version-semver"))
                .and_then(Value::as_str),
        ) else {
            continue;
        };
        // vcpkg port versions (`1.2.3#2`) are packaging revisions
        let version = version.split('#').next().unwrap_or(version).to_string();

        match entries.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = version,
            None => entries.push((name.to_string(), version)),
        }
    }

    Ok(entries
        .into_iter()
        .map(|(name, version)| {
            Dependency::new(
                Ecosystem::Vcpkg,
                name,
                version,
                manifest.to_path_buf(),
                ManifestKind::VcpkgJson,
            )
        })
        .collect())
}

/// Parses the `[requires]` section: `name/version[@user/channel]`.
pub(super) fn parse_conanfile(content: &str, manifest: &Path) -> Result<Vec<Dependency>, ManifestError> {
    let mut deps = Vec::new();
    let mut in_requires = false;

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') {
            in_requires = line == "[requires]";
            continue;
        }
        if !in_requires {
            continue;
        }

        let reference = line.split('@').next().unwrap_or(line);
        let Some((name, version)) = reference.split_once('/') else {
            return Err(ManifestError::parse(
                manifest.display().to_string(),
                format!("invalid requirement '{line}'"),
            ));
        };
        // Conan version ranges are written `[>=1.0 <2.0]`
        let version = version.trim_start_matches('[').trim_end_matches(']').trim();
        let version = version.split('#').next().unwrap_or(version);

        deps.push(Dependency::new(
            Ecosystem::Conan,
            name.trim(),
            version,
            manifest.to_path_buf(),
            ManifestKind::ConanfileTxt,
        ));
    }

    Ok(deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(deps: &[Dependency]) -> Vec<(&str, &str)> {
        deps.iter()
            .map(|d| (d.name.as_str(), d.declared_version.as_str()))
            .collect()
    }

    #[test]
    fn test_vcpkg_dependencies_and_overrides() {
        let content = r#"{
            "name": "app",
            "dependencies": [
                "fmt",
                { "name": "openssl", "version>=": "3.0.2" },
                { "name": "zlib", "features": ["static"] }
            ],
            "overrides": [
                { "name": "zlib", "version": "1.2.11#3" }
            ]
        }"#;
        let deps = parse_vcpkg_json(content, Path::new("vcpkg.json")).unwrap();
        assert_eq!(
            found(&deps),
            vec![("fmt", "*"), ("openssl", ">=3.0.2"), ("zlib", "1.2.11")]
        );
        assert!(deps.iter().all(|d| d.ecosystem == Ecosystem::Vcpkg));
    }

    #[test]
    fn test_conanfile_requires() {
        let content = "\
[requires]
zlib/1.2.11
openssl/1.1.1k@conan/stable
boost/[>=1.80 <1.83]

[generators]
CMakeDeps
";
        let deps = parse_conanfile(content, Path::new("conanfile.txt")).unwrap();
        assert_eq!(
            found(&deps),
            vec![("zlib", "1.2.11"), ("openssl", "1.1.1k"), ("boost", ">=1.80 <1.83")]
        );
    }

    #[test]
    fn test_conanfile_malformed_requirement() {
        assert!(parse_conanfile("[requires]\nzlib\n", Path::new("conanfile.txt")).is_err());
    }
}
