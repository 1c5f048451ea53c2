use serde_json::Value;
use std::path::Path;
use tracing::debug;

use super::ManifestKind;
use crate::error::ManifestError;
use crate::model::{Dependency, Ecosystem};

const SECTIONS: [&str; 3] = ["dependencies", "devDependencies", "optionalDependencies"];

/// Specs that point outside the registry.
const LOCAL_PREFIXES: [&str; 6] = ["file:", "link:", "workspace:", "portal:", "git+", "git:"];

pub(super) fn parse_package_json(content: &str, manifest: &Path) -> Result<Vec<Dependency>, ManifestError> {
    let json: Value = serde_json::from_str(content)
        .map_err(|e| ManifestError::parse(manifest.display().to_string(), e))?;

    let mut deps = Vec::new();
    for section in SECTIONS {
        let Some(entries) = json.get(section).and_then(Value::as_object) else {
            continue;
        };

        for (name, spec) in entries {
            let Some(spec) = spec.as_str() else {
                debug!(package = %name, "non-string version spec, skipping");
                continue;
            };
            if LOCAL_PREFIXES.iter().any(|p| spec.starts_with(p)) || spec.contains("://") {
                debug!(package = %name, spec, "non-registry dependency, skipping");
                continue;
            }

            let (name, spec) = resolve_alias(name, spec);
            deps.push(Dependency::new(
                Ecosystem::Npm,
                name.to_lowercase(),
                spec,
                manifest.to_path_buf(),
                ManifestKind::PackageJson,
            ));
        }
    }

    Ok(deps)
}

/// `"alias": "npm:real-name@^1.0"` installs `real-name`.
fn resolve_alias<'a>(name: &'a str, spec: &'a str) -> (&'a str, &'a str) {
    let Some(target) = spec.strip_prefix("npm:") else {
        return (name, spec);
    };

    // Skip the leading '@' of a scoped name when looking for the version separator.
    let search_from = usize::from(target.starts_with('@'));
    match target[search_from..].find('@') {
        Some(idx) => {
            let at = idx + search_from;
            (&target[..at], &target[at + 1..])
        }
        None => (target, "*"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Vec<Dependency> {
        parse_package_json(content, Path::new("package.json")).unwrap()
    }

    #[test]
    fn test_parse_all_sections() {
        let deps = parse(
            r#"{
                "name": "app",
                "dependencies": { "lodash": "4.17.15", "express": "^4.18.0" },
                "devDependencies": { "jest": "~29.0.0" },
                "optionalDependencies": { "fsevents": "2.3.2" }
            }"#,
        );

        let names: Vec<_> = deps.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["express", "lodash", "jest", "fsevents"]);
        assert_eq!(deps[1].declared_version, "4.17.15");
        assert!(deps.iter().all(|d| d.ecosystem == Ecosystem::Npm));
    }

    #[test]
    fn test_names_are_lowercased_and_scopes_kept() {
        let deps = parse(r#"{"dependencies": {"@Babel/Core": "7.22.0", "JSONStream": "1.3.5"}}"#);
        assert_eq!(deps[0].name, "@babel/core");
        assert_eq!(deps[1].name, "jsonstream");
    }

    #[test]
    fn test_alias_resolves_to_real_package() {
        let deps = parse(r#"{"dependencies": {"old-lodash": "npm:lodash@4.17.15", "core": "npm:@angular/core@^16.0.0"}}"#);
        assert_eq!(deps[0].name, "@angular/core");
        assert_eq!(deps[0].declared_version, "^16.0.0");
        assert_eq!(deps[1].name, "lodash");
        assert_eq!(deps[1].declared_version, "4.17.15");
    }

    #[test]
    fn test_local_and_git_specs_skipped() {
        let deps = parse(
            r#"{"dependencies": {
                "local": "file:../local",
                "ws": "workspace:*",
                "fork": "git+https://github.com/me/fork.git",
                "tarball": "https://example.com/pkg.tgz",
                "real": "1.0.0"
            }}"#,
        );
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "real");
    }

    #[test]
    fn test_malformed_json_is_error() {
        let err = parse_package_json("{ \"dependencies\": ", Path::new("web/package.json")).unwrap_err();
        assert!(err.to_string().contains("web/package.json"));
    }

    #[test]
    fn test_missing_sections_yield_nothing() {
        assert!(parse(r#"{"name": "empty"}"#).is_empty());
    }
}
