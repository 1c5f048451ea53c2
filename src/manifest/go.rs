use std::path::Path;

use super::ManifestKind;
use crate::error::ManifestError;
use crate::model::{Dependency, Ecosystem};

/// Parses `require` directives, both single-line and block form.
///
/// Requirements marked `// indirect` are not declared by the project itself and
/// are skipped.
pub(super) fn parse_go_mod(content: &str, manifest: &Path) -> Result<Vec<Dependency>, ManifestError> {
    let mut deps = Vec::new();
    let mut in_block = false;

    for (lineno, raw) in content.lines().enumerate() {
        let (line, comment) = match raw.find("//") {
            Some(idx) => (raw[..idx].trim(), raw[idx + 2..].trim()),
            None => (raw.trim(), ""),
        };

        let spec = if in_block {
            if line == ")" {
                in_block = false;
                continue;
            }
            line
        } else if let Some(rest) = line.strip_prefix("require") {
            let rest = rest.trim();
            if rest == "(" {
                in_block = true;
                continue;
            }
            rest
        } else {
            continue;
        };

        if spec.is_empty() || comment == "indirect" {
            continue;
        }

        let mut parts = spec.split_whitespace();
        let (Some(module), Some(version)) = (parts.next(), parts.next()) else {
            return Err(ManifestError::parse(
                manifest.display().to_string(),
                format!("line {}: malformed require '{}'", lineno + 1, spec),
            ));
        };

        deps.push(Dependency::new(
            Ecosystem::Go,
            module.trim_matches('"'),
            version,
            manifest.to_path_buf(),
            ManifestKind::GoMod,
        ));
    }

    if in_block {
        return Err(ManifestError::parse(
            manifest.display().to_string(),
            "unterminated require block",
        ));
    }

    Ok(deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_require_forms() {
        let content = r#"module github.com/acme/svc

go 1.21

require github.com/gin-gonic/gin v1.9.0

require (
	golang.org/x/net v0.17.0
	github.com/stretchr/testify v1.8.4 // test only
	golang.org/x/sys v0.13.0 // indirect
)
"#;
        let deps = parse_go_mod(content, Path::new("go.mod")).unwrap();
        let found: Vec<_> = deps
            .iter()
            .map(|d| (d.name.as_str(), d.declared_version.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("github.com/gin-gonic/gin", "v1.9.0"),
                ("golang.org/x/net", "v0.17.0"),
                ("github.com/stretchr/testify", "v1.8.4"),
            ]
        );
        assert!(deps.iter().all(|d| d.ecosystem == Ecosystem::Go));
    }

    #[test]
    fn test_pinned_go_versions_resolve() {
        let deps = parse_go_mod("require golang.org/x/net v0.17.0\n", Path::new("go.mod")).unwrap();
        assert_eq!(deps[0].query_version(), Some("0.17.0".to_string()));
    }

    #[test]
    fn test_malformed_require_is_error() {
        assert!(parse_go_mod("require (\n\tgolang.org/x/net\n)\n", Path::new("go.mod")).is_err());
        assert!(parse_go_mod("require (\n\tgolang.org/x/net v0.1.0\n", Path::new("go.mod")).is_err());
    }
}
