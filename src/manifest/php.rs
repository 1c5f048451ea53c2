use serde_json::Value;
use std::path::Path;

use super::ManifestKind;
use crate::error::ManifestError;
use crate::model::{Dependency, Ecosystem};

/// Platform requirements, not Packagist packages.
fn is_platform_package(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower == "php"
        || lower == "composer-plugin-api"
        || lower == "composer-runtime-api"
        || lower.starts_with("ext-")
        || lower.starts_with("lib-")
        || lower.starts_with("php-")
}

pub(super) fn parse_composer_json(content: &str, manifest: &Path) -> Result<Vec<Dependency>, ManifestError> {
    let json: Value = serde_json::from_str(content)
        .map_err(|e| ManifestError::parse(manifest.display().to_string(), e))?;

    let deps = ["require", "require-dev"]
        .into_iter()
        .filter_map(|section| json.get(section).and_then(Value::as_object))
        .flatten()
        .filter(|(name, _)| !is_platform_package(name))
        .filter_map(|(name, spec)| {
            let spec = spec.as_str()?;
            Some(Dependency::new(
                Ecosystem::Packagist,
                name.to_lowercase(),
                spec,
                manifest.to_path_buf(),
                ManifestKind::ComposerJson,
            ))
        })
        .collect();

    Ok(deps)
}
