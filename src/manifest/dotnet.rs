use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use super::ManifestKind;
use crate::error::ManifestError;
use crate::model::{Dependency, Ecosystem};

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<PackageReference\b([^>]*?)(?:/>|>(.*?)</PackageReference>)"#)
            .expect("package reference regex is valid")
    })
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    let pattern = format!(r#"\b{name}\s*=\s*"([^"]*)""#);
    let re = Regex::new(&pattern).ok()?;
    re.captures(attrs).map(|c| c[1].trim().to_string())
}

fn child(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].trim().to_string())
}

/// Parses `<PackageReference Include="..." Version="..."/>` and the
/// child-element `<Version>` form.
pub(super) fn parse_csproj(content: &str, manifest: &Path) -> Result<Vec<Dependency>, ManifestError> {
    if !content.contains("<Project") {
        return Err(ManifestError::parse(
            manifest.display().to_string(),
            "missing <Project> element",
        ));
    }

    let deps = reference_regex()
        .captures_iter(content)
        .filter_map(|caps| {
            let attrs = caps.get(1).map_or("", |m| m.as_str());
            let body = caps.get(2).map_or("", |m| m.as_str());

            let name = attribute(attrs, "Include").or_else(|| attribute(attrs, "Update"))?;
            let version = attribute(attrs, "Version")
                .or_else(|| child(body, "Version"))
                .unwrap_or_else(|| "*".to_string());

            Some(Dependency::new(
                Ecosystem::NuGet,
                name,
                version,
                manifest.to_path_buf(),
                ManifestKind::Csproj,
            ))
        })
        .collect();

    Ok(deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_package_references() {
        let content = r#"<Project Sdk="Microsoft.NET.Sdk">
  <ItemGroup>
    <PackageReference Include="Newtonsoft.Json" Version="12.0.1" />
    <PackageReference Include="Serilog">
      <Version>2.10.0</Version>
    </PackageReference>
    <PackageReference Include="System.Text.Json" Version="[6.0.0,7.0.0)" />
    <ProjectReference Include="..\Core\Core.csproj" />
  </ItemGroup>
</Project>
"#;
        let deps = parse_csproj(content, Path::new("src/Api/Api.csproj")).unwrap();
        let found: Vec<_> = deps
            .iter()
            .map(|d| (d.name.as_str(), d.declared_version.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("Newtonsoft.Json", "12.0.1"),
                ("Serilog", "2.10.0"),
                ("System.Text.Json", "[6.0.0,7.0.0)"),
            ]
        );
        assert_eq!(deps[0].identity_key().1, "newtonsoft.json");
    }

    #[test]
    fn test_not_a_project_file() {
        assert!(parse_csproj("<xml/>", Path::new("a.csproj")).is_err());
    }
}
