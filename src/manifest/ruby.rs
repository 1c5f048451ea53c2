use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use super::ManifestKind;
use crate::error::ManifestError;
use crate::model::{Dependency, Ecosystem};

fn gem_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^gem\s*\(?\s*['"]([^'"]+)['"]((?:\s*,\s*['"][^'"]*['"])*)"#).expect("gem regex is valid")
    })
}

fn quoted_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"['"]([^'"]*)['"]"#).expect("quoted regex is valid"))
}

/// Parses `gem 'name', '~> 1.2', '>= 1.2.1'` lines. Multiple requirements are
/// joined with `,`; gems sourced from git or a path are skipped.
pub(super) fn parse_gemfile(content: &str, manifest: &Path) -> Result<Vec<Dependency>, ManifestError> {
    let deps = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter(|line| !line.contains("git:") && !line.contains("github:") && !line.contains("path:"))
        .filter_map(|line| gem_regex().captures(line))
        .map(|caps| {
            let requirements: Vec<String> = quoted_regex()
                .captures_iter(caps.get(2).map_or("", |m| m.as_str()))
                .map(|c| c[1].split_whitespace().collect::<String>())
                .filter(|r| !r.is_empty())
                .collect();
            let version = if requirements.is_empty() {
                "*".to_string()
            } else {
                requirements.join(",")
            };
            Dependency::new(
                Ecosystem::RubyGems,
                &caps[1],
                version,
                manifest.to_path_buf(),
                ManifestKind::Gemfile,
            )
        })
        .collect();

    Ok(deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gem_lines() {
        let content = r#"
source 'https://rubygems.org'

gem 'rails', '~> 7.0.4'
gem "nokogiri", ">= 1.13", "< 1.16"
gem 'puma'
# gem 'unused', '1.0'
gem 'internal', git: 'https://github.com/acme/internal.git'
gem 'pg', '1.4.5', require: false
group :test do
  gem 'rspec', '3.12.0'
end
"#;
        let deps = parse_gemfile(content, Path::new("Gemfile")).unwrap();
        let found: Vec<_> = deps
            .iter()
            .map(|d| (d.name.as_str(), d.declared_version.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("rails", "~>7.0.4"),
                ("nokogiri", ">=1.13,<1.16"),
                ("puma", "*"),
                ("pg", "1.4.5"),
                ("rspec", "3.12.0"),
            ]
        );
    }

    #[test]
    fn test_pessimistic_constraint_interpreted() {
        let deps = parse_gemfile("gem 'rails', '~> 7.0.4'\n", Path::new("Gemfile")).unwrap();
        let constraint = deps[0].constraint().unwrap();
        assert!(constraint.matches(&"7.0.8".parse().unwrap()));
        assert!(!constraint.matches(&"7.1.0".parse().unwrap()));
    }
}
