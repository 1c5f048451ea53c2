//! Turns a merged finding into deterministic remediation instructions.
//!
//! A fix is a *version upgrade* when the patched release lies outside what
//! the manifest currently declares. Upgrades always carry
//! [`UPGRADE_WARNING`] and exactly five steps; everything else gets
//! fix-specific guidance followed by the two closing steps.

use crate::manifest::ManifestKind;
use crate::model::{Dependency, Ecosystem, MergedFinding, RemediationPlan};
use crate::version::{is_newer, Version, VersionConstraint};

pub const UPGRADE_WARNING: &str = "WARNING: This fix requires a version upgrade. This may introduce breaking changes. Test thoroughly in a staging environment before deploying to production.";

pub const RUN_TESTS_STEP: &str = "Run full test suite";

pub const DEPLOY_STEP: &str = "Deploy to staging and monitor";

/// Builds the remediation plan for `finding`.
pub fn classify(finding: MergedFinding) -> RemediationPlan {
    let dependency = finding.dependency.clone();
    let fixed = finding.fixed_version.clone();

    let (requires_upgrade, steps) = match fixed.as_deref() {
        Some(fixed) if requires_upgrade(&dependency, fixed) => (true, upgrade_steps(&finding, fixed)),
        _ => (false, guidance_steps(&finding)),
    };

    RemediationPlan {
        dependency,
        target_version: fixed,
        warning: requires_upgrade.then(|| UPGRADE_WARNING.to_string()),
        requires_upgrade,
        steps,
        narrative: None,
        merged_finding: finding,
    }
}

/// Whether moving to `fixed` means changing the declared version.
///
/// Pins need an upgrade when `fixed` is newer; ranges when `fixed` falls
/// outside them, or when the ecosystem restores the lowest admitted version
/// and that version is still below `fixed`. Declarations that cannot be
/// interpreted, and fixed versions that cannot be compared, are treated as
/// needing an upgrade.
pub fn requires_upgrade(dependency: &Dependency, fixed: &str) -> bool {
    match dependency.constraint() {
        Ok(VersionConstraint::Exact(pinned)) => is_newer(fixed, pinned.as_str()),
        Ok(constraint) => match Version::parse(fixed) {
            Ok(fixed) => {
                !constraint.matches(&fixed)
                    || (resolves_lowest(dependency)
                        && matches!(constraint, VersionConstraint::Range(_))
                        && constraint.admits_below(&fixed))
            }
            Err(_) => true,
        },
        Err(_) => true,
    }
}

/// NuGet restores the lowest version a range admits; floating versions
/// (`12.0.*`) resolve to the newest match instead.
fn resolves_lowest(dependency: &Dependency) -> bool {
    dependency.ecosystem == Ecosystem::NuGet && !dependency.declared_version.contains('*')
}

fn upgrade_steps(finding: &MergedFinding, fixed: &str) -> Vec<String> {
    let dep = &finding.dependency;
    let changelog = finding
        .changelog_url
        .clone()
        .unwrap_or_else(|| registry_url(dep, fixed));

    vec![
        format!(
            "Update {} in {} to version {}",
            dep.name,
            dep.manifest_path.display(),
            fixed
        ),
        install_command(dep.manifest, &dep.name, fixed),
        format!("Review changelog: {changelog}"),
        RUN_TESTS_STEP.to_string(),
        DEPLOY_STEP.to_string(),
    ]
}

/// The command that installs `version` of `name` for a manifest format.
pub fn install_command(manifest: ManifestKind, name: &str, version: &str) -> String {
    let bare = version.trim_start_matches('v');
    match manifest {
        ManifestKind::PackageJson => format!("npm install {name}@{bare}"),
        ManifestKind::RequirementsTxt | ManifestKind::PyprojectToml => {
            format!("pip install \"{name}=={bare}\"")
        }
        ManifestKind::Pipfile => format!("pipenv install \"{name}=={bare}\""),
        ManifestKind::PomXml => "mvn -U dependency:resolve".to_string(),
        ManifestKind::BuildGradle => "gradle build --refresh-dependencies".to_string(),
        ManifestKind::GoMod => format!("go get {name}@v{bare}"),
        ManifestKind::CargoToml => format!("cargo update -p {name} --precise {bare}"),
        ManifestKind::Gemfile => format!("bundle update {name}"),
        ManifestKind::ComposerJson => format!("composer require {name}:{bare}"),
        ManifestKind::VcpkgJson => format!("vcpkg install {name}"),
        ManifestKind::ConanfileTxt => "conan install . --update".to_string(),
        ManifestKind::Csproj => format!("dotnet add package {name} --version {bare}"),
    }
}

/// Registry page listing the releases of a package.
pub fn registry_url(dependency: &Dependency, version: &str) -> String {
    let name = &dependency.name;
    let bare = version.trim_start_matches('v');
    match dependency.ecosystem {
        Ecosystem::Npm => format!("https://www.npmjs.com/package/{name}?activeTab=versions"),
        Ecosystem::PyPI => format!("https://pypi.org/project/{}/{bare}/", dependency.normalized_name()),
        Ecosystem::Maven => match name.split_once(':') {
            Some((group, artifact)) => {
                format!("https://central.sonatype.com/artifact/{group}/{artifact}/{bare}")
            }
            None => format!("https://central.sonatype.com/search?q={name}"),
        },
        Ecosystem::Go => format!("https://pkg.go.dev/{name}?tab=versions"),
        Ecosystem::CratesIo => format!("https://crates.io/crates/{name}/{bare}"),
        Ecosystem::RubyGems => format!("https://rubygems.org/gems/{name}/versions/{bare}"),
        Ecosystem::Packagist => format!("https://packagist.org/packages/{name}#v{bare}"),
        Ecosystem::NuGet => format!("https://www.nuget.org/packages/{name}/{bare}"),
        Ecosystem::Vcpkg => format!("https://vcpkg.io/en/package/{name}"),
        Ecosystem::Conan => format!("https://conan.io/center/recipes/{name}?version={bare}"),
    }
}

/// Description keywords and the guidance they imply. Checked in order.
const GUIDANCE: &[(&[&str], &str)] = &[
    (
        &["sql injection"],
        "Use parameterized queries for all database access that reaches {name}",
    ),
    (
        &["cross-site scripting", "xss"],
        "Escape untrusted output rendered through {name}",
    ),
    (
        &["deserializ"],
        "Do not pass untrusted data to {name} deserialization APIs",
    ),
    (
        &["path traversal", "directory traversal"],
        "Normalize and validate file paths before passing them to {name}",
    ),
    (
        &["server-side request forgery", "ssrf"],
        "Restrict outbound requests made through {name} to trusted hosts",
    ),
    (
        &["denial of service", "redos", "regular expression"],
        "Limit the size of untrusted input passed to {name}",
    ),
    (
        &["injection", "untrusted input", "user input"],
        "Validate and sanitize untrusted input before it reaches {name}",
    ),
    (
        &["configuration", "misconfig", "default setting", "insecure default"],
        "Review the {name} configuration and disable insecure defaults",
    ),
];

fn guidance_steps(finding: &MergedFinding) -> Vec<String> {
    let dep = &finding.dependency;
    let text = finding.descriptions.join(" ").to_lowercase();

    let mut steps: Vec<String> = GUIDANCE
        .iter()
        .filter(|(keywords, _)| keywords.iter().any(|k| text.contains(k)))
        .map(|(_, template)| template.replace("{name}", &dep.name))
        .collect();
    steps.dedup();

    if steps.is_empty() {
        steps.push(format!(
            "Review the advisory for {} and apply the recommended configuration or code change",
            dep.name
        ));
    }

    if let Some(fixed) = finding.fixed_version.as_deref() {
        steps.push(format!(
            "Regenerate the lockfile for {}; the declared range {} already admits the patched release {}",
            dep.manifest_path.display(),
            dep.declared_version,
            fixed
        ));
    }

    steps.push(RUN_TESTS_STEP.to_string());
    steps.push(DEPLOY_STEP.to_string());
    steps
}
