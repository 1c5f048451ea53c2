//! Dependency manifest discovery and parsing.
//!
//! [`ManifestKind`] is the closed set of manifest formats understood by the
//! scanner. Each variant can [`detect`](ManifestKind::detect) its file and
//! [`parse`](ManifestKind::parse) it into [`Dependency`] values.
//! [`ProjectManifests`] walks a project tree and yields dependencies lazily,
//! one manifest at a time.
//!
//! # Supported Manifests
//!
//! | Manifest | Ecosystem |
//! |----------|-----------|
//! | `package.json` | npm |
//! | `requirements*.txt`, `pyproject.toml`, `Pipfile` | PyPI |
//! | `pom.xml`, `build.gradle`, `build.gradle.kts` | Maven |
//! | `go.mod` | Go |
//! | `Cargo.toml` | crates.io |
//! | `Gemfile` | RubyGems |
//! | `composer.json` | Packagist |
//! | `vcpkg.json`, `conanfile.txt` | vcpkg, Conan |
//! | `*.csproj` | NuGet |
//!
//! # Example
//!
//! ```no_run
//! use vulscan::manifest::ProjectManifests;
//!
//! let manifests = ProjectManifests::discover("./my-project", &[], &[]);
//! for dep in manifests.dependencies() {
//!     println!("{dep}");
//! }
//! ```

mod cargo;
mod dotnet;
mod go;
mod jvm;
mod native;
mod npm;
mod php;
mod python;
mod ruby;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::ManifestError;
use crate::model::{Dependency, Ecosystem};

/// Manifests larger than this are skipped.
const MAX_MANIFEST_SIZE: u64 = 10 * 1024 * 1024;

/// Directories never descended into.
pub const DEFAULT_SKIP_DIRS: &[&str] = &[
    "node_modules",
    "venv",
    ".venv",
    "__pycache__",
    ".git",
    "dist",
    "build",
    "target",
    "vendor",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestKind {
    PackageJson,
    RequirementsTxt,
    PyprojectToml,
    Pipfile,
    PomXml,
    BuildGradle,
    GoMod,
    CargoToml,
    Gemfile,
    ComposerJson,
    VcpkgJson,
    ConanfileTxt,
    Csproj,
}

impl ManifestKind {
    pub const ALL: [ManifestKind; 13] = [
        ManifestKind::PackageJson,
        ManifestKind::RequirementsTxt,
        ManifestKind::PyprojectToml,
        ManifestKind::Pipfile,
        ManifestKind::PomXml,
        ManifestKind::BuildGradle,
        ManifestKind::GoMod,
        ManifestKind::CargoToml,
        ManifestKind::Gemfile,
        ManifestKind::ComposerJson,
        ManifestKind::VcpkgJson,
        ManifestKind::ConanfileTxt,
        ManifestKind::Csproj,
    ];

    pub fn ecosystem(&self) -> Ecosystem {
        match self {
            ManifestKind::PackageJson => Ecosystem::Npm,
            ManifestKind::RequirementsTxt | ManifestKind::PyprojectToml | ManifestKind::Pipfile => {
                Ecosystem::PyPI
            }
            ManifestKind::PomXml | ManifestKind::BuildGradle => Ecosystem::Maven,
            ManifestKind::GoMod => Ecosystem::Go,
            ManifestKind::CargoToml => Ecosystem::CratesIo,
            ManifestKind::Gemfile => Ecosystem::RubyGems,
            ManifestKind::ComposerJson => Ecosystem::Packagist,
            ManifestKind::VcpkgJson => Ecosystem::Vcpkg,
            ManifestKind::ConanfileTxt => Ecosystem::Conan,
            ManifestKind::Csproj => Ecosystem::NuGet,
        }
    }

    /// A representative file name, for listings.
    pub fn file_pattern(&self) -> &'static str {
        match self {
            ManifestKind::PackageJson => "package.json",
            ManifestKind::RequirementsTxt => "requirements*.txt",
            ManifestKind::PyprojectToml => "pyproject.toml",
            ManifestKind::Pipfile => "Pipfile",
            ManifestKind::PomXml => "pom.xml",
            ManifestKind::BuildGradle => "build.gradle[.kts]",
            ManifestKind::GoMod => "go.mod",
            ManifestKind::CargoToml => "Cargo.toml",
            ManifestKind::Gemfile => "Gemfile",
            ManifestKind::ComposerJson => "composer.json",
            ManifestKind::VcpkgJson => "vcpkg.json",
            ManifestKind::ConanfileTxt => "conanfile.txt",
            ManifestKind::Csproj => "*.csproj",
        }
    }

    /// Whether `path` is a manifest of this kind, judged by file name.
    pub fn detect(&self, path: &Path) -> bool {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };

        match self {
            ManifestKind::PackageJson => file_name == "package.json",
            ManifestKind::RequirementsTxt => {
                file_name.starts_with("requirements") && file_name.ends_with(".txt")
            }
            ManifestKind::PyprojectToml => file_name == "pyproject.toml",
            ManifestKind::Pipfile => file_name == "Pipfile",
            ManifestKind::PomXml => file_name == "pom.xml",
            ManifestKind::BuildGradle => {
                file_name == "build.gradle" || file_name == "build.gradle.kts"
            }
            ManifestKind::GoMod => file_name == "go.mod",
            ManifestKind::CargoToml => file_name == "Cargo.toml",
            ManifestKind::Gemfile => file_name == "Gemfile",
            ManifestKind::ComposerJson => file_name == "composer.json",
            ManifestKind::VcpkgJson => file_name == "vcpkg.json",
            ManifestKind::ConanfileTxt => file_name == "conanfile.txt",
            ManifestKind::Csproj => file_name.ends_with(".csproj"),
        }
    }

    /// Returns the kind of manifest at `path`, if any.
    pub fn for_path(path: &Path) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.detect(path))
    }

    /// Reads and parses the manifest at `path`.
    ///
    /// `display_path` is stored on each [`Dependency`] (normally the path
    /// relative to the project root).
    pub fn parse(&self, path: &Path, display_path: &Path) -> Result<Vec<Dependency>, ManifestError> {
        let path_str = display_path.display().to_string();
        let metadata = fs::metadata(path).map_err(|source| ManifestError::Read {
            path: path_str.clone(),
            source,
        })?;
        if metadata.len() > MAX_MANIFEST_SIZE {
            return Err(ManifestError::TooLarge {
                path: path_str,
                size: metadata.len(),
                max: MAX_MANIFEST_SIZE,
            });
        }

        let bytes = fs::read(path).map_err(|source| ManifestError::Read {
            path: path_str,
            source,
        })?;
        let content = String::from_utf8_lossy(&bytes);
        self.parse_str(&content, display_path)
    }

    /// Parses manifest content already in memory.
    pub fn parse_str(&self, content: &str, manifest: &Path) -> Result<Vec<Dependency>, ManifestError> {
        match self {
            ManifestKind::PackageJson => npm::parse_package_json(content, manifest),
            ManifestKind::RequirementsTxt => python::parse_requirements(content, manifest),
            ManifestKind::PyprojectToml => python::parse_pyproject(content, manifest),
            ManifestKind::Pipfile => python::parse_pipfile(content, manifest),
            ManifestKind::PomXml => jvm::parse_pom(content, manifest),
            ManifestKind::BuildGradle => jvm::parse_gradle(content, manifest),
            ManifestKind::GoMod => go::parse_go_mod(content, manifest),
            ManifestKind::CargoToml => cargo::parse_cargo_toml(content, manifest),
            ManifestKind::Gemfile => ruby::parse_gemfile(content, manifest),
            ManifestKind::ComposerJson => php::parse_composer_json(content, manifest),
            ManifestKind::VcpkgJson => native::parse_vcpkg_json(content, manifest),
            ManifestKind::ConanfileTxt => native::parse_conanfile(content, manifest),
            ManifestKind::Csproj => dotnet::parse_csproj(content, manifest),
        }
    }
}

impl std::fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_pattern())
    }
}

/// The result of parsing one discovered manifest.
#[derive(Debug)]
pub struct ManifestOutcome {
    /// Path relative to the project root.
    pub path: PathBuf,
    pub kind: ManifestKind,
    pub result: Result<Vec<Dependency>, ManifestError>,
}

/// All manifests found under a project root.
///
/// Discovery happens once; parsing happens lazily on each call to
/// [`iter`](Self::iter), so the sequence can be restarted and always re-reads
/// the same files in the same order.
#[derive(Debug, Clone)]
pub struct ProjectManifests {
    root: PathBuf,
    manifests: Vec<(PathBuf, ManifestKind)>,
}

impl ProjectManifests {
    /// Walks `root` and records every supported manifest, sorted by path.
    ///
    /// `skip_dirs` extends [`DEFAULT_SKIP_DIRS`]; `ecosystems` restricts the
    /// kinds collected (empty means all).
    pub fn discover(root: impl AsRef<Path>, skip_dirs: &[String], ecosystems: &[Ecosystem]) -> Self {
        let root = root.as_ref().to_path_buf();
        let skip = |name: &str| {
            DEFAULT_SKIP_DIRS.contains(&name) || skip_dirs.iter().any(|s| s == name)
        };

        let mut manifests: Vec<(PathBuf, ManifestKind)> = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !entry.file_name().to_str().is_some_and(skip)
            })
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "failed to read directory entry, skipping");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let kind = ManifestKind::for_path(entry.path())?;
                (ecosystems.is_empty() || ecosystems.contains(&kind.ecosystem()))
                    .then(|| (entry.into_path(), kind))
            })
            .collect();

        manifests.sort();
        debug!(root = %root.display(), count = manifests.len(), "discovered manifests");

        Self { root, manifests }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    /// Manifest paths relative to the root.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.manifests
            .iter()
            .map(|(path, _)| self.relative(path))
            .collect()
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Parses each manifest as the iterator advances.
    pub fn iter(&self) -> impl Iterator<Item = ManifestOutcome> + '_ {
        self.manifests.iter().map(move |(path, kind)| {
            let relative = self.relative(path);
            let result = kind.parse(path, &relative);
            match &result {
                Ok(deps) => debug!(path = %relative.display(), count = deps.len(), "parsed manifest"),
                Err(e) => warn!(path = %relative.display(), error = %e, "failed to parse manifest, skipping"),
            }
            ManifestOutcome {
                path: relative,
                kind: *kind,
                result,
            }
        })
    }

    /// Every dependency from every parseable manifest; broken manifests are
    /// skipped.
    pub fn dependencies(&self) -> impl Iterator<Item = Dependency> + '_ {
        self.iter()
            .filter_map(|outcome| outcome.result.ok())
            .flatten()
    }
}
