use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::VersionError;
use crate::manifest::ManifestKind;
use crate::version::VersionConstraint;

/// The registry a dependency is resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Npm,
    #[serde(rename = "pypi")]
    PyPI,
    Maven,
    Go,
    #[serde(rename = "cargo")]
    CratesIo,
    #[serde(rename = "rubygems")]
    RubyGems,
    Packagist,
    #[serde(rename = "nuget")]
    NuGet,
    Vcpkg,
    Conan,
}

impl Ecosystem {
    pub const ALL: [Ecosystem; 10] = [
        Ecosystem::Npm,
        Ecosystem::PyPI,
        Ecosystem::Maven,
        Ecosystem::Go,
        Ecosystem::CratesIo,
        Ecosystem::RubyGems,
        Ecosystem::Packagist,
        Ecosystem::NuGet,
        Ecosystem::Vcpkg,
        Ecosystem::Conan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "npm",
            Ecosystem::PyPI => "pypi",
            Ecosystem::Maven => "maven",
            Ecosystem::Go => "go",
            Ecosystem::CratesIo => "cargo",
            Ecosystem::RubyGems => "rubygems",
            Ecosystem::Packagist => "packagist",
            Ecosystem::NuGet => "nuget",
            Ecosystem::Vcpkg => "vcpkg",
            Ecosystem::Conan => "conan",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "npm",
            Ecosystem::PyPI => "PyPI",
            Ecosystem::Maven => "Maven",
            Ecosystem::Go => "Go",
            Ecosystem::CratesIo => "crates.io",
            Ecosystem::RubyGems => "RubyGems",
            Ecosystem::Packagist => "Packagist",
            Ecosystem::NuGet => "NuGet",
            Ecosystem::Vcpkg => "vcpkg",
            Ecosystem::Conan => "Conan",
        }
    }

    /// The ecosystem identifier OSV expects, if OSV indexes this ecosystem.
    pub fn osv_name(&self) -> Option<&'static str> {
        match self {
            Ecosystem::Npm => Some("npm"),
            Ecosystem::PyPI => Some("PyPI"),
            Ecosystem::Maven => Some("Maven"),
            Ecosystem::Go => Some("Go"),
            Ecosystem::CratesIo => Some("crates.io"),
            Ecosystem::RubyGems => Some("RubyGems"),
            Ecosystem::Packagist => Some("Packagist"),
            Ecosystem::NuGet => Some("NuGet"),
            Ecosystem::Conan => Some("ConanCenter"),
            // vcpkg ports are not indexed by OSV
            Ecosystem::Vcpkg => None,
        }
    }

    /// Parses an ecosystem name (case-insensitive), accepting common aliases.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "npm" | "node" | "javascript" | "js" => Some(Self::Npm),
            "pypi" | "pip" | "python" => Some(Self::PyPI),
            "maven" | "java" | "gradle" => Some(Self::Maven),
            "go" | "golang" => Some(Self::Go),
            "cargo" | "rust" | "crates.io" | "crates" => Some(Self::CratesIo),
            "rubygems" | "ruby" | "gem" => Some(Self::RubyGems),
            "packagist" | "composer" | "php" => Some(Self::Packagist),
            "nuget" | "dotnet" | ".net" | "csharp" => Some(Self::NuGet),
            "vcpkg" => Some(Self::Vcpkg),
            "conan" | "conancenter" => Some(Self::Conan),
            _ => None,
        }
    }

    /// Canonical form of a package name for identity comparisons.
    ///
    /// Lowercases and strips registry prefixes; PyPI names additionally follow
    /// PEP 503 (runs of `-`, `_`, `.` collapse to `-`) and crate names treat
    /// `_` and `-` as equivalent.
    pub fn normalize_name(&self, name: &str) -> String {
        let name = name.trim();
        let name = match self {
            Ecosystem::Npm => name.strip_prefix("npm:").unwrap_or(name),
            Ecosystem::Go => name
                .strip_prefix("https://")
                .or_else(|| name.strip_prefix("http://"))
                .unwrap_or(name),
            Ecosystem::Conan => name.split('@').next().unwrap_or(name),
            _ => name,
        };
        let lower = name.to_lowercase();

        match self {
            Ecosystem::PyPI => {
                let mut out = String::with_capacity(lower.len());
                let mut last_sep = false;
                for c in lower.chars() {
                    if matches!(c, '-' | '_' | '.') {
                        if !last_sep {
                            out.push('-');
                        }
                        last_sep = true;
                    } else {
                        out.push(c);
                        last_sep = false;
                    }
                }
                out
            }
            Ecosystem::CratesIo => lower.replace('_', "-"),
            _ => lower,
        }
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A dependency as declared in one manifest.
///
/// The declared version is kept verbatim (pin or range); interpretation is
/// deferred to [`Dependency::constraint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub ecosystem: Ecosystem,
    pub name: String,
    pub declared_version: String,
    /// Path of the manifest, relative to the scanned project root.
    pub manifest_path: PathBuf,
    pub manifest: ManifestKind,
}

impl Dependency {
    pub fn new(
        ecosystem: Ecosystem,
        name: impl Into<String>,
        declared_version: impl Into<String>,
        manifest_path: PathBuf,
        manifest: ManifestKind,
    ) -> Self {
        Self {
            ecosystem,
            name: name.into(),
            declared_version: declared_version.into().trim().to_string(),
            manifest_path,
            manifest,
        }
    }

    pub fn normalized_name(&self) -> String {
        self.ecosystem.normalize_name(&self.name)
    }

    /// `(ecosystem, normalized_name)`: two dependencies with the same key are
    /// the same package.
    pub fn identity_key(&self) -> (Ecosystem, String) {
        (self.ecosystem, self.normalized_name())
    }

    /// Interprets the declared version for range comparisons.
    pub fn constraint(&self) -> Result<VersionConstraint, VersionError> {
        VersionConstraint::parse(self.ecosystem, &self.declared_version)
    }

    /// The version to send to sources that query by exact version.
    ///
    /// Only pinned declarations produce one; ranges are left to the source.
    pub fn query_version(&self) -> Option<String> {
        match self.constraint() {
            Ok(VersionConstraint::Exact(v)) => Some(v.as_str().trim_start_matches(['v', '=']).to_string()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{} ({})", self.name, self.declared_version, self.ecosystem)
    }
}
