//! Core data types for dependencies, vulnerability records and scan reports.
//!
//! - [`Dependency`] - A declared dependency read from one manifest
//! - [`Ecosystem`] - The package registry a dependency belongs to
//! - [`RawVulnerabilityRecord`] - One advisory as reported by one source
//! - [`MergedFinding`] - The cross-source view of a vulnerable dependency
//! - [`RemediationPlan`] - What to do about a finding
//! - [`ScanReport`] - Complete scan results
//!
//! # Example
//!
//! ```
//! use std::path::PathBuf;
//! use vulscan::manifest::ManifestKind;
//! use vulscan::model::{Dependency, Ecosystem};
//!
//! let dep = Dependency::new(
//!     Ecosystem::Npm,
//!     "Lodash",
//!     "4.17.15",
//!     PathBuf::from("package.json"),
//!     ManifestKind::PackageJson,
//! );
//! assert_eq!(dep.identity_key(), (Ecosystem::Npm, "lodash".to_string()));
//! ```

mod dependency;
mod report;
mod vulnerability;

pub use dependency::*;
pub use report::*;
pub use vulnerability::*;
