pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod merge;
pub mod model;
pub mod narrative;
pub mod orchestrator;
pub mod output;
pub mod remediation;
pub mod source;
pub mod version;

pub use cache::Cache;
pub use config::Config;
pub use error::{ManifestError, ScanError, SourceError, VersionError};
pub use model::{Dependency, Ecosystem, MergedFinding, RemediationPlan, ScanReport, ScanRequest, Severity};
pub use orchestrator::Orchestrator;
