//! Configuration file handling.
//!
//! This module provides loading and saving of vulscan configuration
//! from a TOML file.
//!
//! # Configuration Location
//!
//! The configuration file is stored at:
//! - Linux: `~/.config/vulscan/config.toml`
//! - macOS: `~/Library/Application Support/vulscan/config.toml`
//! - Windows: `%APPDATA%\vulscan\config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! cache_ttl_hours = 24
//! default_format = "table"
//! concurrency = 8
//! scan_timeout_secs = 300
//!
//! [nvd]
//! enabled = true
//! api_key = "..."
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 500
//!
//! [severity]
//! osv_default = "MEDIUM"
//!
//! [ignore]
//! packages = ["@types/*"]
//! vulnerabilities = ["CVE-2021-12345"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::Dependency;
use crate::source::{RetryPolicy, SeverityPolicy};

/// Environment variable that overrides `nvd.api_key`.
pub const NVD_API_KEY_ENV: &str = "NVD_API_KEY";

pub const DEFAULT_NVD_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";
pub const DEFAULT_OSV_URL: &str = "https://api.osv.dev/v1/query";

/// Application configuration.
///
/// Loaded from a TOML file or created with default values. Every field has a
/// default, so partial files are fine.
///
/// # Example
///
/// ```no_run
/// use vulscan::Config;
///
/// let config = Config::load().unwrap();
///
/// println!("Concurrency: {}", config.concurrency);
/// println!("Scan timeout: {:?}", config.scan_timeout());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long to cache source responses, in hours.
    ///
    /// Default: 24 hours
    pub cache_ttl_hours: u64,

    /// Default output format when no `--format` flag is provided.
    ///
    /// Valid values: "table", "json", "markdown", "sarif"
    /// Default: "table"
    pub default_format: String,

    /// Maximum number of dependencies queried at once.
    pub concurrency: usize,

    /// Overall deadline for a scan; unfinished dependencies are reported as
    /// incomplete.
    pub scan_timeout_secs: u64,

    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,

    /// Extra directory names to skip during manifest discovery.
    pub skip_dirs: Vec<String>,

    pub nvd: NvdConfig,

    pub osv: OsvConfig,

    pub retry: RetryPolicy,

    pub severity: SeverityPolicy,

    /// Ignore list configuration for suppressing known issues.
    pub ignore: IgnoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NvdConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Default for NvdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: DEFAULT_NVD_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OsvConfig {
    pub enabled: bool,
    pub base_url: String,
}

impl Default for OsvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: DEFAULT_OSV_URL.to_string(),
        }
    }
}

/// Configuration for ignoring specific packages or vulnerabilities.
///
/// Use this to suppress known false positives or accepted risks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Package names to exclude from scanning.
    ///
    /// Supports glob patterns (e.g., "lodash*", "@types/*"). Patterns are
    /// matched against both the declared and the normalized name.
    pub packages: Vec<String>,

    /// Vulnerability IDs to ignore (e.g., "CVE-2021-12345", "GHSA-xxxx").
    ///
    /// A record is dropped if its id or any alias is listed.
    pub vulnerabilities: Vec<String>,
}

impl IgnoreConfig {
    /// Check if a package should be ignored.
    pub fn should_ignore_package(&self, package_name: &str) -> bool {
        self.packages.iter().any(|pattern| {
            if pattern.contains('*') {
                glob_match(pattern, package_name)
            } else {
                pattern == package_name
            }
        })
    }

    /// Check a dependency by declared and normalized name.
    pub fn should_ignore_dependency(&self, dependency: &Dependency) -> bool {
        self.should_ignore_package(&dependency.name)
            || self.should_ignore_package(&dependency.normalized_name())
    }

    /// Check if a vulnerability should be ignored.
    pub fn should_ignore_vulnerability(&self, vuln_id: &str) -> bool {
        self.vulnerabilities
            .iter()
            .any(|id| id.eq_ignore_ascii_case(vuln_id))
    }
}

/// Simple glob matching (supports * as wildcard).
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();

    if parts.len() == 1 {
        return pattern == text;
    }

    let mut remaining = text;

    // Check prefix (before first *)
    if !parts[0].is_empty() {
        if !remaining.starts_with(parts[0]) {
            return false;
        }
        remaining = &remaining[parts[0].len()..];
    }

    // Check suffix (after last *)
    let last_part = parts[parts.len() - 1];
    if !last_part.is_empty() {
        if !remaining.ends_with(last_part) {
            return false;
        }
        remaining = &remaining[..remaining.len() - last_part.len()];
    }

    // Check middle parts
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        if let Some(pos) = remaining.find(part) {
            remaining = &remaining[pos + part.len()..];
        } else {
            return false;
        }
    }

    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_ttl_hours: 24,
            default_format: "table".to_string(),
            concurrency: 8,
            scan_timeout_secs: 300,
            request_timeout_secs: 30,
            skip_dirs: Vec::new(),
            nvd: NvdConfig::default(),
            osv: OsvConfig::default(),
            retry: RetryPolicy::default(),
            severity: SeverityPolicy::default(),
            ignore: IgnoreConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the config file, then applies environment
    /// overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env_overrides(std::env::var(NVD_API_KEY_ENV).ok());
        Ok(config)
    }

    /// Loads configuration from `path` without environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// A non-empty `NVD_API_KEY` value replaces the configured key.
    pub fn apply_env_overrides(&mut self, nvd_api_key: Option<String>) {
        if let Some(key) = nvd_api_key.filter(|k| !k.trim().is_empty()) {
            self.nvd.api_key = Some(key.trim().to_string());
        }
    }

    /// Saves the configuration to the config file.
    ///
    /// Creates the parent directory if it doesn't exist.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Returns the path to the configuration file.
    ///
    /// # Example
    ///
    /// ```
    /// use vulscan::Config;
    ///
    /// let path = Config::config_path();
    /// println!("Config file: {}", path.display());
    /// ```
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vulscan")
            .join("config.toml")
    }

    /// Generates a string containing the default configuration.
    pub fn generate_default_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
