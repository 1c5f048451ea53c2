//! File-based caching for source responses.
//!
//! A simple file cache with TTL (time-to-live) support, used to avoid
//! re-querying NVD and OSV for dependencies seen in a recent scan.
//!
//! # Cache Location
//!
//! The cache is stored in platform-specific directories:
//! - Linux: `~/.cache/vulscan/`
//! - macOS: `~/Library/Caches/vulscan/`
//! - Windows: `%LOCALAPPDATA%\vulscan\`
//!
//! # Example
//!
//! ```no_run
//! use vulscan::Cache;
//!
//! let cache = Cache::new();
//!
//! cache.set("my_key", &"cached value".to_string()).unwrap();
//!
//! let value: Option<String> = cache.get("my_key");
//! assert_eq!(value, Some("cached value".to_string()));
//! ```

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Default cache TTL in hours.
const CACHE_TTL_HOURS: u64 = 24;

/// Returns the platform cache directory for vulscan.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vulscan")
}

/// A file-based cache with TTL support.
///
/// Values are stored as JSON files in the cache directory. Each entry
/// expires after the configured TTL period.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
    ttl: Duration,
}

impl Cache {
    /// Creates a new cache with the default 24-hour TTL.
    pub fn new() -> Self {
        Self::with_ttl_hours(CACHE_TTL_HOURS)
    }

    /// Creates a new cache with a custom TTL.
    ///
    /// # Example
    ///
    /// ```
    /// use vulscan::Cache;
    ///
    /// // Cache that expires after 1 hour
    /// let cache = Cache::with_ttl_hours(1);
    /// ```
    pub fn with_ttl_hours(hours: u64) -> Self {
        Self::with_dir(cache_dir(), Duration::from_secs(hours * 3600))
    }

    /// Creates a cache rooted at an explicit directory.
    pub fn with_dir(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)
                .with_context(|| format!("failed to create cache dir {}", self.dir.display()))?;
        }
        Ok(())
    }

    /// Converts a cache key to a safe filename.
    fn cache_path(&self, key: &str) -> PathBuf {
        let safe_key: String = key
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe_key))
    }

    /// Retrieves a value from the cache.
    ///
    /// Returns `None` if the key doesn't exist, has expired, or no longer
    /// deserializes into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.cache_path(key);

        if !path.exists() {
            return None;
        }

        if let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) {
            if let Ok(elapsed) = SystemTime::now().duration_since(modified) {
                if elapsed > self.ttl {
                    debug!(key, "cache entry expired");
                    let _ = fs::remove_file(&path);
                    return None;
                }
            }
        }

        let content = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Stores a value in the cache.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.ensure_dir()?;
        let path = self.cache_path(key);
        let content = serde_json::to_string(value)?;
        fs::write(&path, content)
            .with_context(|| format!("failed to write cache entry {}", path.display()))?;
        Ok(())
    }

    /// Clears all cached entries, returning how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)?.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "json") && fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path(), Duration::from_secs(60));

        cache.set("osv_npm_lodash_4.17.15", &vec!["GHSA-35jh-r3h4-6jhm"]).unwrap();
        let value: Option<Vec<String>> = cache.get("osv_npm_lodash_4.17.15");
        assert_eq!(value, Some(vec!["GHSA-35jh-r3h4-6jhm".to_string()]));
    }

    #[test]
    fn test_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path(), Duration::from_secs(60));
        assert_eq!(cache.get::<String>("absent"), None);
    }

    #[test]
    fn test_expired_entry_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path(), Duration::ZERO);

        cache.set("k", &1u32).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get::<u32>("k"), None);
        assert!(!cache.cache_path("k").exists());
    }

    #[test]
    fn test_unsafe_key_characters() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path(), Duration::from_secs(60));
        let path = cache.cache_path("nvd/@babel/core:7.0");
        assert_eq!(path.file_name().unwrap(), "nvd__babel_core_7.0.json");
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path(), Duration::from_secs(60));
        cache.set("a", &1u32).unwrap();
        cache.set("b", &2u32).unwrap();

        assert_eq!(cache.clear().unwrap(), 2);
        assert_eq!(cache.get::<u32>("a"), None);
    }
}
