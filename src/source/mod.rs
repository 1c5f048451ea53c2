//! Vulnerability data sources.
//!
//! Each source queries one external database for a single dependency and
//! returns the records in the shared [`RawVulnerabilityRecord`] shape. The
//! orchestrator consults them through the [`VulnerabilitySource`] trait, in the
//! order returned by [`default_sources`] (NVD before OSV).

mod nvd;
mod osv;
mod retry;
mod severity;

pub use nvd::NvdSource;
pub use osv::OsvSource;
pub use retry::{query_with_retry, Backoff, RetryPolicy};
pub use severity::{cvss3_base_score, SeverityPolicy};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::config::Config;
use crate::error::{ScanError, SourceError};
use crate::model::{Dependency, RawVulnerabilityRecord, SourceKind};

#[async_trait]
pub trait VulnerabilitySource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Every record this source holds for `dependency`.
    async fn query(&self, dependency: &Dependency) -> Result<Vec<RawVulnerabilityRecord>, SourceError>;
}

/// Builds the configured sources in merge order, wrapping each in the response
/// cache when one is given.
pub fn default_sources(
    config: &Config,
    cache: Option<Cache>,
) -> Result<Vec<Arc<dyn VulnerabilitySource>>, ScanError> {
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .user_agent(concat!("vulscan/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ScanError::HttpClient(e.to_string()))?;

    let mut sources: Vec<Arc<dyn VulnerabilitySource>> = Vec::new();
    if config.nvd.enabled {
        let nvd = NvdSource::new(client.clone(), &config.nvd, config.severity);
        sources.push(wrap(nvd, cache.as_ref()));
    }
    if config.osv.enabled {
        let osv = OsvSource::new(client, &config.osv, config.severity);
        sources.push(wrap(osv, cache.as_ref()));
    }
    Ok(sources)
}

fn wrap<S: VulnerabilitySource + 'static>(source: S, cache: Option<&Cache>) -> Arc<dyn VulnerabilitySource> {
    match cache {
        Some(cache) => Arc::new(Cached::new(source, cache.clone())),
        None => Arc::new(source),
    }
}

/// Serves repeat queries from the file cache. Only successful responses are
/// stored.
pub struct Cached<S> {
    inner: S,
    cache: Cache,
}

impl<S: VulnerabilitySource> Cached<S> {
    pub fn new(inner: S, cache: Cache) -> Self {
        Self { inner, cache }
    }

    fn key(&self, dependency: &Dependency) -> String {
        format!(
            "{}_{}_{}_{}",
            self.inner.kind().as_str().to_lowercase(),
            dependency.ecosystem.as_str(),
            dependency.normalized_name(),
            dependency.declared_version
        )
    }
}

#[async_trait]
impl<S: VulnerabilitySource> VulnerabilitySource for Cached<S> {
    fn kind(&self) -> SourceKind {
        self.inner.kind()
    }

    async fn query(&self, dependency: &Dependency) -> Result<Vec<RawVulnerabilityRecord>, SourceError> {
        let key = self.key(dependency);
        if let Some(records) = self.cache.get::<Vec<RawVulnerabilityRecord>>(&key) {
            debug!(source = %self.kind(), package = %dependency.name, "cache hit");
            return Ok(records);
        }

        let records = self.inner.query(dependency).await?;
        if let Err(e) = self.cache.set(&key, &records) {
            warn!(key = %key, error = %e, "failed to write cache entry");
        }
        Ok(records)
    }
}

/// Sends `request` and decodes a JSON body, mapping transport and HTTP
/// failures onto [`SourceError`].
///
/// 429 (and 403 from NVD, which it returns when throttling keyless clients)
/// is a rate limit; 5xx and transport errors are unavailability; any other
/// non-success status or undecodable body is a malformed response.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    kind: SourceKind,
    request: reqwest::RequestBuilder,
) -> Result<T, SourceError> {
    let response = request.send().await.map_err(|e| SourceError::Unavailable {
        source_kind: kind,
        reason: e.to_string(),
    })?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS || (kind == SourceKind::Nvd && status == StatusCode::FORBIDDEN) {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(SourceError::RateLimited {
            source_kind: kind,
            retry_after,
        });
    }
    if status.is_server_error() {
        return Err(SourceError::Unavailable {
            source_kind: kind,
            reason: format!("HTTP {status}"),
        });
    }
    if !status.is_success() {
        return Err(SourceError::MalformedResponse {
            source_kind: kind,
            reason: format!("unexpected HTTP {status}"),
        });
    }

    let body = response.text().await.map_err(|e| SourceError::Unavailable {
        source_kind: kind,
        reason: e.to_string(),
    })?;
    serde_json::from_str(&body).map_err(|e| SourceError::MalformedResponse {
        source_kind: kind,
        reason: e.to_string(),
    })
}
