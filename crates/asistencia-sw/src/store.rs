//! JSON snapshots of the cache store, so caches outlive the process.

use std::io::ErrorKind;
use std::path::Path;

use asistencia_net::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheEntry, CacheStorage};
use crate::{Result, ServiceWorkerError};

const SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct StorageSnapshot {
    version: u32,
    caches: Vec<CacheSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    name: String,
    entries: Vec<EntrySnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntrySnapshot {
    url: Url,
    method: String,
    cached_at: u64,
    response_url: Url,
    status: u16,
    /// Header names with base64 values; values may carry non-UTF-8 bytes.
    headers: Vec<(String, String)>,
    /// Base64 body.
    body: String,
}

impl EntrySnapshot {
    fn capture(entry: &CacheEntry) -> Self {
        let response = &entry.response;
        Self {
            url: entry.url.clone(),
            method: entry.method.to_string(),
            cached_at: entry.cached_at,
            response_url: response.url.clone(),
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), BASE64.encode(value.as_bytes())))
                .collect(),
            body: BASE64.encode(response.body()),
        }
    }

    fn restore(self) -> Result<CacheEntry> {
        let corrupt = |what: String| ServiceWorkerError::CacheError(format!("corrupt snapshot: {what}"));

        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|e| corrupt(format!("method {:?}: {}", self.method, e)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| corrupt(format!("status {}: {}", self.status, e)))?;
        let body = BASE64
            .decode(self.body.as_bytes())
            .map_err(|e| corrupt(format!("body of {}: {}", self.url, e)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| corrupt(format!("header {name:?}: {e}")))?;
            let raw = BASE64
                .decode(value.as_bytes())
                .map_err(|e| corrupt(format!("header value of {name}: {e}")))?;
            let value = HeaderValue::from_bytes(&raw)
                .map_err(|e| corrupt(format!("header value of {name}: {e}")))?;
            headers.append(name, value);
        }

        let mut response = Response::new(self.response_url, status, body);
        response.headers = headers;

        Ok(CacheEntry {
            url: self.url,
            method,
            response,
            cached_at: self.cached_at,
        })
    }
}

impl CacheStorage {
    fn snapshot(&self) -> StorageSnapshot {
        StorageSnapshot {
            version: SNAPSHOT_VERSION,
            caches: self
                .keys()
                .into_iter()
                .filter_map(|name| self.get(name))
                .map(|cache| CacheSnapshot {
                    name: cache.name.clone(),
                    entries: cache.entries().iter().map(EntrySnapshot::capture).collect(),
                })
                .collect(),
        }
    }

    fn from_snapshot(snapshot: StorageSnapshot) -> Result<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(ServiceWorkerError::CacheError(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let mut storage = CacheStorage::new();
        for cache in snapshot.caches {
            let target = storage.open(&cache.name);
            for entry in cache.entries {
                target.restore_entry(entry.restore()?);
            }
        }
        Ok(storage)
    }

    /// Load a store saved with [`CacheStorage::save`]. A missing file is an empty store.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache snapshot, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };

        let storage = Self::from_snapshot(serde_json::from_slice(&bytes)?)?;
        info!(path = %path.display(), caches = storage.keys().len(), "Cache store loaded");
        Ok(storage)
    }

    /// Write the store to `path`, replacing any previous snapshot.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(&self.snapshot())?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!(path = %path.display(), "Cache store saved");
        Ok(())
    }
}
