//! Cache API: named caches of request/response pairs.

use asistencia_common::unix_millis;
use asistencia_net::{Fetcher, Request, Response};
use futures::future::try_join_all;
use hashbrown::HashMap;
use http::{Method, StatusCode};
use tracing::trace;
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Options for cache lookups.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    /// Compare URLs without their query string.
    pub ignore_search: bool,
    /// Let non-GET requests match stored GET entries.
    pub ignore_method: bool,
}

/// Request identity: the URL without its fragment.
fn identity(url: &Url, ignore_search: bool) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    if ignore_search {
        url.set_query(None);
    }
    url.into()
}

/// A cached request/response pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: Method,

    /// Stored response.
    pub response: Response,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    fn matches(&self, request: &Request, options: MatchOptions) -> bool {
        if !options.ignore_method && request.method != Method::GET {
            return false;
        }
        identity(&self.url, options.ignore_search) == identity(&request.url, options.ignore_search)
    }
}

/// A cache instance.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Entries in insertion order.
    entries: Vec<CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, request: &Request, options: MatchOptions) -> Option<&CacheEntry> {
        self.entries.iter().find(|e| e.matches(request, options))
    }

    /// Match all entries, or only those matching `request`.
    pub fn match_all(&self, request: Option<&Request>, options: MatchOptions) -> Vec<&CacheEntry> {
        match request {
            Some(r) => self.entries.iter().filter(|e| e.matches(r, options)).collect(),
            None => self.entries.iter().collect(),
        }
    }

    /// Store a response for a request, replacing any entry with the same identity.
    pub fn put(&mut self, request: &Request, response: Response) -> Result<()> {
        check_storable(request, &response)?;
        self.insert(request, response);
        Ok(())
    }

    /// Store several pairs. Nothing is stored unless every pair is storable.
    pub fn put_all(&mut self, pairs: Vec<(Request, Response)>) -> Result<()> {
        for (request, response) in &pairs {
            check_storable(request, response)?;
        }
        for (request, response) in pairs {
            self.insert(&request, response);
        }
        Ok(())
    }

    /// Fetch a request and store the response.
    pub async fn add(&mut self, fetcher: &dyn Fetcher, request: Request) -> Result<()> {
        self.add_all(fetcher, vec![request]).await
    }

    /// Fetch every request and store all responses, or none on failure.
    pub async fn add_all(&mut self, fetcher: &dyn Fetcher, requests: Vec<Request>) -> Result<()> {
        let pairs = fetch_for_cache(fetcher, requests).await?;
        self.put_all(pairs)
    }

    /// Delete entries matching a request.
    pub fn delete(&mut self, request: &Request, options: MatchOptions) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !e.matches(request, options));
        self.entries.len() != before
    }

    /// Get all keys (URLs).
    pub fn keys(&self) -> Vec<&Url> {
        self.entries.iter().map(|e| &e.url).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub(crate) fn restore_entry(&mut self, entry: CacheEntry) {
        self.entries.push(entry);
    }

    fn insert(&mut self, request: &Request, response: Response) {
        let entry = CacheEntry {
            url: request.url.clone(),
            method: Method::GET,
            response,
            cached_at: unix_millis(),
        };
        let key = identity(&entry.url, false);
        match self
            .entries
            .iter_mut()
            .find(|e| identity(&e.url, false) == key)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        trace!(cache = %self.name, url = %key, "Entry stored");
    }
}

fn check_storable(request: &Request, response: &Response) -> Result<()> {
    if request.method != Method::GET {
        return Err(ServiceWorkerError::CacheError(format!(
            "Request method '{}' is unsupported",
            request.method
        )));
    }
    if response.status == StatusCode::PARTIAL_CONTENT {
        return Err(ServiceWorkerError::CacheError(format!(
            "Partial response for {} cannot be cached",
            request.url
        )));
    }
    Ok(())
}

/// Fetch every request concurrently; fail if any fetch fails or is not 2xx.
pub async fn fetch_for_cache(
    fetcher: &dyn Fetcher,
    requests: Vec<Request>,
) -> Result<Vec<(Request, Response)>> {
    if let Some(bad) = requests.iter().find(|r| r.method != Method::GET) {
        return Err(ServiceWorkerError::CacheError(format!(
            "Request method '{}' is unsupported",
            bad.method
        )));
    }

    let fetches = requests.into_iter().map(|request| async move {
        let response = fetcher.fetch(request.clone()).await?;
        if !response.ok() {
            return Err(ServiceWorkerError::BadResponse {
                url: request.url.to_string(),
                status: response.status.as_u16(),
            });
        }
        Ok::<_, ServiceWorkerError>((request, response))
    });

    try_join_all(fetches).await
}

// ==================== Cache Storage ====================

/// Cache storage (caches global).
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    /// Cache names in creation order.
    order: Vec<String>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        if !self.caches.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.order.retain(|n| n != name);
        self.caches.remove(name).is_some()
    }

    /// Cache names in creation order.
    pub fn keys(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Match across all caches, oldest cache first.
    pub fn match_request(&self, request: &Request, options: MatchOptions) -> Option<&CacheEntry> {
        self.order
            .iter()
            .filter_map(|name| self.caches.get(name))
            .find_map(|cache| cache.match_request(request, options))
    }
}
