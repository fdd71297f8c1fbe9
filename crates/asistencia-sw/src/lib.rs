//! # Asistencia Service Worker
//!
//! Cache-first offline worker for the Asistencia attendance app.
//!
//! ## Features
//!
//! - **Install**: pre-cache a fixed list of assets into a named cache
//! - **Fetch interception**: serve from cache, fall back to the network
//! - **Cache API**: `caches.open()`, `cache.addAll()`, `caches.match()`
//! - **Host container**: registration, controller routing, restart resume
//! - **Persistence**: JSON snapshots of the cache store
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (host)
//!     ├── controller (ServiceWorker)
//!     │       ├── install  ── Fetcher ──→ network
//!     │       └── handle_fetch
//!     │               ├── hit  → cached Response
//!     │               └── miss → Fetcher → Response (not stored)
//!     │
//!     └── CacheStorage (caches)
//!             └── Cache ("asistencia-v1")
//!                     └── Request → Response
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use asistencia_net::NetError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cache;
pub mod config;
pub mod container;
pub mod store;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{Cache, CacheEntry, CacheStorage, MatchOptions};
pub use config::{WorkerConfig, DEFAULT_CACHE_NAME, DEFAULT_PRECACHE};
pub use container::ServiceWorkerContainer;
pub use worker::{FetchResponse, ResponseSource, ServiceWorker};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Install failed: {0}")]
    InstallFailed(#[source] Box<ServiceWorkerError>),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Bad response for {url}: status {status}")]
    BadResponse { url: String, status: u16 },

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ServiceWorkerError>;

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Pre-caching in progress.
    Installing,
    /// Installed but not yet controlling.
    Installed,
    /// Activating.
    Activating,
    /// Active and intercepting fetches.
    Activated,
    /// Replaced, unregistered, or install failed.
    Redundant,
}

/// Events reported to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// Controller changed (`None` after unregister).
    ControllerChange { worker_id: Option<ServiceWorkerId> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_uniqueness() {
        let a = ServiceWorkerId::new();
        let b = ServiceWorkerId::new();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn test_state_default_and_serde() {
        assert_eq!(ServiceWorkerState::default(), ServiceWorkerState::Parsed);
        let json = serde_json::to_string(&ServiceWorkerState::Activated).unwrap();
        assert_eq!(json, "\"Activated\"");
    }

    #[test]
    fn test_install_failed_keeps_cause() {
        let err = ServiceWorkerError::InstallFailed(Box::new(ServiceWorkerError::BadResponse {
            url: "http://127.0.0.1:5000/".to_string(),
            status: 500,
        }));
        assert_eq!(
            err.to_string(),
            "Install failed: Bad response for http://127.0.0.1:5000/: status 500"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
