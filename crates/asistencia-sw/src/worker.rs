//! The worker: install handler and fetch interceptor.

use std::sync::Arc;

use asistencia_net::{Fetcher, Request, Response};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{fetch_for_cache, CacheStorage, MatchOptions};
use crate::config::WorkerConfig;
use crate::{Result, ServiceWorkerError, ServiceWorkerEvent, ServiceWorkerId, ServiceWorkerState};

/// Where a fetch result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
}

/// Fetch event response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The response, exactly as stored or received.
    pub response: Response,

    pub source: ResponseSource,
}

impl FetchResponse {
    pub fn from_cache(&self) -> bool {
        self.source == ResponseSource::Cache
    }
}

/// A service worker instance.
pub struct ServiceWorker {
    id: ServiceWorkerId,
    config: WorkerConfig,
    state: RwLock<ServiceWorkerState>,
    caches: Arc<RwLock<CacheStorage>>,
    fetcher: Arc<dyn Fetcher>,
    event_tx: Option<mpsc::UnboundedSender<ServiceWorkerEvent>>,
}

impl ServiceWorker {
    /// Create a worker over a host-owned cache store.
    pub fn new(
        config: WorkerConfig,
        caches: Arc<RwLock<CacheStorage>>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            config,
            state: RwLock::new(ServiceWorkerState::Parsed),
            caches,
            fetcher,
            event_tx: None,
        }
    }

    /// Report state changes on `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ServiceWorkerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    /// Run the install step: pre-cache every configured asset.
    ///
    /// Either every asset is stored or none is; on failure the worker
    /// becomes redundant.
    pub async fn install(&self) -> Result<()> {
        self.transition(ServiceWorkerState::Parsed, ServiceWorkerState::Installing)
            .await?;

        match self.precache().await {
            Ok(count) => {
                info!(
                    worker = self.id.raw(),
                    cache = %self.config.cache_name,
                    entries = count,
                    "Install complete"
                );
                self.set_state(ServiceWorkerState::Installed).await;
                Ok(())
            }
            Err(e) => {
                warn!(
                    worker = self.id.raw(),
                    cache = %self.config.cache_name,
                    error = %e,
                    "Install failed"
                );
                self.set_state(ServiceWorkerState::Redundant).await;
                Err(ServiceWorkerError::InstallFailed(Box::new(e)))
            }
        }
    }

    async fn precache(&self) -> Result<usize> {
        let requests = self.config.precache_requests()?;
        let pairs = fetch_for_cache(self.fetcher.as_ref(), requests).await?;
        let count = pairs.len();

        let mut caches = self.caches.write().await;
        caches.open(&self.config.cache_name).put_all(pairs)?;
        Ok(count)
    }

    /// Activate an installed worker.
    pub async fn activate(&self) -> Result<()> {
        self.transition(ServiceWorkerState::Installed, ServiceWorkerState::Activating)
            .await?;
        self.set_state(ServiceWorkerState::Activated).await;
        Ok(())
    }

    /// Intercept a request: cached response if present, network otherwise.
    ///
    /// Network responses are returned as-is and never stored.
    pub async fn handle_fetch(&self, request: Request) -> Result<FetchResponse> {
        let state = self.state().await;
        if state != ServiceWorkerState::Activated {
            return Err(ServiceWorkerError::StateError(format!(
                "Worker {} cannot intercept fetches while {:?}",
                self.id.raw(),
                state
            )));
        }

        let cached = {
            let caches = self.caches.read().await;
            caches
                .match_request(&request, MatchOptions::default())
                .map(|entry| entry.response.clone())
        };

        if let Some(response) = cached {
            debug!(url = %request.url, "Cache hit");
            return Ok(FetchResponse {
                response,
                source: ResponseSource::Cache,
            });
        }

        debug!(url = %request.url, method = %request.method, "Cache miss, going to network");
        let response = self.fetcher.fetch(request).await?;
        Ok(FetchResponse {
            response,
            source: ResponseSource::Network,
        })
    }

    /// Reinstate a worker whose install already ran in an earlier process.
    pub(crate) async fn restore_activated(&self) -> Result<()> {
        self.transition(ServiceWorkerState::Parsed, ServiceWorkerState::Activated)
            .await
    }

    pub(crate) async fn mark_redundant(&self) {
        self.set_state(ServiceWorkerState::Redundant).await;
    }

    async fn transition(&self, from: ServiceWorkerState, to: ServiceWorkerState) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != from {
                return Err(ServiceWorkerError::StateError(format!(
                    "Worker {} is {:?}, expected {:?}",
                    self.id.raw(),
                    *state,
                    from
                )));
            }
            *state = to;
        }
        self.notify(to);
        Ok(())
    }

    async fn set_state(&self, new_state: ServiceWorkerState) {
        *self.state.write().await = new_state;
        self.notify(new_state);
    }

    fn notify(&self, new_state: ServiceWorkerState) {
        debug!(worker = self.id.raw(), state = ?new_state, "State change");
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(ServiceWorkerEvent::StateChange {
                worker_id: self.id,
                new_state,
            });
        }
    }
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
