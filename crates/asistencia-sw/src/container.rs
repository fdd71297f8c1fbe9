//! Host-side container: registers workers and routes fetches to the controller.

use std::sync::Arc;

use asistencia_net::{Fetcher, Request};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::cache::CacheStorage;
use crate::config::WorkerConfig;
use crate::worker::{FetchResponse, ResponseSource, ServiceWorker};
use crate::{Result, ServiceWorkerError, ServiceWorkerEvent, ServiceWorkerState};

/// Service worker container (navigator.serviceWorker).
pub struct ServiceWorkerContainer {
    /// Cache storage.
    caches: Arc<RwLock<CacheStorage>>,

    /// Network used by workers and by uncontrolled fetches.
    fetcher: Arc<dyn Fetcher>,

    /// Worker currently intercepting fetches.
    controller: RwLock<Option<Arc<ServiceWorker>>>,

    /// Event sender for state changes.
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(
        caches: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                caches: Arc::new(RwLock::new(caches)),
                fetcher,
                controller: RwLock::new(None),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn caches(&self) -> Arc<RwLock<CacheStorage>> {
        Arc::clone(&self.caches)
    }

    /// Install and activate a new worker, then make it the controller.
    ///
    /// On install failure the previous controller keeps control.
    pub async fn register(&self, config: WorkerConfig) -> Result<Arc<ServiceWorker>> {
        config.validate()?;

        let worker = Arc::new(self.spawn_worker(config));
        worker.install().await?;
        worker.activate().await?;

        self.replace_controller(Arc::clone(&worker)).await;
        Ok(worker)
    }

    /// Reinstate the worker for `config` after a restart, if its cache survived.
    pub async fn resume(&self, config: WorkerConfig) -> Result<Arc<ServiceWorker>> {
        config.validate()?;

        if !self.caches.read().await.has(&config.cache_name) {
            return Err(ServiceWorkerError::NotFound(format!(
                "cache '{}'",
                config.cache_name
            )));
        }

        let worker = Arc::new(self.spawn_worker(config));
        worker.restore_activated().await?;

        self.replace_controller(Arc::clone(&worker)).await;
        Ok(worker)
    }

    /// Get the controlling worker.
    pub async fn controller(&self) -> Option<Arc<ServiceWorker>> {
        self.controller.read().await.clone()
    }

    /// Route a request through the controller, or straight to the network.
    ///
    /// A controller that went redundant while the request was in flight hands
    /// the request to its replacement, or to the network when there is none.
    pub async fn dispatch_fetch(&self, request: Request) -> Result<FetchResponse> {
        let Some(mut worker) = self.controller().await else {
            return self.fetch_uncontrolled(request).await;
        };

        loop {
            let result = worker.handle_fetch(request.clone()).await;
            let retired = matches!(result, Err(ServiceWorkerError::StateError(_)))
                && worker.state().await == ServiceWorkerState::Redundant;
            if !retired {
                return result;
            }

            match self.controller().await {
                Some(next) if !Arc::ptr_eq(&next, &worker) => {
                    debug!(
                        from = worker.id().raw(),
                        to = next.id().raw(),
                        "Controller replaced mid-fetch, retrying"
                    );
                    worker = next;
                }
                _ => return self.fetch_uncontrolled(request).await,
            }
        }
    }

    async fn fetch_uncontrolled(&self, request: Request) -> Result<FetchResponse> {
        let response = self.fetcher.fetch(request).await?;
        Ok(FetchResponse {
            response,
            source: ResponseSource::Network,
        })
    }

    /// Drop the controller. Caches are left in place.
    pub async fn unregister(&self) -> bool {
        let old = self.controller.write().await.take();
        match old {
            Some(worker) => {
                worker.mark_redundant().await;
                let _ = self
                    .event_tx
                    .send(ServiceWorkerEvent::ControllerChange { worker_id: None });
                true
            }
            None => false,
        }
    }

    fn spawn_worker(&self, config: WorkerConfig) -> ServiceWorker {
        ServiceWorker::new(config, Arc::clone(&self.caches), Arc::clone(&self.fetcher))
            .with_events(self.event_tx.clone())
    }

    async fn replace_controller(&self, worker: Arc<ServiceWorker>) {
        let worker_id = worker.id();
        let old = self.controller.write().await.replace(worker);
        if let Some(old) = old {
            old.mark_redundant().await;
        }

        info!(worker = worker_id.raw(), "Controller changed");
        let _ = self.event_tx.send(ServiceWorkerEvent::ControllerChange {
            worker_id: Some(worker_id),
        });
    }
}
