//! In-memory fetcher that records every request.

use std::sync::Mutex;

use asistencia_net::{Fetcher, NetError, Request, Response};
use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use http::StatusCode;
use url::Url;

/// Serves registered pages with 200, unknown URLs with 404, and fails
/// URLs registered with [`RecordingFetcher::with_failure`].
#[derive(Default)]
pub(crate) struct RecordingFetcher {
    pages: Mutex<HashMap<String, &'static str>>,
    failures: HashSet<String>,
    calls: Mutex<Vec<Url>>,
}

impl RecordingFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_page(self, url: &str, body: &'static str) -> Self {
        self.set_page(url, body);
        self
    }

    pub(crate) fn with_failure(mut self, url: &str) -> Self {
        self.failures.insert(url.to_string());
        self
    }

    /// Change what the "server" returns from now on.
    pub(crate) fn set_page(&self, url: &str, body: &'static str) {
        self.pages.lock().unwrap().insert(url.to_string(), body);
    }

    pub(crate) fn calls(&self) -> Vec<Url> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for RecordingFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        self.calls.lock().unwrap().push(request.url.clone());

        let key = request.url.to_string();
        if self.failures.contains(&key) {
            return Err(NetError::RequestFailed(format!("connection refused: {key}")));
        }

        let page = self.pages.lock().unwrap().get(&key).copied();
        Ok(match page {
            Some(body) => Response::new(request.url, StatusCode::OK, body),
            None => Response::new(request.url, StatusCode::NOT_FOUND, "not found"),
        })
    }
}
