//! Worker configuration.

use std::path::Path;

use asistencia_net::Request;
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Cache name for the current asset set. Bump it whenever the assets change.
pub const DEFAULT_CACHE_NAME: &str = "asistencia-v1";

/// Assets stored on install.
pub const DEFAULT_PRECACHE: [&str; 2] = ["/", "/static/style.css"];

const DEFAULT_SCOPE: &str = "http://127.0.0.1:5000/";

/// Configuration for one worker version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name of the cache the install step populates.
    pub cache_name: String,

    /// Paths or absolute URLs to pre-cache, resolved against `scope`.
    pub precache: Vec<String>,

    /// Origin and base path the worker serves.
    pub scope: Url,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            precache: DEFAULT_PRECACHE.iter().map(|s| s.to_string()).collect(),
            scope: Url::parse(DEFAULT_SCOPE).expect("default scope is a valid URL"),
        }
    }
}

impl WorkerConfig {
    /// Default configuration for another origin.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }

    /// Set the cache name.
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Set the pre-cache list.
    pub fn with_precache<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.precache = entries.into_iter().map(Into::into).collect();
        self
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ServiceWorkerError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ServiceWorkerError::ConfigError(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(ServiceWorkerError::ConfigError(
                "cache_name must not be empty".to_string(),
            ));
        }
        if self.precache.is_empty() {
            return Err(ServiceWorkerError::ConfigError(
                "precache list must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for request in self.precache_requests()? {
            let mut key = request.url.clone();
            key.set_fragment(None);
            if !seen.insert(key) {
                return Err(ServiceWorkerError::ConfigError(format!(
                    "duplicate precache entry: {}",
                    request.url
                )));
            }
        }
        Ok(())
    }

    /// Resolve the pre-cache list into GET requests.
    pub fn precache_requests(&self) -> Result<Vec<Request>> {
        self.precache
            .iter()
            .map(|entry| self.resolve(entry).map(Request::get))
            .collect()
    }

    /// Resolve a path or absolute URL against the scope.
    pub fn resolve(&self, target: &str) -> Result<Url> {
        let url = self
            .scope
            .join(target)
            .map_err(|e| ServiceWorkerError::ConfigError(format!("{target}: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ServiceWorkerError::ConfigError(format!(
                "{target}: unsupported scheme '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.cache_name, "asistencia-v1");
        assert_eq!(config.precache, vec!["/", "/static/style.css"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_precache_requests_resolve_against_scope() {
        let config = WorkerConfig::new(Url::parse("https://escuela.example/app/").unwrap());
        let urls: Vec<String> = config
            .precache_requests()
            .unwrap()
            .into_iter()
            .map(|r| r.url.to_string())
            .collect();

        assert_eq!(
            urls,
            vec![
                "https://escuela.example/",
                "https://escuela.example/static/style.css"
            ]
        );
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = WorkerConfig::from_json(r#"{ "cache_name": "asistencia-v2" }"#).unwrap();
        assert_eq!(config.cache_name, "asistencia-v2");
        assert_eq!(config.precache.len(), 2);
        assert_eq!(config.scope.as_str(), "http://127.0.0.1:5000/");
    }

    #[test]
    fn test_validation_errors() {
        let empty_name = WorkerConfig::default().with_cache_name("  ");
        assert!(matches!(
            empty_name.validate(),
            Err(ServiceWorkerError::ConfigError(_))
        ));

        let empty_list = WorkerConfig::default().with_precache(Vec::<String>::new());
        assert!(empty_list.validate().is_err());

        let duplicate = WorkerConfig::default().with_precache(["/", "/#top"]);
        assert!(duplicate.validate().is_err());
        let duplicate = WorkerConfig::default().with_precache(["/", "http://127.0.0.1:5000/"]);
        assert!(duplicate.validate().is_err());

        let bad_scheme = WorkerConfig::default().with_precache(["ftp://files.example/a"]);
        assert!(bad_scheme.validate().is_err());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(WorkerConfig::from_json("not json").is_err());
        assert!(WorkerConfig::from_json(r#"{ "scope": "nope" }"#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sw.json");
        std::fs::write(
            &path,
            r#"{ "cache_name": "asistencia-v3", "precache": ["/", "/static/app.js"] }"#,
        )
        .unwrap();

        let config = WorkerConfig::load(&path).unwrap();
        assert_eq!(config.cache_name, "asistencia-v3");
        assert_eq!(config.precache[1], "/static/app.js");

        assert!(WorkerConfig::load(dir.path().join("missing.json")).is_err());
    }
}
