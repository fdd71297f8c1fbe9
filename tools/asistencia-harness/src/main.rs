//! Host harness for the Asistencia offline worker.
//!
//! Plays the browser's part: runs the install step against a live origin,
//! routes fetches through the worker, and keeps the cache store on disk
//! between runs.
//!
//! ## Usage
//!
//! ```bash
//! # Pre-cache "/" and "/static/style.css" from the local Flask app
//! asistencia-harness --scope http://127.0.0.1:5000/ install
//!
//! # Fetch through the worker (cache first, network otherwise)
//! asistencia-harness fetch /static/style.css --body
//!
//! # Inspect or drop caches
//! asistencia-harness keys
//! asistencia-harness delete asistencia-v1
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use asistencia_common::{init_logging, LogConfig};
use asistencia_net::{HttpFetcher, LoaderConfig, Request, Url};
use asistencia_sw::{
    CacheStorage, ResponseSource, ServiceWorkerContainer, ServiceWorkerError, WorkerConfig,
};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "asistencia-harness")]
#[command(about = "Host harness for the Asistencia offline worker")]
struct Cli {
    /// Worker configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache store snapshot
    #[arg(short, long, global = true, default_value = "sw-caches.json")]
    store: PathBuf,

    /// Override the worker scope (origin the assets are fetched from)
    #[arg(long, global = true)]
    scope: Option<Url>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the install step and save the populated store
    Install,

    /// Fetch a path or URL through the worker
    Fetch {
        /// Path (resolved against the scope) or absolute URL
        target: String,
        /// Print the response body
        #[arg(long)]
        body: bool,
    },

    /// List caches and their entries
    Keys,

    /// Delete a cache by name
    Delete {
        /// Cache name
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig {
            level: Level::WARN,
            ..Default::default()
        }
    };
    init_logging(log_config)?;

    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Install => {
            let config = load_config(cli.config.as_deref(), cli.scope)?;
            install(config, &cli.store, &mut out).await?;
        }

        Commands::Fetch { ref target, body } => {
            let config = load_config(cli.config.as_deref(), cli.scope.clone())?;
            fetch(config, &cli.store, target, body, &mut out).await?;
        }

        Commands::Keys => {
            keys(&cli.store, &mut out).await?;
        }

        Commands::Delete { ref name } => {
            delete(&cli.store, name, &mut out).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>, scope: Option<Url>) -> anyhow::Result<WorkerConfig> {
    let mut config = match path {
        Some(path) => WorkerConfig::load(path)?,
        None => WorkerConfig::default(),
    };
    if let Some(scope) = scope {
        config.scope = scope;
    }
    config.validate()?;
    Ok(config)
}

fn new_container(storage: CacheStorage) -> anyhow::Result<ServiceWorkerContainer> {
    let fetcher = HttpFetcher::new(LoaderConfig::default())?;
    let (container, _events) = ServiceWorkerContainer::new(storage, Arc::new(fetcher));
    Ok(container)
}

async fn save(container: &ServiceWorkerContainer, store: &Path) -> anyhow::Result<()> {
    container
        .caches()
        .read()
        .await
        .save(store)
        .await
        .with_context(|| format!("saving cache store to {}", store.display()))
}

async fn install(config: WorkerConfig, store: &Path, out: &mut impl Write) -> anyhow::Result<()> {
    let container = new_container(CacheStorage::load(store).await?)?;
    let worker = container.register(config).await?;
    save(&container, store).await?;

    writeln!(
        out,
        "Installed worker {} into cache '{}'",
        worker.id().raw(),
        worker.config().cache_name
    )?;
    let caches = container.caches();
    let caches = caches.read().await;
    if let Some(cache) = caches.get(&worker.config().cache_name) {
        for url in cache.keys() {
            writeln!(out, "  {url}")?;
        }
    }
    Ok(())
}

async fn fetch(
    config: WorkerConfig,
    store: &Path,
    target: &str,
    print_body: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let container = new_container(CacheStorage::load(store).await?)?;

    match container.resume(config.clone()).await {
        Ok(_) => {}
        Err(ServiceWorkerError::NotFound(_)) => {
            info!(cache = %config.cache_name, "No cache for this worker version, installing");
            container.register(config.clone()).await?;
            save(&container, store).await?;
        }
        Err(e) => return Err(e.into()),
    }

    let url = config.resolve(target)?;
    let result = container.dispatch_fetch(Request::get(url)).await?;

    let source = match result.source {
        ResponseSource::Cache => "cache",
        ResponseSource::Network => "network",
    };
    let response = &result.response;
    writeln!(
        out,
        "{} {} ({}, {} bytes)",
        response.status,
        response.url,
        source,
        response.body().len()
    )?;
    if print_body {
        writeln!(out, "{}", String::from_utf8_lossy(response.body()))?;
    }
    Ok(())
}

async fn keys(store: &Path, out: &mut impl Write) -> anyhow::Result<()> {
    let storage = CacheStorage::load(store).await?;
    let names = storage.keys();
    if names.is_empty() {
        writeln!(out, "No caches in {}", store.display())?;
        return Ok(());
    }

    for name in names {
        let Some(cache) = storage.get(name) else {
            continue;
        };
        writeln!(out, "{} ({} entries)", name, cache.len())?;
        for url in cache.keys() {
            writeln!(out, "  {url}")?;
        }
    }
    Ok(())
}

async fn delete(store: &Path, name: &str, out: &mut impl Write) -> anyhow::Result<()> {
    let mut storage = CacheStorage::load(store).await?;
    if storage.delete(name) {
        storage.save(store).await?;
        writeln!(out, "Deleted cache '{name}'")?;
    } else {
        writeln!(out, "No cache named '{name}'")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_fetch() {
        let cli = Cli::try_parse_from([
            "asistencia-harness",
            "fetch",
            "/static/style.css",
            "--body",
            "--store",
            "/tmp/caches.json",
        ])
        .unwrap();

        assert_eq!(cli.store, PathBuf::from("/tmp/caches.json"));
        match cli.command {
            Commands::Fetch { target, body } => {
                assert_eq!(target, "/static/style.css");
                assert!(body);
            }
            _ => panic!("Expected fetch"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_scope() {
        assert!(Cli::try_parse_from(["asistencia-harness", "--scope", "not a url", "keys"]).is_err());
    }

    #[test]
    fn test_load_config_scope_override() {
        let scope = Url::parse("http://192.168.1.20:8000/").unwrap();
        let config = load_config(None, Some(scope.clone())).unwrap();
        assert_eq!(config.scope, scope);
        assert_eq!(config.cache_name, "asistencia-v1");
    }

    #[tokio::test]
    async fn test_keys_on_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        keys(&dir.path().join("caches.json"), &mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("No caches"));
    }

    #[tokio::test]
    async fn test_delete_and_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("caches.json");
        let mut storage = CacheStorage::new();
        storage.open("asistencia-v0");
        storage.open("asistencia-v1");
        storage.save(&store).await.unwrap();

        let mut out = Vec::new();
        delete(&store, "asistencia-v0", &mut out).await.unwrap();
        delete(&store, "asistencia-v9", &mut out).await.unwrap();
        keys(&store, &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Deleted cache 'asistencia-v0'"));
        assert!(text.contains("No cache named 'asistencia-v9'"));
        assert!(text.contains("asistencia-v1 (0 entries)"));
        assert!(!text.contains("asistencia-v0 ("));
    }

    #[tokio::test]
    async fn test_install_against_unreachable_origin_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("caches.json");
        let config = load_config(None, Some(Url::parse("http://127.0.0.1:1/").unwrap())).unwrap();

        let mut out = Vec::new();
        let err = install(config, &store, &mut out).await.unwrap_err();

        assert!(err.downcast_ref::<ServiceWorkerError>().is_some());
        assert!(!store.exists());
    }
}
