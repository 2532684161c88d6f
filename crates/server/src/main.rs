//! hauler server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use hauler_core::config::AppConfig;
use hauler_server::sweeper::spawn_upload_sweeper;
use hauler_server::{AppState, create_router};
use hauler_storage::fsutil;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// haulerd - asynchronous archive import service
#[derive(Parser, Debug)]
#[command(name = "haulerd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "HAULER_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from the optional file, overridden by `HAULER_` env vars.
fn load_config(config_path: &str) -> Result<AppConfig> {
    let path = std::path::Path::new(config_path);
    let mut figment = Figment::new();
    let has_config_file = path.exists();

    if has_config_file {
        tracing::info!(config_path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", config_path);
    }

    // HAULER_CONFIG only names the file
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("HAULER_") && key != "HAULER_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: haulerd --config /path/to/config.toml\n  \
             2. Environment variables: HAULER_SERVER__BIND=0.0.0.0:8080 \
             HAULER_WORKER__IMPORT_COMMAND='[wp-import]' haulerd\n\n\
             See config/server.example.toml for example configuration.\n\
             Set HAULER_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("HAULER_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "haulerd=info,hauler_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("hauler v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(&args.config)?;

    // Workers run with their own working directory, so pin the data dir.
    fsutil::create_dir_if_absent(&config.storage.data_dir)
        .await
        .with_context(|| format!("failed to create {}", config.storage.data_dir.display()))?;
    config.storage.data_dir = tokio::fs::canonicalize(&config.storage.data_dir)
        .await
        .context("failed to resolve data directory")?;

    hauler_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let store = hauler_storage::from_config(&config.storage)
        .await
        .context("failed to initialize job store")?;
    store
        .health_check()
        .await
        .context("job store health check failed")?;
    tracing::info!(
        backend = store.backend_name(),
        data_dir = %config.storage.data_dir.display(),
        "Job store initialized"
    );

    let state = AppState::new(config.clone(), store);

    // Fails jobs of workers that exited early or stopped sending heartbeats,
    // including workers orphaned by a previous server process.
    let _watchdog_handle = state.supervisor.clone().spawn_watchdog();
    tracing::info!(
        interval_secs = config.worker.watchdog_interval_secs,
        stale_after_secs = config.worker.stale_after_secs,
        "Worker watchdog spawned"
    );

    let _sweeper_handle = spawn_upload_sweeper(
        state.chunks.clone(),
        config.uploads.session_ttl(),
        config.uploads.sweep_interval(),
    );

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "0.0.0.0:9090"
public_base_url = "https://sites.example.com"

[worker]
import_command = ["wp-import", "--quiet"]
stale_after_secs = 300
"#,
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9090");
        assert_eq!(config.worker.import_command, vec!["wp-import", "--quiet"]);
        assert_eq!(config.worker.stale_after_secs, 300);
        assert_eq!(config.uploads.sweep_interval_secs, 3600);
    }

    #[test]
    fn invalid_file_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "[worker]\nimport_command = []\n").unwrap();
        assert!(load_config(path.to_str().unwrap()).is_err());
    }
}
