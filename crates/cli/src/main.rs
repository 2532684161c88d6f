//! Command line client for hauler.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use hauler_cli::api_client::{ApiClient, AssembledUpload, ImportSource};
use hauler_cli::poller::{self, PollEvent, PollPolicy, summarize};
use hauler_cli::upload::{ChunkedUploader, UploadOptions};
use hauler_core::{DEFAULT_CHUNK_SIZE, JobStatus};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

#[derive(Parser)]
#[command(name = "haulerctl")]
#[command(about = "Upload archives and run imports on a hauler server")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    api: ApiArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Server URL (overrides client config)
    #[arg(long, global = true)]
    server: Option<String>,

    /// User id sent as x-hauler-user (overrides client config)
    #[arg(long, global = true)]
    user: Option<String>,

    /// Client config file path
    #[arg(long, global = true, env = "HAULER_CLIENT_CONFIG")]
    client_config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health and version
    Health,
    /// Upload an archive in chunks and print its server path
    Upload {
        file: PathBuf,
        /// Chunk size in bytes
        #[arg(long)]
        chunk_size: Option<u64>,
    },
    /// Submit an import and follow it to completion
    Import {
        /// Destination identifier
        #[arg(long)]
        destination: String,
        #[command(flatten)]
        source: SourceArgs,
        /// Chunk size in bytes for --upload
        #[arg(long)]
        chunk_size: Option<u64>,
        /// Return after submission instead of polling
        #[arg(long, default_value_t = false)]
        no_watch: bool,
        /// Stop waiting after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Show the status of an import job
    Status {
        job_id: String,
        /// Poll until the job finishes
        #[arg(long, default_value_t = false)]
        watch: bool,
    },
    /// List import jobs
    List,
}

#[derive(Args, Clone)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Archive already on the server
    #[arg(long)]
    server_path: Option<String>,
    /// Send the archive with the submission
    #[arg(long)]
    archive: Option<PathBuf>,
    /// Upload the archive in resumable chunks first
    #[arg(long)]
    upload: Option<PathBuf>,
}

#[derive(Debug, serde::Deserialize, Default)]
#[serde(default)]
struct ClientConfig {
    server: Option<String>,
    user: Option<String>,
    chunk_size: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { api, command } = Cli::parse();
    let config = load_client_config(&client_config_path(api.client_config.as_deref())?).await?;

    match command {
        Commands::Health => handle_health_command(&api, &config).await,
        Commands::Upload { file, chunk_size } => {
            let client = get_api_client(&api, &config)?;
            let options = upload_options(chunk_size, &config);
            let upload = upload_archive(&client, &file, options).await?;
            println!("{}", upload.path.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Import {
            destination,
            source,
            chunk_size,
            no_watch,
            timeout,
        } => {
            let client = get_api_client(&api, &config)?;
            let options = upload_options(chunk_size, &config);
            handle_import_command(&client, &destination, source, options, no_watch, timeout).await
        }
        Commands::Status { job_id, watch } => {
            let client = get_api_client(&api, &config)?;
            if watch {
                return watch_job(&client, &job_id, PollPolicy::default()).await;
            }
            let view = client.job_status(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => {
            let client = get_api_client(&api, &config)?;
            let jobs = client.list_imports().await?;
            if jobs.is_empty() {
                println!("No import jobs.");
            }
            for job in jobs {
                let progress = job
                    .record
                    .progress
                    .map(|p| format!("{p:>3}%"))
                    .unwrap_or_else(|| "   -".to_string());
                println!(
                    "{}  {:<9}  {}  {:<20}  {}",
                    job.job_id,
                    job.record.status.as_str(),
                    progress,
                    job.record.destination.as_str(),
                    job.record.message
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn resolve_api_config(api: &ApiArgs, config: &ClientConfig) -> Result<(String, String)> {
    let server = api
        .server
        .clone()
        .or_else(|| config.server.clone())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());
    let user = api
        .user
        .clone()
        .or_else(|| config.user.clone())
        .ok_or_else(|| anyhow::anyhow!("no user configured: use --user or set user in the client config"))?;
    Ok((server, user))
}

fn get_api_client(api: &ApiArgs, config: &ClientConfig) -> Result<ApiClient> {
    let (server, user) = resolve_api_config(api, config)?;
    ApiClient::new(&server, &user)
}

fn upload_options(chunk_size: Option<u64>, config: &ClientConfig) -> UploadOptions {
    UploadOptions {
        chunk_size: chunk_size.or(config.chunk_size).unwrap_or(DEFAULT_CHUNK_SIZE),
        ..UploadOptions::default()
    }
}

async fn handle_health_command(api: &ApiArgs, config: &ClientConfig) -> Result<ExitCode> {
    // Health needs no user.
    let server = api
        .server
        .clone()
        .or_else(|| config.server.clone())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());
    let client = ApiClient::new(&server, "")?;
    let health = client.health().await.context("health request failed")?;

    println!("Status: {}", health.status);
    println!("Server version: {}", health.version);
    println!("Client version: {}", env!("CARGO_PKG_VERSION"));

    if health.version != env!("CARGO_PKG_VERSION") {
        eprintln!(
            "Warning: version mismatch (server: {}, client: {})",
            health.version,
            env!("CARGO_PKG_VERSION")
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn upload_archive(
    client: &ApiClient,
    file: &Path,
    options: UploadOptions,
) -> Result<AssembledUpload> {
    let uploader = ChunkedUploader::new(client, options);
    let upload = uploader
        .upload_file(file, |percentage| {
            eprint!("\rUploading {}: {percentage:>3}%", file.display());
            let _ = std::io::stderr().flush();
        })
        .await;
    eprintln!();
    upload
}

async fn handle_import_command(
    client: &ApiClient,
    destination: &str,
    source: SourceArgs,
    options: UploadOptions,
    no_watch: bool,
    timeout: Option<u64>,
) -> Result<ExitCode> {
    let source = match source {
        SourceArgs {
            server_path: Some(path),
            ..
        } => ImportSource::ServerPath(path),
        SourceArgs {
            archive: Some(path),
            ..
        } => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("archive")
                .to_string();
            ImportSource::Archive { filename, data }
        }
        SourceArgs {
            upload: Some(path),
            ..
        } => {
            let upload = upload_archive(client, &path, options).await?;
            ImportSource::ServerPath(upload.path.to_string_lossy().into_owned())
        }
        _ => anyhow::bail!("one of --server-path, --archive or --upload is required"),
    };

    let submitted = client.submit_import(destination, source).await?;
    println!("{} Job id: {}", submitted.message, submitted.job_id);
    if no_watch {
        println!("Status: {}", submitted.status_url);
        return Ok(ExitCode::SUCCESS);
    }

    let policy = PollPolicy {
        timeout: timeout.map(Duration::from_secs),
        ..PollPolicy::default()
    };
    watch_job(client, &submitted.job_id, policy).await
}

async fn watch_job(client: &ApiClient, job_id: &str, policy: PollPolicy) -> Result<ExitCode> {
    let result = poller::watch(client, job_id, &policy, print_event).await?;
    println!("{}", summarize(&result.record));
    Ok(match result.record.record.status {
        JobStatus::Succeeded => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn print_event(event: PollEvent) {
    match event {
        PollEvent::Progress {
            progress: Some(progress),
            message,
        } => println!("[{progress:>3}%] {message}"),
        PollEvent::Progress {
            progress: None,
            message,
        }
        | PollEvent::Message(message) => println!("       {message}"),
        PollEvent::Heartbeat { .. } => println!("       ..."),
        PollEvent::TransportError { error, failures } => {
            eprintln!("  Status request failed ({error}), retry {failures}...")
        }
    }
}

fn client_config_path(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }

    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(path) => PathBuf::from(path),
        None => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| anyhow::anyhow!("HOME not set; set HAULER_CLIENT_CONFIG"))?;
            PathBuf::from(home).join(".config")
        }
    };

    Ok(base.join("hauler").join("client.toml"))
}

async fn load_client_config(path: &Path) -> Result<ClientConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("HAULERCTL_"));

    match figment.extract() {
        Ok(config) => Ok(config),
        Err(_) if !path.exists() => Ok(ClientConfig::default()),
        Err(err) => Err(anyhow::anyhow!(err).context("failed to load client configuration")),
    }
}
