//! CLI entry point — the composition root for both process roles.
//!
//! `lectern gateway` runs the WebSocket gateway with the coordinator tasks
//! (embedded store by default, Redis with `--redis-url`; with the embedded
//! store, `--local-workers` pulls jobs in-process, which is the single-node
//! deployment shape).
//!
//! `lectern worker` runs one pull-based worker process against a shared
//! Redis store — the multi-machine shape. Adding capacity is starting more
//! of these; no gateway coordination involved.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lectern_axum::bootstrap_with_store;
use lectern_axum::routes::{CorsConfig, create_router};
use lectern_core::ports::{JobQueue, ResultsStream};
use lectern_core::settings::Settings;
use lectern_store::{MemoryBackend, RedisBackend};
use lectern_worker::{HttpSynthesizer, Synthesizer, TestToneSynthesizer, WorkerLoop};

#[derive(Parser)]
#[command(name = "lectern", about = "TTS synthesis backplane", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway (WebSocket dispatcher + coordinator).
    Gateway {
        /// Settings file (JSON). Missing file means defaults.
        #[arg(long, env = "LECTERN_CONFIG")]
        config: Option<PathBuf>,

        /// Override the listen port from the settings file.
        #[arg(long, env = "LECTERN_PORT")]
        port: Option<u16>,

        /// Shared store URL. Omitted: embedded in-process store.
        #[arg(long, env = "LECTERN_REDIS_URL")]
        redis_url: Option<String>,

        /// With the embedded store, number of in-process worker loops.
        #[arg(long, default_value_t = 0)]
        local_workers: usize,
    },

    /// Run one worker process against a shared Redis store.
    Worker {
        /// Settings file (JSON). Missing file means defaults.
        #[arg(long, env = "LECTERN_CONFIG")]
        config: Option<PathBuf>,

        /// Shared store URL (required: a lone worker needs a store that
        /// other processes can reach too).
        #[arg(long, env = "LECTERN_REDIS_URL")]
        redis_url: String,

        /// Worker id; defaults to `worker-{pid}`.
        #[arg(long)]
        worker_id: Option<String>,

        /// Model queue to pull from.
        #[arg(long, default_value = "standard")]
        model: String,

        /// Model server to delegate synthesis to. Omitted: the built-in
        /// tone backend (development only).
        #[arg(long, env = "LECTERN_MODEL_SERVER_URL")]
        model_server_url: Option<String>,
    },
}

fn load_settings(config: Option<&PathBuf>) -> Result<Settings> {
    match config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading settings file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing settings file {}", path.display()))
        }
        None => Ok(Settings::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Commands::Gateway { config, port, redis_url, local_workers } => {
            run_gateway(config, port, redis_url, local_workers).await
        }
        Commands::Worker { config, redis_url, worker_id, model, model_server_url } => {
            run_worker(config, &redis_url, worker_id, model, model_server_url).await
        }
    }
}

async fn run_gateway(
    config: Option<PathBuf>,
    port: Option<u16>,
    redis_url: Option<String>,
    local_workers: usize,
) -> Result<()> {
    let mut settings = load_settings(config.as_ref())?;
    if let Some(port) = port {
        settings.port = port;
    }

    let cancel = CancellationToken::new();
    let gateway = match &redis_url {
        Some(url) => {
            if local_workers > 0 {
                bail!("--local-workers only applies to the embedded store");
            }
            let backend = Arc::new(
                RedisBackend::connect(url, &settings)
                    .await
                    .context("connecting to redis store")?,
            );
            bootstrap_with_store(
                settings.clone(),
                Arc::clone(&backend) as Arc<dyn JobQueue>,
                backend as Arc<dyn ResultsStream>,
            )?
        }
        None => {
            let backend = MemoryBackend::from_settings(&settings);
            for n in 0..local_workers {
                for model_id in &settings.models {
                    let worker = WorkerLoop::new(
                        format!("local-{n}"),
                        model_id.clone(),
                        Arc::clone(&backend) as Arc<dyn JobQueue>,
                        Arc::clone(&backend) as Arc<dyn ResultsStream>,
                        Arc::new(TestToneSynthesizer::new()),
                    );
                    tokio::spawn(worker.run(cancel.clone()));
                }
            }
            bootstrap_with_store(
                settings.clone(),
                Arc::clone(&backend) as Arc<dyn JobQueue>,
                backend as Arc<dyn ResultsStream>,
            )?
        }
    };

    let app = create_router(gateway.state.clone(), &CorsConfig::AllowAll);
    let addr = format!("0.0.0.0:{}", settings.port);
    let listener =
        tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, store = redis_url.as_deref().unwrap_or("embedded"), "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    cancel.cancel();
    gateway.coordinator.shutdown().await;
    Ok(())
}

async fn run_worker(
    config: Option<PathBuf>,
    redis_url: &str,
    worker_id: Option<String>,
    model: String,
    model_server_url: Option<String>,
) -> Result<()> {
    let settings = load_settings(config.as_ref())?;
    let worker_id = worker_id.unwrap_or_else(|| format!("worker-{}", std::process::id()));

    let backend = Arc::new(
        RedisBackend::connect(redis_url, &settings)
            .await
            .context("connecting to redis store")?,
    );

    let synthesizer: Arc<dyn Synthesizer> = match model_server_url {
        Some(url) => {
            info!(model_server = %url, "delegating synthesis over HTTP");
            Arc::new(HttpSynthesizer::new(url, Duration::from_secs(120))?)
        }
        None => {
            info!("using built-in tone backend");
            Arc::new(TestToneSynthesizer::new())
        }
    };

    if let Err(err) = synthesizer.health().await {
        // Log and continue: the backend may warm up after the loop starts.
        tracing::warn!(error = %err, "synthesizer health check failed at startup");
    }

    info!(worker_id = %worker_id, model = %model, "worker starting");
    let cancel = CancellationToken::new();
    let worker = WorkerLoop::new(
        worker_id,
        model,
        Arc::clone(&backend) as Arc<dyn JobQueue>,
        backend as Arc<dyn ResultsStream>,
        synthesizer,
    );

    let handle = tokio::spawn(worker.run(cancel.clone()));
    shutdown_signal().await;
    cancel.cancel();
    handle.await.ok();
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("install ctrl-c handler");
    info!("shutdown signal received");
}
