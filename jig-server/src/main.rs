// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Jig: single-node container deployment control plane
//
//  Runtime:   local Docker daemon (bollard)
//  Ingress:   Traefik container driven by labels
//  Control:   axum HTTP API with bearer tokens
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use anyhow::Context;
use clap::Parser;
use jig_admin::server::{AdminState, start_admin};
use jig_core::labels::NETWORK;
use jig_core::{JigConfig, SecretLookup};
use jig_deploy::{Deployer, ensure_network, ensure_proxy};
use jig_runtime::{ContainerRuntime, DockerRuntime};
use jig_store::{SecretStore, TokenStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "jig", version, about = "Jig: container deployments behind Traefik")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/jig/jig.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Jig starting");

    // ── Config ──
    info!(path = %cli.config.display(), "Loading config");
    let config = JigConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // ── Stores ──
    let secrets = Arc::new(SecretStore::open(config.storage.secrets_file())?);
    let tokens = Arc::new(TokenStore::open(config.storage.tokens_file())?);
    info!(
        dir = %config.storage.dir.display(),
        secrets = secrets.list().len(),
        tokens = tokens.list().len(),
        "Stores opened"
    );

    // ── Container runtime ──
    let docker = DockerRuntime::connect().context("connecting to docker")?;
    docker.ping().await.context("docker daemon unreachable")?;
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);

    ensure_network(runtime.as_ref(), NETWORK).await?;
    ensure_proxy(runtime.as_ref(), &config).await?;

    // ── First token ──
    if tokens.is_empty() {
        let token = tokens.make("default")?;
        let host = config.domain.as_deref().unwrap_or(&config.server.addr);
        info!(token_name = %token.name, "Issued initial token");
        println!("\nLog in from your machine with:\n\n  jig login https://{host}+{}\n", token.token);
    }

    // ── Control API ──
    let deployer = Deployer::new(runtime, secrets.clone() as Arc<dyn SecretLookup>);
    let state = Arc::new(AdminState {
        deployer,
        secrets,
        tokens,
        max_upload: config.server.max_upload_bytes(),
    });

    start_admin(&config.server.addr, state, shutdown_signal()).await?;

    info!("Jig stopped");
    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM (docker stop).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received, draining requests");
}
