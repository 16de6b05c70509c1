//! Shellgate Gateway
//!
//! WebSocket shell gateway with GitHub-authenticated sessions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gateway::auth::TokenValidator;
use gateway::config::{Config, Secrets};
use gateway::server::{router, AppState};
use gateway::session::{SessionRegistry, ShellSpec};

/// Shellgate - WebSocket shell gateway with GitHub-authenticated sessions.
#[derive(Parser, Debug)]
#[command(name = "shellgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.gateway.log_level.clone()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Shellgate gateway starting...");

    let secrets = Secrets::from_env()?;
    if secrets.github_client_id.is_none() {
        tracing::warn!("GitHub OAuth credentials not set; login routes will report an error");
    }

    let registry = Arc::new(SessionRegistry::new(ShellSpec {
        program: config.session.shell.clone(),
        cwd: config.session.cwd.clone(),
    }));
    let validator = Arc::new(TokenValidator::new(
        &secrets.jwt_secret,
        Duration::from_secs(config.auth.token_ttl_secs),
    ));

    let bind_addr = config.gateway.bind_addr.clone();
    let state = AppState {
        registry: registry.clone(),
        validator,
        config: Arc::new(config),
        secrets: Arc::new(secrets),
        http: reqwest::Client::builder()
            .user_agent(concat!("shellgate/", env!("CARGO_PKG_VERSION")))
            .build()?,
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on {}", bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(registry))
        .await?;

    tracing::info!("Shellgate gateway stopped");
    Ok(())
}

/// Waits for Ctrl+C, then kills every live shell before the server drains.
async fn shutdown_signal(registry: Arc<SessionRegistry>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received, closing sessions");
    registry.shutdown_all().await;
}
