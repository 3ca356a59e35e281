//! Sass Server
//!
//! HTTP proxy in front of the completion provider.
//!
//! # Usage
//!
//! ```bash
//! # Defaults from ~/.config/sass-gpt/sass.toml, key from the environment
//! OPENAI_API_KEY=sk-... sass-server
//!
//! # Listen elsewhere
//! sass-server --bind 0.0.0.0 --port 8080
//!
//! # With verbose logging
//! RUST_LOG=debug sass-server
//! ```
//!
//! # Signals
//!
//! - SIGINT/SIGTERM: graceful shutdown, in-flight streams are allowed to end

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use sass_core::{
    default_config_path, load_config_from_path, ConfigOverrides, OpenAiBackend, PersonaBackend,
};
use sass_server::{router, AppState};

/// Persona chat proxy
#[derive(Debug, Parser)]
#[command(name = "sass-server", version, about)]
struct Args {
    /// Config file (default: ~/.config/sass-gpt/sass.toml)
    #[arg(long, env = "SASS_CONFIG")]
    config: Option<PathBuf>,

    /// Interface to bind
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(long, short)]
    port: Option<u16>,

    /// Provider model
    #[arg(long)]
    model: Option<String>,

    /// Provider base URL
    #[arg(long)]
    base_url: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bind: self.bind.clone(),
            port: self.port,
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            ..ConfigOverrides::default()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
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
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sass_server=info".parse()?)
                .add_directive("sass_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    let mut config = load_config_from_path(args.config.clone().or_else(default_config_path))?;
    args.overrides().apply(&mut config);
    config.validate()?;

    info!(
        source = %config.source(),
        model = %config.provider.model,
        base_url = %config.provider.base_url,
        "Configuration loaded"
    );

    let credentials_ok = config.provider.usable_api_key().is_some();
    if !credentials_ok {
        warn!("OPENAI_API_KEY is missing or invalid; chat requests will fail with 500");
    }

    let provider = Arc::new(OpenAiBackend::from_config(&config.provider)?);
    let backend = PersonaBackend::new(
        provider,
        config.personas.clone(),
        config.provider.model.clone(),
    );
    let state = AppState::new(Arc::new(backend), config.personas.clone(), config.limits.clone())
        .with_credentials(credentials_ok);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}
