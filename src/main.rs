use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use prompt_gateway::config::{Cli, Config};
use prompt_gateway::server::api::{build_router, AppState};
use prompt_gateway::upstream::ResponsesClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Pick up a local .env before anything reads the environment.
    let dotenv = dotenvy::dotenv();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "prompt_gateway=debug,tower_http=debug"
    } else {
        "prompt_gateway=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("prompt-gateway v{}", env!("CARGO_PKG_VERSION"));
    match dotenv {
        Ok(path) => info!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Ignoring unreadable .env"),
    }

    // Load configuration. A missing API key stops startup here.
    let mut config = Config::from_sources(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    let config = Arc::new(config);

    info!(
        base_url = config.upstream.base_url,
        default_model = config.upstream.default_model,
        request_timeout_secs = config.server.request_timeout_secs,
        connect_timeout_secs = config.server.connect_timeout_secs,
        "Configuration loaded"
    );

    // Initialize the upstream client.
    let client = ResponsesClient::new(&config)?;

    // Build application state.
    let state = Arc::new(AppState::new(Arc::new(client), config.clone()));

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    info!(addr = listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
