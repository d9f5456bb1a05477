use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::{signal, sync::mpsc};
use tracing::{error, info};
use uuid::Uuid;

use settle_api as api;

#[derive(Debug, Parser)]
#[command(name = "settle-api", version, about = "Checkout and payment settlement service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Re-verify pending payment attempts older than the cut-off
    Sweep {
        #[arg(long, default_value_t = 30)]
        older_than_mins: i64,
    },
    /// Print a bearer token for an owner id (development)
    Token {
        #[arg(long)]
        user: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(cfg).await,
        Commands::Migrate => {
            let db = api::db::establish_connection_from_app_config(&cfg).await?;
            api::db::run_migrations(&db).await?;
            info!("migrations applied");
            Ok(())
        }
        Commands::Sweep { older_than_mins } => {
            let state = build_state(cfg).await?;
            let report = state
                .reconciliation
                .sweep_pending(chrono::Duration::minutes(older_than_mins))
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Token { user } => {
            let auth = api::auth::AuthService::new(cfg.jwt_secret.clone(), cfg.jwt_expiration);
            println!("{}", auth.issue_token(user)?);
            Ok(())
        }
    }
}

async fn build_state(cfg: api::config::AppConfig) -> Result<api::AppState> {
    let db = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }

    let gateways = api::gateways::GatewayRegistry::from_config(&cfg)
        .context("failed to build payment gateways")?;

    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    tokio::spawn(api::events::process_events(event_rx));
    let event_sender = api::events::EventSender::new(event_tx);

    Ok(api::AppState::build(Arc::new(db), cfg, gateways, event_sender)?)
}

async fn serve(cfg: api::config::AppConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;
    let state = build_state(cfg).await?;
    let app = api::app_router(state);

    info!("settle-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
