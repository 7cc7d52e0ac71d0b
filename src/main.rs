use std::{net::SocketAddr, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use tokio::signal;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use wholesale_settlement as settlement;
use wholesale_settlement::config::AppConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    name = "wholesale-settlement",
    about = "Quotations, consignments and invoicing for wholesale distribution",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Apply pending schema migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let cfg = match settlement::config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            settlement::config::init_tracing(settlement::config::DEFAULT_LOG_LEVEL, false);
            error!(error = %e, "rejecting settlement settings");
            return Err(e.into());
        }
    };
    settlement::config::init_tracing(cfg.log_level(), cfg.log_json);
    cfg.log_summary();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            settlement::migrator::run_migration(cfg.database_url()).await?;
            info!("migrations applied");
            Ok(())
        }
        Command::Serve => serve(cfg).await,
    }
}

async fn serve(cfg: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let db_pool = settlement::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        settlement::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    let (event_sender, event_rx) = settlement::events::channel(cfg.event_channel_capacity);
    tokio::spawn(settlement::events::process_events(event_rx));

    let app_state = settlement::AppState::new(db_arc, cfg.clone(), event_sender);

    let sweeper = if cfg.expiry_sweep_interval_secs > 0 {
        info!(
            interval_secs = cfg.expiry_sweep_interval_secs,
            "starting quotation expiry sweeper"
        );
        Some(settlement::services::quotations::spawn_expiry_sweeper(
            app_state.services.quotations.clone(),
            Duration::from_secs(cfg.expiry_sweep_interval_secs),
        ))
    } else {
        warn!("quotation expiry sweeper disabled");
        None
    };

    settlement::handlers::health::init_start_time();

    let cors_layer = if cfg.is_production() {
        CorsLayer::new()
    } else {
        CorsLayer::permissive()
    };

    let app = settlement::app_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors_layer);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("wholesale-settlement listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    info!("shutdown complete");
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_serves() {
        let cli = Cli::try_parse_from(["wholesale-settlement"]).unwrap();
        assert_eq!(cli.command, None);
        let cli = Cli::try_parse_from(["wholesale-settlement", "serve"]).unwrap();
        assert_eq!(cli.command, Some(Command::Serve));
    }

    #[test]
    fn migrate_subcommand_parses() {
        let cli = Cli::try_parse_from(["wholesale-settlement", "migrate"]).unwrap();
        assert_eq!(cli.command, Some(Command::Migrate));
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["wholesale-settlement", "migrat"]).is_err());
    }
}
