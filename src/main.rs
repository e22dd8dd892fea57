//! Auto-pay server
//!
//! Serves the cron and webhook endpoints of the auto-pay service and,
//! when `AUTOPAY_CRON` is set, runs the batch on an in-process schedule.

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use autopay_server::autopay::{BatchProcessor, PaymentHandler};
use autopay_server::config::Config;
use autopay_server::gateway::HttpTransferGateway;
use autopay_server::ledger::{LedgerStore, PgLedgerStore};
use autopay_server::notifications::{LogNotifier, Notifier, ResendNotifier};
use autopay_server::settlement::SettlementService;
use autopay_server::state::AppState;
use autopay_server::trust::{PgTrustEngine, TrustEngine};
use autopay_server::{db, routes, scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        batch_size = config.autopay.batch_size,
        concurrency = config.autopay.concurrency,
        "Starting auto-pay server"
    );
    if config.cron_secret.is_none() {
        tracing::warn!("CRON_SECRET not set, cron endpoints are unauthenticated");
    }

    let db_pool = db::create_pool(&config).await?;
    db::run_migrations(&db_pool).await?;

    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(db_pool.clone()));
    let trust: Arc<dyn TrustEngine> = Arc::new(PgTrustEngine::new(db_pool.clone()));
    let gateway = Arc::new(HttpTransferGateway::new(&config.gateway)?);

    let notifier: Arc<dyn Notifier> = match &config.email.resend_api_key {
        Some(api_key) => Arc::new(ResendNotifier::new(
            api_key.clone(),
            config.email.from_address.clone(),
        )),
        None => {
            tracing::warn!("RESEND_API_KEY not set, emails will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let handler = Arc::new(PaymentHandler::new(
        store.clone(),
        gateway,
        trust.clone(),
        notifier,
        config.autopay.clone(),
    ));
    let batch_processor = Arc::new(BatchProcessor::new(store.clone(), handler));
    let settlement = Arc::new(SettlementService::new(store.clone(), trust));

    let mut cron_scheduler = match &config.autopay_cron {
        Some(expression) => Some(
            scheduler::start_autopay_scheduler(expression, batch_processor.clone())
                .await
                .map_err(|e| anyhow::anyhow!("Failed to start auto-pay scheduler: {:?}", e))?,
        ),
        None => None,
    };

    let app_state = AppState::new(
        store,
        batch_processor,
        settlement,
        config.cron_secret.clone(),
        config.webhook_secret.clone(),
    );

    let app = routes::router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(configure_cors(config.cors_allowed_origins.as_deref()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(%addr, "Auto-pay server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(scheduler) = cron_scheduler.as_mut() {
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!("Failed to stop auto-pay scheduler: {:?}", e);
        }
    }

    tracing::info!("Auto-pay server stopped");
    Ok(())
}

fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    if origins.is_empty() {
        tracing::warn!("No CORS origins configured, using a permissive policy");
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Resolves on Ctrl+C or, on unix, SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => tracing::info!(signal = "SIGINT", "Shutting down"),
                    _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "Shutting down"),
                }
                return;
            }
            Err(e) => tracing::error!("SIGTERM handler unavailable: {}", e),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "SIGINT", "Shutting down"),
        Err(e) => {
            tracing::error!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
