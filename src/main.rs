use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};

use zentrix_payments::api::{self, AppState};
use zentrix_payments::cache::{init_redis_pool, RedisLedger, RedisPoolConfig};
use zentrix_payments::config::{AppConfig, LedgerBackend};
use zentrix_payments::database::{self, PgLedger, PgOrderRepository};
use zentrix_payments::health::HealthChecker;
use zentrix_payments::ledger::{InMemoryLedger, RetentionPolicy, TransactionLedger};
use zentrix_payments::logging::init_tracing;
use zentrix_payments::middleware::logging::{request_logging_middleware, UuidRequestId};
use zentrix_payments::payments::factory::GatewayRegistry;
use zentrix_payments::services::reconciler::CallbackReconciler;
use zentrix_payments::workers::ledger_retention::LedgerRetentionWorker;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
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
                error!(error = %e, "failed to install SIGTERM handler");
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

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;
    init_tracing(&config.logging);
    config.validate().context("validating configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        ledger_backend = ?config.ledger.backend,
        strict_amount = config.reconciler.strict_amount,
        "Starting Zentrix payments service"
    );

    let db_pool = database::connect(&config.database).await.map_err(|e| {
        error!(error = %e, "Failed to initialize database pool");
        e
    })?;
    info!(
        max_connections = db_pool.options().get_max_connections(),
        "Database connection pool initialized"
    );

    let retention = RetentionPolicy::from_secs(config.ledger.retention_secs);
    let mut health_checker_cache = None;
    let ledger: Arc<dyn TransactionLedger> = match config.ledger.backend {
        LedgerBackend::Memory => {
            warn!("Using in-memory ledger; processed transactions are lost on restart");
            Arc::new(InMemoryLedger::new(config.ledger.max_entries, retention))
        }
        LedgerBackend::Postgres => Arc::new(PgLedger::new(db_pool.clone(), retention)),
        LedgerBackend::Redis => {
            let redis_url = config
                .ledger
                .redis_url
                .clone()
                .context("REDIS_URL is required for the redis ledger")?;
            let pool = init_redis_pool(&RedisPoolConfig::new(redis_url))
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to initialize Redis pool");
                    e
                })?;
            health_checker_cache = Some(pool.clone());
            Arc::new(RedisLedger::new(pool, retention))
        }
    };
    info!(backend = ledger.backend(), "Transaction ledger ready");

    let registry = GatewayRegistry::from_env().context("configuring payment gateways")?;
    info!(
        gateways = ?registry.list_available(),
        default = %registry.default_gateway(),
        "Payment gateways configured"
    );

    let orders = Arc::new(PgOrderRepository::new(db_pool.clone()));
    let reconciler = Arc::new(CallbackReconciler::new(
        registry.clone(),
        ledger.clone(),
        orders,
        config.reconciler.clone(),
    ));

    let mut health_checker = HealthChecker::new(ledger.clone()).with_database(db_pool.clone());
    if let Some(pool) = health_checker_cache {
        health_checker = health_checker.with_cache(pool);
    }

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let retention_worker = LedgerRetentionWorker::new(
        ledger.clone(),
        Duration::from_secs(config.ledger.purge_interval_secs),
    );
    let retention_handle = tokio::spawn(retention_worker.run(worker_shutdown_rx));

    let app = api::router(AppState {
        registry,
        reconciler,
        health_checker,
    })
    .layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("parsing server address")?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "Failed to bind");
        e
    })?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await
        .context("serving http")?;

    let _ = worker_shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(5), retention_handle)
        .await
        .is_err()
    {
        error!("Timed out waiting for ledger retention worker shutdown");
    }

    info!("Server shutdown complete");
    Ok(())
}
