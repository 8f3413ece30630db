use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use payment_router::handlers;
use payment_router::{AppState, Config};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let state = match AppState::new(&config) {
        Ok(state) => state,
        Err(err) => {
            error!(error = %err, "failed to initialize application state");
            std::process::exit(1);
        }
    };

    // The cache is advisory: selection has independent fallbacks, so a dead
    // Redis delays nothing at startup.
    if state.gateway_service.cache_ping().await {
        info!(redis_url = %config.redis_url, "connected to redis");
    } else {
        warn!(redis_url = %config.redis_url, "redis unreachable, starting without shared cache");
    }

    let shutdown = CancellationToken::new();
    state.spawn_background_tasks(&config, &shutdown);

    let app = handlers::router(state);
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(port = config.port, error = %err, "failed to bind listener");
            std::process::exit(1);
        }
    };
    info!(port = config.port, workers = config.workers, "server started");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown.clone()));
    if let Err(err) = serve.await {
        error!(error = %err, "server error");
    }

    shutdown.cancel();
    info!("server exited");
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining");
    shutdown.cancel();
}
