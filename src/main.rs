mod broadcast;
mod cache;
mod config;
mod domain;
mod error;
mod http;
mod middleware;
mod recent;
mod refresh;
mod registry;
mod upstream;
mod views_builder;

use std::sync::Arc;

use cache::SnapshotCache;
use config::Settings;
use refresh::RefreshLoop;
use registry::SubscriberRegistry;
use upstream::UpstreamClient;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
/// One long-lived instance of each component, constructed once at startup
/// (spec 9, "singleton services and global state").
pub struct AppState {
    pub cache: SnapshotCache,
    pub upstream: Arc<UpstreamClient>,
    pub registry: Arc<SubscriberRegistry>,
    pub refresh: Arc<RefreshLoop>,
    pub settings: Arc<Settings>,
}

#[tokio::main]
async fn main() {
    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            // tracing isn't initialized yet on a config failure this early;
            // this is the one place a plain stderr print is appropriate.
            eprintln!("fatal: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| tracing_subscriber::EnvFilter::new("info"),
        ))
        .init();

    if let Err(e) = run(settings).await {
        tracing::error!(error = ?e, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run(settings: Settings) -> Result<(), error::AppError> {
    let settings = Arc::new(settings);

    let cache = SnapshotCache::connect(&settings.redis_url).await?;
    let upstream = Arc::new(UpstreamClient::new(&settings)?);
    let registry = Arc::new(SubscriberRegistry::new(&settings));
    let refresh_loop = Arc::new(RefreshLoop::new(
        cache.clone(),
        upstream.clone(),
        (*settings).clone(),
    ));

    let state = Arc::new(AppState {
        cache: cache.clone(),
        upstream: upstream.clone(),
        registry: registry.clone(),
        refresh: refresh_loop.clone(),
        settings: settings.clone(),
    });

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let refresh_task = tokio::spawn(refresh_loop.clone().run(shutdown_tx.subscribe()));
    let broadcast_task = tokio::spawn(broadcast::run(
        settings.redis_url.clone(),
        registry.clone(),
        shutdown_tx.subscribe(),
    ));
    let heartbeat_task = tokio::spawn(heartbeat_loop(
        registry.clone(),
        settings.sse_heartbeat_interval,
        shutdown_tx.subscribe(),
    ));

    let app = http::create_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .map_err(|e| error::AppError::Fatal(format!("cannot bind {}: {e}", settings.bind_addr)))?;

    tracing::info!(addr = %settings.bind_addr, "listening");

    let mut shutdown_signal = shutdown_tx.subscribe();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(());
        let _ = shutdown_signal.recv().await;
    })
    .await
    .map_err(|e| error::AppError::Fatal(format!("server error: {e}")))?;

    registry.close_all("server shutting down");
    let _ = tokio::join!(refresh_task, broadcast_task, heartbeat_task);

    Ok(())
}

/// Independent long-lived task driving `SubscriberRegistry::heartbeat_tick`
/// on `HEARTBEAT_INTERVAL` (spec 4.6, 9 "async control flow").
async fn heartbeat_loop(
    registry: Arc<SubscriberRegistry>,
    interval: std::time::Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => registry.heartbeat_tick(),
            _ = shutdown.recv() => {
                tracing::info!("heartbeat loop shutting down");
                return;
            }
        }
    }
}
