use exam_engine::{
    cache::{LiveCache, RedisLiveCache},
    config::{get_config, init_config},
    database::{pool::create_pool, ExamStore, PgExamStore},
    routes,
    services::notification_service::{LogNotifier, NotificationService, Notifier},
    utils::time::now,
    AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    init_config()?;
    let config = get_config()?;

    let pool = create_pool().await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let store: Arc<dyn ExamStore> = Arc::new(PgExamStore::new(pool.clone()));
    let cache: Arc<dyn LiveCache> = Arc::new(RedisLiveCache::connect(&config.redis_url).await?);

    let notifier: Arc<dyn Notifier> = match &config.webhook_url {
        Some(url) => {
            let outbox = NotificationService::new(pool.clone(), url.clone(), config.webhook_secret.clone());
            {
                let outbox = outbox.clone();
                tokio::spawn(async move {
                    loop {
                        match outbox.run_once().await {
                            Ok(true) => {}
                            Ok(false) => {
                                tokio::time::sleep(Duration::from_millis(1000)).await;
                            }
                            Err(e) => {
                                tracing::error!(error = ?e, "Outbox worker error");
                                tokio::time::sleep(Duration::from_secs(2)).await;
                            }
                        }
                    }
                });
            }
            Arc::new(outbox)
        }
        None => {
            info!("WEBHOOK_URL not set, notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let app_state = AppState::new(store, cache, notifier, &config.jwt_secret);

    if config.recover_on_start {
        match app_state.recovery_service.run(now()).await {
            Ok(report) => info!(
                rebuilt = report.rebuilt,
                finalized = report.finalized,
                failed = report.failed,
                "Startup recovery complete"
            ),
            Err(e) => tracing::error!(error = ?e, "Startup recovery failed"),
        }
    }

    let app = routes::router(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
