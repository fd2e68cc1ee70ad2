use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use callsync_backend::{
    config::{get_config, init_config},
    database::pool::create_pool,
    routes, AppState,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    let app_state = AppState::new(pool);

    // Webhook workers: turn recorded deliveries into sync events.
    for worker in 0..config.webhook_workers {
        let state = app_state.clone();
        tokio::spawn(async move {
            loop {
                match state.intake_service.run_once().await {
                    Ok(true) => {}
                    Ok(false) => {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, worker, "Webhook worker error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
    }

    // Sync workers: drive due sync events through the CRM pipeline.
    for worker in 0..config.sync_workers {
        let state = app_state.clone();
        tokio::spawn(async move {
            loop {
                match state.sync_service.run_once().await {
                    Ok(true) => {}
                    Ok(false) => {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, worker, "Sync worker error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
    }

    // Notification workers: deliver queued outcome emails with backoff.
    for worker in 0..config.notification_workers {
        let state = app_state.clone();
        tokio::spawn(async move {
            loop {
                match state.notification_service.run_once().await {
                    Ok(true) => {}
                    Ok(false) => {
                        tokio::time::sleep(Duration::from_millis(1000)).await;
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, worker, "Notification worker error");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    let base_routes = Router::new().route("/health", get(routes::health::health));

    let webhook_api = Router::new()
        .route(
            "/webhooks/retell/:integration_id",
            post(routes::webhook::handle_retell_webhook),
        )
        .route(
            "/webhooks/:provider/:integration_id",
            post(routes::webhook::handle_crm_webhook),
        );

    let admin_api = Router::new()
        .route(
            "/api/admin/webhook-base-url",
            get(routes::admin::get_webhook_base_url).put(routes::admin::update_webhook_base_url),
        )
        .route(
            "/api/admin/integrations/:id/webhook-urls",
            get(routes::admin::get_integration_webhook_urls),
        )
        .route(
            "/api/admin/sync-events/:id",
            get(routes::admin::get_sync_event),
        )
        .route(
            "/api/admin/sync-events/:id/retry",
            post(routes::admin::retry_sync_event),
        )
        .route(
            "/api/admin/mappings/suggest",
            post(routes::admin::suggest_mappings),
        )
        .layer(axum::middleware::from_fn_with_state(
            callsync_backend::middleware::rate_limit::new_rps_state(config.admin_rps),
            callsync_backend::middleware::rate_limit::rps_middleware,
        ));

    let app = base_routes
        .merge(webhook_api)
        .merge(admin_api)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024));

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
