use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use marina::config::AppConfig;
use marina::db;
use marina::handlers;
use marina::services::assignment;
use marina::services::notify::mailgun::MailgunSender;
use marina::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    if config.mailgun_api_key.is_empty() {
        tracing::warn!("MAILGUN_API_KEY not set, notification delivery will fail");
    }
    let notifier = MailgunSender::new(
        config.mailgun_api_key.clone(),
        config.mailgun_domain.clone(),
        config.mail_from.clone(),
    );

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        notifier: Box::new(notifier),
        assigning: AtomicBool::new(false),
    });

    // Periodic trigger; /api/admin/run covers the on-demand case.
    let ticker_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(
            ticker_state.config.assign_interval_secs,
        ));
        loop {
            tick.tick().await;
            assignment::process_assignments(&ticker_state).await;
        }
    });

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/admin/status", get(handlers::admin::get_status))
        .route("/api/admin/bookings", get(handlers::admin::get_bookings))
        .route(
            "/api/admin/bookings/:id",
            get(handlers::admin::get_booking),
        )
        .route("/api/admin/run", post(handlers::admin::run_assignments))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
