//! SiteScribe Backend
//!
//! Attendance and allowance tracking for construction-site crews, with SQLite
//! persistence, a live local mirror, per-session pending edits and monthly
//! spreadsheet reports.

mod advisor;
mod api;
mod config;
mod db;
mod editing;
mod errors;
mod models;
mod report;
mod sync;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use advisor::DataIntegrityAdvisor;
use config::Config;
use db::Repository;
use editing::{Debouncer, SessionRegistry};
use sync::LocalMirror;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub mirror: Arc<LocalMirror>,
    pub sessions: Arc<SessionRegistry>,
    /// Allowance write-through, keyed by `${date}-${employee_id}`
    pub allowance_debouncer: Arc<Debouncer<String>>,
    pub advisor: Arc<dyn DataIntegrityAdvisor>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting SiteScribe Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    // Mirror the store; the subscription must outlive the server
    let (mirror, _subscription) = LocalMirror::start(repo.clone());

    let sessions = Arc::new(SessionRegistry::new(config.session_idle_timeout));
    tokio::spawn(evict_idle_sessions(sessions.clone()));

    let state = AppState {
        repo,
        mirror,
        sessions,
        allowance_debouncer: Arc::new(Debouncer::new(config.allowance_debounce)),
        advisor: Arc::from(advisor::from_config(&config.advisor)),
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API routes
    let api_routes = Router::new()
        // Datastore
        .route("/datastore", get(api::get_datastore))
        .route("/datastore/revision", get(api::get_revision))
        // Employees
        .route(
            "/employees",
            get(api::list_employees).post(api::create_employee),
        )
        .route(
            "/employees/{id}",
            get(api::get_employee)
                .put(api::update_employee)
                .delete(api::delete_employee),
        )
        .route(
            "/employees/{id}/summary/{month}",
            get(api::get_employee_summary),
        )
        // Committed attendance
        .route("/attendance/{date}", get(api::get_attendance_day))
        // Editing sessions
        .route("/sessions", post(api::open_session))
        .route(
            "/sessions/{id}",
            get(api::get_session).delete(api::close_session),
        )
        .route("/sessions/{id}/date", put(api::select_session_date))
        .route("/sessions/{id}/status", post(api::toggle_session_status))
        .route("/sessions/{id}/allowance", put(api::set_session_allowance))
        .route(
            "/sessions/{id}/pending",
            delete(api::discard_session_changes),
        )
        .route("/sessions/{id}/commit", post(api::commit_session))
        // Reports
        .route("/reports/months", get(api::list_report_months))
        .route("/reports/{month}", get(api::get_monthly_report))
        .route("/reports/{month}/export", get(api::export_monthly_report))
        // Integrity advisor
        .route("/integrity/{month}", post(api::check_month_integrity));

    // Health check
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Sweep abandoned editing sessions once a minute.
async fn evict_idle_sessions(sessions: Arc<SessionRegistry>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        sessions.evict_idle().await;
    }
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
