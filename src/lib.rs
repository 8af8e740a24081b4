//! Shanyraq account verification and session lifecycle API.

#![forbid(unsafe_code)]

pub mod clock;
pub mod code;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod mail;
pub mod middleware;
pub mod revocation;
pub mod router;
pub mod session;
pub mod telemetry;
pub mod token;
pub mod user;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use clock::{Clock, SystemClock};
use crypto::PasswordManager;
use mail::{EmailSender, MailManager};
use revocation::{MemoryRevocations, PgRevocations, RevocationStore};
use session::SessionService;
use token::TokenManager;
use user::{IdentityStore, MemoryUserRepository, PgUserRepository};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub sessions: Arc<SessionService>,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `GET /metrics` exposes Prometheus metrics.
        .route("/metrics", get(router::status::metrics))
        .nest("/auth", router::auth::router())
        .nest("/users", router::users::router(state.clone()))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (users, revocations): (Arc<dyn IdentityStore>, Arc<dyn RevocationStore>) =
        match &config.postgres {
            Some(postgres) => {
                let db = database::Database::new(postgres).await?;
                // execute migrations scripts on start.
                db.migrate().await?;

                (
                    Arc::new(PgUserRepository::new(db.postgres.clone())),
                    Arc::new(PgRevocations::new(db.postgres)),
                )
            },
            None => {
                tracing::warn!(
                    "missing `postgres` entry on `config.yaml` file, data will not be persisted"
                );
                (
                    Arc::new(MemoryUserRepository::new()),
                    Arc::new(MemoryRevocations::new()),
                )
            },
        };

    let passwords = PasswordManager::new(config.argon2.clone())?;
    let tokens = TokenManager::new(&config.url, &config.token, Arc::clone(&clock))?;

    // handle mail sender.
    let mailer: Arc<dyn EmailSender> = match &config.mail {
        Some(cfg) => Arc::new(MailManager::new(cfg).await?),
        None => {
            tracing::warn!("missing `mail` entry on `config.yaml` file, emails will only be logged");
            Arc::new(MailManager::default())
        },
    };

    revocation::spawn_sweeper(
        Arc::clone(&revocations),
        Arc::clone(&clock),
        Duration::from_secs(config.revocation.sweep_interval.max(1)),
    );

    let sessions = Arc::new(SessionService::new(
        users,
        mailer,
        revocations,
        passwords,
        tokens,
        clock,
    ));

    Ok(AppState {
        config,
        sessions,
        metrics,
    })
}
