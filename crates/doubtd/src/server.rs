//! HTTP server for doubtd

use crate::routes;
use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::Router;
use doubt_common::Solver;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Sessions expire this long after login
pub const SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Room for the JSON around a base64 image
const BODY_HEADROOM: usize = 64 * 1024;

/// A logged-in user
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub username: String,
    pub started: Instant,
}

/// Application state shared across handlers
pub struct AppState {
    pub solver: Arc<Solver>,
    /// Bearer token -> logged-in user
    pub sessions: RwLock<HashMap<String, Session>>,
    pub session_ttl: Duration,
    pub start_time: Instant,
}

impl Session {
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.started.elapsed() >= ttl
    }
}

impl AppState {
    pub fn new(solver: Solver) -> Self {
        Self {
            solver: Arc::new(solver),
            sessions: RwLock::new(HashMap::new()),
            session_ttl: SESSION_TTL,
            start_time: Instant::now(),
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }
}

/// Largest request body: a base64 image of `max_image_bytes` plus headroom.
///
/// Images somewhat over the limit still reach the solver, which rejects
/// them with a JSON notice.
pub fn request_body_limit(max_image_bytes: usize) -> usize {
    max_image_bytes.div_ceil(3) * 4 + BODY_HEADROOM
}

/// Build the router with all API routes
pub fn app(state: Arc<AppState>) -> Router {
    let body_limit = request_body_limit(state.solver.config().max_image_bytes);
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::normalize_routes())
        .merge(routes::account_routes())
        .merge(routes::question_routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until Ctrl-C
pub async fn run(state: AppState, bind: &str) -> Result<()> {
    let app = app(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("  Listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down gracefully");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_limit_fits_encoded_image() {
        let max: usize = 10 * 1024 * 1024;
        let encoded = max.div_ceil(3) * 4;
        assert!(request_body_limit(max) > encoded);
        assert!(request_body_limit(max) < encoded + 1024 * 1024);
    }

    #[test]
    fn test_session_expiry() {
        let session = Session {
            user_id: "u".to_string(),
            username: "asha".to_string(),
            started: Instant::now(),
        };
        assert!(!session.is_expired(SESSION_TTL));
        assert!(session.is_expired(Duration::ZERO));
    }
}
