mod handler;
pub mod model;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::{
    AppState,
    brokers::capital::CapitalApi,
    cache::{CachedSession, KeyedLocks, SessionStore},
    error::AppError,
    middleware::capital_auth,
    operations::OperationJournal,
};

pub use handler::{
    account, close_position, history, login, logout, market, modify_position, operations,
    positions, trade,
};

/// Shared state of the Capital.com gateway.
pub struct CapitalGateway {
    pub api: Arc<dyn CapitalApi>,
    pub sessions: Arc<dyn SessionStore>,
    pub journal: OperationJournal,
    pub locks: KeyedLocks,
    pub session_ttl: Duration,
}

impl CapitalGateway {
    pub fn new(
        api: Arc<dyn CapitalApi>,
        sessions: Arc<dyn SessionStore>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            api,
            sessions,
            journal: OperationJournal::default(),
            locks: KeyedLocks::new(),
            session_ttl,
        }
    }

    /// Cached vendor session for `username`, with its expiry pushed forward.
    pub async fn session_for(&self, username: &str) -> Result<CachedSession, AppError> {
        let session = self
            .sessions
            .get(username)
            .await?
            .ok_or_else(AppError::session_expired)?;

        if let Err(e) = self.sessions.touch(username, self.session_ttl).await {
            tracing::warn!(username, error = %e, "Failed to extend session expiry");
        }
        Ok(session)
    }
}

pub fn router(state: AppState) -> Router<AppState> {
    let public_routes = Router::new().route("/login", post(login));

    let protected_routes = Router::new()
        .route("/logout", post(logout))
        .route("/account", get(account))
        .route("/market/{symbol}", get(market))
        .route("/positions", get(positions))
        .route("/history", get(history))
        .route("/trade", post(trade))
        .route("/position/{id}", put(modify_position).delete(close_position))
        .route("/operations", get(operations))
        .layer(axum::middleware::from_fn_with_state(state, capital_auth));

    Router::new().merge(public_routes).merge(protected_routes)
}
