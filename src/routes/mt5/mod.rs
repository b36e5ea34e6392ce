mod handler;
pub mod model;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post, put},
};
use tokio::sync::RwLock;

use crate::{
    AppState,
    brokers::mt5::{Mt5Connection, Mt5Provisioner},
    cache::KeyedLocks,
    error::AppError,
    middleware::mt5_auth,
};

pub use handler::{
    account, close_position, history, login, logout, market, modify_position, positions, trade,
};

/// Live connections keyed by MT5 login. Handles are not serializable, so
/// this registry is always process-local.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<dyn Mt5Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, login: &str) -> Option<Arc<dyn Mt5Connection>> {
        self.connections.read().await.get(login).cloned()
    }

    /// Returns the connection this one replaced, if any.
    pub async fn insert(
        &self,
        login: &str,
        connection: Arc<dyn Mt5Connection>,
    ) -> Option<Arc<dyn Mt5Connection>> {
        self.connections
            .write()
            .await
            .insert(login.to_string(), connection)
    }

    pub async fn remove(&self, login: &str) -> Option<Arc<dyn Mt5Connection>> {
        self.connections.write().await.remove(login)
    }
}

pub struct Mt5Gateway {
    pub provisioner: Arc<dyn Mt5Provisioner>,
    pub connections: ConnectionRegistry,
    pub locks: KeyedLocks,
    pub magic: u64,
    pub deploy_timeout: Duration,
}

impl Mt5Gateway {
    pub fn new(provisioner: Arc<dyn Mt5Provisioner>, magic: u64, deploy_timeout: Duration) -> Self {
        Self {
            provisioner,
            connections: ConnectionRegistry::new(),
            locks: KeyedLocks::new(),
            magic,
            deploy_timeout,
        }
    }

    pub async fn connection_for(&self, login: &str) -> Result<Arc<dyn Mt5Connection>, AppError> {
        self.connections
            .get(login)
            .await
            .ok_or_else(AppError::session_expired)
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
        .layer(axum::middleware::from_fn_with_state(state, mt5_auth));

    Router::new().merge(public_routes).merge(protected_routes)
}
