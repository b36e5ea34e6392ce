use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::{capital::CapitalGateway, mt5::Mt5Gateway};

pub mod brokers;
pub mod cache;
pub mod common;
pub mod config;
pub mod error;
pub mod middleware;
pub mod operations;
pub mod routes;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub capital: Arc<CapitalGateway>,
    pub mt5: Arc<Mt5Gateway>,
}

/// Assembles both gateways under `config.api_base_uri`.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(routes::health))
        .nest("/capital", routes::capital::router(state.clone()))
        .nest("/mt5", routes::mt5::router(state.clone()));

    let base = state.config.api_base_uri.trim_end_matches('/');
    let router = if base.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(base, api)
    };
    let router = router
        .layer(axum::middleware::from_fn(middleware::log_errors))
        .layer(TraceLayer::new_for_http());

    #[cfg(debug_assertions)]
    let router = router.layer(tower_http::cors::CorsLayer::permissive());

    router.with_state(state)
}
