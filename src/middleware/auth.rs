use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::{
    AppState,
    error::AppError,
    utils::{Platform, claims_from_headers},
};

async fn authorize(
    state: &AppState,
    platform: Platform,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let claims = claims_from_headers(request.headers(), &state.config)
        .filter(|c| c.platform == platform)
        .ok_or_else(AppError::unauthorized)?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Requires a bearer token issued by the Capital.com gateway.
pub async fn capital_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    authorize(&state, Platform::Capital, request, next).await
}

/// Requires a bearer token issued by the MT5 gateway.
pub async fn mt5_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    authorize(&state, Platform::Mt5, request, next).await
}
