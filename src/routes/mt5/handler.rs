use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use futures_util::future::try_join;

use crate::{
    AppState,
    brokers::mt5::{Mt5Account, NewAccount, TradeOutcome},
    common::{HistoryQuery, history_window},
    error::{AppError, VendorError},
    routes::mt5::{
        Mt5Gateway,
        model::{
            AccountView, DealView, LoginRequest, LoginResponse, LogoutResponse, ModifyRequest,
            Mt5Order, PositionActionResponse, PositionView, Quote, TradeRequest, TradeResponse,
        },
    },
    utils::{Claims, Platform, generate_token},
};

const PLATFORM: &str = "mt5";

/// Vendor 401/403 means the MT5 credentials were refused.
fn credentials_or(context: &'static str) -> impl FnOnce(VendorError) -> AppError {
    move |e| {
        if e.is_auth_rejection() {
            tracing::info!(error = %e, "MT5 credentials rejected");
            AppError::Authentication("Invalid MT5 credentials".into())
        } else {
            AppError::upstream(context, e)
        }
    }
}

fn ticket_or(context: &'static str, ticket: &str) -> impl FnOnce(VendorError) -> AppError {
    let ticket = ticket.to_string();
    move |e| {
        if e.is_not_found() {
            AppError::NotFound(format!("Position {ticket} not found"))
        } else {
            AppError::upstream(context, e)
        }
    }
}

/// Waits, within the deployment ceiling, for the account to be deployed
/// and logged in at the broker.
async fn await_ready(gateway: &Mt5Gateway, account_id: &str) -> Result<(), AppError> {
    let provisioner = &gateway.provisioner;
    let ready = async {
        provisioner
            .wait_deployed(account_id)
            .await
            .map_err(|e| AppError::upstream("deploy MT5 account", e))?;
        provisioner
            .wait_connected(account_id)
            .await
            .map_err(credentials_or("connect MT5 account to broker"))
    };

    match tokio::time::timeout(gateway.deploy_timeout, ready).await {
        Ok(result) => result,
        Err(_) => {
            let err = VendorError::Timeout {
                code: "DEPLOYMENT_TIMEOUT",
                waited_for: "MT5 account deployment",
            };
            Err(AppError::upstream("deploy MT5 account", err).with_detail("accountId", account_id))
        }
    }
}

/// Finds the hosted account for these credentials, provisioning one when
/// none exists. Either way the terminal is (re)started on the supplied
/// password and must log in at the broker before this returns.
async fn ensure_account(
    gateway: &Mt5Gateway,
    login: &str,
    password: &str,
    server: &str,
) -> Result<Mt5Account, AppError> {
    let provisioner = &gateway.provisioner;
    let existing = provisioner
        .find_account(login, server)
        .await
        .map_err(|e| AppError::upstream("look up MT5 account", e))?;

    let account = match existing {
        Some(account) => {
            provisioner
                .update_password(&account, password)
                .await
                .map_err(credentials_or("update MT5 account"))?;
            if account.is_deployed() {
                tracing::info!(login, account_id = %account.id, "Redeploying MT5 account");
                provisioner
                    .redeploy(&account.id)
                    .await
                    .map_err(|e| AppError::upstream("redeploy MT5 account", e))?;
            } else {
                tracing::info!(login, account_id = %account.id, "Deploying MT5 account");
                provisioner
                    .deploy(&account.id)
                    .await
                    .map_err(|e| AppError::upstream("deploy MT5 account", e))?;
            }
            account
        }
        None => {
            tracing::info!(login, server, "Provisioning MT5 account");
            let account = provisioner
                .create_account(&NewAccount {
                    name: format!("{login}@{server}"),
                    login: login.to_string(),
                    password: password.to_string(),
                    server: server.to_string(),
                    platform: PLATFORM,
                    magic: gateway.magic,
                })
                .await
                .map_err(credentials_or("provision MT5 account"))?;
            provisioner
                .deploy(&account.id)
                .await
                .map_err(|e| AppError::upstream("deploy MT5 account", e))?;
            account
        }
    };

    await_ready(gateway, &account.id).await?;
    Ok(account)
}

pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(request), _): WithRejection<Json<LoginRequest>, AppError>,
) -> Result<Json<LoginResponse>, AppError> {
    let credentials = request.validate()?;
    let login = credentials.login.as_str();
    let gateway = &state.mt5;
    let _guard = gateway.locks.lock(login).await;

    let account = match ensure_account(
        gateway,
        login,
        &credentials.password,
        &credentials.server,
    )
    .await
    {
        Ok(account) => account,
        Err(e @ AppError::Authentication(_)) => {
            // the terminal now holds refused credentials; a cached handle is dead
            if let Some(stale) = gateway.connections.remove(login).await {
                if let Err(close_err) = stale.close().await {
                    tracing::warn!(login, error = %close_err, "Failed to close stale MT5 connection");
                }
            }
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let connection = gateway
        .provisioner
        .connect(&account)
        .await
        .map_err(credentials_or("connect to MT5 account"))?;

    if let Some(previous) = gateway.connections.insert(login, connection).await {
        if let Err(e) = previous.close().await {
            tracing::warn!(login, error = %e, "Failed to close replaced MT5 connection");
        }
    }

    let (token, expires_at) = generate_token(login, Platform::Mt5, &state.config).map_err(|e| {
        tracing::error!("Failed to sign token: {}", e);
        AppError::internal("Failed to issue token")
    })?;

    tracing::info!(login, account_id = %account.id, "MT5 login");
    Ok(Json(LoginResponse {
        success: true,
        token,
        expires_at,
        account_id: account.id,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Json<LogoutResponse> {
    let gateway = &state.mt5;
    let _guard = gateway.locks.lock(&claims.sub).await;

    let warning = match gateway.connections.remove(&claims.sub).await {
        Some(connection) => match connection.close().await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(
                    login = %claims.sub,
                    account_id = connection.account_id(),
                    error = %e,
                    "MT5 connection close failed"
                );
                Some(format!("Connection close failed: {e}"))
            }
        },
        None => Some("No active session".to_string()),
    };

    tracing::info!(login = %claims.sub, "MT5 logout");
    Json(LogoutResponse {
        success: true,
        message: "Logged out".into(),
        warning,
    })
}

pub async fn account(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<AccountView>, AppError> {
    let connection = state.mt5.connection_for(&claims.sub).await?;
    let info = connection
        .account_information()
        .await
        .map_err(|e| AppError::upstream("fetch account", e))?;
    Ok(Json(info.into()))
}

pub async fn market(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(symbol): Path<String>,
) -> Result<Json<Quote>, AppError> {
    let connection = state.mt5.connection_for(&claims.sub).await?;
    let (price, spec) = try_join(
        connection.symbol_price(&symbol),
        connection.symbol_specification(&symbol),
    )
    .await
    .map_err(|e| AppError::upstream("fetch market data", e))?;
    Ok(Json(Quote::new(price, spec)))
}

pub async fn positions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<PositionView>>, AppError> {
    let connection = state.mt5.connection_for(&claims.sub).await?;
    let positions = connection
        .positions()
        .await
        .map_err(|e| AppError::upstream("fetch positions", e))?;
    Ok(Json(positions.into_iter().map(PositionView::from).collect()))
}

pub async fn history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<DealView>>, AppError> {
    let (from, to) = history_window(&query, Utc::now())?;
    let connection = state.mt5.connection_for(&claims.sub).await?;
    let deals = connection
        .history_deals(from, to)
        .await
        .map_err(|e| AppError::upstream("fetch trade history", e))?;
    Ok(Json(deals.into_iter().map(DealView::from).collect()))
}

pub async fn trade(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(request), _): WithRejection<Json<TradeRequest>, AppError>,
) -> Result<Json<TradeResponse>, AppError> {
    let order = request.validate()?;
    let connection = state.mt5.connection_for(&claims.sub).await?;

    let outcome: TradeOutcome = match &order {
        Mt5Order::Market(order) => connection.market_order(order).await,
        Mt5Order::Pending(order) => connection.pending_order(order).await,
    }
    .map_err(|e| AppError::upstream("place trade", e))?;

    tracing::info!(
        login = %claims.sub,
        order = ?order,
        ticket = ?outcome.order_id,
        "MT5 trade placed"
    );
    Ok(Json(outcome.into()))
}

pub async fn modify_position(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ticket): Path<String>,
    WithRejection(Json(request), _): WithRejection<Json<ModifyRequest>, AppError>,
) -> Result<Json<PositionActionResponse>, AppError> {
    request.validate()?;
    let connection = state.mt5.connection_for(&claims.sub).await?;
    let outcome = connection
        .modify_position(&ticket, request.stop_loss, request.take_profit)
        .await
        .map_err(ticket_or("modify position", &ticket))?;

    tracing::info!(login = %claims.sub, ticket = %ticket, "MT5 position modified");
    Ok(Json(PositionActionResponse {
        success: true,
        ticket,
        code: outcome.code,
        message: outcome.message,
    }))
}

pub async fn close_position(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ticket): Path<String>,
) -> Result<Json<PositionActionResponse>, AppError> {
    let connection = state.mt5.connection_for(&claims.sub).await?;
    let outcome = connection
        .close_position(&ticket)
        .await
        .map_err(ticket_or("close position", &ticket))?;

    tracing::info!(login = %claims.sub, ticket = %ticket, "MT5 position closed");
    Ok(Json(PositionActionResponse {
        success: true,
        ticket,
        code: outcome.code,
        message: outcome.message,
    }))
}
