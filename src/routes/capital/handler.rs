use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    AppState,
    brokers::capital::{OffsetOrder, PositionOrder, PositionUpdate, WorkingOrder},
    cache::CachedSession,
    common::{HistoryQuery, history_window, parse_vendor_time, present},
    error::{AppError, VendorError},
    operations::{OperationJournal, OperationKind, OperationRecord, OperationState},
    routes::capital::model::{
        AccountSnapshot, LoginRequest, LoginResponse, LogoutResponse, ModifyRequest, OrderKind,
        PositionActionResponse, PositionView, Quote, TradeRequest, TradeResponse, TradeView,
    },
    utils::{Claims, Platform, generate_token},
};

/// Records the failure on the journal and wraps it with the operation id.
async fn fail_operation(
    journal: &OperationJournal,
    op: Uuid,
    stage: &str,
    context: &str,
    err: VendorError,
) -> AppError {
    journal.fail(op, stage, err.to_string()).await;
    AppError::upstream(context, err).with_detail("operationId", op)
}

fn not_found_or(context: &str, deal_id: &str, err: VendorError) -> AppError {
    if err.is_not_found() {
        tracing::info!(deal_id, "Position not found upstream");
        AppError::NotFound(format!("Position {deal_id} not found"))
    } else {
        AppError::upstream(context, err)
    }
}

pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(request), _): WithRejection<Json<LoginRequest>, AppError>,
) -> Result<Json<LoginResponse>, AppError> {
    let (username, password) = request.validate()?;
    let gateway = &state.capital;
    let _guard = gateway.locks.lock(&username).await;

    let tokens = gateway
        .api
        .create_session(&username, &password)
        .await
        .map_err(|e| {
            if e.is_auth_rejection() {
                tracing::info!(username = %username, "Capital.com rejected credentials");
                AppError::Authentication("Invalid Capital.com credentials".into())
            } else {
                AppError::upstream("log in to Capital.com", e)
            }
        })?;

    let session = CachedSession {
        username: username.clone(),
        cst: tokens.cst,
        security_token: tokens.security_token,
        client_id: tokens.client_id,
        account_id: tokens.account_id,
        timezone_offset: tokens.timezone_offset,
        created_at: Utc::now().timestamp(),
        expires_at: 0,
    };
    gateway.sessions.put(&session, gateway.session_ttl).await?;

    let (token, expires_at) =
        generate_token(&username, Platform::Capital, &state.config).map_err(|e| {
            tracing::error!("Failed to sign token: {}", e);
            AppError::internal("Failed to issue token")
        })?;

    tracing::info!(username = %username, account_id = %session.account_id, "Capital.com login");
    Ok(Json(LoginResponse {
        success: true,
        token,
        expires_at,
        account_id: session.account_id,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<LogoutResponse>, AppError> {
    let gateway = &state.capital;
    let _guard = gateway.locks.lock(&claims.sub).await;

    let mut warning = None;
    match gateway.sessions.get(&claims.sub).await? {
        Some(session) => {
            if let Err(e) = gateway.api.delete_session(&session).await {
                tracing::warn!(username = %claims.sub, error = %e, "Capital.com session teardown failed");
                warning = Some(format!("Upstream session teardown failed: {e}"));
            }
        }
        None => warning = Some("No active session".to_string()),
    }
    gateway.sessions.remove(&claims.sub).await?;

    tracing::info!(username = %claims.sub, "Capital.com logout");
    Ok(Json(LogoutResponse {
        success: true,
        message: "Logged out".into(),
        warning,
    }))
}

pub async fn account(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<AccountSnapshot>, AppError> {
    let gateway = &state.capital;
    let session = gateway.session_for(&claims.sub).await?;

    let accounts = gateway
        .api
        .accounts(&session)
        .await
        .map_err(|e| AppError::upstream("fetch account", e))?;

    accounts
        .iter()
        .find(|a| a.account_id == session.account_id)
        .map(|a| Json(AccountSnapshot::from(a)))
        .ok_or_else(|| AppError::NotFound(format!("Account {} not found", session.account_id)))
}

pub async fn market(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(symbol): Path<String>,
) -> Result<Json<Quote>, AppError> {
    let symbol = present(Some(symbol.as_str())).ok_or_else(|| AppError::missing_fields(&["symbol"]))?;
    let gateway = &state.capital;
    let session = gateway.session_for(&claims.sub).await?;

    let market = gateway
        .api
        .market(&session, symbol)
        .await
        .map_err(|e| AppError::upstream("fetch market data", e))?;
    Ok(Json(Quote::from(&market)))
}

pub async fn positions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<PositionView>>, AppError> {
    let gateway = &state.capital;
    let session = gateway.session_for(&claims.sub).await?;

    let positions = gateway
        .api
        .positions(&session)
        .await
        .map_err(|e| AppError::upstream("fetch positions", e))?;
    Ok(Json(positions.iter().map(PositionView::from).collect()))
}

pub async fn history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<TradeView>>, AppError> {
    let (from, to) = history_window(&query, Utc::now())?;
    let gateway = &state.capital;
    let session = gateway.session_for(&claims.sub).await?;

    let trades = gateway
        .api
        .history(&session, from, to)
        .await
        .map_err(|e| AppError::upstream("fetch trade history", e))?;
    Ok(Json(trades.iter().map(TradeView::from).collect()))
}

pub async fn trade(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(request), _): WithRejection<Json<TradeRequest>, AppError>,
) -> Result<Json<TradeResponse>, AppError> {
    let trade = request.validate()?;
    let gateway = &state.capital;
    let session = gateway.session_for(&claims.sub).await?;
    let journal = &gateway.journal;
    let op = journal.begin(&claims.sub, OperationKind::PlaceTrade).await;

    let placed = match trade.kind {
        OrderKind::Market(direction) => {
            let order = PositionOrder {
                epic: trade.symbol.clone(),
                direction,
                size: trade.volume,
                guaranteed_stop: false,
                stop_level: trade.stop_loss,
                profit_level: trade.take_profit,
            };
            gateway.api.open_position(&session, &order).await
        }
        OrderKind::Working {
            direction,
            order_type,
            level,
        } => {
            let order = WorkingOrder {
                epic: trade.symbol.clone(),
                direction,
                size: trade.volume,
                level,
                order_type,
                stop_level: trade.stop_loss,
                profit_level: trade.take_profit,
            };
            gateway.api.create_working_order(&session, &order).await
        }
    };
    let deal_reference = match placed {
        Ok(reference) => reference,
        Err(e) => return Err(fail_operation(journal, op, "place", "place trade", e).await),
    };
    journal
        .advance(
            op,
            OperationState::Placed {
                deal_reference: deal_reference.clone(),
            },
        )
        .await;

    let confirmation = match gateway.api.confirm(&session, &deal_reference).await {
        Ok(c) => c,
        Err(e) => return Err(fail_operation(journal, op, "confirm", "confirm trade", e).await),
    };
    let deal_id = match confirmation.position_deal_id() {
        Some(deal_id) if confirmation.is_accepted() => deal_id.to_string(),
        _ => {
            let rejected = VendorError::Rejected {
                code: confirmation.deal_status.clone(),
                message: confirmation
                    .reason
                    .clone()
                    .unwrap_or_else(|| "trade was not accepted".into()),
            };
            let err = fail_operation(journal, op, "confirm", "confirm trade", rejected).await;
            return Err(err.with_detail("dealReference", &deal_reference));
        }
    };
    journal
        .advance(
            op,
            OperationState::Confirmed {
                deal_id: deal_id.clone(),
            },
        )
        .await;

    tracing::info!(
        username = %claims.sub,
        symbol = %trade.symbol,
        volume = trade.volume,
        deal_id = %deal_id,
        "Capital.com trade placed"
    );
    Ok(Json(TradeResponse {
        success: true,
        deal_id,
        deal_reference,
        open_time: confirmation.date.as_deref().and_then(parse_vendor_time),
        open_price: confirmation.level,
        operation_id: op,
    }))
}

pub async fn modify_position(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(deal_id): Path<String>,
    WithRejection(Json(request), _): WithRejection<Json<ModifyRequest>, AppError>,
) -> Result<Json<PositionActionResponse>, AppError> {
    request.validate()?;
    let gateway = &state.capital;
    let session = gateway.session_for(&claims.sub).await?;

    let update = PositionUpdate {
        stop_level: request.stop_loss,
        profit_level: request.take_profit,
    };
    let deal_reference = gateway
        .api
        .update_position(&session, &deal_id, &update)
        .await
        .map_err(|e| not_found_or("modify position", &deal_id, e))?;

    tracing::info!(username = %claims.sub, deal_id = %deal_id, "Capital.com position modified");
    Ok(Json(PositionActionResponse {
        success: true,
        deal_id,
        deal_reference,
        operation_id: None,
    }))
}

/// Closes a position by reading it and submitting the offsetting order.
pub async fn close_position(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(deal_id): Path<String>,
) -> Result<Json<PositionActionResponse>, AppError> {
    let gateway = &state.capital;
    let session = gateway.session_for(&claims.sub).await?;
    let journal = &gateway.journal;
    let op = journal.begin(&claims.sub, OperationKind::ClosePosition).await;

    let position = match gateway.api.position(&session, &deal_id).await {
        Ok(p) => p,
        Err(e) if e.is_not_found() => {
            journal.fail(op, "read", e.to_string()).await;
            return Err(not_found_or("read position", &deal_id, e));
        }
        Err(e) => return Err(fail_operation(journal, op, "read", "read position", e).await),
    };
    journal
        .advance(
            op,
            OperationState::PositionRead {
                direction: position.position.direction.as_lower().to_string(),
                size: position.position.size,
            },
        )
        .await;

    let offset = OffsetOrder::for_position(&position);
    let deal_reference = match gateway.api.submit_offset(&session, &offset).await {
        Ok(reference) => reference,
        Err(e) => return Err(fail_operation(journal, op, "offset", "close position", e).await),
    };
    journal
        .advance(
            op,
            OperationState::OffsetSent {
                deal_reference: deal_reference.clone(),
            },
        )
        .await;

    match gateway.api.confirm(&session, &deal_reference).await {
        Ok(c) if c.is_accepted() => {}
        Ok(c) => {
            let rejected = VendorError::Rejected {
                code: c.deal_status,
                message: c.reason.unwrap_or_else(|| "close was not accepted".into()),
            };
            let err = fail_operation(journal, op, "confirm", "confirm close", rejected).await;
            return Err(err.with_detail("dealReference", &deal_reference));
        }
        Err(e) => return Err(fail_operation(journal, op, "confirm", "confirm close", e).await),
    }
    journal.advance(op, OperationState::Closed).await;

    tracing::info!(
        username = %claims.sub,
        deal_id = %deal_id,
        direction = offset.direction.as_lower(),
        size = offset.size,
        "Capital.com position closed"
    );
    Ok(Json(PositionActionResponse {
        success: true,
        deal_id,
        deal_reference,
        operation_id: Some(op),
    }))
}

pub async fn operations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Json<Vec<OperationRecord>> {
    Json(state.capital.journal.for_identity(&claims.sub).await)
}
