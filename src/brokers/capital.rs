//! Capital.com REST API client.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::string_or_number;
use crate::cache::CachedSession;
use crate::error::VendorError;

const API_KEY_HEADER: &str = "X-CAP-API-KEY";
const CST_HEADER: &str = "CST";
const SECURITY_TOKEN_HEADER: &str = "X-SECURITY-TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }

    pub fn as_lower(&self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }
}

/// Tokens and account data returned by `POST /session`.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub cst: String,
    pub security_token: String,
    pub client_id: String,
    pub account_id: String,
    pub timezone_offset: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionBody {
    #[serde(default, deserialize_with = "string_or_number")]
    client_id: String,
    current_account_id: String,
    #[serde(default)]
    timezone_offset: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorAccount {
    pub account_id: String,
    pub account_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub account_type: String,
    #[serde(default)]
    pub preferred: bool,
    pub balance: VendorBalance,
    pub currency: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorBalance {
    pub balance: f64,
    #[serde(default)]
    pub deposit: f64,
    #[serde(default)]
    pub profit_loss: f64,
    #[serde(default)]
    pub available: f64,
}

#[derive(Debug, Deserialize)]
struct AccountsBody {
    #[serde(default)]
    accounts: Vec<VendorAccount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDetails {
    pub instrument: Instrument,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub epic: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub bid: f64,
    pub offer: f64,
    #[serde(default)]
    pub update_time: Option<String>,
    #[serde(default)]
    pub market_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PositionsBody {
    #[serde(default)]
    positions: Vec<VendorPosition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VendorPosition {
    pub position: PositionDetails,
    pub market: PositionMarket,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDetails {
    pub deal_id: String,
    #[serde(default)]
    pub deal_reference: Option<String>,
    pub direction: Direction,
    pub size: f64,
    pub level: f64,
    #[serde(default, rename = "createdDateUTC")]
    pub created_date_utc: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub stop_level: Option<f64>,
    #[serde(default, alias = "profitLevel")]
    pub limit_level: Option<f64>,
    #[serde(default)]
    pub upl: f64,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionMarket {
    pub epic: String,
    #[serde(default)]
    pub instrument_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryBody {
    #[serde(default)]
    activities: Vec<VendorActivity>,
}

/// One record of `GET /history/activity?detailed=true`. Each deal event
/// (open, close, amend) is its own record; trade data sits in `details`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorActivity {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, rename = "dateUTC")]
    pub date_utc: Option<String>,
    pub epic: String,
    pub deal_id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub details: Option<ActivityDetails>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDetails {
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub size: Option<f64>,
    #[serde(default)]
    pub level: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub actions: Vec<ActivityAction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityAction {
    pub action_type: String,
    #[serde(default)]
    pub affected_deal_id: Option<String>,
}

/// A trade assembled from activity records, keyed by the position's deal id.
/// Open trades carry no close date. The activity feed has no realised P&L,
/// so `profit_and_loss` is only set by callers that know it.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorTrade {
    pub deal_id: String,
    pub epic: String,
    pub direction: Direction,
    pub size: f64,
    pub open_date: Option<String>,
    pub open_level: Option<f64>,
    pub close_date: Option<String>,
    pub close_level: Option<f64>,
    pub profit_and_loss: Option<f64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum DealEvent {
    Opened,
    Closed,
}

fn deal_event(action: &ActivityAction) -> Option<DealEvent> {
    match action.action_type.as_str() {
        "POSITION_OPENED" => Some(DealEvent::Opened),
        "POSITION_CLOSED" | "POSITION_PARTIALLY_CLOSED" => Some(DealEvent::Closed),
        _ => None,
    }
}

/// Folds accepted position activities into one trade per position, in the
/// order positions first appear. A close whose open lies outside the window
/// still yields a trade; its direction is the reverse of the closing deal.
pub fn trades_from_activities(activities: &[VendorActivity]) -> Vec<VendorTrade> {
    let mut trades: Vec<VendorTrade> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for activity in activities {
        if !activity.kind.eq_ignore_ascii_case("POSITION")
            || !activity.status.eq_ignore_ascii_case("ACCEPTED")
        {
            continue;
        }
        let Some(details) = &activity.details else {
            continue;
        };
        let Some(direction) = details.direction else {
            continue;
        };
        let date = activity.date_utc.clone().or_else(|| activity.date.clone());

        for action in &details.actions {
            let Some(event) = deal_event(action) else {
                continue;
            };
            let position_id = action
                .affected_deal_id
                .clone()
                .unwrap_or_else(|| activity.deal_id.clone());
            let slot = *index.entry(position_id.clone()).or_insert_with(|| {
                trades.push(VendorTrade {
                    deal_id: position_id,
                    epic: activity.epic.clone(),
                    direction: match event {
                        DealEvent::Opened => direction,
                        DealEvent::Closed => direction.opposite(),
                    },
                    size: details.size.unwrap_or_default(),
                    open_date: None,
                    open_level: None,
                    close_date: None,
                    close_level: None,
                    profit_and_loss: None,
                    currency: details.currency.clone(),
                });
                trades.len() - 1
            });

            let trade = &mut trades[slot];
            match event {
                DealEvent::Opened => {
                    trade.direction = direction;
                    if let Some(size) = details.size {
                        trade.size = size;
                    }
                    trade.open_date = date.clone();
                    trade.open_level = details.level;
                }
                DealEvent::Closed => {
                    trade.close_date = date.clone();
                    trade.close_level = details.level;
                }
            }
        }
    }
    trades
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionOrder {
    pub epic: String,
    pub direction: Direction,
    pub size: f64,
    pub guaranteed_stop: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_level: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkingOrderType {
    Limit,
    Stop,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingOrder {
    pub epic: String,
    pub direction: Direction,
    pub size: f64,
    pub level: f64,
    #[serde(rename = "type")]
    pub order_type: WorkingOrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_level: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_level: Option<f64>,
}

/// Market order that flattens an open position: opposite direction, same
/// size, same deal id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetOrder {
    pub deal_id: String,
    pub epic: String,
    pub direction: Direction,
    pub size: f64,
    pub order_type: &'static str,
}

impl OffsetOrder {
    pub fn for_position(position: &VendorPosition) -> Self {
        Self {
            deal_id: position.position.deal_id.clone(),
            epic: position.market.epic.clone(),
            direction: position.position.direction.opposite(),
            size: position.position.size,
            order_type: "MARKET",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DealReferenceBody {
    deal_reference: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    #[serde(default)]
    pub deal_id: Option<String>,
    #[serde(default)]
    pub deal_reference: Option<String>,
    pub deal_status: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub level: Option<f64>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub affected_deals: Vec<AffectedDeal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedDeal {
    pub deal_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl Confirmation {
    pub fn is_accepted(&self) -> bool {
        self.deal_status.eq_ignore_ascii_case("ACCEPTED")
    }

    /// Id of the position the deal opened. The confirmation's own `dealId`
    /// refers to the order; the position is the first affected deal.
    pub fn position_deal_id(&self) -> Option<&str> {
        self.affected_deals
            .first()
            .map(|d| d.deal_id.as_str())
            .or(self.deal_id.as_deref())
    }
}

/// Capital.com operations used by the gateway.
#[async_trait]
pub trait CapitalApi: Send + Sync {
    async fn create_session(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<SessionTokens, VendorError>;

    async fn delete_session(&self, session: &CachedSession) -> Result<(), VendorError>;

    async fn accounts(&self, session: &CachedSession) -> Result<Vec<VendorAccount>, VendorError>;

    async fn market(&self, session: &CachedSession, epic: &str)
    -> Result<MarketDetails, VendorError>;

    async fn positions(&self, session: &CachedSession) -> Result<Vec<VendorPosition>, VendorError>;

    async fn position(
        &self,
        session: &CachedSession,
        deal_id: &str,
    ) -> Result<VendorPosition, VendorError>;

    async fn history(
        &self,
        session: &CachedSession,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<VendorTrade>, VendorError>;

    /// Returns the deal reference.
    async fn open_position(
        &self,
        session: &CachedSession,
        order: &PositionOrder,
    ) -> Result<String, VendorError>;

    /// Returns the deal reference.
    async fn create_working_order(
        &self,
        session: &CachedSession,
        order: &WorkingOrder,
    ) -> Result<String, VendorError>;

    async fn confirm(
        &self,
        session: &CachedSession,
        deal_reference: &str,
    ) -> Result<Confirmation, VendorError>;

    /// Returns the deal reference.
    async fn update_position(
        &self,
        session: &CachedSession,
        deal_id: &str,
        update: &PositionUpdate,
    ) -> Result<String, VendorError>;

    /// Returns the deal reference.
    async fn submit_offset(
        &self,
        session: &CachedSession,
        order: &OffsetOrder,
    ) -> Result<String, VendorError>;
}

/// `base/<segments...>`, each segment escaped so caller-supplied ids stay
/// inside their path segment.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, VendorError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| VendorError::Decode(format!("{base} cannot be a base url")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub struct CapitalClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl CapitalClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, VendorError> {
        let http = Client::builder().timeout(timeout).build()?;
        let base_url = Url::parse(base_url)
            .map_err(|e| VendorError::Decode(format!("invalid Capital.com url {base_url}: {e}")))?;
        Ok(Self {
            http,
            base_url,
            api_key: api_key.to_string(),
        })
    }

    fn authed(
        &self,
        method: Method,
        segments: &[&str],
        session: &CachedSession,
    ) -> Result<RequestBuilder, VendorError> {
        Ok(self
            .http
            .request(method, endpoint(&self.base_url, segments)?)
            .header(API_KEY_HEADER, &self.api_key)
            .header(CST_HEADER, &session.cst)
            .header(SECURITY_TOKEN_HEADER, &session.security_token))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, VendorError> {
        let response = check(request.send().await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| VendorError::Decode(e.to_string()))
    }

    async fn deal_reference(&self, request: RequestBuilder) -> Result<String, VendorError> {
        let body: DealReferenceBody = self.send(request).await?;
        Ok(body.deal_reference)
    }
}

/// Turns a non-2xx response into `VendorError::Status`, keeping the
/// vendor's `errorCode`.
async fn check(response: Response) -> Result<Response, VendorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let code = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("errorCode").and_then(|c| c.as_str()).map(String::from));

    Err(VendorError::Status {
        status: status.as_u16(),
        code,
        message: text,
    })
}

fn header(response: &Response, name: &'static str) -> Result<String, VendorError> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .ok_or(VendorError::MissingHeader(name))
}

fn vendor_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
        .trim_end_matches('Z')
        .to_string()
}

#[async_trait]
impl CapitalApi for CapitalClient {
    async fn create_session(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<SessionTokens, VendorError> {
        tracing::debug!("Creating Capital.com session for {}", identifier);

        let response = self
            .http
            .post(endpoint(&self.base_url, &["session"])?)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&json!({
                "identifier": identifier,
                "password": password,
                "encryptedPassword": false,
            }))
            .send()
            .await?;
        let response = check(response).await?;

        let cst = header(&response, CST_HEADER)?;
        let security_token = header(&response, SECURITY_TOKEN_HEADER)?;
        let body: SessionBody = response
            .json()
            .await
            .map_err(|e| VendorError::Decode(e.to_string()))?;

        Ok(SessionTokens {
            cst,
            security_token,
            client_id: body.client_id,
            account_id: body.current_account_id,
            timezone_offset: body.timezone_offset,
        })
    }

    async fn delete_session(&self, session: &CachedSession) -> Result<(), VendorError> {
        let response = self
            .authed(Method::DELETE, &["session"], session)?
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn accounts(&self, session: &CachedSession) -> Result<Vec<VendorAccount>, VendorError> {
        let body: AccountsBody = self
            .send(self.authed(Method::GET, &["accounts"], session)?)
            .await?;
        Ok(body.accounts)
    }

    async fn market(
        &self,
        session: &CachedSession,
        epic: &str,
    ) -> Result<MarketDetails, VendorError> {
        self.send(self.authed(Method::GET, &["markets", epic], session)?)
            .await
    }

    async fn positions(&self, session: &CachedSession) -> Result<Vec<VendorPosition>, VendorError> {
        let body: PositionsBody = self
            .send(self.authed(Method::GET, &["positions"], session)?)
            .await?;
        Ok(body.positions)
    }

    async fn position(
        &self,
        session: &CachedSession,
        deal_id: &str,
    ) -> Result<VendorPosition, VendorError> {
        self.send(self.authed(Method::GET, &["positions", deal_id], session)?)
            .await
    }

    async fn history(
        &self,
        session: &CachedSession,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<VendorTrade>, VendorError> {
        let request = self
            .authed(Method::GET, &["history", "activity"], session)?
            .query(&[
                ("from", vendor_time(from)),
                ("to", vendor_time(to)),
                ("detailed", "true".to_string()),
            ]);
        let body: HistoryBody = self.send(request).await?;
        Ok(trades_from_activities(&body.activities))
    }

    async fn open_position(
        &self,
        session: &CachedSession,
        order: &PositionOrder,
    ) -> Result<String, VendorError> {
        self.deal_reference(self.authed(Method::POST, &["positions"], session)?.json(order))
            .await
    }

    async fn create_working_order(
        &self,
        session: &CachedSession,
        order: &WorkingOrder,
    ) -> Result<String, VendorError> {
        self.deal_reference(
            self.authed(Method::POST, &["workingorders"], session)?
                .json(order),
        )
        .await
    }

    async fn confirm(
        &self,
        session: &CachedSession,
        deal_reference: &str,
    ) -> Result<Confirmation, VendorError> {
        self.send(self.authed(Method::GET, &["confirms", deal_reference], session)?)
            .await
    }

    async fn update_position(
        &self,
        session: &CachedSession,
        deal_id: &str,
        update: &PositionUpdate,
    ) -> Result<String, VendorError> {
        self.deal_reference(
            self.authed(Method::PUT, &["positions", deal_id], session)?
                .json(update),
        )
        .await
    }

    async fn submit_offset(
        &self,
        session: &CachedSession,
        order: &OffsetOrder,
    ) -> Result<String, VendorError> {
        self.deal_reference(self.authed(Method::POST, &["positions"], session)?.json(order))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(direction: Direction, size: f64) -> VendorPosition {
        VendorPosition {
            position: PositionDetails {
                deal_id: "deal-1".into(),
                deal_reference: None,
                direction,
                size,
                level: 1.1,
                created_date_utc: None,
                created_date: None,
                stop_level: None,
                limit_level: None,
                upl: 0.0,
                currency: None,
            },
            market: PositionMarket {
                epic: "EURUSD".into(),
                instrument_name: None,
            },
        }
    }

    #[test]
    fn offset_order_reverses_direction_and_keeps_size() {
        let sell = OffsetOrder::for_position(&position(Direction::Buy, 0.7));
        assert_eq!(sell.direction, Direction::Sell);
        assert_eq!(sell.size, 0.7);
        assert_eq!(sell.deal_id, "deal-1");

        let buy = OffsetOrder::for_position(&position(Direction::Sell, 2.0));
        assert_eq!(buy.direction, Direction::Buy);
        assert_eq!(buy.size, 2.0);
    }

    #[test]
    fn positions_payload_decodes() {
        let payload = r#"{
            "positions": [{
                "position": {
                    "contractSize": 1, "createdDate": "2024-03-01T10:00:00.000",
                    "createdDateUTC": "2024-03-01T09:00:00.000", "dealId": "006011e7-0001",
                    "dealReference": "p_006011e7", "size": 0.1, "leverage": 30,
                    "upl": -1.25, "direction": "BUY", "level": 1.0852,
                    "currency": "USD", "guaranteedStop": false, "stopLevel": 1.08
                },
                "market": { "instrumentName": "EUR/USD", "epic": "EURUSD", "bid": 1.085, "offer": 1.0851 }
            }]
        }"#;
        let body: PositionsBody = serde_json::from_str(payload).unwrap();
        let p = &body.positions[0];
        assert_eq!(p.position.direction, Direction::Buy);
        assert_eq!(p.position.stop_level, Some(1.08));
        assert_eq!(p.position.limit_level, None);
        assert_eq!(p.market.epic, "EURUSD");
    }

    #[test]
    fn session_body_accepts_numeric_client_id() {
        let body: SessionBody = serde_json::from_str(
            r#"{"clientId": 12345678, "currentAccountId": "ACC-1", "timezoneOffset": 2}"#,
        )
        .unwrap();
        assert_eq!(body.client_id, "12345678");
        assert_eq!(body.timezone_offset, 2.0);
    }

    #[test]
    fn confirmation_prefers_affected_deal() {
        let confirmation: Confirmation = serde_json::from_str(
            r#"{"dealStatus": "ACCEPTED", "dealId": "order-1",
                "affectedDeals": [{"dealId": "position-1", "status": "OPENED"}]}"#,
        )
        .unwrap();
        assert!(confirmation.is_accepted());
        assert_eq!(confirmation.position_deal_id(), Some("position-1"));
    }

    #[test]
    fn caller_ids_stay_inside_their_path_segment() {
        let base = Url::parse("https://demo-api-capital.backend-capital.com/api/v1").unwrap();
        let cases = [
            ("../session", "https://demo-api-capital.backend-capital.com/api/v1/positions/..%2Fsession"),
            ("abc?dealId=zzz", "https://demo-api-capital.backend-capital.com/api/v1/positions/abc%3FdealId=zzz"),
            ("x#frag", "https://demo-api-capital.backend-capital.com/api/v1/positions/x%23frag"),
        ];
        for (deal_id, expected) in cases {
            let url = endpoint(&base, &["positions", deal_id]).unwrap();
            assert_eq!(url.as_str(), expected, "{deal_id}");
        }

        let trailing = Url::parse("https://demo-api-capital.backend-capital.com/api/v1/").unwrap();
        assert_eq!(
            endpoint(&trailing, &["session"]).unwrap().as_str(),
            "https://demo-api-capital.backend-capital.com/api/v1/session"
        );
    }

    #[test]
    fn activity_payload_folds_into_trades() {
        let payload = r#"{
            "activities": [
                {
                    "date": "2024-03-02T11:00:00.000", "dateUTC": "2024-03-02T10:00:00.000",
                    "epic": "EURUSD", "dealId": "close-deal-1", "source": "USER",
                    "type": "POSITION", "status": "ACCEPTED",
                    "details": {
                        "dealReference": "p_close", "marketName": "EUR/USD", "currency": "USD",
                        "size": 0.1, "direction": "SELL", "level": 1.0901,
                        "guaranteedStop": false,
                        "actions": [{"actionType": "POSITION_CLOSED", "affectedDealId": "pos-1"}]
                    }
                },
                {
                    "date": "2024-03-01T10:00:00.000", "dateUTC": "2024-03-01T09:00:00.000",
                    "epic": "EURUSD", "dealId": "pos-1", "source": "USER",
                    "type": "POSITION", "status": "ACCEPTED",
                    "details": {
                        "dealReference": "p_open", "marketName": "EUR/USD", "currency": "USD",
                        "size": 0.1, "direction": "BUY", "level": 1.0852,
                        "guaranteedStop": false,
                        "actions": [{"actionType": "POSITION_OPENED", "affectedDealId": "pos-1"}]
                    }
                },
                {
                    "date": "2024-03-03T08:00:00.000", "dateUTC": "2024-03-03T07:00:00.000",
                    "epic": "GOLD", "dealId": "pos-2", "source": "USER",
                    "type": "POSITION", "status": "ACCEPTED",
                    "details": {
                        "currency": "USD", "size": 2, "direction": "SELL", "level": 2050.5,
                        "actions": [{"actionType": "POSITION_OPENED", "affectedDealId": "pos-2"}]
                    }
                },
                {
                    "date": "2024-03-03T09:00:00.000", "dateUTC": "2024-03-03T08:00:00.000",
                    "epic": "GOLD", "dealId": "wo-1", "source": "USER",
                    "type": "WORKING_ORDER", "status": "ACCEPTED",
                    "details": {"direction": "BUY", "size": 1, "level": 2000, "actions": []}
                }
            ]
        }"#;
        let body: HistoryBody = serde_json::from_str(payload).unwrap();
        let trades = trades_from_activities(&body.activities);
        assert_eq!(trades.len(), 2);

        let closed = &trades[0];
        assert_eq!(closed.deal_id, "pos-1");
        assert_eq!(closed.direction, Direction::Buy);
        assert_eq!(closed.size, 0.1);
        assert_eq!(closed.open_level, Some(1.0852));
        assert_eq!(closed.open_date.as_deref(), Some("2024-03-01T09:00:00.000"));
        assert_eq!(closed.close_level, Some(1.0901));
        assert_eq!(closed.close_date.as_deref(), Some("2024-03-02T10:00:00.000"));

        let open = &trades[1];
        assert_eq!(open.deal_id, "pos-2");
        assert_eq!(open.direction, Direction::Sell);
        assert!(open.close_date.is_none());
    }

    #[test]
    fn close_without_open_in_window_reverses_direction() {
        let activities: Vec<VendorActivity> = serde_json::from_str(
            r#"[{"dateUTC": "2024-03-02T10:00:00", "epic": "US500", "dealId": "c-9",
                 "type": "POSITION", "status": "ACCEPTED",
                 "details": {"size": 3, "direction": "BUY", "level": 5100,
                   "actions": [{"actionType": "POSITION_CLOSED", "affectedDealId": "p-9"}]}}]"#,
        )
        .unwrap();
        let trades = trades_from_activities(&activities);
        assert_eq!(trades[0].deal_id, "p-9");
        assert_eq!(trades[0].direction, Direction::Sell);
        assert!(trades[0].open_date.is_none());
        assert_eq!(trades[0].close_level, Some(5100.0));
    }

    #[test]
    fn vendor_time_has_no_zone_suffix() {
        let t = DateTime::parse_from_rfc3339("2024-05-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(vendor_time(t), "2024-05-01T12:30:00");
    }
}
