#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tower::ServiceExt;

use gateway::{
    AppState,
    brokers::{
        capital::{
            AffectedDeal, CapitalApi, Confirmation, Direction, Instrument, MarketDetails,
            OffsetOrder, PositionDetails, PositionMarket, PositionOrder, PositionUpdate,
            SessionTokens, Snapshot, VendorAccount, VendorBalance, VendorPosition, VendorTrade,
            WorkingOrder,
        },
        mt5::{
            AccountInformation, MarketOrder, Mt5Account, Mt5Connection, Mt5Deal, Mt5Position,
            Mt5Price, Mt5Provisioner, NewAccount, PendingOrder, SymbolSpecification, TradeOutcome,
        },
    },
    build_router,
    cache::{CachedSession, MemorySessionStore},
    config::Config,
    error::VendorError,
    routes::{capital::CapitalGateway, mt5::Mt5Gateway},
};

pub const ACCOUNT_ID: &str = "ACC-1";

/// The only MT5 password the fake broker lets log in.
pub const MT5_PASSWORD: &str = "secret";

pub fn test_config() -> Config {
    Config {
        server_host: "127.0.0.1".into(),
        server_port: 0,
        api_base_uri: "/api".into(),
        jwt_secret: "integration-secret".into(),
        jwt_expiration_secs: 3600,
        redis_url: None,
        capital_api_key: "key".into(),
        capital_base_url: "http://capital.invalid".into(),
        capital_session_ttl_secs: 600,
        metaapi_token: "token".into(),
        metaapi_provisioning_url: "http://provisioning.invalid".into(),
        metaapi_client_url: "http://client.invalid".into(),
        mt5_magic: 7,
        mt5_deploy_timeout_secs: 1,
        upstream_timeout_secs: 5,
    }
}

pub fn status_error(status: u16) -> VendorError {
    VendorError::Status {
        status,
        code: None,
        message: String::new(),
    }
}

/// In-process Capital.com double. Every trait call bumps `calls`.
#[derive(Default)]
pub struct FakeCapital {
    pub calls: AtomicUsize,
    pub fail_teardown: AtomicBool,
    /// `confirm` answers `REJECTED`.
    pub reject_confirms: AtomicBool,
    /// `confirm` errors out.
    pub fail_confirms: AtomicBool,
    pub fail_offsets: AtomicBool,
    pub positions: Mutex<Vec<VendorPosition>>,
    pub offsets: Mutex<Vec<OffsetOrder>>,
    pub working_orders: Mutex<Vec<WorkingOrder>>,
    pub history_windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    references: Mutex<HashMap<String, String>>,
    counter: AtomicUsize,
}

impl FakeCapital {
    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> usize {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl CapitalApi for FakeCapital {
    async fn create_session(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<SessionTokens, VendorError> {
        self.hit();
        if password == "wrong" {
            return Err(status_error(401));
        }
        Ok(SessionTokens {
            cst: format!("cst-{identifier}"),
            security_token: format!("xst-{identifier}"),
            client_id: "12345".into(),
            account_id: ACCOUNT_ID.into(),
            timezone_offset: 0.0,
        })
    }

    async fn delete_session(&self, _session: &CachedSession) -> Result<(), VendorError> {
        self.hit();
        if self.fail_teardown.load(Ordering::SeqCst) {
            return Err(status_error(503));
        }
        Ok(())
    }

    async fn accounts(&self, _session: &CachedSession) -> Result<Vec<VendorAccount>, VendorError> {
        self.hit();
        Ok(vec![VendorAccount {
            account_id: ACCOUNT_ID.into(),
            account_name: "Demo".into(),
            status: "ENABLED".into(),
            account_type: "CFD".into(),
            preferred: true,
            balance: VendorBalance {
                balance: 1000.0,
                deposit: 1000.0,
                profit_loss: 12.5,
                available: 987.5,
            },
            currency: "USD".into(),
        }])
    }

    async fn market(
        &self,
        _session: &CachedSession,
        epic: &str,
    ) -> Result<MarketDetails, VendorError> {
        self.hit();
        Ok(MarketDetails {
            instrument: Instrument {
                epic: epic.to_string(),
                name: Some("EUR/USD".into()),
                currency: Some("USD".into()),
            },
            snapshot: Snapshot {
                bid: 1.08512,
                offer: 1.08527,
                update_time: Some("2024-04-06T12:34:56.789".into()),
                market_status: Some("TRADEABLE".into()),
            },
        })
    }

    async fn positions(&self, _session: &CachedSession) -> Result<Vec<VendorPosition>, VendorError> {
        self.hit();
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn position(
        &self,
        _session: &CachedSession,
        deal_id: &str,
    ) -> Result<VendorPosition, VendorError> {
        self.hit();
        self.positions
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.position.deal_id == deal_id)
            .cloned()
            .ok_or_else(|| status_error(404))
    }

    async fn history(
        &self,
        _session: &CachedSession,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<VendorTrade>, VendorError> {
        self.hit();
        self.history_windows.lock().unwrap().push((from, to));
        Ok(Vec::new())
    }

    async fn open_position(
        &self,
        _session: &CachedSession,
        order: &PositionOrder,
    ) -> Result<String, VendorError> {
        self.hit();
        let n = self.next_id();
        let deal_id = format!("deal-{n}");
        let reference = format!("o_{n}");
        self.positions.lock().unwrap().push(VendorPosition {
            position: PositionDetails {
                deal_id: deal_id.clone(),
                deal_reference: Some(reference.clone()),
                direction: order.direction,
                size: order.size,
                level: 1.08527,
                created_date_utc: Some("2024-04-06T12:35:00.000".into()),
                created_date: None,
                stop_level: order.stop_level,
                limit_level: order.profit_level,
                upl: 0.0,
                currency: Some("USD".into()),
            },
            market: PositionMarket {
                epic: order.epic.clone(),
                instrument_name: None,
            },
        });
        self.references
            .lock()
            .unwrap()
            .insert(reference.clone(), deal_id);
        Ok(reference)
    }

    async fn create_working_order(
        &self,
        _session: &CachedSession,
        order: &WorkingOrder,
    ) -> Result<String, VendorError> {
        self.hit();
        self.working_orders.lock().unwrap().push(order.clone());
        let n = self.next_id();
        let reference = format!("o_{n}");
        self.references
            .lock()
            .unwrap()
            .insert(reference.clone(), format!("order-{n}"));
        Ok(reference)
    }

    async fn confirm(
        &self,
        _session: &CachedSession,
        deal_reference: &str,
    ) -> Result<Confirmation, VendorError> {
        self.hit();
        if self.fail_confirms.load(Ordering::SeqCst) {
            return Err(status_error(502));
        }
        if self.reject_confirms.load(Ordering::SeqCst) {
            return Ok(Confirmation {
                deal_id: None,
                deal_reference: Some(deal_reference.to_string()),
                deal_status: "REJECTED".into(),
                status: None,
                reason: Some("INSUFFICIENT_FUNDS".into()),
                level: None,
                date: None,
                affected_deals: Vec::new(),
            });
        }
        let deal_id = self
            .references
            .lock()
            .unwrap()
            .get(deal_reference)
            .cloned()
            .ok_or_else(|| status_error(404))?;
        Ok(Confirmation {
            deal_id: Some(format!("order-for-{deal_id}")),
            deal_reference: Some(deal_reference.to_string()),
            deal_status: "ACCEPTED".into(),
            status: Some("OPEN".into()),
            reason: None,
            level: Some(1.08527),
            date: Some("2024-04-06T12:35:00.000".into()),
            affected_deals: vec![AffectedDeal {
                deal_id,
                status: Some("OPENED".into()),
            }],
        })
    }

    async fn update_position(
        &self,
        _session: &CachedSession,
        deal_id: &str,
        _update: &PositionUpdate,
    ) -> Result<String, VendorError> {
        self.hit();
        let known = self
            .positions
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.position.deal_id == deal_id);
        if known {
            Ok(format!("u_{deal_id}"))
        } else {
            Err(status_error(404))
        }
    }

    async fn submit_offset(
        &self,
        _session: &CachedSession,
        order: &OffsetOrder,
    ) -> Result<String, VendorError> {
        self.hit();
        if self.fail_offsets.load(Ordering::SeqCst) {
            return Err(status_error(503));
        }
        self.offsets.lock().unwrap().push(order.clone());
        self.positions
            .lock()
            .unwrap()
            .retain(|p| p.position.deal_id != order.deal_id);
        let reference = format!("c_{}", order.deal_id);
        self.references
            .lock()
            .unwrap()
            .insert(reference.clone(), order.deal_id.clone());
        Ok(reference)
    }
}

/// Live-connection double.
pub struct FakeConnection {
    pub account_id: String,
    pub calls: AtomicUsize,
    pub closes: AtomicUsize,
    pub fail_close: AtomicBool,
    pub digits: AtomicU32,
    pub bid: f64,
    pub ask: f64,
    pub positions: Mutex<Vec<Mt5Position>>,
    pub orders: Mutex<Vec<MarketOrder>>,
    pub pending: Mutex<Vec<PendingOrder>>,
}

impl FakeConnection {
    pub fn new(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            calls: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            fail_close: AtomicBool::new(false),
            digits: AtomicU32::new(5),
            bid: 1.08512,
            ask: 1.08527,
            positions: Mutex::new(Vec::new()),
            orders: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn accepted(order_id: &str) -> TradeOutcome {
        TradeOutcome {
            order_id: Some(order_id.to_string()),
            position_id: Some(order_id.to_string()),
            price: Some(1.08527),
            code: "TRADE_RETCODE_DONE".into(),
            message: "Request completed".into(),
        }
    }
}

#[async_trait]
impl Mt5Connection for FakeConnection {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn account_information(&self) -> Result<AccountInformation, VendorError> {
        self.hit();
        Ok(AccountInformation {
            login: "51234567".into(),
            name: "Jane Trader".into(),
            server: "Broker-Demo".into(),
            currency: "USD".into(),
            company: "Broker Ltd".into(),
            balance: 1000.0,
            equity: 1010.0,
            margin: 20.0,
            free_margin: 990.0,
            leverage: 100.0,
        })
    }

    async fn symbol_price(&self, symbol: &str) -> Result<Mt5Price, VendorError> {
        self.hit();
        Ok(Mt5Price {
            symbol: symbol.to_string(),
            bid: self.bid,
            ask: self.ask,
            time: None,
        })
    }

    async fn symbol_specification(&self, symbol: &str) -> Result<SymbolSpecification, VendorError> {
        self.hit();
        Ok(SymbolSpecification {
            symbol: symbol.to_string(),
            digits: self.digits.load(Ordering::SeqCst),
            description: None,
        })
    }

    async fn positions(&self) -> Result<Vec<Mt5Position>, VendorError> {
        self.hit();
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn history_deals(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<Mt5Deal>, VendorError> {
        self.hit();
        Ok(Vec::new())
    }

    async fn market_order(&self, order: &MarketOrder) -> Result<TradeOutcome, VendorError> {
        self.hit();
        self.orders.lock().unwrap().push(order.clone());
        Ok(Self::accepted("1001"))
    }

    async fn pending_order(&self, order: &PendingOrder) -> Result<TradeOutcome, VendorError> {
        self.hit();
        self.pending.lock().unwrap().push(order.clone());
        Ok(Self::accepted("2001"))
    }

    async fn modify_position(
        &self,
        ticket: &str,
        _stop_loss: Option<f64>,
        _take_profit: Option<f64>,
    ) -> Result<TradeOutcome, VendorError> {
        self.hit();
        Ok(Self::accepted(ticket))
    }

    async fn close_position(&self, ticket: &str) -> Result<TradeOutcome, VendorError> {
        self.hit();
        Ok(Self::accepted(ticket))
    }

    async fn close(&self) -> Result<(), VendorError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(status_error(500));
        }
        Ok(())
    }
}

/// Provisioning double. The account it creates is remembered, so a later
/// `find_account` sees it. The terminal reaches the broker only while the
/// stored password is [`MT5_PASSWORD`].
pub struct FakeProvisioner {
    pub calls: AtomicUsize,
    pub created: AtomicUsize,
    pub deploys: AtomicUsize,
    pub redeploys: AtomicUsize,
    pub deploy_hangs: AtomicBool,
    pub account: Mutex<Option<Mt5Account>>,
    pub stored_password: Mutex<Option<String>>,
    pub connection: Arc<FakeConnection>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            deploys: AtomicUsize::new(0),
            redeploys: AtomicUsize::new(0),
            deploy_hangs: AtomicBool::new(false),
            account: Mutex::new(None),
            stored_password: Mutex::new(None),
            connection: Arc::new(FakeConnection::new("acc-mt5")),
        }
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mt5Provisioner for FakeProvisioner {
    async fn find_account(
        &self,
        login: &str,
        server: &str,
    ) -> Result<Option<Mt5Account>, VendorError> {
        self.hit();
        Ok(self
            .account
            .lock()
            .unwrap()
            .clone()
            .filter(|a| a.login == login && a.server == server))
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Mt5Account, VendorError> {
        self.hit();
        if account.password != MT5_PASSWORD {
            return Err(status_error(401));
        }
        *self.stored_password.lock().unwrap() = Some(account.password.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        let created = Mt5Account {
            id: "acc-mt5".into(),
            name: account.name.clone(),
            login: account.login.clone(),
            server: account.server.clone(),
            state: "UNDEPLOYED".into(),
        };
        *self.account.lock().unwrap() = Some(created.clone());
        Ok(created)
    }

    async fn update_password(
        &self,
        _account: &Mt5Account,
        password: &str,
    ) -> Result<(), VendorError> {
        self.hit();
        *self.stored_password.lock().unwrap() = Some(password.to_string());
        Ok(())
    }

    async fn deploy(&self, _account_id: &str) -> Result<(), VendorError> {
        self.hit();
        self.deploys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn redeploy(&self, _account_id: &str) -> Result<(), VendorError> {
        self.hit();
        self.redeploys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_deployed(&self, _account_id: &str) -> Result<(), VendorError> {
        self.hit();
        if self.deploy_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(account) = self.account.lock().unwrap().as_mut() {
            account.state = "DEPLOYED".into();
        }
        Ok(())
    }

    async fn wait_connected(&self, _account_id: &str) -> Result<(), VendorError> {
        self.hit();
        match self.stored_password.lock().unwrap().as_deref() {
            Some(MT5_PASSWORD) => Ok(()),
            _ => Err(status_error(401)),
        }
    }

    async fn connect(&self, _account: &Mt5Account) -> Result<Arc<dyn Mt5Connection>, VendorError> {
        self.hit();
        Ok(self.connection.clone() as Arc<dyn Mt5Connection>)
    }
}

pub struct TestApp {
    pub router: Router,
    pub config: Config,
    pub capital: Arc<FakeCapital>,
    pub mt5: Arc<FakeProvisioner>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_deploy_timeout(Duration::from_secs(1))
    }

    pub fn with_deploy_timeout(deploy_timeout: Duration) -> Self {
        let config = test_config();
        let capital = Arc::new(FakeCapital::default());
        let mt5 = Arc::new(FakeProvisioner::new());

        let state = AppState {
            config: config.clone(),
            capital: Arc::new(CapitalGateway::new(
                capital.clone(),
                Arc::new(MemorySessionStore::new()),
                config.capital_session_ttl(),
            )),
            mt5: Arc::new(Mt5Gateway::new(mt5.clone(), config.mt5_magic, deploy_timeout)),
        };

        Self {
            router: build_router(state),
            config,
            capital,
            mt5,
        }
    }

    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        self.send_request(request).await
    }

    pub async fn send_request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

pub fn sample_position(deal_id: &str, direction: Direction, size: f64) -> VendorPosition {
    VendorPosition {
        position: PositionDetails {
            deal_id: deal_id.to_string(),
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
