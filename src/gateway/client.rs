//! MT5 Gateway Client
//!
//! HTTP client for the MT5 bridge with token-based sessions. Each
//! [`Broker::connect`] logs in and yields a [`GatewaySession`] carrying the
//! token; [`BrokerSession::close`] logs out again.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use super::models::*;
use crate::broker::{
    Broker, BrokerError, BrokerSession, ClosedDeal, MarketOrderRequest, OpenPosition, OrderReceipt,
};
use crate::types::{Bar, Quote};

/// Default bridge address
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8228";

/// MT5 gateway client
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
    login: i64,
    password: String,
    server: String,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.base_url)
            .field("login", &self.login)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl GatewayClient {
    /// Create a new client from environment variables
    ///
    /// Expects:
    /// - `MT5_LOGIN` - Trading account number
    /// - `MT5_PASSWORD` - Trading account password
    /// - `MT5_SERVER` - Broker server name
    /// - `MT5_GATEWAY_URL` (optional) - Bridge address, defaults to [`DEFAULT_BASE_URL`]
    pub fn from_env() -> Result<Self> {
        let login = std::env::var("MT5_LOGIN")
            .context("MT5_LOGIN environment variable not set")?
            .parse::<i64>()
            .context("MT5_LOGIN must be a valid integer")?;
        let password =
            std::env::var("MT5_PASSWORD").context("MT5_PASSWORD environment variable not set")?;
        let server = std::env::var("MT5_SERVER").context("MT5_SERVER environment variable not set")?;
        let base_url =
            std::env::var("MT5_GATEWAY_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Self::new(base_url, login, password, server)
    }

    /// Create a new client with explicit configuration
    pub fn new(base_url: String, login: i64, password: String, server: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            login,
            password,
            server,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Broker for GatewayClient {
    type Session = GatewaySession;

    async fn connect(&mut self) -> Result<GatewaySession, BrokerError> {
        debug!("Logging in to MT5 gateway at {}...", self.base_url);

        let request = LoginRequest {
            login: self.login,
            password: self.password.clone(),
            server: self.server.clone(),
        };

        let response = self
            .client
            .post(format!("{}/auth/login", self.base_url))
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| BrokerError::Connection(format!("login request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(BrokerError::Connection(format!(
                "login failed with status {}: {}",
                status, body
            )));
        }

        let login: LoginResponse = serde_json::from_str(&body)
            .map_err(|e| BrokerError::Protocol(format!("bad login response: {e}")))?;

        if let Some(error) = login.error {
            return Err(BrokerError::Connection(format!("login rejected: {}", error)));
        }

        let token = login
            .token
            .ok_or_else(|| BrokerError::Protocol("no session token returned".to_string()))?;

        debug!("MT5 gateway session established");
        Ok(GatewaySession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token,
        })
    }
}

/// Logged-in gateway session
pub struct GatewaySession {
    client: Client,
    base_url: String,
    token: String,
}

impl GatewaySession {
    fn auth_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Make an authenticated GET request
    async fn get<R: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<R, BrokerError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, endpoint))
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(BrokerError::Protocol(format!(
                "GET {} failed ({}): {}",
                endpoint, status, body
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| BrokerError::Protocol(format!("bad response from {}: {}", endpoint, e)))
    }

    /// Make an authenticated POST request
    async fn post<T: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<R, BrokerError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, endpoint))
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let body_text = response.text().await?;

        if !status.is_success() {
            return Err(BrokerError::Protocol(format!(
                "POST {} failed ({}): {}",
                endpoint, status, body_text
            )));
        }

        serde_json::from_str(&body_text).map_err(|e| {
            BrokerError::Protocol(format!("bad response from {}: {} ({})", endpoint, e, body_text))
        })
    }
}

impl BrokerSession for GatewaySession {
    fn clock(&self) -> DateTime<Utc> {
        Utc::now()
    }

    // ========================================================================
    // Market data
    // ========================================================================

    async fn bars(
        &mut self,
        symbol: &str,
        timeframe_minutes: u32,
        count: usize,
    ) -> Result<Vec<Bar>, BrokerError> {
        let rates: Vec<RateDto> = self
            .get(&format!(
                "/rates?symbol={}&timeframe={}&count={}",
                symbol, timeframe_minutes, count
            ))
            .await?;
        debug!("Received {} bars for {}", rates.len(), symbol);

        let mut bars = rates.iter().map(RateDto::to_bar).collect::<Result<Vec<_>, _>>()?;
        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }

    async fn quote(&mut self, symbol: &str) -> Result<Quote, BrokerError> {
        let tick: TickDto = self.get(&format!("/tick?symbol={}", symbol)).await?;
        tick.to_quote()
    }

    // ========================================================================
    // Positions and history
    // ========================================================================

    async fn open_positions(&mut self, symbol: &str, tag: i64) -> Result<Vec<OpenPosition>, BrokerError> {
        let positions: Vec<PositionDto> = self.get(&format!("/positions?symbol={}", symbol)).await?;
        positions
            .iter()
            .filter(|p| p.magic == tag)
            .map(PositionDto::to_position)
            .collect()
    }

    async fn closed_deals(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        tag: i64,
    ) -> Result<Vec<ClosedDeal>, BrokerError> {
        let deals: Vec<DealDto> = self
            .get(&format!(
                "/history/deals?from={}&to={}",
                from.timestamp(),
                to.timestamp()
            ))
            .await?;
        debug!("Received {} history deals", deals.len());

        deals
            .iter()
            .filter(|d| d.magic == tag && d.is_closing())
            .map(DealDto::to_deal)
            .collect()
    }

    // ========================================================================
    // Orders
    // ========================================================================

    async fn submit_market_order(&mut self, order: &MarketOrderRequest) -> Result<OrderReceipt, BrokerError> {
        info!(
            "Sending market order: {} {} {} @ {:.2} (SL {:.2}, TP {:.2})",
            order.direction, order.volume, order.symbol, order.price, order.stop_loss, order.take_profit
        );

        let request = OrderSendRequest::market(order);
        let result: OrderSendResponse = self.post("/order/send", &request).await?;

        if !result.is_done() {
            return Err(BrokerError::Rejected {
                code: result.retcode,
                reason: result.comment,
            });
        }

        Ok(OrderReceipt {
            order_id: result.order,
            fill_price: if result.price > 0.0 { result.price } else { order.price },
        })
    }

    /// Log out. A failure is returned, not logged; the caller reports it.
    async fn close(self) -> Result<(), BrokerError> {
        self.post::<_, serde_json::Value>("/auth/logout", &serde_json::json!({}))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = GatewayClient::new(
            "http://localhost:8228/".to_string(),
            1,
            "secret".to_string(),
            "Demo".to_string(),
        )
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:8228");
    }

    #[test]
    fn test_debug_hides_password() {
        let client =
            GatewayClient::new(DEFAULT_BASE_URL.to_string(), 1, "hunter2".to_string(), "Demo".to_string())
                .unwrap();
        assert!(!format!("{:?}", client).contains("hunter2"));
    }

    #[tokio::test]
    async fn test_failed_logout_is_returned() {
        let session = GatewaySession {
            client: Client::new(),
            base_url: "http://127.0.0.1:1".to_string(),
            token: "t".to_string(),
        };
        assert!(matches!(session.close().await, Err(BrokerError::Transport(_))));
    }
}
