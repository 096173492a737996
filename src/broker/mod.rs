//! Broker collaborator
//!
//! A [`Broker`] hands out a [`BrokerSession`]; every broker operation goes
//! through that session handle, and the caller releases it explicitly with
//! [`BrokerSession::close`] at the end of each loop iteration.
//!
//! Implementations:
//! - [`crate::gateway::GatewayClient`] - MT5 HTTP bridge
//! - [`paper::PaperBroker`] - in-memory replay broker

pub mod paper;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Bar, Direction, Quote};

pub use paper::{PaperBroker, PaperConfig};

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Session could not be established or was lost
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// Broker refused the request (margin, invalid stops, market closed...)
    #[error("order rejected (code {code}): {reason}")]
    Rejected { code: i64, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Broker answered with something we could not interpret
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No further data will ever arrive (end of a replay)
    #[error("broker has no more data")]
    Exhausted,
}

/// Time in force for orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till canceled
    Gtc,
    Day,
}

/// Market order with attached protective levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    /// Quoted price the order is expected to fill near
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Identifies this bot's orders on a shared account
    pub tag: i64,
    pub comment: String,
    pub time_in_force: TimeInForce,
}

/// Successful submission
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: u64,
    pub fill_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    /// Position ticket; equals the id of the order that opened it
    pub ticket: u64,
    pub symbol: String,
    pub tag: i64,
    pub direction: Direction,
    pub volume: f64,
    pub price_open: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// A deal that closed (all or part of) a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedDeal {
    pub ticket: u64,
    /// Position the deal closed, i.e. the opening order id
    pub position_id: u64,
    pub symbol: String,
    pub tag: i64,
    pub profit: f64,
    pub commission: f64,
    pub swap: f64,
    pub fee: f64,
    pub time: DateTime<Utc>,
}

impl ClosedDeal {
    /// Realized result net of costs
    pub fn net_profit(&self) -> f64 {
        self.profit + self.commission + self.swap + self.fee
    }
}

/// Source of broker sessions
#[allow(async_fn_in_trait)]
pub trait Broker {
    type Session: BrokerSession;

    /// Establish a session
    async fn connect(&mut self) -> Result<Self::Session, BrokerError>;
}

/// An established broker session
#[allow(async_fn_in_trait)]
pub trait BrokerSession {
    /// Broker's notion of the current time
    fn clock(&self) -> DateTime<Utc>;

    /// The `count` most recent bars, oldest first. The last one may still be forming.
    async fn bars(
        &mut self,
        symbol: &str,
        timeframe_minutes: u32,
        count: usize,
    ) -> Result<Vec<Bar>, BrokerError>;

    async fn quote(&mut self, symbol: &str) -> Result<Quote, BrokerError>;

    /// Open positions on `symbol` carrying `tag`
    async fn open_positions(&mut self, symbol: &str, tag: i64) -> Result<Vec<OpenPosition>, BrokerError>;

    /// Position-closing deals carrying `tag` with `from <= time <= to`
    async fn closed_deals(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        tag: i64,
    ) -> Result<Vec<ClosedDeal>, BrokerError>;

    async fn submit_market_order(&mut self, order: &MarketOrderRequest) -> Result<OrderReceipt, BrokerError>;

    /// Release the session
    async fn close(self) -> Result<(), BrokerError>
    where
        Self: Sized;
}
