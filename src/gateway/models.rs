//! MT5 Gateway Data Models
//!
//! Request and response types for the HTTP bridge. Field names follow the
//! MetaTrader 5 structures the bridge serializes (`MqlRates`, `MqlTick`,
//! `TradePosition`, `TradeDeal`, `MqlTradeRequest`, `MqlTradeResult`).

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::{BrokerError, ClosedDeal, OpenPosition, TimeInForce};
use crate::types::{Bar, Direction, Quote};

// ============================================================================
// Constants
// ============================================================================

/// Request completed
pub const RETCODE_DONE: i64 = 10009;

/// `TRADE_ACTION_DEAL` - market execution
pub const TRADE_ACTION_DEAL: i32 = 1;

/// `ORDER_TYPE_BUY` / `POSITION_TYPE_BUY`
pub const TYPE_BUY: i32 = 0;
/// `ORDER_TYPE_SELL` / `POSITION_TYPE_SELL`
pub const TYPE_SELL: i32 = 1;

/// `ORDER_TIME_GTC`
pub const ORDER_TIME_GTC: i32 = 0;
/// `ORDER_TIME_DAY`
pub const ORDER_TIME_DAY: i32 = 1;

/// `ORDER_FILLING_IOC`
pub const ORDER_FILLING_IOC: i32 = 1;

/// `DEAL_ENTRY_OUT`
pub const DEAL_ENTRY_OUT: i32 = 1;
/// `DEAL_ENTRY_OUT_BY`
pub const DEAL_ENTRY_OUT_BY: i32 = 3;

/// Maximum price deviation in points for market orders
pub const DEFAULT_DEVIATION: u32 = 20;

fn timestamp(secs: i64) -> Result<DateTime<Utc>, BrokerError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| BrokerError::Protocol(format!("invalid timestamp {secs}")))
}

fn direction(kind: i32) -> Result<Direction, BrokerError> {
    match kind {
        TYPE_BUY => Ok(Direction::Long),
        TYPE_SELL => Ok(Direction::Short),
        other => Err(BrokerError::Protocol(format!("unknown position type {other}"))),
    }
}

// ============================================================================
// Authentication
// ============================================================================

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    /// Trading account number
    pub login: i64,
    pub password: String,
    /// Broker server name
    pub server: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// Market data
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RateDto {
    /// Bar open time, unix seconds
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub tick_volume: f64,
    #[serde(default)]
    pub real_volume: f64,
}

impl RateDto {
    pub fn to_bar(&self) -> Result<Bar, BrokerError> {
        Ok(Bar {
            timestamp: timestamp(self.time)?,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: if self.real_volume > 0.0 {
                self.real_volume
            } else {
                self.tick_volume
            },
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickDto {
    pub time: i64,
    pub bid: f64,
    pub ask: f64,
}

impl TickDto {
    pub fn to_quote(&self) -> Result<Quote, BrokerError> {
        if self.bid <= 0.0 || self.ask <= 0.0 {
            return Err(BrokerError::Protocol("tick without prices".to_string()));
        }
        Ok(Quote {
            bid: self.bid,
            ask: self.ask,
            time: timestamp(self.time)?,
        })
    }
}

// ============================================================================
// Positions and deals
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PositionDto {
    pub ticket: u64,
    pub symbol: String,
    /// Expert tag ("magic number")
    #[serde(default)]
    pub magic: i64,
    #[serde(rename = "type")]
    pub kind: i32,
    pub volume: f64,
    pub price_open: f64,
    #[serde(default)]
    pub sl: f64,
    #[serde(default)]
    pub tp: f64,
}

impl PositionDto {
    pub fn to_position(&self) -> Result<OpenPosition, BrokerError> {
        Ok(OpenPosition {
            ticket: self.ticket,
            symbol: self.symbol.clone(),
            tag: self.magic,
            direction: direction(self.kind)?,
            volume: self.volume,
            price_open: self.price_open,
            stop_loss: self.sl,
            take_profit: self.tp,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DealDto {
    pub ticket: u64,
    pub position_id: u64,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub magic: i64,
    /// 0 = in, 1 = out, 2 = in/out, 3 = out by opposite position
    pub entry: i32,
    #[serde(default)]
    pub profit: f64,
    #[serde(default)]
    pub commission: f64,
    #[serde(default)]
    pub swap: f64,
    #[serde(default)]
    pub fee: f64,
    pub time: i64,
}

impl DealDto {
    /// Whether this deal closed (part of) a position
    pub fn is_closing(&self) -> bool {
        self.entry == DEAL_ENTRY_OUT || self.entry == DEAL_ENTRY_OUT_BY
    }

    pub fn to_deal(&self) -> Result<ClosedDeal, BrokerError> {
        Ok(ClosedDeal {
            ticket: self.ticket,
            position_id: self.position_id,
            symbol: self.symbol.clone(),
            tag: self.magic,
            profit: self.profit,
            commission: self.commission,
            swap: self.swap,
            fee: self.fee,
            time: timestamp(self.time)?,
        })
    }
}

// ============================================================================
// Orders
// ============================================================================

/// Body for `POST /order/send`
#[derive(Debug, Clone, Serialize)]
pub struct OrderSendRequest {
    pub action: i32,
    pub symbol: String,
    pub volume: f64,
    #[serde(rename = "type")]
    pub order_type: i32,
    pub price: f64,
    pub sl: f64,
    pub tp: f64,
    pub deviation: u32,
    pub magic: i64,
    pub comment: String,
    pub type_time: i32,
    pub type_filling: i32,
}

impl OrderSendRequest {
    pub fn market(order: &crate::broker::MarketOrderRequest) -> Self {
        Self {
            action: TRADE_ACTION_DEAL,
            symbol: order.symbol.clone(),
            volume: order.volume,
            order_type: match order.direction {
                Direction::Long => TYPE_BUY,
                Direction::Short => TYPE_SELL,
            },
            price: order.price,
            sl: order.stop_loss,
            tp: order.take_profit,
            deviation: DEFAULT_DEVIATION,
            magic: order.tag,
            comment: order.comment.clone(),
            type_time: match order.time_in_force {
                TimeInForce::Gtc => ORDER_TIME_GTC,
                TimeInForce::Day => ORDER_TIME_DAY,
            },
            type_filling: ORDER_FILLING_IOC,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderSendResponse {
    pub retcode: i64,
    #[serde(default)]
    pub order: u64,
    #[serde(default)]
    pub deal: u64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub comment: String,
}

impl OrderSendResponse {
    pub fn is_done(&self) -> bool {
        self.retcode == RETCODE_DONE
    }
}
