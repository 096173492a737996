//! In-memory paper broker.
//!
//! Replays a fixed bar history: every `connect` reveals one more bar, fills
//! market orders at the simulated quote, and closes open positions whose stop
//! or target the newly revealed bars touch (stop first if both are touched in
//! the same bar). Closing deals are kept so the reconciler can read them back.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::{
    Broker, BrokerError, BrokerSession, ClosedDeal, MarketOrderRequest, OpenPosition, OrderReceipt,
};
use crate::types::{Bar, Direction, Quote};

/// MT5 "invalid stops"
const RETCODE_INVALID_STOPS: i64 = 10016;
/// MT5 "not enough money"
const RETCODE_NO_MONEY: i64 = 10019;

#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// Bars visible after the first connect
    pub start_bars: usize,
    /// Bar length
    pub timeframe: Duration,
    /// Ask minus bid
    pub spread: f64,
    /// Units per lot, for P&L
    pub contract_size: f64,
    /// Commission charged per closing deal (negative = cost)
    pub commission: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            start_bars: 300,
            timeframe: Duration::hours(1),
            spread: 0.2,
            contract_size: 100.0,
            commission: 0.0,
        }
    }
}

#[derive(Debug)]
struct PaperState {
    config: PaperConfig,
    history: Vec<Bar>,
    /// Number of bars currently visible
    visible: usize,
    positions: Vec<OpenPosition>,
    deals: Vec<ClosedDeal>,
    next_ticket: u64,
    failing_connects: u32,
    reject_reason: Option<(i64, String)>,
    sessions_opened: u64,
    sessions_closed: u64,
}

impl PaperState {
    fn last_bar(&self) -> Option<&Bar> {
        self.history[..self.visible].last()
    }

    fn clock(&self) -> DateTime<Utc> {
        match self.last_bar() {
            Some(bar) => bar.timestamp + self.config.timeframe,
            None => Utc::now(),
        }
    }

    fn quote(&self) -> Option<Quote> {
        let bar = self.last_bar()?;
        let half = self.config.spread / 2.0;
        Some(Quote {
            bid: bar.close - half,
            ask: bar.close + half,
            time: self.clock(),
        })
    }

    fn next_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    /// Close positions whose protective levels `bar` touched
    fn settle(&mut self, bar: Bar) {
        let mut still_open = Vec::new();
        for position in std::mem::take(&mut self.positions) {
            let exit = match position.direction {
                Direction::Long if bar.low <= position.stop_loss => Some(position.stop_loss),
                Direction::Long if bar.high >= position.take_profit => Some(position.take_profit),
                Direction::Short if bar.high >= position.stop_loss => Some(position.stop_loss),
                Direction::Short if bar.low <= position.take_profit => Some(position.take_profit),
                _ => None,
            };

            let Some(exit) = exit else {
                still_open.push(position);
                continue;
            };

            let points = match position.direction {
                Direction::Long => exit - position.price_open,
                Direction::Short => position.price_open - exit,
            };
            let ticket = self.next_ticket();
            let deal = ClosedDeal {
                ticket,
                position_id: position.ticket,
                symbol: position.symbol.clone(),
                tag: position.tag,
                profit: points * position.volume * self.config.contract_size,
                commission: self.config.commission,
                swap: 0.0,
                fee: 0.0,
                time: bar.timestamp + self.config.timeframe,
            };
            info!(
                "Paper position {} closed at {:.2} ({:+.2})",
                position.ticket, exit, deal.profit
            );
            self.deals.push(deal);
        }
        self.positions = still_open;
    }

    fn advance(&mut self) -> bool {
        if self.visible >= self.history.len() {
            return false;
        }
        let bar = self.history[self.visible];
        self.visible += 1;
        self.settle(bar);
        true
    }
}

/// Replay broker sharing its state with every session it hands out
#[derive(Debug, Clone)]
pub struct PaperBroker {
    state: Arc<Mutex<PaperState>>,
    started: bool,
}

impl PaperBroker {
    pub fn new(history: Vec<Bar>, config: PaperConfig) -> Self {
        // first connect reveals bar number `start_bars`
        let visible = config.start_bars.saturating_sub(1).min(history.len());
        Self {
            state: Arc::new(Mutex::new(PaperState {
                config,
                history,
                visible,
                positions: Vec::new(),
                deals: Vec::new(),
                next_ticket: 1,
                failing_connects: 0,
                reject_reason: None,
                sessions_opened: 0,
                sessions_closed: 0,
            })),
            started: false,
        }
    }

    /// Load bars from a CSV export (`time,open,high,low,close[,volume|real_volume|tick_volume]`)
    pub fn from_csv(path: &Path, config: PaperConfig) -> Result<Self> {
        let bars = load_bars_csv(path)?;
        info!("Loaded {} bars for paper replay from {}", bars.len(), path.display());
        Ok(Self::new(bars, config))
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        lock_state(&self.state)
    }

    /// Number of bars not yet revealed
    pub fn remaining_bars(&self) -> usize {
        let state = self.lock();
        state.history.len() - state.visible
    }

    /// Make the next `n` connects fail
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().failing_connects = n;
    }

    /// Reject every order with this code and reason (`None` to accept again)
    pub fn reject_orders(&self, reason: Option<(i64, String)>) {
        self.lock().reject_reason = reason;
    }

    /// Insert a closing deal directly into the history
    pub fn push_closed_deal(&self, deal: ClosedDeal) {
        self.lock().deals.push(deal);
    }

    /// Insert an open position directly
    pub fn push_position(&self, position: OpenPosition) {
        self.lock().positions.push(position);
    }

    pub fn open_position_count(&self) -> usize {
        self.lock().positions.len()
    }

    pub fn closed_deal_count(&self) -> usize {
        self.lock().deals.len()
    }

    /// Sessions opened and closed so far
    pub fn session_counts(&self) -> (u64, u64) {
        let state = self.lock();
        (state.sessions_opened, state.sessions_closed)
    }
}

fn lock_state(state: &Arc<Mutex<PaperState>>) -> MutexGuard<'_, PaperState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Broker for PaperBroker {
    type Session = PaperSession;

    async fn connect(&mut self) -> Result<PaperSession, BrokerError> {
        let shared = Arc::clone(&self.state);
        let mut state = lock_state(&shared);

        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(BrokerError::Connection("simulated connection failure".to_string()));
        }

        if !state.advance() && self.started {
            return Err(BrokerError::Exhausted);
        }

        self.started = true;
        state.sessions_opened += 1;
        debug!("Paper session opened ({} bars visible)", state.visible);

        Ok(PaperSession {
            state: Arc::clone(&shared),
        })
    }
}

#[derive(Debug)]
pub struct PaperSession {
    state: Arc<Mutex<PaperState>>,
}

impl PaperSession {
    fn lock(&self) -> MutexGuard<'_, PaperState> {
        lock_state(&self.state)
    }
}

impl BrokerSession for PaperSession {
    fn clock(&self) -> DateTime<Utc> {
        self.lock().clock()
    }

    async fn bars(
        &mut self,
        _symbol: &str,
        _timeframe_minutes: u32,
        count: usize,
    ) -> Result<Vec<Bar>, BrokerError> {
        let state = self.lock();
        let start = state.visible.saturating_sub(count);
        Ok(state.history[start..state.visible].to_vec())
    }

    async fn quote(&mut self, symbol: &str) -> Result<Quote, BrokerError> {
        self.lock()
            .quote()
            .ok_or_else(|| BrokerError::Protocol(format!("no prices for {symbol}")))
    }

    async fn open_positions(&mut self, symbol: &str, tag: i64) -> Result<Vec<OpenPosition>, BrokerError> {
        Ok(self
            .lock()
            .positions
            .iter()
            .filter(|p| p.symbol == symbol && p.tag == tag)
            .cloned()
            .collect())
    }

    async fn closed_deals(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        tag: i64,
    ) -> Result<Vec<ClosedDeal>, BrokerError> {
        Ok(self
            .lock()
            .deals
            .iter()
            .filter(|d| d.tag == tag && d.time >= from && d.time <= to)
            .cloned()
            .collect())
    }

    async fn submit_market_order(&mut self, order: &MarketOrderRequest) -> Result<OrderReceipt, BrokerError> {
        let mut state = self.lock();

        if let Some((code, reason)) = state.reject_reason.clone() {
            return Err(BrokerError::Rejected { code, reason });
        }
        if order.volume <= 0.0 {
            return Err(BrokerError::Rejected {
                code: RETCODE_NO_MONEY,
                reason: "invalid volume".to_string(),
            });
        }

        let quote = state
            .quote()
            .ok_or_else(|| BrokerError::Protocol(format!("no prices for {}", order.symbol)))?;
        let fill_price = match order.direction {
            Direction::Long => quote.ask,
            Direction::Short => quote.bid,
        };

        let stops_ok = match order.direction {
            Direction::Long => order.stop_loss < fill_price && order.take_profit > fill_price,
            Direction::Short => order.stop_loss > fill_price && order.take_profit < fill_price,
        };
        if !stops_ok {
            return Err(BrokerError::Rejected {
                code: RETCODE_INVALID_STOPS,
                reason: "invalid stops".to_string(),
            });
        }

        let ticket = state.next_ticket();
        state.positions.push(OpenPosition {
            ticket,
            symbol: order.symbol.clone(),
            tag: order.tag,
            direction: order.direction,
            volume: order.volume,
            price_open: fill_price,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
        });

        Ok(OrderReceipt {
            order_id: ticket,
            fill_price,
        })
    }

    async fn close(self) -> Result<(), BrokerError> {
        self.lock().sessions_closed += 1;
        Ok(())
    }
}

/// One row of a bar export; several volume column names are accepted
#[derive(Debug, Deserialize)]
struct CsvBar {
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    real_volume: Option<f64>,
    #[serde(default)]
    tick_volume: Option<f64>,
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return Utc.timestamp_opt(secs, 0).single();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Read bars from CSV, oldest first
pub fn load_bars_csv(path: &Path) -> Result<Vec<Bar>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open bar file {}", path.display()))?;

    let mut bars = Vec::new();
    for (line, row) in reader.deserialize::<CsvBar>().enumerate() {
        let row = row.with_context(|| format!("Bad bar row {} in {}", line + 2, path.display()))?;
        let timestamp = parse_time(&row.time)
            .with_context(|| format!("Bad timestamp '{}' on row {}", row.time, line + 2))?;
        bars.push(Bar {
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            // MT5 exports report real_volume 0 when the feed has none
            volume: [row.volume, row.real_volume, row.tick_volume]
                .into_iter()
                .flatten()
                .find(|v| *v > 0.0)
                .unwrap_or(0.0),
        });
    }

    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    Ok(bars)
}
