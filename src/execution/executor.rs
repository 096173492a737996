//! Order Executor - protective levels and market order submission

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::broker::{BrokerError, BrokerSession, MarketOrderRequest, OrderReceipt, TimeInForce};
use crate::config::BotConfig;
use crate::features::FeatureRecord;
use crate::strategy::Signal;
use crate::types::{Direction, Quote};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no direction to trade")]
    NoDirection,

    /// Stop would sit on the wrong side of the entry
    #[error("invalid protective levels: entry {entry:.2}, stop {stop_loss:.2}")]
    InvalidLevels { entry: f64, stop_loss: f64 },

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Entry, stop-loss and take-profit for one order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLevels {
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl RiskLevels {
    /// Distance from entry to stop, positive when the stop is on the losing side
    pub fn risk(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Long => self.entry - self.stop_loss,
            Direction::Short => self.stop_loss - self.entry,
        }
    }
}

/// Submits single market orders with ATR-based protection
#[derive(Debug, Clone)]
pub struct OrderExecutor {
    symbol: String,
    volume: f64,
    tag: i64,
    comment: String,
    reward_multiple: f64,
}

impl OrderExecutor {
    pub fn new(config: &BotConfig) -> Self {
        Self {
            symbol: config.symbol.clone(),
            volume: config.volume,
            tag: config.order_tag,
            comment: config.order_comment.clone(),
            reward_multiple: config.strategy.reward_multiple,
        }
    }

    /// Long: stop one ATR below the bar's low, entry at the ask.
    /// Short: stop one ATR above the bar's high, entry at the bid.
    /// The target sits `reward_multiple` stop distances past the entry.
    pub fn risk_levels(&self, direction: Direction, record: &FeatureRecord, quote: &Quote) -> RiskLevels {
        match direction {
            Direction::Long => {
                let entry = quote.ask;
                let stop_loss = record.bar.low - record.atr;
                RiskLevels {
                    entry,
                    stop_loss,
                    take_profit: entry + (entry - stop_loss) * self.reward_multiple,
                }
            }
            Direction::Short => {
                let entry = quote.bid;
                let stop_loss = record.bar.high + record.atr;
                RiskLevels {
                    entry,
                    stop_loss,
                    take_profit: entry - (stop_loss - entry) * self.reward_multiple,
                }
            }
        }
    }

    /// Build the order for `signal`, rejecting it locally if the levels make no sense
    pub fn order_request(
        &self,
        signal: Signal,
        record: &FeatureRecord,
        quote: &Quote,
    ) -> Result<MarketOrderRequest, ExecutionError> {
        let direction = signal.direction().ok_or(ExecutionError::NoDirection)?;
        let levels = self.risk_levels(direction, record, quote);

        let risk = levels.risk(direction);
        if risk.is_nan() || risk <= 0.0 {
            return Err(ExecutionError::InvalidLevels {
                entry: levels.entry,
                stop_loss: levels.stop_loss,
            });
        }

        Ok(MarketOrderRequest {
            symbol: self.symbol.clone(),
            direction,
            volume: self.volume,
            price: levels.entry,
            stop_loss: levels.stop_loss,
            take_profit: levels.take_profit,
            tag: self.tag,
            comment: self.comment.clone(),
            time_in_force: TimeInForce::Gtc,
        })
    }

    /// Submit one market order. Failures are reported, never retried here.
    pub async fn execute<S: BrokerSession>(
        &self,
        session: &mut S,
        signal: Signal,
        record: &FeatureRecord,
        quote: &Quote,
    ) -> Result<OrderReceipt, ExecutionError> {
        let request = self.order_request(signal, record, quote)?;

        match session.submit_market_order(&request).await {
            Ok(receipt) => {
                info!(
                    "Order {} filled: {} {} {} @ {:.2} (SL {:.2}, TP {:.2})",
                    receipt.order_id,
                    request.direction,
                    request.volume,
                    request.symbol,
                    receipt.fill_price,
                    request.stop_loss,
                    request.take_profit
                );
                Ok(receipt)
            }
            Err(e) => {
                warn!("Order for {} {} failed: {}", request.direction, request.symbol, e);
                Err(e.into())
            }
        }
    }
}
