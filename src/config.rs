//! Configuration for the trading loop

use anyhow::{bail, Result};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Execution mode determines which broker the loop talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// In-memory broker replaying bars from a CSV file
    Paper,
    /// MT5 HTTP bridge
    Live,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "Paper"),
            Self::Live => write!(f, "Live"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "paper" => Ok(Self::Paper),
            "live" => Ok(Self::Live),
            other => bail!("unknown execution mode '{}' (expected paper or live)", other),
        }
    }
}

/// Rule-filter and risk parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Fast EMA period (trend filter)
    pub ema_fast: usize,

    /// Slow EMA period (trend filter)
    pub ema_slow: usize,

    /// ATR period (volatility)
    pub atr_period: usize,

    /// Pivot proximity tolerance, in multiples of ATR
    pub proximity: f64,

    /// Take-profit distance as a multiple of the stop distance
    pub reward_multiple: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            ema_fast: 50,
            ema_slow: 200,
            atr_period: 14,
            proximity: 0.5,
            reward_multiple: 1.5,
        }
    }
}

/// Bars per trading day on the hourly timeframe
pub const BARS_PER_DAY: usize = 24;

impl StrategyConfig {
    /// Minimum window the feature builder needs before it emits anything
    pub fn min_window(&self) -> usize {
        self.ema_slow.max(self.atr_period).max(BARS_PER_DAY)
    }
}

/// Configuration for the bot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Paper or live broker
    pub mode: ExecutionMode,

    /// Symbol to trade (e.g., "XAUUSD")
    pub symbol: String,

    /// Bar timeframe in minutes
    pub timeframe_minutes: u32,

    /// Number of recent bars requested per iteration
    pub history_bars: usize,

    /// Order volume in lots
    pub volume: f64,

    /// Tag (magic number) on every order this bot submits
    pub order_tag: i64,

    /// Free-text order comment
    pub order_comment: String,

    /// Model artifact location
    pub model_path: PathBuf,

    /// Open-trade ledger document
    pub ledger_path: PathBuf,

    /// Training corpus (CSV)
    pub corpus_path: PathBuf,

    /// Sleep between iterations when flat
    pub poll_interval_secs: u64,

    /// Sleep between iterations while a tagged position is open
    pub position_poll_interval_secs: u64,

    /// Sleep after a connection failure or a failed iteration
    pub backoff_secs: u64,

    /// How far back the reconciler looks for closed deals
    pub reconcile_lookback_days: i64,

    pub strategy: StrategyConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Paper,
            symbol: "XAUUSD".to_string(),
            timeframe_minutes: 60,
            history_bars: 300,
            volume: 0.01,
            order_tag: 123456,
            order_comment: "pivot-gate".to_string(),
            model_path: PathBuf::from("model.json"),
            ledger_path: PathBuf::from("open_trades.json"),
            corpus_path: PathBuf::from("executed_trades.csv"),
            poll_interval_secs: 60,
            position_poll_interval_secs: 300,
            backoff_secs: 60,
            reconcile_lookback_days: 7,
            strategy: StrategyConfig::default(),
        }
    }
}

impl BotConfig {
    pub fn timeframe(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.timeframe_minutes as i64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn position_poll_interval(&self) -> Duration {
        Duration::from_secs(self.position_poll_interval_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn reconcile_lookback(&self) -> ChronoDuration {
        ChronoDuration::days(self.reconcile_lookback_days)
    }

    /// Reject settings the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;
        if s.ema_fast == 0 || s.atr_period == 0 {
            bail!("indicator periods must be positive");
        }
        if s.ema_fast >= s.ema_slow {
            bail!("fast EMA ({}) must be shorter than slow EMA ({})", s.ema_fast, s.ema_slow);
        }
        if s.proximity <= 0.0 {
            bail!("proximity tolerance must be positive, got {}", s.proximity);
        }
        if s.reward_multiple <= 0.0 {
            bail!("reward multiple must be positive, got {}", s.reward_multiple);
        }
        if self.volume <= 0.0 {
            bail!("order volume must be positive, got {}", self.volume);
        }
        if self.timeframe_minutes == 0 {
            bail!("timeframe must be at least one minute");
        }
        if self.history_bars < s.min_window() {
            bail!(
                "history of {} bars is shorter than the {} bars the indicators need",
                self.history_bars,
                s.min_window()
            );
        }
        if self.position_poll_interval_secs < self.poll_interval_secs {
            bail!(
                "open-position interval ({}s) must not be shorter than the idle interval ({}s)",
                self.position_poll_interval_secs,
                self.poll_interval_secs
            );
        }
        if self.reconcile_lookback_days <= 0 {
            bail!("reconcile lookback must be at least one day");
        }
        Ok(())
    }
}
