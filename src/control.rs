//! Control Loop
//!
//! One iteration: connect, reconcile closed trades, skip if a tagged position
//! is still open, otherwise features -> signal -> gate -> order, then release
//! the session and sleep. Iterations share nothing in memory; the ledger and
//! corpus on disk are the only carried state. Failures are logged and
//! followed by the backoff sleep, never by exiting.

use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerError, BrokerSession};
use crate::config::BotConfig;
use crate::execution::OrderExecutor;
use crate::features::{FeatureBuilder, IndicatorPeriods};
use crate::model::Classifier;
use crate::reconcile::{OutcomeReconciler, ReconcileReport};
use crate::store::{OpenTradeLedger, TrainingCorpus};
use crate::strategy::{DecisionGate, Signal, SignalFilter};
use crate::types::closed_bars;

/// Log run statistics every this many iterations
const STATS_EVERY: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Connecting,
    Polling,
    Idle,
    Backoff,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Polling => write!(f, "POLLING"),
            Self::Idle => write!(f, "IDLE"),
            Self::Backoff => write!(f, "BACKOFF"),
        }
    }
}

/// How an iteration ended
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A tagged position is open; nothing else was evaluated
    PositionOpen,
    /// Not enough closed bars for a fully defined record
    InsufficientData,
    NoSignal(Signal),
    Vetoed { signal: Signal, confidence: f64 },
    OrderRejected { signal: Signal, reason: String },
    OrderPlaced { signal: Signal, order_id: u64 },
    /// The broker has no more data to offer (paper replay ended)
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub outcome: TickOutcome,
    pub reconciled: ReconcileReport,
}

/// Totals over a run, folded from tick reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub ticks: u64,
    pub signals: u64,
    pub vetoes: u64,
    pub orders: u64,
    pub rejections: u64,
    pub labeled_wins: u64,
    pub labeled_losses: u64,
    pub errors: u64,
}

impl RunStats {
    pub fn absorb(mut self, report: &TickReport) -> Self {
        self.ticks += 1;
        self.labeled_wins += report.reconciled.labeled_wins as u64;
        self.labeled_losses += report.reconciled.labeled_losses as u64;
        match report.outcome {
            TickOutcome::Vetoed { .. } => {
                self.signals += 1;
                self.vetoes += 1;
            }
            TickOutcome::OrderRejected { .. } => {
                self.signals += 1;
                self.rejections += 1;
            }
            TickOutcome::OrderPlaced { .. } => {
                self.signals += 1;
                self.orders += 1;
            }
            _ => {}
        }
        self
    }

    pub fn failed(mut self) -> Self {
        self.ticks += 1;
        self.errors += 1;
        self
    }
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ticks, {} signals, {} vetoed, {} orders, {} rejected, {}W/{}L labeled, {} errors",
            self.ticks,
            self.signals,
            self.vetoes,
            self.orders,
            self.rejections,
            self.labeled_wins,
            self.labeled_losses,
            self.errors
        )
    }
}

pub struct ControlLoop<B, C> {
    config: BotConfig,
    broker: B,
    builder: FeatureBuilder,
    filter: SignalFilter,
    gate: DecisionGate<C>,
    executor: OrderExecutor,
    reconciler: OutcomeReconciler,
    corpus: TrainingCorpus,
    state: LoopState,
    max_iterations: Option<u64>,
}

impl<B: Broker, C: Classifier> ControlLoop<B, C> {
    pub fn new(config: BotConfig, broker: B, model: C) -> Self {
        let reconciler = OutcomeReconciler::new(
            config.symbol.clone(),
            config.order_tag,
            config.reconcile_lookback(),
            model.feature_names().to_vec(),
        );
        let gate = DecisionGate::new(model);

        let missing = gate.missing_features(IndicatorPeriods::from(&config.strategy));
        if !missing.is_empty() {
            warn!("Model needs features the builder does not produce: {:?}", missing);
        }

        Self {
            builder: FeatureBuilder::new(config.strategy.clone()),
            filter: SignalFilter::new(config.strategy.proximity),
            executor: OrderExecutor::new(&config),
            corpus: TrainingCorpus::new(&config.corpus_path),
            reconciler,
            gate,
            broker,
            config,
            state: LoopState::Connecting,
            max_iterations: None,
        }
    }

    /// Stop after `n` iterations
    pub fn with_max_iterations(mut self, n: u64) -> Self {
        self.max_iterations = Some(n);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Run until `shutdown` resolves, the iteration limit is reached, or the
    /// broker runs out of data. An iteration in progress always completes.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) -> RunStats {
        tokio::pin!(shutdown);
        let mut stats = RunStats::default();

        info!(
            "Starting control loop: {} {}m, tag {}, mode {}",
            self.config.symbol, self.config.timeframe_minutes, self.config.order_tag, self.config.mode
        );

        loop {
            if self.max_iterations.is_some_and(|max| stats.ticks >= max) {
                info!("Reached iteration limit");
                break;
            }

            let delay = match self.tick().await {
                Ok(report) => {
                    if report.outcome == TickOutcome::Finished {
                        info!("Broker has no more data, stopping");
                        break;
                    }
                    stats = stats.absorb(&report);
                    self.state = LoopState::Idle;
                    match report.outcome {
                        TickOutcome::PositionOpen => self.config.position_poll_interval(),
                        _ => self.config.poll_interval(),
                    }
                }
                Err(e) => {
                    error!("Iteration failed: {:#}", e);
                    stats = stats.failed();
                    self.state = LoopState::Backoff;
                    self.config.backoff()
                }
            };

            if stats.ticks % STATS_EVERY == 0 {
                info!("Run stats: {}", stats);
            }

            if self.sleep_or_shutdown(delay, &mut shutdown).await {
                info!("Shutdown requested");
                break;
            }
        }

        info!("Control loop stopped: {}", stats);
        stats
    }

    /// Run at most `n` iterations with no external shutdown
    pub async fn run_iterations(&mut self, n: u64) -> RunStats {
        self.max_iterations = Some(n);
        self.run(std::future::pending()).await
    }

    async fn sleep_or_shutdown<F: Future<Output = ()>>(
        &self,
        delay: Duration,
        shutdown: &mut std::pin::Pin<&mut F>,
    ) -> bool {
        debug!("{} for {:?}", self.state, delay);
        tokio::select! {
            biased;
            _ = shutdown.as_mut() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    /// One full iteration. The session is released whatever the outcome.
    pub async fn tick(&mut self) -> Result<TickReport> {
        self.state = LoopState::Connecting;
        let mut session = match self.broker.connect().await {
            Ok(session) => session,
            Err(BrokerError::Exhausted) => {
                return Ok(TickReport {
                    outcome: TickOutcome::Finished,
                    reconciled: ReconcileReport::default(),
                })
            }
            Err(e) => return Err(e).context("Failed to connect to broker"),
        };

        self.state = LoopState::Polling;
        let result = self.poll(&mut session).await;

        if let Err(e) = session.close().await {
            warn!("Failed to release broker session: {}", e);
        }

        result
    }

    async fn poll(&self, session: &mut B::Session) -> Result<TickReport> {
        let config = &self.config;
        let mut ledger = OpenTradeLedger::open(&config.ledger_path).context("Failed to open ledger")?;

        let reconciled = self
            .reconciler
            .reconcile(session, &mut ledger, &self.corpus)
            .await?;
        let report = |outcome| TickReport { outcome, reconciled };

        let open = session
            .open_positions(&config.symbol, config.order_tag)
            .await
            .context("Failed to fetch open positions")?;
        if !open.is_empty() {
            debug!("Position {} still open, skipping", open[0].ticket);
            return Ok(report(TickOutcome::PositionOpen));
        }

        let now = session.clock();
        let bars = session
            .bars(&config.symbol, config.timeframe_minutes, config.history_bars)
            .await
            .context("Failed to fetch bars")?;
        let bars = closed_bars(bars, config.timeframe(), now);

        let Some(record) = self.builder.latest(&bars) else {
            debug!("{} closed bars are not enough for a full record", bars.len());
            return Ok(report(TickOutcome::InsufficientData));
        };

        let signal = self.filter.evaluate(&record);
        if signal == Signal::None {
            debug!("No signal on bar {}", record.bar.timestamp);
            return Ok(report(TickOutcome::NoSignal(signal)));
        }
        info!("{} signal on bar {}", signal, record.bar.timestamp);

        let gated = self.gate.decide(&record, signal).context("Decision gate failed")?;
        if !gated.decision.approved {
            info!(
                "Model vetoed {} signal (confidence {:.2})",
                signal, gated.decision.confidence
            );
            return Ok(report(TickOutcome::Vetoed {
                signal,
                confidence: gated.decision.confidence,
            }));
        }
        info!(
            "Model approved {} signal (confidence {:.2})",
            signal, gated.decision.confidence
        );

        let quote = session
            .quote(&config.symbol)
            .await
            .context("Failed to fetch quote")?;

        let receipt = match self.executor.execute(session, signal, &record, &quote).await {
            Ok(receipt) => receipt,
            Err(e) => {
                return Ok(report(TickOutcome::OrderRejected {
                    signal,
                    reason: e.to_string(),
                }))
            }
        };

        ledger.put(receipt.order_id, gated.snapshot).with_context(|| {
            format!(
                "Order {} is open but its snapshot could not be recorded",
                receipt.order_id
            )
        })?;

        Ok(report(TickOutcome::OrderPlaced {
            signal,
            order_id: receipt.order_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{PaperBroker, PaperConfig};
    use crate::config::StrategyConfig;
    use crate::features::test_bars::bars_from_hlc;
    use crate::strategy::gate::tests::FixedModel;
    use std::path::Path;

    const FEATURES: &[&str] = &["close", "atr", "signal"];

    /// Rising closes ending in a bullish engulfing on bar 59, then two more
    /// bars: a quiet one and one that runs through any long target.
    fn engulfing_history() -> Vec<crate::types::Bar> {
        let mut closes: Vec<f64> = (0..58).map(|i| 2000.0 + i as f64).collect();
        closes.extend([2055.0, 2060.0, 2061.0, 2100.0]);

        let hlc: Vec<(f64, f64, f64)> = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = if i == 0 { close } else { closes[i - 1] };
                (open.max(close) + 1.0, open.min(close) - 1.0, close)
            })
            .collect();
        bars_from_hlc(&hlc)
    }

    fn config(dir: &Path) -> BotConfig {
        BotConfig {
            history_bars: 100,
            ledger_path: dir.join("open_trades.json"),
            corpus_path: dir.join("executed_trades.csv"),
            poll_interval_secs: 0,
            position_poll_interval_secs: 0,
            backoff_secs: 0,
            strategy: StrategyConfig {
                ema_fast: 3,
                ema_slow: 5,
                atr_period: 4,
                proximity: 1e6,
                reward_multiple: 1.5,
            },
            ..Default::default()
        }
    }

    fn paper() -> PaperBroker {
        PaperBroker::new(
            engulfing_history(),
            PaperConfig {
                start_bars: 60,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_veto_places_no_order() {
        let dir = tempfile::tempdir().unwrap();
        let model = FixedModel::new(FEATURES, 0, [0.8, 0.2]);
        let mut control = ControlLoop::new(config(dir.path()), paper(), model);

        let report = control.tick().await.unwrap();
        assert_eq!(
            report.outcome,
            TickOutcome::Vetoed {
                signal: Signal::Long,
                confidence: 0.8
            }
        );
        assert_eq!(control.broker().open_position_count(), 0);
        assert!(OpenTradeLedger::open(dir.path().join("open_trades.json"))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_trade_lifecycle_feeds_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let model = FixedModel::new(FEATURES, 1, [0.1, 0.9]);
        let mut control = ControlLoop::new(config(dir.path()), paper(), model);

        // bar 59: engulfing, approved
        let first = control.tick().await.unwrap();
        let TickOutcome::OrderPlaced { signal, order_id } = first.outcome else {
            panic!("expected an order, got {:?}", first.outcome);
        };
        assert_eq!(signal, Signal::Long);
        let ledger = OpenTradeLedger::open(dir.path().join("open_trades.json")).unwrap();
        assert_eq!(ledger.get(order_id).unwrap().get("signal"), Some(&1.0));

        // bar 60: position still open, nothing evaluated
        let second = control.tick().await.unwrap();
        assert_eq!(second.outcome, TickOutcome::PositionOpen);
        assert_eq!(control.broker().open_position_count(), 1);

        // bar 61 hits the target; this tick labels it
        let third = control.tick().await.unwrap();
        assert_eq!(third.reconciled.labeled_wins, 1);
        assert_eq!(third.outcome, TickOutcome::NoSignal(Signal::None));

        let corpus = TrainingCorpus::new(dir.path().join("executed_trades.csv"));
        assert_eq!(corpus.row_count().unwrap(), 1);
        assert!(OpenTradeLedger::open(dir.path().join("open_trades.json"))
            .unwrap()
            .is_empty());

        let fourth = control.tick().await.unwrap();
        assert_eq!(fourth.outcome, TickOutcome::Finished);
        assert_eq!(control.broker().session_counts(), (3, 3));
    }

    #[tokio::test]
    async fn test_run_folds_stats_until_replay_ends() {
        let dir = tempfile::tempdir().unwrap();
        let model = FixedModel::new(FEATURES, 1, [0.1, 0.9]);
        let mut control = ControlLoop::new(config(dir.path()), paper(), model);

        let stats = control.run(std::future::pending()).await;
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.orders, 1);
        assert_eq!(stats.labeled_wins, 1);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_connection_failures_back_off_and_recover() {
        let dir = tempfile::tempdir().unwrap();
        let model = FixedModel::new(FEATURES, 0, [0.8, 0.2]);
        let broker = paper();
        broker.fail_next_connects(2);
        let mut control = ControlLoop::new(config(dir.path()), broker, model);

        let stats = control.run_iterations(3).await;
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.vetoes, 1);
        assert_eq!(control.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn test_schema_mismatch_fails_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let model = FixedModel::new(&["close", "rsi14"], 1, [0.0, 1.0]);
        let mut control = ControlLoop::new(config(dir.path()), paper(), model);

        let err = control.tick().await.unwrap_err();
        assert!(format!("{:#}", err).contains("rsi14"));
        assert_eq!(control.broker().open_position_count(), 0);
        // session was still released
        assert_eq!(control.broker().session_counts(), (1, 1));
    }

    #[tokio::test]
    async fn test_broker_rejection_is_an_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let model = FixedModel::new(FEATURES, 1, [0.1, 0.9]);
        let broker = paper();
        broker.reject_orders(Some((10019, "No money".to_string())));
        let mut control = ControlLoop::new(config(dir.path()), broker, model);

        let report = control.tick().await.unwrap();
        assert!(matches!(report.outcome, TickOutcome::OrderRejected { .. }));
        assert!(OpenTradeLedger::open(dir.path().join("open_trades.json"))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let dir = tempfile::tempdir().unwrap();
        let model = FixedModel::new(FEATURES, 0, [0.8, 0.2]);
        let mut control = ControlLoop::new(config(dir.path()), paper(), model);

        let stats = control.run(async {}).await;
        assert_eq!(stats.ticks, 1);
    }

    #[test]
    fn test_stats_fold() {
        let placed = TickReport {
            outcome: TickOutcome::OrderPlaced {
                signal: Signal::Short,
                order_id: 1,
            },
            reconciled: ReconcileReport {
                scanned: 1,
                matched: 1,
                deferred: 0,
                labeled_wins: 0,
                labeled_losses: 1,
            },
        };
        let stats = RunStats::default().absorb(&placed).failed();
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.orders, 1);
        assert_eq!(stats.labeled_losses, 1);
        assert_eq!(stats.errors, 1);
    }
}
