//! Outcome Reconciler
//!
//! Matches closed positions from the broker's deal history against the
//! open-trade ledger, labels each with its realized outcome, appends the
//! labeled snapshot to the training corpus and only then prunes the ledger.
//! A crash between the two steps can at worst duplicate a corpus row; it can
//! never lose a label.

use anyhow::{Context, Result};
use chrono::Duration;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::broker::{BrokerSession, ClosedDeal};
use crate::model::WIN_LABEL;
use crate::store::{OpenTradeLedger, TrainingCorpus};

/// Result of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Closing deals returned by the broker
    pub scanned: usize,
    /// Ledger entries labeled and removed
    pub matched: usize,
    /// Ledgered positions with closing deals that are still open
    pub deferred: usize,
    pub labeled_wins: usize,
    pub labeled_losses: usize,
}

/// Net realized result per position over all its closing deals
pub fn net_by_position(deals: &[ClosedDeal]) -> BTreeMap<u64, f64> {
    let mut totals = BTreeMap::new();
    for deal in deals {
        *totals.entry(deal.position_id).or_insert(0.0) += deal.net_profit();
    }
    totals
}

pub struct OutcomeReconciler {
    symbol: String,
    tag: i64,
    lookback: Duration,
    /// Corpus column order for a fresh corpus (the model's input order)
    schema: Vec<String>,
}

impl OutcomeReconciler {
    pub fn new(symbol: impl Into<String>, tag: i64, lookback: Duration, schema: Vec<String>) -> Self {
        Self {
            symbol: symbol.into(),
            tag,
            lookback,
            schema,
        }
    }

    pub async fn reconcile<S: BrokerSession>(
        &self,
        session: &mut S,
        ledger: &mut OpenTradeLedger,
        corpus: &TrainingCorpus,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        if ledger.is_empty() {
            return Ok(report);
        }

        let to = session.clock();
        let from = to - self.lookback;
        let deals = session
            .closed_deals(from, to, self.tag)
            .await
            .context("Failed to fetch closed deals")?;
        report.scanned = deals.len();

        // A partial close leaves the position open; label only the final outcome
        let open: BTreeSet<u64> = session
            .open_positions(&self.symbol, self.tag)
            .await
            .context("Failed to fetch open positions")?
            .iter()
            .map(|p| p.ticket)
            .collect();

        for (position_id, net) in net_by_position(&deals) {
            let Some(snapshot) = ledger.get(position_id) else {
                continue;
            };
            if open.contains(&position_id) {
                debug!("Order {} partially closed ({:+.2}), still open", position_id, net);
                report.deferred += 1;
                continue;
            }

            let target = if net > 0.0 { WIN_LABEL } else { 0 };
            let schema: Vec<String> = if self.schema.is_empty() {
                snapshot.keys().cloned().collect()
            } else {
                self.schema.clone()
            };

            corpus
                .append(&schema, snapshot, target)
                .with_context(|| format!("Failed to append outcome of order {}", position_id))?;
            ledger
                .remove(position_id)
                .with_context(|| format!("Failed to remove order {} from the ledger", position_id))?;

            info!("Order {} closed with {:+.2}, labeled {}", position_id, net, target);
            report.matched += 1;
            if target == WIN_LABEL {
                report.labeled_wins += 1;
            } else {
                report.labeled_losses += 1;
            }
        }

        debug!(
            "Reconciled {} of {} closing deals ({} still open in ledger)",
            report.matched,
            report.scanned,
            ledger.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, OpenPosition, PaperBroker, PaperConfig};
    use crate::features::test_bars::hourly_bars;
    use crate::strategy::FeatureSnapshot;
    use crate::types::Direction;
    use chrono::{TimeZone, Utc};

    const TAG: i64 = 123456;

    fn deal(ticket: u64, position_id: u64, profit: f64) -> ClosedDeal {
        ClosedDeal {
            ticket,
            position_id,
            symbol: "XAUUSD".to_string(),
            tag: TAG,
            profit,
            commission: 0.0,
            swap: 0.0,
            fee: 0.0,
            time: Utc.with_ymd_and_hms(2024, 3, 4, 3, 0, 0).unwrap(),
        }
    }

    fn snapshot() -> FeatureSnapshot {
        [("close", 2000.0), ("signal", 1.0)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    fn broker() -> PaperBroker {
        PaperBroker::new(
            hourly_bars(5),
            PaperConfig {
                start_bars: 5,
                ..Default::default()
            },
        )
    }

    fn reconciler() -> OutcomeReconciler {
        OutcomeReconciler::new("XAUUSD", TAG, Duration::days(7), vec!["signal".to_string(), "close".to_string()])
    }

    #[tokio::test]
    async fn test_losing_trade_is_labeled_and_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = OpenTradeLedger::open(dir.path().join("open_trades.json")).unwrap();
        let corpus = TrainingCorpus::new(dir.path().join("executed_trades.csv"));
        ledger.put(42, snapshot()).unwrap();

        let mut broker = broker();
        broker.push_closed_deal(deal(100, 42, -5.0));
        let mut session = broker.connect().await.unwrap();

        let report = reconciler().reconcile(&mut session, &mut ledger, &corpus).await.unwrap();
        assert_eq!(report.matched, 1);
        assert_eq!(report.labeled_losses, 1);
        assert!(!ledger.contains(42));
        assert!(OpenTradeLedger::open(ledger.path()).unwrap().is_empty());

        let text = std::fs::read_to_string(corpus.path()).unwrap();
        assert_eq!(text, "signal,close,target\n1,2000,0\n");
    }

    #[tokio::test]
    async fn test_second_pass_adds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = OpenTradeLedger::open(dir.path().join("l.json")).unwrap();
        let corpus = TrainingCorpus::new(dir.path().join("c.csv"));
        ledger.put(42, snapshot()).unwrap();

        let mut broker = broker();
        broker.push_closed_deal(deal(100, 42, 8.0));
        let mut session = broker.connect().await.unwrap();

        let first = reconciler().reconcile(&mut session, &mut ledger, &corpus).await.unwrap();
        let second = reconciler().reconcile(&mut session, &mut ledger, &corpus).await.unwrap();
        assert_eq!(first.labeled_wins, 1);
        assert_eq!(second, ReconcileReport::default());
        assert_eq!(corpus.row_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_ledger_leaves_corpus_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = OpenTradeLedger::open(dir.path().join("l.json")).unwrap();
        let corpus = TrainingCorpus::new(dir.path().join("c.csv"));

        let mut broker = broker();
        let mut session = broker.connect().await.unwrap();
        let report = reconciler().reconcile(&mut session, &mut ledger, &corpus).await.unwrap();

        assert_eq!(report, ReconcileReport::default());
        assert!(!corpus.path().exists());
        assert!(!ledger.path().exists());
    }

    #[tokio::test]
    async fn test_partial_closes_aggregate_and_foreign_positions_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = OpenTradeLedger::open(dir.path().join("l.json")).unwrap();
        let corpus = TrainingCorpus::new(dir.path().join("c.csv"));
        ledger.put(42, snapshot()).unwrap();
        ledger.put(43, snapshot()).unwrap();

        let mut broker = broker();
        // +3 then -4: net loss
        broker.push_closed_deal(deal(100, 42, 3.0));
        broker.push_closed_deal(deal(101, 42, -4.0));
        broker.push_closed_deal(deal(102, 99, 50.0));
        let mut session = broker.connect().await.unwrap();

        let report = reconciler().reconcile(&mut session, &mut ledger, &corpus).await.unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.matched, 1);
        assert_eq!(report.labeled_losses, 1);
        // 43 has not closed yet
        assert!(ledger.contains(43));
    }

    #[tokio::test]
    async fn test_partially_closed_position_waits_for_final_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = OpenTradeLedger::open(dir.path().join("l.json")).unwrap();
        let corpus = TrainingCorpus::new(dir.path().join("c.csv"));
        ledger.put(42, snapshot()).unwrap();

        let mut broker = broker();
        broker.push_position(OpenPosition {
            ticket: 42,
            symbol: "XAUUSD".to_string(),
            tag: TAG,
            direction: Direction::Long,
            volume: 0.01,
            price_open: 2000.0,
            stop_loss: 1.0,
            take_profit: 1_000_000.0,
        });
        broker.push_closed_deal(deal(100, 42, 3.0));
        let mut session = broker.connect().await.unwrap();

        let report = reconciler().reconcile(&mut session, &mut ledger, &corpus).await.unwrap();
        assert_eq!(report.matched, 0);
        assert_eq!(report.deferred, 1);
        assert!(ledger.contains(42));
        assert!(!corpus.path().exists());
    }
}
