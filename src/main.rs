use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::oneshot;
use tracing::{info, warn};

use pivot_gate::broker::{Broker, BrokerSession, PaperBroker, PaperConfig};
use pivot_gate::config::{BotConfig, ExecutionMode, StrategyConfig};
use pivot_gate::control::ControlLoop;
use pivot_gate::features::IndicatorPeriods;
use pivot_gate::gateway::GatewayClient;
use pivot_gate::model::{Classifier, ForestModel};
use pivot_gate::reconcile::OutcomeReconciler;
use pivot_gate::store::{OpenTradeLedger, TrainingCorpus};
use pivot_gate::strategy::{DecisionGate, SIGNAL_FEATURE};

#[derive(Parser, Debug)]
#[command(name = "pivot-gate")]
#[command(about = "Pivot/candle signals gated by a classifier, with outcome feedback for retraining")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Symbol to trade
    #[arg(long, global = true, env = "PIVOT_SYMBOL", default_value = "XAUUSD")]
    symbol: String,

    /// Tag (magic number) identifying this bot's orders
    #[arg(long, global = true, env = "PIVOT_ORDER_TAG", default_value = "123456")]
    tag: i64,

    /// Model artifact
    #[arg(long, global = true, env = "PIVOT_MODEL", default_value = "model.json")]
    model: PathBuf,

    /// Open-trade ledger
    #[arg(long, global = true, env = "PIVOT_LEDGER", default_value = "open_trades.json")]
    ledger: PathBuf,

    /// Training corpus
    #[arg(long, global = true, env = "PIVOT_CORPUS", default_value = "executed_trades.csv")]
    corpus: PathBuf,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the trading loop
    Run {
        /// paper or live
        #[arg(long, env = "PIVOT_MODE", default_value = "paper")]
        mode: ExecutionMode,

        /// Bar CSV to replay in paper mode
        #[arg(long)]
        bars: Option<PathBuf>,

        /// Stop after this many iterations
        #[arg(long)]
        max_iterations: Option<u64>,

        /// Order volume in lots
        #[arg(long, default_value = "0.01")]
        volume: f64,

        /// Bar timeframe in minutes
        #[arg(long, default_value = "60")]
        timeframe: u32,

        /// Bars requested per iteration
        #[arg(long, default_value = "300")]
        history: usize,

        /// Seconds between iterations while flat
        #[arg(long, default_value = "60")]
        poll_interval: u64,

        /// Seconds between iterations while a position is open
        #[arg(long, default_value = "300")]
        position_poll_interval: u64,

        /// Seconds to wait after a failed iteration
        #[arg(long, default_value = "60")]
        backoff: u64,

        /// Pivot proximity tolerance in ATR multiples
        #[arg(long, default_value = "0.5")]
        proximity: f64,

        /// Take-profit distance in stop distances
        #[arg(long, default_value = "1.5")]
        reward: f64,
    },

    /// Run one reconciliation pass against the live broker and exit
    Reconcile {
        /// Days of deal history to scan
        #[arg(long, default_value = "7")]
        lookback_days: i64,
    },

    /// Show open trades in the ledger and the corpus size
    Status,

    /// Load the model and check its schema against the feature builder
    CheckModel,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("pivot_gate={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = BotConfig {
        symbol: args.symbol.clone(),
        order_tag: args.tag,
        model_path: args.model.clone(),
        ledger_path: args.ledger.clone(),
        corpus_path: args.corpus.clone(),
        ..Default::default()
    };

    match args.command {
        Commands::Run {
            mode,
            bars,
            max_iterations,
            volume,
            timeframe,
            history,
            poll_interval,
            position_poll_interval,
            backoff,
            proximity,
            reward,
        } => {
            config.mode = mode;
            config.volume = volume;
            config.timeframe_minutes = timeframe;
            config.history_bars = history;
            config.poll_interval_secs = poll_interval;
            config.position_poll_interval_secs = position_poll_interval;
            config.backoff_secs = backoff;
            config.strategy = StrategyConfig {
                proximity,
                reward_multiple: reward,
                ..Default::default()
            };
            config.validate()?;
            run(config, bars, max_iterations).await
        }
        Commands::Reconcile { lookback_days } => {
            config.reconcile_lookback_days = lookback_days;
            config.validate()?;
            reconcile_once(&config).await
        }
        Commands::Status => status(&config),
        Commands::CheckModel => check_model(&config),
    }
}

async fn run(config: BotConfig, bars: Option<PathBuf>, max_iterations: Option<u64>) -> Result<()> {
    let model = ForestModel::load(&config.model_path)?;

    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, finishing current iteration");
            let _ = tx.send(());
        }
    });
    let shutdown = async move {
        let _ = rx.await;
    };

    match config.mode {
        ExecutionMode::Paper => {
            let Some(path) = bars else {
                bail!("paper mode needs --bars <csv>");
            };
            let broker = PaperBroker::from_csv(
                &path,
                PaperConfig {
                    start_bars: config.history_bars,
                    timeframe: config.timeframe(),
                    ..Default::default()
                },
            )?;
            drive(ControlLoop::new(config, broker, model), max_iterations, shutdown).await;
        }
        ExecutionMode::Live => {
            let broker = GatewayClient::from_env()?;
            info!("Using MT5 gateway at {}", broker.base_url());
            drive(ControlLoop::new(config, broker, model), max_iterations, shutdown).await;
        }
    }

    Ok(())
}

async fn drive<B: Broker, C: Classifier>(
    control: ControlLoop<B, C>,
    max_iterations: Option<u64>,
    shutdown: impl std::future::Future<Output = ()>,
) {
    let mut control = match max_iterations {
        Some(n) => control.with_max_iterations(n),
        None => control,
    };
    let stats = control.run(shutdown).await;
    println!("{}", stats);
}

async fn reconcile_once(config: &BotConfig) -> Result<()> {
    let schema = match ForestModel::load(&config.model_path) {
        Ok(model) => model.feature_names().to_vec(),
        Err(e) => {
            warn!("No model schema ({}); new corpus columns follow the snapshot", e);
            Vec::new()
        }
    };

    let mut ledger = OpenTradeLedger::open(&config.ledger_path)?;
    let corpus = TrainingCorpus::new(&config.corpus_path);
    let reconciler = OutcomeReconciler::new(
        config.symbol.clone(),
        config.order_tag,
        config.reconcile_lookback(),
        schema,
    );

    let mut broker = GatewayClient::from_env()?;
    let mut session = broker.connect().await.context("Failed to connect to MT5 gateway")?;
    let result = reconciler.reconcile(&mut session, &mut ledger, &corpus).await;
    if let Err(e) = session.close().await {
        warn!("Failed to release broker session: {}", e);
    }

    let report = result?;
    println!(
        "Scanned {} closing deals, labeled {} ({} wins, {} losses); {} trades still open",
        report.scanned,
        report.matched,
        report.labeled_wins,
        report.labeled_losses,
        ledger.len()
    );
    Ok(())
}

fn status(config: &BotConfig) -> Result<()> {
    let ledger = OpenTradeLedger::open(&config.ledger_path)?;
    let corpus = TrainingCorpus::new(&config.corpus_path);

    println!("Ledger {}: {} open trades", ledger.path().display(), ledger.len());
    for (order_id, snapshot) in ledger.all() {
        let signal = snapshot.get(SIGNAL_FEATURE).copied().unwrap_or(0.0);
        let close = snapshot.get("close").copied().unwrap_or(f64::NAN);
        println!(
            "  order {:>12}  signal {:+}  close {:.2}  ({} features)",
            order_id,
            signal,
            close,
            snapshot.len()
        );
    }
    println!(
        "Corpus {}: {} labeled rows",
        corpus.path().display(),
        corpus.row_count()?
    );
    Ok(())
}

fn check_model(config: &BotConfig) -> Result<()> {
    let model = ForestModel::load(&config.model_path)?;
    println!(
        "Model {}: {} trees, {} features",
        config.model_path.display(),
        model.tree_count(),
        model.feature_names().len()
    );
    let periods = IndicatorPeriods::from(&config.strategy);
    for name in model.feature_names() {
        let source = if name == SIGNAL_FEATURE {
            "signal filter"
        } else if let Some(canonical) = periods.resolve(name) {
            canonical
        } else {
            "MISSING"
        };
        println!("  {:<16} {}", name, source);
    }

    let missing = DecisionGate::new(model).missing_features(periods);
    if !missing.is_empty() {
        bail!("model needs features the builder does not produce: {}", missing.join(", "));
    }
    println!("Schema OK");
    Ok(())
}
