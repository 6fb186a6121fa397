//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::caching_backend::CachingBackend;
use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::memory_backend::InMemoryBackend;
use crate::adapters::tracing_event_sink::TracingEventSink;
use crate::domain::aggregator::{reproject, validate_contiguity};
use crate::domain::backtest::{BacktestConfig, Backtester, DEFAULT_FEE};
use crate::domain::candle::Candle;
use crate::domain::config_validation::{
    parse_seed, parse_time, validate_backtest_config, validate_optimizer_config, validate_strategy_config,
};
use crate::domain::error::{ResultExt, TraderError};
use crate::domain::metrics::BacktestResults;
use crate::domain::models::{StrategyState, TradingState};
use crate::domain::optimizer::{GeneticOptimizer, GenomeFactory, Individual, OptimizerConfig};
use crate::domain::strategy::{
    EmaCrossover, Genome, RsiThreshold, StrategyKind, S1, EMA_CROSSOVER_TAG, RSI_TAG, S1_TAG,
};
use crate::ports::config_port::ConfigPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "tradecore", about = "Candle-driven strategy backtester and optimizer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a strategy over historical candles
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Tick ledger CSV; written to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Slippage RNG seed, overriding [backtest] seed
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Search strategy parameters with a genetic algorithm
    Optimize {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Check a candle file for gaps at the configured tick size
    CheckCandles {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest { config, output, seed } => run_backtest(&config, output.as_deref(), seed),
        Command::Optimize { config } => run_optimize(&config),
        Command::CheckCandles { config } => run_check_candles(&config),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, TraderError> {
    eprintln!("Loading config from {}", path.display());
    FileConfigAdapter::from_file(path)
}

fn run_backtest(config_path: &Path, output: Option<&Path>, seed: Option<u64>) -> Result<(), TraderError> {
    let adapter = load_config(config_path)?;
    validate_backtest_config(&adapter)?;
    validate_strategy_config(&adapter, true)?;

    let strategy = build_strategy(&adapter)?;
    eprintln!("Strategy: {strategy}");
    let bt_config = build_backtest_config(&adapter)?;
    let mut state = build_strategy_state(&adapter)?;
    state.set_strategy(&strategy)?;

    let backend = load_candles(&adapter, config_path)?;
    let rng = match seed.or(parse_seed(&adapter, "backtest")?) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut backtester = Backtester::new(bt_config, state, backend)?.with_event_sink(Box::new(TracingEventSink));
    backtester.run(rng)?;
    print_results(&backtester.results());

    match output {
        Some(path) => {
            let path = path.to_string_lossy();
            CsvReportAdapter.write(backtester.ledger(), backtester.indicator_names(), &path)?;
            eprintln!("Ledger written to {path}");
        }
        None => print!("{}", backtester.results_csv()?),
    }
    Ok(())
}

fn run_optimize(config_path: &Path) -> Result<(), TraderError> {
    let adapter = load_config(config_path)?;
    validate_backtest_config(&adapter)?;
    validate_strategy_config(&adapter, false)?;
    validate_optimizer_config(&adapter)?;

    let bt_config = build_backtest_config(&adapter)?;
    let state = build_strategy_state(&adapter)?;
    let opt_config = build_optimizer_config(&adapter)?;
    let backend = Arc::new(CachingBackend::new(load_candles(&adapter, config_path)?));

    let kind = adapter.get_string("strategy", "kind").unwrap_or_default();
    let (best, fitness) = match kind.trim() {
        EMA_CROSSOVER_TAG => optimize::<EmaCrossover>(bt_config, state, backend, opt_config)?,
        RSI_TAG => optimize::<RsiThreshold>(bt_config, state, backend, opt_config)?,
        S1_TAG => optimize::<S1>(bt_config, state, backend, opt_config)?,
        other => return Err(TraderError::UnknownStrategyKind { kind: other.to_string() }),
    };

    eprintln!("\nBest strategy: {best}");
    eprintln!("Fitness:       {fitness:.6}");
    println!("[strategy]\nkind = {}\n{}", best.tag(), best.to_blob()?);
    Ok(())
}

fn optimize<G>(
    bt_config: BacktestConfig,
    state: StrategyState,
    backend: Arc<CachingBackend<InMemoryBackend>>,
    opt_config: OptimizerConfig,
) -> Result<(StrategyKind, f64), TraderError>
where
    G: Genome + Into<StrategyKind> + fmt::Display,
{
    let generations = opt_config.generations;
    let factory = GenomeFactory::<G, _>::new(bt_config, state, backend)?;
    let Individual { genome, fitness } = GeneticOptimizer::new(factory, opt_config)?.run(|generation, best, description| {
        eprintln!("[{}/{}] best fitness {:.6}: {}", generation + 1, generations, best, description);
    })?;
    Ok((genome.into(), fitness))
}

fn run_check_candles(config_path: &Path) -> Result<(), TraderError> {
    let adapter = load_config(config_path)?;
    let product = adapter.get_string("backtest", "product").ok_or_else(|| TraderError::ConfigMissing {
        section: "backtest".into(),
        key: "product".into(),
    })?;
    let tick = tick_size_minutes(&adapter)?;
    let candles = CsvAdapter::new(candles_path(&adapter, config_path)?).load(product.trim())?;
    let first = candles.first().ok_or(TraderError::EmptyInput).context("no candles in file")?;
    let source_minutes = source_granularity(first)?;

    eprintln!("Candles:    {}", candles.len());
    eprintln!("Range:      {} .. {}", first.start, candles.last().map_or(first.end, |c| c.end));
    eprintln!("Source:     {source_minutes} minute candles");
    validate_contiguity(&candles, source_minutes).context("source candles are not contiguous")?;

    let reprojected = reproject(&candles, tick)?;
    let empty = reprojected.iter().filter(|c| !c.has_trades()).count();
    eprintln!("Reprojected: {} candles of {tick} minutes, {empty} without trades", reprojected.len());
    Ok(())
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, TraderError> {
    let start = parse_time(adapter, "backtest", "start_time")?;
    let end = parse_time(adapter, "backtest", "end_time")?;
    let mut config = BacktestConfig::new(start, end);
    config.fee = adapter.get_double("backtest", "fee", DEFAULT_FEE);
    config.max_slippage = adapter.get_double("backtest", "max_slippage", 0.0);
    Ok(config)
}

/// Initial state of the strategy under test, without strategy parameters.
pub fn build_strategy_state(adapter: &dyn ConfigPort) -> Result<StrategyState, TraderError> {
    let product = adapter.get_string("backtest", "product").ok_or_else(|| TraderError::ConfigMissing {
        section: "backtest".into(),
        key: "product".into(),
    })?;
    let initial_budget = adapter.get_double("backtest", "initial_budget", 100.0);
    let history_ticks = adapter.get_int("backtest", "history_ticks", 1000);
    Ok(StrategyState {
        id: 0,
        product: product.trim().to_string(),
        state: TradingState::TryingToBuy,
        initial_budget,
        budget: initial_budget,
        budget_currency: string_or(adapter, "budget_currency", "USD"),
        invested: 0.0,
        invested_currency: string_or(adapter, "invested_currency", "BTC"),
        tick_size_minutes: tick_size_minutes(adapter)?,
        history_ticks: u32::try_from(history_ticks).map_err(|_| invalid("backtest", "history_ticks"))?,
        next_tick_at: None,
        last_tick_at: None,
        deactivated_at: None,
        strategy_kind: String::new(),
        strategy_data: String::new(),
    })
}

/// Strategy described by the `[strategy]` section.
pub fn build_strategy(adapter: &dyn ConfigPort) -> Result<StrategyKind, TraderError> {
    let kind = adapter.get_string("strategy", "kind").unwrap_or_default();
    let threshold = |key: &str| adapter.get_double("strategy", key, 0.0);
    let strategy = match kind.trim() {
        EMA_CROSSOVER_TAG => StrategyKind::EmaCrossover(EmaCrossover {
            short_period: period(adapter, "short_period")?,
            long_period: period(adapter, "long_period")?,
            up_threshold: threshold("up_threshold"),
            down_threshold: threshold("down_threshold"),
        }),
        RSI_TAG => StrategyKind::Rsi(RsiThreshold {
            period: period(adapter, "period")?,
            buy_threshold: threshold("buy_threshold"),
            sell_threshold: threshold("sell_threshold"),
        }),
        S1_TAG => StrategyKind::S1(S1 {
            ema_short_period: period(adapter, "ema_short_period")?,
            ema_long_period: period(adapter, "ema_long_period")?,
            ema_up_threshold: threshold("ema_up_threshold"),
            ema_down_threshold: threshold("ema_down_threshold"),
            rsi_exit_threshold: threshold("rsi_exit_threshold"),
            rsi_entrance_threshold: threshold("rsi_entrance_threshold"),
        }),
        other => return Err(TraderError::UnknownStrategyKind { kind: other.to_string() }),
    };
    Ok(strategy)
}

pub fn build_optimizer_config(adapter: &dyn ConfigPort) -> Result<OptimizerConfig, TraderError> {
    let defaults = OptimizerConfig::default();
    let count = |key: &str, default: usize| {
        let value = adapter.get_int("optimizer", key, default as i64);
        usize::try_from(value).map_err(|_| invalid("optimizer", key))
    };
    let config = OptimizerConfig {
        generations: count("generations", defaults.generations)?,
        population_size: count("population_size", defaults.population_size)?,
        mutation_rate: adapter.get_double("optimizer", "mutation_rate", defaults.mutation_rate),
        tournament_size: count("tournament_size", defaults.tournament_size)?,
        seed: parse_seed(adapter, "optimizer")?.unwrap_or(defaults.seed),
    };
    config.validate()?;
    Ok(config)
}

/// Candles named by `[backtest] candles`, loaded into a fresh in-memory
/// backend. Relative paths resolve against the config file's directory.
pub fn load_candles(adapter: &dyn ConfigPort, config_path: &Path) -> Result<InMemoryBackend, TraderError> {
    let product = adapter.get_string("backtest", "product").unwrap_or_default();
    let path = candles_path(adapter, config_path)?;
    eprintln!("Loading candles from {}", path.display());
    let candles = CsvAdapter::new(&path).load(product.trim())?;
    eprintln!("Loaded {} candles for {}", candles.len(), product.trim());
    InMemoryBackend::with_candles(candles)
}

fn candles_path(adapter: &dyn ConfigPort, config_path: &Path) -> Result<PathBuf, TraderError> {
    let candles = adapter
        .get_string("backtest", "candles")
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| TraderError::ConfigMissing {
            section: "backtest".into(),
            key: "candles".into(),
        })?;
    let path = PathBuf::from(candles.trim());
    if path.is_relative() {
        if let Some(dir) = config_path.parent() {
            return Ok(dir.join(path));
        }
    }
    Ok(path)
}

fn source_granularity(candle: &Candle) -> Result<u32, TraderError> {
    u32::try_from((candle.end - candle.start).num_minutes())
        .ok()
        .filter(|m| *m > 0)
        .ok_or_else(|| TraderError::ConfigInvalid {
            section: "backtest".into(),
            key: "candles".into(),
            reason: format!("candle at {} is shorter than a minute", candle.start),
        })
}

fn print_results(results: &BacktestResults) {
    eprintln!("\nBacktest results");
    eprintln!(
        "  Budget:          {:.6} -> {:.6} {}",
        results.initial_budget, results.final_budget, results.budget_currency
    );
    eprintln!(
        "  {} price:     {:.6} -> {:.6}",
        results.trade_currency, results.initial_currency_price, results.final_currency_price
    );
    eprintln!("  Net profit:      {:.6}", results.net_profit());
    eprintln!("  Gross profit:    {:.6}", results.gross_profit);
    eprintln!("  Gross loss:      {:.6}", results.gross_loss);
    eprintln!("  Trades:          {} won, {} lost", results.profit_trades, results.loss_trades);
    eprintln!("  Profit factor:   {:.6}", results.profit_factor());
    eprintln!("  Expected payoff: {:.6}", results.expected_payoff());
    eprintln!("  Sharpe ratio:    {:.6}", results.sharpe_ratio());
}

fn tick_size_minutes(adapter: &dyn ConfigPort) -> Result<u32, TraderError> {
    u32::try_from(adapter.get_int("backtest", "tick_size_minutes", 15))
        .ok()
        .filter(|t| *t > 0)
        .ok_or_else(|| invalid("backtest", "tick_size_minutes"))
}

fn period(adapter: &dyn ConfigPort, key: &str) -> Result<u32, TraderError> {
    u32::try_from(adapter.get_int("strategy", key, 0))
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| invalid("strategy", key))
}

fn string_or(adapter: &dyn ConfigPort, key: &str, default: &str) -> String {
    adapter
        .get_string("backtest", key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn invalid(section: &str, key: &str) -> TraderError {
    TraderError::ConfigInvalid {
        section: section.into(),
        key: key.into(),
        reason: format!("{key} is out of range"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    const BACKTEST: &str = "[backtest]
product = ETH-USD
start_time = 2024-01-01T00:00:00Z
end_time = 2024-01-02T00:00:00Z
initial_budget = 250
budget_currency = EUR
invested_currency = ETH
tick_size_minutes = 30
history_ticks = 48
fee = 0.001
max_slippage = 0.01
candles = candles.csv
";

    mod builders {
        use super::*;

        #[test]
        fn backtest_config_reads_window_and_costs() {
            let bt = build_backtest_config(&config(BACKTEST)).unwrap();
            assert_eq!(bt.start.to_rfc3339(), "2024-01-01T00:00:00+00:00");
            assert_eq!(bt.end.to_rfc3339(), "2024-01-02T00:00:00+00:00");
            assert_eq!(bt.fee, 0.001);
            assert_eq!(bt.max_slippage, 0.01);
        }

        #[test]
        fn backtest_config_defaults_costs() {
            let bt = build_backtest_config(&config(
                "[backtest]\nstart_time = 2024-01-01T00:00:00Z\nend_time = 2024-01-02T00:00:00Z\n",
            ))
            .unwrap();
            assert_eq!(bt.fee, DEFAULT_FEE);
            assert_eq!(bt.max_slippage, 0.0);
        }

        #[test]
        fn strategy_state_from_backtest_section() {
            let state = build_strategy_state(&config(BACKTEST)).unwrap();
            assert_eq!(state.product, "ETH-USD");
            assert_eq!(state.state, TradingState::TryingToBuy);
            assert_eq!(state.initial_budget, 250.0);
            assert_eq!(state.budget, 250.0);
            assert_eq!(state.invested, 0.0);
            assert_eq!(state.budget_currency, "EUR");
            assert_eq!(state.invested_currency, "ETH");
            assert_eq!(state.tick_size_minutes, 30);
            assert_eq!(state.history_ticks, 48);
            assert!(state.is_active());
        }

        #[test]
        fn strategy_state_defaults() {
            let state = build_strategy_state(&config("[backtest]\nproduct = BTC-USD\n")).unwrap();
            assert_eq!(state.budget, 100.0);
            assert_eq!(state.budget_currency, "USD");
            assert_eq!(state.invested_currency, "BTC");
            assert_eq!(state.tick_size_minutes, 15);
            assert_eq!(state.history_ticks, 1000);
        }

        #[test]
        fn each_strategy_kind_builds() {
            let ema = build_strategy(&config(
                "[strategy]\nkind = ema-crossover\nshort_period = 5\nlong_period = 10\n\
                 up_threshold = 0.001\ndown_threshold = -0.001\n",
            ))
            .unwrap();
            assert_eq!(
                ema,
                StrategyKind::EmaCrossover(EmaCrossover {
                    short_period: 5,
                    long_period: 10,
                    up_threshold: 0.001,
                    down_threshold: -0.001,
                })
            );

            let rsi = build_strategy(&config(
                "[strategy]\nkind = rsi\nperiod = 14\nbuy_threshold = 30\nsell_threshold = 70\n",
            ))
            .unwrap();
            assert_eq!(rsi.tag(), RSI_TAG);

            let s1 = build_strategy(&config(
                "[strategy]\nkind = s1\nema_short_period = 3\nema_long_period = 6\n\
                 ema_up_threshold = 0.002\nema_down_threshold = -0.002\n\
                 rsi_exit_threshold = 80\nrsi_entrance_threshold = 20\n",
            ))
            .unwrap();
            assert_eq!(s1.tag(), S1_TAG);
        }

        #[test]
        fn unknown_kind_is_rejected() {
            let err = build_strategy(&config("[strategy]\nkind = macd\n")).unwrap_err();
            assert!(matches!(err, TraderError::UnknownStrategyKind { ref kind } if kind == "macd"));
        }

        #[test]
        fn optimizer_config_defaults_and_overrides() {
            let defaults = build_optimizer_config(&config("[optimizer]\n")).unwrap();
            assert_eq!(defaults, OptimizerConfig::default());

            let custom = build_optimizer_config(&config(
                "[optimizer]\ngenerations = 4\npopulation_size = 6\nmutation_rate = 0.2\n\
                 tournament_size = 2\nseed = 9\n",
            ))
            .unwrap();
            assert_eq!(custom.generations, 4);
            assert_eq!(custom.population_size, 6);
            assert_eq!(custom.mutation_rate, 0.2);
            assert_eq!(custom.tournament_size, 2);
            assert_eq!(custom.seed, 9);
        }

        #[test]
        fn optimizer_config_rejects_negative_counts() {
            let err = build_optimizer_config(&config("[optimizer]\ngenerations = -1\n")).unwrap_err();
            assert!(matches!(err, TraderError::ConfigInvalid { .. }));
        }
    }

    mod paths {
        use super::*;

        #[test]
        fn relative_candles_resolve_against_config_dir() {
            let path = candles_path(&config(BACKTEST), Path::new("/data/runs/btc.ini")).unwrap();
            assert_eq!(path, PathBuf::from("/data/runs/candles.csv"));
        }

        #[test]
        fn absolute_candles_are_kept() {
            let adapter = config("[backtest]\ncandles = /srv/candles.csv\n");
            let path = candles_path(&adapter, Path::new("/data/runs/btc.ini")).unwrap();
            assert_eq!(path, PathBuf::from("/srv/candles.csv"));
        }

        #[test]
        fn missing_candles_key() {
            let err = candles_path(&config("[backtest]\n"), Path::new("x.ini")).unwrap_err();
            assert!(matches!(err, TraderError::ConfigMissing { .. }));
        }
    }

    mod granularity {
        use super::*;
        use chrono::{Duration, TimeZone, Utc};

        fn candle(seconds: i64) -> Candle {
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            Candle::new("BTC-USD", start, start + Duration::seconds(seconds), 1.0, 1.0, 1.0, 1.0, 1.0)
        }

        #[test]
        fn minutes_between_start_and_end() {
            assert_eq!(source_granularity(&candle(900)).unwrap(), 15);
        }

        #[test]
        fn sub_minute_candle_is_invalid_candle_file() {
            for seconds in [0, 30, -60] {
                let err = source_granularity(&candle(seconds)).unwrap_err();
                assert!(matches!(
                    &err,
                    TraderError::ConfigInvalid { section, key, .. } if section == "backtest" && key == "candles"
                ));
                assert_eq!(format!("{:?}", ExitCode::from(&err)), format!("{:?}", ExitCode::from(2)));
            }
        }
    }
}
