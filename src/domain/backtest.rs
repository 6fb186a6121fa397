//! Historical replay of a strategy against stored candles.
//!
//! A `Backtester` fetches the candles of its window (extended backwards by
//! the strategy's warm-up), computes every indicator set up front, and
//! replays the surviving candles one per tick through a
//! `TradingStateMachine` wired to a simulated exchange. Every tick that had
//! enough data leaves a `BacktestTick` row in the ledger, which feeds both
//! the metrics and the CSV export.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::{Rng, RngCore};
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info};

use crate::domain::aggregator::{bucket, reproject};
use crate::domain::candle::Candle;
use crate::domain::error::{ResultExt, TraderError};
use crate::domain::indicator::{self, Indicator, IndicatorSet};
use crate::domain::metrics::BacktestResults;
use crate::domain::models::{MarketOrder, MarketOrderFill, OrderRecord, OrderSide, StrategyState};
use crate::domain::strategy::{Strategy, StrategyKind};
use crate::domain::trader::TradingStateMachine;
use crate::ports::backend_port::Backend;
use crate::ports::clock_port::Clock;
use crate::ports::event_sink_port::{EventSink, NoopEventSink};
use crate::ports::exchange_port::Exchange;

/// Exchange fee charged on every simulated fill.
pub const DEFAULT_FEE: f64 = 0.0025;

pub const CSV_BASE_COLUMNS: [&str; 11] = [
    "start_time",
    "end_time",
    "low",
    "high",
    "open",
    "close",
    "volume",
    "bought_size",
    "sold_size",
    "budget",
    "invested",
];

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub fee: f64,
    /// Upper bound (exclusive) of the fractional price slippage per fill.
    pub max_slippage: f64,
}

impl BacktestConfig {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        BacktestConfig {
            start,
            end,
            fee: DEFAULT_FEE,
            max_slippage: 0.0,
        }
    }
}

/// One replayed tick.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestTick {
    pub time: DateTime<Utc>,
    pub candle: Candle,
    pub indicator_set: IndicatorSet,
    pub order: Option<OrderRecord>,
    pub budget: f64,
    pub invested: f64,
}

/// Feed every candle with trades to `indicators` and keep the candles
/// whose indicator set is complete. Both outputs stay index-aligned.
pub fn generate_indicator_sets(
    mut indicators: Vec<Box<dyn Indicator>>,
    candles: &[Candle],
) -> (Vec<IndicatorSet>, Vec<Candle>) {
    let mut sets = Vec::new();
    let mut valid = Vec::new();
    for candle in candles.iter().filter(|c| c.has_trades()) {
        let set = indicator::advance(&mut indicators, candle);
        if indicator::is_complete(&set) {
            sets.push(set);
            valid.push(candle.clone());
        }
    }
    (sets, valid)
}

/// Fills market orders at the close of the current replay candle, less a
/// random slippage and the exchange fee.
pub struct SimulatedExchange<'a, R> {
    candles: &'a [Candle],
    ticks: AtomicUsize,
    fee: f64,
    max_slippage: f64,
    budget_currency: String,
    invested_currency: String,
    rng: Mutex<R>,
    next_id: AtomicU64,
}

impl<'a, R: RngCore + Send> SimulatedExchange<'a, R> {
    pub fn new(candles: &'a [Candle], config: &BacktestConfig, state: &StrategyState, rng: R) -> Self {
        SimulatedExchange {
            candles,
            ticks: AtomicUsize::new(0),
            fee: config.fee,
            max_slippage: config.max_slippage,
            budget_currency: state.budget_currency.clone(),
            invested_currency: state.invested_currency.clone(),
            rng: Mutex::new(rng),
            next_id: AtomicU64::new(1),
        }
    }

    /// Move to the next replay candle.
    pub fn advance(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    fn current_candle(&self) -> Result<&Candle, TraderError> {
        self.ticks
            .load(Ordering::Relaxed)
            .checked_sub(1)
            .and_then(|i| self.candles.get(i))
            .ok_or_else(|| TraderError::Exchange {
                reason: "no current candle to fill against".into(),
            })
    }

    fn slipped_price(&self, close: f64) -> Result<f64, TraderError> {
        let mut rng = self.rng.lock().map_err(|_| TraderError::Exchange {
            reason: "slippage source poisoned".into(),
        })?;
        let u: f64 = rng.gen_range(0.0..1.0);
        Ok(close * (1.0 - u * self.max_slippage))
    }
}

impl<R: RngCore + Send> Exchange for SimulatedExchange<'_, R> {
    fn create_market_order(&self, order: &MarketOrder) -> Result<MarketOrderFill, TraderError> {
        let close = self.current_candle()?.close;
        let price = self.slipped_price(close)?;
        debug!(close, price, side = %order.side, "simulated fill price");

        let (filled_size, filled_currency, fees) = match order.side {
            OrderSide::Buy => (
                order.cost * (1.0 - self.fee) / price,
                self.invested_currency.clone(),
                order.cost * self.fee,
            ),
            OrderSide::Sell => {
                let gross = order.cost * price;
                (gross * (1.0 - self.fee), self.budget_currency.clone(), gross * self.fee)
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(MarketOrderFill {
            filled_size,
            filled_currency,
            fees,
            fees_currency: self.budget_currency.clone(),
            exchange_id: format!("backtest-{id}"),
        })
    }
}

/// Backend decorator used during a replay. Candle reads go to the wrapped
/// backend, candle writes are dropped, and orders and strategy updates are
/// captured for the current ledger row instead of being persisted.
pub struct RecordingBackend<'a> {
    inner: &'a dyn Backend,
    order: Mutex<Option<OrderRecord>>,
    update: Mutex<Option<(f64, f64)>>,
}

fn poisoned() -> TraderError {
    TraderError::Backend {
        reason: "recording backend poisoned".into(),
    }
}

impl<'a> RecordingBackend<'a> {
    pub fn new(inner: &'a dyn Backend) -> Self {
        RecordingBackend {
            inner,
            order: Mutex::new(None),
            update: Mutex::new(None),
        }
    }

    /// The order recorded since the last call, if any.
    pub fn take_order(&self) -> Result<Option<OrderRecord>, TraderError> {
        Ok(self.order.lock().map_err(|_| poisoned())?.take())
    }

    /// The `(budget, invested)` of the last strategy update since the last call.
    pub fn take_update(&self) -> Result<Option<(f64, f64)>, TraderError> {
        Ok(self.update.lock().map_err(|_| poisoned())?.take())
    }
}

impl Backend for RecordingBackend<'_> {
    fn upsert_candle(&self, _candle: &Candle) -> Result<(), TraderError> {
        Ok(())
    }

    fn find_candles_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        product: &str,
        tick_minutes: u32,
    ) -> Result<Vec<Candle>, TraderError> {
        self.inner.find_candles_in_range(start, end, product, tick_minutes)
    }

    fn find_most_recent_candle(&self, product: &str) -> Result<Option<Candle>, TraderError> {
        self.inner.find_most_recent_candle(product)
    }

    fn create_order_record(&self, record: &OrderRecord) -> Result<(), TraderError> {
        *self.order.lock().map_err(|_| poisoned())? = Some(record.clone());
        Ok(())
    }

    fn create_strategy(&self, state: &mut StrategyState) -> Result<(), TraderError> {
        self.inner.create_strategy(state)
    }

    fn update_strategy(&self, state: &StrategyState) -> Result<(), TraderError> {
        *self.update.lock().map_err(|_| poisoned())? = Some((state.budget, state.invested));
        Ok(())
    }

    fn find_active_strategies(&self, product: &str) -> Result<Vec<StrategyState>, TraderError> {
        self.inner.find_active_strategies(product)
    }
}

/// Run the state machine for one replayed tick. `Ok(false)` means the tick
/// lacked data and leaves no ledger row.
fn replay_tick(
    trader: &mut TradingStateMachine<'_>,
    state: &mut StrategyState,
    time: DateTime<Utc>,
) -> Result<bool, TraderError> {
    match trader.process_tick(state) {
        Ok(()) => Ok(true),
        Err(e) if e.is_data_insufficiency() => {
            debug!(%time, error = %e, "skipping tick");
            Ok(false)
        }
        Err(e) => Err(e.context("error processing tick")),
    }
}

/// Clock that reads the end of the candle being replayed.
#[derive(Debug, Default)]
pub struct ReplayClock(AtomicI64);

impl ReplayClock {
    pub fn set(&self, t: DateTime<Utc>) {
        self.0.store(t.timestamp(), Ordering::Relaxed);
    }
}

impl Clock for ReplayClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0.load(Ordering::Relaxed), 0).unwrap_or_default()
    }
}

pub struct Backtester<B: Backend> {
    config: BacktestConfig,
    state: StrategyState,
    strategy: StrategyKind,
    backend: B,
    sink: Box<dyn EventSink>,
    indicator_names: Vec<String>,
    ledger: Vec<BacktestTick>,
}

impl<B: Backend> Backtester<B> {
    pub fn new(config: BacktestConfig, state: StrategyState, backend: B) -> Result<Self, TraderError> {
        let strategy = state.strategy().context("error getting strategy from state")?;
        let indicator_names = strategy.indicators().iter().map(|i| i.name()).collect();
        Ok(Backtester {
            config,
            state,
            strategy,
            backend,
            sink: Box::new(NoopEventSink),
            indicator_names,
            ledger: Vec::new(),
        })
    }

    pub fn with_event_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Strategy state as left by the replay.
    pub fn state(&self) -> &StrategyState {
        &self.state
    }

    pub fn ledger(&self) -> &[BacktestTick] {
        &self.ledger
    }

    pub fn indicator_names(&self) -> &[String] {
        &self.indicator_names
    }

    /// Replay the window. `rng` drives the fill slippage.
    pub fn run<R: RngCore + Send>(&mut self, rng: R) -> Result<(), TraderError> {
        let tick = self.state.tick_size_minutes;
        let warmup = Duration::minutes(i64::from(tick) * i64::from(self.state.history_ticks));
        let extended_start = self.config.start - warmup;

        let recorder = RecordingBackend::new(&self.backend);
        let fetched = recorder
            .find_candles_in_range(extended_start, self.config.end, &self.state.product, tick)
            .context("error finding candles")?;
        let candles = if fetched.is_empty() {
            fetched
        } else {
            reproject(&fetched, tick).context("error reprojecting candles")?
        };
        let (sets, valid) = generate_indicator_sets(self.strategy.indicators(), &candles);
        debug!(
            product = %self.state.product,
            fetched = candles.len(),
            valid = valid.len(),
            "generated indicator sets"
        );

        let exchange = SimulatedExchange::new(&valid, &self.config, &self.state, rng);
        let clock = ReplayClock::default();
        let mut trader = TradingStateMachine::with_market_orders(
            Box::new(self.strategy.clone()),
            &recorder,
            &exchange,
            self.sink.as_ref(),
            &clock,
        );
        trader.load_history(sets.clone());

        let start_bucket = bucket(self.config.start, tick);
        let mut ledger = Vec::with_capacity(valid.len());
        for (candle, set) in valid.iter().zip(sets) {
            trader.advance_tick();
            exchange.advance();
            clock.set(candle.end);

            // Deactivation is recorded on the state but does not stop the replay.
            if candle.end > start_bucket && !replay_tick(&mut trader, &mut self.state, candle.start)? {
                continue;
            }

            let (budget, invested) = recorder
                .take_update()?
                .unwrap_or((self.state.budget, self.state.invested));
            ledger.push(BacktestTick {
                time: candle.start,
                candle: candle.clone(),
                indicator_set: set,
                order: recorder.take_order()?,
                budget,
                invested,
            });
        }

        info!(
            product = %self.state.product,
            strategy = %self.strategy,
            ticks = ledger.len(),
            "finished backtest"
        );
        self.ledger = ledger;
        Ok(())
    }

    pub fn results(&self) -> BacktestResults {
        BacktestResults::from_ledger(&self.ledger, &self.state, &self.config)
    }

    /// The ledger as CSV text, one row per tick.
    pub fn results_csv(&self) -> Result<String, TraderError> {
        let mut buf = Vec::new();
        write_ledger_csv(&mut buf, &self.ledger, &self.indicator_names)?;
        String::from_utf8(buf).map_err(|e| TraderError::Report {
            reason: format!("ledger csv is not utf-8: {e}"),
        })
    }
}

pub fn csv_header(indicator_names: &[String]) -> Vec<String> {
    CSV_BASE_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(indicator_names.iter().cloned())
        .collect()
}

pub fn csv_record(tick: &BacktestTick) -> Vec<String> {
    let c = &tick.candle;
    let filled = |side: OrderSide| match &tick.order {
        Some(order) if order.side == side => format!("{:.6}", order.filled_size),
        _ => String::new(),
    };

    let mut row = vec![
        c.start.to_rfc3339_opts(SecondsFormat::Secs, true),
        c.end.to_rfc3339_opts(SecondsFormat::Secs, true),
        format!("{:.6}", c.low),
        format!("{:.6}", c.high),
        format!("{:.6}", c.open),
        format!("{:.6}", c.close),
        format!("{:.6}", c.volume),
        filled(OrderSide::Buy),
        filled(OrderSide::Sell),
        format!("{:.6}", tick.budget),
        format!("{:.6}", tick.invested),
    ];
    row.extend(
        tick.indicator_set
            .iter()
            .map(|v| v.as_ref().map(|v| format!("{:.6}", v.value)).unwrap_or_default()),
    );
    row
}

/// Write `ledger` as CSV with a header row to `out`.
pub fn write_ledger_csv<W: io::Write>(
    out: W,
    ledger: &[BacktestTick],
    indicator_names: &[String],
) -> Result<(), TraderError> {
    let report_err = |e: csv::Error| TraderError::Report {
        reason: format!("error writing ledger csv: {e}"),
    };
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(csv_header(indicator_names)).map_err(report_err)?;
    for tick in ledger {
        writer.write_record(csv_record(tick)).map_err(report_err)?;
    }
    writer.flush()?;
    Ok(())
}
