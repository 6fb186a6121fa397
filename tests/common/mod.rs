#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tradecore::adapters::memory_backend::InMemoryBackend;
use tradecore::domain::candle::Candle;
use tradecore::domain::error::TraderError;
use tradecore::domain::models::{
    MarketOrder, MarketOrderFill, OrderRecord, OrderSide, StrategyState, TradingState,
};
use tradecore::domain::strategy::{EmaCrossover, StrategyKind};
use tradecore::ports::backend_port::Backend;
use tradecore::ports::event_sink_port::{EventSink, Severity};
use tradecore::ports::exchange_port::Exchange;

pub const PRODUCT: &str = "BTC-USD";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn minutes(n: i64) -> Duration {
    Duration::minutes(n)
}

/// One candle of `tick` minutes starting `index` ticks after `t0`, with
/// every price at `close`.
pub fn flat_candle(index: usize, tick: u32, close: f64) -> Candle {
    let start = t0() + minutes(index as i64 * i64::from(tick));
    Candle::new(PRODUCT, start, start + minutes(i64::from(tick)), close, close, close, close, 1.0)
}

/// Contiguous `tick`-minute candles with the given closes.
pub fn series(closes: &[f64], tick: u32) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| flat_candle(i, tick, c))
        .collect()
}

/// `n` one-minute candles following a sine wave around 100.
pub fn sine_minutes(n: usize, period: f64) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let price = 100.0 + 10.0 * (i as f64 * std::f64::consts::TAU / period).sin();
            let start = t0() + minutes(i as i64);
            Candle::new(PRODUCT, start, start + minutes(1), price, price + 0.5, price - 0.5, price, 2.0)
        })
        .collect()
}

pub fn ema_crossover(short: u32, long: u32) -> StrategyKind {
    StrategyKind::EmaCrossover(EmaCrossover {
        short_period: short,
        long_period: long,
        up_threshold: 0.0,
        down_threshold: 0.0,
    })
}

pub fn strategy_state(strategy: &StrategyKind, tick: u32, history_ticks: u32) -> StrategyState {
    let mut state = StrategyState {
        id: 0,
        product: PRODUCT.into(),
        state: TradingState::TryingToBuy,
        initial_budget: 1000.0,
        budget: 1000.0,
        budget_currency: "USD".into(),
        invested: 0.0,
        invested_currency: "BTC".into(),
        tick_size_minutes: tick,
        history_ticks,
        next_tick_at: None,
        last_tick_at: None,
        deactivated_at: None,
        strategy_kind: String::new(),
        strategy_data: String::new(),
    };
    state.set_strategy(strategy).unwrap();
    state
}

/// Exchange that fills every order at a fixed price with no fees.
pub struct FixedPriceExchange {
    pub price: f64,
    pub orders: Mutex<Vec<MarketOrder>>,
}

impl FixedPriceExchange {
    pub fn new(price: f64) -> Self {
        Self {
            price,
            orders: Mutex::new(Vec::new()),
        }
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }
}

impl Exchange for FixedPriceExchange {
    fn create_market_order(&self, order: &MarketOrder) -> Result<MarketOrderFill, TraderError> {
        let mut orders = self.orders.lock().unwrap();
        orders.push(order.clone());
        let (filled_size, filled_currency) = match order.side {
            OrderSide::Buy => (order.cost / self.price, "BTC"),
            OrderSide::Sell => (order.cost * self.price, "USD"),
        };
        Ok(MarketOrderFill {
            filled_size,
            filled_currency: filled_currency.into(),
            fees: 0.0,
            fees_currency: "USD".into(),
            exchange_id: format!("fixed-{}", orders.len()),
        })
    }
}

/// Sink that keeps every notification.
#[derive(Default)]
pub struct CollectingSink {
    pub events: Mutex<Vec<(String, Severity)>>,
}

impl CollectingSink {
    pub fn titles(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }
}

impl EventSink for CollectingSink {
    fn notify(&self, title: &str, _body: &str, severity: Severity) {
        self.events.lock().unwrap().push((title.to_string(), severity));
    }
}

/// In-memory backend that counts candle range queries.
pub struct CountingBackend {
    pub inner: InMemoryBackend,
    pub range_queries: AtomicUsize,
}

impl CountingBackend {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self {
            inner: InMemoryBackend::with_candles(candles).unwrap(),
            range_queries: AtomicUsize::new(0),
        }
    }

    pub fn queries(&self) -> usize {
        self.range_queries.load(Ordering::SeqCst)
    }
}

impl Backend for CountingBackend {
    fn upsert_candle(&self, candle: &Candle) -> Result<(), TraderError> {
        self.inner.upsert_candle(candle)
    }

    fn find_candles_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        product: &str,
        tick_minutes: u32,
    ) -> Result<Vec<Candle>, TraderError> {
        self.range_queries.fetch_add(1, Ordering::SeqCst);
        self.inner.find_candles_in_range(start, end, product, tick_minutes)
    }

    fn find_most_recent_candle(&self, product: &str) -> Result<Option<Candle>, TraderError> {
        self.inner.find_most_recent_candle(product)
    }

    fn create_order_record(&self, record: &OrderRecord) -> Result<(), TraderError> {
        self.inner.create_order_record(record)
    }

    fn create_strategy(&self, state: &mut StrategyState) -> Result<(), TraderError> {
        self.inner.create_strategy(state)
    }

    fn update_strategy(&self, state: &StrategyState) -> Result<(), TraderError> {
        self.inner.update_strategy(state)
    }

    fn find_active_strategies(&self, product: &str) -> Result<Vec<StrategyState>, TraderError> {
        self.inner.find_active_strategies(product)
    }
}

/// Candle file contents in the loader's format.
pub fn candles_csv(candles: &[Candle]) -> String {
    let mut out = String::from("start_time,end_time,low,high,open,close,volume\n");
    for c in candles {
        out.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            c.start.to_rfc3339(),
            c.end.to_rfc3339(),
            c.low,
            c.high,
            c.open,
            c.close,
            c.volume
        ));
    }
    out
}
