//! Drives every active strategy of one product on the live path.
//!
//! On each new candle the runner reloads the active strategies, rebuilds
//! their indicator history from the backend and processes the strategies
//! whose next tick is due.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::domain::aggregator::bucket;
use crate::domain::candle::Candle;
use crate::domain::error::{ResultExt, TraderError};
use crate::domain::models::StrategyState;
use crate::domain::trader::TradingStateMachine;
use crate::ports::backend_port::Backend;
use crate::ports::clock_port::Clock;
use crate::ports::event_sink_port::{EventSink, Severity};
use crate::ports::exchange_port::Exchange;

pub struct TickRunner<'a> {
    product: String,
    backend: &'a dyn Backend,
    exchange: &'a dyn Exchange,
    sink: &'a dyn EventSink,
    clock: &'a dyn Clock,
    current_candle: Option<Candle>,
}

impl<'a> TickRunner<'a> {
    pub fn new(
        product: impl Into<String>,
        backend: &'a dyn Backend,
        exchange: &'a dyn Exchange,
        sink: &'a dyn EventSink,
        clock: &'a dyn Clock,
    ) -> Self {
        TickRunner {
            product: product.into(),
            backend,
            exchange,
            sink,
            clock,
            current_candle: None,
        }
    }

    /// Process a tick when the backend has a candle newer than the last
    /// one seen. Returns whether a tick ran.
    pub fn process_new_candle(&mut self) -> Result<bool, TraderError> {
        let Some(next) = self
            .backend
            .find_most_recent_candle(&self.product)
            .context("error finding most recent candle")?
        else {
            return Ok(false);
        };

        let is_new = self
            .current_candle
            .as_ref()
            .is_none_or(|current| current.start != next.start || current.end != next.end);
        if is_new {
            debug!(product = %self.product, start = %next.start, "found a more recent candle, processing ticks");
            self.process_tick(next.end).context("error processing candle")?;
        }
        self.current_candle = Some(next);
        Ok(is_new)
    }

    /// Process every active strategy whose next tick is at or before `t`.
    pub fn process_tick(&mut self, t: DateTime<Utc>) -> Result<(), TraderError> {
        let strategies = self
            .backend
            .find_active_strategies(&self.product)
            .context("error finding active strategies")?;

        for mut state in strategies {
            let Some(next_tick_at) = state.next_tick_at else {
                debug!(strategy_id = state.id, "skipping strategy without a scheduled tick");
                continue;
            };
            if state.deactivated_at.is_some() {
                debug!(strategy_id = state.id, "skipping deactivated strategy");
                continue;
            }
            if next_tick_at > t {
                continue;
            }

            debug!(product = %self.product, strategy_id = state.id, "processing tick for strategy");
            self.run_strategy(&mut state, t)
                .context(format!("error processing tick for strategy {}", state.id))?;
        }
        Ok(())
    }

    fn run_strategy(&self, state: &mut StrategyState, t: DateTime<Utc>) -> Result<(), TraderError> {
        let strategy = state.strategy().context("error extracting strategy from state")?;
        let mut trader =
            TradingStateMachine::with_market_orders(Box::new(strategy), self.backend, self.exchange, self.sink, self.clock);

        let tick = Duration::minutes(i64::from(state.tick_size_minutes));
        let history_start =
            t - Duration::minutes(i64::from(state.tick_size_minutes) * i64::from(state.history_ticks));
        let candles = self
            .backend
            .find_candles_in_range(history_start, t, &state.product, state.tick_size_minutes)
            .context("error finding candles for strategy")?;
        for candle in &candles {
            trader.seed_indicators(candle);
        }

        match trader.process_tick(state) {
            Ok(()) => {}
            Err(e) if e.is_data_insufficiency() => {
                state.deactivated_at = Some(t);
                self.backend
                    .update_strategy(state)
                    .context("error updating strategy after deactivating")?;
                info!(product = %self.product, strategy_id = state.id, "deactivating strategy for a lack of data");
                let body = format!("ID: {}\nType: {}\nReason: not enough data", state.id, trader.strategy());
                self.sink.notify("Strategy Deactivated", &body, Severity::Warning);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        state.last_tick_at = Some(t);
        state.next_tick_at = Some(bucket(t, state.tick_size_minutes) + tick);
        self.backend
            .update_strategy(state)
            .context("error updating strategy ticks")
    }
}
