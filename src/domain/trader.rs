//! Per-strategy trading state machine.
//!
//! A `TradingStateMachine` owns the indicator instances and indicator
//! history of one strategy instance and moves its `StrategyState` through
//! the TryingToBuy / TryingToSell cycle. Each tick is processed to
//! completion, including persistence, before the next one starts.

use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{debug, info};

use crate::domain::candle::Candle;
use crate::domain::error::{ResultExt, TraderError};
use crate::domain::indicator::{self, Indicator, IndicatorSet};
use crate::domain::math::{truncate_float, TRADE_CURRENCY_PRECISION};
use crate::domain::models::{MarketOrder, MarketOrderFill, OrderRecord, OrderSide, StrategyState, TradingState};
use crate::domain::strategy::Strategy;
use crate::ports::backend_port::Backend;
use crate::ports::clock_port::Clock;
use crate::ports::event_sink_port::{EventSink, Severity};
use crate::ports::exchange_port::Exchange;

/// Budget fraction below which a strategy is deactivated after a sell.
pub const MINIMUM_BUDGET_PROPORTION: f64 = 0.7;

/// Executes a buy or sell for a strategy.
pub trait OrderStrategy: fmt::Display + Send + Sync {
    /// `cost` is in the budget currency for buys and in the invested
    /// currency for sells.
    fn perform_order(
        &self,
        product: &str,
        side: OrderSide,
        cost: f64,
        strategy: &StrategyState,
    ) -> Result<MarketOrderFill, TraderError>;
}

/// Places a single market order and records it with the backend.
pub struct MarketOrderStrategy<'a> {
    exchange: &'a dyn Exchange,
    backend: &'a dyn Backend,
}

impl<'a> MarketOrderStrategy<'a> {
    pub fn new(exchange: &'a dyn Exchange, backend: &'a dyn Backend) -> Self {
        MarketOrderStrategy { exchange, backend }
    }
}

impl fmt::Display for MarketOrderStrategy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MarketOrderStrategy")
    }
}

impl OrderStrategy for MarketOrderStrategy<'_> {
    fn perform_order(
        &self,
        product: &str,
        side: OrderSide,
        cost: f64,
        strategy: &StrategyState,
    ) -> Result<MarketOrderFill, TraderError> {
        let order = MarketOrder {
            product: product.to_string(),
            side,
            cost,
        };
        let fill = self
            .exchange
            .create_market_order(&order)
            .context("error creating market order with exchange")?;

        let cost_currency = strategy.cost_currency(side).to_string();
        let record = OrderRecord {
            strategy_id: strategy.id,
            exchange_id: fill.exchange_id.clone(),
            product: product.to_string(),
            side,
            cost,
            cost_currency: cost_currency.clone(),
            filled_size: fill.filled_size,
            filled_currency: fill.filled_currency.clone(),
            fees: fill.fees,
            fees_currency: fill.fees_currency.clone(),
        };
        self.backend
            .create_order_record(&record)
            .context("error recording market order")?;

        info!(
            strategy_id = strategy.id,
            %side,
            cost,
            cost_currency = %cost_currency,
            filled_size = fill.filled_size,
            filled_currency = %fill.filled_currency,
            fees = fill.fees,
            fees_currency = %fill.fees_currency,
            "made market order"
        );
        Ok(fill)
    }
}

/// Checks that the latest indicator set is complete and that `current_tick`
/// lies within the history.
pub fn validate_indicator_sets(current_tick: usize, history: &[IndicatorSet]) -> Result<(), TraderError> {
    let last = history.last().ok_or(TraderError::NotEnoughData)?;
    if current_tick >= history.len() {
        return Err(TraderError::NotEnoughData);
    }
    if last.is_empty() || !indicator::is_complete(last) {
        debug!("latest indicator set is missing values");
        return Err(TraderError::NotEnoughData);
    }
    Ok(())
}

pub struct TradingStateMachine<'a> {
    strategy: Box<dyn Strategy + 'a>,
    indicators: Vec<Box<dyn Indicator>>,
    history: Vec<IndicatorSet>,
    ticks: usize,
    last_candle_end: Option<DateTime<Utc>>,
    backend: &'a dyn Backend,
    order_strategy: Box<dyn OrderStrategy + 'a>,
    sink: &'a dyn EventSink,
    clock: &'a dyn Clock,
}

impl<'a> TradingStateMachine<'a> {
    pub fn new(
        strategy: Box<dyn Strategy + 'a>,
        backend: &'a dyn Backend,
        order_strategy: Box<dyn OrderStrategy + 'a>,
        sink: &'a dyn EventSink,
        clock: &'a dyn Clock,
    ) -> Self {
        let indicators = strategy.indicators();
        TradingStateMachine {
            strategy,
            indicators,
            history: Vec::new(),
            ticks: 0,
            last_candle_end: None,
            backend,
            order_strategy,
            sink,
            clock,
        }
    }

    /// State machine that trades through a single market order per decision.
    pub fn with_market_orders(
        strategy: Box<dyn Strategy + 'a>,
        backend: &'a dyn Backend,
        exchange: &'a dyn Exchange,
        sink: &'a dyn EventSink,
        clock: &'a dyn Clock,
    ) -> Self {
        let order_strategy = Box::new(MarketOrderStrategy::new(exchange, backend));
        Self::new(strategy, backend, order_strategy, sink, clock)
    }

    pub fn strategy(&self) -> &dyn Strategy {
        self.strategy.as_ref()
    }

    pub fn history(&self) -> &[IndicatorSet] {
        &self.history
    }

    /// End time of the last candle fed through `seed_indicators`.
    pub fn last_candle_end(&self) -> Option<DateTime<Utc>> {
        self.last_candle_end
    }

    /// Feed one candle to every indicator, append the resulting set and
    /// advance the tick.
    pub fn seed_indicators(&mut self, candle: &Candle) {
        let set = indicator::advance(&mut self.indicators, candle);
        self.history.push(set);
        self.last_candle_end = Some(candle.end);
        self.advance_tick();
    }

    /// Install a precomputed history. The tick position is left unchanged.
    pub fn load_history(&mut self, history: Vec<IndicatorSet>) {
        self.history = history;
    }

    pub fn advance_tick(&mut self) {
        self.ticks += 1;
    }

    /// Index of the current tick in the history.
    pub fn current_tick(&self) -> Option<usize> {
        self.ticks.checked_sub(1)
    }

    pub fn process_tick(&mut self, state: &mut StrategyState) -> Result<(), TraderError> {
        match state.state {
            TradingState::TryingToBuy => self.try_buy(state).context("error trying to buy"),
            TradingState::TryingToSell => self.try_sell(state).context("error trying to sell"),
        }
    }

    fn validated_tick(&self) -> Result<usize, TraderError> {
        let current = self.current_tick().ok_or(TraderError::NotEnoughData)?;
        validate_indicator_sets(current, &self.history).context("error validating indicator sets")?;
        Ok(current)
    }

    fn try_buy(&mut self, state: &mut StrategyState) -> Result<(), TraderError> {
        let current = self.validated_tick()?;
        let buy = self
            .strategy
            .buy(&self.history, current)
            .context("error using strategy")?;
        if !buy {
            debug!(strategy_id = state.id, strategy = %self.strategy, "skipped buy");
            return Ok(());
        }

        let cost = state.budget;
        let fill = self
            .order_strategy
            .perform_order(&state.product, OrderSide::Buy, cost, state)
            .context("error performing buy order")?;

        state.invested = truncate_float(fill.filled_size, TRADE_CURRENCY_PRECISION);
        state.budget = 0.0;
        state.state = TradingState::TryingToSell;
        self.backend
            .update_strategy(state)
            .context("error updating strategy after buy")?;

        let implied_price = if fill.filled_size != 0.0 { cost / fill.filled_size } else { 0.0 };
        let body = format!(
            "Type: {}\nProduct: {}\nStrategy ID: {}\nStrategy type: {}\nOrder strategy: {}\n\
             Tick size (minutes): {}\nSize ({}): {:.6}\nCost ({}): {:.6}\nFees ({}): {:.6}\n\
             Implied price ({}): {:.6}",
            OrderSide::Buy,
            state.product,
            state.id,
            self.strategy,
            self.order_strategy,
            state.tick_size_minutes,
            fill.filled_currency,
            fill.filled_size,
            state.budget_currency,
            cost,
            fill.fees_currency,
            fill.fees,
            state.budget_currency,
            implied_price
        );
        self.sink.notify("Market Order", &body, Severity::Info);
        Ok(())
    }

    fn try_sell(&mut self, state: &mut StrategyState) -> Result<(), TraderError> {
        let current = self.validated_tick()?;
        let sell = self
            .strategy
            .sell(&self.history, current)
            .context("error using strategy")?;
        if !sell {
            debug!(strategy_id = state.id, strategy = %self.strategy, "skipped sell");
            return Ok(());
        }

        let cost = state.invested;
        let fill = self
            .order_strategy
            .perform_order(&state.product, OrderSide::Sell, cost, state)
            .context("error performing sell order")?;

        state.invested = 0.0;
        state.budget = truncate_float(fill.filled_size, TRADE_CURRENCY_PRECISION);
        state.state = TradingState::TryingToBuy;
        self.backend
            .update_strategy(state)
            .context("error updating strategy after sell")?;

        let implied_price = if cost != 0.0 { fill.filled_size / cost } else { 0.0 };
        let profit_pct = if state.initial_budget != 0.0 {
            100.0 * (fill.filled_size - state.initial_budget) / state.initial_budget
        } else {
            0.0
        };
        let body = format!(
            "Type: {}\nProduct: {}\nStrategy ID: {}\nStrategy type: {}\nOrder strategy: {}\n\
             Tick size (minutes): {}\nSize ({}): {:.6}\nCost ({}): {:.6}\nFees ({}): {:.6}\n\
             Implied price ({}): {:.6}\nCurrent profit %: {:.6}",
            OrderSide::Sell,
            state.product,
            state.id,
            self.strategy,
            self.order_strategy,
            state.tick_size_minutes,
            fill.filled_currency,
            fill.filled_size,
            state.invested_currency,
            cost,
            fill.fees_currency,
            fill.fees,
            state.budget_currency,
            implied_price,
            profit_pct
        );
        self.sink.notify("Market Order", &body, Severity::Info);

        let proportion = state.budget / state.initial_budget;
        if proportion < MINIMUM_BUDGET_PROPORTION {
            info!(
                strategy_id = state.id,
                proportion,
                budget = state.budget,
                "deactivating strategy for falling below minimum budget proportion"
            );
            state.deactivated_at = Some(self.clock.now());
            self.backend
                .update_strategy(state)
                .context("error updating strategy after deactivating")?;

            let body = format!(
                "ID: {}\nType: {}\nReason: budget {:.6} {} fell below minimum proportion {:.6}",
                state.id, self.strategy, state.budget, state.budget_currency, MINIMUM_BUDGET_PROPORTION
            );
            self.sink.notify("Strategy Deactivated", &body, Severity::Warning);
        }
        Ok(())
    }
}
