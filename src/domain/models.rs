//! Persisted records exchanged with the backend: strategy state and orders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::error::TraderError;
use crate::domain::strategy::StrategyKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TradingState {
    TryingToBuy,
    TryingToSell,
}

impl fmt::Display for TradingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingState::TryingToBuy => write!(f, "trying-to-buy"),
            TradingState::TryingToSell => write!(f, "trying-to-sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// One strategy instance as persisted between ticks.
///
/// At every committed state exactly one of `budget` and `invested` is
/// non-zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyState {
    pub id: i64,
    pub product: String,
    pub state: TradingState,
    pub initial_budget: f64,
    pub budget: f64,
    pub budget_currency: String,
    pub invested: f64,
    pub invested_currency: String,
    pub tick_size_minutes: u32,
    pub history_ticks: u32,
    pub next_tick_at: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub strategy_kind: String,
    pub strategy_data: String,
}

impl StrategyState {
    /// Decode the persisted strategy parameters.
    pub fn strategy(&self) -> Result<StrategyKind, TraderError> {
        StrategyKind::from_parts(&self.strategy_kind, &self.strategy_data)
    }

    /// Replace the persisted strategy kind and parameters.
    pub fn set_strategy(&mut self, strategy: &StrategyKind) -> Result<(), TraderError> {
        self.strategy_data = strategy.to_blob()?;
        self.strategy_kind = strategy.tag().to_string();
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.deactivated_at.is_none()
    }

    /// Currency spent by an order on `side`.
    pub fn cost_currency(&self, side: OrderSide) -> &str {
        match side {
            OrderSide::Buy => &self.budget_currency,
            OrderSide::Sell => &self.invested_currency,
        }
    }
}

/// Order sent to an exchange. `cost` is in the budget currency for buys
/// and in the invested currency for sells.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrder {
    pub product: String,
    pub side: OrderSide,
    pub cost: f64,
}

/// What an exchange reports back for a filled market order.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrderFill {
    pub filled_size: f64,
    pub filled_currency: String,
    pub fees: f64,
    pub fees_currency: String,
    pub exchange_id: String,
}

/// Immutable record of one executed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub strategy_id: i64,
    pub exchange_id: String,
    pub product: String,
    pub side: OrderSide,
    pub cost: f64,
    pub cost_currency: String,
    pub filled_size: f64,
    pub filled_currency: String,
    pub fees: f64,
    pub fees_currency: String,
}
