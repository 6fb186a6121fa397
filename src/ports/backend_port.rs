//! Persistence port trait.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::candle::Candle;
use crate::domain::error::TraderError;
use crate::domain::models::{OrderRecord, StrategyState};

/// Storage for candles, orders and strategy state. Every failure is a
/// `TraderError::Backend`; the domain never retries.
pub trait Backend: Send + Sync {
    fn upsert_candle(&self, candle: &Candle) -> Result<(), TraderError>;

    /// Stored candles of `product` with `start >= start` and `end <= end`,
    /// reprojected to `tick_minutes` and ordered by start time.
    fn find_candles_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        product: &str,
        tick_minutes: u32,
    ) -> Result<Vec<Candle>, TraderError>;

    fn find_most_recent_candle(&self, product: &str) -> Result<Option<Candle>, TraderError>;

    fn create_order_record(&self, record: &OrderRecord) -> Result<(), TraderError>;

    /// Persist a new strategy and assign its id.
    fn create_strategy(&self, state: &mut StrategyState) -> Result<(), TraderError>;

    fn update_strategy(&self, state: &StrategyState) -> Result<(), TraderError>;

    /// Strategies of `product` without a deactivation time.
    fn find_active_strategies(&self, product: &str) -> Result<Vec<StrategyState>, TraderError>;
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn upsert_candle(&self, candle: &Candle) -> Result<(), TraderError> {
        (**self).upsert_candle(candle)
    }

    fn find_candles_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        product: &str,
        tick_minutes: u32,
    ) -> Result<Vec<Candle>, TraderError> {
        (**self).find_candles_in_range(start, end, product, tick_minutes)
    }

    fn find_most_recent_candle(&self, product: &str) -> Result<Option<Candle>, TraderError> {
        (**self).find_most_recent_candle(product)
    }

    fn create_order_record(&self, record: &OrderRecord) -> Result<(), TraderError> {
        (**self).create_order_record(record)
    }

    fn create_strategy(&self, state: &mut StrategyState) -> Result<(), TraderError> {
        (**self).create_strategy(state)
    }

    fn update_strategy(&self, state: &StrategyState) -> Result<(), TraderError> {
        (**self).update_strategy(state)
    }

    fn find_active_strategies(&self, product: &str) -> Result<Vec<StrategyState>, TraderError> {
        (**self).find_active_strategies(product)
    }
}
