//! In-memory backend.
//!
//! Holds candles, orders and strategies in process memory. Used by the CLI
//! after loading candles from CSV, and by tests.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::aggregator::reproject;
use crate::domain::candle::Candle;
use crate::domain::error::TraderError;
use crate::domain::models::{OrderRecord, StrategyState};
use crate::ports::backend_port::Backend;

#[derive(Debug, Default)]
struct Store {
    /// Candles keyed by product, then start time.
    candles: BTreeMap<String, BTreeMap<DateTime<Utc>, Candle>>,
    orders: Vec<OrderRecord>,
    strategies: Vec<StrategyState>,
    next_strategy_id: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    store: RwLock<Store>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend preloaded with `candles`.
    pub fn with_candles(candles: impl IntoIterator<Item = Candle>) -> Result<Self, TraderError> {
        let backend = Self::new();
        for candle in candles {
            backend.upsert_candle(&candle)?;
        }
        Ok(backend)
    }

    pub fn orders(&self) -> Result<Vec<OrderRecord>, TraderError> {
        Ok(self.read()?.orders.clone())
    }

    pub fn strategies(&self) -> Result<Vec<StrategyState>, TraderError> {
        Ok(self.read()?.strategies.clone())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Store>, TraderError> {
        self.store.read().map_err(|_| TraderError::Backend {
            reason: "in-memory store poisoned".into(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Store>, TraderError> {
        self.store.write().map_err(|_| TraderError::Backend {
            reason: "in-memory store poisoned".into(),
        })
    }
}

impl Backend for InMemoryBackend {
    fn upsert_candle(&self, candle: &Candle) -> Result<(), TraderError> {
        self.write()?
            .candles
            .entry(candle.product.clone())
            .or_default()
            .insert(candle.start, candle.clone());
        Ok(())
    }

    fn find_candles_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        product: &str,
        tick_minutes: u32,
    ) -> Result<Vec<Candle>, TraderError> {
        let candles: Vec<Candle> = match self.read()?.candles.get(product) {
            Some(by_start) => by_start
                .range(start..)
                .map(|(_, c)| c)
                .filter(|c| c.end <= end)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        if candles.is_empty() {
            return Ok(candles);
        }
        reproject(&candles, tick_minutes)
    }

    fn find_most_recent_candle(&self, product: &str) -> Result<Option<Candle>, TraderError> {
        Ok(self
            .read()?
            .candles
            .get(product)
            .and_then(|by_start| by_start.values().next_back())
            .cloned())
    }

    fn create_order_record(&self, record: &OrderRecord) -> Result<(), TraderError> {
        self.write()?.orders.push(record.clone());
        Ok(())
    }

    fn create_strategy(&self, state: &mut StrategyState) -> Result<(), TraderError> {
        let mut store = self.write()?;
        store.next_strategy_id += 1;
        state.id = store.next_strategy_id;
        store.strategies.push(state.clone());
        Ok(())
    }

    fn update_strategy(&self, state: &StrategyState) -> Result<(), TraderError> {
        let mut store = self.write()?;
        let existing = store
            .strategies
            .iter_mut()
            .find(|s| s.id == state.id)
            .ok_or_else(|| TraderError::Backend {
                reason: format!("no strategy with id {}", state.id),
            })?;
        *existing = state.clone();
        Ok(())
    }

    fn find_active_strategies(&self, product: &str) -> Result<Vec<StrategyState>, TraderError> {
        Ok(self
            .read()?
            .strategies
            .iter()
            .filter(|s| s.product == product && s.is_active())
            .cloned()
            .collect())
    }
}
