//! Read-through candle cache in front of another backend.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::domain::candle::Candle;
use crate::domain::error::TraderError;
use crate::domain::models::{OrderRecord, StrategyState};
use crate::ports::backend_port::Backend;

type CacheKey = (DateTime<Utc>, DateTime<Utc>, String, u32);

/// Caches `find_candles_in_range` results by `(start, end, product, tick)`.
/// Every other call goes straight to the wrapped backend. Concurrent
/// misses on one key both fetch and the last insert wins.
pub struct CachingBackend<B> {
    inner: B,
    candles: RwLock<HashMap<CacheKey, Arc<[Candle]>>>,
}

impl<B: Backend> CachingBackend<B> {
    pub fn new(inner: B) -> Self {
        CachingBackend {
            inner,
            candles: RwLock::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Number of cached ranges.
    pub fn len(&self) -> usize {
        self.candles.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> TraderError {
    TraderError::Backend {
        reason: "candle cache poisoned".into(),
    }
}

impl<B: Backend> Backend for CachingBackend<B> {
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
        let key = (start, end, product.to_string(), tick_minutes);
        if let Some(hit) = self.candles.read().map_err(|_| poisoned())?.get(&key) {
            return Ok(hit.to_vec());
        }

        debug!(%product, %start, %end, tick_minutes, "candle cache miss");
        let candles = self.inner.find_candles_in_range(start, end, product, tick_minutes)?;
        self.candles
            .write()
            .map_err(|_| poisoned())?
            .insert(key, Arc::from(candles.as_slice()));
        Ok(candles)
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
