//! Incrementally updated technical indicators.
//!
//! Every indicator consumes candles one at a time through
//! [`Indicator::add_candle`]. Candles without trades are ignored. A value is
//! only produced once enough history has accumulated; before that
//! [`Indicator::value`] fails with `NotEnoughData`.

pub mod ema;
pub mod macd;
pub mod rsi;

pub use ema::{Dema, Ema};
pub use macd::{Macd, MacdWithSignal};
pub use rsi::Rsi;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::candle::Candle;
use crate::domain::error::TraderError;

/// A computed indicator reading for one candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub time: DateTime<Utc>,
    pub value: f64,
    pub name: String,
}

/// One reading per configured indicator for a single candle, in the order
/// the strategy lists its indicators. `None` marks an indicator that was
/// not ready yet.
pub type IndicatorSet = Vec<Option<IndicatorValue>>;

pub trait Indicator: Send {
    fn add_candle(&mut self, candle: &Candle);

    fn value(&self) -> Result<IndicatorValue, TraderError>;

    /// Stable identifier including parameters, e.g. `ema-10`.
    fn name(&self) -> String;
}

/// Feed `candle` to every indicator and capture the resulting set.
pub fn advance(indicators: &mut [Box<dyn Indicator>], candle: &Candle) -> IndicatorSet {
    indicators
        .iter_mut()
        .map(|indicator| {
            indicator.add_candle(candle);
            indicator.value().ok()
        })
        .collect()
}

/// True when every indicator in the set produced a value.
pub fn is_complete(set: &IndicatorSet) -> bool {
    set.iter().all(Option::is_some)
}

/// Mean of the trailing `period` values ending at `index`, clipped at the
/// start of the series.
pub fn sma(period: usize, values: &[f64], index: usize) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let end = index.min(values.len() - 1);
    let start = (end + 1).saturating_sub(period.max(1));
    let window = &values[start..=end];
    window.iter().sum::<f64>() / window.len() as f64
}
