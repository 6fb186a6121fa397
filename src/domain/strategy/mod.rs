//! Strategy catalog.
//!
//! A strategy lists the indicators it reads and turns the indicator history
//! into buy/sell decisions. Every catalog member is also a genome for the
//! optimizer. Persisted strategies are a kind tag plus a TOML parameter blob.

pub mod ema_crossover;
pub mod genetic;
pub mod rsi;
pub mod s1;

pub use ema_crossover::EmaCrossover;
pub use rsi::RsiThreshold;
pub use s1::S1;

use rand::Rng;
use serde::de::DeserializeOwned;
use std::fmt;

use crate::domain::error::TraderError;
use crate::domain::indicator::{Indicator, IndicatorSet};

pub const EMA_CROSSOVER_TAG: &str = "ema-crossover";
pub const RSI_TAG: &str = "rsi";
pub const S1_TAG: &str = "s1";

pub trait Strategy: fmt::Display + Send + Sync {
    /// Fresh indicator instances, in the order their values appear in each
    /// `IndicatorSet`.
    fn indicators(&self) -> Vec<Box<dyn Indicator>>;

    fn buy(&self, history: &[IndicatorSet], current: usize) -> Result<bool, TraderError>;

    fn sell(&self, history: &[IndicatorSet], current: usize) -> Result<bool, TraderError>;
}

/// Genetic operators over a strategy's parameters.
pub trait Genome: Clone + Send + Sync {
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self;

    fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R);

    fn crossover<R: Rng + ?Sized>(&self, mate: &Self, rng: &mut R) -> (Self, Self);
}

/// Value of indicator `index` at tick `current`, or `NotEnoughData` when
/// the tick is beyond the history or the indicator was not ready.
pub(crate) fn indicator_value(history: &[IndicatorSet], current: usize, index: usize) -> Result<f64, TraderError> {
    history
        .get(current)
        .and_then(|set| set.get(index))
        .and_then(Option::as_ref)
        .map(|v| v.value)
        .ok_or(TraderError::NotEnoughData)
}

/// Closed set of persisted strategy kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyKind {
    EmaCrossover(EmaCrossover),
    Rsi(RsiThreshold),
    S1(S1),
}

impl StrategyKind {
    pub fn tag(&self) -> &'static str {
        match self {
            StrategyKind::EmaCrossover(_) => EMA_CROSSOVER_TAG,
            StrategyKind::Rsi(_) => RSI_TAG,
            StrategyKind::S1(_) => S1_TAG,
        }
    }

    /// Rebuild a strategy from its kind tag and serialized parameter blob.
    pub fn from_parts(tag: &str, blob: &str) -> Result<Self, TraderError> {
        match tag {
            EMA_CROSSOVER_TAG => parse_blob(tag, blob).map(StrategyKind::EmaCrossover),
            RSI_TAG => parse_blob(tag, blob).map(StrategyKind::Rsi),
            S1_TAG => parse_blob(tag, blob).map(StrategyKind::S1),
            other => Err(TraderError::UnknownStrategyKind { kind: other.to_string() }),
        }
    }

    /// Serialize the parameters as a TOML document.
    pub fn to_blob(&self) -> Result<String, TraderError> {
        let result = match self {
            StrategyKind::EmaCrossover(s) => toml::to_string(s),
            StrategyKind::Rsi(s) => toml::to_string(s),
            StrategyKind::S1(s) => toml::to_string(s),
        };
        result.map_err(|e| TraderError::StrategyData {
            kind: self.tag().to_string(),
            reason: e.to_string(),
        })
    }

    fn inner(&self) -> &dyn Strategy {
        match self {
            StrategyKind::EmaCrossover(s) => s,
            StrategyKind::Rsi(s) => s,
            StrategyKind::S1(s) => s,
        }
    }
}

fn parse_blob<T: DeserializeOwned>(tag: &str, blob: &str) -> Result<T, TraderError> {
    toml::from_str(blob).map_err(|e| TraderError::StrategyData {
        kind: tag.to_string(),
        reason: e.to_string(),
    })
}

impl Strategy for StrategyKind {
    fn indicators(&self) -> Vec<Box<dyn Indicator>> {
        self.inner().indicators()
    }

    fn buy(&self, history: &[IndicatorSet], current: usize) -> Result<bool, TraderError> {
        self.inner().buy(history, current)
    }

    fn sell(&self, history: &[IndicatorSet], current: usize) -> Result<bool, TraderError> {
        self.inner().sell(history, current)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.inner(), f)
    }
}

impl From<EmaCrossover> for StrategyKind {
    fn from(s: EmaCrossover) -> Self {
        StrategyKind::EmaCrossover(s)
    }
}

impl From<RsiThreshold> for StrategyKind {
    fn from(s: RsiThreshold) -> Self {
        StrategyKind::Rsi(s)
    }
}

impl From<S1> for StrategyKind {
    fn from(s: S1) -> Self {
        StrategyKind::S1(s)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::indicator::{IndicatorSet, IndicatorValue};
    use chrono::{DateTime, Duration, Utc};

    /// Build an indicator history from rows of optional values.
    pub fn history(rows: &[&[Option<f64>]]) -> Vec<IndicatorSet> {
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                let time: DateTime<Utc> = base + Duration::minutes(i as i64);
                row.iter()
                    .enumerate()
                    .map(|(j, v)| {
                        v.map(|value| IndicatorValue {
                            time,
                            value,
                            name: format!("ind-{j}"),
                        })
                    })
                    .collect()
            })
            .collect()
    }
}
