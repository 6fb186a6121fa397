//! Exponential moving average and the normalized EMA difference (DEMA).
//!
//! k = 2/(n+1), seeded with the SMA of the first n mean prices, then
//! ema = k*(price - ema) + ema.

use chrono::{DateTime, Utc};

use super::{sma, Indicator, IndicatorValue};
use crate::domain::candle::Candle;
use crate::domain::error::TraderError;

#[derive(Debug, Clone)]
pub struct Ema {
    period: u32,
    warmup: Vec<f64>,
    current: Option<f64>,
    last_time: Option<DateTime<Utc>>,
}

impl Ema {
    pub fn new(period: u32) -> Self {
        Ema {
            period,
            warmup: Vec::new(),
            current: None,
            last_time: None,
        }
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    /// Current EMA, if seeded.
    pub fn current(&self) -> Option<f64> {
        self.current
    }

    fn add_price(&mut self, price: f64) {
        match self.current {
            Some(ema) => {
                let k = 2.0 / (f64::from(self.period) + 1.0);
                self.current = Some(k * (price - ema) + ema);
            }
            None => {
                // A zero period never seeds.
                if self.period == 0 {
                    return;
                }
                self.warmup.push(price);
                if self.warmup.len() == self.period as usize {
                    let period = self.period as usize;
                    self.current = Some(sma(period, &self.warmup, period - 1));
                    self.warmup = Vec::new();
                }
            }
        }
    }
}

impl Indicator for Ema {
    fn add_candle(&mut self, candle: &Candle) {
        if !candle.has_trades() {
            return;
        }
        self.last_time = Some(candle.start);
        self.add_price(candle.mean_price());
    }

    fn value(&self) -> Result<IndicatorValue, TraderError> {
        match (self.current, self.last_time) {
            (Some(value), Some(time)) => Ok(IndicatorValue {
                time,
                value,
                name: self.name(),
            }),
            _ => Err(TraderError::NotEnoughData),
        }
    }

    fn name(&self) -> String {
        format!("ema-{}", self.period)
    }
}

/// (short - long) / (short + long) / 2 over two EMAs of the same series.
#[derive(Debug, Clone)]
pub struct Dema {
    short: Ema,
    long: Ema,
    last_time: Option<DateTime<Utc>>,
}

impl Dema {
    pub fn new(short_period: u32, long_period: u32) -> Self {
        Dema {
            short: Ema::new(short_period),
            long: Ema::new(long_period),
            last_time: None,
        }
    }
}

impl Indicator for Dema {
    fn add_candle(&mut self, candle: &Candle) {
        if !candle.has_trades() {
            return;
        }
        self.short.add_candle(candle);
        self.long.add_candle(candle);
        self.last_time = Some(candle.start);
    }

    fn value(&self) -> Result<IndicatorValue, TraderError> {
        let short = self.short.value()?;
        let long = self.long.value()?;
        Ok(IndicatorValue {
            time: self.last_time.unwrap_or(short.time),
            value: (short.value - long.value) / (short.value + long.value) / 2.0,
            name: self.name(),
        })
    }

    fn name(&self) -> String {
        format!("dema-{}-{}", self.short.period(), self.long.period())
    }
}
