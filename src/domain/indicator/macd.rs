//! MACD line and MACD minus its signal EMA.

use chrono::{DateTime, Utc};

use super::{Ema, Indicator, IndicatorValue};
use crate::domain::candle::Candle;
use crate::domain::error::TraderError;

/// short EMA - long EMA
#[derive(Debug, Clone)]
pub struct Macd {
    short: Ema,
    long: Ema,
    last_time: Option<DateTime<Utc>>,
}

impl Macd {
    pub fn new(short_period: u32, long_period: u32) -> Self {
        Macd {
            short: Ema::new(short_period),
            long: Ema::new(long_period),
            last_time: None,
        }
    }
}

impl Indicator for Macd {
    fn add_candle(&mut self, candle: &Candle) {
        if !candle.has_trades() {
            return;
        }
        self.short.add_candle(candle);
        self.long.add_candle(candle);
        self.last_time = Some(candle.start);
    }

    fn value(&self) -> Result<IndicatorValue, TraderError> {
        let time = self.last_time.ok_or(TraderError::NotEnoughData)?;
        let short = self.short.value()?;
        let long = self.long.value()?;
        Ok(IndicatorValue {
            time,
            value: short.value - long.value,
            name: self.name(),
        })
    }

    fn name(&self) -> String {
        format!("macd-{}-{}", self.short.period(), self.long.period())
    }
}

/// MACD minus an EMA of the MACD line itself.
#[derive(Debug, Clone)]
pub struct MacdWithSignal {
    macd: Macd,
    signal: Ema,
    short_period: u32,
    long_period: u32,
    last_time: Option<DateTime<Utc>>,
}

impl MacdWithSignal {
    pub fn new(short_period: u32, long_period: u32, signal_period: u32) -> Self {
        MacdWithSignal {
            macd: Macd::new(short_period, long_period),
            signal: Ema::new(signal_period),
            short_period,
            long_period,
            last_time: None,
        }
    }
}

impl Indicator for MacdWithSignal {
    fn add_candle(&mut self, candle: &Candle) {
        if !candle.has_trades() {
            return;
        }
        self.macd.add_candle(candle);
        if let Ok(macd) = self.macd.value() {
            self.signal.add_candle(&Candle::synthetic(candle.start, macd.value, 1.0));
        }
        self.last_time = Some(candle.start);
    }

    fn value(&self) -> Result<IndicatorValue, TraderError> {
        let time = self.last_time.ok_or(TraderError::NotEnoughData)?;
        let signal = self.signal.value()?;
        let macd = self.macd.value()?;
        Ok(IndicatorValue {
            time,
            value: macd.value - signal.value,
            name: self.name(),
        })
    }

    fn name(&self) -> String {
        format!(
            "macd-with-signal-{}-ema-{}-{}",
            self.signal.period(),
            self.short_period,
            self.long_period
        )
    }
}
