//! Relative Strength Index with Wilder smoothing over candle mean prices.
//!
//! The first `period` differences seed the average gain and loss. After
//! that each average is smoothed as (prev * (period - 1) + x) / 14. The
//! divisor stays 14 whatever the period.

use chrono::{DateTime, Utc};

use super::{Indicator, IndicatorValue};
use crate::domain::candle::Candle;
use crate::domain::error::TraderError;

const SMOOTHING_DIVISOR: f64 = 14.0;

#[derive(Debug, Clone)]
pub struct Rsi {
    period: u32,
    iterations: u32,
    last_price: f64,
    sum_gains: f64,
    sum_losses: f64,
    avg_gain: f64,
    avg_loss: f64,
    current: f64,
    last_time: Option<DateTime<Utc>>,
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_gain == 0.0 && avg_loss == 0.0 {
        return 50.0;
    }
    if avg_gain == 0.0 {
        return 0.0;
    }
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

impl Rsi {
    pub fn new(period: u32) -> Self {
        Rsi {
            period,
            iterations: 0,
            last_price: 0.0,
            sum_gains: 0.0,
            sum_losses: 0.0,
            avg_gain: 0.0,
            avg_loss: 0.0,
            current: 0.0,
            last_time: None,
        }
    }

    fn add_price(&mut self, price: f64) {
        if self.iterations == 0 {
            return;
        }

        let diff = price - self.last_price;
        let (gain, loss) = if diff >= 0.0 { (diff, 0.0) } else { (0.0, -diff) };
        self.sum_gains += gain;
        self.sum_losses += loss;

        if self.iterations < self.period {
            return;
        }

        let period = f64::from(self.period);
        if self.iterations == self.period {
            self.avg_gain = self.sum_gains / period;
            self.avg_loss = self.sum_losses / period;
        } else {
            self.avg_gain = (self.avg_gain * (period - 1.0) + gain) / SMOOTHING_DIVISOR;
            self.avg_loss = (self.avg_loss * (period - 1.0) + loss) / SMOOTHING_DIVISOR;
        }
        self.current = rsi_from_averages(self.avg_gain, self.avg_loss);
    }
}

impl Indicator for Rsi {
    fn add_candle(&mut self, candle: &Candle) {
        if !candle.has_trades() {
            return;
        }
        let price = candle.mean_price();
        self.add_price(price);
        self.iterations = self.iterations.saturating_add(1);
        self.last_price = price;
        self.last_time = Some(candle.start);
    }

    fn value(&self) -> Result<IndicatorValue, TraderError> {
        match self.last_time {
            Some(time) if self.iterations > self.period => Ok(IndicatorValue {
                time,
                value: self.current,
                name: self.name(),
            }),
            _ => Err(TraderError::NotEnoughData),
        }
    }

    fn name(&self) -> String {
        format!("rsi-{}", self.period)
    }
}
