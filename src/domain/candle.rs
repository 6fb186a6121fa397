//! Candlestick representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn from_open_close(open: f64, close: f64) -> Self {
        if close >= open {
            Direction::Up
        } else {
            Direction::Down
        }
    }
}

/// OHLCV summary of trading activity over `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub product: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub low: f64,
    pub high: f64,
    pub open: f64,
    pub close: f64,
    pub volume: f64,
    pub direction: Direction,
}

impl Candle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        product: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Candle {
            product: product.into(),
            start,
            end,
            low,
            high,
            open,
            close,
            volume,
            direction: Direction::from_open_close(open, close),
        }
    }

    /// A candle where every price field is `price`. Used to feed derived
    /// series (such as a MACD line) into price-based indicators.
    pub fn synthetic(start: DateTime<Utc>, price: f64, volume: f64) -> Self {
        Candle::new(String::new(), start, start, price, price, price, price, volume)
    }

    /// (open + high + low + close) / 4
    pub fn mean_price(&self) -> f64 {
        (self.open + self.high + self.low + self.close) / 4.0
    }

    pub fn has_trades(&self) -> bool {
        self.volume != 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_candle(open: f64, close: f64) -> Candle {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 15, 10, 15, 0).unwrap();
        Candle::new("BTC-USD", start, end, open, 110.0, 90.0, close, 3.5)
    }

    #[test]
    fn mean_price() {
        let candle = sample_candle(100.0, 105.0);
        // (100 + 110 + 90 + 105) / 4 = 101.25
        assert!((candle.mean_price() - 101.25).abs() < f64::EPSILON);
    }

    #[test]
    fn direction_up_when_close_at_or_above_open() {
        assert_eq!(sample_candle(100.0, 105.0).direction, Direction::Up);
        assert_eq!(sample_candle(100.0, 100.0).direction, Direction::Up);
    }

    #[test]
    fn direction_down_when_close_below_open() {
        assert_eq!(sample_candle(100.0, 95.0).direction, Direction::Down);
    }

    #[test]
    fn synthetic_candle_has_single_price() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let candle = Candle::synthetic(start, 2.5, 1.0);
        assert!((candle.mean_price() - 2.5).abs() < f64::EPSILON);
        assert!(candle.has_trades());
    }

    #[test]
    fn zero_volume_has_no_trades() {
        let mut candle = sample_candle(100.0, 105.0);
        candle.volume = 0.0;
        assert!(!candle.has_trades());
    }
}
