//! Candlestick aggregation: bucketing, window builders and reprojection.
//!
//! Bucket boundaries are computed relative to a fixed epoch anchor so they
//! are stable across calls, and coarser granularities that are multiples of
//! finer ones always share boundaries with them.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use super::candle::Candle;
use super::error::TraderError;

/// Fixed anchor for bucket arithmetic: 2008-10-08T00:00:00Z.
pub const BUCKET_ANCHOR_SECS: i64 = 1_223_424_000;

/// A single trade reported by an exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub product: String,
    pub time: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
}

fn tick_duration(tick_minutes: u32) -> Duration {
    Duration::minutes(i64::from(tick_minutes.max(1)))
}

/// Start of the `tick_minutes` bucket containing `t`.
pub fn bucket(t: DateTime<Utc>, tick_minutes: u32) -> DateTime<Utc> {
    let period = i64::from(tick_minutes.max(1)) * 60;
    let offset = t.timestamp() - BUCKET_ANCHOR_SECS;
    let start = BUCKET_ANCHOR_SECS + offset.div_euclid(period) * period;
    DateTime::from_timestamp(start, 0).unwrap_or(t)
}

/// Mutable accumulator for one `[start, end)` window.
#[derive(Debug, Clone)]
pub struct CandleBuilder {
    product: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    low: Option<f64>,
    high: Option<f64>,
    open: Option<f64>,
    close: Option<f64>,
    volume: f64,
}

impl CandleBuilder {
    pub fn new(product: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        CandleBuilder {
            product: product.into(),
            start,
            end,
            low: None,
            high: None,
            open: None,
            close: None,
            volume: 0.0,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Fold a finer-grained candle into the window. Candles that are not
    /// fully inside `[start, end)` or belong to another product are ignored.
    ///
    /// Zero-volume candles are folded too. A zero price is treated as no
    /// sample, so the all-zero candles that `reproject` emits for gaps only
    /// add their (zero) volume.
    pub fn process_candle(&mut self, c: &Candle) {
        if c.product != self.product {
            return;
        }
        if c.start < self.start || c.start >= self.end || c.end > self.end {
            return;
        }

        self.volume += c.volume;
        if c.low != 0.0 {
            self.low = Some(self.low.map_or(c.low, |low| low.min(c.low)));
        }
        if c.high != 0.0 {
            self.high = Some(self.high.map_or(c.high, |high| high.max(c.high)));
        }
        if c.open != 0.0 {
            self.open.get_or_insert(c.open);
        }
        if c.close != 0.0 {
            self.close = Some(c.close);
        }
    }

    /// Fold a raw trade into the window. Trades outside `[start, end)` or
    /// for another product are ignored.
    pub fn process_trade(&mut self, e: &TradeEvent) {
        if e.product != self.product {
            return;
        }
        if e.time < self.start || e.time >= self.end {
            return;
        }
        if e.size == 0.0 {
            return;
        }

        self.volume += e.size;
        self.low = Some(self.low.map_or(e.price, |low| low.min(e.price)));
        self.high = Some(self.high.map_or(e.price, |high| high.max(e.price)));
        self.open.get_or_insert(e.price);
        self.close = Some(e.price);
    }

    pub fn build(self) -> Candle {
        Candle::new(
            self.product,
            self.start,
            self.end,
            self.open.unwrap_or(0.0),
            self.high.unwrap_or(0.0),
            self.low.unwrap_or(0.0),
            self.close.unwrap_or(0.0),
            self.volume,
        )
    }
}

/// Re-bucket an ascending candle series into `tick_minutes` candles.
///
/// One builder is created per target bucket between the first and last
/// source candle, so gaps come back as zero-volume candles.
pub fn reproject(candles: &[Candle], tick_minutes: u32) -> Result<Vec<Candle>, TraderError> {
    let (first, last) = match (candles.first(), candles.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(TraderError::EmptyInput),
    };

    let step = tick_duration(tick_minutes);
    let start = bucket(first.start, tick_minutes);
    let end = bucket(last.start, tick_minutes);

    let mut builders = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        builders.push(CandleBuilder::new(first.product.clone(), cursor, cursor + step));
        cursor += step;
    }

    for c in candles {
        let b = bucket(c.start, tick_minutes);
        let index = (b - start).num_seconds() / step.num_seconds();
        let builder = usize::try_from(index)
            .ok()
            .and_then(|i| builders.get_mut(i))
            .ok_or(TraderError::MissingBucket { bucket: b })?;
        builder.process_candle(c);
    }

    Ok(builders.into_iter().map(CandleBuilder::build).collect())
}

/// Check that the first `candles.len()` expected buckets, walked in
/// `tick_minutes` steps from the first candle, are all present.
pub fn validate_contiguity(candles: &[Candle], tick_minutes: u32) -> Result<(), TraderError> {
    let first = candles.first().ok_or(TraderError::EmptyInput)?;
    let seen: HashSet<DateTime<Utc>> = candles.iter().map(|c| c.start).collect();

    let step = tick_duration(tick_minutes);
    let mut expected = first.start;
    for _ in candles {
        if !seen.contains(&expected) {
            return Err(TraderError::MissingCandlestick);
        }
        expected += step;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    fn trade(product: &str, time: DateTime<Utc>, price: f64, size: f64) -> TradeEvent {
        TradeEvent {
            product: product.into(),
            time,
            price,
            size,
        }
    }

    fn minute_candle(m: u32, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle::new("BTC-USD", at(10, m, 0), at(10, m, 0) + Duration::minutes(1), open, high, low, close, volume)
    }

    #[test]
    fn bucket_floors_to_tick() {
        assert_eq!(bucket(at(10, 7, 31), 15), at(10, 0, 0));
        assert_eq!(bucket(at(10, 15, 0), 15), at(10, 15, 0));
        assert_eq!(bucket(at(10, 29, 59), 15), at(10, 15, 0));
    }

    #[test]
    fn bucket_before_anchor_floors() {
        let t = Utc.with_ymd_and_hms(2008, 10, 7, 23, 59, 0).unwrap();
        assert_eq!(bucket(t, 15), Utc.with_ymd_and_hms(2008, 10, 7, 23, 45, 0).unwrap());
    }

    #[test]
    fn builder_single_trade() {
        let mut builder = CandleBuilder::new("BTC-USD", at(10, 0, 0), at(10, 1, 0));
        builder.process_trade(&trade("BTC-USD", at(10, 0, 1), 2800.0, 1.0));
        let candle = builder.build();

        assert_eq!(candle.start, at(10, 0, 0));
        assert_eq!(candle.end, at(10, 1, 0));
        assert_eq!(candle.low, 2800.0);
        assert_eq!(candle.high, 2800.0);
        assert_eq!(candle.open, 2800.0);
        assert_eq!(candle.close, 2800.0);
        assert_eq!(candle.volume, 1.0);
        assert_eq!(candle.direction, crate::domain::candle::Direction::Up);
        assert_eq!(candle.product, "BTC-USD");
    }

    #[test]
    fn builder_trades_down() {
        let mut builder = CandleBuilder::new("BTC-USD", at(10, 0, 0), at(10, 1, 0));
        builder.process_trade(&trade("BTC-USD", at(10, 0, 1), 2800.0, 1.0));
        builder.process_trade(&trade("BTC-USD", at(10, 0, 1), 2700.0, 3.0));
        let candle = builder.build();

        assert_eq!(candle.low, 2700.0);
        assert_eq!(candle.high, 2800.0);
        assert_eq!(candle.open, 2800.0);
        assert_eq!(candle.close, 2700.0);
        assert_eq!(candle.volume, 4.0);
        assert_eq!(candle.direction, crate::domain::candle::Direction::Down);
    }

    #[test]
    fn builder_ignores_out_of_range_and_foreign_trades() {
        let mut builder = CandleBuilder::new("BTC-USD", at(10, 0, 0), at(10, 1, 0));
        builder.process_trade(&trade("BTC-USD", at(10, 0, 1), 2800.0, 1.0));
        builder.process_trade(&trade("BTC-USD", at(10, 1, 0), 9000.0, 1.0));
        builder.process_trade(&trade("BTC-USD", at(9, 59, 59), 9000.0, 1.0));
        builder.process_trade(&trade("ETH-USD", at(10, 0, 30), 9000.0, 1.0));
        let candle = builder.build();

        assert_eq!(candle.high, 2800.0);
        assert_eq!(candle.volume, 1.0);
    }

    #[test]
    fn builder_candles_merge() {
        let mut builder = CandleBuilder::new("BTC-USD", at(10, 0, 0), at(10, 15, 0));
        builder.process_candle(&minute_candle(0, 10.0, 12.0, 9.0, 11.0, 2.0));
        builder.process_candle(&minute_candle(1, 11.0, 15.0, 10.0, 14.0, 1.0));
        builder.process_candle(&minute_candle(2, 14.0, 14.0, 8.0, 9.0, 4.0));
        let candle = builder.build();

        assert_eq!(candle.open, 10.0);
        assert_eq!(candle.high, 15.0);
        assert_eq!(candle.low, 8.0);
        assert_eq!(candle.close, 9.0);
        assert_eq!(candle.volume, 7.0);
    }

    #[test]
    fn builder_folds_zero_volume_candles() {
        let mut builder = CandleBuilder::new("BTC-USD", at(10, 0, 0), at(10, 15, 0));
        builder.process_candle(&minute_candle(0, 10.0, 10.0, 10.0, 10.0, 0.0));
        builder.process_candle(&minute_candle(1, 10.0, 12.0, 7.0, 11.0, 2.0));
        builder.process_candle(&minute_candle(2, 11.0, 11.0, 6.0, 6.5, 0.0));
        let candle = builder.build();

        assert_eq!(candle.open, 10.0);
        assert_eq!(candle.low, 6.0);
        assert_eq!(candle.high, 12.0);
        assert_eq!(candle.close, 6.5);
        assert_eq!(candle.volume, 2.0);
    }

    #[test]
    fn builder_skips_zero_prices_of_gap_candles() {
        let mut builder = CandleBuilder::new("BTC-USD", at(10, 0, 0), at(10, 15, 0));
        builder.process_candle(&minute_candle(0, 5.0, 6.0, 4.0, 5.5, 1.0));
        builder.process_candle(&minute_candle(1, 0.0, 0.0, 0.0, 0.0, 0.0));
        let candle = builder.build();

        assert_eq!(candle.low, 4.0);
        assert_eq!(candle.close, 5.5);
    }

    #[test]
    fn builder_ignores_candle_crossing_window_end() {
        let mut builder = CandleBuilder::new("BTC-USD", at(10, 0, 0), at(10, 15, 0));
        let crossing = Candle::new("BTC-USD", at(10, 14, 0), at(10, 16, 0), 1.0, 1.0, 1.0, 1.0, 1.0);
        builder.process_candle(&crossing);
        assert_eq!(builder.build().volume, 0.0);
    }

    #[test]
    fn empty_builder_builds_zero_candle() {
        let candle = CandleBuilder::new("BTC-USD", at(10, 0, 0), at(10, 15, 0)).build();
        assert_eq!(candle.volume, 0.0);
        assert!(!candle.has_trades());
    }

    #[test]
    fn reproject_empty_input() {
        assert!(matches!(reproject(&[], 15), Err(TraderError::EmptyInput)));
    }

    #[test]
    fn reproject_minutes_to_quarter_hour() {
        let candles: Vec<Candle> = (0..30)
            .map(|m| {
                let p = 100.0 + m as f64;
                Candle::new("BTC-USD", at(10, m, 0), at(10, m, 0) + Duration::minutes(1), p, p + 1.0, p - 1.0, p + 0.5, 1.0)
            })
            .collect();

        let projected = reproject(&candles, 15).unwrap();
        assert_eq!(projected.len(), 2);

        assert_eq!(projected[0].start, at(10, 0, 0));
        assert_eq!(projected[0].end, at(10, 15, 0));
        assert_eq!(projected[0].open, 100.0);
        assert_eq!(projected[0].high, 115.0);
        assert_eq!(projected[0].low, 99.0);
        assert_eq!(projected[0].close, 114.5);
        assert_eq!(projected[0].volume, 15.0);

        assert_eq!(projected[1].start, at(10, 15, 0));
        assert_eq!(projected[1].open, 115.0);
        assert_eq!(projected[1].close, 129.5);
    }

    #[test]
    fn reproject_gap_yields_zero_volume_bucket() {
        let candles = vec![minute_candle(0, 1.0, 1.0, 1.0, 1.0, 1.0), minute_candle(40, 2.0, 2.0, 2.0, 2.0, 1.0)];
        let projected = reproject(&candles, 15).unwrap();
        assert_eq!(projected.len(), 3);
        assert_eq!(projected[1].volume, 0.0);
        assert_eq!(projected[2].close, 2.0);
    }

    #[test]
    fn reproject_descending_input_fails_missing_bucket() {
        let candles = vec![minute_candle(40, 2.0, 2.0, 2.0, 2.0, 1.0), minute_candle(0, 1.0, 1.0, 1.0, 1.0, 1.0)];
        assert!(matches!(reproject(&candles, 15), Err(TraderError::MissingBucket { .. })));
    }

    #[test]
    fn contiguity_ok() {
        let candles: Vec<Candle> = (0..5).map(|m| minute_candle(m, 1.0, 1.0, 1.0, 1.0, 1.0)).collect();
        assert!(validate_contiguity(&candles, 1).is_ok());
    }

    #[test]
    fn contiguity_missing_candle() {
        let candles: Vec<Candle> = [0, 1, 3, 4]
            .iter()
            .map(|&m| minute_candle(m, 1.0, 1.0, 1.0, 1.0, 1.0))
            .collect();
        assert!(matches!(
            validate_contiguity(&candles, 1),
            Err(TraderError::MissingCandlestick)
        ));
    }

    #[test]
    fn contiguity_empty_input() {
        assert!(matches!(validate_contiguity(&[], 1), Err(TraderError::EmptyInput)));
    }
}
