//! CSV candle loader.
//!
//! Reads candles from a CSV file with the header
//! `start_time,end_time,low,high,open,close,volume` (times in RFC3339).
//! Extra columns are ignored, so a backtest ledger export loads back as
//! its candles.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::domain::candle::Candle;
use crate::domain::error::TraderError;

#[derive(Debug, Deserialize)]
struct CandleRow {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    low: f64,
    high: f64,
    open: f64,
    close: f64,
    volume: f64,
}

pub struct CsvAdapter {
    path: PathBuf,
}

impl CsvAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every candle of the file, tagged with `product` and ordered by start
    /// time.
    pub fn load(&self, product: &str) -> Result<Vec<Candle>, TraderError> {
        let mut rdr = csv::Reader::from_path(&self.path).map_err(|e| TraderError::Backend {
            reason: format!("failed to read {}: {}", self.path.display(), e),
        })?;

        let mut candles = Vec::new();
        for (line, result) in rdr.deserialize::<CandleRow>().enumerate() {
            let row = result.map_err(|e| TraderError::Backend {
                reason: format!("CSV parse error in {} row {}: {}", self.path.display(), line + 1, e),
            })?;
            if row.start_time >= row.end_time {
                return Err(TraderError::Backend {
                    reason: format!("candle at row {} ends before it starts", line + 1),
                });
            }
            candles.push(Candle::new(
                product,
                row.start_time,
                row.end_time,
                row.open,
                row.high,
                row.low,
                row.close,
                row.volume,
            ));
        }

        candles.sort_by_key(|c| c.start);
        Ok(candles)
    }
}
