//! CSV tick-ledger report writer.

use std::fs::File;

use crate::domain::backtest::{write_ledger_csv, BacktestTick};
use crate::domain::error::TraderError;
use crate::ports::report_port::ReportPort;

#[derive(Debug, Default, Clone, Copy)]
pub struct CsvReportAdapter;

impl ReportPort for CsvReportAdapter {
    fn write(
        &self,
        ledger: &[BacktestTick],
        indicator_names: &[String],
        output_path: &str,
    ) -> Result<(), TraderError> {
        let file = File::create(output_path).map_err(|e| TraderError::Report {
            reason: format!("failed to create {output_path}: {e}"),
        })?;
        write_ledger_csv(file, ledger, indicator_names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Candle;
    use crate::domain::indicator::IndicatorValue;
    use crate::domain::models::{OrderRecord, OrderSide};
    use chrono::{Duration, TimeZone, Utc};
    use std::fs;
    use tempfile::TempDir;

    fn tick(minutes: i64, order: Option<OrderRecord>) -> BacktestTick {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes);
        BacktestTick {
            time: start,
            candle: Candle::new("BTC-USD", start, start + Duration::minutes(15), 10.0, 12.0, 9.0, 11.0, 4.0),
            indicator_set: vec![Some(IndicatorValue {
                time: start,
                value: 0.125,
                name: "ema-3".into(),
            })],
            order,
            budget: 0.0,
            invested: 1.5,
        }
    }

    #[test]
    fn writes_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.csv");
        let buy = OrderRecord {
            strategy_id: 1,
            exchange_id: "backtest-1".into(),
            product: "BTC-USD".into(),
            side: OrderSide::Buy,
            cost: 16.5,
            cost_currency: "USD".into(),
            filled_size: 1.5,
            filled_currency: "BTC".into(),
            fees: 0.04,
            fees_currency: "USD".into(),
        };
        let ledger = vec![tick(0, Some(buy)), tick(15, None)];

        CsvReportAdapter
            .write(&ledger, &["ema-3".to_string()], path.to_str().unwrap())
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "start_time,end_time,low,high,open,close,volume,bought_size,sold_size,budget,invested,ema-3",
                "2024-01-01T00:00:00Z,2024-01-01T00:15:00Z,9.000000,12.000000,10.000000,11.000000,4.000000,\
                 1.500000,,0.000000,1.500000,0.125000",
                "2024-01-01T00:15:00Z,2024-01-01T00:30:00Z,9.000000,12.000000,10.000000,11.000000,4.000000,\
                 ,,0.000000,1.500000,0.125000",
            ]
        );
    }

    #[test]
    fn unwritable_path_is_report_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("ledger.csv");
        let err = CsvReportAdapter.write(&[], &[], path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, TraderError::Report { .. }));
    }
}
