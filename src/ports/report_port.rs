//! Report generation port trait.

use crate::domain::backtest::BacktestTick;
use crate::domain::error::TraderError;

/// Port for writing the tick ledger of a backtest.
pub trait ReportPort {
    /// `indicator_names` label the indicator columns, in the order their
    /// values appear in each tick's indicator set.
    fn write(
        &self,
        ledger: &[BacktestTick],
        indicator_names: &[String],
        output_path: &str,
    ) -> Result<(), TraderError>;
}
