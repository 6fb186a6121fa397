//! Numeric helpers shared by the trading and metrics code.

/// Number of decimal places kept on currency sizes when placing trades.
pub const TRADE_CURRENCY_PRECISION: u32 = 8;

/// Truncate `f` to `precision` decimal places, rounding toward zero.
pub fn truncate_float(f: f64, precision: u32) -> f64 {
    let x = 10f64.powi(precision as i32);
    (f * x).trunc() / x
}

/// Arithmetic mean; 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation; 0.0 for an empty slice.
pub fn population_stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
