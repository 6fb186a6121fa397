//! Configuration validation.
//!
//! Validates the `[backtest]`, `[strategy]` and `[optimizer]` sections of a
//! run configuration before anything is loaded or replayed.

use chrono::{DateTime, Utc};

use crate::domain::error::TraderError;
use crate::domain::strategy::{EMA_CROSSOVER_TAG, RSI_TAG, S1_TAG};
use crate::ports::config_port::ConfigPort;

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), TraderError> {
    require(config, "backtest", "product")?;
    require(config, "backtest", "candles")?;
    validate_times(config)?;
    validate_initial_budget(config)?;
    validate_tick_size(config)?;
    validate_history_ticks(config)?;
    validate_fraction(config, "fee", 0.0025)?;
    validate_fraction(config, "max_slippage", 0.0)?;
    parse_seed(config, "backtest")?;
    Ok(())
}

/// Checks the strategy kind. Parameter keys are only required when
/// `with_params` is set, since the optimizer draws its own.
pub fn validate_strategy_config(config: &dyn ConfigPort, with_params: bool) -> Result<(), TraderError> {
    let kind = require(config, "strategy", "kind")?;
    let kind = kind.trim();
    if !with_params {
        return match kind {
            EMA_CROSSOVER_TAG | RSI_TAG | S1_TAG => Ok(()),
            other => Err(TraderError::UnknownStrategyKind { kind: other.to_string() }),
        };
    }

    match kind {
        EMA_CROSSOVER_TAG => {
            let short = validate_period(config, "short_period")?;
            let long = validate_period(config, "long_period")?;
            if long < short {
                return Err(invalid("strategy", "long_period", "long_period must not be below short_period"));
            }
            validate_threshold(config, "up_threshold")?;
            validate_threshold(config, "down_threshold")?;
        }
        RSI_TAG => {
            validate_period(config, "period")?;
            validate_rsi_threshold(config, "buy_threshold")?;
            validate_rsi_threshold(config, "sell_threshold")?;
        }
        S1_TAG => {
            let short = validate_period(config, "ema_short_period")?;
            let long = validate_period(config, "ema_long_period")?;
            if long < short {
                return Err(invalid(
                    "strategy",
                    "ema_long_period",
                    "ema_long_period must not be below ema_short_period",
                ));
            }
            validate_threshold(config, "ema_up_threshold")?;
            validate_threshold(config, "ema_down_threshold")?;
            validate_rsi_threshold(config, "rsi_exit_threshold")?;
            validate_rsi_threshold(config, "rsi_entrance_threshold")?;
        }
        other => return Err(TraderError::UnknownStrategyKind { kind: other.to_string() }),
    }
    Ok(())
}

pub fn validate_optimizer_config(config: &dyn ConfigPort) -> Result<(), TraderError> {
    if config.get_int("optimizer", "generations", 100) < 1 {
        return Err(invalid("optimizer", "generations", "generations must be positive"));
    }
    if config.get_int("optimizer", "population_size", 100) < 2 {
        return Err(invalid("optimizer", "population_size", "population_size must be at least 2"));
    }
    let rate = config.get_double("optimizer", "mutation_rate", 0.5);
    if !(0.0..=1.0).contains(&rate) {
        return Err(invalid("optimizer", "mutation_rate", "mutation_rate must be between 0 and 1"));
    }
    if config.get_int("optimizer", "tournament_size", 3) < 1 {
        return Err(invalid("optimizer", "tournament_size", "tournament_size must be at least 1"));
    }
    parse_seed(config, "optimizer")?;
    Ok(())
}

/// Parse an RFC3339 timestamp from `[section] key`.
pub fn parse_time(config: &dyn ConfigPort, section: &str, key: &str) -> Result<DateTime<Utc>, TraderError> {
    let value = require(config, section, key)?;
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| invalid(section, key, &format!("invalid {key} format, expected RFC3339")))
}

/// Optional `seed` of `section`; `None` when absent.
pub fn parse_seed(config: &dyn ConfigPort, section: &str) -> Result<Option<u64>, TraderError> {
    match config.get_string(section, "seed").filter(|s| !s.trim().is_empty()) {
        None => Ok(None),
        Some(s) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| invalid(section, "seed", "seed must be a non-negative integer")),
    }
}

fn require(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, TraderError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(TraderError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

fn invalid(section: &str, key: &str, reason: &str) -> TraderError {
    TraderError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_times(config: &dyn ConfigPort) -> Result<(), TraderError> {
    let start = parse_time(config, "backtest", "start_time")?;
    let end = parse_time(config, "backtest", "end_time")?;
    if start >= end {
        return Err(invalid("backtest", "start_time", "start_time must be before end_time"));
    }
    Ok(())
}

fn validate_initial_budget(config: &dyn ConfigPort) -> Result<(), TraderError> {
    let value = config.get_double("backtest", "initial_budget", 100.0);
    if value <= 0.0 || !value.is_finite() {
        return Err(invalid("backtest", "initial_budget", "initial_budget must be positive"));
    }
    Ok(())
}

fn validate_tick_size(config: &dyn ConfigPort) -> Result<(), TraderError> {
    let value = config.get_int("backtest", "tick_size_minutes", 15);
    if value < 1 || u32::try_from(value).is_err() {
        return Err(invalid("backtest", "tick_size_minutes", "tick_size_minutes must be positive"));
    }
    Ok(())
}

fn validate_history_ticks(config: &dyn ConfigPort) -> Result<(), TraderError> {
    let value = config.get_int("backtest", "history_ticks", 1000);
    if u32::try_from(value).is_err() {
        return Err(invalid("backtest", "history_ticks", "history_ticks must be non-negative"));
    }
    Ok(())
}

fn validate_fraction(config: &dyn ConfigPort, key: &str, default: f64) -> Result<(), TraderError> {
    let value = config.get_double("backtest", key, default);
    if !(0.0..1.0).contains(&value) {
        return Err(invalid("backtest", key, &format!("{key} must be in [0, 1)")));
    }
    Ok(())
}

fn validate_period(config: &dyn ConfigPort, key: &str) -> Result<i64, TraderError> {
    require(config, "strategy", key)?;
    let value = config.get_int("strategy", key, -1);
    if value < 1 || u32::try_from(value).is_err() {
        return Err(invalid("strategy", key, &format!("{key} must be a positive integer")));
    }
    Ok(value)
}

fn validate_threshold(config: &dyn ConfigPort, key: &str) -> Result<f64, TraderError> {
    require(config, "strategy", key)?;
    let value = config.get_double("strategy", key, f64::NAN);
    if !value.is_finite() {
        return Err(invalid("strategy", key, &format!("{key} must be a number")));
    }
    Ok(value)
}

fn validate_rsi_threshold(config: &dyn ConfigPort, key: &str) -> Result<(), TraderError> {
    let value = validate_threshold(config, key)?;
    if !(0.0..=100.0).contains(&value) {
        return Err(invalid("strategy", key, &format!("{key} must be between 0 and 100")));
    }
    Ok(())
}
