//! Performance metrics computed from a backtest ledger.

use super::backtest::{BacktestConfig, BacktestTick};
use super::math::{mean, population_stddev, truncate_float, TRADE_CURRENCY_PRECISION};
use super::models::{OrderSide, StrategyState};

const DAYS_PER_YEAR: f64 = 365.0;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BacktestResults {
    pub budget_currency: String,
    pub initial_budget: f64,
    /// Budget after the last completed sell; 0 when nothing was sold.
    pub final_budget: f64,
    pub trade_currency: String,
    /// Close of the candle of the first buy.
    pub initial_currency_price: f64,
    /// Close of the candle of the last sell.
    pub final_currency_price: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub profit_trades: u32,
    pub loss_trades: u32,
    pub portfolio_value_per_day: Vec<f64>,
}

impl BacktestResults {
    pub fn from_ledger(ledger: &[BacktestTick], state: &StrategyState, config: &BacktestConfig) -> Self {
        let mut results = BacktestResults {
            budget_currency: state.budget_currency.clone(),
            initial_budget: state.initial_budget,
            trade_currency: state.invested_currency.clone(),
            ..Default::default()
        };
        let Some(first) = ledger.first() else {
            return results;
        };

        let mut current_day = first.candle.start;
        let mut current_budget = state.initial_budget;
        for tick in ledger {
            let portfolio_value = if tick.budget != 0.0 {
                tick.budget
            } else {
                tick.invested * tick.candle.close * (1.0 - config.fee - config.max_slippage)
            };

            if current_day > config.start
                && tick.candle.start > current_day
                && tick.candle.start.date_naive() != current_day.date_naive()
            {
                results.portfolio_value_per_day.push(portfolio_value);
            }
            current_day = tick.candle.start;

            let Some(order) = &tick.order else {
                continue;
            };
            match order.side {
                OrderSide::Buy => {
                    if results.initial_currency_price == 0.0 {
                        results.initial_currency_price = tick.candle.close;
                    }
                }
                OrderSide::Sell => {
                    let diff = order.filled_size - current_budget;
                    if diff >= 0.0 {
                        results.gross_profit += diff;
                        results.profit_trades += 1;
                    } else {
                        results.gross_loss -= diff;
                        results.loss_trades += 1;
                    }
                    current_budget = truncate_float(order.filled_size, TRADE_CURRENCY_PRECISION);
                    results.final_budget = current_budget;
                    results.final_currency_price = tick.candle.close;
                }
            }
        }
        results
    }

    pub fn net_profit(&self) -> f64 {
        self.gross_profit - self.gross_loss
    }

    /// Gross profit over gross loss; 0 when there was no loss.
    pub fn profit_factor(&self) -> f64 {
        if self.gross_loss == 0.0 {
            return 0.0;
        }
        self.gross_profit / self.gross_loss
    }

    /// Average win weighted by the share of winning trades, minus the
    /// average loss weighted by the share of losing trades.
    pub fn expected_payoff(&self) -> f64 {
        let total = f64::from(self.profit_trades + self.loss_trades);
        if total == 0.0 {
            return 0.0;
        }
        let weighted = |trades: u32, gross: f64| {
            if trades == 0 {
                0.0
            } else {
                (f64::from(trades) / total) * (gross / f64::from(trades))
            }
        };
        weighted(self.profit_trades, self.gross_profit) - weighted(self.loss_trades, self.gross_loss)
    }

    /// Annualized Sharpe ratio of the day-over-day portfolio deltas, with
    /// the first delta fixed at 0. Returns 0 when the deltas do not vary.
    pub fn sharpe_ratio(&self) -> f64 {
        let deltas = daily_deltas(&self.portfolio_value_per_day);
        let stddev = population_stddev(&deltas);
        if stddev == 0.0 {
            return 0.0;
        }
        DAYS_PER_YEAR.sqrt() * mean(&deltas) / stddev
    }
}

fn daily_deltas(values: &[f64]) -> Vec<f64> {
    std::iter::once(0.0)
        .chain(values.windows(2).map(|w| w[1] - w[0]))
        .collect()
}
