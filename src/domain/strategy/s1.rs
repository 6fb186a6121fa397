//! Composite EMA crossover with RSI early entry and early exit.
//!
//! Buy decisions check the previous tick first: when the crossover was
//! already above the up threshold with RSI at the exit level, the strategy
//! has just left a trade through RSI and must not re-enter it.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::genetic::{
    cross_uniform, gene_to_period, mutate_normal, mutate_period, standard_normal, unit, MUTATION_PROBABILITY,
};
use super::{indicator_value, Genome, Strategy};
use crate::domain::error::TraderError;
use crate::domain::indicator::{Dema, Ema, Indicator, IndicatorSet, Rsi};

pub const S1_RSI_PERIOD: u32 = 14;

const DEMA_INDEX: usize = 0;
const RSI_INDEX: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S1 {
    pub ema_short_period: u32,
    pub ema_long_period: u32,
    pub ema_up_threshold: f64,
    pub ema_down_threshold: f64,
    pub rsi_exit_threshold: f64,
    pub rsi_entrance_threshold: f64,
}

impl S1 {
    fn reentry_suppressed(&self, history: &[IndicatorSet], current: usize) -> bool {
        let Some(previous) = current.checked_sub(1) else {
            return false;
        };
        match (
            indicator_value(history, previous, DEMA_INDEX),
            indicator_value(history, previous, RSI_INDEX),
        ) {
            (Ok(dema), Ok(rsi)) => dema >= self.ema_up_threshold && rsi >= self.rsi_exit_threshold,
            _ => false,
        }
    }

    fn genes(&self) -> [f64; 6] {
        [
            f64::from(self.ema_short_period),
            f64::from(self.ema_long_period),
            self.ema_up_threshold,
            self.ema_down_threshold,
            self.rsi_exit_threshold,
            self.rsi_entrance_threshold,
        ]
    }

    fn from_genes(genes: &[f64]) -> Self {
        let mut s = S1 {
            ema_short_period: gene_to_period(genes[0]),
            ema_long_period: gene_to_period(genes[1]),
            ema_up_threshold: genes[2],
            ema_down_threshold: genes[3],
            rsi_exit_threshold: genes[4],
            rsi_entrance_threshold: genes[5],
        };
        if s.ema_long_period < s.ema_short_period {
            s.ema_short_period = s.ema_long_period;
        }
        s
    }
}

impl Strategy for S1 {
    fn indicators(&self) -> Vec<Box<dyn Indicator>> {
        vec![
            Box::new(Dema::new(self.ema_short_period, self.ema_long_period)),
            Box::new(Ema::new(self.ema_short_period)),
            Box::new(Ema::new(self.ema_long_period)),
            Box::new(Rsi::new(S1_RSI_PERIOD)),
        ]
    }

    fn buy(&self, history: &[IndicatorSet], current: usize) -> Result<bool, TraderError> {
        if current >= history.len() {
            return Err(TraderError::NotEnoughData);
        }
        if self.reentry_suppressed(history, current) {
            return Ok(false);
        }

        let rsi = indicator_value(history, current, RSI_INDEX)?;
        let dema = indicator_value(history, current, DEMA_INDEX)?;
        debug!(
            rsi,
            rsi_entrance_threshold = self.rsi_entrance_threshold,
            dema,
            ema_up_threshold = self.ema_up_threshold,
            "s1 buy check"
        );

        if rsi <= self.rsi_entrance_threshold {
            return Ok(true);
        }
        Ok(dema > self.ema_up_threshold)
    }

    fn sell(&self, history: &[IndicatorSet], current: usize) -> Result<bool, TraderError> {
        let rsi = indicator_value(history, current, RSI_INDEX)?;
        let dema = indicator_value(history, current, DEMA_INDEX)?;
        debug!(
            rsi,
            rsi_exit_threshold = self.rsi_exit_threshold,
            dema,
            ema_down_threshold = self.ema_down_threshold,
            "s1 sell check"
        );

        if rsi >= self.rsi_exit_threshold {
            return Ok(true);
        }
        Ok(dema < self.ema_down_threshold)
    }
}

fn perturb_rsi_threshold<R: Rng + ?Sized>(x: f64, rng: &mut R) -> f64 {
    let next = x + x * standard_normal(rng);
    if next < 0.0 { x } else { next.min(100.0) }
}

impl Genome for S1 {
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let ema_short_period = (unit(rng) * 50.0) as u32;
        let ema_up_threshold = unit(rng) * 0.002;
        S1 {
            ema_short_period,
            ema_long_period: 2 * ema_short_period,
            ema_up_threshold,
            ema_down_threshold: -ema_up_threshold,
            rsi_exit_threshold: unit(rng) * 100.0,
            rsi_entrance_threshold: unit(rng) * 100.0,
        }
    }

    fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut thresholds = [self.ema_down_threshold, self.ema_up_threshold];
        mutate_normal(&mut thresholds, MUTATION_PROBABILITY, rng);
        [self.ema_down_threshold, self.ema_up_threshold] = thresholds;

        self.ema_short_period = mutate_period(self.ema_short_period, MUTATION_PROBABILITY, rng);
        self.ema_long_period = mutate_period(self.ema_long_period, MUTATION_PROBABILITY, rng);
        if self.ema_long_period < self.ema_short_period {
            self.ema_long_period = self.ema_short_period;
        }

        if rng.gen_bool(MUTATION_PROBABILITY) {
            self.rsi_exit_threshold = perturb_rsi_threshold(self.rsi_exit_threshold, rng);
        }
        if rng.gen_bool(MUTATION_PROBABILITY) {
            self.rsi_entrance_threshold = perturb_rsi_threshold(self.rsi_entrance_threshold, rng);
        }
    }

    fn crossover<R: Rng + ?Sized>(&self, mate: &Self, rng: &mut R) -> (Self, Self) {
        let (c1, c2) = cross_uniform(&self.genes(), &mate.genes(), rng);
        (Self::from_genes(&c1), Self::from_genes(&c2))
    }
}

impl fmt::Display for S1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "S1: ema short period: {}, ema long period: {}, ema up threshold: {:.6}, ema down threshold: {:.6}, \
             rsi entrance threshold: {:.6}, rsi exit threshold: {:.6}",
            self.ema_short_period,
            self.ema_long_period,
            self.ema_up_threshold,
            self.ema_down_threshold,
            self.rsi_entrance_threshold,
            self.rsi_exit_threshold
        )
    }
}
