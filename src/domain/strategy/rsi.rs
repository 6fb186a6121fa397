//! Buys when RSI falls to a threshold and sells when it climbs to another.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::genetic::{cross_uniform, gene_to_period, standard_normal, unit, MUTATION_PROBABILITY};
use super::{indicator_value, Genome, Strategy};
use crate::domain::error::TraderError;
use crate::domain::indicator::{Indicator, IndicatorSet, Rsi};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsiThreshold {
    pub period: u32,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
}

impl Strategy for RsiThreshold {
    fn indicators(&self) -> Vec<Box<dyn Indicator>> {
        vec![Box::new(Rsi::new(self.period))]
    }

    fn buy(&self, history: &[IndicatorSet], current: usize) -> Result<bool, TraderError> {
        let rsi = indicator_value(history, current, 0)?;
        debug!(rsi, buy_threshold = self.buy_threshold, "rsi buy check");
        Ok(rsi <= self.buy_threshold)
    }

    fn sell(&self, history: &[IndicatorSet], current: usize) -> Result<bool, TraderError> {
        let rsi = indicator_value(history, current, 0)?;
        debug!(rsi, sell_threshold = self.sell_threshold, "rsi sell check");
        Ok(rsi >= self.sell_threshold)
    }
}

fn perturb_threshold<R: Rng + ?Sized>(x: f64, rng: &mut R) -> f64 {
    (x + x * standard_normal(rng)).clamp(0.0, 100.0)
}

impl Genome for RsiThreshold {
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let period = (unit(rng) * 50.0) as u32;
        let sell_threshold = unit(rng) * 100.0;
        RsiThreshold {
            period,
            buy_threshold: sell_threshold / 2.0,
            sell_threshold,
        }
    }

    fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if rng.gen_bool(MUTATION_PROBABILITY) {
            let x = f64::from(self.period);
            self.period = gene_to_period(x + x * standard_normal(rng));
        }
        if rng.gen_bool(MUTATION_PROBABILITY) {
            self.buy_threshold = perturb_threshold(self.buy_threshold, rng);
        }
        if rng.gen_bool(MUTATION_PROBABILITY) {
            self.sell_threshold = perturb_threshold(self.sell_threshold, rng);
        }
    }

    fn crossover<R: Rng + ?Sized>(&self, mate: &Self, rng: &mut R) -> (Self, Self) {
        let (c1, c2) = cross_uniform(&self.genes(), &mate.genes(), rng);
        (Self::from_genes(&c1), Self::from_genes(&c2))
    }
}

impl RsiThreshold {
    fn genes(&self) -> [f64; 3] {
        [f64::from(self.period), self.buy_threshold, self.sell_threshold]
    }

    fn from_genes(genes: &[f64]) -> Self {
        RsiThreshold {
            period: gene_to_period(genes[0]),
            buy_threshold: genes[1],
            sell_threshold: genes[2],
        }
    }
}

impl fmt::Display for RsiThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RSI: period: {}, buy threshold: {:.6}, sell threshold: {:.6}",
            self.period, self.buy_threshold, self.sell_threshold
        )
    }
}
