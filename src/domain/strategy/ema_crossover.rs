//! Buys and sells on the normalized difference between a short and a long
//! EMA.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::genetic::{cross_uniform, gene_to_period, mutate_normal, mutate_period, unit, MUTATION_PROBABILITY};
use super::{indicator_value, Genome, Strategy};
use crate::domain::error::TraderError;
use crate::domain::indicator::{Dema, Ema, Indicator, IndicatorSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmaCrossover {
    pub short_period: u32,
    pub long_period: u32,
    pub up_threshold: f64,
    pub down_threshold: f64,
}

impl Strategy for EmaCrossover {
    fn indicators(&self) -> Vec<Box<dyn Indicator>> {
        vec![
            Box::new(Dema::new(self.short_period, self.long_period)),
            Box::new(Ema::new(self.short_period)),
            Box::new(Ema::new(self.long_period)),
        ]
    }

    fn buy(&self, history: &[IndicatorSet], current: usize) -> Result<bool, TraderError> {
        let dema = indicator_value(history, current, 0)?;
        debug!(dema, up_threshold = self.up_threshold, "ema crossover buy check");
        Ok(dema > self.up_threshold)
    }

    fn sell(&self, history: &[IndicatorSet], current: usize) -> Result<bool, TraderError> {
        let dema = indicator_value(history, current, 0)?;
        debug!(dema, down_threshold = self.down_threshold, "ema crossover sell check");
        Ok(dema < self.down_threshold)
    }
}

impl Genome for EmaCrossover {
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let short_period = (unit(rng) * 50.0) as u32;
        let up_threshold = unit(rng) * 0.002;
        EmaCrossover {
            short_period,
            long_period: 2 * short_period,
            up_threshold,
            down_threshold: -up_threshold,
        }
    }

    fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut thresholds = [self.down_threshold, self.up_threshold];
        mutate_normal(&mut thresholds, MUTATION_PROBABILITY, rng);
        [self.down_threshold, self.up_threshold] = thresholds;

        self.short_period = mutate_period(self.short_period, MUTATION_PROBABILITY, rng);
        self.long_period = mutate_period(self.long_period, MUTATION_PROBABILITY, rng);
        if self.long_period < self.short_period {
            self.long_period = self.short_period;
        }
    }

    fn crossover<R: Rng + ?Sized>(&self, mate: &Self, rng: &mut R) -> (Self, Self) {
        let (c1, c2) = cross_uniform(&self.genes(), &mate.genes(), rng);
        (Self::from_genes(&c1), Self::from_genes(&c2))
    }
}

impl EmaCrossover {
    fn genes(&self) -> [f64; 4] {
        [
            f64::from(self.short_period),
            f64::from(self.long_period),
            self.up_threshold,
            self.down_threshold,
        ]
    }

    fn from_genes(genes: &[f64]) -> Self {
        let mut s = EmaCrossover {
            short_period: gene_to_period(genes[0]),
            long_period: gene_to_period(genes[1]),
            up_threshold: genes[2],
            down_threshold: genes[3],
        };
        if s.long_period < s.short_period {
            s.short_period = s.long_period;
        }
        s
    }
}

impl fmt::Display for EmaCrossover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EMA Crossover: short period: {}, long period: {}, up threshold: {:.6}, down threshold: {:.6}",
            self.short_period, self.long_period, self.up_threshold, self.down_threshold
        )
    }
}
