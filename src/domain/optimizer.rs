//! Genetic search over strategy parameters.
//!
//! Every individual is scored by a full backtest of its parameters over a
//! fixed window. Fitness is the negated Sharpe ratio, so lower is better.
//! Evaluations within a generation run in parallel on the rayon pool; all
//! randomness comes from a single seeded generator, with one derived seed
//! per evaluation, so a seeded run is reproducible.

use chrono::Duration;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rayon::prelude::*;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::backtest::{BacktestConfig, Backtester};
use crate::domain::error::{ResultExt, TraderError};
use crate::domain::models::StrategyState;
use crate::domain::strategy::{Genome, StrategyKind};
use crate::ports::backend_port::Backend;

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    pub generations: usize,
    pub population_size: usize,
    /// Probability that an offspring is mutated.
    pub mutation_rate: f64,
    pub tournament_size: usize,
    pub seed: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            generations: 100,
            population_size: 100,
            mutation_rate: 0.5,
            tournament_size: 3,
            seed: 0,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<(), TraderError> {
        let invalid = |key: &str, reason: &str| {
            Err(TraderError::ConfigInvalid {
                section: "optimizer".into(),
                key: key.into(),
                reason: reason.into(),
            })
        };
        if self.generations == 0 {
            return invalid("generations", "generations must be positive");
        }
        if self.population_size < 2 {
            return invalid("population_size", "population_size must be at least 2");
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return invalid("mutation_rate", "mutation_rate must be between 0 and 1");
        }
        if self.tournament_size == 0 {
            return invalid("tournament_size", "tournament_size must be at least 1");
        }
        Ok(())
    }
}

/// A scored genome.
#[derive(Debug, Clone, PartialEq)]
pub struct Individual<G> {
    pub genome: G,
    pub fitness: f64,
}

/// Creates random genomes and scores them by backtesting over a fixed
/// window against a shared backend.
pub struct GenomeFactory<G, B> {
    config: BacktestConfig,
    state: StrategyState,
    backend: Arc<B>,
    genome: PhantomData<fn() -> G>,
}

impl<G, B> GenomeFactory<G, B>
where
    G: Genome + Into<StrategyKind>,
    B: Backend,
{
    /// Build a factory and fetch the candles of the backtest window once,
    /// so a caching `backend` serves every later evaluation from memory.
    pub fn new(config: BacktestConfig, state: StrategyState, backend: Arc<B>) -> Result<Self, TraderError> {
        let warmup = Duration::minutes(i64::from(state.tick_size_minutes) * i64::from(state.history_ticks));
        let candles = backend
            .find_candles_in_range(config.start - warmup, config.end, &state.product, state.tick_size_minutes)
            .context("error pre-fetching candles")?;
        debug!(product = %state.product, candles = candles.len(), "pre-fetched optimizer candles");
        Ok(GenomeFactory {
            config,
            state,
            backend,
            genome: PhantomData,
        })
    }

    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> G {
        G::random(rng)
    }

    /// Negated Sharpe ratio of a backtest of `genome`. Failed runs and runs
    /// that never completed a sell score 0.
    pub fn evaluate(&self, genome: &G, seed: u64) -> f64 {
        let strategy: StrategyKind = genome.clone().into();
        match self.backtest(&strategy, seed) {
            Ok(fitness) => fitness,
            Err(e) => {
                warn!(strategy = %strategy, error = %e, "genome evaluation failed");
                0.0
            }
        }
    }

    fn backtest(&self, strategy: &StrategyKind, seed: u64) -> Result<f64, TraderError> {
        let mut state = self.state.clone();
        state.set_strategy(strategy)?;
        let mut backtester = Backtester::new(self.config.clone(), state, Arc::clone(&self.backend))?;
        backtester.run(StdRng::seed_from_u64(seed))?;

        let results = backtester.results();
        if results.final_budget == 0.0 || results.final_currency_price == 0.0 {
            return Ok(0.0);
        }
        Ok(-results.sharpe_ratio())
    }
}

pub struct GeneticOptimizer<G, B> {
    factory: GenomeFactory<G, B>,
    config: OptimizerConfig,
}

impl<G, B> GeneticOptimizer<G, B>
where
    G: Genome + Into<StrategyKind> + fmt::Display,
    B: Backend,
{
    pub fn new(factory: GenomeFactory<G, B>, config: OptimizerConfig) -> Result<Self, TraderError> {
        config.validate()?;
        Ok(GeneticOptimizer { factory, config })
    }

    /// Evolve the population and return the fittest individual seen.
    /// `on_generation` receives the generation index, the best fitness so
    /// far and that individual's description.
    pub fn run<F>(&self, mut on_generation: F) -> Result<Individual<G>, TraderError>
    where
        F: FnMut(usize, f64, &str),
    {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut population: Vec<G> = (0..self.config.population_size)
            .map(|_| self.factory.generate(&mut rng))
            .collect();
        let mut best: Option<Individual<G>> = None;

        for generation in 0..self.config.generations {
            let seeds: Vec<u64> = population.iter().map(|_| rng.next_u64()).collect();
            let scored: Vec<Individual<G>> = population
                .into_par_iter()
                .zip(seeds)
                .map(|(genome, seed)| {
                    let fitness = self.factory.evaluate(&genome, seed);
                    Individual { genome, fitness }
                })
                .collect();

            let elite = fittest(&scored).ok_or_else(|| TraderError::ConfigInvalid {
                section: "optimizer".into(),
                key: "population_size".into(),
                reason: "population is empty".into(),
            })?;
            if best.as_ref().is_none_or(|b| elite.fitness < b.fitness) {
                best = Some(elite.clone());
            }
            if let Some(b) = &best {
                let description = b.genome.to_string();
                info!(generation, best_fitness = b.fitness, strategy = %description, "finished generation");
                on_generation(generation, b.fitness, &description);
            }

            population = self.breed(&scored, elite, &mut rng);
        }

        best.ok_or_else(|| TraderError::ConfigInvalid {
            section: "optimizer".into(),
            key: "generations".into(),
            reason: "no generation was evaluated".into(),
        })
    }

    fn breed<R: Rng + ?Sized>(&self, scored: &[Individual<G>], elite: &Individual<G>, rng: &mut R) -> Vec<G> {
        let size = self.config.population_size;
        let mut next = Vec::with_capacity(size);
        next.push(elite.genome.clone());
        while next.len() < size {
            let a = tournament(scored, self.config.tournament_size, rng);
            let b = tournament(scored, self.config.tournament_size, rng);
            let (c1, c2) = a.genome.crossover(&b.genome, rng);
            for mut child in [c1, c2] {
                if rng.gen_bool(self.config.mutation_rate) {
                    child.mutate(rng);
                }
                if next.len() < size {
                    next.push(child);
                }
            }
        }
        next
    }
}

fn fittest<G>(scored: &[Individual<G>]) -> Option<&Individual<G>> {
    scored.iter().min_by(|a, b| a.fitness.total_cmp(&b.fitness))
}

/// Best of `k` individuals drawn with replacement. `scored` must be
/// non-empty.
fn tournament<'s, G, R: Rng + ?Sized>(scored: &'s [Individual<G>], k: usize, rng: &mut R) -> &'s Individual<G> {
    let mut winner = &scored[rng.gen_range(0..scored.len())];
    for _ in 1..k {
        let challenger = &scored[rng.gen_range(0..scored.len())];
        if challenger.fitness < winner.fitness {
            winner = challenger;
        }
    }
    winner
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Candle;
    use crate::domain::models::{OrderRecord, TradingState};
    use crate::domain::strategy::EmaCrossover;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TICK: u32 = 60;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    /// Hourly candles following a slow oscillation.
    fn wave(hours: usize) -> Vec<Candle> {
        (0..hours)
            .map(|i| {
                let start = t0() + Duration::hours(i as i64);
                let price = 100.0 + 10.0 * (i as f64 / 12.0).sin() + i as f64 * 0.01;
                Candle::new("BTC-USD", start, start + Duration::hours(1), price, price + 0.5, price - 0.5, price, 1.0)
            })
            .collect()
    }

    #[derive(Default)]
    struct WaveBackend {
        candles: Vec<Candle>,
        fail: bool,
        fetches: AtomicUsize,
    }

    impl Backend for WaveBackend {
        fn upsert_candle(&self, _candle: &Candle) -> Result<(), TraderError> {
            Ok(())
        }
        fn find_candles_in_range(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            _product: &str,
            _tick_minutes: u32,
        ) -> Result<Vec<Candle>, TraderError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail && n > 0 {
                return Err(TraderError::Backend { reason: "down".into() });
            }
            Ok(self.candles.iter().filter(|c| c.start >= start && c.end <= end).cloned().collect())
        }
        fn find_most_recent_candle(&self, _product: &str) -> Result<Option<Candle>, TraderError> {
            Ok(None)
        }
        fn create_order_record(&self, _record: &OrderRecord) -> Result<(), TraderError> {
            Ok(())
        }
        fn create_strategy(&self, _state: &mut StrategyState) -> Result<(), TraderError> {
            Ok(())
        }
        fn update_strategy(&self, _state: &StrategyState) -> Result<(), TraderError> {
            Ok(())
        }
        fn find_active_strategies(&self, _product: &str) -> Result<Vec<StrategyState>, TraderError> {
            Ok(Vec::new())
        }
    }

    fn state() -> StrategyState {
        StrategyState {
            id: 0,
            product: "BTC-USD".into(),
            state: TradingState::TryingToBuy,
            initial_budget: 1000.0,
            budget: 1000.0,
            budget_currency: "USD".into(),
            invested: 0.0,
            invested_currency: "BTC".into(),
            tick_size_minutes: TICK,
            history_ticks: 48,
            next_tick_at: None,
            last_tick_at: None,
            deactivated_at: None,
            strategy_kind: String::new(),
            strategy_data: String::new(),
        }
    }

    fn factory(backend: WaveBackend) -> GenomeFactory<EmaCrossover, WaveBackend> {
        let config = BacktestConfig::new(t0() + Duration::days(2), t0() + Duration::days(14));
        GenomeFactory::new(config, state(), Arc::new(backend)).unwrap()
    }

    fn small_config(seed: u64) -> OptimizerConfig {
        OptimizerConfig {
            generations: 3,
            population_size: 6,
            mutation_rate: 0.5,
            tournament_size: 2,
            seed,
        }
    }

    mod evaluate {
        use super::*;

        #[test]
        fn trading_genome_scores_negated_sharpe() {
            let f = factory(WaveBackend {
                candles: wave(24 * 14),
                ..Default::default()
            });
            let genome = EmaCrossover {
                short_period: 3,
                long_period: 12,
                up_threshold: 0.0005,
                down_threshold: -0.0005,
            };
            let fitness = f.evaluate(&genome, 1);
            assert!(fitness.is_finite());
            assert_eq!(fitness, f.evaluate(&genome, 1));
        }

        #[test]
        fn genome_that_never_trades_scores_zero() {
            let f = factory(WaveBackend {
                candles: wave(24 * 14),
                ..Default::default()
            });
            let genome = EmaCrossover {
                short_period: 3,
                long_period: 12,
                up_threshold: 1.0,
                down_threshold: -1.0,
            };
            assert_eq!(f.evaluate(&genome, 1), 0.0);
        }

        #[test]
        fn backend_failure_scores_zero() {
            let f = factory(WaveBackend {
                candles: wave(24 * 14),
                fail: true,
                ..Default::default()
            });
            let genome = EmaCrossover {
                short_period: 3,
                long_period: 12,
                up_threshold: 0.0005,
                down_threshold: -0.0005,
            };
            assert_eq!(f.evaluate(&genome, 1), 0.0);
        }
    }

    mod run {
        use super::*;

        fn optimize(seed: u64) -> (Individual<EmaCrossover>, Vec<(usize, f64)>) {
            let f = factory(WaveBackend {
                candles: wave(24 * 14),
                ..Default::default()
            });
            let optimizer = GeneticOptimizer::new(f, small_config(seed)).unwrap();
            let mut progress = Vec::new();
            let best = optimizer.run(|g, fitness, _| progress.push((g, fitness))).unwrap();
            (best, progress)
        }

        #[test]
        fn reports_every_generation_with_monotone_best() {
            let (best, progress) = optimize(5);
            assert_eq!(progress.iter().map(|p| p.0).collect::<Vec<_>>(), vec![0, 1, 2]);
            assert!(progress.windows(2).all(|w| w[1].1 <= w[0].1));
            assert_eq!(best.fitness, progress[2].1);
        }

        #[test]
        fn seeded_runs_are_reproducible() {
            let (a, _) = optimize(11);
            let (b, _) = optimize(11);
            assert_eq!(a, b);
        }

        #[test]
        fn rejects_tiny_population() {
            let f = factory(WaveBackend::default());
            let config = OptimizerConfig {
                population_size: 1,
                ..small_config(1)
            };
            assert!(matches!(
                GeneticOptimizer::new(f, config),
                Err(TraderError::ConfigInvalid { key, .. }) if key == "population_size"
            ));
        }
    }

    #[test]
    fn tournament_prefers_fitter() {
        let scored = vec![
            Individual { genome: 'a', fitness: 0.0 },
            Individual { genome: 'b', fitness: -2.0 },
        ];
        let mut rng = StdRng::seed_from_u64(0);
        // 64 draws with replacement all but guarantee `b` is seen.
        for _ in 0..20 {
            assert_eq!(tournament(&scored, 64, &mut rng).genome, 'b');
        }
    }

    #[test]
    fn config_validation() {
        assert!(OptimizerConfig::default().validate().is_ok());
        let bad = OptimizerConfig {
            mutation_rate: 1.5,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(TraderError::ConfigInvalid { key, .. }) if key == "mutation_rate"));
    }
}
