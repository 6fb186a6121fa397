//! Genetic operators shared by the strategy genomes.

use rand::Rng;
use rand_distr::StandardNormal;

/// Per-field probability that a mutation touches a parameter.
pub const MUTATION_PROBABILITY: f64 = 0.8;

/// Uniform draw in `[0, 1)`.
pub fn unit<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.gen_range(0.0..1.0)
}

pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.sample(StandardNormal)
}

/// Multiply-perturb each gene with probability `rate`: `x += x * N(0, 1)`.
pub fn mutate_normal<R: Rng + ?Sized>(genes: &mut [f64], rate: f64, rng: &mut R) {
    for gene in genes.iter_mut() {
        if rng.gen_bool(rate) {
            *gene += *gene * standard_normal(rng);
        }
    }
}

/// Perturb an EMA period with probability `rate`. The new value is only
/// accepted when positive, and wraps modulo 100.
pub fn mutate_period<R: Rng + ?Sized>(period: u32, rate: f64, rng: &mut R) -> u32 {
    if !rng.gen_bool(rate) {
        return period;
    }
    let delta = (f64::from(period) * standard_normal(rng)) as i64;
    let x = i64::from(period) + delta;
    if x > 0 { (x % 100) as u32 } else { period }
}

/// Uniform crossover: each position is swapped between the two children
/// with probability 0.5.
pub fn cross_uniform<R: Rng + ?Sized>(a: &[f64], b: &[f64], rng: &mut R) -> (Vec<f64>, Vec<f64>) {
    let mut c1 = a.to_vec();
    let mut c2 = b.to_vec();
    for (x, y) in c1.iter_mut().zip(c2.iter_mut()) {
        if rng.gen_bool(0.5) {
            std::mem::swap(x, y);
        }
    }
    (c1, c2)
}

/// Convert a crossed-over gene back to a period. Negative values clamp to 0.
pub fn gene_to_period(gene: f64) -> u32 {
    gene.max(0.0) as u32
}
