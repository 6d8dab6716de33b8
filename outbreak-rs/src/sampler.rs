//! Random variates shared by both simulators.

use rand::{Rng, distr::Distribution};
use rand_distr::{Gamma, Poisson};

use crate::error::OutbreakError;

/// Negative binomial with size `n` and success probability `p`, drawn as a Gamma-Poisson
/// mixture: a Gamma(shape = n, scale = (1 - p) / p) rate, then a Poisson count at that rate.
#[derive(Debug, Clone)]
pub struct NegativeBinomial {
    n: f64,
    p: f64,
    // None when p == 1: the mixing rate is identically zero.
    rate: Option<Gamma<f64>>,
}

impl NegativeBinomial {
    pub fn new(n: f64, p: f64) -> Result<Self, OutbreakError> {
        if !(n > 0.0) || !n.is_finite() {
            return Err(OutbreakError::invalid(
                "n",
                format!("negative binomial size {n} must be positive"),
            ));
        }
        if !(p > 0.0 && p <= 1.0) {
            return Err(OutbreakError::invalid("p", format!("probability {p} is outside (0, 1]")));
        }
        let rate = if p < 1.0 {
            let gamma = Gamma::new(n, (1.0 - p) / p)
                .map_err(|e| OutbreakError::Distribution(e.to_string()))?;
            Some(gamma)
        } else {
            None
        };
        Ok(NegativeBinomial { n, p, rate })
    }

    /// Secondary-case distribution with mean `r0` and dispersion `k`.
    pub fn secondary_cases(k: f64, r0: f64) -> Result<Self, OutbreakError> {
        Self::new(k, k / (k + r0))
    }

    pub fn mean(&self) -> f64 {
        self.n * (1.0 - self.p) / self.p
    }

    pub fn sample_n<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        size: usize,
    ) -> Result<Vec<u64>, OutbreakError> {
        let Some(gamma) = self.rate.as_ref() else {
            return Ok(vec![0; size]);
        };
        (0..size)
            .map(|_| poisson_count(gamma.sample(rng), rng))
            .collect()
    }
}

/// `size` negative-binomial draws with size `n` and probability `p`.
pub fn sample_nbinom<R: Rng + ?Sized>(
    rng: &mut R,
    n: f64,
    p: f64,
    size: usize,
) -> Result<Vec<u64>, OutbreakError> {
    NegativeBinomial::new(n, p)?.sample_n(rng, size)
}

fn poisson_count<R: Rng + ?Sized>(rate: f64, rng: &mut R) -> Result<u64, OutbreakError> {
    // Poisson requires a non-zero rate
    if rate > 0.0 {
        let poisson = Poisson::new(rate).map_err(|e| OutbreakError::Distribution(e.to_string()))?;
        let count: f64 = poisson.sample(rng);
        Ok(count as u64)
    } else {
        Ok(0)
    }
}

/// Gamma-distributed generation interval with mean `d`; the scale is `d / shape`.
#[derive(Debug, Clone)]
pub struct GenerationInterval(Gamma<f64>);

impl GenerationInterval {
    pub fn new(d: f64, shape: f64) -> Result<Self, OutbreakError> {
        Gamma::new(shape, d / shape)
            .map(GenerationInterval)
            .map_err(|e| OutbreakError::Distribution(e.to_string()))
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.0.sample(rng)
    }
}

/// Household sizes: a Poisson draw around the mean, but never less than one person.
#[derive(Debug, Clone)]
pub struct HouseholdSize(Poisson<f64>);

impl HouseholdSize {
    pub fn new(people_per_household: f64) -> Result<Self, OutbreakError> {
        Poisson::new(people_per_household)
            .map(HouseholdSize)
            .map_err(|e| OutbreakError::Distribution(e.to_string()))
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        let size: f64 = self.0.sample(rng);
        u64::max(size as u64, 1)
    }
}
