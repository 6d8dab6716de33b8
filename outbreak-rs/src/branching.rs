use log::trace;
use nalgebra::DMatrix;
use rand::{Rng, SeedableRng, rngs::StdRng, seq::index};

use crate::{
    error::OutbreakError,
    output::{IncidenceTrace, Termination},
    parameters::OutbreakParameters,
    sampler::{GenerationInterval, NegativeBinomial},
};

/// Discrete-generation branching process over an unstructured population.
pub struct BranchingModel {}

impl BranchingModel {
    pub fn simulate<R: Rng + ?Sized>(
        parameters: &OutbreakParameters,
        rng: &mut R,
    ) -> Result<IncidenceTrace, OutbreakError> {
        parameters.validate()?;
        let secondary_cases = NegativeBinomial::secondary_cases(parameters.k, parameters.r0)?;
        let interval = GenerationInterval::new(parameters.d, parameters.gamma_shape)?;

        let mut trace = IncidenceTrace::new(parameters.n);
        let mut cumulative = parameters.n;
        // Onset times of the active generation
        let mut t = vec![0.0; parameters.n as usize];
        let mut generation = 0;

        loop {
            if t.is_empty() {
                trace.termination = Termination::Extinct;
                break;
            }
            if cumulative >= parameters.max_cases {
                trace.termination = Termination::CaseCap;
                break;
            }
            if earliest(&t) >= parameters.days_elapsed_max {
                trace.termination = Termination::Horizon;
                break;
            }
            generation += 1;

            let mut secondary = secondary_cases.sample_n(rng, t.len())?;
            if parameters.f_q > 0.0 {
                secondary = quarantine(rng, &secondary, parameters.f_q);
            }

            let mut next = next_generation(rng, &t, &secondary, &interval, parameters.max_time);
            let room = (parameters.max_cases - cumulative) as usize;
            next.truncate(room);
            cumulative += next.len() as u64;
            t = next;

            if !t.is_empty() {
                trace.push(earliest(&t), cumulative);
            }
            trace!(
                "generation {generation}: {} new cases, cumulative {cumulative}",
                t.len()
            );
        }
        Ok(trace)
    }

    pub fn simulate_with_seed(
        parameters: &OutbreakParameters,
        seed: u64,
    ) -> Result<IncidenceTrace, OutbreakError> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::simulate(parameters, &mut rng)
    }
}

fn earliest(t: &[f64]) -> f64 {
    t.iter().copied().fold(f64::INFINITY, f64::min)
}

/// Keeps a uniformly chosen `floor(len * (1 - f_q))` of the counts, in sampled order, and
/// zero-fills the rest: those primaries were quarantined and infect nobody.
fn quarantine<R: Rng + ?Sized>(rng: &mut R, secondary: &[u64], f_q: f64) -> Vec<u64> {
    let keep = (secondary.len() as f64 * (1.0 - f_q)) as usize;
    let mut thinned: Vec<u64> = index::sample(rng, secondary.len(), keep)
        .into_iter()
        .map(|i| secondary[i])
        .collect();
    thinned.resize(secondary.len(), 0);
    thinned
}

/// Onset times of the next generation.
///
/// Intervals are drawn into a dense `cases x max(secondary)` matrix; column `j` of row `i`
/// is a real secondary case only when `j < secondary[i]`. Valid cases are kept when their
/// absolute onset is strictly before `max_time`, in row-major order.
fn next_generation<R: Rng + ?Sized>(
    rng: &mut R,
    t: &[f64],
    secondary: &[u64],
    interval: &GenerationInterval,
    max_time: f64,
) -> Vec<f64> {
    let widest = secondary.iter().copied().max().unwrap_or(0) as usize;
    if widest == 0 {
        return Vec::new();
    }
    let intervals = DMatrix::from_fn(t.len(), widest, |_, _| interval.sample(rng));

    let mut next = Vec::new();
    for (row, (&onset, &count)) in t.iter().zip(secondary).enumerate() {
        for col in 0..widest {
            let masked = col as u64 >= count;
            let time = onset + intervals[(row, col)];
            if !masked && time < max_time {
                next.push(time);
            }
        }
    }
    next
}
