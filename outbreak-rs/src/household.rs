//! Agent-based branching process over a finite population split into household and
//! community transmission routes.
//!
//! Each individual carries an infected flag (never cleared) and an elapsed infectious time.
//! An individual whose elapsed time has reached `max_time` can no longer be re-exposed.

use log::trace;
use rand::{Rng, SeedableRng, rngs::StdRng, seq::index};

use crate::{
    error::OutbreakError,
    output::{HouseholdOutput, IncidenceTrace, Termination},
    parameters::HouseholdParameters,
    sampler::{GenerationInterval, HouseholdSize, NegativeBinomial},
};

pub struct HouseholdOutbreak {
    parameters: HouseholdParameters,
    secondary_cases: NegativeBinomial,
    household_size: HouseholdSize,
    // Gamma(shape = 1, scale = D)
    increment: GenerationInterval,
    infected: Vec<bool>,
    elapsed: Vec<f64>,
    active_cases: u64,
    cumulative: u64,
    step: usize,
    trace: IncidenceTrace,
}

impl HouseholdOutbreak {
    /// Seeds `n` distinct index cases chosen uniformly from the population.
    pub fn new<R: Rng + ?Sized>(
        parameters: &HouseholdParameters,
        rng: &mut R,
    ) -> Result<Self, OutbreakError> {
        parameters.validate()?;
        let secondary_cases = NegativeBinomial::secondary_cases(parameters.k, parameters.r0)?;
        let household_size = HouseholdSize::new(parameters.people_per_household)?;
        let increment = GenerationInterval::new(parameters.d, 1.0)?;

        let mut infected = vec![false; parameters.population];
        for i in index::sample(rng, parameters.population, parameters.n as usize) {
            infected[i] = true;
        }

        Ok(HouseholdOutbreak {
            parameters: parameters.clone(),
            secondary_cases,
            household_size,
            increment,
            infected,
            elapsed: vec![0.0; parameters.population],
            active_cases: parameters.n,
            cumulative: parameters.n,
            step: 0,
            trace: IncidenceTrace::new(parameters.n),
        })
    }

    /// `None` while the outbreak can still advance.
    pub fn termination(&self) -> Option<Termination> {
        if self.active_cases == 0 {
            Some(Termination::Extinct)
        } else if self.cumulative >= self.parameters.max_cases {
            Some(Termination::CaseCap)
        } else {
            None
        }
    }

    /// Advances one step and returns the number of new infections.
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<u64, OutbreakError> {
        let p = &self.parameters;
        let (n_home, n_comm) = split_cases(self.active_cases, p.f_home);

        let community = self
            .secondary_cases
            .sample_n(rng, n_comm as usize)?
            .into_iter()
            .map(|c| u64::min(c, p.max_community_spread));
        let attempts_comm: u64 = community.sum();

        let home_draws = self.secondary_cases.sample_n(rng, n_home as usize)?;
        let attempts_home: u64 = home_draws
            .into_iter()
            .map(|c| u64::min(c, self.household_size.sample(rng)))
            .sum();

        let attempts = usize::min((attempts_comm + attempts_home) as usize, p.population);
        let contacted = index::sample(rng, p.population, attempts);

        let mut fresh = Vec::new();
        let mut reexposed = Vec::new();
        for person in contacted {
            if !self.infected[person] {
                fresh.push(person);
            } else if self.elapsed[person] < p.max_time {
                reexposed.push(person);
            }
        }
        fresh.truncate(p.max_cases.saturating_sub(self.cumulative) as usize);

        for &person in &fresh {
            self.elapsed[person] = self.increment.sample(rng);
            self.infected[person] = true;
        }
        for &person in &reexposed {
            let extended = self.elapsed[person] + self.increment.sample(rng);
            self.elapsed[person] = f64::min(extended, p.max_time);
        }

        self.step += 1;
        self.cumulative = self.infected.iter().filter(|&&i| i).count() as u64;
        self.active_cases = fresh.len() as u64;
        if self.active_cases > 0 {
            self.trace.push(self.step as f64, self.cumulative);
        }
        trace!(
            "step {}: {attempts} contacts, {} new, {} re-exposed, cumulative {}",
            self.step,
            fresh.len(),
            reexposed.len(),
            self.cumulative
        );
        Ok(self.active_cases)
    }

    pub fn run<R: Rng + ?Sized>(mut self, rng: &mut R) -> Result<HouseholdOutput, OutbreakError> {
        let termination = loop {
            if let Some(termination) = self.termination() {
                break termination;
            }
            self.step(rng)?;
        };
        self.trace.termination = termination;
        Ok(HouseholdOutput {
            trace: self.trace,
            infected: self.infected,
            elapsed: self.elapsed,
        })
    }

    pub fn infected(&self) -> &[bool] {
        &self.infected
    }

    pub fn elapsed(&self) -> &[f64] {
        &self.elapsed
    }

    pub fn cumulative_incidence(&self) -> u64 {
        self.cumulative
    }

    pub fn active_cases(&self) -> u64 {
        self.active_cases
    }

    pub fn trace(&self) -> &IncidenceTrace {
        &self.trace
    }
}

/// Splits active cases into household and community routes. The household share is
/// `floor(cases * f_home) + 1`, so at least one household case exists even at `f_home = 0`.
fn split_cases(cases: u64, f_home: f64) -> (u64, u64) {
    let home = (cases as f64 * f_home).floor() as u64 + 1;
    (home, cases.saturating_sub(home))
}

pub struct HouseholdModel {}

impl HouseholdModel {
    pub fn simulate<R: Rng + ?Sized>(
        parameters: &HouseholdParameters,
        rng: &mut R,
    ) -> Result<HouseholdOutput, OutbreakError> {
        HouseholdOutbreak::new(parameters, rng)?.run(rng)
    }

    pub fn simulate_with_seed(
        parameters: &HouseholdParameters,
        seed: u64,
    ) -> Result<HouseholdOutput, OutbreakError> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::simulate(parameters, &mut rng)
    }
}
