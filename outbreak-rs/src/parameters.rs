use rand::Rng;
use serde::Deserialize;

use crate::error::OutbreakError;

/// Parameters of a single unstructured branching-process run.
#[derive(Debug, Clone, Deserialize)]
pub struct OutbreakParameters {
    #[serde(alias = "R0")]
    pub r0: f64,
    pub k: f64,
    /// Index cases.
    pub n: u64,
    /// Mean generation interval.
    #[serde(alias = "D")]
    pub d: f64,
    pub gamma_shape: f64,
    /// Secondary cases at or beyond this absolute time are discarded.
    pub max_time: f64,
    pub days_elapsed_max: f64,
    pub max_cases: u64,
    /// Fraction of primaries perfectly quarantined each generation.
    #[serde(default, alias = "f_Q")]
    pub f_q: f64,
}

impl OutbreakParameters {
    pub fn validate(&self) -> Result<(), OutbreakError> {
        check_rate("r0", self.r0)?;
        check_positive("k", self.k)?;
        check_positive("D", self.d)?;
        check_positive("gamma_shape", self.gamma_shape)?;
        check_not_nan("max_time", self.max_time)?;
        check_not_nan("days_elapsed_max", self.days_elapsed_max)?;
        check_fraction("f_Q", self.f_q)?;
        if self.n == 0 {
            return Err(OutbreakError::invalid("n", "at least one index case is required"));
        }
        check_seed_within_cap(self.n, self.max_cases)
    }
}

/// Parameters of a household/community structured run.
#[derive(Debug, Clone, Deserialize)]
pub struct HouseholdParameters {
    #[serde(alias = "R0")]
    pub r0: f64,
    pub k: f64,
    pub n: u64,
    #[serde(alias = "D")]
    pub d: f64,
    /// Elapsed infectious time saturates here.
    pub max_time: f64,
    pub max_cases: u64,
    /// Fraction of transmission events that happen within a household.
    pub f_home: f64,
    pub people_per_household: f64,
    pub max_community_spread: u64,
    pub population: usize,
}

impl HouseholdParameters {
    pub fn validate(&self) -> Result<(), OutbreakError> {
        check_rate("r0", self.r0)?;
        check_positive("k", self.k)?;
        check_positive("D", self.d)?;
        check_not_nan("max_time", self.max_time)?;
        check_fraction("f_home", self.f_home)?;
        check_positive("people_per_household", self.people_per_household)?;
        if self.population == 0 {
            return Err(OutbreakError::invalid("population", "must be positive"));
        }
        if self.n == 0 {
            return Err(OutbreakError::invalid("n", "at least one index case is required"));
        }
        if self.n > self.population as u64 {
            return Err(OutbreakError::invalid(
                "n",
                format!("{} index cases exceed population {}", self.n, self.population),
            ));
        }
        check_seed_within_cap(self.n, self.max_cases)
    }
}

/// Closed interval `[min, max]` sampled uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct UniformRange {
    pub min: f64,
    pub max: f64,
}

impl UniformRange {
    pub fn new(min: f64, max: f64) -> Self {
        UniformRange { min, max }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.min + (self.max - self.min) * rng.random::<f64>()
    }

    fn validate(&self, name: &'static str) -> Result<(), OutbreakError> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(OutbreakError::invalid(
                name,
                format!("[{}, {}] is not a finite interval", self.min, self.max),
            ));
        }
        Ok(())
    }
}

/// Ranges the calibration engines draw their nuisance parameters from.
#[derive(Debug, Clone, Deserialize)]
pub struct NuisanceRanges {
    #[serde(alias = "D")]
    pub d: UniformRange,
    /// Index cases are drawn from `[n_min, n_max)`.
    pub n_min: u64,
    pub n_max: u64,
    pub gamma_shape: UniformRange,
}

impl NuisanceRanges {
    pub fn validate(&self) -> Result<(), OutbreakError> {
        self.d.validate("D")?;
        check_positive("D", self.d.min)?;
        self.gamma_shape.validate("gamma_shape")?;
        check_positive("gamma_shape", self.gamma_shape.min)?;
        if self.n_min == 0 || self.n_min >= self.n_max {
            return Err(OutbreakError::invalid(
                "n",
                format!(
                    "[{}, {}) must be a non-empty range of positive counts",
                    self.n_min, self.n_max
                ),
            ));
        }
        Ok(())
    }

    /// Largest index-case count a trial can draw. Only meaningful after `validate`.
    pub fn largest_seed(&self) -> u64 {
        self.n_max.saturating_sub(1)
    }
}

/// Case-count observations.
///
/// Entry `i` says that at `days_elapsed_min[i] - max(days_elapsed_min)` days relative to the
/// trial horizon, cumulative incidence was strictly between `min_number_cases[i]` and
/// `max_number_cases[i]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservationWindow {
    pub days_elapsed_min: Vec<f64>,
    pub days_elapsed_max: Vec<f64>,
    pub min_number_cases: Vec<f64>,
    pub max_number_cases: Vec<f64>,
}

impl ObservationWindow {
    pub fn validate(&self) -> Result<(), OutbreakError> {
        let len = self.days_elapsed_min.len();
        if len == 0 {
            return Err(OutbreakError::EmptyGrid("days_elapsed_min"));
        }
        if self.days_elapsed_max.len() != len
            || self.min_number_cases.len() != len
            || self.max_number_cases.len() != len
        {
            return Err(OutbreakError::invalid(
                "observations",
                "observation vectors must have equal length",
            ));
        }
        self.horizon().validate("days_elapsed")
    }

    /// Range the per-trial horizon is drawn from.
    pub fn horizon(&self) -> UniformRange {
        UniformRange::new(max_of(&self.days_elapsed_min), max_of(&self.days_elapsed_max))
    }

    /// Offsets of each observation relative to the trial horizon (all `<= 0`).
    pub fn offsets(&self) -> Vec<f64> {
        let latest = max_of(&self.days_elapsed_min);
        self.days_elapsed_min.iter().map(|d| d - latest).collect()
    }
}

/// Settings shared by `acceptance_fraction` and `quarantine_fraction`.
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationSettings {
    pub k_grid: Vec<f64>,
    pub trials: usize,
    pub ranges: NuisanceRanges,
    pub max_cases: u64,
    pub max_time: f64,
    pub window: ObservationWindow,
    pub samples_path: String,
    #[serde(default, alias = "f_Q")]
    pub f_q: f64,
}

impl CalibrationSettings {
    pub fn validate(&self) -> Result<(), OutbreakError> {
        if self.k_grid.is_empty() {
            return Err(OutbreakError::EmptyGrid("k_grid"));
        }
        for &k in &self.k_grid {
            check_positive("k", k)?;
        }
        if self.trials == 0 {
            return Err(OutbreakError::invalid("trials", "must be positive"));
        }
        check_not_nan("max_time", self.max_time)?;
        check_fraction("f_Q", self.f_q)?;
        self.ranges.validate()?;
        check_seed_within_cap(self.ranges.largest_seed(), self.max_cases)?;
        self.window.validate()
    }
}

/// Settings of the final-size engine; the primary grid axis is `f_home`.
#[derive(Debug, Clone, Deserialize)]
pub struct FinalSizeSettings {
    #[serde(alias = "R0")]
    pub r0: f64,
    pub k: f64,
    pub max_community_spread_grid: Vec<u64>,
    pub trials: usize,
    pub ranges: NuisanceRanges,
    pub days_elapsed: UniformRange,
    pub max_cases: u64,
    pub max_time: f64,
    pub people_per_household: f64,
    pub population: usize,
    pub samples_path: String,
}

impl FinalSizeSettings {
    pub fn validate(&self) -> Result<(), OutbreakError> {
        check_rate("r0", self.r0)?;
        check_positive("k", self.k)?;
        if self.max_community_spread_grid.is_empty() {
            return Err(OutbreakError::EmptyGrid("max_community_spread_grid"));
        }
        if self.trials == 0 {
            return Err(OutbreakError::invalid("trials", "must be positive"));
        }
        if self.population == 0 {
            return Err(OutbreakError::invalid("population", "must be positive"));
        }
        self.ranges.validate()?;
        let largest_seed = self.ranges.largest_seed();
        if largest_seed > self.population as u64 {
            return Err(OutbreakError::invalid(
                "n",
                format!(
                    "index cases up to {largest_seed} exceed population {}",
                    self.population
                ),
            ));
        }
        check_seed_within_cap(largest_seed, self.max_cases)?;
        check_positive("people_per_household", self.people_per_household)?;
        check_not_nan("max_time", self.max_time)?;
        self.days_elapsed.validate("days_elapsed")
    }
}

fn max_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Index cases count towards the case cap, so they may not exceed it.
fn check_seed_within_cap(n: u64, max_cases: u64) -> Result<(), OutbreakError> {
    if max_cases == 0 {
        return Err(OutbreakError::invalid("max_cases", "must be positive"));
    }
    if n > max_cases {
        return Err(OutbreakError::invalid(
            "n",
            format!("{n} index cases exceed max_cases {max_cases}"),
        ));
    }
    Ok(())
}

fn check_positive(name: &'static str, value: f64) -> Result<(), OutbreakError> {
    if !(value > 0.0) || !value.is_finite() {
        return Err(OutbreakError::invalid(
            name,
            format!("{value} is not a positive number"),
        ));
    }
    Ok(())
}

fn check_rate(name: &'static str, value: f64) -> Result<(), OutbreakError> {
    if !(value >= 0.0) || !value.is_finite() {
        return Err(OutbreakError::invalid(
            name,
            format!("{value} is not a non-negative number"),
        ));
    }
    Ok(())
}

fn check_fraction(name: &'static str, value: f64) -> Result<(), OutbreakError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(OutbreakError::invalid(name, format!("{value} is outside [0, 1]")));
    }
    Ok(())
}

fn check_not_nan(name: &'static str, value: f64) -> Result<(), OutbreakError> {
    if value.is_nan() {
        return Err(OutbreakError::invalid(name, "is NaN"));
    }
    Ok(())
}
