//! Rejection-sampling (ABC) calibration engines.
//!
//! Every engine sweeps a two-axis grid. Each cell runs `trials` simulations with nuisance
//! parameters (`D`, `n`, `gamma_shape`, `days_elapsed`) drawn uniformly from their ranges,
//! then judges or aggregates the outcome. At the end of the sweep the result is handed to a
//! [`ResultSink`] under a path keyed by the first value of the primary axis.

use log::{debug, info, warn};
use nalgebra::DMatrix;
use rand::Rng;

use crate::{
    branching::BranchingModel,
    error::OutbreakError,
    household::HouseholdModel,
    output::{IncidenceTrace, Termination},
    parameters::{
        CalibrationSettings, FinalSizeSettings, HouseholdParameters, NuisanceRanges,
        ObservationWindow, OutbreakParameters, UniformRange,
    },
    sink::{ResultSink, render_path},
};

/// Column order of a persisted chain.
pub const CHAIN_COLUMNS: [&str; 6] = ["R0", "k", "D", "n", "days_elapsed", "gamma_shape"];

/// Nuisance parameters drawn for one trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialDraw {
    pub d: f64,
    pub n: u64,
    pub gamma_shape: f64,
    pub days_elapsed: f64,
}

impl TrialDraw {
    pub fn sample<R: Rng + ?Sized>(
        ranges: &NuisanceRanges,
        days_elapsed: &UniformRange,
        rng: &mut R,
    ) -> TrialDraw {
        let d = ranges.d.sample(rng);
        let n = rng.random_range(ranges.n_min..ranges.n_max);
        let gamma_shape = ranges.gamma_shape.sample(rng);
        let days_elapsed = days_elapsed.sample(rng);
        TrialDraw {
            d,
            n,
            gamma_shape,
            days_elapsed,
        }
    }
}

/// One accepted parameter tuple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainSample {
    pub r0: f64,
    pub k: f64,
    pub d: f64,
    pub n: u64,
    pub days_elapsed: f64,
    pub gamma_shape: f64,
}

impl ChainSample {
    fn accepted(r0: f64, k: f64, draw: &TrialDraw) -> ChainSample {
        ChainSample {
            r0,
            k,
            d: draw.d,
            n: draw.n,
            days_elapsed: draw.days_elapsed,
            gamma_shape: draw.gamma_shape,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationChain {
    samples: Vec<ChainSample>,
}

impl CalibrationChain {
    pub fn push(&mut self, sample: ChainSample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[ChainSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// One row per accepted trial, columns in [`CHAIN_COLUMNS`] order.
    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_row_iterator(
            self.samples.len(),
            CHAIN_COLUMNS.len(),
            self.samples.iter().flat_map(|s| {
                [s.r0, s.k, s.d, s.n as f64, s.days_elapsed, s.gamma_shape]
            }),
        )
    }
}

/// Per-cell tallies of a sweep; rows follow the primary grid, columns the `k` grid.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptanceGrid {
    accepted: DMatrix<usize>,
    evaluated: DMatrix<usize>,
}

impl AcceptanceGrid {
    pub fn new(rows: usize, cols: usize) -> AcceptanceGrid {
        AcceptanceGrid {
            accepted: DMatrix::zeros(rows, cols),
            evaluated: DMatrix::zeros(rows, cols),
        }
    }

    fn record(&mut self, row: usize, col: usize, accept: bool) {
        self.evaluated[(row, col)] += 1;
        if accept {
            self.accepted[(row, col)] += 1;
        }
    }

    pub fn accepted(&self, row: usize, col: usize) -> usize {
        self.accepted[(row, col)]
    }

    pub fn evaluated(&self, row: usize, col: usize) -> usize {
        self.evaluated[(row, col)]
    }

    /// Accepted over evaluated trials, or 0 when nothing in the cell was evaluated.
    pub fn rate(&self, row: usize, col: usize) -> f64 {
        match self.evaluated(row, col) {
            0 => 0.0,
            evaluated => self.accepted(row, col) as f64 / evaluated as f64,
        }
    }

    pub fn rates(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.accepted.nrows(), self.accepted.ncols(), |i, j| {
            self.rate(i, j)
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.accepted.shape()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationOutcome {
    pub chain: CalibrationChain,
    pub grid: AcceptanceGrid,
}

/// Final sizes indexed by (f_home, max_community_spread, trial).
#[derive(Debug, Clone, PartialEq)]
pub struct FinalSizeTable {
    f_home: Vec<f64>,
    max_community_spread: Vec<u64>,
    trials: usize,
    values: Vec<f64>,
}

impl FinalSizeTable {
    pub fn new(f_home: Vec<f64>, max_community_spread: Vec<u64>, trials: usize) -> Self {
        let len = f_home.len() * max_community_spread.len() * trials;
        FinalSizeTable {
            f_home,
            max_community_spread,
            trials,
            values: vec![f64::NAN; len],
        }
    }

    fn offset(&self, i: usize, j: usize, trial: usize) -> usize {
        (i * self.max_community_spread.len() + j) * self.trials + trial
    }

    pub fn get(&self, i: usize, j: usize, trial: usize) -> f64 {
        self.values[self.offset(i, j, trial)]
    }

    pub fn set(&mut self, i: usize, j: usize, trial: usize, value: f64) {
        let offset = self.offset(i, j, trial);
        self.values[offset] = value;
    }

    pub fn f_home(&self) -> &[f64] {
        &self.f_home
    }

    pub fn max_community_spread(&self) -> &[u64] {
        &self.max_community_spread
    }

    pub fn trials(&self) -> usize {
        self.trials
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

enum Verdict {
    Accepted,
    Rejected,
    /// Left out of both the accepted and the evaluated count.
    Skipped,
}

/// Linear interpolation with `numpy.interp` semantics: `xp` is increasing and values outside
/// it are clamped to the end points.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let (Some(&first), Some(&last)) = (xp.first(), xp.last()) else {
        return f64::NAN;
    };
    if x <= first {
        return fp[0];
    }
    if x >= last {
        return fp[fp.len() - 1];
    }
    let j = xp.partition_point(|&v| v <= x);
    let (x0, x1) = (xp[j - 1], xp[j]);
    let (y0, y1) = (fp[j - 1], fp[j]);
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// Cumulative incidence at each observation, interpolated linearly in log10 space.
fn cases_at_observations(trace: &IncidenceTrace, days_elapsed: f64, offsets: &[f64]) -> Vec<f64> {
    let log_cases: Vec<f64> = trace
        .cumulative_incidence
        .iter()
        .map(|&c| (c as f64).log10())
        .collect();
    offsets
        .iter()
        .map(|offset| 10f64.powf(interp(days_elapsed + offset, &trace.times, &log_cases)))
        .collect()
}

fn within_observations(cases: &[f64], window: &ObservationWindow) -> bool {
    cases
        .iter()
        .zip(window.min_number_cases.iter().zip(&window.max_number_cases))
        .all(|(&c, (&lo, &hi))| lo < c && c < hi)
}

fn validate_primary_grid(name: &'static str, grid: &[f64]) -> Result<(), OutbreakError> {
    if grid.is_empty() {
        return Err(OutbreakError::EmptyGrid(name));
    }
    if let Some(bad) = grid.iter().find(|v| !(**v >= 0.0) || !v.is_finite()) {
        return Err(OutbreakError::invalid(name, format!("{bad} is not a non-negative number")));
    }
    Ok(())
}

/// Runs the shared R0 x k trial loop of the unstructured engines.
fn sweep<R, F>(
    engine: &str,
    r0_grid: &[f64],
    settings: &CalibrationSettings,
    f_q: f64,
    rng: &mut R,
    mut judge: F,
) -> Result<CalibrationOutcome, OutbreakError>
where
    R: Rng + ?Sized,
    F: FnMut(&IncidenceTrace, &TrialDraw) -> Verdict,
{
    validate_primary_grid("R0_grid", r0_grid)?;
    settings.validate()?;

    let horizon = settings.window.horizon();
    let mut chain = CalibrationChain::default();
    let mut grid = AcceptanceGrid::new(r0_grid.len(), settings.k_grid.len());
    info!(
        "{engine}: R0 {:?} x {} k values, {} trials per cell",
        r0_grid,
        settings.k_grid.len(),
        settings.trials
    );

    for (i, &r0) in r0_grid.iter().enumerate() {
        for (j, &k) in settings.k_grid.iter().enumerate() {
            for _ in 0..settings.trials {
                let draw = TrialDraw::sample(&settings.ranges, &horizon, rng);
                let parameters = OutbreakParameters {
                    r0,
                    k,
                    n: draw.n,
                    d: draw.d,
                    gamma_shape: draw.gamma_shape,
                    max_time: settings.max_time,
                    days_elapsed_max: draw.days_elapsed,
                    max_cases: settings.max_cases,
                    f_q,
                };
                let trace = BranchingModel::simulate(&parameters, rng)?;
                match judge(&trace, &draw) {
                    Verdict::Accepted => {
                        grid.record(i, j, true);
                        chain.push(ChainSample::accepted(r0, k, &draw));
                    }
                    Verdict::Rejected => grid.record(i, j, false),
                    Verdict::Skipped => {}
                }
            }
            if grid.evaluated(i, j) == 0 {
                warn!("{engine}: every trial at R0={r0}, k={k} was skipped");
            }
            debug!(
                "{engine}: R0={r0} k={k} accepted {}/{} (rate {:.4})",
                grid.accepted(i, j),
                grid.evaluated(i, j),
                grid.rate(i, j)
            );
        }
    }
    info!("{engine}: R0 {} done, {} samples accepted", r0_grid[0], chain.len());
    Ok(CalibrationOutcome { chain, grid })
}

/// Accepts a trial when the log-linearly interpolated cumulative incidence lies strictly
/// inside every observation's bounds.
///
/// Trials whose outbreak never reaches the drawn horizon are skipped: they count neither as
/// accepted nor as evaluated, so acceptance rates only describe outbreaks that survive to
/// the comparison time.
pub fn acceptance_fraction<R: Rng + ?Sized>(
    r0_grid: &[f64],
    settings: &CalibrationSettings,
    rng: &mut R,
    sink: &dyn ResultSink,
) -> Result<CalibrationOutcome, OutbreakError> {
    let offsets = settings.window.offsets();
    let outcome = sweep("acceptance_fraction", r0_grid, settings, 0.0, rng, |trace, draw| {
        if trace.last_time() < draw.days_elapsed {
            return Verdict::Skipped;
        }
        let cases = cases_at_observations(trace, draw.days_elapsed, &offsets);
        if within_observations(&cases, &settings.window) {
            Verdict::Accepted
        } else {
            Verdict::Rejected
        }
    })?;
    sink.save_chain(&render_path(&settings.samples_path, r0_grid[0]), &outcome.chain)?;
    Ok(outcome)
}

/// Accepts a trial when the quarantined outbreak has stopped: it must not still be recording
/// cases after the latest observation horizon, and it must not have run into `max_cases`.
/// Every trial is evaluated.
pub fn quarantine_fraction<R: Rng + ?Sized>(
    r0_grid: &[f64],
    settings: &CalibrationSettings,
    rng: &mut R,
    sink: &dyn ResultSink,
) -> Result<CalibrationOutcome, OutbreakError> {
    let latest = settings.window.horizon().max;
    let max_cases = settings.max_cases;
    let outcome = sweep(
        "quarantine_fraction",
        r0_grid,
        settings,
        settings.f_q,
        rng,
        |trace, _| {
            if trace.last_time() > latest {
                // still ongoing
                Verdict::Rejected
            } else if trace.final_size() > max_cases || trace.termination == Termination::CaseCap {
                Verdict::Rejected
            } else {
                Verdict::Accepted
            }
        },
    )?;
    sink.save_chain(&render_path(&settings.samples_path, r0_grid[0]), &outcome.chain)?;
    Ok(outcome)
}

/// Records the final fraction infected of structured runs over an
/// f_home x max_community_spread grid. Nothing is accepted or rejected.
pub fn final_size<R: Rng + ?Sized>(
    f_home_grid: &[f64],
    settings: &FinalSizeSettings,
    rng: &mut R,
    sink: &dyn ResultSink,
) -> Result<FinalSizeTable, OutbreakError> {
    validate_primary_grid("f_home_grid", f_home_grid)?;
    if let Some(bad) = f_home_grid.iter().find(|f| **f > 1.0) {
        return Err(OutbreakError::invalid("f_home_grid", format!("{bad} is outside [0, 1]")));
    }
    settings.validate()?;

    let mut table = FinalSizeTable::new(
        f_home_grid.to_vec(),
        settings.max_community_spread_grid.clone(),
        settings.trials,
    );
    info!(
        "final_size: f_home {:?} x {} spread caps, {} trials per cell",
        f_home_grid,
        settings.max_community_spread_grid.len(),
        settings.trials
    );

    for (i, &f_home) in f_home_grid.iter().enumerate() {
        for (j, &max_community_spread) in settings.max_community_spread_grid.iter().enumerate() {
            for trial in 0..settings.trials {
                let draw = TrialDraw::sample(&settings.ranges, &settings.days_elapsed, rng);
                let parameters = HouseholdParameters {
                    r0: settings.r0,
                    k: settings.k,
                    n: draw.n,
                    d: draw.d,
                    max_time: settings.max_time,
                    max_cases: settings.max_cases,
                    f_home,
                    people_per_household: settings.people_per_household,
                    max_community_spread,
                    population: settings.population,
                };
                let output = HouseholdModel::simulate(&parameters, rng)?;
                let fraction = output.trace.final_size() as f64 / settings.population as f64;
                table.set(i, j, trial, fraction);
            }
            debug!("final_size: f_home={f_home} max_community_spread={max_community_spread} done");
        }
    }
    sink.save_final_sizes(&render_path(&settings.samples_path, f_home_grid[0]), &table)?;
    info!("final_size: f_home {} done", f_home_grid[0]);
    Ok(table)
}
