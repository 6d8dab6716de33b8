use rand::rngs::StdRng;
use serde::Deserialize;

use crate::{
    calibration::{acceptance_fraction, final_size, quarantine_fraction},
    dispatch::dispatch_grid,
    error::OutbreakError,
    parameters::{CalibrationSettings, FinalSizeSettings},
    sink::ResultSink,
};

/// A grid sweep handed to the worker pool.
#[derive(Debug, Clone, Deserialize)]
pub struct GridRun<S> {
    pub n_workers: usize,
    /// Primary axis: R0 values, or f_home values for `final_size`.
    pub grid: Vec<f64>,
    pub grid_points_per_worker: usize,
    pub settings: S,
}

impl<S> GridRun<S> {
    fn dispatch<F, T>(&self, seed: u64, engine: F) -> Result<(), OutbreakError>
    where
        F: Fn(&[f64], &mut StdRng) -> Result<T, OutbreakError> + Sync,
    {
        dispatch_grid(
            self.n_workers,
            &self.grid,
            self.grid_points_per_worker,
            seed,
            engine,
        )
    }
}

/// The `input` table of a run description.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum RunConfig {
    AcceptanceFraction(GridRun<CalibrationSettings>),
    QuarantineFraction(GridRun<CalibrationSettings>),
    FinalSize(GridRun<FinalSizeSettings>),
}

impl RunConfig {
    pub fn engine(&self) -> &'static str {
        match self {
            RunConfig::AcceptanceFraction(_) => "acceptance_fraction",
            RunConfig::QuarantineFraction(_) => "quarantine_fraction",
            RunConfig::FinalSize(_) => "final_size",
        }
    }

    /// Validates the settings, then sweeps the grid on the worker pool.
    pub fn execute(&self, seed: u64, sink: &dyn ResultSink) -> Result<(), OutbreakError> {
        match self {
            RunConfig::AcceptanceFraction(run) => {
                run.settings.validate()?;
                run.dispatch(seed, |chunk, rng| {
                    acceptance_fraction(chunk, &run.settings, rng, sink)
                })
            }
            RunConfig::QuarantineFraction(run) => {
                run.settings.validate()?;
                run.dispatch(seed, |chunk, rng| {
                    quarantine_fraction(chunk, &run.settings, rng, sink)
                })
            }
            RunConfig::FinalSize(run) => {
                run.settings.validate()?;
                run.dispatch(seed, |chunk, rng| {
                    final_size(chunk, &run.settings, rng, sink)
                })
            }
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::sink::test::MemorySink;

    fn final_size_input() -> serde_json::Value {
        json!({
            "engine": "final_size",
            "n_workers": 2,
            "grid": [0.1, 0.3, 0.5],
            "grid_points_per_worker": 2,
            "settings": {
                "R0": 1.5,
                "k": 0.4,
                "max_community_spread_grid": [2, 8],
                "trials": 3,
                "ranges": {
                    "D": { "min": 4.0, "max": 6.0 },
                    "n_min": 1,
                    "n_max": 4,
                    "gamma_shape": { "min": 1.0, "max": 2.0 }
                },
                "days_elapsed": { "min": 20.0, "max": 30.0 },
                "max_cases": 500,
                "max_time": 10.0,
                "people_per_household": 2.5,
                "population": 500,
                "samples_path": "final_sizes_{}.csv"
            }
        })
    }

    #[test]
    fn test_deserialize_calibration_run() {
        let config: RunConfig = serde_json::from_value(json!({
            "engine": "quarantine_fraction",
            "n_workers": 4,
            "grid": [1.0, 2.0],
            "grid_points_per_worker": 1,
            "settings": {
                "k_grid": [0.1, 1.0],
                "trials": 10,
                "ranges": {
                    "D": { "min": 7.0, "max": 14.0 },
                    "n_min": 1,
                    "n_max": 10,
                    "gamma_shape": { "min": 1.0, "max": 3.0 }
                },
                "max_cases": 10000,
                "max_time": 90.0,
                "window": {
                    "days_elapsed_min": [40.0],
                    "days_elapsed_max": [60.0],
                    "min_number_cases": [1.0],
                    "max_number_cases": [10.0]
                },
                "samples_path": "samples_{}.csv",
                "f_Q": 0.5
            }
        }))
        .unwrap();
        assert_eq!(config.engine(), "quarantine_fraction");
        let RunConfig::QuarantineFraction(run) = config else {
            panic!("wrong engine");
        };
        assert_eq!(run.settings.f_q, 0.5);
        assert!(run.settings.validate().is_ok());
    }

    #[test]
    fn test_unknown_engine_is_rejected() {
        let result: Result<RunConfig, _> = serde_json::from_value(json!({ "engine": "mcmc" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_execute_final_size_persists_each_chunk() {
        let config: RunConfig = serde_json::from_value(final_size_input()).unwrap();
        let sink = MemorySink::default();
        config.execute(5, &sink).unwrap();
        let mut paths: Vec<String> = sink
            .tables
            .lock()
            .unwrap()
            .iter()
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["final_sizes_0.1.csv", "final_sizes_0.5.csv"]);
    }

    #[test]
    fn test_execute_validates_before_dispatch() {
        let mut input = final_size_input();
        input["settings"]["population"] = json!(0);
        let config: RunConfig = serde_json::from_value(input).unwrap();
        let sink = MemorySink::default();
        assert!(matches!(
            config.execute(5, &sink),
            Err(OutbreakError::InvalidParameter { name: "population", .. })
        ));
        assert!(sink.tables.lock().unwrap().is_empty());
    }
}
