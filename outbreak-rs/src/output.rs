/// Why a simulation run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A generation produced no new cases.
    Extinct,
    /// The earliest active case reached the observation horizon.
    Horizon,
    /// Cumulative incidence reached `max_cases` while cases were still active.
    CaseCap,
}

/// Cumulative incidence recorded once per generation (or step).
#[derive(Debug, Clone, PartialEq)]
pub struct IncidenceTrace {
    /// Earliest onset time of each generation's cases, or the step index.
    pub times: Vec<f64>,
    pub cumulative_incidence: Vec<u64>,
    pub termination: Termination,
}

impl IncidenceTrace {
    pub fn new(index_cases: u64) -> IncidenceTrace {
        IncidenceTrace {
            times: vec![0.0],
            cumulative_incidence: vec![index_cases],
            termination: Termination::Extinct,
        }
    }

    pub fn push(&mut self, time: f64, cumulative: u64) {
        self.times.push(time);
        self.cumulative_incidence.push(cumulative);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Latest recorded time.
    pub fn last_time(&self) -> f64 {
        self.times.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn final_size(&self) -> u64 {
        self.cumulative_incidence.last().copied().unwrap_or(0)
    }
}

/// Result of a household/community run: the trace plus the population end state.
#[derive(Debug, Clone, PartialEq)]
pub struct HouseholdOutput {
    pub trace: IncidenceTrace,
    pub infected: Vec<bool>,
    pub elapsed: Vec<f64>,
}

impl HouseholdOutput {
    pub fn infected_count(&self) -> u64 {
        self.infected.iter().filter(|&&i| i).count() as u64
    }
}
