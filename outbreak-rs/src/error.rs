use thiserror::Error;

/// Errors raised by the simulators, calibration engines and grid dispatch.
///
/// Extinction and case-cap exhaustion are ordinary outcomes and are reported through
/// [`Termination`](crate::output::Termination), never through this type.
#[derive(Debug, Error)]
pub enum OutbreakError {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("grid `{0}` is empty")]
    EmptyGrid(&'static str),

    #[error("distribution rejected its parameters: {0}")]
    Distribution(String),

    #[error("worker for grid chunk {chunk} failed: {source}")]
    Worker {
        chunk: usize,
        #[source]
        source: Box<OutbreakError>,
    },

    #[error("thread pool error: {0}")]
    ThreadPool(String),

    #[error("could not persist results: {0}")]
    Persist(#[from] runenv::EnvError),
}

impl OutbreakError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        OutbreakError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
