use thiserror::Error;

/// Failures of the adaptive dense-output integrator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrationError {
    /// The step size collapsed below the resolvable time increment without
    /// meeting the error tolerance.
    #[error("step size {h:e} became too small at t = {t}")]
    StepSizeTooSmall { t: f64, h: f64 },
    /// The per-interval step budget was exhausted.
    #[error("maximum number of integration steps ({steps}) exceeded")]
    MaxStepsExceeded { steps: usize },
    /// The state or its error estimate stopped being finite.
    #[error("non-finite state encountered at t = {t}")]
    NonFiniteState { t: f64 },
    /// A dense query fell outside the most recent accepted step.
    #[error("dense output requested at t = {t} outside the last step [{start}, {end}]")]
    OutsideDenseRange { t: f64, start: f64, end: f64 },
    #[error("invalid integrator input: {0}")]
    InvalidInput(String),
}

/// Errors surfaced by the spin tracker.
#[derive(Debug, Error)]
pub enum SpinError {
    /// A configuration option is missing or malformed. Fatal at construction.
    #[error("invalid option `{option}`: {message}")]
    Configuration { option: String, message: String },
    /// Integration of the current tracking interval failed; the interval is
    /// abandoned.
    #[error("spin integration for {particle} diverged: {source}")]
    IntegrationDivergence {
        particle: String,
        #[source]
        source: IntegrationError,
    },
    /// The trajectory source handed over a segment that runs backwards in time.
    #[error("track segment runs backwards in time ({t1} -> {t2})")]
    InvalidSegment { t1: f64, t2: f64 },
    #[error("spin logging is enabled but no log stream was supplied")]
    MissingLogStream,
    #[error("failed to write spin log for {particle}: {source}")]
    Log {
        particle: String,
        #[source]
        source: std::io::Error,
    },
}

impl SpinError {
    pub(crate) fn config(option: &str, message: impl Into<String>) -> Self {
        SpinError::Configuration {
            option: option.to_string(),
            message: message.into(),
        }
    }
}
