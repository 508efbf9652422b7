//! Error and warning types shared by every estimation component.

use std::fmt;

use thiserror::Error;

/// The stage of an EM iteration that produced a vanishing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Forward,
    Backward,
    Posterior,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pass::Forward => "forward",
            Pass::Backward => "backward",
            Pass::Posterior => "posterior",
        };
        f.write_str(name)
    }
}

/// Fatal errors raised while validating inputs or running inference.
#[derive(Debug, Error)]
pub enum Error {
    /// Shapes, non-negativity or stochastic sums of π/A/μ/Σ are violated.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The observation sequence is empty, ragged or contains non-finite values.
    #[error("invalid observations: {0}")]
    InvalidObservations(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The covariance of `state` is not positive-definite.
    #[error("covariance matrix of state {state} is not positive-definite")]
    SingularCovariance { state: usize },

    /// Every entry of a row vanished before normalization at time `time`.
    #[error("{pass} row at time {time} sums to zero; observation is inconsistent with the model")]
    ZeroDensityRow { time: usize, pass: Pass },

    /// A fatal error raised inside an EM iteration.
    #[error("EM iteration {iteration} failed: {source}")]
    IterationFailed {
        iteration: usize,
        #[source]
        source: Box<Error>,
    },

    /// `step` was called on a controller that already terminated.
    #[error("EM controller has already terminated")]
    AlreadyDone,
}

impl Error {
    /// Wraps `self` with the index of the EM iteration that raised it.
    pub fn in_iteration(self, iteration: usize) -> Self {
        Error::IterationFailed {
            iteration,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Which part of a state's parameters could not be re-estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateComponent {
    /// The outgoing transition row (no expected transitions out of the state).
    Transitions,
    /// The mean and covariance (no expected occupancy).
    Emission,
}

impl fmt::Display for StateComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateComponent::Transitions => f.write_str("transition row"),
            StateComponent::Emission => f.write_str("emission parameters"),
        }
    }
}

/// Non-fatal: a state received (almost) no posterior mass, so its
/// `component` was carried over unchanged from the previous parameters.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("state {state} is degenerate (expected mass {mass:e}); {component} held over")]
pub struct DegenerateState {
    pub state: usize,
    pub component: StateComponent,
    pub mass: f64,
}
