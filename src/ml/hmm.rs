//! Gaussian hidden Markov models trained with Baum-Welch.
//!
//! The E-step is split into [`forward`], [`backward`] and [`posteriors`], each a
//! pure function of an explicit parameter snapshot; [`reestimate`] is the
//! M-step and [`EmController`] chains them.

pub mod backward;
pub mod em;
pub mod forward;
pub mod gaussian;
pub mod init;
pub mod model;
pub mod posterior;
pub mod reestimate;
pub mod sample;
pub mod viterbi;

pub use backward::backward;
pub use em::{
    fit, CancellationToken, EmConfig, EmController, EmState, FitResult, IterationReport,
    Termination,
};
pub use forward::{forward, ForwardTable};
pub use gaussian::{density, emission_probabilities, GaussianDensity};
pub use init::{initial_parameters, InitConfig};
pub use model::{ModelParameters, ObservationSequence};
pub use posterior::{posteriors, Posteriors};
pub use reestimate::{reestimate, Reestimation, ReestimationConfig};
pub use sample::sample;
pub use viterbi::viterbi;
