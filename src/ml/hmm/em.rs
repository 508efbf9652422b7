//! Baum-Welch expectation-maximization driver.
//!
//! Each iteration evaluates the emission table for the current parameters,
//! runs the forward and backward passes concurrently, combines them into
//! posteriors and re-estimates the parameters. The new parameters replace the
//! old ones only after the whole iteration succeeded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use ndarray::Array2;

use super::backward::backward;
use super::forward::forward;
use super::gaussian::{emission_probabilities, state_densities};
use super::model::{ModelParameters, ObservationSequence};
use super::posterior::{posteriors, Posteriors};
use super::reestimate::{reestimate, ReestimationConfig, DEFAULT_MIN_OCCUPANCY};
use crate::error::{DegenerateState, Error, Result};

/// Configuration options for Baum-Welch training.
#[derive(Debug, Clone)]
pub struct EmConfig {
    /// Hard upper bound on the number of iterations.
    pub max_iterations: usize,
    /// Stop once no entry of θ moves by more than this.
    pub tolerance: Option<f64>,
    /// Stop once the log-likelihood improves by less than this.
    pub log_likelihood_tolerance: Option<f64>,
    /// Expected mass at or below which a state is held over.
    pub min_occupancy: f64,
    /// Added to the diagonal of re-estimated covariances.
    pub covariance_regularization: f64,
    /// Wall-clock budget, checked between iterations.
    pub timeout: Option<Duration>,
}

impl EmConfig {
    /// Create a new config with 100 iterations and no early stopping.
    pub fn new() -> Self {
        Self {
            max_iterations: 100,
            tolerance: None,
            log_likelihood_tolerance: None,
            min_occupancy: DEFAULT_MIN_OCCUPANCY,
            covariance_regularization: 0.0,
            timeout: None,
        }
    }

    /// Customize the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Stop early when the largest parameter change falls below `tolerance`.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Stop early when the log-likelihood gain falls below `tolerance`.
    pub fn with_log_likelihood_tolerance(mut self, tolerance: f64) -> Self {
        self.log_likelihood_tolerance = Some(tolerance);
        self
    }

    pub fn with_min_occupancy(mut self, min_occupancy: f64) -> Self {
        self.min_occupancy = min_occupancy;
        self
    }

    pub fn with_covariance_regularization(mut self, regularization: f64) -> Self {
        self.covariance_regularization = regularization;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig(
                "max_iterations must be at least 1".into(),
            ));
        }
        let non_negative = |name: &str, value: f64| {
            if value.is_nan() || value < 0.0 {
                Err(Error::InvalidConfig(format!(
                    "{} must be non-negative, got {}",
                    name, value
                )))
            } else {
                Ok(())
            }
        };
        if let Some(tol) = self.tolerance {
            non_negative("tolerance", tol)?;
        }
        if let Some(tol) = self.log_likelihood_tolerance {
            non_negative("log_likelihood_tolerance", tol)?;
        }
        non_negative("min_occupancy", self.min_occupancy)?;
        non_negative("covariance_regularization", self.covariance_regularization)?;
        Ok(())
    }

    fn reestimation(&self) -> ReestimationConfig {
        ReestimationConfig {
            min_occupancy: self.min_occupancy,
            covariance_regularization: self.covariance_regularization,
        }
    }
}

impl Default for EmConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared flag used to stop training between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why training stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    MaxIterations,
    /// The parameter change fell below `tolerance`.
    Converged,
    /// The log-likelihood gain fell below `log_likelihood_tolerance`.
    LikelihoodConverged,
    Cancelled,
    TimedOut,
    /// An iteration raised a fatal error.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmState {
    Running,
    Done(Termination),
}

/// Diagnostics for one completed iteration.
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub iteration: usize,
    /// `ln P(X | θ)` for the parameters the iteration started from.
    pub log_likelihood: f64,
    /// Largest absolute change across all entries of θ.
    pub parameter_change: f64,
    pub warnings: Vec<DegenerateState>,
}

/// Final state of a training run.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub params: ModelParameters,
    /// γ from the last completed iteration, if any iteration ran.
    pub gamma: Option<Array2<f64>>,
    pub reports: Vec<IterationReport>,
    pub termination: Termination,
}

impl FitResult {
    pub fn iterations(&self) -> usize {
        self.reports.len()
    }

    pub fn log_likelihoods(&self) -> Vec<f64> {
        self.reports.iter().map(|r| r.log_likelihood).collect()
    }
}

/// Everything one E-step + M-step produces.
struct Iteration {
    log_likelihood: f64,
    posteriors: Posteriors,
    params: ModelParameters,
    warnings: Vec<DegenerateState>,
}

/// Runs one full iteration against a frozen parameter snapshot.
fn iterate(
    observations: &ObservationSequence,
    params: &ModelParameters,
    config: &ReestimationConfig,
) -> Result<Iteration> {
    let emissions = emission_probabilities(observations, params)?;
    let (fwd, beta) = rayon::join(
        || forward(params, &emissions),
        || backward(params, &emissions),
    );
    let fwd = fwd?;
    let beta = beta?;
    let posteriors = posteriors(params, &emissions, &fwd.alpha, &beta)?;
    let update = reestimate(observations, &posteriors, params, config)?;
    Ok(Iteration {
        log_likelihood: fwd.log_likelihood(),
        posteriors,
        params: update.params,
        warnings: update.warnings,
    })
}

/// Steps Baum-Welch over one observation sequence.
///
/// # Example
///
/// ```
/// use baum_welch::ml::hmm::{EmConfig, EmController, ModelParameters, ObservationSequence};
/// use ndarray::array;
///
/// let observations = ObservationSequence::from_scalars(&[-1.1, -0.9, 1.2, 0.8, -1.0]).unwrap();
/// let initial = ModelParameters::new(
///     array![0.5, 0.5],
///     array![[0.8, 0.2], [0.2, 0.8]],
///     array![[-0.5], [0.5]],
///     vec![array![[1.0]], array![[1.0]]],
/// )
/// .unwrap();
///
/// let config = EmConfig::new().with_max_iterations(20);
/// let result = EmController::new(&observations, initial, config).unwrap().run().unwrap();
/// assert_eq!(result.iterations(), 20);
/// ```
#[derive(Debug)]
pub struct EmController<'a> {
    observations: &'a ObservationSequence,
    config: EmConfig,
    params: ModelParameters,
    gamma: Option<Array2<f64>>,
    reports: Vec<IterationReport>,
    state: EmState,
    cancel: CancellationToken,
    /// Set by the first `step` or `run`, so time spent between construction
    /// and training does not count against the timeout.
    started: Option<Instant>,
}

impl<'a> EmController<'a> {
    /// Creates a controller in the `Running` state.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidConfig` for an out-of-range configuration.
    /// - `Error::InvalidParameters` if `initial` does not match the observation dimension.
    /// - `Error::SingularCovariance` if an initial covariance is not positive-definite.
    pub fn new(
        observations: &'a ObservationSequence,
        initial: ModelParameters,
        config: EmConfig,
    ) -> Result<Self> {
        config.validate()?;
        initial.check_compatible(observations)?;
        state_densities(&initial)?;

        Ok(Self {
            observations,
            config,
            params: initial,
            gamma: None,
            reports: Vec::new(),
            state: EmState::Running,
            cancel: CancellationToken::new(),
            started: None,
        })
    }

    /// Uses `token` to stop training between iterations.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> EmState {
        self.state
    }

    /// The current parameters: the initial ones, or the output of the last
    /// completed iteration.
    pub fn params(&self) -> &ModelParameters {
        &self.params
    }

    /// γ of the last completed iteration.
    pub fn gamma(&self) -> Option<&Array2<f64>> {
        self.gamma.as_ref()
    }

    pub fn reports(&self) -> &[IterationReport] {
        &self.reports
    }

    /// Runs exactly one iteration.
    ///
    /// On success the parameters are replaced and the state moves to `Done`
    /// if a stopping rule fired. On failure the parameters are left as they
    /// were, the state moves to `Done(Failed)` and the error is wrapped in
    /// `Error::IterationFailed`.
    pub fn step(&mut self) -> Result<&IterationReport> {
        if let EmState::Done(_) = self.state {
            return Err(Error::AlreadyDone);
        }
        self.started.get_or_insert_with(Instant::now);
        let iteration = self.reports.len();

        let outcome = match iterate(self.observations, &self.params, &self.config.reestimation()) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.state = EmState::Done(Termination::Failed);
                return Err(err.in_iteration(iteration));
            }
        };

        let parameter_change = outcome.params.max_abs_diff(&self.params);
        let previous_ll = self.reports.last().map(|r| r.log_likelihood);
        debug!(
            "EM iteration {}: log-likelihood {:.6}, parameter change {:.3e}",
            iteration, outcome.log_likelihood, parameter_change
        );

        self.params = outcome.params;
        self.gamma = Some(outcome.posteriors.gamma);
        self.reports.push(IterationReport {
            iteration,
            log_likelihood: outcome.log_likelihood,
            parameter_change,
            warnings: outcome.warnings,
        });

        let completed = iteration + 1;
        let termination = if self.config.tolerance.is_some_and(|tol| parameter_change < tol) {
            Some(Termination::Converged)
        } else if let (Some(tol), Some(prev)) = (self.config.log_likelihood_tolerance, previous_ll) {
            (outcome.log_likelihood - prev < tol).then_some(Termination::LikelihoodConverged)
        } else {
            None
        };
        let termination = termination.or_else(|| {
            (completed >= self.config.max_iterations).then_some(Termination::MaxIterations)
        });
        if let Some(termination) = termination {
            info!(
                "EM finished after {} iterations: {:?}",
                completed, termination
            );
            self.state = EmState::Done(termination);
        }

        Ok(&self.reports[iteration])
    }

    /// Iterates until a stopping rule, cancellation or timeout.
    ///
    /// Cancellation and the timeout are only checked between iterations. The
    /// timeout is measured from the first `step` or `run` call.
    pub fn run(mut self) -> Result<FitResult> {
        let started = *self.started.get_or_insert_with(Instant::now);
        let termination = loop {
            if let EmState::Done(termination) = self.state {
                break termination;
            }
            if self.cancel.is_cancelled() {
                info!("EM cancelled after {} iterations", self.reports.len());
                self.state = EmState::Done(Termination::Cancelled);
                continue;
            }
            if let Some(timeout) = self.config.timeout {
                if started.elapsed() >= timeout {
                    info!("EM timed out after {} iterations", self.reports.len());
                    self.state = EmState::Done(Termination::TimedOut);
                    continue;
                }
            }
            self.step()?;
        };

        Ok(FitResult {
            params: self.params,
            gamma: self.gamma,
            reports: self.reports,
            termination,
        })
    }
}

/// Trains `initial` on `observations` until a stopping rule fires.
pub fn fit(
    observations: &ObservationSequence,
    initial: ModelParameters,
    config: EmConfig,
) -> Result<FitResult> {
    EmController::new(observations, initial, config)?.run()
}
