//! Classifier capability trait and shared option/report types.

use numr::runtime::Runtime;
use numr::tensor::Tensor;

use crate::common::CbmClient;
use crate::error::CbmResult;

/// Options for a single weighted fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    /// Overall regularization strength `lambda`.
    pub regularization: f64,
    /// Elastic-net mixing: 1.0 is pure L1, 0.0 pure L2.
    pub l1_ratio: f64,
    /// Maximum number of proximal gradient iterations.
    pub max_iter: usize,
    /// Use backtracking line search instead of a fixed `1/Lip` step.
    pub line_search: bool,
    /// Restrict updates to coordinates active at the start of the fit.
    pub active_set: bool,
    /// Relative objective change below which the fit stops.
    pub tol: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            regularization: 1.0,
            l1_ratio: 0.0,
            max_iter: 10,
            line_search: true,
            active_set: false,
            tol: 1e-6,
        }
    }
}

/// Outcome of a fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitReport {
    /// Accepted update steps.
    pub iterations: usize,
    /// Objective before the first step.
    pub objective_before: f64,
    /// Objective after the last accepted step.
    pub objective_after: f64,
    /// Whether the relative change dropped below `tol` (or no descent step existed).
    pub converged: bool,
}

impl FitReport {
    /// Report for a fit that changed nothing.
    pub fn unchanged(objective: f64) -> Self {
        Self {
            iterations: 0,
            objective_before: objective,
            objective_after: objective,
            converged: true,
        }
    }
}

/// A probabilistic classifier trainable under per-example weights.
///
/// `features` is `[n, F]`, `targets` is `[n, C]` (soft targets, each row a
/// distribution over the classes) and `weights` is `[n]`.
pub trait ComponentClassifier<R: Runtime> {
    /// Number of classes `C`.
    fn num_classes(&self) -> usize;

    /// Log class probabilities `[n, C]`.
    fn predict_log_class_probs<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
    ) -> CbmResult<Tensor<R>>;

    /// Class probabilities `[n, C]`.
    fn predict_class_probs<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
    ) -> CbmResult<Tensor<R>> {
        let logp = self.predict_log_class_probs(client, features)?;
        Ok(client.exp(&logp)?)
    }

    /// Refit in place. On error the previous parameters are kept.
    fn fit<C: CbmClient<R>>(
        &mut self,
        client: &C,
        features: &Tensor<R>,
        targets: &Tensor<R>,
        weights: &Tensor<R>,
        options: &FitOptions,
    ) -> CbmResult<FitReport>;

    /// Regularized weighted log loss
    /// `(1/n) sum_i w_i CE(t_i, p_i) + penalty`.
    fn objective<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
        targets: &Tensor<R>,
        weights: &Tensor<R>,
        options: &FitOptions,
    ) -> CbmResult<f64>;
}
