//! Options and reports of the mixture-of-experts trainer.

use crate::classifier::{FitOptions, FitReport, LearnerKind};
use crate::error::{CbmError, CbmResult};
use crate::mixture::traits::bernoulli::BernoulliMixtureOptions;
use crate::validation::validate_elastic_net;

/// Options for [`CbmOptimizer`](super::CbmOptimizer).
#[derive(Debug, Clone)]
pub struct CbmOptimizerOptions {
    /// Regularization strength of the gating classifier.
    pub regularization_multiclass: f64,
    /// Regularization strength of every binary cell.
    pub regularization_binary: f64,
    /// L1 share of the gating penalty.
    pub l1_ratio_multiclass: f64,
    /// L1 share of the cell penalty.
    pub l1_ratio_binary: f64,
    pub line_search: bool,
    pub active_set: bool,
    /// Inner iterations of the gating fit per M-step.
    pub multiclass_updates_per_iter: usize,
    /// Inner iterations of each cell fit per M-step.
    pub binary_updates_per_iter: usize,
    /// Maximum outer EM iterations of `optimize`.
    pub max_iter: usize,
    /// Relative log-likelihood change below which `optimize` stops.
    pub tol: f64,
    /// Cells of clusters whose total responsibility is below this are skipped.
    pub min_cluster_weight: f64,
    /// Options of the label-mixture initialization; `n_components` is overridden.
    pub bernoulli: BernoulliMixtureOptions,
    /// Learner of the model built by [`train_cbm`](super::train_cbm).
    pub learner: LearnerKind,
}

impl Default for CbmOptimizerOptions {
    fn default() -> Self {
        Self {
            regularization_multiclass: 1.0,
            regularization_binary: 1.0,
            l1_ratio_multiclass: 0.0,
            l1_ratio_binary: 0.0,
            line_search: true,
            active_set: false,
            multiclass_updates_per_iter: 10,
            binary_updates_per_iter: 10,
            max_iter: 10,
            tol: 1e-4,
            min_cluster_weight: 1e-8,
            bernoulli: BernoulliMixtureOptions::default(),
            learner: LearnerKind::default(),
        }
    }
}

impl CbmOptimizerOptions {
    pub(crate) fn validate(&self) -> CbmResult<()> {
        validate_elastic_net(self.regularization_multiclass, self.l1_ratio_multiclass)?;
        validate_elastic_net(self.regularization_binary, self.l1_ratio_binary)?;
        if !self.tol.is_finite() || self.tol < 0.0 {
            return Err(CbmError::InvalidParameter {
                parameter: "tol",
                message: format!("must be finite and >= 0, got {}", self.tol),
            });
        }
        if !self.min_cluster_weight.is_finite() || self.min_cluster_weight < 0.0 {
            return Err(CbmError::InvalidParameter {
                parameter: "min_cluster_weight",
                message: format!("must be finite and >= 0, got {}", self.min_cluster_weight),
            });
        }
        if let LearnerKind::Boosted(boost) = &self.learner {
            boost.validate()?;
        }
        Ok(())
    }

    /// Fit options of the gating update.
    pub fn gating_fit_options(&self) -> FitOptions {
        FitOptions {
            regularization: self.regularization_multiclass,
            l1_ratio: self.l1_ratio_multiclass,
            max_iter: self.multiclass_updates_per_iter,
            line_search: self.line_search,
            active_set: self.active_set,
            ..FitOptions::default()
        }
    }

    /// Fit options of every cell update.
    pub fn cell_fit_options(&self) -> FitOptions {
        FitOptions {
            regularization: self.regularization_binary,
            l1_ratio: self.l1_ratio_binary,
            max_iter: self.binary_updates_per_iter,
            line_search: self.line_search,
            active_set: self.active_set,
            ..FitOptions::default()
        }
    }
}

/// Summary of one M-step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MStepReport {
    /// Gating fit, `None` when it failed and kept its parameters.
    pub gating: Option<FitReport>,
    pub cells_fitted: usize,
    /// Cells that left a placeholder state during this step.
    pub cells_promoted: usize,
    pub cells_skipped: usize,
    pub cells_failed: usize,
}

/// Summary of an `optimize` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizeReport {
    /// Outer iterations run.
    pub iterations: usize,
    /// Data log-likelihood from the E-step of every iteration.
    pub log_likelihoods: Vec<f64>,
    pub converged: bool,
}

impl OptimizeReport {
    pub fn final_log_likelihood(&self) -> Option<f64> {
        self.log_likelihoods.last().copied()
    }
}
