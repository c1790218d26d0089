//! Feature-independent classifier predicting a fixed class distribution.

use numr::runtime::Runtime;
use numr::tensor::Tensor;
use serde::{Deserialize, Serialize};

use super::loss::{validate_fit_inputs, weighted_cross_entropy};
use super::traits::{ComponentClassifier, FitOptions, FitReport};
use crate::common::CbmClient;
use crate::common::tensor::{expand_cols, host_values};
use crate::error::{CbmError, CbmResult};
use crate::validation::validate_matrix;

const PRIOR_FLOOR: f64 = 1e-10;

/// Classifier that ignores the features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorProbClassifier {
    probs: Vec<f64>,
}

impl PriorProbClassifier {
    /// Uniform distribution over `num_classes` classes.
    pub fn uniform(num_classes: usize) -> Self {
        Self {
            probs: vec![1.0 / num_classes as f64; num_classes],
        }
    }

    /// Build from nonnegative class masses, floored and renormalized.
    pub fn from_probs(probs: &[f64]) -> CbmResult<Self> {
        if probs.is_empty() || probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(CbmError::InvalidParameter {
                parameter: "probs",
                message: format!("expected nonnegative finite class masses, got {probs:?}"),
            });
        }
        Ok(Self {
            probs: floor_and_normalize(probs),
        })
    }

    /// Binary prior with `P(present) = p`.
    pub fn binary(p: f64) -> CbmResult<Self> {
        Self::from_probs(&[1.0 - p.clamp(0.0, 1.0), p.clamp(0.0, 1.0)])
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    fn log_probs_tensor<R: Runtime>(&self, n: usize, device: &R::Device) -> CbmResult<Tensor<R>> {
        let logp: Vec<f64> = self.probs.iter().map(|p| p.ln()).collect();
        let row = Tensor::<R>::from_slice(&logp, &[logp.len()], device);
        Ok(expand_cols(&row, n)?.contiguous())
    }
}

fn floor_and_normalize(masses: &[f64]) -> Vec<f64> {
    let floored: Vec<f64> = masses.iter().map(|p| p.max(PRIOR_FLOOR)).collect();
    let total: f64 = floored.iter().sum();
    floored.iter().map(|p| p / total).collect()
}

impl<R: Runtime> ComponentClassifier<R> for PriorProbClassifier {
    fn num_classes(&self) -> usize {
        self.probs.len()
    }

    fn predict_log_class_probs<C: CbmClient<R>>(
        &self,
        _client: &C,
        features: &Tensor<R>,
    ) -> CbmResult<Tensor<R>> {
        let (n, _) = validate_matrix(features, "PriorProbClassifier::predict")?;
        self.log_probs_tensor(n, features.device())
    }

    fn fit<C: CbmClient<R>>(
        &mut self,
        client: &C,
        features: &Tensor<R>,
        targets: &Tensor<R>,
        weights: &Tensor<R>,
        options: &FitOptions,
    ) -> CbmResult<FitReport> {
        let n = validate_fit_inputs(
            features,
            targets,
            weights,
            None,
            self.probs.len(),
            "PriorProbClassifier::fit",
        )?;
        let before =
            ComponentClassifier::<R>::objective(self, client, features, targets, weights, options)?;
        let c = self.probs.len();
        let w = host_values(weights);
        let t = host_values(targets);
        let total: f64 = w.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return Ok(FitReport::unchanged(before));
        }
        let mut masses = vec![0.0; c];
        for i in 0..n {
            for (j, m) in masses.iter_mut().enumerate() {
                *m += w[i] * t[i * c + j];
            }
        }
        if masses.iter().any(|m| !m.is_finite()) {
            return Err(CbmError::numerical(
                "PriorProbClassifier::fit",
                "non-finite class mass",
            ));
        }
        self.probs = floor_and_normalize(&masses);
        let after =
            ComponentClassifier::<R>::objective(self, client, features, targets, weights, options)?;
        Ok(FitReport {
            iterations: 1,
            objective_before: before,
            objective_after: after,
            converged: true,
        })
    }

    fn objective<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
        targets: &Tensor<R>,
        weights: &Tensor<R>,
        _options: &FitOptions,
    ) -> CbmResult<f64> {
        validate_fit_inputs(
            features,
            targets,
            weights,
            None,
            self.probs.len(),
            "PriorProbClassifier::objective",
        )?;
        let logp = self.predict_log_class_probs(client, features)?;
        weighted_cross_entropy(client, &logp, targets, weights)
    }
}
