//! Per-cluster, per-label binary classifier state.

use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

use super::learner::{Learner, LearnerKind};
use super::loss::{validate_fit_inputs, weighted_cross_entropy};
use super::prior::PriorProbClassifier;
use super::traits::{ComponentClassifier, FitOptions, FitReport};
use crate::common::CbmClient;
use crate::error::CbmResult;
use crate::validation::validate_matrix;

/// State of one cell of the `K x L` classifier grid.
///
/// Cells only move forward: `Uninitialized -> PriorOnly -> Fitted`, or
/// straight to `Fitted` on the first weighted fit.
#[derive(Debug, Clone)]
pub enum CellState<R: Runtime> {
    /// Never trained; predicts 0.5.
    Uninitialized,
    /// Feature-independent placeholder.
    PriorOnly(PriorProbClassifier),
    /// Trained binary learner.
    Fitted(Learner<R>),
}

impl<R: Runtime> CellState<R> {
    /// Turn any state into a binary learner of kind `learner` ready for
    /// fitting. A prior-only cell starts from its prior; a fitted cell is
    /// returned as is.
    pub fn promote(
        self,
        num_features: usize,
        learner: &LearnerKind,
        device: &R::Device,
    ) -> Learner<R> {
        match self {
            Self::Uninitialized => learner.create(num_features, 2, device),
            Self::PriorOnly(prior) => learner.from_prior(num_features, &prior, device),
            Self::Fitted(fitted) => fitted,
        }
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self, Self::Fitted(_))
    }

    pub fn is_uninitialized(&self) -> bool {
        matches!(self, Self::Uninitialized)
    }

    /// Short tag used in summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::PriorOnly(_) => "prior",
            Self::Fitted(_) => "fitted",
        }
    }

    /// Log class probabilities `[n, 2]`; class 1 is "label present".
    pub fn predict_log_class_probs<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
    ) -> CbmResult<Tensor<R>> {
        match self {
            Self::Uninitialized => {
                let (n, _) = validate_matrix(features, "CellState::predict")?;
                Ok(Tensor::<R>::full_scalar(
                    &[n, 2],
                    DType::F64,
                    0.5f64.ln(),
                    features.device(),
                ))
            }
            Self::PriorOnly(prior) => prior.predict_log_class_probs(client, features),
            Self::Fitted(fitted) => fitted.predict_log_class_probs(client, features),
        }
    }

    pub fn predict_class_probs<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
    ) -> CbmResult<Tensor<R>> {
        let logp = self.predict_log_class_probs(client, features)?;
        Ok(client.exp(&logp)?)
    }

    /// Refit in place. A placeholder is first promoted to a `learner`; on
    /// error the cell keeps its previous state.
    pub fn fit<C: CbmClient<R>>(
        &mut self,
        learner: &LearnerKind,
        client: &C,
        features: &Tensor<R>,
        targets: &Tensor<R>,
        weights: &Tensor<R>,
        options: &FitOptions,
    ) -> CbmResult<FitReport> {
        if let Self::Fitted(fitted) = self {
            return fitted.fit(client, features, targets, weights, options);
        }
        let (_, num_features) = validate_matrix(features, "CellState::fit")?;
        let mut fitted = self.clone().promote(num_features, learner, features.device());
        let report = fitted.fit(client, features, targets, weights, options)?;
        *self = Self::Fitted(fitted);
        Ok(report)
    }

    /// Weighted log loss of the current state, with the learner's penalty
    /// once fitted.
    pub fn objective<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
        targets: &Tensor<R>,
        weights: &Tensor<R>,
        options: &FitOptions,
    ) -> CbmResult<f64> {
        match self {
            Self::Fitted(fitted) => fitted.objective(client, features, targets, weights, options),
            _ => {
                validate_fit_inputs(features, targets, weights, None, 2, "CellState::objective")?;
                let logp = self.predict_log_class_probs(client, features)?;
                weighted_cross_entropy(client, &logp, targets, weights)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::BoostOptions;
    use crate::error::CbmError;
    use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};

    fn setup() -> (CpuClient, CpuDevice) {
        let device = CpuDevice::new();
        let client = CpuClient::new(device.clone());
        (client, device)
    }

    #[test]
    fn test_promote_prior_keeps_prediction() {
        let (client, device) = setup();
        let x = Tensor::<CpuRuntime>::from_slice(&[0.3, -1.0, 2.0, 0.5], &[2, 2], &device);

        for learner in [LearnerKind::Logistic, LearnerKind::Boosted(BoostOptions::default())] {
            let prior = PriorProbClassifier::binary(0.8).unwrap();
            let cell = CellState::<CpuRuntime>::PriorOnly(prior);
            let before: Vec<f64> = cell.predict_class_probs(&client, &x).unwrap().to_vec();
            let promoted = cell.promote(2, &learner, &device);
            assert_eq!(promoted.kind(), learner);
            let after: Vec<f64> = promoted.predict_class_probs(&client, &x).unwrap().to_vec();
            for (a, b) in before.iter().zip(after.iter()) {
                assert!((a - b).abs() < 1e-12);
            }
            assert!((after[1] - 0.8).abs() < 1e-12);
        }
    }

    #[test]
    fn test_uninitialized_predicts_half() {
        let (client, device) = setup();
        let x = Tensor::<CpuRuntime>::from_slice(&[1.0, 2.0, 3.0], &[3, 1], &device);
        let cell = CellState::<CpuRuntime>::Uninitialized;
        let p: Vec<f64> = cell.predict_class_probs(&client, &x).unwrap().to_vec();
        assert!(p.iter().all(|v| (v - 0.5).abs() < 1e-12));
        assert_eq!(cell.kind(), "uninitialized");
    }

    #[test]
    fn test_fit_promotes_and_failure_keeps_state() {
        let (client, device) = setup();
        let x = Tensor::<CpuRuntime>::from_slice(&[1.0, 0.0, 0.0, 1.0], &[2, 2], &device);
        let w = Tensor::<CpuRuntime>::from_slice(&[1.0, 1.0], &[2], &device);
        let bad = Tensor::<CpuRuntime>::from_slice(&[f64::NAN, 1.0, 1.0, 0.0], &[2, 2], &device);
        let t = Tensor::<CpuRuntime>::from_slice(&[0.0, 1.0, 1.0, 0.0], &[2, 2], &device);
        let options = FitOptions::default();

        for learner in [LearnerKind::Logistic, LearnerKind::Boosted(BoostOptions::default())] {
            let prior = PriorProbClassifier::binary(0.5).unwrap();
            let mut cell = CellState::<CpuRuntime>::PriorOnly(prior);
            let err = cell.fit(&learner, &client, &x, &bad, &w, &options).unwrap_err();
            assert!(matches!(err, CbmError::Numerical { .. }));
            assert_eq!(cell.kind(), "prior");

            cell.fit(&learner, &client, &x, &t, &w, &options).unwrap();
            match &cell {
                CellState::Fitted(fitted) => assert_eq!(fitted.kind(), learner),
                other => panic!("expected fitted cell, got {}", other.kind()),
            }
        }
    }
}
