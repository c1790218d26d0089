//! Interchangeable learners for the gating classifier and the cells.

use numr::runtime::Runtime;
use numr::tensor::Tensor;
use serde::{Deserialize, Serialize};

use super::boost::{BoostOptions, BoostedClassifier};
use super::logistic::LogisticRegression;
use super::prior::PriorProbClassifier;
use super::traits::{ComponentClassifier, FitOptions, FitReport};
use crate::common::CbmClient;
use crate::error::CbmResult;

/// Which learner a model trains, chosen when the model is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum LearnerKind {
    /// Elastic-net logistic regression.
    #[default]
    Logistic,
    /// Gradient-boosted regression trees.
    Boosted(BoostOptions),
}

impl LearnerKind {
    /// Untrained learner with uniform predictions.
    pub fn create<R: Runtime>(
        &self,
        num_features: usize,
        num_classes: usize,
        device: &R::Device,
    ) -> Learner<R> {
        match self {
            Self::Logistic => {
                Learner::Logistic(LogisticRegression::new(num_features, num_classes, device))
            }
            Self::Boosted(options) => Learner::Boosted(BoostedClassifier::new(
                num_features,
                num_classes,
                options.clone(),
            )),
        }
    }

    /// Untrained learner reproducing `prior`.
    pub fn from_prior<R: Runtime>(
        &self,
        num_features: usize,
        prior: &PriorProbClassifier,
        device: &R::Device,
    ) -> Learner<R> {
        match self {
            Self::Logistic => {
                Learner::Logistic(LogisticRegression::with_prior(num_features, prior, device))
            }
            Self::Boosted(options) => Learner::Boosted(BoostedClassifier::with_prior(
                num_features,
                prior,
                options.clone(),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Logistic => "logistic",
            Self::Boosted(_) => "boosted",
        }
    }
}

/// A trained or trainable learner of either kind.
#[derive(Debug, Clone)]
pub enum Learner<R: Runtime> {
    Logistic(LogisticRegression<R>),
    Boosted(BoostedClassifier),
}

impl<R: Runtime> Learner<R> {
    /// The kind that builds learners like this one.
    pub fn kind(&self) -> LearnerKind {
        match self {
            Self::Logistic(_) => LearnerKind::Logistic,
            Self::Boosted(b) => LearnerKind::Boosted(b.options().clone()),
        }
    }

    pub fn num_features(&self) -> usize {
        match self {
            Self::Logistic(lr) => lr.num_features(),
            Self::Boosted(b) => b.num_features(),
        }
    }
}

impl<R: Runtime> From<LogisticRegression<R>> for Learner<R> {
    fn from(lr: LogisticRegression<R>) -> Self {
        Self::Logistic(lr)
    }
}

impl<R: Runtime> From<BoostedClassifier> for Learner<R> {
    fn from(b: BoostedClassifier) -> Self {
        Self::Boosted(b)
    }
}

impl<R: Runtime> ComponentClassifier<R> for Learner<R> {
    fn num_classes(&self) -> usize {
        match self {
            Self::Logistic(lr) => lr.num_classes(),
            Self::Boosted(b) => ComponentClassifier::<R>::num_classes(b),
        }
    }

    fn predict_log_class_probs<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
    ) -> CbmResult<Tensor<R>> {
        match self {
            Self::Logistic(lr) => lr.predict_log_class_probs(client, features),
            Self::Boosted(b) => b.predict_log_class_probs(client, features),
        }
    }

    fn fit<C: CbmClient<R>>(
        &mut self,
        client: &C,
        features: &Tensor<R>,
        targets: &Tensor<R>,
        weights: &Tensor<R>,
        options: &FitOptions,
    ) -> CbmResult<FitReport> {
        match self {
            Self::Logistic(lr) => lr.fit(client, features, targets, weights, options),
            Self::Boosted(b) => b.fit(client, features, targets, weights, options),
        }
    }

    fn objective<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
        targets: &Tensor<R>,
        weights: &Tensor<R>,
        options: &FitOptions,
    ) -> CbmResult<f64> {
        match self {
            Self::Logistic(lr) => lr.objective(client, features, targets, weights, options),
            Self::Boosted(b) => b.objective(client, features, targets, weights, options),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};

    #[test]
    fn test_kinds_build_matching_learners() {
        let device = CpuDevice::new();
        let client = CpuClient::new(device.clone());
        let x = Tensor::<CpuRuntime>::from_slice(&[0.5, -1.0, 2.0, 0.0], &[2, 2], &device);
        let prior = PriorProbClassifier::binary(0.3).unwrap();

        for kind in [LearnerKind::Logistic, LearnerKind::Boosted(BoostOptions::default())] {
            let fresh = kind.create::<CpuRuntime>(2, 3, &device);
            assert_eq!(fresh.kind(), kind);
            assert_eq!(fresh.num_features(), 2);
            assert_eq!(fresh.num_classes(), 3);
            let p: Vec<f64> = fresh.predict_class_probs(&client, &x).unwrap().to_vec();
            assert!(p.iter().all(|v| (v - 1.0 / 3.0).abs() < 1e-12), "{}", kind.name());

            let seeded = kind.from_prior::<CpuRuntime>(2, &prior, &device);
            let p: Vec<f64> = seeded.predict_class_probs(&client, &x).unwrap().to_vec();
            assert!((p[1] - 0.3).abs() < 1e-12 && (p[3] - 0.3).abs() < 1e-12);
        }
        assert_eq!(LearnerKind::default(), LearnerKind::Logistic);
    }

    #[test]
    fn test_kind_serializes() {
        let kind = LearnerKind::Boosted(BoostOptions {
            shrinkage: 0.25,
            max_depth: 3,
            min_leaf_weight: 0.0,
        });
        let back: LearnerKind = bincode::deserialize(&bincode::serialize(&kind).unwrap()).unwrap();
        assert_eq!(back, kind);
    }
}
