//! Conditional Bernoulli mixture model state.

use std::fmt;

use numr::runtime::Runtime;
use numr::tensor::Tensor;

use crate::classifier::{CellState, ComponentClassifier, Learner, LearnerKind, PriorProbClassifier};
use crate::common::CbmClient;
use crate::common::tensor::{column, stack_columns};
use crate::error::{CbmError, CbmResult};
use crate::validation::validate_columns;

/// Gating classifier over `K` clusters plus a `K x L` grid of binary cells.
///
/// Cells are stored row-major: cell `(k, l)` lives at `k * L + l`. The grid
/// size is fixed at construction. The gating classifier's kind is the model's
/// learner; placeholder cells are promoted to the same kind.
#[derive(Debug, Clone)]
pub struct CbmModel<R: Runtime> {
    num_clusters: usize,
    num_labels: usize,
    num_features: usize,
    gating: Learner<R>,
    cells: Vec<CellState<R>>,
}

impl<R: Runtime> CbmModel<R> {
    /// Uniform logistic gating and uninitialized cells.
    pub fn new(
        num_clusters: usize,
        num_labels: usize,
        num_features: usize,
        device: &R::Device,
    ) -> CbmResult<Self> {
        validate_dims(num_clusters, num_labels, num_features)?;
        Ok(Self {
            num_clusters,
            num_labels,
            num_features,
            gating: LearnerKind::Logistic.create(num_features, num_clusters, device),
            cells: (0..num_clusters * num_labels)
                .map(|_| CellState::Uninitialized)
                .collect(),
        })
    }

    /// Uniform logistic gating and prior-only cells set from label frequencies.
    pub fn with_label_priors(
        num_clusters: usize,
        num_features: usize,
        label_frequencies: &[f64],
        device: &R::Device,
    ) -> CbmResult<Self> {
        let num_labels = label_frequencies.len();
        validate_dims(num_clusters, num_labels, num_features)?;
        let priors = label_frequencies
            .iter()
            .map(|&f| PriorProbClassifier::binary(f))
            .collect::<CbmResult<Vec<_>>>()?;
        let cells = (0..num_clusters)
            .flat_map(|_| priors.iter().cloned().map(CellState::PriorOnly))
            .collect();
        Ok(Self {
            num_clusters,
            num_labels,
            num_features,
            gating: LearnerKind::Logistic.create(num_features, num_clusters, device),
            cells,
        })
    }

    /// Switch the model to `learner`. The gating classifier restarts uniform
    /// and fitted cells of another kind become uninitialized.
    pub fn with_learner(mut self, learner: LearnerKind, device: &R::Device) -> Self {
        self.gating = learner.create(self.num_features, self.num_clusters, device);
        for cell in &mut self.cells {
            if matches!(cell, CellState::Fitted(fitted) if fitted.kind() != learner) {
                *cell = CellState::Uninitialized;
            }
        }
        self
    }

    /// Assemble a model from its parts, checking every dimension.
    pub fn from_parts(
        num_clusters: usize,
        num_labels: usize,
        gating: Learner<R>,
        cells: Vec<CellState<R>>,
    ) -> CbmResult<Self> {
        let num_features = gating.num_features();
        validate_dims(num_clusters, num_labels, num_features)?;
        if gating.num_classes() != num_clusters {
            return Err(CbmError::DimensionMismatch {
                op: "CbmModel::from_parts",
                what: "gating class count",
                expected: num_clusters,
                got: gating.num_classes(),
            });
        }
        if cells.len() != num_clusters * num_labels {
            return Err(CbmError::DimensionMismatch {
                op: "CbmModel::from_parts",
                what: "cell count",
                expected: num_clusters * num_labels,
                got: cells.len(),
            });
        }
        let learner = gating.kind();
        for cell in &cells {
            if let CellState::Fitted(fitted) = cell {
                if fitted.num_features() != num_features || fitted.num_classes() != 2 {
                    return Err(CbmError::DimensionMismatch {
                        op: "CbmModel::from_parts",
                        what: "cell feature count",
                        expected: num_features,
                        got: fitted.num_features(),
                    });
                }
                if fitted.kind() != learner {
                    return Err(CbmError::InvalidParameter {
                        parameter: "cells",
                        message: format!(
                            "{} cell in a model whose gating learner is {}",
                            fitted.kind().name(),
                            learner.name()
                        ),
                    });
                }
            }
            if let CellState::PriorOnly(prior) = cell {
                if prior.probs().len() != 2 {
                    return Err(CbmError::DimensionMismatch {
                        op: "CbmModel::from_parts",
                        what: "cell class count",
                        expected: 2,
                        got: prior.probs().len(),
                    });
                }
            }
        }
        Ok(Self {
            num_clusters,
            num_labels,
            num_features,
            gating,
            cells,
        })
    }

    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn gating(&self) -> &Learner<R> {
        &self.gating
    }

    /// Learner used by the gating classifier and by promoted cells.
    pub fn learner(&self) -> LearnerKind {
        self.gating.kind()
    }

    /// Cell `(k, l)`.
    pub fn cell(&self, cluster: usize, label: usize) -> &CellState<R> {
        &self.cells[cluster * self.num_labels + label]
    }

    /// All cells, row-major.
    pub fn cells(&self) -> &[CellState<R>] {
        &self.cells
    }

    /// Disjoint mutable access to the gating classifier and the cell grid.
    pub(crate) fn parts_mut(&mut self) -> (&mut Learner<R>, &mut [CellState<R>]) {
        (&mut self.gating, &mut self.cells)
    }

    /// Log cluster probabilities `log pi_k(x)`, `[n, K]`.
    pub fn cluster_log_probs<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
    ) -> CbmResult<Tensor<R>> {
        self.check_features(features, "CbmModel::cluster_log_probs")?;
        self.gating.predict_log_class_probs(client, features)
    }

    /// Per-cell `log P(present)` and `log P(absent)`, each `[n, K*L]` row-major over cells.
    pub fn cell_log_probs<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
    ) -> CbmResult<(Tensor<R>, Tensor<R>)> {
        self.check_features(features, "CbmModel::cell_log_probs")?;
        let mut present = Vec::with_capacity(self.cells.len());
        let mut absent = Vec::with_capacity(self.cells.len());
        for cell in &self.cells {
            let logp = cell.predict_log_class_probs(client, features)?; // [n, 2]
            absent.push(column(&logp, 0)?);
            present.push(column(&logp, 1)?);
        }
        Ok((
            stack_columns(client, &present)?,
            stack_columns(client, &absent)?,
        ))
    }

    /// `sum_l log P(y_l | k, x)` for observed labels `[n, L]`, giving `[n, K]`.
    pub fn label_log_likelihoods<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
        labels: &Tensor<R>,
    ) -> CbmResult<Tensor<R>> {
        let n = validate_columns(
            labels,
            self.num_labels,
            "CbmModel::label_log_likelihoods",
            "label count",
        )?;
        let (k, l) = (self.num_clusters, self.num_labels);
        let (present, absent) = self.cell_log_probs(client, features)?;
        let present = present.reshape(&[n, k, l])?;
        let absent = absent.reshape(&[n, k, l])?;
        let y = labels.unsqueeze(1)?.broadcast_to(&[n, k, l])?;
        let not_y = client.add_scalar(&client.neg(&y)?, 1.0)?;
        let ll = client.add(&client.mul(&y, &present)?, &client.mul(&not_y, &absent)?)?;
        Ok(client.sum(&ll, &[2], false)?)
    }

    /// `log pi_k(x) + sum_l log P(y_l | k, x)`, `[n, K]`.
    pub fn log_joint<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
        labels: &Tensor<R>,
    ) -> CbmResult<Tensor<R>> {
        let gating = self.cluster_log_probs(client, features)?;
        let labels_ll = self.label_log_likelihoods(client, features, labels)?;
        Ok(client.add(&gating, &labels_ll)?)
    }

    fn check_features(&self, features: &Tensor<R>, op: &'static str) -> CbmResult<usize> {
        validate_columns(features, self.num_features, op, "feature count")
    }
}

fn validate_dims(num_clusters: usize, num_labels: usize, num_features: usize) -> CbmResult<()> {
    for (parameter, value) in [
        ("num_clusters", num_clusters),
        ("num_labels", num_labels),
        ("num_features", num_features),
    ] {
        if value == 0 {
            return Err(CbmError::InvalidParameter {
                parameter,
                message: "must be > 0".to_string(),
            });
        }
    }
    Ok(())
}

impl<R: Runtime> fmt::Display for CbmModel<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = |kind: &str| self.cells.iter().filter(|c| c.kind() == kind).count();
        write!(
            f,
            "CbmModel(clusters={}, labels={}, features={}, learner={}; \
             cells: {} fitted, {} prior, {} uninitialized)",
            self.num_clusters,
            self.num_labels,
            self.num_features,
            self.gating.kind().name(),
            count("fitted"),
            count("prior"),
            count("uninitialized"),
        )
    }
}
