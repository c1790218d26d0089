//! EM loop over the gating classifier and the cell grid.

use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use rayon::prelude::*;

use super::options::{CbmOptimizerOptions, MStepReport, OptimizeReport};
use crate::classifier::{
    CellState, ComponentClassifier, FitOptions, LearnerKind, PriorProbClassifier,
};
use crate::common::CbmClient;
use crate::common::tensor::{
    column, host_values, normalize_log_rows, normalize_rows, stack_columns, sum_all,
};
use crate::dataset::MultiLabelDataset;
use crate::diagnostics::{DiagnosticEvent, DiagnosticsSink};
use crate::error::{CbmError, CbmResult};
use crate::mixture::impl_generic::bmm_select_impl;
use crate::mixture::model::CbmModel;
use crate::mixture::traits::bernoulli::BernoulliMixtureOptions;
use crate::validation::{validate_columns, validate_weight_rows};

/// Result of one cell update inside the M-step.
enum CellOutcome {
    Fitted { promoted: bool },
    Skipped { total_weight: f64 },
    Failed(CbmError),
}

/// Mixture-of-experts trainer.
///
/// Owns the model while training and the responsibilities `gamma [n, K]`.
/// Each E-step completes before the following M-step reads `gamma`, and every
/// M-step task joins before the next E-step reads the classifiers.
pub struct CbmOptimizer<'a, R: Runtime, C> {
    client: &'a C,
    model: CbmModel<R>,
    dataset: &'a MultiLabelDataset<R>,
    options: CbmOptimizerOptions,
    sink: &'a dyn DiagnosticsSink,
    gammas: Tensor<R>,
    iteration: usize,
}

impl<'a, R, C> CbmOptimizer<'a, R, C>
where
    R: Runtime,
    C: CbmClient<R> + Sync,
    Tensor<R>: Send + Sync,
{
    /// Bind a model to a dataset; responsibilities start uniform.
    pub fn new(
        client: &'a C,
        model: CbmModel<R>,
        dataset: &'a MultiLabelDataset<R>,
        options: CbmOptimizerOptions,
        sink: &'a dyn DiagnosticsSink,
    ) -> CbmResult<Self> {
        options.validate()?;
        for (what, expected, got) in [
            ("label count", model.num_labels(), dataset.num_labels()),
            ("feature count", model.num_features(), dataset.num_features()),
        ] {
            if expected != got {
                return Err(CbmError::DimensionMismatch {
                    op: "CbmOptimizer::new",
                    what,
                    expected,
                    got,
                });
            }
        }
        let k = model.num_clusters();
        let gammas = Tensor::<R>::full_scalar(
            &[dataset.num_instances(), k],
            DType::F64,
            1.0 / k as f64,
            dataset.features().device(),
        );
        Ok(Self {
            client,
            model,
            dataset,
            options,
            sink,
            gammas,
            iteration: 0,
        })
    }

    pub fn model(&self) -> &CbmModel<R> {
        &self.model
    }

    pub fn into_model(self) -> CbmModel<R> {
        self.model
    }

    /// Current responsibilities `[n, K]`.
    pub fn gammas(&self) -> &Tensor<R> {
        &self.gammas
    }

    pub fn options(&self) -> &CbmOptimizerOptions {
        &self.options
    }

    /// Seed the responsibilities and run one M-step.
    ///
    /// Rows must be finite, nonnegative and carry positive mass; they are
    /// renormalized to sum to one.
    pub fn initialize_with_gammas(&mut self, gammas: Tensor<R>) -> CbmResult<MStepReport> {
        let n = validate_columns(
            &gammas,
            self.model.num_clusters(),
            "CbmOptimizer::initialize_with_gammas",
            "cluster count",
        )?;
        if n != self.dataset.num_instances() {
            return Err(CbmError::DimensionMismatch {
                op: "CbmOptimizer::initialize_with_gammas",
                what: "instance count",
                expected: self.dataset.num_instances(),
                got: n,
            });
        }
        validate_weight_rows(&host_values(&gammas), self.model.num_clusters(), "gammas")?;
        self.gammas = normalize_rows(self.client, &gammas)?;
        self.m_step()
    }

    /// Seed the responsibilities from a Bernoulli mixture over the label sets.
    pub fn initialize_from_label_mixture(&mut self) -> CbmResult<MStepReport> {
        let options = BernoulliMixtureOptions {
            n_components: self.model.num_clusters(),
            ..self.options.bernoulli.clone()
        };
        let selection = bmm_select_impl(
            self.client,
            self.dataset.label_matrix(),
            &options,
            self.sink,
        )?;
        self.initialize_with_gammas(selection.best.gammas)
    }

    /// Refresh `gamma` from the current classifiers.
    ///
    /// Returns the data log-likelihood
    /// `sum_n log sum_k pi_k(x_n) prod_l P(y_nl | k, x_n)`.
    pub fn e_step(&mut self) -> CbmResult<f64> {
        let log_joint = self.model.log_joint(
            self.client,
            self.dataset.features(),
            self.dataset.label_matrix(),
        )?;
        let (gammas, lse) = normalize_log_rows(self.client, &log_joint)?;
        let log_likelihood = sum_all(self.client, &lse)?;
        if !log_likelihood.is_finite() {
            return Err(CbmError::numerical(
                format!("e-step {}", self.iteration + 1),
                format!("log-likelihood is {log_likelihood}"),
            ));
        }
        self.gammas = gammas;
        self.iteration += 1;
        self.sink.record(DiagnosticEvent::EmIteration {
            iteration: self.iteration,
            log_likelihood,
        });
        Ok(log_likelihood)
    }

    /// Refit the gating classifier and every cell against the current `gamma`.
    ///
    /// The gating update runs concurrently with the cell updates; each cell is
    /// its own task. A failing subproblem keeps its previous parameters and is
    /// recorded, only configuration errors abort the step.
    pub fn m_step(&mut self) -> CbmResult<MStepReport> {
        let client = self.client;
        let features = self.dataset.features();
        let gammas = &self.gammas;
        let n = self.dataset.num_instances();
        let num_labels = self.model.num_labels();
        let num_clusters = self.model.num_clusters();

        let gating_options = self.options.gating_fit_options();
        let cell_options = self.options.cell_fit_options();
        let min_weight = self.options.min_cluster_weight;

        let unit_weights = Tensor::<R>::ones(&[n], DType::F64, features.device());
        let cluster_weights = (0..num_clusters)
            .map(|k| column(gammas, k))
            .collect::<numr::error::Result<Vec<_>>>()?;
        let cluster_totals = host_values(&client.sum(gammas, &[0], false)?);
        let label_targets = (0..num_labels)
            .map(|l| self.label_targets(l))
            .collect::<CbmResult<Vec<_>>>()?;
        let frequencies = self.dataset.label_frequencies();
        let learner = self.model.learner();

        let (gating, cells) = self.model.parts_mut();
        let (gating_result, outcomes) = rayon::join(
            || gating.fit(client, features, gammas, &unit_weights, &gating_options),
            || {
                cells
                    .par_iter_mut()
                    .enumerate()
                    .map(|(idx, cell)| {
                        let (k, l) = (idx / num_labels, idx % num_labels);
                        update_cell(
                            client,
                            &learner,
                            cell,
                            features,
                            &label_targets[l],
                            &cluster_weights[k],
                            cluster_totals[k],
                            frequencies[l],
                            min_weight,
                            &cell_options,
                        )
                    })
                    .collect::<Vec<_>>()
            },
        );

        let mut report = MStepReport::default();
        match gating_result {
            Ok(fit) => {
                self.sink.record(DiagnosticEvent::GatingUpdated {
                    objective_before: fit.objective_before,
                    objective_after: fit.objective_after,
                    iterations: fit.iterations,
                });
                report.gating = Some(fit);
            }
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) => self.sink.record(DiagnosticEvent::GatingFailed {
                message: e.to_string(),
            }),
        }

        for (idx, outcome) in outcomes.into_iter().enumerate() {
            let (cluster, label) = (idx / num_labels, idx % num_labels);
            match outcome {
                CellOutcome::Fitted { promoted } => {
                    report.cells_fitted += 1;
                    if promoted {
                        report.cells_promoted += 1;
                        self.sink
                            .record(DiagnosticEvent::CellPromoted { cluster, label });
                    }
                }
                CellOutcome::Skipped { total_weight } => {
                    report.cells_skipped += 1;
                    self.sink.record(DiagnosticEvent::CellSkipped {
                        cluster,
                        label,
                        total_weight,
                    });
                }
                CellOutcome::Failed(e) if e.is_configuration() => return Err(e),
                CellOutcome::Failed(e) => {
                    report.cells_failed += 1;
                    self.sink.record(DiagnosticEvent::CellFailed {
                        cluster,
                        label,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// E-step followed by M-step. Returns the E-step log-likelihood.
    pub fn iterate(&mut self) -> CbmResult<(f64, MStepReport)> {
        let log_likelihood = self.e_step()?;
        let report = self.m_step()?;
        Ok((log_likelihood, report))
    }

    /// Iterate until `max_iter` or a relative log-likelihood change below `tol`.
    pub fn optimize(&mut self) -> CbmResult<OptimizeReport> {
        let mut report = OptimizeReport::default();
        for _ in 0..self.options.max_iter {
            let (ll, _) = self.iterate()?;
            report.iterations += 1;
            let prev = report.final_log_likelihood();
            report.log_likelihoods.push(ll);
            if let Some(prev) = prev {
                if (ll - prev).abs() / prev.abs().max(1.0) < self.options.tol {
                    report.converged = true;
                    break;
                }
            }
        }
        Ok(report)
    }

    /// Regularized weighted log loss of the gating classifier against `gamma`.
    pub fn gating_objective(&self) -> CbmResult<f64> {
        let features = self.dataset.features();
        let ones = Tensor::<R>::ones(
            &[self.dataset.num_instances()],
            DType::F64,
            features.device(),
        );
        self.model.gating().objective(
            self.client,
            features,
            &self.gammas,
            &ones,
            &self.options.gating_fit_options(),
        )
    }

    /// Regularized weighted log loss of cell `(cluster, label)` against `gamma[:, cluster]`.
    pub fn binary_objective(&self, cluster: usize, label: usize) -> CbmResult<f64> {
        if cluster >= self.model.num_clusters() || label >= self.model.num_labels() {
            return Err(CbmError::InvalidParameter {
                parameter: "cell",
                message: format!(
                    "cell ({cluster}, {label}) outside {}x{} grid",
                    self.model.num_clusters(),
                    self.model.num_labels()
                ),
            });
        }
        let targets = self.label_targets(label)?;
        let weights = column(&self.gammas, cluster)?;
        self.model.cell(cluster, label).objective(
            self.client,
            self.dataset.features(),
            &targets,
            &weights,
            &self.options.cell_fit_options(),
        )
    }

    /// Binary targets `[1 - y_l, y_l]`, `[n, 2]`.
    fn label_targets(&self, label: usize) -> CbmResult<Tensor<R>> {
        let y = column(self.dataset.label_matrix(), label)?;
        let not_y = self.client.add_scalar(&self.client.neg(&y)?, 1.0)?;
        Ok(stack_columns(self.client, &[not_y, y])?)
    }
}

#[allow(clippy::too_many_arguments)]
fn update_cell<R, C>(
    client: &C,
    learner: &LearnerKind,
    cell: &mut CellState<R>,
    features: &Tensor<R>,
    targets: &Tensor<R>,
    weights: &Tensor<R>,
    total_weight: f64,
    frequency: f64,
    min_weight: f64,
    options: &FitOptions,
) -> CellOutcome
where
    R: Runtime,
    C: CbmClient<R>,
{
    if total_weight.is_nan() || total_weight < min_weight {
        if cell.is_uninitialized() {
            match PriorProbClassifier::binary(frequency) {
                Ok(prior) => *cell = CellState::PriorOnly(prior),
                Err(e) => return CellOutcome::Failed(e),
            }
        }
        return CellOutcome::Skipped { total_weight };
    }
    let promoted = !cell.is_fitted();
    match cell.fit(learner, client, features, targets, weights, options) {
        Ok(_) => CellOutcome::Fitted { promoted },
        Err(e) => CellOutcome::Failed(e),
    }
}
