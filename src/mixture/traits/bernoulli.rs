//! Bernoulli mixture trait over binary label-occurrence vectors.

use numr::runtime::Runtime;
use numr::tensor::Tensor;

use crate::dataset::MultiLabel;
use crate::diagnostics::DiagnosticsSink;
use crate::error::CbmResult;

/// Options for Bernoulli mixture EM and its random restarts.
#[derive(Debug, Clone)]
pub struct BernoulliMixtureOptions {
    /// Number of mixture components `K`.
    pub n_components: usize,
    /// Maximum EM iterations per run.
    pub max_iter: usize,
    /// Relative convergence tolerance on the objective.
    pub tol: f64,
    /// Number of random restarts (seeds `0..n_runs`).
    pub n_runs: usize,
    /// Probabilities are clamped to `[prob_floor, 1 - prob_floor]`.
    pub prob_floor: f64,
}

impl Default for BernoulliMixtureOptions {
    fn default() -> Self {
        Self {
            n_components: 1,
            max_iter: 100,
            tol: 1e-6,
            n_runs: 10,
            prob_floor: 1e-10,
        }
    }
}

/// Fitted Bernoulli mixture.
#[derive(Debug, Clone)]
pub struct BernoulliMixtureModel<R: Runtime> {
    /// Mixing proportions [k] (sum = 1).
    pub mixing: Tensor<R>,
    /// Per-component label probabilities [k, l].
    pub probs: Tensor<R>,
}

impl<R: Runtime> BernoulliMixtureModel<R> {
    pub fn n_components(&self) -> usize {
        self.probs.shape()[0]
    }

    pub fn n_labels(&self) -> usize {
        self.probs.shape()[1]
    }
}

/// Result of one EM run.
#[derive(Debug, Clone)]
pub struct BernoulliMixtureFit<R: Runtime> {
    pub model: BernoulliMixtureModel<R>,
    /// Responsibilities [n, k] under `model`.
    pub gammas: Tensor<R>,
    /// Negative log-likelihood of the data under `model` (lower is better).
    pub objective: f64,
    /// Objective after every iteration.
    pub history: Vec<f64>,
    pub n_iter: usize,
    pub converged: bool,
    /// Seed of this run.
    pub run: u64,
}

/// Outcome of random-restart selection.
#[derive(Debug, Clone)]
pub struct BernoulliMixtureSelection<R: Runtime> {
    /// Lowest-objective run (first one on ties).
    pub best: BernoulliMixtureFit<R>,
    /// Final objective of every run, in run order; failed runs are `+inf`.
    pub objectives: Vec<f64>,
}

/// Bernoulli mixture algorithms.
pub trait BernoulliMixtureAlgorithms<R: Runtime> {
    /// Fit one EM run on binary data [n, l], seeded by `run`.
    fn bmm_fit(
        &self,
        data: &Tensor<R>,
        options: &BernoulliMixtureOptions,
        run: u64,
        sink: &dyn DiagnosticsSink,
    ) -> CbmResult<BernoulliMixtureFit<R>>;

    /// Run `n_runs` seeded fits in parallel and keep the lowest objective.
    fn bmm_select(
        &self,
        data: &Tensor<R>,
        options: &BernoulliMixtureOptions,
        sink: &dyn DiagnosticsSink,
    ) -> CbmResult<BernoulliMixtureSelection<R>>;

    /// Component responsibilities [n, k] for new data.
    fn bmm_predict_proba(
        &self,
        model: &BernoulliMixtureModel<R>,
        data: &Tensor<R>,
    ) -> CbmResult<Tensor<R>>;

    /// Per-row log-likelihood [n].
    fn bmm_score(&self, model: &BernoulliMixtureModel<R>, data: &Tensor<R>) -> CbmResult<Tensor<R>>;

    /// Select over the label-occurrence matrix of `multi_labels`, returning the model.
    fn bmm_select_model(
        &self,
        multi_labels: &[MultiLabel],
        num_labels: usize,
        options: &BernoulliMixtureOptions,
        sink: &dyn DiagnosticsSink,
    ) -> CbmResult<BernoulliMixtureModel<R>> {
        Ok(self.bmm_select_all(multi_labels, num_labels, options, sink)?.0)
    }

    /// Select over the label-occurrence matrix of `multi_labels`, returning the responsibilities.
    fn bmm_select_gammas(
        &self,
        multi_labels: &[MultiLabel],
        num_labels: usize,
        options: &BernoulliMixtureOptions,
        sink: &dyn DiagnosticsSink,
    ) -> CbmResult<Tensor<R>> {
        Ok(self.bmm_select_all(multi_labels, num_labels, options, sink)?.1)
    }

    /// Select over the label-occurrence matrix of `multi_labels`, returning
    /// model and responsibilities.
    fn bmm_select_all(
        &self,
        multi_labels: &[MultiLabel],
        num_labels: usize,
        options: &BernoulliMixtureOptions,
        sink: &dyn DiagnosticsSink,
    ) -> CbmResult<(BernoulliMixtureModel<R>, Tensor<R>)>;
}
