//! Random-restart selection of Bernoulli mixtures.

use numr::runtime::Runtime;
use numr::tensor::Tensor;
use rayon::prelude::*;

use super::bernoulli::{bmm_fit_impl, validate_bmm_options};
use crate::common::CbmClient;
use crate::dataset::{MultiLabel, label_occurrence_matrix};
use crate::diagnostics::{DiagnosticEvent, DiagnosticsSink};
use crate::error::{CbmError, CbmResult};
use crate::mixture::traits::bernoulli::{
    BernoulliMixtureFit, BernoulliMixtureModel, BernoulliMixtureOptions, BernoulliMixtureSelection,
};
use crate::validation::validate_matrix;

/// Run seeds `0..n_runs` in parallel and keep the first minimum objective.
///
/// A failed run is recorded and scored `+inf`. If every run fails, the error
/// of the lowest seed is returned.
pub fn bmm_select_impl<R, C>(
    client: &C,
    data: &Tensor<R>,
    options: &BernoulliMixtureOptions,
    sink: &dyn DiagnosticsSink,
) -> CbmResult<BernoulliMixtureSelection<R>>
where
    R: Runtime,
    C: CbmClient<R> + Sync,
    Tensor<R>: Send + Sync,
{
    validate_matrix(data, "bmm_select")?;
    validate_bmm_options(options, "bmm_select")?;
    if options.n_runs == 0 {
        return Err(CbmError::InvalidParameter {
            parameter: "n_runs",
            message: "bmm_select requires n_runs >= 1".to_string(),
        });
    }

    let results: Vec<CbmResult<BernoulliMixtureFit<R>>> = (0..options.n_runs as u64)
        .into_par_iter()
        .map(|run| bmm_fit_impl(client, data, options, run, sink))
        .collect();

    let mut objectives = Vec::with_capacity(results.len());
    let mut best: Option<BernoulliMixtureFit<R>> = None;
    let mut first_error: Option<CbmError> = None;
    for (run, result) in results.into_iter().enumerate() {
        match result {
            Ok(fit) => {
                objectives.push(fit.objective);
                if best.as_ref().is_none_or(|b| fit.objective < b.objective) {
                    best = Some(fit);
                }
            }
            Err(e) => {
                sink.record(DiagnosticEvent::BernoulliRunFailed {
                    run: run as u64,
                    message: e.to_string(),
                });
                objectives.push(f64::INFINITY);
                first_error.get_or_insert(e);
            }
        }
    }

    match (best, first_error) {
        (Some(best), _) => {
            sink.record(DiagnosticEvent::BernoulliRunSelected {
                run: best.run,
                objective: best.objective,
            });
            Ok(BernoulliMixtureSelection { best, objectives })
        }
        (None, Some(e)) => Err(e),
        (None, None) => Err(CbmError::InvalidParameter {
            parameter: "n_runs",
            message: "no run produced a model".to_string(),
        }),
    }
}

/// Build the label-occurrence matrix and select over it.
pub fn bmm_select_all_impl<R, C>(
    client: &C,
    multi_labels: &[MultiLabel],
    num_labels: usize,
    options: &BernoulliMixtureOptions,
    sink: &dyn DiagnosticsSink,
) -> CbmResult<(BernoulliMixtureModel<R>, Tensor<R>)>
where
    R: Runtime,
    C: CbmClient<R> + Sync,
    Tensor<R>: Send + Sync,
{
    let data = label_occurrence_matrix::<R>(multi_labels, num_labels, client.device())?;
    let selection = bmm_select_impl(client, &data, options, sink)?;
    Ok((selection.best.model, selection.best.gammas))
}
