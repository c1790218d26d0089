//! Generic Bernoulli mixture EM.

use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

use crate::common::CbmClient;
use crate::common::tensor::{expand_cols, normalize_log_rows, normalize_rows, sum_all};
use crate::diagnostics::{DiagnosticEvent, DiagnosticsSink};
use crate::error::{CbmError, CbmResult};
use crate::mixture::traits::bernoulli::{
    BernoulliMixtureFit, BernoulliMixtureModel, BernoulliMixtureOptions,
};
use crate::validation::{
    validate_columns, validate_matrix, validate_n_components, validate_prob_floor,
};

/// Slack before an objective increase counts as one.
const INCREASE_SLACK: f64 = 1e-9;

pub(crate) fn validate_bmm_options(
    options: &BernoulliMixtureOptions,
    op: &'static str,
) -> CbmResult<()> {
    validate_n_components(options.n_components, op)?;
    validate_prob_floor(options.prob_floor)?;
    if options.max_iter == 0 {
        return Err(CbmError::InvalidParameter {
            parameter: "max_iter",
            message: format!("{op} requires max_iter >= 1"),
        });
    }
    if !options.tol.is_finite() || options.tol < 0.0 {
        return Err(CbmError::InvalidParameter {
            parameter: "tol",
            message: format!("must be finite and >= 0, got {}", options.tol),
        });
    }
    Ok(())
}

/// Fit a Bernoulli mixture from one seeded random start.
pub fn bmm_fit_impl<R, C>(
    client: &C,
    data: &Tensor<R>,
    options: &BernoulliMixtureOptions,
    run: u64,
    sink: &dyn DiagnosticsSink,
) -> CbmResult<BernoulliMixtureFit<R>>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let (n, _) = validate_matrix(data, "bmm_fit")?;
    validate_bmm_options(options, "bmm_fit")?;
    let k = options.n_components;

    // Random soft assignment; the offset keeps every row strictly positive.
    let u = client.philox_uniform(&[n, k], run, 0, DType::F64)?;
    let mut gammas = normalize_rows(client, &client.add_scalar(&u, 1e-3)?)?;

    let mut history = Vec::<f64>::with_capacity(options.max_iter);
    let mut converged = false;
    let mut n_iter = 0;
    let mut model = m_step(client, data, &gammas, options.prob_floor)?;
    let mut objective = f64::INFINITY;

    for iter in 0..options.max_iter {
        n_iter = iter + 1;
        if iter > 0 {
            model = m_step(client, data, &gammas, options.prob_floor)?;
        }
        let (next_gammas, obj) = e_step(client, data, &model)?;
        if !obj.is_finite() {
            return Err(CbmError::numerical(
                format!("bmm_fit run {run}"),
                format!("objective is {obj} at iteration {n_iter}"),
            ));
        }
        gammas = next_gammas;

        converged = track_objective(&history, obj, options.tol, run, n_iter, sink);
        history.push(obj);
        objective = obj;
        if converged {
            break;
        }
    }

    sink.record(DiagnosticEvent::BernoulliRunFinished {
        run,
        iterations: n_iter,
        objective,
        converged,
    });

    Ok(BernoulliMixtureFit {
        model,
        gammas,
        objective,
        history,
        n_iter,
        converged,
        run,
    })
}

/// Compare `obj` with the last recorded objective: report an increase to
/// `sink` and return whether the change is within `tol`.
fn track_objective(
    history: &[f64],
    obj: f64,
    tol: f64,
    run: u64,
    iteration: usize,
    sink: &dyn DiagnosticsSink,
) -> bool {
    let Some(&prev) = history.last() else {
        return false;
    };
    if obj > prev + INCREASE_SLACK * f64::max(1.0, prev.abs()) {
        sink.record(DiagnosticEvent::BernoulliObjectiveIncreased {
            run,
            iteration,
            previous: prev,
            current: obj,
        });
    }
    (prev - obj).abs() <= tol * f64::max(1.0, obj.abs())
}

/// Responsibilities [n, k] of new binary data.
pub fn bmm_predict_proba_impl<R, C>(
    client: &C,
    model: &BernoulliMixtureModel<R>,
    data: &Tensor<R>,
) -> CbmResult<Tensor<R>>
where
    R: Runtime,
    C: CbmClient<R>,
{
    validate_columns(data, model.n_labels(), "bmm_predict_proba", "label count")?;
    let log_joint = log_joint(client, data, model)?;
    Ok(normalize_log_rows(client, &log_joint)?.0)
}

/// Per-row log-likelihood [n].
pub fn bmm_score_impl<R, C>(
    client: &C,
    model: &BernoulliMixtureModel<R>,
    data: &Tensor<R>,
) -> CbmResult<Tensor<R>>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let n = validate_columns(data, model.n_labels(), "bmm_score", "label count")?;
    let log_joint = log_joint(client, data, model)?;
    let (_, lse) = normalize_log_rows(client, &log_joint)?;
    Ok(lse.reshape(&[n])?)
}

/// Unnormalized log-responsibilities
/// `log mixing_k + sum_l [y log p_kl + (1-y) log(1-p_kl)]`, [n, k].
fn log_joint<R, C>(
    client: &C,
    data: &Tensor<R>,
    model: &BernoulliMixtureModel<R>,
) -> CbmResult<Tensor<R>>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let n = data.shape()[0];
    let log_p = client.log(&model.probs)?; // [k, l]
    let log_q = client.log(&client.add_scalar(&client.neg(&model.probs)?, 1.0)?)?;
    let absent = client.add_scalar(&client.neg(data)?, 1.0)?; // [n, l]

    let present_ll = client.matmul(data, &log_p.transpose(0, 1)?)?; // [n, k]
    let absent_ll = client.matmul(&absent, &log_q.transpose(0, 1)?)?;
    let log_mix = expand_cols(&client.log(&model.mixing)?, n)?;
    Ok(client.add(&client.add(&present_ll, &absent_ll)?, &log_mix)?)
}

/// Responsibilities and negative log-likelihood under `model`.
fn e_step<R, C>(
    client: &C,
    data: &Tensor<R>,
    model: &BernoulliMixtureModel<R>,
) -> CbmResult<(Tensor<R>, f64)>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let log_joint = log_joint(client, data, model)?;
    let (gammas, lse) = normalize_log_rows(client, &log_joint)?;
    Ok((gammas, -sum_all(client, &lse)?))
}

/// Maximum-likelihood parameters for fixed responsibilities.
fn m_step<R, C>(
    client: &C,
    data: &Tensor<R>,
    gammas: &Tensor<R>,
    floor: f64,
) -> CbmResult<BernoulliMixtureModel<R>>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let n = data.shape()[0];
    let l = data.shape()[1];
    let k = gammas.shape()[1];
    let device = data.device();

    let nk = client.sum(gammas, &[0], false)?; // [k]
    let mixing = client.maximum(
        &client.div_scalar(&nk, n as f64)?,
        &Tensor::<R>::full_scalar(&[k], DType::F64, floor, device),
    )?;
    let mixing = client.div_scalar(&mixing, sum_all(client, &mixing)?)?;

    // probs[j] = sum_i gamma[i, j] * y[i] / nk[j]
    let weighted = client.matmul(&gammas.transpose(0, 1)?, data)?; // [k, l]
    let nk_safe = client.maximum(
        &nk,
        &Tensor::<R>::full_scalar(&[k], DType::F64, 1e-300, device),
    )?;
    let probs = client.div(&weighted, &nk_safe.unsqueeze(1)?.broadcast_to(&[k, l])?)?;
    let probs = client.maximum(
        &probs,
        &Tensor::<R>::full_scalar(&[k, l], DType::F64, floor, device),
    )?;
    let probs = client.minimum(
        &probs,
        &Tensor::<R>::full_scalar(&[k, l], DType::F64, 1.0 - floor, device),
    )?;

    Ok(BernoulliMixtureModel { mixing, probs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;

    #[test]
    fn test_objective_increase_is_reported() {
        let sink = MemorySink::new();
        assert!(!track_objective(&[], 10.0, 1e-6, 4, 1, &sink));
        assert!(!track_objective(&[10.0, 9.0], 9.5, 1e-6, 4, 3, &sink));
        let events = sink.events();
        assert_eq!(
            events,
            vec![DiagnosticEvent::BernoulliObjectiveIncreased {
                run: 4,
                iteration: 3,
                previous: 9.0,
                current: 9.5,
            }]
        );
    }

    #[test]
    fn test_decrease_within_tolerance_converges() {
        let sink = MemorySink::new();
        assert!(!track_objective(&[10.0], 9.0, 1e-6, 0, 2, &sink));
        assert!(track_objective(&[10.0], 10.0 - 1e-9, 1e-6, 0, 2, &sink));
        // rounding noise is not an increase
        assert!(track_objective(&[10.0], 10.0 + 1e-12, 1e-6, 0, 2, &sink));
        assert!(sink.events().is_empty());
    }
}
