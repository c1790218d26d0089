//! Weighted cross-entropy shared by every classifier.

use numr::runtime::Runtime;
use numr::tensor::Tensor;

use crate::common::CbmClient;
use crate::common::tensor::{expand_rows, sum_all};
use crate::error::{CbmError, CbmResult};
use crate::validation::{validate_columns, validate_rows};

/// Check `features [n, F]`, `targets [n, C]` and `weights [n]` against each other.
pub(crate) fn validate_fit_inputs<R: Runtime>(
    features: &Tensor<R>,
    targets: &Tensor<R>,
    weights: &Tensor<R>,
    num_features: Option<usize>,
    num_classes: usize,
    op: &'static str,
) -> CbmResult<usize> {
    let n = match num_features {
        Some(f) => validate_columns(features, f, op, "feature count")?,
        None => crate::validation::validate_matrix(features, op)?.0,
    };
    validate_columns(targets, num_classes, op, "target class count")?;
    validate_rows(targets, n, op, "target rows")?;
    if weights.ndim() != 1 {
        return Err(CbmError::InvalidParameter {
            parameter: "weights",
            message: format!("{op} requires 1D weights [n], got {}-D", weights.ndim()),
        });
    }
    validate_rows(weights, n, op, "weight count")?;
    Ok(n)
}

/// `-(1/n) sum_i w_i sum_c t_ic log p_ic`.
pub(crate) fn weighted_cross_entropy<R, C>(
    client: &C,
    log_probs: &Tensor<R>,
    targets: &Tensor<R>,
    weights: &Tensor<R>,
) -> CbmResult<f64>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let n = log_probs.shape()[0];
    let c = log_probs.shape()[1];
    let w = expand_rows(weights, c)?;
    let weighted = client.mul(&client.mul(targets, log_probs)?, &w)?;
    Ok(-sum_all(client, &weighted)? / n as f64)
}
