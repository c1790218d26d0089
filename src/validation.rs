//! Validation helpers shared by trainers, predictors and persistence.

use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

use crate::error::{CbmError, CbmResult};

/// Validate that a tensor holds F64 values.
pub(crate) fn validate_f64<R: Runtime>(t: &Tensor<R>, op: &'static str) -> CbmResult<()> {
    match t.dtype() {
        DType::F64 => Ok(()),
        _ => Err(CbmError::UnsupportedDType { op }),
    }
}

/// Validate that data is 2D `[n, d]` with at least one row, returning `(n, d)`.
pub(crate) fn validate_matrix<R: Runtime>(
    t: &Tensor<R>,
    op: &'static str,
) -> CbmResult<(usize, usize)> {
    validate_f64(t, op)?;
    let shape = t.shape();
    if shape.len() != 2 {
        return Err(CbmError::InvalidParameter {
            parameter: "data",
            message: format!("{op} requires 2D data [n, d], got {}-D", shape.len()),
        });
    }
    if shape[0] == 0 {
        return Err(CbmError::InvalidParameter {
            parameter: "data",
            message: format!("{op} requires at least 1 data point"),
        });
    }
    Ok((shape[0], shape[1]))
}

/// Validate that a 2D tensor has exactly `expected` columns.
pub(crate) fn validate_columns<R: Runtime>(
    t: &Tensor<R>,
    expected: usize,
    op: &'static str,
    what: &'static str,
) -> CbmResult<usize> {
    let (n, d) = validate_matrix(t, op)?;
    if d != expected {
        return Err(CbmError::DimensionMismatch {
            op,
            what,
            expected,
            got: d,
        });
    }
    Ok(n)
}

/// Validate that a tensor has exactly `expected` rows in its first dimension.
pub(crate) fn validate_rows<R: Runtime>(
    t: &Tensor<R>,
    expected: usize,
    op: &'static str,
    what: &'static str,
) -> CbmResult<()> {
    let got = t.shape().first().copied().unwrap_or(0);
    if got != expected {
        return Err(CbmError::DimensionMismatch {
            op,
            what,
            expected,
            got,
        });
    }
    Ok(())
}

/// Validate a component count. More components than rows is allowed; the
/// surplus components end up with floored weight.
pub(crate) fn validate_n_components(n_components: usize, op: &'static str) -> CbmResult<()> {
    if n_components == 0 {
        return Err(CbmError::InvalidParameter {
            parameter: "n_components",
            message: format!("{op} requires n_components > 0"),
        });
    }
    Ok(())
}

/// Validate rows of nonnegative weights `[n, k]` that will be renormalized:
/// every entry finite and >= 0, every row with positive mass.
pub(crate) fn validate_weight_rows(
    values: &[f64],
    k: usize,
    parameter: &'static str,
) -> CbmResult<()> {
    for (i, row) in values.chunks(k).enumerate() {
        if let Some(v) = row.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(CbmError::InvalidParameter {
                parameter,
                message: format!("row {i} holds {v}, expected finite values >= 0"),
            });
        }
        if row.iter().sum::<f64>() <= 0.0 {
            return Err(CbmError::InvalidParameter {
                parameter,
                message: format!("row {i} has zero total weight"),
            });
        }
    }
    Ok(())
}

/// Validate a regularization strength and its L1 ratio.
pub(crate) fn validate_elastic_net(regularization: f64, l1_ratio: f64) -> CbmResult<()> {
    if !regularization.is_finite() || regularization < 0.0 {
        return Err(CbmError::InvalidParameter {
            parameter: "regularization",
            message: format!("must be finite and >= 0, got {regularization}"),
        });
    }
    if !(0.0..=1.0).contains(&l1_ratio) {
        return Err(CbmError::InvalidParameter {
            parameter: "l1_ratio",
            message: format!("must lie in [0, 1], got {l1_ratio}"),
        });
    }
    Ok(())
}

/// Validate a probability floor used for clamping.
pub(crate) fn validate_prob_floor(floor: f64) -> CbmResult<()> {
    if !(floor > 0.0 && floor < 0.5) {
        return Err(CbmError::InvalidParameter {
            parameter: "prob_floor",
            message: format!("must lie in (0, 0.5), got {floor}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_rows() {
        assert!(validate_weight_rows(&[0.2, 0.8, 3.0, 0.0], 2, "gammas").is_ok());

        let err = validate_weight_rows(&[1.0, 0.0, 0.0, 0.0], 2, "gammas").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("row 1"));

        for bad in [-0.5, f64::NAN, f64::INFINITY] {
            let err = validate_weight_rows(&[1.0, 0.0, bad, 1.5], 2, "gammas").unwrap_err();
            assert!(matches!(err, CbmError::InvalidParameter { parameter: "gammas", .. }));
        }
    }
}
