//! Small tensor helpers shared by the trainers.

use numr::dtype::DType;
use numr::error::{Error, Result};
use numr::runtime::Runtime;
use numr::tensor::Tensor;

use super::CbmClient;

/// Extract the single value of a one-element tensor.
pub(crate) fn scalar_value<R: Runtime>(t: &Tensor<R>) -> Result<f64> {
    if t.numel() != 1 {
        return Err(Error::InvalidArgument {
            arg: "tensor",
            reason: format!("expected scalar (1 element), got {} elements", t.numel()),
        });
    }
    let t = t.contiguous();
    match t.dtype() {
        DType::F32 => {
            let data: Vec<f32> = t.to_vec();
            Ok(data[0] as f64)
        }
        _ => {
            let data: Vec<f64> = t.to_vec();
            Ok(data[0])
        }
    }
}

/// Sum of every element.
pub(crate) fn sum_all<R, C>(client: &C, t: &Tensor<R>) -> Result<f64>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let all_dims: Vec<usize> = (0..t.ndim()).collect();
    scalar_value(&client.sum(t, &all_dims, false)?)
}

/// Dot product of two tensors of equal shape.
pub(crate) fn dot<R, C>(client: &C, a: &Tensor<R>, b: &Tensor<R>) -> Result<f64>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let prod = client.mul(a, b)?;
    sum_all(client, &prod)
}

/// Row-wise log-sum-exp of `[n, k]`, returned as `[n, 1]`.
pub(crate) fn logsumexp_rows<R, C>(client: &C, x: &Tensor<R>) -> Result<Tensor<R>>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let n = x.shape()[0];
    let k = x.shape()[1];
    let max_log = client.max(x, &[1], true)?; // [n, 1]
    let shifted = client.sub(x, &max_log.broadcast_to(&[n, k])?)?;
    let sum_exp = client.sum(&client.exp(&shifted)?, &[1], true)?; // [n, 1]
    client.add(&client.log(&sum_exp)?, &max_log)
}

/// Row-wise log-softmax of `[n, k]` logits.
pub(crate) fn log_softmax_rows<R, C>(client: &C, logits: &Tensor<R>) -> Result<Tensor<R>>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let n = logits.shape()[0];
    let k = logits.shape()[1];
    let lse = logsumexp_rows(client, logits)?;
    client.sub(logits, &lse.broadcast_to(&[n, k])?)
}

/// Normalize `[n, k]` log-weights into row-stochastic probabilities.
///
/// Returns the probabilities and the row log-normalizers `[n, 1]`.
pub(crate) fn normalize_log_rows<R, C>(
    client: &C,
    log_w: &Tensor<R>,
) -> Result<(Tensor<R>, Tensor<R>)>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let n = log_w.shape()[0];
    let k = log_w.shape()[1];
    let lse = logsumexp_rows(client, log_w)?;
    let probs = client.exp(&client.sub(log_w, &lse.broadcast_to(&[n, k])?)?)?;
    Ok((probs, lse))
}

/// Divide every row of a nonnegative `[n, k]` tensor by its sum.
pub(crate) fn normalize_rows<R, C>(client: &C, x: &Tensor<R>) -> Result<Tensor<R>>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let n = x.shape()[0];
    let k = x.shape()[1];
    let row_sum = client.sum(x, &[1], true)?;
    let floor = Tensor::<R>::full_scalar(&[n, 1], x.dtype(), 1e-300, x.device());
    let row_sum = client.maximum(&row_sum, &floor)?;
    client.div(x, &row_sum.broadcast_to(&[n, k])?)
}

/// Elementwise soft-thresholding `sign(v) * max(|v| - t, 0)`.
pub(crate) fn soft_threshold<R, C>(client: &C, v: &Tensor<R>, t: f64) -> Result<Tensor<R>>
where
    R: Runtime,
    C: CbmClient<R>,
{
    if t <= 0.0 {
        return Ok(v.clone());
    }
    let zero = Tensor::<R>::zeros(v.shape(), v.dtype(), v.device());
    let upper = client.maximum(&client.sub_scalar(v, t)?, &zero)?;
    let lower = client.maximum(&client.sub_scalar(&client.neg(v)?, t)?, &zero)?;
    client.sub(&upper, &lower)
}

/// Column `j` of a `[n, k]` tensor as a contiguous `[n]` tensor.
pub(crate) fn column<R: Runtime>(x: &Tensor<R>, j: usize) -> Result<Tensor<R>> {
    let n = x.shape()[0];
    x.narrow(1, j, 1)?.contiguous().reshape(&[n])
}

/// Repeat a `[n]` tensor across `cols` columns, giving `[n, cols]`.
pub(crate) fn expand_rows<R: Runtime>(v: &Tensor<R>, cols: usize) -> Result<Tensor<R>> {
    let n = v.shape()[0];
    v.unsqueeze(1)?.broadcast_to(&[n, cols])
}

/// Repeat a `[c]` tensor across `rows` rows, giving `[rows, c]`.
pub(crate) fn expand_cols<R: Runtime>(v: &Tensor<R>, rows: usize) -> Result<Tensor<R>> {
    let c = v.shape()[0];
    v.unsqueeze(0)?.broadcast_to(&[rows, c])
}

/// Place `m` tensors of shape `[n]` side by side, giving `[n, m]`.
pub(crate) fn stack_columns<R, C>(client: &C, columns: &[Tensor<R>]) -> Result<Tensor<R>>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let parts = columns
        .iter()
        .map(|c| c.unsqueeze(1))
        .collect::<Result<Vec<_>>>()?;
    let refs: Vec<&Tensor<R>> = parts.iter().collect();
    client.cat(&refs, 1)
}

/// Copy a tensor to the host as `f64` values.
pub(crate) fn host_values<R: Runtime>(t: &Tensor<R>) -> Vec<f64> {
    t.contiguous().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};

    fn setup() -> (CpuClient, CpuDevice) {
        let device = CpuDevice::new();
        let client = CpuClient::new(device.clone());
        (client, device)
    }

    #[test]
    fn test_log_softmax_rows_normalizes() {
        let (client, device) = setup();
        let logits =
            Tensor::<CpuRuntime>::from_slice(&[1.0, 2.0, 3.0, -1.0, 0.0, 1000.0], &[2, 3], &device);
        let logp = log_softmax_rows(&client, &logits).unwrap();
        let p: Vec<f64> = host_values(&logp).iter().map(|v| v.exp()).collect();
        for row in 0..2 {
            let s: f64 = p[row * 3..row * 3 + 3].iter().sum();
            assert!((s - 1.0).abs() < 1e-12, "row {} sums to {}", row, s);
        }
        assert!((p[5] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_soft_threshold() {
        let (client, device) = setup();
        let v = Tensor::<CpuRuntime>::from_slice(&[-2.0, -0.5, 0.0, 0.3, 1.5], &[5], &device);
        let out: Vec<f64> = soft_threshold(&client, &v, 0.5).unwrap().to_vec();
        let expected = [-1.5, 0.0, 0.0, 0.0, 1.0];
        for (a, b) in out.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-12, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_normalize_rows_and_column() {
        let (client, device) = setup();
        let x = Tensor::<CpuRuntime>::from_slice(&[1.0, 3.0, 2.0, 2.0], &[2, 2], &device);
        let p = normalize_rows(&client, &x).unwrap();
        let col: Vec<f64> = column(&p, 1).unwrap().to_vec();
        assert!((col[0] - 0.75).abs() < 1e-12);
        assert!((col[1] - 0.5).abs() < 1e-12);
        assert!((sum_all(&client, &p).unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_stack_columns() {
        let (client, device) = setup();
        let a = Tensor::<CpuRuntime>::from_slice(&[1.0, 2.0], &[2], &device);
        let b = Tensor::<CpuRuntime>::from_slice(&[3.0, 4.0], &[2], &device);
        let m = stack_columns(&client, &[a, b]).unwrap();
        assert_eq!(m.shape(), &[2, 2]);
        assert_eq!(host_values(&m), vec![1.0, 3.0, 2.0, 4.0]);
    }
}
