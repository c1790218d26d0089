//! Dense multi-label dataset.

use numr::runtime::Runtime;
use numr::tensor::Tensor;

use super::MultiLabel;
use crate::error::{CbmError, CbmResult};
use crate::validation::validate_matrix;

/// Build the `[n, num_labels]` 0/1 label-occurrence matrix.
pub fn label_occurrence_matrix<R: Runtime>(
    multi_labels: &[MultiLabel],
    num_labels: usize,
    device: &R::Device,
) -> CbmResult<Tensor<R>> {
    if multi_labels.is_empty() {
        return Err(CbmError::InvalidParameter {
            parameter: "multi_labels",
            message: "at least one multi-label is required".to_string(),
        });
    }
    if num_labels == 0 {
        return Err(CbmError::InvalidParameter {
            parameter: "num_labels",
            message: "must be > 0".to_string(),
        });
    }
    let mut data = Vec::with_capacity(multi_labels.len() * num_labels);
    for (i, ml) in multi_labels.iter().enumerate() {
        if let Some(max) = ml.max_label().filter(|&m| m >= num_labels) {
            return Err(CbmError::InvalidParameter {
                parameter: "multi_labels",
                message: format!("instance {i} has label {max}, num_labels is {num_labels}"),
            });
        }
        data.extend(ml.to_indicator(num_labels));
    }
    Ok(Tensor::<R>::from_slice(
        &data,
        &[multi_labels.len(), num_labels],
        device,
    ))
}

/// Instances with dense F64 features and observed multi-labels.
#[derive(Debug, Clone)]
pub struct MultiLabelDataset<R: Runtime> {
    features: Tensor<R>,
    multi_labels: Vec<MultiLabel>,
    num_labels: usize,
    label_matrix: Tensor<R>,
}

impl<R: Runtime> MultiLabelDataset<R> {
    /// Create a dataset from a `[n, F]` feature tensor and one multi-label per row.
    pub fn new(
        features: Tensor<R>,
        multi_labels: Vec<MultiLabel>,
        num_labels: usize,
    ) -> CbmResult<Self> {
        let (n, _) = validate_matrix(&features, "MultiLabelDataset::new")?;
        if multi_labels.len() != n {
            return Err(CbmError::DimensionMismatch {
                op: "MultiLabelDataset::new",
                what: "multi-label count",
                expected: n,
                got: multi_labels.len(),
            });
        }
        let label_matrix =
            label_occurrence_matrix::<R>(&multi_labels, num_labels, features.device())?;
        Ok(Self {
            features,
            multi_labels,
            num_labels,
            label_matrix,
        })
    }

    /// Create a dataset from row-major feature values.
    pub fn from_rows(
        features: &[f64],
        num_features: usize,
        multi_labels: Vec<MultiLabel>,
        num_labels: usize,
        device: &R::Device,
    ) -> CbmResult<Self> {
        let n = multi_labels.len();
        if features.len() != n * num_features {
            return Err(CbmError::DimensionMismatch {
                op: "MultiLabelDataset::from_rows",
                what: "feature value count",
                expected: n * num_features,
                got: features.len(),
            });
        }
        let features = Tensor::<R>::from_slice(features, &[n, num_features], device);
        Self::new(features, multi_labels, num_labels)
    }

    pub fn num_instances(&self) -> usize {
        self.multi_labels.len()
    }

    pub fn num_features(&self) -> usize {
        self.features.shape()[1]
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Feature matrix `[n, F]`.
    pub fn features(&self) -> &Tensor<R> {
        &self.features
    }

    /// Label indicator matrix `[n, L]`.
    pub fn label_matrix(&self) -> &Tensor<R> {
        &self.label_matrix
    }

    pub fn multi_labels(&self) -> &[MultiLabel] {
        &self.multi_labels
    }

    /// Feature row `i` as a `[1, F]` tensor.
    pub fn instance(&self, i: usize) -> CbmResult<Tensor<R>> {
        self.check_index(i)?;
        Ok(self.features.narrow(0, i, 1)?.contiguous())
    }

    pub fn multi_label(&self, i: usize) -> CbmResult<&MultiLabel> {
        self.check_index(i)?;
        Ok(&self.multi_labels[i])
    }

    /// Fraction of instances carrying each label.
    pub fn label_frequencies(&self) -> Vec<f64> {
        let mut counts = vec![0.0; self.num_labels];
        for ml in &self.multi_labels {
            for &l in ml.labels() {
                counts[l] += 1.0;
            }
        }
        let n = self.num_instances() as f64;
        counts.iter_mut().for_each(|c| *c /= n);
        counts
    }

    fn check_index(&self, i: usize) -> CbmResult<()> {
        if i >= self.num_instances() {
            return Err(CbmError::InvalidParameter {
                parameter: "index",
                message: format!(
                    "instance {i} out of range for {} instances",
                    self.num_instances()
                ),
            });
        }
        Ok(())
    }
}
