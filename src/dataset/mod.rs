//! Multi-label instances and the dataset contract consumed by the trainers.

#[allow(clippy::module_inception)]
mod dataset;
mod multilabel;

pub use dataset::{MultiLabelDataset, label_occurrence_matrix};
pub use multilabel::MultiLabel;
