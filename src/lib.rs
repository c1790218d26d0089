//! cbmix - Conditional Bernoulli mixtures for multi-label classification
//!
//! Each instance is generated by one of `K` latent clusters. A gating
//! classifier predicts the cluster from the features, and every cluster owns
//! `L` binary classifiers, one per label, that are independent given the
//! cluster. Training runs EM over this mixture of experts, seeded by a
//! Bernoulli mixture fit on the observed label sets. Inference picks the label
//! set with the highest mixture posterior.
//!
//! Built on numr tensors; generic over numr's `Runtime` trait.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  mixture::predict   sampling / dynamic / greedy          │
//! ├──────────────────────────────────────────────────────────┤
//! │  mixture::optimizer EM: gating + K x L binary cells      │
//! │  mixture (bmm)      Bernoulli mixture + random restarts  │
//! ├──────────────────────────────────────────────────────────┤
//! │  classifier         elastic-net logistic regression,     │
//! │                     boosted trees, prior, cell states    │
//! └──────────────────────────┬───────────────────────────────┘
//!                            │ uses
//! ┌──────────────────────────▼───────────────────────────────┐
//! │                       numr                               │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`dataset`] - Multi-label instances and the training dataset
//! - [`classifier`] - Component classifiers and the per-cell state machine
//! - [`mixture`] - Bernoulli mixture, EM trainer, predictor and model format
//! - [`calibration`] - Per-cardinality isotonic calibration of set scores
//! - [`diagnostics`] - Explicit event sinks for training and inference
//!
//! # Example
//!
//! ```ignore
//! use cbmix::{CbmOptimizerOptions, MixturePredictor, MultiLabel, MultiLabelDataset,
//!     PredictMode, PredictOptions, TracingSink, train_cbm};
//! use numr::runtime::cpu::{CpuClient, CpuDevice};
//!
//! let device = CpuDevice::new();
//! let client = CpuClient::new(device.clone());
//!
//! let labels = vec![MultiLabel::new(vec![0, 1]), MultiLabel::new(vec![2])];
//! let data = MultiLabelDataset::from_rows(&[1.0, 0.0, 0.0, 1.0], 2, labels, 3, &device)?;
//! let options = CbmOptimizerOptions::default();
//! let (model, report) = train_cbm(&client, &data, 2, options, &TracingSink)?;
//!
//! let options = PredictOptions { mode: PredictMode::Dynamic, ..Default::default() };
//! let predictor = MixturePredictor::new(&client, &model, options, &TracingSink)?;
//! let sets = predictor.predict(data.features())?;
//! ```

pub mod calibration;
pub mod classifier;
pub mod common;
pub mod dataset;
pub mod diagnostics;
pub mod error;
pub mod mixture;
mod validation;

pub use calibration::{Calibration, CardinalityIsotonicCalibrator, IsotonicRegression};
pub use classifier::{
    BoostOptions, BoostedClassifier, CellState, ComponentClassifier, FitOptions, FitReport,
    Learner, LearnerKind, LogisticRegression, PriorProbClassifier,
};
pub use common::CbmClient;
pub use dataset::{MultiLabel, MultiLabelDataset};
pub use diagnostics::{DiagnosticEvent, DiagnosticsSink, MemorySink, NullSink, TracingSink};
pub use error::{CbmError, CbmResult};
pub use mixture::{
    BernoulliMixtureAlgorithms, BernoulliMixtureOptions, CbmModel, CbmOptimizer,
    CbmOptimizerOptions, MixturePredictor, OptimizeReport, PredictMode, PredictOptions,
    Prediction, train_cbm,
};

// Re-export numr types that users will commonly need
pub use numr::dtype::DType;
pub use numr::runtime::Runtime;
pub use numr::tensor::Tensor;
