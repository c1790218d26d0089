//! Conditional Bernoulli mixture: label-set clustering, EM training and inference.
//!
//! - [`traits::bernoulli`] / [`impl_generic`]: Bernoulli mixture over label
//!   indicator vectors with random-restart selection.
//! - [`CbmModel`]: gating classifier plus a `K x L` grid of binary cells.
//! - [`optimizer`]: EM mixture-of-experts training.
//! - [`predict`]: sampling, exact and greedy label-set inference.
//!
//! Models are saved with [`CbmModel::save`] and read back with [`CbmModel::load`].

mod cpu;
pub mod impl_generic;
mod model;
pub mod optimizer;
mod persistence;
pub mod predict;
pub mod traits;

pub use model::CbmModel;
pub use optimizer::{
    CbmOptimizer, CbmOptimizerOptions, MStepReport, OptimizeReport, train_cbm,
};
pub use predict::{
    MixturePredictor, MixtureScores, PredictMode, PredictOptions, Prediction, compute_scores,
};
pub use traits::bernoulli::{
    BernoulliMixtureAlgorithms, BernoulliMixtureFit, BernoulliMixtureModel,
    BernoulliMixtureOptions, BernoulliMixtureSelection,
};
