//! Component classifiers used as gating and per-label experts.
//!
//! Every learner implements [`ComponentClassifier`]: weighted fitting against
//! soft targets, log/linear class probabilities and the objective. A model
//! picks one [`LearnerKind`] for its gating classifier and cells;
//! [`CellState`] promotes placeholder cells to that learner on first fit.

mod boost;
mod cell;
mod learner;
mod logistic;
mod loss;
mod prior;
mod traits;

pub use boost::{BoostOptions, BoostedClassifier};
pub use cell::CellState;
pub use learner::{Learner, LearnerKind};
pub use logistic::LogisticRegression;
pub use prior::PriorProbClassifier;
pub use traits::{ComponentClassifier, FitOptions, FitReport};
