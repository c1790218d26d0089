//! Generic mixture algorithm implementations.

pub mod bernoulli;
pub mod selector;

pub use bernoulli::{bmm_fit_impl, bmm_predict_proba_impl, bmm_score_impl};
pub use selector::{bmm_select_all_impl, bmm_select_impl};
