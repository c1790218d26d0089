//! Mixture algorithm traits.

pub mod bernoulli;
