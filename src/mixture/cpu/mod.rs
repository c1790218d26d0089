//! CPU implementations of the mixture algorithm traits.

mod bernoulli;
