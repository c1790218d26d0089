//! Shared runtime plumbing: the client trait bound and tensor helpers.

mod client;
pub(crate) mod tensor;

pub use client::CbmClient;
