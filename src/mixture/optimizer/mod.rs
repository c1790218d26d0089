//! EM mixture-of-experts trainer.

mod em;
mod options;
mod train;

pub use em::CbmOptimizer;
pub use options::{CbmOptimizerOptions, MStepReport, OptimizeReport};
pub use train::train_cbm;
