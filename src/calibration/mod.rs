//! Score calibration.
//!
//! [`CardinalityIsotonicCalibrator`] maps an uncalibrated label-set score to a
//! probability of the set being correct, with one [`IsotonicRegression`] per
//! set size. Sizes never seen during fitting yield
//! [`Calibration::UnseenCardinality`] instead of an error.

mod card_iso;
mod isotonic;

pub use card_iso::{Calibration, CardinalityIsotonicCalibrator};
pub use isotonic::IsotonicRegression;
