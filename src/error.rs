//! Error types for mixture training, inference and persistence.

use thiserror::Error;

/// Result type for cbmix operations.
pub type CbmResult<T> = Result<T, CbmError>;

/// Errors raised by cbmix.
///
/// Configuration errors (unknown mode, dimension mismatch, bad parameters)
/// are never recovered internally. Numerical errors are produced by a single
/// subproblem and are normally contained by the caller that owns it.
#[derive(Debug, Error)]
pub enum CbmError {
    /// Inference mode string not recognised.
    #[error("unknown predict mode '{0}' (expected one of: sampling, dynamic, greedy)")]
    UnknownPredictMode(String),

    /// Shapes of a model, dataset or instance do not agree.
    #[error("{op}: {what} mismatch, expected {expected}, got {got}")]
    DimensionMismatch {
        op: &'static str,
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter '{parameter}': {message}")]
    InvalidParameter {
        parameter: &'static str,
        message: String,
    },

    /// Only F64 tensors are accepted.
    #[error("{op}: unsupported dtype, expected F64")]
    UnsupportedDType { op: &'static str },

    /// A subproblem produced a non-finite value.
    #[error("numerical failure in {context}: {message}")]
    Numerical { context: String, message: String },

    /// Serialized model could not be decoded.
    #[error("model format error: {0}")]
    Format(String),

    /// I/O error while reading or writing a model.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error from underlying numr operation.
    #[error("numr error: {0}")]
    Numr(String),
}

impl CbmError {
    /// Whether this error reports a caller-side configuration problem.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownPredictMode(_)
                | Self::DimensionMismatch { .. }
                | Self::InvalidParameter { .. }
                | Self::UnsupportedDType { .. }
        )
    }

    pub(crate) fn numerical(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Numerical {
            context: context.into(),
            message: message.into(),
        }
    }
}

impl From<numr::error::Error> for CbmError {
    fn from(err: numr::error::Error) -> Self {
        Self::Numr(err.to_string())
    }
}

impl From<bincode::Error> for CbmError {
    fn from(err: bincode::Error) -> Self {
        Self::Format(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(CbmError::UnknownPredictMode("beam".into()).is_configuration());
        assert!(
            CbmError::DimensionMismatch {
                op: "predict",
                what: "features",
                expected: 3,
                got: 4,
            }
            .is_configuration()
        );
        assert!(!CbmError::numerical("cluster 0 label 1", "NaN objective").is_configuration());
        assert!(!CbmError::Format("bad magic".into()).is_configuration());
    }

    #[test]
    fn test_messages_carry_operation() {
        let err = CbmError::numerical("cluster 2 label 5", "objective is NaN");
        assert_eq!(
            err.to_string(),
            "numerical failure in cluster 2 label 5: objective is NaN"
        );
        let err = CbmError::UnknownPredictMode("beam".into());
        assert!(err.to_string().contains("'beam'"));
    }
}
