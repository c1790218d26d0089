//! Label-set inference for a trained mixture.
//!
//! All modes share [`MixtureScores`]: the gating log-probabilities and the
//! per-cell present/absent log-probabilities of one instance. Candidates are
//! always compared by the exact mixture posterior
//! `sum_k pi_k(x) prod_l P(y_l | k, x)`.

mod dynamic;
mod greedy;
mod sampling;
mod scores;

use std::fmt;
use std::str::FromStr;

use numr::runtime::Runtime;
use numr::tensor::Tensor;
use rayon::prelude::*;

pub use scores::{MixtureScores, compute_scores};

use crate::common::CbmClient;
use crate::dataset::MultiLabel;
use crate::diagnostics::{DiagnosticEvent, DiagnosticsSink};
use crate::error::{CbmError, CbmResult};
use crate::mixture::model::CbmModel;

/// Inference algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PredictMode {
    /// Monte-Carlo candidates re-scored exactly.
    #[default]
    Sampling,
    /// Exact maximum-posterior search.
    Dynamic,
    /// Most probable cluster, then thresholding at 0.5.
    Greedy,
}

impl PredictMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sampling => "sampling",
            Self::Dynamic => "dynamic",
            Self::Greedy => "greedy",
        }
    }
}

impl FromStr for PredictMode {
    type Err = CbmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sampling" => Ok(Self::Sampling),
            "dynamic" => Ok(Self::Dynamic),
            "greedy" => Ok(Self::Greedy),
            other => Err(CbmError::UnknownPredictMode(other.to_string())),
        }
    }
}

impl fmt::Display for PredictMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for [`MixturePredictor`].
#[derive(Debug, Clone)]
pub struct PredictOptions {
    pub mode: PredictMode,
    /// Draws per instance in sampling mode.
    pub num_samples: usize,
    /// Whether the empty label set is a valid answer.
    pub allow_empty: bool,
    /// Base seed; row `i` samples with `seed + i`.
    pub seed: u64,
    /// Sets expanded per instance before exact search gives up.
    pub max_candidates: usize,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            mode: PredictMode::Sampling,
            num_samples: 100,
            allow_empty: false,
            seed: 0,
            max_candidates: 10_000,
        }
    }
}

/// Predicted label set with its exact log posterior.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub labels: MultiLabel,
    pub log_posterior: f64,
}

/// Read-only inference over a trained [`CbmModel`].
pub struct MixturePredictor<'a, R: Runtime, C> {
    client: &'a C,
    model: &'a CbmModel<R>,
    options: PredictOptions,
    sink: &'a dyn DiagnosticsSink,
}

impl<'a, R, C> MixturePredictor<'a, R, C>
where
    R: Runtime,
    C: CbmClient<R>,
{
    pub fn new(
        client: &'a C,
        model: &'a CbmModel<R>,
        options: PredictOptions,
        sink: &'a dyn DiagnosticsSink,
    ) -> CbmResult<Self> {
        if options.mode == PredictMode::Sampling && options.num_samples == 0 {
            return Err(CbmError::InvalidParameter {
                parameter: "num_samples",
                message: "sampling mode requires num_samples >= 1".to_string(),
            });
        }
        if options.max_candidates == 0 {
            return Err(CbmError::InvalidParameter {
                parameter: "max_candidates",
                message: "must be >= 1".to_string(),
            });
        }
        Ok(Self {
            client,
            model,
            options,
            sink,
        })
    }

    pub fn options(&self) -> &PredictOptions {
        &self.options
    }

    /// Per-row scores of `features [n, F]`.
    pub fn scores(&self, features: &Tensor<R>) -> CbmResult<Vec<MixtureScores>> {
        compute_scores(self.client, self.model, features)
    }

    /// Label set and log posterior for every row of `features [n, F]`.
    pub fn predict_with_posterior(&self, features: &Tensor<R>) -> CbmResult<Vec<Prediction>> {
        let scores = self.scores(features)?;
        let options = &self.options;
        let sink = self.sink;
        Ok(scores
            .par_iter()
            .enumerate()
            .map(|(row, s)| infer_row(s, options, sink, row))
            .collect())
    }

    /// Label set for every row of `features [n, F]`.
    pub fn predict(&self, features: &Tensor<R>) -> CbmResult<Vec<MultiLabel>> {
        Ok(self
            .predict_with_posterior(features)?
            .into_iter()
            .map(|p| p.labels)
            .collect())
    }

    /// Label set for one instance given as `[F]` or `[1, F]`.
    pub fn predict_one(&self, features: &Tensor<R>) -> CbmResult<MultiLabel> {
        let row = if features.ndim() == 1 {
            features.reshape(&[1, features.shape()[0]])?
        } else {
            features.clone()
        };
        if row.shape()[0] != 1 {
            return Err(CbmError::DimensionMismatch {
                op: "MixturePredictor::predict_one",
                what: "row count",
                expected: 1,
                got: row.shape()[0],
            });
        }
        self.predict_with_posterior(&row)?
            .pop()
            .map(|p| p.labels)
            .ok_or_else(|| CbmError::numerical("MixturePredictor::predict_one", "no prediction"))
    }
}

fn infer_row(
    scores: &MixtureScores,
    options: &PredictOptions,
    sink: &dyn DiagnosticsSink,
    row: usize,
) -> Prediction {
    let found = match options.mode {
        PredictMode::Sampling => sampling::sample_best(
            scores,
            options.num_samples,
            options.allow_empty,
            options.seed.wrapping_add(row as u64),
        ),
        PredictMode::Dynamic => {
            let result = dynamic::search_best(scores, options.allow_empty, options.max_candidates);
            if result.truncated {
                sink.record(DiagnosticEvent::SearchTruncated {
                    row,
                    candidates: result.expanded,
                });
            }
            result.best
        }
        PredictMode::Greedy => {
            let set = greedy::greedy_set(scores);
            (options.allow_empty || set.contains(&true)).then(|| {
                let score = scores.log_posterior_indicator(&set);
                (set, score)
            })
        }
    };

    match found {
        Some((set, log_posterior)) => Prediction {
            labels: MultiLabel::from_indicator(&set),
            log_posterior,
        },
        None => {
            sink.record(DiagnosticEvent::PredictionFallback {
                mode: options.mode.as_str(),
                row,
            });
            let labels = MultiLabel::new(vec![scores.best_single_label()]);
            let log_posterior = scores.log_posterior(&labels);
            Prediction {
                labels,
                log_posterior,
            }
        }
    }
}
