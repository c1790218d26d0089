//! Diagnostics sinks for trainers and predictors.
//!
//! Trainers and predictors never log through global state. Each receives a
//! [`DiagnosticsSink`] and reports [`DiagnosticEvent`]s to it. The default
//! [`TracingSink`] forwards everything to `tracing`; [`MemorySink`] keeps the
//! events for later inspection.

use std::sync::{Mutex, PoisonError};

/// Event emitted during training or inference.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    /// One Bernoulli mixture EM run finished.
    BernoulliRunFinished {
        run: u64,
        iterations: usize,
        objective: f64,
        converged: bool,
    },
    /// The Bernoulli mixture objective went up between two iterations.
    BernoulliObjectiveIncreased {
        run: u64,
        iteration: usize,
        previous: f64,
        current: f64,
    },
    /// A Bernoulli mixture run failed and was dropped from selection.
    BernoulliRunFailed { run: u64, message: String },
    /// The selector picked a run.
    BernoulliRunSelected { run: u64, objective: f64 },
    /// An EM outer iteration of the mixture-of-experts trainer finished its E-step.
    EmIteration {
        iteration: usize,
        log_likelihood: f64,
    },
    /// The gating classifier was refit.
    GatingUpdated {
        objective_before: f64,
        objective_after: f64,
        iterations: usize,
    },
    /// The gating classifier refit failed; previous parameters were kept.
    GatingFailed { message: String },
    /// A placeholder cell was replaced by a fitted classifier.
    CellPromoted { cluster: usize, label: usize },
    /// A cell was not refit because its cluster carries almost no weight.
    CellSkipped {
        cluster: usize,
        label: usize,
        total_weight: f64,
    },
    /// A cell refit failed; previous parameters were kept.
    CellFailed {
        cluster: usize,
        label: usize,
        message: String,
    },
    /// A prediction was replaced by the non-empty fallback.
    PredictionFallback { mode: &'static str, row: usize },
    /// Exact search stopped at the candidate cap before proving optimality.
    SearchTruncated { row: usize, candidates: usize },
}

/// Receiver of diagnostic events.
pub trait DiagnosticsSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: DiagnosticEvent);
}

/// Sink forwarding events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&self, event: DiagnosticEvent) {
        match event {
            DiagnosticEvent::BernoulliRunFinished {
                run,
                iterations,
                objective,
                converged,
            } => {
                tracing::debug!(
                    run,
                    iterations,
                    objective,
                    converged,
                    "bernoulli mixture run finished"
                )
            }
            DiagnosticEvent::BernoulliObjectiveIncreased {
                run,
                iteration,
                previous,
                current,
            } => tracing::warn!(
                run,
                iteration,
                previous,
                current,
                "bernoulli mixture objective increased"
            ),
            DiagnosticEvent::BernoulliRunFailed { run, message } => {
                tracing::warn!(run, error = %message, "bernoulli mixture run failed, skipping run")
            }
            DiagnosticEvent::BernoulliRunSelected { run, objective } => {
                tracing::debug!(run, objective, "bernoulli mixture run selected")
            }
            DiagnosticEvent::EmIteration {
                iteration,
                log_likelihood,
            } => tracing::debug!(iteration, log_likelihood, "em iteration"),
            DiagnosticEvent::GatingUpdated {
                objective_before,
                objective_after,
                iterations,
            } => tracing::debug!(
                objective_before,
                objective_after,
                iterations,
                "gating classifier updated"
            ),
            DiagnosticEvent::GatingFailed { message } => {
                tracing::warn!(
                    error = %message,
                    "gating update failed, keeping previous parameters"
                )
            }
            DiagnosticEvent::CellPromoted { cluster, label } => {
                tracing::debug!(cluster, label, "placeholder cell replaced by a fitted classifier")
            }
            DiagnosticEvent::CellSkipped {
                cluster,
                label,
                total_weight,
            } => tracing::debug!(
                cluster,
                label,
                total_weight,
                "cell skipped, cluster weight too small"
            ),
            DiagnosticEvent::CellFailed {
                cluster,
                label,
                message,
            } => tracing::warn!(
                cluster,
                label,
                error = %message,
                "cell update failed, keeping previous parameters"
            ),
            DiagnosticEvent::PredictionFallback { mode, row } => {
                tracing::debug!(mode, row, "empty prediction replaced by best single label")
            }
            DiagnosticEvent::SearchTruncated { row, candidates } => {
                tracing::warn!(row, candidates, "exact search truncated at candidate cap")
            }
        }
    }
}

/// Sink keeping every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events, in arrival order.
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&DiagnosticEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| pred(e))
            .count()
    }
}

impl DiagnosticsSink for MemorySink {
    fn record(&self, event: DiagnosticEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Sink discarding every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn record(&self, _event: DiagnosticEvent) {}
}
