//! Per-instance cluster and cell log-probabilities.

use numr::runtime::Runtime;
use numr::tensor::Tensor;

use crate::common::CbmClient;
use crate::common::tensor::host_values;
use crate::dataset::MultiLabel;
use crate::error::CbmResult;
use crate::mixture::model::CbmModel;

/// Host-side scores of one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureScores {
    num_clusters: usize,
    num_labels: usize,
    /// `log pi_k(x)`, `[K]`.
    log_cluster: Vec<f64>,
    /// `log P(l present | k, x)`, `[K * L]` row-major.
    log_present: Vec<f64>,
    /// `log P(l absent | k, x)`, `[K * L]` row-major.
    log_absent: Vec<f64>,
}

impl MixtureScores {
    /// Build from raw log-probabilities.
    pub fn new(
        num_clusters: usize,
        num_labels: usize,
        log_cluster: Vec<f64>,
        log_present: Vec<f64>,
        log_absent: Vec<f64>,
    ) -> Self {
        debug_assert_eq!(log_cluster.len(), num_clusters);
        debug_assert_eq!(log_present.len(), num_clusters * num_labels);
        debug_assert_eq!(log_absent.len(), num_clusters * num_labels);
        Self {
            num_clusters,
            num_labels,
            log_cluster,
            log_present,
            log_absent,
        }
    }

    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn log_cluster(&self, cluster: usize) -> f64 {
        self.log_cluster[cluster]
    }

    pub fn log_present(&self, cluster: usize, label: usize) -> f64 {
        self.log_present[cluster * self.num_labels + label]
    }

    pub fn log_absent(&self, cluster: usize, label: usize) -> f64 {
        self.log_absent[cluster * self.num_labels + label]
    }

    /// `log P(labels | k, x)` with labels as a presence indicator.
    pub fn cluster_log_likelihood(&self, cluster: usize, indicator: &[bool]) -> f64 {
        indicator
            .iter()
            .enumerate()
            .map(|(l, &on)| {
                if on {
                    self.log_present(cluster, l)
                } else {
                    self.log_absent(cluster, l)
                }
            })
            .sum()
    }

    /// Exact label-set posterior `log sum_k pi_k prod_l P(y_l | k, x)`.
    pub fn log_posterior_indicator(&self, indicator: &[bool]) -> f64 {
        log_sum_exp(
            (0..self.num_clusters)
                .map(|k| self.log_cluster[k] + self.cluster_log_likelihood(k, indicator)),
        )
    }

    /// Exact posterior of a label set; labels outside `0..L` are ignored.
    pub fn log_posterior(&self, labels: &MultiLabel) -> f64 {
        self.log_posterior_indicator(&indicator(labels, self.num_labels))
    }

    /// Most probable cluster, first one on ties.
    pub fn map_cluster(&self) -> usize {
        argmax(self.log_cluster.iter().copied())
    }

    /// Marginal `P(l present | x) = sum_k pi_k p_kl` for every label.
    pub fn label_marginals(&self) -> Vec<f64> {
        (0..self.num_labels)
            .map(|l| {
                (0..self.num_clusters)
                    .map(|k| (self.log_cluster[k] + self.log_present(k, l)).exp())
                    .sum()
            })
            .collect()
    }

    /// Label with the highest marginal, first one on ties.
    pub fn best_single_label(&self) -> usize {
        argmax(self.label_marginals().into_iter())
    }
}

/// Presence indicator of length `num_labels`.
pub(crate) fn indicator(labels: &MultiLabel, num_labels: usize) -> Vec<bool> {
    let mut out = vec![false; num_labels];
    for &l in labels.labels().iter().filter(|&&l| l < num_labels) {
        out[l] = true;
    }
    out
}

/// Stable `log sum exp`; `-inf` for an empty or all `-inf` input.
pub(crate) fn log_sum_exp(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + values.map(|v| (v - max).exp()).sum::<f64>().ln()
}

fn argmax(values: impl Iterator<Item = f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, v) in values.enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

/// Compute [`MixtureScores`] for every row of `features [n, F]`.
pub fn compute_scores<R, C>(
    client: &C,
    model: &CbmModel<R>,
    features: &Tensor<R>,
) -> CbmResult<Vec<MixtureScores>>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let log_cluster = host_values(&model.cluster_log_probs(client, features)?);
    let (present, absent) = model.cell_log_probs(client, features)?;
    let (present, absent) = (host_values(&present), host_values(&absent));

    let k = model.num_clusters();
    let width = k * model.num_labels();
    Ok(log_cluster
        .chunks(k)
        .zip(present.chunks(width).zip(absent.chunks(width)))
        .map(|(c, (p, a))| {
            MixtureScores::new(k, model.num_labels(), c.to_vec(), p.to_vec(), a.to_vec())
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two clusters over three labels with well-separated preferences.
    pub(crate) fn toy_scores(pi0: f64) -> MixtureScores {
        let p = [0.9, 0.8, 0.1, 0.2, 0.3, 0.7];
        MixtureScores::new(
            2,
            3,
            vec![pi0.ln(), (1.0 - pi0).ln()],
            p.iter().map(|v: &f64| v.ln()).collect(),
            p.iter().map(|v: &f64| (1.0 - v).ln()).collect(),
        )
    }

    #[test]
    fn test_posteriors_sum_to_one() {
        let scores = toy_scores(0.6);
        let total: f64 = (0..8u32)
            .map(|mask| {
                let ind: Vec<bool> = (0..3).map(|l| (mask >> l) & 1 == 1).collect();
                scores.log_posterior_indicator(&ind).exp()
            })
            .sum();
        assert!((total - 1.0).abs() < 1e-12, "total = {}", total);
    }

    #[test]
    fn test_marginals_and_map_cluster() {
        let scores = toy_scores(0.6);
        assert_eq!(scores.map_cluster(), 0);
        let m = scores.label_marginals();
        assert!((m[0] - (0.6 * 0.9 + 0.4 * 0.2)).abs() < 1e-12);
        assert_eq!(scores.best_single_label(), 0);
        let p = scores.log_posterior(&MultiLabel::new(vec![0, 1])).exp();
        let expected = 0.6 * 0.9 * 0.8 * 0.9 + 0.4 * 0.2 * 0.3 * 0.3;
        assert!((p - expected).abs() < 1e-12);
    }

    #[test]
    fn test_log_sum_exp_handles_neg_infinity() {
        assert_eq!(log_sum_exp([f64::NEG_INFINITY].into_iter()), f64::NEG_INFINITY);
        let v = log_sum_exp([0.0f64, 0.0].into_iter());
        assert!((v - 2f64.ln()).abs() < 1e-12);
    }
}
