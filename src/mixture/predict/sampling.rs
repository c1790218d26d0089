//! Monte-Carlo candidate generation with exact re-scoring.

use std::collections::HashSet;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::scores::MixtureScores;

/// Draw `num_samples` (cluster, label set) pairs and return the distinct
/// candidate with the highest exact posterior, first one on ties.
///
/// Empty sets are not candidates unless `allow_empty`. `None` when no
/// admissible candidate was drawn.
pub(crate) fn sample_best(
    scores: &MixtureScores,
    num_samples: usize,
    allow_empty: bool,
    seed: u64,
) -> Option<(Vec<bool>, f64)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let cluster_probs: Vec<f64> = (0..scores.num_clusters())
        .map(|k| scores.log_cluster(k).exp())
        .collect();

    let mut seen: HashSet<Vec<bool>> = HashSet::new();
    let mut best: Option<(Vec<bool>, f64)> = None;
    for _ in 0..num_samples {
        let k = draw_index(&mut rng, &cluster_probs);
        let candidate: Vec<bool> = (0..scores.num_labels())
            .map(|l| rng.r#gen::<f64>() < scores.log_present(k, l).exp())
            .collect();
        if !allow_empty && !candidate.contains(&true) {
            continue;
        }
        if !seen.insert(candidate.clone()) {
            continue;
        }
        let score = scores.log_posterior_indicator(&candidate);
        if best.as_ref().is_none_or(|(_, b)| score > *b) {
            best = Some((candidate, score));
        }
    }
    best
}

/// Sample an index proportionally to `weights`.
fn draw_index(rng: &mut ChaCha8Rng, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    let mut u = rng.r#gen::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        if u < *w {
            return i;
        }
        u -= w;
    }
    weights.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixture::predict::scores::tests::toy_scores;

    #[test]
    fn test_same_seed_same_answer() {
        let scores = toy_scores(0.6);
        let a = sample_best(&scores, 50, false, 11).unwrap();
        let b = sample_best(&scores, 50, false, 11).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_many_samples_find_the_mode() {
        let scores = toy_scores(0.6);
        let (best, score) = sample_best(&scores, 500, true, 3).unwrap();
        // cluster 0 MAP set {0, 1} dominates
        assert_eq!(best, vec![true, true, false]);
        assert!((score - scores.log_posterior_indicator(&best)).abs() < 1e-12);
    }

    #[test]
    fn test_empty_candidates_are_skipped() {
        // every label almost surely absent
        let scores = MixtureScores::new(
            1,
            2,
            vec![0.0],
            vec![1e-12f64.ln(); 2],
            vec![(1.0 - 1e-12f64).ln(); 2],
        );
        assert!(sample_best(&scores, 20, false, 0).is_none());
        let (best, _) = sample_best(&scores, 20, true, 0).unwrap();
        assert_eq!(best, vec![false, false]);
    }

    #[test]
    fn test_draw_index_follows_weights() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..100 {
            assert_eq!(draw_index(&mut rng, &[0.0, 2.0, 0.0]), 1);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let hits = (0..1000)
            .filter(|_| draw_index(&mut rng, &[0.25, 0.75]) == 1)
            .count();
        assert!((650..850).contains(&hits), "{hits}");
    }
}
