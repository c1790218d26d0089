//! Most probable cluster, then independent per-label thresholding.

use super::scores::MixtureScores;

/// Labels with `P(present) > 0.5` in the most probable cluster.
pub(crate) fn greedy_set(scores: &MixtureScores) -> Vec<bool> {
    let k = scores.map_cluster();
    (0..scores.num_labels())
        .map(|l| scores.log_present(k, l) > scores.log_absent(k, l))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixture::predict::scores::tests::toy_scores;

    #[test]
    fn test_follows_map_cluster() {
        assert_eq!(greedy_set(&toy_scores(0.6)), vec![true, true, false]);
        assert_eq!(greedy_set(&toy_scores(0.3)), vec![false, false, true]);
    }
}
