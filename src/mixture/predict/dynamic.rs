//! Exact maximum-posterior label set by best-first search.
//!
//! Within a cluster the labels are independent, so its label sets can be
//! listed in non-increasing probability: the per-label MAP set first, then
//! sets obtained by flipping labels, cheapest total flip cost first. The
//! search repeatedly takes the next set from the cluster with the largest
//! `pi_k * next_k` and scores it with the full mixture posterior. No set that
//! has not been listed yet can score above `sum_k pi_k * next_k`, so the
//! search stops as soon as the best score reaches that bound.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use super::scores::{MixtureScores, log_sum_exp};

/// Heap entry: a set of flipped positions (indices into the cost order).
#[derive(Debug)]
struct FlipSet {
    cost: f64,
    /// Sorted positions; the last one is the largest.
    positions: Vec<usize>,
}

impl PartialEq for FlipSet {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FlipSet {}

impl PartialOrd for FlipSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FlipSet {
    // min-heap on cost, then on positions for a deterministic order
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.positions.cmp(&self.positions))
    }
}

/// Lists the label sets of one cluster in non-increasing probability.
struct ClusterEnumerator {
    map_set: Vec<bool>,
    map_log_prob: f64,
    /// Labels sorted by flip cost.
    order: Vec<usize>,
    /// Flip costs in `order`.
    costs: Vec<f64>,
    heap: BinaryHeap<FlipSet>,
    /// The MAP set has not been returned yet.
    fresh: bool,
}

impl ClusterEnumerator {
    fn new(scores: &MixtureScores, cluster: usize) -> Self {
        let num_labels = scores.num_labels();
        let mut map_set = Vec::with_capacity(num_labels);
        let mut map_log_prob = 0.0;
        let mut flip_cost = Vec::with_capacity(num_labels);
        for l in 0..num_labels {
            let present = scores.log_present(cluster, l);
            let absent = scores.log_absent(cluster, l);
            map_set.push(present > absent);
            map_log_prob += present.max(absent);
            flip_cost.push((present - absent).abs());
        }
        let mut order: Vec<usize> = (0..num_labels).collect();
        order.sort_by(|&a, &b| flip_cost[a].total_cmp(&flip_cost[b]).then(a.cmp(&b)));
        let costs: Vec<f64> = order.iter().map(|&l| flip_cost[l]).collect();

        let mut heap = BinaryHeap::new();
        if num_labels > 0 {
            heap.push(FlipSet {
                cost: costs[0],
                positions: vec![0],
            });
        }
        Self {
            map_set,
            map_log_prob,
            order,
            costs,
            heap,
            fresh: true,
        }
    }

    /// Log probability of the next set, `None` once all `2^L` sets are listed.
    fn peek(&self) -> Option<f64> {
        if self.fresh {
            return Some(self.map_log_prob);
        }
        self.heap.peek().map(|f| self.map_log_prob - f.cost)
    }

    fn next_set(&mut self) -> Option<Vec<bool>> {
        if self.fresh {
            self.fresh = false;
            return Some(self.map_set.clone());
        }
        let top = self.heap.pop()?;
        let last = top.positions[top.positions.len() - 1];
        if last + 1 < self.costs.len() {
            // extend: add the next position
            let mut extended = top.positions.clone();
            extended.push(last + 1);
            self.heap.push(FlipSet {
                cost: top.cost + self.costs[last + 1],
                positions: extended,
            });
            // shift: replace the last position by the next one
            let mut shifted = top.positions.clone();
            let end = shifted.len() - 1;
            shifted[end] = last + 1;
            self.heap.push(FlipSet {
                cost: top.cost - self.costs[last] + self.costs[last + 1],
                positions: shifted,
            });
        }
        let mut set = self.map_set.clone();
        for &p in &top.positions {
            let l = self.order[p];
            set[l] = !set[l];
        }
        Some(set)
    }
}

/// Outcome of the exact search for one instance.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SearchResult {
    /// Best admissible set and its log posterior.
    pub(crate) best: Option<(Vec<bool>, f64)>,
    /// Sets taken from the enumerators.
    pub(crate) expanded: usize,
    /// Stopped at `max_candidates` before the bound was reached.
    pub(crate) truncated: bool,
}

/// Find the label set with the maximum mixture posterior.
pub(crate) fn search_best(
    scores: &MixtureScores,
    allow_empty: bool,
    max_candidates: usize,
) -> SearchResult {
    let mut enumerators: Vec<ClusterEnumerator> = (0..scores.num_clusters())
        .map(|k| ClusterEnumerator::new(scores, k))
        .collect();
    let mut seen: HashSet<Vec<bool>> = HashSet::new();
    let mut best: Option<(Vec<bool>, f64)> = None;
    let mut expanded = 0;

    loop {
        let heads: Vec<Option<f64>> = enumerators
            .iter()
            .enumerate()
            .map(|(k, e)| e.peek().map(|p| scores.log_cluster(k) + p))
            .collect();
        let bound = log_sum_exp(heads.iter().map(|h| h.unwrap_or(f64::NEG_INFINITY)));
        if bound == f64::NEG_INFINITY {
            break;
        }
        if best.as_ref().is_some_and(|(_, b)| *b >= bound) {
            break;
        }
        if expanded >= max_candidates {
            return SearchResult {
                best,
                expanded,
                truncated: true,
            };
        }

        let mut pick = None;
        let mut pick_value = f64::NEG_INFINITY;
        for (k, h) in heads.iter().enumerate() {
            if let Some(v) = *h {
                if pick.is_none() || v > pick_value {
                    pick = Some(k);
                    pick_value = v;
                }
            }
        }
        let Some(k) = pick else { break };
        let Some(set) = enumerators[k].next_set() else {
            continue;
        };
        expanded += 1;
        if !allow_empty && !set.contains(&true) {
            seen.insert(set);
            continue;
        }
        if !seen.insert(set.clone()) {
            continue;
        }
        let score = scores.log_posterior_indicator(&set);
        if best.as_ref().is_none_or(|(_, b)| score > *b) {
            best = Some((set, score));
        }
    }

    SearchResult {
        best,
        expanded,
        truncated: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixture::predict::scores::tests::toy_scores;

    fn brute_force(scores: &MixtureScores, allow_empty: bool) -> (Vec<bool>, f64) {
        let l = scores.num_labels();
        let mut best: Option<(Vec<bool>, f64)> = None;
        for mask in 0..(1u32 << l) {
            let set: Vec<bool> = (0..l).map(|j| (mask >> j) & 1 == 1).collect();
            if !allow_empty && !set.contains(&true) {
                continue;
            }
            let s = scores.log_posterior_indicator(&set);
            if best.as_ref().is_none_or(|(_, b)| s > *b) {
                best = Some((set, s));
            }
        }
        best.unwrap()
    }

    /// Deterministic pseudo-random scores without an RNG dependency in the assertion path.
    fn scattered_scores(k: usize, l: usize, salt: u64) -> MixtureScores {
        let mut state = salt.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let mut next = || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 11) as f64 / (1u64 << 53) as f64).clamp(0.01, 0.99)
        };
        let raw_pi: Vec<f64> = (0..k).map(|_| next()).collect();
        let total: f64 = raw_pi.iter().sum();
        let p: Vec<f64> = (0..k * l).map(|_| next()).collect();
        MixtureScores::new(
            k,
            l,
            raw_pi.iter().map(|v| (v / total).ln()).collect(),
            p.iter().map(|v| v.ln()).collect(),
            p.iter().map(|v| (1.0 - v).ln()).collect(),
        )
    }

    #[test]
    fn test_enumerator_lists_all_sets_in_order() {
        let scores = scattered_scores(1, 5, 9);
        let mut e = ClusterEnumerator::new(&scores, 0);
        let mut prev = f64::INFINITY;
        let mut seen = HashSet::new();
        while let Some(p) = e.peek() {
            let set = e.next_set().unwrap();
            let actual = scores.cluster_log_likelihood(0, &set);
            assert!((actual - p).abs() < 1e-9);
            assert!(p <= prev + 1e-12, "{} after {}", p, prev);
            prev = p;
            assert!(seen.insert(set));
        }
        assert_eq!(seen.len(), 32);
    }

    #[test]
    fn test_matches_brute_force() {
        for salt in 0..40 {
            let k = 1 + (salt as usize % 4);
            let l = 1 + (salt as usize % 6);
            let scores = scattered_scores(k, l, salt);
            for allow_empty in [true, false] {
                let result = search_best(&scores, allow_empty, usize::MAX);
                assert!(!result.truncated);
                let (set, score) = result.best.unwrap();
                let (_, expected) = brute_force(&scores, allow_empty);
                assert!(
                    (score - expected).abs() < 1e-12,
                    "salt {} allow_empty {}: {} vs {}",
                    salt,
                    allow_empty,
                    score,
                    expected
                );
                assert!(allow_empty || set.contains(&true));
            }
        }
    }

    #[test]
    fn test_cap_truncates() {
        let scores = toy_scores(0.5);
        let result = search_best(&scores, true, 1);
        assert_eq!(result.expanded, 1);
        assert!(result.best.is_some());
        let full = search_best(&scores, true, usize::MAX);
        assert!(!full.truncated);
        assert!(full.best.unwrap().1 >= result.best.unwrap().1);
    }
}
