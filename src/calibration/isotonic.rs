//! Weighted isotonic regression (pool adjacent violators).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CbmError, CbmResult};

/// Non-decreasing step function fit to `(score, target)` pairs.
///
/// Each block of pooled points is represented by its weighted mean score
/// (the block location) and weighted mean target (the block value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicRegression {
    locations: Vec<f64>,
    values: Vec<f64>,
    weights: Vec<f64>,
    interpolate: bool,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    sum_wx: f64,
    sum_wy: f64,
    weight: f64,
}

impl Block {
    fn value(&self) -> f64 {
        self.sum_wy / self.weight
    }

    fn location(&self) -> f64 {
        self.sum_wx / self.weight
    }

    fn absorb(&mut self, other: Block) {
        self.sum_wx += other.sum_wx;
        self.sum_wy += other.sum_wy;
        self.weight += other.weight;
    }
}

impl IsotonicRegression {
    /// Fit with unit weights.
    pub fn fit(points: &[(f64, f64)], interpolate: bool) -> CbmResult<Self> {
        let weighted: Vec<(f64, f64, f64)> = points.iter().map(|&(x, y)| (x, y, 1.0)).collect();
        Self::fit_weighted(&weighted, interpolate)
    }

    /// Fit `(score, target, weight)` triples. Zero-weight points are ignored.
    ///
    /// With `interpolate`, predictions are linear between block locations;
    /// otherwise they are the value of the last block at or left of the score.
    pub fn fit_weighted(points: &[(f64, f64, f64)], interpolate: bool) -> CbmResult<Self> {
        if let Some(&(x, y, w)) = points
            .iter()
            .find(|(x, y, w)| !x.is_finite() || !y.is_finite() || !w.is_finite() || *w < 0.0)
        {
            return Err(CbmError::InvalidParameter {
                parameter: "points",
                message: format!(
                    "expected finite values and nonnegative weights, got ({x}, {y}, {w})"
                ),
            });
        }
        let mut sorted: Vec<(f64, f64, f64)> =
            points.iter().copied().filter(|&(_, _, w)| w > 0.0).collect();
        if sorted.is_empty() {
            return Err(CbmError::InvalidParameter {
                parameter: "points",
                message: "isotonic regression needs at least one positively weighted point"
                    .to_string(),
            });
        }
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut blocks: Vec<Block> = Vec::with_capacity(sorted.len());
        let mut last_x = f64::NAN;
        for (x, y, w) in sorted {
            let block = Block {
                sum_wx: w * x,
                sum_wy: w * y,
                weight: w,
            };
            // equal scores always share a block
            match blocks.last_mut() {
                Some(prev) if x == last_x => prev.absorb(block),
                _ => blocks.push(block),
            }
            last_x = x;
            while blocks.len() > 1 {
                let top = blocks[blocks.len() - 1];
                let below = blocks[blocks.len() - 2];
                if below.value() <= top.value() {
                    break;
                }
                blocks.pop();
                if let Some(prev) = blocks.last_mut() {
                    prev.absorb(top);
                }
            }
        }

        Ok(Self {
            locations: blocks.iter().map(Block::location).collect(),
            values: blocks.iter().map(Block::value).collect(),
            weights: blocks.iter().map(|b| b.weight).collect(),
            interpolate,
        })
    }

    /// Calibrated value at `score`; constant beyond the outer blocks.
    pub fn predict(&self, score: f64) -> f64 {
        if score.is_nan() {
            return f64::NAN;
        }
        let last = self.values.len() - 1;
        if score <= self.locations[0] {
            return self.values[0];
        }
        if score >= self.locations[last] {
            return self.values[last];
        }
        // locations[right - 1] <= score < locations[right]
        let right = self.locations.partition_point(|&l| l <= score);
        let left = right - 1;
        if !self.interpolate {
            return self.values[left];
        }
        let (x0, x1) = (self.locations[left], self.locations[right]);
        let (y0, y1) = (self.values[left], self.values[right]);
        y0 + (score - x0) / (x1 - x0) * (y1 - y0)
    }

    pub fn num_blocks(&self) -> usize {
        self.values.len()
    }

    pub fn locations(&self) -> &[f64] {
        &self.locations
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Total weight pooled into each block.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn interpolates(&self) -> bool {
        self.interpolate
    }
}

impl fmt::Display for IsotonicRegression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let blocks: Vec<String> = self
            .locations
            .iter()
            .zip(&self.values)
            .zip(&self.weights)
            .map(|((x, y), w)| format!("{x:.4} -> {y:.4} (w={w})"))
            .collect();
        write!(f, "IsotonicRegression[{}]", blocks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pools_violators() {
        let iso = IsotonicRegression::fit(&[(1.0, 1.0), (2.0, 0.0), (3.0, 1.0), (4.0, 1.0)], false)
            .unwrap();
        assert_eq!(iso.values(), &[0.5, 1.0, 1.0]);
        assert_eq!(iso.locations(), &[1.5, 3.0, 4.0]);
        assert_eq!(iso.weights(), &[2.0, 1.0, 1.0]);

        assert_eq!(iso.predict(0.0), 0.5);
        assert_eq!(iso.predict(2.0), 0.5);
        assert_eq!(iso.predict(3.5), 1.0);
        assert_eq!(iso.predict(10.0), 1.0);
        assert!(iso.predict(f64::NAN).is_nan());
    }

    #[test]
    fn test_interpolates_between_blocks() {
        let iso = IsotonicRegression::fit(&[(1.0, 1.0), (2.0, 0.0), (3.0, 1.0)], true).unwrap();
        // blocks: 0.5 at 1.5, 1.0 at 3.0
        assert!((iso.predict(2.25) - 0.75).abs() < 1e-12);
        assert_eq!(iso.predict(1.0), 0.5);
        assert_eq!(iso.predict(3.0), 1.0);
    }

    #[test]
    fn test_weights_and_ties() {
        let iso = IsotonicRegression::fit_weighted(&[(1.0, 1.0, 3.0), (2.0, 0.0, 1.0)], false)
            .unwrap();
        assert_eq!(iso.num_blocks(), 1);
        assert!((iso.values()[0] - 0.75).abs() < 1e-12);

        let tied = IsotonicRegression::fit(&[(0.5, 0.0), (0.5, 1.0), (0.2, 0.0)], false).unwrap();
        assert_eq!(tied.values(), &[0.0, 0.5]);

        let zero_weight =
            IsotonicRegression::fit_weighted(&[(1.0, 1.0, 1.0), (0.0, 1.0, 0.0)], false).unwrap();
        assert_eq!(zero_weight.num_blocks(), 1);
    }

    #[test]
    fn test_output_is_non_decreasing() {
        let points: Vec<(f64, f64)> = (0..50)
            .map(|i| {
                let x = ((i * 37) % 50) as f64 / 50.0;
                let y = if (i * 13) % 7 < 3 { 1.0 } else { 0.0 };
                (x, y)
            })
            .collect();
        for interpolate in [false, true] {
            let iso = IsotonicRegression::fit(&points, interpolate).unwrap();
            assert!(iso.values().windows(2).all(|w| w[0] <= w[1]));
            let mut prev = f64::NEG_INFINITY;
            for i in 0..=100 {
                let v = iso.predict(i as f64 / 100.0);
                assert!(v >= prev - 1e-12);
                prev = v;
            }
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(IsotonicRegression::fit(&[], false).is_err());
        assert!(IsotonicRegression::fit(&[(f64::NAN, 1.0)], false).is_err());
        assert!(IsotonicRegression::fit_weighted(&[(1.0, 1.0, -1.0)], false).is_err());
        assert!(IsotonicRegression::fit_weighted(&[(1.0, 1.0, 0.0)], false).is_err());
    }
}
