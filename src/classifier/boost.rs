//! Multiclass gradient-boosted regression trees (LK-TreeBoost).
//!
//! Each round fits one small regression tree per class to the weighted
//! residuals `t_ic - m_i p_ic` of the softmax loss, with Newton leaf values
//! `(C - 1) / C * sum(w r) / (sum(w m p (1 - p)) + lambda)` scaled by the
//! shrinkage. Trees are evaluated on host copies of the features.

use numr::runtime::Runtime;
use numr::tensor::Tensor;
use serde::{Deserialize, Serialize};

use super::loss::validate_fit_inputs;
use super::prior::PriorProbClassifier;
use super::traits::{ComponentClassifier, FitOptions, FitReport};
use crate::common::CbmClient;
use crate::common::tensor::host_values;
use crate::error::{CbmError, CbmResult};
use crate::validation::{validate_columns, validate_elastic_net};

/// Minimum gain for a split to be kept.
const MIN_SPLIT_GAIN: f64 = 1e-12;
/// Hessian mass below which a leaf predicts zero.
const MIN_LEAF_HESSIAN: f64 = 1e-12;

/// Tree-growing options of [`BoostedClassifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostOptions {
    /// Learning rate applied to every leaf, in `(0, 1]`.
    pub shrinkage: f64,
    /// Maximum depth of each tree; depth 1 is a stump.
    pub max_depth: usize,
    /// Minimum scaled example weight on each side of a split.
    pub min_leaf_weight: f64,
}

impl Default for BoostOptions {
    fn default() -> Self {
        Self {
            shrinkage: 0.1,
            max_depth: 2,
            min_leaf_weight: 1e-6,
        }
    }
}

impl BoostOptions {
    pub(crate) fn validate(&self) -> CbmResult<()> {
        if !(self.shrinkage > 0.0 && self.shrinkage <= 1.0) {
            return Err(CbmError::InvalidParameter {
                parameter: "shrinkage",
                message: format!("must lie in (0, 1], got {}", self.shrinkage),
            });
        }
        if self.max_depth == 0 {
            return Err(CbmError::InvalidParameter {
                parameter: "max_depth",
                message: "must be >= 1".to_string(),
            });
        }
        if !self.min_leaf_weight.is_finite() || self.min_leaf_weight < 0.0 {
            return Err(CbmError::InvalidParameter {
                parameter: "min_leaf_weight",
                message: format!("must be finite and >= 0, got {}", self.min_leaf_weight),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Regression tree with the root at node 0. Children always follow their
/// parent, so evaluation terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut i = 0;
        loop {
            match self.nodes[i] {
                Node::Leaf(value) => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => i = if row[feature] <= threshold { left } else { right },
            }
        }
    }

    fn check(&self, num_features: usize) -> CbmResult<()> {
        if self.nodes.is_empty() {
            return Err(CbmError::Format("empty regression tree".to_string()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            let ok = match *node {
                Node::Leaf(value) => value.is_finite(),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    feature < num_features
                        && !threshold.is_nan()
                        && left > i
                        && right > i
                        && left < self.nodes.len()
                        && right < self.nodes.len()
                }
            };
            if !ok {
                return Err(CbmError::Format(format!("malformed tree node {i}: {node:?}")));
            }
        }
        Ok(())
    }
}

/// Per-class statistics of one boosting round.
struct TreeBuilder<'a> {
    x: &'a [f64],
    num_features: usize,
    /// `w_i r_ic`
    grad: &'a [f64],
    /// `w_i m_i p_ic (1 - p_ic)`
    hess: &'a [f64],
    /// `w_i`
    weight: &'a [f64],
    options: &'a BoostOptions,
    lambda: f64,
    /// `shrinkage * (C - 1) / C`
    leaf_scale: f64,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn value(&self, row: usize, feature: usize) -> f64 {
        self.x[row * self.num_features + feature]
    }

    fn build(mut self, rows: Vec<usize>) -> RegressionTree {
        self.grow(rows, 0);
        RegressionTree { nodes: self.nodes }
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf(0.0));
        if depth < self.options.max_depth {
            if let Some((feature, threshold)) = self.best_split(&rows) {
                let (lo, hi): (Vec<usize>, Vec<usize>) = rows
                    .into_iter()
                    .partition(|&i| self.value(i, feature) <= threshold);
                let left = self.grow(lo, depth + 1);
                let right = self.grow(hi, depth + 1);
                self.nodes[idx] = Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                };
                return idx;
            }
        }
        self.nodes[idx] = Node::Leaf(self.leaf_value(&rows));
        idx
    }

    fn leaf_value(&self, rows: &[usize]) -> f64 {
        let g: f64 = rows.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = rows.iter().map(|&i| self.hess[i]).sum::<f64>() + self.lambda;
        if h < MIN_LEAF_HESSIAN {
            return 0.0;
        }
        self.leaf_scale * g / h
    }

    /// Weighted squared-error split with the largest gain, first one on ties.
    fn best_split(&self, rows: &[usize]) -> Option<(usize, f64)> {
        if rows.len() < 2 {
            return None;
        }
        let total_g: f64 = rows.iter().map(|&i| self.grad[i]).sum();
        let total_w: f64 = rows.iter().map(|&i| self.weight[i]).sum();
        if total_w <= 0.0 {
            return None;
        }
        let parent = total_g * total_g / total_w;
        let min_side = self.options.min_leaf_weight;

        let mut best: Option<(f64, usize, f64)> = None;
        let mut order = rows.to_vec();
        for feature in 0..self.num_features {
            order.sort_by(|&a, &b| self.value(a, feature).total_cmp(&self.value(b, feature)));
            let (mut gl, mut wl) = (0.0, 0.0);
            for pair in order.windows(2) {
                let (i, next) = (pair[0], pair[1]);
                gl += self.grad[i];
                wl += self.weight[i];
                let (v, v_next) = (self.value(i, feature), self.value(next, feature));
                if v == v_next {
                    continue;
                }
                let wr = total_w - wl;
                if wl <= 0.0 || wr <= 0.0 || wl < min_side || wr < min_side {
                    continue;
                }
                let gr = total_g - gl;
                let gain = gl * gl / wl + gr * gr / wr - parent;
                if gain > MIN_SPLIT_GAIN && best.is_none_or(|(g, _, _)| gain > g) {
                    best = Some((gain, feature, 0.5 * (v + v_next)));
                }
            }
        }
        best.map(|(_, feature, threshold)| (feature, threshold))
    }
}

/// Gradient-boosted trees over `C` classes.
///
/// Fitting appends rounds to the existing ensemble, so repeated fits keep
/// refining the same scores. `FitOptions::max_iter` is the number of rounds,
/// `regularization` the L2 penalty on leaf values and `tol` the relative
/// objective change that stops boosting; the elastic-net and line-search
/// fields do not apply. The objective is the weighted cross-entropy alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedClassifier {
    num_features: usize,
    options: BoostOptions,
    /// Initial class scores `[C]`.
    base: Vec<f64>,
    /// `rounds[m][c]` is the tree of class `c` in round `m`.
    rounds: Vec<Vec<RegressionTree>>,
}

impl BoostedClassifier {
    /// Empty ensemble with uniform predictions.
    pub fn new(num_features: usize, num_classes: usize, options: BoostOptions) -> Self {
        Self {
            num_features,
            options,
            base: vec![0.0; num_classes],
            rounds: Vec::new(),
        }
    }

    /// Empty ensemble starting from the log of a prior distribution.
    pub fn with_prior(
        num_features: usize,
        prior: &PriorProbClassifier,
        options: BoostOptions,
    ) -> Self {
        Self {
            num_features,
            options,
            base: prior.probs().iter().map(|p| p.ln()).collect(),
            rounds: Vec::new(),
        }
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Accepted boosting rounds.
    pub fn num_rounds(&self) -> usize {
        self.rounds.len()
    }

    pub fn options(&self) -> &BoostOptions {
        &self.options
    }

    /// Structural check of a decoded ensemble.
    pub(crate) fn check(&self) -> CbmResult<()> {
        let c = self.base.len();
        if c == 0 || self.base.iter().any(|b| !b.is_finite()) {
            return Err(CbmError::Format(format!("bad base scores {:?}", self.base)));
        }
        self.options
            .validate()
            .map_err(|e| CbmError::Format(e.to_string()))?;
        for (m, round) in self.rounds.iter().enumerate() {
            if round.len() != c {
                return Err(CbmError::Format(format!(
                    "round {m} holds {} trees, expected {c}",
                    round.len()
                )));
            }
            for tree in round {
                tree.check(self.num_features)?;
            }
        }
        Ok(())
    }

    /// Raw class scores `[n * C]` for row-major features.
    fn scores(&self, x: &[f64]) -> Vec<f64> {
        let c = self.base.len();
        let mut out = Vec::with_capacity(x.len() / self.num_features * c);
        for row in x.chunks(self.num_features) {
            for (class, base) in self.base.iter().enumerate() {
                let boost: f64 = self.rounds.iter().map(|r| r[class].predict(row)).sum();
                out.push(base + boost);
            }
        }
        out
    }

    fn num_classes_host(&self) -> usize {
        self.base.len()
    }
}

/// Row-wise log-softmax of `[n * C]` scores.
fn log_softmax(scores: &[f64], c: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(scores.len());
    for row in scores.chunks(c) {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let lse = max + row.iter().map(|s| (s - max).exp()).sum::<f64>().ln();
        out.extend(row.iter().map(|s| s - lse));
    }
    out
}

/// `-(sum_i w_i sum_c t_ic log p_ic)` with `w` already divided by `n`.
fn cross_entropy(scores: &[f64], targets: &[f64], weights: &[f64], c: usize) -> f64 {
    let logp = log_softmax(scores, c);
    let mut total = 0.0;
    for (i, w) in weights.iter().enumerate() {
        for j in 0..c {
            let t = targets[i * c + j];
            if t != 0.0 {
                total -= w * t * logp[i * c + j];
            }
        }
    }
    total
}

impl<R: Runtime> ComponentClassifier<R> for BoostedClassifier {
    fn num_classes(&self) -> usize {
        self.num_classes_host()
    }

    fn predict_log_class_probs<C: CbmClient<R>>(
        &self,
        _client: &C,
        features: &Tensor<R>,
    ) -> CbmResult<Tensor<R>> {
        let n = validate_columns(
            features,
            self.num_features,
            "BoostedClassifier::predict",
            "feature count",
        )?;
        let c = self.num_classes_host();
        let logp = log_softmax(&self.scores(&host_values(features)), c);
        Ok(Tensor::<R>::from_slice(&logp, &[n, c], features.device()))
    }

    fn fit<C: CbmClient<R>>(
        &mut self,
        _client: &C,
        features: &Tensor<R>,
        targets: &Tensor<R>,
        weights: &Tensor<R>,
        options: &FitOptions,
    ) -> CbmResult<FitReport> {
        let c = self.num_classes_host();
        let n = validate_fit_inputs(
            features,
            targets,
            weights,
            Some(self.num_features),
            c,
            "BoostedClassifier::fit",
        )?;
        validate_elastic_net(options.regularization, options.l1_ratio)?;
        self.options.validate()?;

        let x = host_values(features);
        let t = host_values(targets);
        let w: Vec<f64> = host_values(weights).iter().map(|w| w / n as f64).collect();
        let mut scores = self.scores(&x);
        let mut objective = cross_entropy(&scores, &t, &w, c);
        if !objective.is_finite() {
            return Err(CbmError::numerical(
                "BoostedClassifier::fit",
                format!("initial objective is {objective}"),
            ));
        }
        let before = objective;
        if w.iter().sum::<f64>() <= 0.0 {
            return Ok(FitReport::unchanged(before));
        }

        let mass: Vec<f64> = t.chunks(c).map(|row| row.iter().sum()).collect();
        let leaf_scale = if c > 1 {
            self.options.shrinkage * (c - 1) as f64 / c as f64
        } else {
            self.options.shrinkage
        };
        let mut accepted = Vec::new();
        let mut converged = false;
        for _ in 0..options.max_iter {
            let logp = log_softmax(&scores, c);
            let mut next = scores.clone();
            let mut trees = Vec::with_capacity(c);
            for class in 0..c {
                let mut grad = Vec::with_capacity(n);
                let mut hess = Vec::with_capacity(n);
                for i in 0..n {
                    let p = logp[i * c + class].exp();
                    grad.push(w[i] * (t[i * c + class] - mass[i] * p));
                    hess.push(w[i] * mass[i] * p * (1.0 - p));
                }
                let tree = TreeBuilder {
                    x: &x,
                    num_features: self.num_features,
                    grad: &grad,
                    hess: &hess,
                    weight: &w,
                    options: &self.options,
                    lambda: options.regularization,
                    leaf_scale,
                    nodes: Vec::new(),
                }
                .build((0..n).collect());
                for (i, row) in x.chunks(self.num_features).enumerate() {
                    next[i * c + class] += tree.predict(row);
                }
                trees.push(tree);
            }

            let candidate = cross_entropy(&next, &t, &w, c);
            if !candidate.is_finite() || candidate > objective {
                converged = true;
                break;
            }
            let change = (objective - candidate) / objective.abs().max(1.0);
            scores = next;
            objective = candidate;
            accepted.push(trees);
            if change < options.tol {
                converged = true;
                break;
            }
        }

        let iterations = accepted.len();
        self.rounds.extend(accepted);
        Ok(FitReport {
            iterations,
            objective_before: before,
            objective_after: objective,
            converged,
        })
    }

    fn objective<C: CbmClient<R>>(
        &self,
        _client: &C,
        features: &Tensor<R>,
        targets: &Tensor<R>,
        weights: &Tensor<R>,
        _options: &FitOptions,
    ) -> CbmResult<f64> {
        let c = self.num_classes_host();
        let n = validate_fit_inputs(
            features,
            targets,
            weights,
            Some(self.num_features),
            c,
            "BoostedClassifier::objective",
        )?;
        let w: Vec<f64> = host_values(weights).iter().map(|w| w / n as f64).collect();
        let scores = self.scores(&host_values(features));
        Ok(cross_entropy(&scores, &host_values(targets), &w, c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};

    fn setup() -> (CpuClient, CpuDevice) {
        let device = CpuDevice::new();
        let client = CpuClient::new(device.clone());
        (client, device)
    }

    fn boost_fit(rounds: usize) -> FitOptions {
        FitOptions {
            regularization: 0.0,
            max_iter: rounds,
            tol: 0.0,
            ..FitOptions::default()
        }
    }

    #[test]
    fn test_separates_binary_threshold() {
        let (client, device) = setup();
        let xs = [-2.0, -1.5, -1.0, -0.5, 0.5, 1.0, 1.5, 2.0];
        let x = Tensor::<CpuRuntime>::from_slice(&xs, &[8, 1], &device);
        let mut t = Vec::new();
        for v in xs {
            t.extend_from_slice(if v < 0.0 { &[1.0, 0.0] } else { &[0.0, 1.0] });
        }
        let targets = Tensor::<CpuRuntime>::from_slice(&t, &[8, 2], &device);
        let w = Tensor::<CpuRuntime>::ones(&[8], numr::dtype::DType::F64, &device);

        let options = BoostOptions {
            shrinkage: 0.5,
            ..BoostOptions::default()
        };
        let mut model = BoostedClassifier::new(1, 2, options);
        let report = model.fit(&client, &x, &targets, &w, &boost_fit(30)).unwrap();
        assert!(report.iterations > 0);
        assert!(report.objective_after < report.objective_before);
        assert_eq!(model.num_rounds(), report.iterations);

        let p: Vec<f64> = model.predict_class_probs(&client, &x).unwrap().to_vec();
        for (i, v) in xs.iter().enumerate() {
            let correct = if *v < 0.0 { p[2 * i] } else { p[2 * i + 1] };
            assert!(correct > 0.8, "row {i}: {correct}");
        }
        let obj = model.objective(&client, &x, &targets, &w, &boost_fit(0)).unwrap();
        assert!((obj - report.objective_after).abs() < 1e-12);
    }

    #[test]
    fn test_multiclass_intervals() {
        let (client, device) = setup();
        let xs = [0.0, 0.1, 0.2, 1.0, 1.1, 1.2, 2.0, 2.1, 2.2];
        let x = Tensor::<CpuRuntime>::from_slice(&xs, &[9, 1], &device);
        let mut t = vec![0.0; 27];
        for i in 0..9 {
            t[i * 3 + i / 3] = 1.0;
        }
        let targets = Tensor::<CpuRuntime>::from_slice(&t, &[9, 3], &device);
        let w = Tensor::<CpuRuntime>::ones(&[9], numr::dtype::DType::F64, &device);

        let mut model = BoostedClassifier::new(1, 3, BoostOptions::default());
        model.fit(&client, &x, &targets, &w, &boost_fit(60)).unwrap();
        let p: Vec<f64> = model.predict_class_probs(&client, &x).unwrap().to_vec();
        for (i, row) in p.chunks(3).enumerate() {
            let argmax = (0..3).fold(0, |b, j| if row[j] > row[b] { j } else { b });
            assert_eq!(argmax, i / 3, "row {i}: {row:?}");
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_repeated_fits_never_increase_objective() {
        let (client, device) = setup();
        let x = Tensor::<CpuRuntime>::from_slice(&[0.0, 1.0, 2.0, 3.0, 4.0], &[5, 1], &device);
        // soft, non-separable targets
        #[rustfmt::skip]
        let t = [
            0.9, 0.1,
            0.3, 0.7,
            0.8, 0.2,
            0.4, 0.6,
            0.5, 0.5,
        ];
        let targets = Tensor::<CpuRuntime>::from_slice(&t, &[5, 2], &device);
        let w = Tensor::<CpuRuntime>::from_slice(&[1.0, 2.0, 0.5, 1.0, 0.0], &[5], &device);

        let prior = PriorProbClassifier::binary(0.4).unwrap();
        let mut model = BoostedClassifier::with_prior(1, &prior, BoostOptions::default());
        let opts = FitOptions {
            regularization: 0.1,
            max_iter: 3,
            ..FitOptions::default()
        };
        let mut last = model.objective(&client, &x, &targets, &w, &opts).unwrap();
        for _ in 0..5 {
            let report = model.fit(&client, &x, &targets, &w, &opts).unwrap();
            assert!((report.objective_before - last).abs() < 1e-12);
            assert!(report.objective_after <= report.objective_before);
            last = report.objective_after;
        }
    }

    #[test]
    fn test_prior_start_predicts_prior() {
        let (client, device) = setup();
        let prior = PriorProbClassifier::binary(0.8).unwrap();
        let model = BoostedClassifier::with_prior(2, &prior, BoostOptions::default());
        let x = Tensor::<CpuRuntime>::from_slice(&[1.0, -3.0], &[1, 2], &device);
        let p: Vec<f64> = model.predict_class_probs(&client, &x).unwrap().to_vec();
        assert!((p[1] - 0.8).abs() < 1e-12);
        let bad = Tensor::<CpuRuntime>::from_slice(&[1.0, -3.0, 0.0], &[1, 3], &device);
        assert!(model.predict_class_probs(&client, &bad).is_err());
    }

    #[test]
    fn test_non_finite_targets_keep_ensemble() {
        let (client, device) = setup();
        let x = Tensor::<CpuRuntime>::from_slice(&[0.0, 1.0], &[2, 1], &device);
        let bad = Tensor::<CpuRuntime>::from_slice(&[f64::NAN, 1.0, 1.0, 0.0], &[2, 2], &device);
        let w = Tensor::<CpuRuntime>::ones(&[2], numr::dtype::DType::F64, &device);
        let mut model = BoostedClassifier::new(1, 2, BoostOptions::default());
        let before = model.clone();
        let err = model.fit(&client, &x, &bad, &w, &boost_fit(5)).unwrap_err();
        assert!(matches!(err, CbmError::Numerical { .. }));
        assert_eq!(model, before);

        let options = BoostOptions {
            shrinkage: 0.0,
            ..BoostOptions::default()
        };
        let mut model = BoostedClassifier::new(1, 2, options);
        let good = Tensor::<CpuRuntime>::from_slice(&[0.0, 1.0, 1.0, 0.0], &[2, 2], &device);
        let err = model.fit(&client, &x, &good, &w, &boost_fit(5)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_check_rejects_malformed_trees() {
        let mut model = BoostedClassifier::new(1, 1, BoostOptions::default());
        assert!(model.check().is_ok());
        let cycle = RegressionTree {
            nodes: vec![Node::Split {
                feature: 0,
                threshold: 0.0,
                left: 0,
                right: 0,
            }],
        };
        model.rounds.push(vec![cycle]);
        assert!(matches!(model.check(), Err(CbmError::Format(_))));

        let mut model = BoostedClassifier::new(1, 1, BoostOptions::default());
        let wide = RegressionTree {
            nodes: vec![
                Node::Split {
                    feature: 3,
                    threshold: 0.0,
                    left: 1,
                    right: 2,
                },
                Node::Leaf(1.0),
                Node::Leaf(-1.0),
            ],
        };
        model.rounds.push(vec![wide]);
        assert!(model.check().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let (client, device) = setup();
        let x = Tensor::<CpuRuntime>::from_slice(&[0.0, 1.0, 2.0, 3.0], &[4, 1], &device);
        let t = Tensor::<CpuRuntime>::from_slice(
            &[1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0],
            &[4, 2],
            &device,
        );
        let w = Tensor::<CpuRuntime>::ones(&[4], numr::dtype::DType::F64, &device);
        let mut model = BoostedClassifier::new(1, 2, BoostOptions::default());
        model.fit(&client, &x, &t, &w, &boost_fit(4)).unwrap();

        let back: BoostedClassifier =
            bincode::deserialize(&bincode::serialize(&model).unwrap()).unwrap();
        assert_eq!(back, model);
        assert!(back.check().is_ok());
    }
}
