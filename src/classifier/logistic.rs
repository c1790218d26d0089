//! Elastic-net multinomial logistic regression fit by proximal gradient.

use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

use super::loss::validate_fit_inputs;
use super::prior::PriorProbClassifier;
use super::traits::{ComponentClassifier, FitOptions, FitReport};
use crate::common::CbmClient;
use crate::common::tensor::{
    dot, expand_cols, expand_rows, host_values, log_softmax_rows, soft_threshold, sum_all,
};
use crate::error::{CbmError, CbmResult};
use crate::validation::{validate_columns, validate_elastic_net};

/// First trial step of the line search, in units of `1/Lip`.
const INITIAL_STEP_SCALE: f64 = 4.0;
/// Upper bound on the step after successful iterations, in units of `1/Lip`.
const MAX_STEP_SCALE: f64 = 64.0;
/// Halvings tried before giving up on a descent step.
const MAX_BACKTRACK: usize = 30;

/// Multinomial logistic regression with weights `[F, C]` and bias `[C]`.
///
/// Binary classifiers use two classes, class 1 being "label present".
#[derive(Debug, Clone)]
pub struct LogisticRegression<R: Runtime> {
    weights: Tensor<R>,
    bias: Tensor<R>,
}

impl<R: Runtime> LogisticRegression<R> {
    /// All-zero parameters (uniform predictions).
    pub fn new(num_features: usize, num_classes: usize, device: &R::Device) -> Self {
        Self {
            weights: Tensor::<R>::zeros(&[num_features, num_classes], DType::F64, device),
            bias: Tensor::<R>::zeros(&[num_classes], DType::F64, device),
        }
    }

    /// Zero weights with the bias set to the log of a prior distribution.
    pub fn with_prior(
        num_features: usize,
        prior: &PriorProbClassifier,
        device: &R::Device,
    ) -> Self {
        let log_prior: Vec<f64> = prior.probs().iter().map(|p| p.ln()).collect();
        Self {
            weights: Tensor::<R>::zeros(&[num_features, log_prior.len()], DType::F64, device),
            bias: Tensor::<R>::from_slice(&log_prior, &[log_prior.len()], device),
        }
    }

    /// Rebuild from row-major host parameters.
    pub fn from_parts(
        weights: &[f64],
        bias: &[f64],
        num_features: usize,
        device: &R::Device,
    ) -> CbmResult<Self> {
        let num_classes = bias.len();
        if num_classes == 0 {
            return Err(CbmError::InvalidParameter {
                parameter: "bias",
                message: "at least one class is required".to_string(),
            });
        }
        if weights.len() != num_features * num_classes {
            return Err(CbmError::DimensionMismatch {
                op: "LogisticRegression::from_parts",
                what: "weight count",
                expected: num_features * num_classes,
                got: weights.len(),
            });
        }
        Ok(Self {
            weights: Tensor::<R>::from_slice(weights, &[num_features, num_classes], device),
            bias: Tensor::<R>::from_slice(bias, &[num_classes], device),
        })
    }

    pub fn num_features(&self) -> usize {
        self.weights.shape()[0]
    }

    /// Weights `[F, C]`.
    pub fn weights(&self) -> &Tensor<R> {
        &self.weights
    }

    /// Bias `[C]`.
    pub fn bias(&self) -> &Tensor<R> {
        &self.bias
    }

    /// Row-major copy of the weights.
    pub fn weights_vec(&self) -> Vec<f64> {
        host_values(&self.weights)
    }

    pub fn bias_vec(&self) -> Vec<f64> {
        host_values(&self.bias)
    }

    /// Unnormalized scores `X W + b`, `[n, C]`.
    pub fn logits<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
    ) -> CbmResult<Tensor<R>> {
        validate_columns(
            features,
            self.num_features(),
            "LogisticRegression::logits",
            "feature count",
        )?;
        linear_scores(client, features, &self.weights, &self.bias)
    }
}

fn linear_scores<R, C>(
    client: &C,
    features: &Tensor<R>,
    weights: &Tensor<R>,
    bias: &Tensor<R>,
) -> CbmResult<Tensor<R>>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let n = features.shape()[0];
    let xw = client.matmul(features, weights)?;
    Ok(client.add(&xw, &expand_cols(bias, n)?)?)
}

/// Weighted, regularized multinomial log loss for fixed data.
struct Problem<'a, R: Runtime> {
    features: &'a Tensor<R>,
    targets: &'a Tensor<R>,
    /// `w_i / n`, `[n]`.
    scaled_weights: Tensor<R>,
    /// `w_i / n` repeated over classes, `[n, C]`.
    scaled_weights_wide: Tensor<R>,
    /// Row sums of the targets, `[n, 1]`.
    target_mass: Tensor<R>,
    l1: f64,
    l2: f64,
}

impl<'a, R: Runtime> Problem<'a, R> {
    fn new<C: CbmClient<R>>(
        client: &C,
        features: &'a Tensor<R>,
        targets: &'a Tensor<R>,
        weights: &Tensor<R>,
        options: &FitOptions,
    ) -> CbmResult<Self> {
        let n = features.shape()[0];
        let c = targets.shape()[1];
        let scaled_weights = client.div_scalar(weights, n as f64)?;
        let scaled_weights_wide = expand_rows(&scaled_weights, c)?.contiguous();
        let target_mass = client.sum(targets, &[1], true)?;
        Ok(Self {
            features,
            targets,
            scaled_weights,
            scaled_weights_wide,
            target_mass,
            l1: options.regularization * options.l1_ratio,
            l2: options.regularization * (1.0 - options.l1_ratio),
        })
    }

    fn objective<C: CbmClient<R>>(
        &self,
        client: &C,
        w: &Tensor<R>,
        b: &Tensor<R>,
    ) -> CbmResult<f64> {
        let logp = log_softmax_rows(client, &linear_scores(client, self.features, w, b)?)?;
        let weighted = client.mul(&client.mul(self.targets, &logp)?, &self.scaled_weights_wide)?;
        let mut obj = -sum_all(client, &weighted)?;
        if self.l2 > 0.0 {
            obj += 0.5 * self.l2 * dot(client, w, w)?;
        }
        if self.l1 > 0.0 {
            obj += self.l1 * sum_all(client, &client.abs(w)?)?;
        }
        Ok(obj)
    }

    /// Gradient of the smooth part with respect to `(W, b)`.
    fn gradient<C: CbmClient<R>>(
        &self,
        client: &C,
        w: &Tensor<R>,
        b: &Tensor<R>,
    ) -> CbmResult<(Tensor<R>, Tensor<R>)> {
        let n = self.features.shape()[0];
        let c = self.targets.shape()[1];
        let logp = log_softmax_rows(client, &linear_scores(client, self.features, w, b)?)?;
        let p = client.exp(&logp)?;
        let residual = client.sub(
            &client.mul(&p, &self.target_mass.broadcast_to(&[n, c])?)?,
            self.targets,
        )?;
        let g = client.mul(&residual, &self.scaled_weights_wide)?; // [n, C]
        let mut gw = client.matmul(&self.features.transpose(0, 1)?, &g)?; // [F, C]
        if self.l2 > 0.0 {
            gw = client.add(&gw, &client.mul_scalar(w, self.l2)?)?;
        }
        let gb = client.sum(&g, &[0], false)?;
        Ok((gw, gb))
    }

    /// Lipschitz bound `0.5 * sum_i (w_i/n) m_i (|x_i|^2 + 1) + l2` of the smooth gradient.
    fn lipschitz<C: CbmClient<R>>(&self, client: &C) -> CbmResult<f64> {
        let n = self.features.shape()[0];
        let sq = client.sum(&client.mul(self.features, self.features)?, &[1], false)?;
        let sq = client.add_scalar(&sq, 1.0)?;
        let mass = self.target_mass.reshape(&[n])?;
        let per_row = client.mul(&self.scaled_weights, &mass)?;
        Ok(0.5 * dot(client, &per_row, &sq)? + self.l2)
    }
}

/// Coordinates that are nonzero or violate the L1 optimality condition.
fn active_mask<R, C>(client: &C, w: &Tensor<R>, gw: &Tensor<R>, l1: f64) -> CbmResult<Tensor<R>>
where
    R: Runtime,
    C: CbmClient<R>,
{
    let shape = w.shape();
    let zero = Tensor::<R>::zeros(shape, DType::F64, w.device());
    let one = Tensor::<R>::ones(shape, DType::F64, w.device());
    let threshold = Tensor::<R>::full_scalar(shape, DType::F64, l1, w.device());
    let nonzero = client.gt(&client.abs(w)?, &zero)?;
    let violating = client.gt(&client.abs(gw)?, &threshold)?;
    let nonzero = client.where_cond(&nonzero, &one, &zero)?;
    let violating = client.where_cond(&violating, &one, &zero)?;
    Ok(client.maximum(&nonzero, &violating)?)
}

impl<R: Runtime> ComponentClassifier<R> for LogisticRegression<R> {
    fn num_classes(&self) -> usize {
        self.bias.shape()[0]
    }

    fn predict_log_class_probs<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
    ) -> CbmResult<Tensor<R>> {
        let logits = self.logits(client, features)?;
        Ok(log_softmax_rows(client, &logits)?)
    }

    fn fit<C: CbmClient<R>>(
        &mut self,
        client: &C,
        features: &Tensor<R>,
        targets: &Tensor<R>,
        weights: &Tensor<R>,
        options: &FitOptions,
    ) -> CbmResult<FitReport> {
        validate_fit_inputs(
            features,
            targets,
            weights,
            Some(self.num_features()),
            self.num_classes(),
            "LogisticRegression::fit",
        )?;
        validate_elastic_net(options.regularization, options.l1_ratio)?;

        let problem = Problem::new(client, features, targets, weights, options)?;
        let mut w = self.weights.clone();
        let mut b = self.bias.clone();
        let mut obj = problem.objective(client, &w, &b)?;
        if !obj.is_finite() {
            return Err(CbmError::numerical(
                "LogisticRegression::fit",
                format!("initial objective is {obj}"),
            ));
        }
        let before = obj;

        let lip = problem.lipschitz(client)?;
        if !lip.is_finite() {
            return Err(CbmError::numerical(
                "LogisticRegression::fit",
                format!("step bound is {lip}"),
            ));
        }
        if lip <= 0.0 {
            return Ok(FitReport::unchanged(obj));
        }

        let mut scale = if options.line_search {
            INITIAL_STEP_SCALE
        } else {
            1.0
        };
        let tries = if options.line_search { MAX_BACKTRACK } else { 1 };
        let mut mask: Option<Tensor<R>> = None;
        let mut iterations = 0;
        let mut converged = false;

        for iter in 0..options.max_iter {
            let (mut gw, gb) = problem.gradient(client, &w, &b)?;
            if options.active_set {
                if iter == 0 {
                    mask = Some(active_mask(client, &w, &gw, problem.l1)?);
                }
                if let Some(m) = &mask {
                    gw = client.mul(&gw, m)?;
                }
            }

            let mut accepted = None;
            for _ in 0..tries {
                let eta = scale / lip;
                let w_next = soft_threshold(
                    client,
                    &client.sub(&w, &client.mul_scalar(&gw, eta)?)?,
                    eta * problem.l1,
                )?;
                let b_next = client.sub(&b, &client.mul_scalar(&gb, eta)?)?;
                let obj_next = problem.objective(client, &w_next, &b_next)?;
                if obj_next.is_finite() && obj_next <= obj {
                    accepted = Some((w_next, b_next, obj_next));
                    break;
                }
                scale *= 0.5;
            }

            // no descent step left: already at the minimum up to rounding
            let Some((w_next, b_next, obj_next)) = accepted else {
                converged = true;
                break;
            };
            let change = (obj - obj_next) / obj.abs().max(1.0);
            w = w_next;
            b = b_next;
            obj = obj_next;
            iterations += 1;
            if options.line_search {
                scale = (scale * 2.0).min(MAX_STEP_SCALE);
            }
            if change < options.tol {
                converged = true;
                break;
            }
        }

        self.weights = w;
        self.bias = b;
        Ok(FitReport {
            iterations,
            objective_before: before,
            objective_after: obj,
            converged,
        })
    }

    fn objective<C: CbmClient<R>>(
        &self,
        client: &C,
        features: &Tensor<R>,
        targets: &Tensor<R>,
        weights: &Tensor<R>,
        options: &FitOptions,
    ) -> CbmResult<f64> {
        validate_fit_inputs(
            features,
            targets,
            weights,
            Some(self.num_features()),
            self.num_classes(),
            "LogisticRegression::objective",
        )?;
        validate_elastic_net(options.regularization, options.l1_ratio)?;
        let problem = Problem::new(client, features, targets, weights, options)?;
        problem.objective(client, &self.weights, &self.bias)
    }
}
