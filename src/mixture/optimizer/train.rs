//! One-call training entry point.

use numr::runtime::Runtime;
use numr::tensor::Tensor;

use super::em::CbmOptimizer;
use super::options::{CbmOptimizerOptions, OptimizeReport};
use crate::common::CbmClient;
use crate::dataset::MultiLabelDataset;
use crate::diagnostics::DiagnosticsSink;
use crate::error::CbmResult;
use crate::mixture::model::CbmModel;

/// Train a `K`-cluster model on `dataset`.
///
/// The model uses `options.learner`. Cells start from the label frequencies,
/// responsibilities from the best Bernoulli mixture over the label sets, then
/// EM runs to `options.max_iter` or convergence.
pub fn train_cbm<R, C>(
    client: &C,
    dataset: &MultiLabelDataset<R>,
    num_clusters: usize,
    options: CbmOptimizerOptions,
    sink: &dyn DiagnosticsSink,
) -> CbmResult<(CbmModel<R>, OptimizeReport)>
where
    R: Runtime,
    C: CbmClient<R> + Sync,
    Tensor<R>: Send + Sync,
{
    let device = dataset.features().device();
    let model = CbmModel::with_label_priors(
        num_clusters,
        dataset.num_features(),
        &dataset.label_frequencies(),
        device,
    )?
    .with_learner(options.learner.clone(), device);
    let mut optimizer = CbmOptimizer::new(client, model, dataset, options, sink)?;
    optimizer.initialize_from_label_mixture()?;
    let report = optimizer.optimize()?;
    Ok((optimizer.into_model(), report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{BoostOptions, LearnerKind};
    use crate::dataset::MultiLabel;
    use crate::diagnostics::NullSink;
    use crate::error::CbmError;
    use crate::mixture::predict::{MixturePredictor, PredictMode, PredictOptions};
    use crate::mixture::traits::bernoulli::BernoulliMixtureOptions;
    use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};

    fn small_dataset(device: &CpuDevice) -> MultiLabelDataset<CpuRuntime> {
        let labels = vec![
            MultiLabel::new(vec![0, 1]),
            MultiLabel::new(vec![2]),
            MultiLabel::new(vec![0]),
        ];
        MultiLabelDataset::from_rows(&[1.0, 0.0, 0.0, 1.0, 0.7, 0.2], 2, labels, 3, device)
            .unwrap()
    }

    fn options(learner: LearnerKind) -> CbmOptimizerOptions {
        CbmOptimizerOptions {
            max_iter: 4,
            learner,
            bernoulli: BernoulliMixtureOptions {
                n_runs: 2,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_more_clusters_than_instances() {
        let device = CpuDevice::new();
        let client = CpuClient::new(device.clone());
        let ds = small_dataset(&device);
        let (model, report) =
            train_cbm(&client, &ds, 5, options(LearnerKind::Logistic), &NullSink).unwrap();
        assert_eq!(model.num_clusters(), 5);
        assert!(report.log_likelihoods.iter().all(|v| v.is_finite()));

        let predictor =
            MixturePredictor::new(&client, &model, PredictOptions::default(), &NullSink).unwrap();
        let labels = predictor.predict(ds.features()).unwrap();
        assert!(labels.iter().all(|l| !l.is_empty()));
    }

    #[test]
    fn test_boosted_learner_from_options() {
        let device = CpuDevice::new();
        let client = CpuClient::new(device.clone());
        let ds = small_dataset(&device);
        let boosted = LearnerKind::Boosted(BoostOptions::default());
        let (model, report) =
            train_cbm(&client, &ds, 2, options(boosted.clone()), &NullSink).unwrap();
        assert_eq!(model.learner(), boosted);
        assert!(model.cells().iter().all(|c| c.is_fitted()));
        assert!(report.iterations >= 1);

        let dynamic = PredictOptions {
            mode: PredictMode::Dynamic,
            ..Default::default()
        };
        let predictor = MixturePredictor::new(&client, &model, dynamic, &NullSink).unwrap();
        for p in predictor.predict_with_posterior(ds.features()).unwrap() {
            assert!(!p.labels.is_empty() && p.log_posterior.is_finite());
        }

        let bad = LearnerKind::Boosted(BoostOptions {
            max_depth: 0,
            ..BoostOptions::default()
        });
        let err = train_cbm(&client, &ds, 2, options(bad), &NullSink).unwrap_err();
        assert!(matches!(err, CbmError::InvalidParameter { parameter: "max_depth", .. }));
    }
}
