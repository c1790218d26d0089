//! CPU implementation of the Bernoulli mixture.

use crate::dataset::MultiLabel;
use crate::diagnostics::DiagnosticsSink;
use crate::error::CbmResult;
use crate::mixture::impl_generic::{
    bmm_fit_impl, bmm_predict_proba_impl, bmm_score_impl, bmm_select_all_impl, bmm_select_impl,
};
use crate::mixture::traits::bernoulli::{
    BernoulliMixtureAlgorithms, BernoulliMixtureFit, BernoulliMixtureModel,
    BernoulliMixtureOptions, BernoulliMixtureSelection,
};
use numr::runtime::cpu::{CpuClient, CpuRuntime};
use numr::tensor::Tensor;

impl BernoulliMixtureAlgorithms<CpuRuntime> for CpuClient {
    fn bmm_fit(
        &self,
        data: &Tensor<CpuRuntime>,
        options: &BernoulliMixtureOptions,
        run: u64,
        sink: &dyn DiagnosticsSink,
    ) -> CbmResult<BernoulliMixtureFit<CpuRuntime>> {
        bmm_fit_impl(self, data, options, run, sink)
    }

    fn bmm_select(
        &self,
        data: &Tensor<CpuRuntime>,
        options: &BernoulliMixtureOptions,
        sink: &dyn DiagnosticsSink,
    ) -> CbmResult<BernoulliMixtureSelection<CpuRuntime>> {
        bmm_select_impl(self, data, options, sink)
    }

    fn bmm_predict_proba(
        &self,
        model: &BernoulliMixtureModel<CpuRuntime>,
        data: &Tensor<CpuRuntime>,
    ) -> CbmResult<Tensor<CpuRuntime>> {
        bmm_predict_proba_impl(self, model, data)
    }

    fn bmm_score(
        &self,
        model: &BernoulliMixtureModel<CpuRuntime>,
        data: &Tensor<CpuRuntime>,
    ) -> CbmResult<Tensor<CpuRuntime>> {
        bmm_score_impl(self, model, data)
    }

    fn bmm_select_all(
        &self,
        multi_labels: &[MultiLabel],
        num_labels: usize,
        options: &BernoulliMixtureOptions,
        sink: &dyn DiagnosticsSink,
    ) -> CbmResult<(BernoulliMixtureModel<CpuRuntime>, Tensor<CpuRuntime>)> {
        bmm_select_all_impl(self, multi_labels, num_labels, options, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticEvent, MemorySink, NullSink};
    use numr::runtime::cpu::CpuDevice;

    fn setup() -> (CpuClient, CpuDevice) {
        let device = CpuDevice::new();
        let client = CpuClient::new(device.clone());
        (client, device)
    }

    /// Two label patterns: {0, 1} and {2, 3}.
    fn two_patterns(device: &CpuDevice) -> Tensor<CpuRuntime> {
        #[rustfmt::skip]
        let data = Tensor::<CpuRuntime>::from_slice(
            &[
                1.0, 1.0, 0.0, 0.0,
                1.0, 1.0, 0.0, 0.0,
                1.0, 0.0, 0.0, 0.0,
                1.0, 1.0, 0.0, 0.0,
                0.0, 0.0, 1.0, 1.0,
                0.0, 0.0, 1.0, 1.0,
                0.0, 0.0, 0.0, 1.0,
                0.0, 0.0, 1.0, 1.0,
            ],
            &[8, 4],
            device,
        );
        data
    }

    fn options(k: usize) -> BernoulliMixtureOptions {
        BernoulliMixtureOptions {
            n_components: k,
            n_runs: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_bmm_fit_shapes_and_normalization() {
        let (client, device) = setup();
        let data = two_patterns(&device);
        let fit = client.bmm_fit(&data, &options(2), 3, &NullSink).unwrap();

        assert_eq!(fit.model.mixing.shape(), &[2]);
        assert_eq!(fit.model.probs.shape(), &[2, 4]);
        assert_eq!(fit.gammas.shape(), &[8, 2]);
        assert_eq!(fit.run, 3);
        assert_eq!(fit.history.len(), fit.n_iter);
        assert_eq!(fit.history.last().copied(), Some(fit.objective));

        let g: Vec<f64> = fit.gammas.to_vec();
        for i in 0..8 {
            let s = g[i * 2] + g[i * 2 + 1];
            assert!((s - 1.0).abs() < 1e-10, "row {} sum = {}", i, s);
        }
        let mix: Vec<f64> = fit.model.mixing.to_vec();
        assert!((mix.iter().sum::<f64>() - 1.0).abs() < 1e-10);
        let p: Vec<f64> = fit.model.probs.to_vec();
        assert!(p.iter().all(|v| *v > 0.0 && *v < 1.0));
    }

    #[test]
    fn test_bmm_fit_is_deterministic_per_seed() {
        let (client, device) = setup();
        let data = two_patterns(&device);
        let a = client.bmm_fit(&data, &options(2), 7, &NullSink).unwrap();
        let b = client.bmm_fit(&data, &options(2), 7, &NullSink).unwrap();
        assert_eq!(a.objective, b.objective);
        assert_eq!(a.history, b.history);
    }

    #[test]
    fn test_bmm_select_returns_minimum() {
        let (client, device) = setup();
        let data = two_patterns(&device);
        let sink = MemorySink::new();
        let selection = client.bmm_select(&data, &options(2), &sink).unwrap();

        assert_eq!(selection.objectives.len(), 5);
        for obj in &selection.objectives {
            assert!(selection.best.objective <= *obj);
        }
        let first_min = selection
            .objectives
            .iter()
            .position(|o| *o == selection.best.objective)
            .unwrap();
        assert_eq!(selection.best.run, first_min as u64);
        assert_eq!(
            sink.count(|e| matches!(e, DiagnosticEvent::BernoulliRunFinished { .. })),
            5
        );
        assert_eq!(
            sink.count(|e| matches!(e, DiagnosticEvent::BernoulliRunSelected { .. })),
            1
        );
    }

    #[test]
    fn test_bmm_separates_label_patterns() {
        let (client, device) = setup();
        let data = two_patterns(&device);
        let selection = client.bmm_select(&data, &options(2), &NullSink).unwrap();
        let proba = client
            .bmm_predict_proba(&selection.best.model, &data)
            .unwrap();
        let p: Vec<f64> = proba.to_vec();
        let first = if p[0] > 0.5 { 0 } else { 1 };
        for i in 0..4 {
            assert!(p[i * 2 + first] > 0.9, "row {} = {:?}", i, &p[i * 2..i * 2 + 2]);
        }
        for i in 4..8 {
            assert!(p[i * 2 + first] < 0.1, "row {} = {:?}", i, &p[i * 2..i * 2 + 2]);
        }

        let scores = client.bmm_score(&selection.best.model, &data).unwrap();
        assert_eq!(scores.shape(), &[8]);
        let scores: Vec<f64> = scores.to_vec();
        let total: f64 = scores.iter().sum();
        assert!((total + selection.best.objective).abs() < 1e-8);
    }

    #[test]
    fn test_bmm_select_from_multi_labels() {
        let (client, _) = setup();
        let multi_labels = vec![
            MultiLabel::new(vec![0, 1]),
            MultiLabel::new(vec![0]),
            MultiLabel::new(vec![2]),
            MultiLabel::empty(),
        ];
        let opts = options(2);
        let (model, gammas) = client
            .bmm_select_all(&multi_labels, 3, &opts, &NullSink)
            .unwrap();
        assert_eq!(model.n_components(), 2);
        assert_eq!(model.n_labels(), 3);
        assert_eq!(gammas.shape(), &[4, 2]);

        let g2 = client
            .bmm_select_gammas(&multi_labels, 3, &opts, &NullSink)
            .unwrap();
        let (g1, g2): (Vec<f64>, Vec<f64>) = (gammas.to_vec(), g2.to_vec());
        assert_eq!(g1, g2);
        let m2 = client
            .bmm_select_model(&multi_labels, 3, &opts, &NullSink)
            .unwrap();
        let (p1, p2): (Vec<f64>, Vec<f64>) = (model.probs.to_vec(), m2.probs.to_vec());
        assert_eq!(p1, p2);
    }

    #[test]
    fn test_bmm_allows_more_components_than_rows() {
        let (client, device) = setup();
        let data = two_patterns(&device);
        let selection = client.bmm_select(&data, &options(9), &NullSink).unwrap();
        assert_eq!(selection.best.model.n_components(), 9);
        assert!(selection.best.objective.is_finite());

        let gammas: Vec<f64> = selection.best.gammas.to_vec();
        for row in gammas.chunks(9) {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-10);
        }
        let mixing: Vec<f64> = selection.best.model.mixing.to_vec();
        assert!(mixing.iter().all(|&m| m > 0.0));
    }

    #[test]
    fn test_bmm_rejects_zero_components() {
        let (client, device) = setup();
        let data = two_patterns(&device);
        let err = client
            .bmm_select(&data, &options(0), &NullSink)
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
