//! PCA: decomposition properties, methods and execution modes

mod common;

use algokit::algorithm::{
    Batch, Container, DistributedStep1Local, DistributedStep2Master, Online, Partial,
};
use algokit::error::ErrorKind;
use algokit::pca::{Pca, PcaInput, PcaParameter, PcaPartial, PcaResult};
use algokit::runtime::Method;
use algokit::table::NumericTable;
use common::{assert_allclose_f64, dense_values, default_runtime, serial_runtime, uniform_f64};
use proptest::prelude::*;

const N: usize = 300;
const P: usize = 4;

/// Two strongly correlated columns followed by two independent ones
fn observations() -> NumericTable<f64> {
    let base = uniform_f64(5, N * P, -1.0, 1.0);
    let mut data = Vec::with_capacity(N * P);
    for row in base.chunks(P) {
        data.extend_from_slice(&[row[0], row[0] + 0.1 * row[1], 3.0 * row[2] + 10.0, row[3]]);
    }
    NumericTable::from_row_major(data, N, P).unwrap()
}

fn batch_pca(data: NumericTable<f64>, parameter: PcaParameter) -> PcaResult<f64> {
    batch_pca_with(Method::Correlation, data, parameter)
}

fn batch_pca_with(method: Method, data: NumericTable<f64>, parameter: PcaParameter) -> PcaResult<f64> {
    let runtime = default_runtime();
    let mut pca = Batch::<Pca<f64>>::new(&runtime, method, parameter).unwrap();
    pca.set_input(PcaInput::new(data));
    pca.compute().unwrap();
    pca.take_result()
}

fn values(result: &PcaResult<f64>) -> Vec<f64> {
    dense_values(result.eigenvalues.as_ref().unwrap())
}

fn vectors(result: &PcaResult<f64>) -> Vec<f64> {
    dense_values(result.eigenvectors.as_ref().unwrap())
}

#[test]
fn test_eigenvalues_descend_and_sum_to_feature_count() {
    let result = batch_pca(observations(), PcaParameter::default());
    let values = values(&result);
    assert_eq!(values.len(), P);
    assert!(values.windows(2).all(|w| w[0] >= w[1]), "{values:?}");
    let total: f64 = values.iter().sum();
    assert!((total - P as f64).abs() < 1e-10, "trace {total}");
    assert!(values[0] > 1.9, "correlated pair should dominate: {values:?}");
}

#[test]
fn test_eigenvectors_are_orthonormal_with_positive_pivot() {
    let result = batch_pca(observations(), PcaParameter::default());
    let v = vectors(&result);
    for a in 0..P {
        for b in 0..P {
            let dot: f64 = (0..P).map(|j| v[a * P + j] * v[b * P + j]).sum();
            let expected = if a == b { 1.0 } else { 0.0 };
            assert!((dot - expected).abs() < 1e-10, "v{a}·v{b} = {dot}");
        }
        let row = &v[a * P..(a + 1) * P];
        let pivot = row
            .iter()
            .copied()
            .max_by(|x, y| x.abs().total_cmp(&y.abs()))
            .unwrap();
        assert!(pivot > 0.0, "component {a}: {row:?}");
    }
}

#[test]
fn test_two_features_match_closed_form() {
    let x = [1.0, 2.0, 4.0, 7.0, 8.0];
    let y = [2.0, 1.0, 5.0, 6.0, 9.0];
    let data: Vec<f64> = x.iter().zip(&y).flat_map(|(&a, &b)| [a, b]).collect();
    let result = batch_pca(
        NumericTable::from_row_major(data, 5, 2).unwrap(),
        PcaParameter::default(),
    );

    let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
    let (mx, my) = (mean(&x), mean(&y));
    let sxy: f64 = x.iter().zip(&y).map(|(a, b)| (a - mx) * (b - my)).sum();
    let sxx: f64 = x.iter().map(|a| (a - mx).powi(2)).sum();
    let syy: f64 = y.iter().map(|b| (b - my).powi(2)).sum();
    let r = sxy / (sxx * syy).sqrt();

    assert_allclose_f64(&values(&result), &[1.0 + r, 1.0 - r], 1e-12, 1e-12, "eigenvalues");
    let h = std::f64::consts::FRAC_1_SQRT_2;
    assert_allclose_f64(&vectors(&result)[..2], &[h, h], 1e-12, 1e-12, "first component");
    assert_allclose_f64(
        &dense_values(result.means.as_ref().unwrap()),
        &[mx, my],
        1e-12,
        0.0,
        "means",
    );
    assert_allclose_f64(
        &dense_values(result.variances.as_ref().unwrap()),
        &[sxx / 4.0, syy / 4.0],
        1e-12,
        0.0,
        "variances",
    );
}

#[test]
fn test_n_components_truncates() {
    let result = batch_pca(
        observations(),
        PcaParameter {
            n_components: Some(2),
        },
    );
    assert_eq!(result.eigenvalues.as_ref().unwrap().shape(), [1, 2]);
    assert_eq!(result.eigenvectors.as_ref().unwrap().shape(), [2, P]);
    assert_eq!(result.means.as_ref().unwrap().shape(), [1, P]);

    let full = batch_pca(observations(), PcaParameter::default());
    assert_allclose_f64(&values(&result), &values(&full)[..2], 1e-14, 0.0, "leading values");
}

#[test]
fn test_too_many_components_is_rejected() {
    let runtime = default_runtime();
    let parameter = PcaParameter {
        n_components: Some(P + 1),
    };
    let mut pca = Batch::<Pca<f64>>::new(&runtime, Method::DefaultDense, parameter).unwrap();
    pca.set_input(PcaInput::new(observations()));
    assert_eq!(pca.compute().unwrap_err().kind(), ErrorKind::Configuration);
}

#[test]
fn test_online_matches_batch() {
    let data = observations();
    let batch = batch_pca(data.clone(), PcaParameter::default());

    let runtime = serial_runtime();
    let mut online =
        Online::<Pca<f64>>::new(&runtime, Method::Correlation, PcaParameter::default()).unwrap();
    for (start, end) in [(0, 1), (1, 120), (120, 121), (121, N)] {
        online.set_input(PcaInput::new(data.slice_rows(start, end).unwrap()));
        online.compute().unwrap();
    }
    assert_eq!(online.partial().unwrap().n_observations(), N as u64);
    let streamed = online.finalize_compute().unwrap();
    assert_allclose_f64(&values(streamed), &values(&batch), 1e-10, 1e-12, "eigenvalues");
    assert_allclose_f64(&vectors(streamed), &vectors(&batch), 1e-8, 1e-10, "eigenvectors");
}

#[test]
fn test_distributed_matches_batch() {
    let data = observations();
    let batch = batch_pca(data.clone(), PcaParameter::default());
    let runtime = default_runtime();

    let parameter = PcaParameter::default();
    let mut master =
        DistributedStep2Master::<Pca<f64>>::new(&runtime, Method::Correlation, parameter.clone())
            .unwrap();
    for (start, end) in [(200, N), (0, 75), (75, 200)] {
        let mut local =
            DistributedStep1Local::<Pca<f64>>::new(&runtime, Method::Correlation, parameter.clone())
                .unwrap();
        local.set_input(PcaInput::new(data.slice_rows(start, end).unwrap()));
        master.add_partial(local.compute().unwrap());
    }
    assert_eq!(master.len(), 3);
    let merged = master.compute().unwrap();
    assert_allclose_f64(&values(merged), &values(&batch), 1e-10, 1e-12, "eigenvalues");
    assert_allclose_f64(
        &dense_values(merged.means.as_ref().unwrap()),
        &dense_values(batch.means.as_ref().unwrap()),
        1e-12,
        1e-12,
        "means",
    );
}

#[test]
fn test_column_major_input_matches_row_major() {
    let data = observations();
    let values_rm = dense_values(&data);
    let mut column_major = vec![0.0; N * P];
    for i in 0..N {
        for j in 0..P {
            column_major[j * N + i] = values_rm[i * P + j];
        }
    }
    let cm = NumericTable::from_column_major(column_major, N, P).unwrap();
    let a = batch_pca(data, PcaParameter::default());
    let b = batch_pca(cm, PcaParameter::default());
    assert_allclose_f64(&values(&b), &values(&a), 1e-12, 1e-14, "layouts");
}

#[test]
fn test_single_observation_is_numeric_error() {
    let runtime = default_runtime();
    let mut pca =
        Batch::<Pca<f64>>::new(&runtime, Method::Correlation, PcaParameter::default()).unwrap();
    pca.set_input(PcaInput::new(
        NumericTable::from_row_major(vec![1.0, 2.0, 3.0], 1, 3).unwrap(),
    ));
    assert_eq!(pca.compute().unwrap_err().kind(), ErrorKind::Numeric);
}

#[test]
fn test_svd_batch_agrees_with_correlation() {
    let data = observations();
    let correlation = batch_pca(data.clone(), PcaParameter::default());
    let svd = batch_pca_with(Method::Svd, data, PcaParameter::default());
    assert_allclose_f64(&values(&svd), &values(&correlation), 1e-9, 1e-10, "eigenvalues");
    assert_allclose_f64(&vectors(&svd), &vectors(&correlation), 1e-7, 1e-8, "eigenvectors");
    for (a, b) in [
        (&svd.means, &correlation.means),
        (&svd.variances, &correlation.variances),
    ] {
        assert_allclose_f64(
            &dense_values(a.as_ref().unwrap()),
            &dense_values(b.as_ref().unwrap()),
            1e-12,
            1e-14,
            "moments",
        );
    }
}

#[test]
fn test_svd_online_and_distributed_agree_with_batch() {
    let data = observations();
    let batch = batch_pca_with(Method::Svd, data.clone(), PcaParameter::default());
    let runtime = serial_runtime();

    let mut online =
        Online::<Pca<f64>>::new(&runtime, Method::Svd, PcaParameter::default()).unwrap();
    for (start, end) in [(0, 90), (90, 91), (91, N)] {
        online.set_input(PcaInput::new(data.slice_rows(start, end).unwrap()));
        online.compute().unwrap();
    }
    let streamed = online.finalize_compute().unwrap();
    assert_allclose_f64(&values(streamed), &values(&batch), 1e-9, 1e-10, "online eigenvalues");
    assert_allclose_f64(&vectors(streamed), &vectors(&batch), 1e-7, 1e-8, "online eigenvectors");

    let mut master =
        DistributedStep2Master::<Pca<f64>>::new(&runtime, Method::Svd, PcaParameter::default())
            .unwrap();
    for (start, end) in [(150, N), (0, 150)] {
        let mut local =
            DistributedStep1Local::<Pca<f64>>::new(&runtime, Method::Svd, PcaParameter::default())
                .unwrap();
        local.set_input(PcaInput::new(data.slice_rows(start, end).unwrap()));
        master.add_partial(local.compute().unwrap());
    }
    let merged = master.compute().unwrap();
    assert_allclose_f64(&values(merged), &values(&batch), 1e-9, 1e-10, "distributed eigenvalues");
}

#[test]
fn test_svd_truncates_and_rejects_constant_features() {
    let truncated = batch_pca_with(
        Method::Svd,
        observations(),
        PcaParameter {
            n_components: Some(2),
        },
    );
    assert_eq!(truncated.eigenvalues.as_ref().unwrap().shape(), [1, 2]);
    assert_eq!(truncated.eigenvectors.as_ref().unwrap().shape(), [2, P]);

    let constant = NumericTable::from_row_major(vec![1.0, 2.0, 1.0, 3.0, 1.0, 5.0], 3, 2).unwrap();
    let runtime = default_runtime();
    let mut pca = Batch::<Pca<f64>>::new(&runtime, Method::Svd, PcaParameter::default()).unwrap();
    pca.set_input(PcaInput::new(constant));
    let err = pca.compute().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Numeric, "unexpected error {err:?}");
}

fn chunk_moments(data: &NumericTable<f64>, start: usize, end: usize) -> PcaPartial<f64> {
    let container = Container::<Pca<f64>>::new(&serial_runtime(), Method::Correlation).unwrap();
    let input = PcaInput::new(data.slice_rows(start, end).unwrap());
    container
        .compute_partial(&input, &PcaParameter::default())
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_partial_merge_commutes(split in 1usize..N) {
        let data = observations();
        let head = chunk_moments(&data, 0, split);
        let tail = chunk_moments(&data, split, N);

        let mut forward = head.clone();
        forward.merge(&tail).unwrap();
        let mut backward = tail.clone();
        backward.merge(&head).unwrap();

        prop_assert_eq!(forward.n_observations(), N as u64);
        prop_assert_eq!(backward.n_observations(), N as u64);
        for (a, b) in forward.means().iter().zip(backward.means()) {
            prop_assert!((a - b).abs() <= 1e-12 * (1.0 + b.abs()), "means {} vs {}", a, b);
        }
        for (a, b) in forward.crossproduct().iter().zip(backward.crossproduct()) {
            prop_assert!((a - b).abs() <= 1e-10 * (1.0 + b.abs()), "crossproduct {} vs {}", a, b);
        }
    }
}
