//! Principal component analysis, correlation and SVD methods
//!
//! Training accumulates `(n, mean, centered cross-products)` per chunk and
//! combines chunks with the pairwise update of Chan et al.:
//!
//! ```text
//! n  = nₐ + n_b
//! δ  = mean_b − meanₐ
//! mean = meanₐ + δ·n_b/n
//! C  = Cₐ + C_b + δδᵀ·nₐ·n_b/n
//! ```
//!
//! The correlation method normalizes `C` into the correlation matrix and
//! decomposes it with the Jacobi eigensolver. The SVD method normalizes the
//! observations to `zᵢⱼ = (xᵢⱼ − meanⱼ) / sqrt(Cⱼⱼ)`, so that `ZᵀZ` is the
//! correlation matrix, and takes the squared singular values of `Z` in batch
//! mode. Online and distributed SVD share the moments partial and finalize
//! with a singular value decomposition of the correlation matrix itself,
//! whose singular values are its eigenvalues.

mod jacobi;

use crate::algorithm::{Algorithm, Allocatable, Partial, SlotMapped, Training, Validatable};
use crate::dtype::{Element, FloatElement};
use crate::error::{Error, Result};
use crate::runtime::{AlgorithmId, KernelContext, KernelRegistry, Method, SimdLevel, run_at};
use crate::table::NumericTable;
use std::marker::PhantomData;

/// Rows per parallel accumulation task
const ROW_BLOCK: usize = 512;

/// PCA configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PcaParameter {
    /// Number of leading components to keep; all when `None`
    pub n_components: Option<usize>,
}

impl Validatable for PcaParameter {
    fn check(&self, _: &()) -> Result<()> {
        if self.n_components == Some(0) {
            return Err(Error::invalid_parameter("n_components", "must be positive"));
        }
        Ok(())
    }
}

/// PCA input slots
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PcaInputSlot {
    /// Observations, `n × p`
    Data,
}

/// PCA input
#[derive(Debug, Clone)]
pub struct PcaInput<T: Element> {
    /// Observations, `n × p`
    pub data: Option<NumericTable<T>>,
}

impl<T: Element> PcaInput<T> {
    /// Input with the data slot set
    pub fn new(data: NumericTable<T>) -> Self {
        Self { data: Some(data) }
    }

    fn data(&self) -> Result<&NumericTable<T>> {
        self.data.as_ref().ok_or(Error::MissingInput { slot: "data" })
    }
}

impl<T: Element> Default for PcaInput<T> {
    fn default() -> Self {
        Self { data: None }
    }
}

impl<T: Element> SlotMapped for PcaInput<T> {
    type Slot = PcaInputSlot;
    type Value = NumericTable<T>;

    fn get(&self, slot: PcaInputSlot) -> Option<&NumericTable<T>> {
        match slot {
            PcaInputSlot::Data => self.data.as_ref(),
        }
    }

    fn set(&mut self, slot: PcaInputSlot, value: NumericTable<T>) {
        match slot {
            PcaInputSlot::Data => self.data = Some(value),
        }
    }
}

impl<T: FloatElement> Validatable<PcaParameter> for PcaInput<T> {
    fn check(&self, parameter: &PcaParameter) -> Result<()> {
        let data = self.data()?;
        if data.cols() == 0 {
            return Err(Error::invalid_argument("data", "no features"));
        }
        if let Some(k) = parameter.n_components
            && k > data.cols()
        {
            return Err(Error::invalid_parameter(
                "n_components",
                format!("{k} components requested from {} features", data.cols()),
            ));
        }
        Ok(())
    }
}

/// Running moments of a set of observations
#[derive(Debug, Clone, PartialEq)]
pub struct PcaPartial<T: Element> {
    pub(crate) n_observations: u64,
    pub(crate) means: Vec<T>,
    /// `p × p` centered cross-product matrix, row-major
    pub(crate) crossproduct: Vec<T>,
}

impl<T: FloatElement> PcaPartial<T> {
    /// No observations over `n_features` features
    pub fn new(n_features: usize) -> Self {
        Self {
            n_observations: 0,
            means: vec![T::zero(); n_features],
            crossproduct: vec![T::zero(); n_features * n_features],
        }
    }

    /// Number of observations
    pub fn n_observations(&self) -> u64 {
        self.n_observations
    }

    /// Number of features
    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    /// Column means
    pub fn means(&self) -> &[T] {
        &self.means
    }

    /// Centered cross-product matrix, row-major
    pub fn crossproduct(&self) -> &[T] {
        &self.crossproduct
    }

    /// Moments of `rows` (each of length `p`), computed in two passes
    fn from_rows(rows: &[T], p: usize) -> Self {
        let n = rows.len() / p;
        let mut partial = Self::new(p);
        if n == 0 {
            return partial;
        }
        partial.n_observations = n as u64;
        for row in rows.chunks_exact(p) {
            for (m, &x) in partial.means.iter_mut().zip(row) {
                *m += x;
            }
        }
        let inv_n = T::from_f64(1.0 / n as f64);
        for m in partial.means.iter_mut() {
            *m = *m * inv_n;
        }
        let mut centered = vec![T::zero(); p];
        for row in rows.chunks_exact(p) {
            for ((c, &x), &m) in centered.iter_mut().zip(row).zip(&partial.means) {
                *c = x - m;
            }
            for i in 0..p {
                let ci = centered[i];
                let out = &mut partial.crossproduct[i * p..(i + 1) * p];
                for (o, &cj) in out.iter_mut().zip(&centered) {
                    *o += ci * cj;
                }
            }
        }
        partial
    }
}

impl<T: FloatElement> Partial for PcaPartial<T> {
    fn merge(&mut self, other: &Self) -> Result<()> {
        let p = self.n_features();
        if other.n_features() != p {
            return Err(Error::shape_mismatch(
                "partial",
                &[p],
                &[other.n_features()],
            ));
        }
        if other.n_observations == 0 {
            return Ok(());
        }
        if self.n_observations == 0 {
            *self = other.clone();
            return Ok(());
        }

        let na = self.n_observations as f64;
        let nb = other.n_observations as f64;
        let n = na + nb;
        let delta: Vec<T> = other
            .means
            .iter()
            .zip(&self.means)
            .map(|(&b, &a)| b - a)
            .collect();
        let w_mean = T::from_f64(nb / n);
        let w_cross = T::from_f64(na * nb / n);

        for (m, &d) in self.means.iter_mut().zip(&delta) {
            *m += d * w_mean;
        }
        for i in 0..p {
            for j in 0..p {
                let k = i * p + j;
                self.crossproduct[k] += other.crossproduct[k] + delta[i] * delta[j] * w_cross;
            }
        }
        self.n_observations += other.n_observations;
        Ok(())
    }
}

/// PCA result slots
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PcaResultSlot {
    /// `1 × k` eigenvalues, descending
    Eigenvalues,
    /// `k × p` eigenvectors, one per row
    Eigenvectors,
    /// `1 × p` column means
    Means,
    /// `1 × p` column variances
    Variances,
}

/// PCA result
#[derive(Debug, Clone)]
pub struct PcaResult<T: Element> {
    /// Eigenvalues of the correlation matrix, descending, `1 × k`
    pub eigenvalues: Option<NumericTable<T>>,
    /// Matching eigenvectors as rows, `k × p`
    pub eigenvectors: Option<NumericTable<T>>,
    /// Column means, `1 × p`
    pub means: Option<NumericTable<T>>,
    /// Unbiased column variances, `1 × p`
    pub variances: Option<NumericTable<T>>,
}

impl<T: Element> Default for PcaResult<T> {
    fn default() -> Self {
        Self {
            eigenvalues: None,
            eigenvectors: None,
            means: None,
            variances: None,
        }
    }
}

impl<T: Element> SlotMapped for PcaResult<T> {
    type Slot = PcaResultSlot;
    type Value = NumericTable<T>;

    fn get(&self, slot: PcaResultSlot) -> Option<&NumericTable<T>> {
        match slot {
            PcaResultSlot::Eigenvalues => self.eigenvalues.as_ref(),
            PcaResultSlot::Eigenvectors => self.eigenvectors.as_ref(),
            PcaResultSlot::Means => self.means.as_ref(),
            PcaResultSlot::Variances => self.variances.as_ref(),
        }
    }

    fn set(&mut self, slot: PcaResultSlot, value: NumericTable<T>) {
        let target = match slot {
            PcaResultSlot::Eigenvalues => &mut self.eigenvalues,
            PcaResultSlot::Eigenvectors => &mut self.eigenvectors,
            PcaResultSlot::Means => &mut self.means,
            PcaResultSlot::Variances => &mut self.variances,
        };
        *target = Some(value);
    }
}

impl<T: FloatElement> Allocatable<PcaInput<T>, PcaParameter> for PcaResult<T> {
    fn allocate(&mut self, input: &PcaInput<T>, parameter: &PcaParameter) -> Result<()> {
        let p = input.data()?.cols();
        let k = parameter.n_components.unwrap_or(p);
        for (slot, expected) in [
            (PcaResultSlot::Eigenvalues, [1, k]),
            (PcaResultSlot::Eigenvectors, [k, p]),
            (PcaResultSlot::Means, [1, p]),
            (PcaResultSlot::Variances, [1, p]),
        ] {
            if let Some(t) = self.get(slot)
                && t.shape() != expected
            {
                return Err(Error::shape_mismatch("pca result", &expected, &t.shape()));
            }
        }
        Ok(())
    }
}

type PartialFn<T> = fn(&KernelContext, &PcaInput<T>, &PcaParameter) -> Result<PcaPartial<T>>;
type FinalizeFn<T> =
    fn(&KernelContext, &PcaPartial<T>, &PcaParameter, &mut PcaResult<T>) -> Result<()>;
type BatchFn<T> = fn(&KernelContext, &PcaInput<T>, &PcaParameter, &mut PcaResult<T>) -> Result<()>;

/// Kernel table of PCA training
pub struct PcaKernel<T: FloatElement> {
    partial: PartialFn<T>,
    finalize: FinalizeFn<T>,
    batch: BatchFn<T>,
}

impl<T: FloatElement> Clone for PcaKernel<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: FloatElement> Copy for PcaKernel<T> {}

/// PCA training
pub struct Pca<T>(PhantomData<T>);

impl<T: FloatElement> Algorithm for Pca<T> {
    const ID: AlgorithmId = AlgorithmId::Pca;
    type T = T;
    type Input = PcaInput<T>;
    type Parameter = PcaParameter;
    type Result = PcaResult<T>;
    type Kernel = PcaKernel<T>;

    fn run(
        kernel: Self::Kernel,
        ctx: &KernelContext,
        input: &Self::Input,
        parameter: &Self::Parameter,
        result: &mut Self::Result,
    ) -> Result<()> {
        (kernel.batch)(ctx, input, parameter, result)
    }
}

impl<T: FloatElement> Training for Pca<T> {
    type Partial = PcaPartial<T>;

    fn partial(
        kernel: Self::Kernel,
        ctx: &KernelContext,
        input: &Self::Input,
        parameter: &Self::Parameter,
    ) -> Result<Self::Partial> {
        (kernel.partial)(ctx, input, parameter)
    }

    fn finalize(
        kernel: Self::Kernel,
        ctx: &KernelContext,
        partial: &Self::Partial,
        parameter: &Self::Parameter,
        result: &mut Self::Result,
    ) -> Result<()> {
        (kernel.finalize)(ctx, partial, parameter, result)
    }
}

fn correlation_partial<T: FloatElement>(
    ctx: &KernelContext,
    input: &PcaInput<T>,
    _: &PcaParameter,
) -> Result<PcaPartial<T>> {
    let data = input.data()?;
    let n = data.rows();
    let p = data.cols();
    let blocks = run_at(ctx.level(), || {
        ctx.parallelism().map_collect(n.div_ceil(ROW_BLOCK), |b| {
            let start = b * ROW_BLOCK;
            let end = (start + ROW_BLOCK).min(n);
            let mut rows = vec![T::zero(); (end - start) * p];
            for (i, row) in (start..end).zip(rows.chunks_exact_mut(p)) {
                data.read_row(i, row)?;
            }
            Ok(PcaPartial::from_rows(&rows, p))
        })
    });

    let mut total = PcaPartial::new(p);
    for block in blocks {
        total.merge(&block?)?;
    }
    Ok(total)
}

fn row_table<T: FloatElement>(values: Vec<T>, rows: usize, cols: usize) -> Result<NumericTable<T>> {
    NumericTable::from_row_major(values, rows, cols)
}

/// Component count and cross-product diagonal, once the moments are usable
fn checked_moments<T: FloatElement>(
    partial: &PcaPartial<T>,
    parameter: &PcaParameter,
) -> Result<(usize, Vec<f64>)> {
    let p = partial.n_features();
    let n = partial.n_observations;
    if n < 2 {
        return Err(Error::numeric(
            "pca",
            format!("{n} observations; at least 2 are required"),
        ));
    }
    let k = parameter.n_components.unwrap_or(p);
    if k > p {
        return Err(Error::invalid_parameter(
            "n_components",
            format!("{k} components requested from {p} features"),
        ));
    }
    let diag: Vec<f64> = (0..p).map(|i| partial.crossproduct[i * p + i].to_f64()).collect();
    if let Some(j) = diag.iter().position(|&d| !(d > 0.0)) {
        return Err(Error::numeric(
            "pca",
            format!("feature {j} has zero variance"),
        ));
    }
    Ok((k, diag))
}

fn correlation_matrix<T: FloatElement>(partial: &PcaPartial<T>, diag: &[f64]) -> Vec<f64> {
    let p = diag.len();
    let mut correlation = vec![0.0; p * p];
    for i in 0..p {
        for j in 0..p {
            correlation[i * p + j] =
                partial.crossproduct[i * p + j].to_f64() / (diag[i] * diag[j]).sqrt();
        }
    }
    correlation
}

/// Store the leading `k` eigenpairs with the means and variances of `partial`
fn write_components<T: FloatElement>(
    partial: &PcaPartial<T>,
    diag: &[f64],
    k: usize,
    values: &[f64],
    vectors: &[f64],
    result: &mut PcaResult<T>,
) -> Result<()> {
    let p = partial.n_features();
    let n = partial.n_observations;
    let to_t = |v: &[f64]| v.iter().map(|&x| T::from_f64(x)).collect::<Vec<T>>();
    let variances: Vec<f64> = diag.iter().map(|d| d / (n - 1) as f64).collect();

    result.eigenvalues = Some(row_table(to_t(&values[..k]), 1, k)?);
    result.eigenvectors = Some(row_table(to_t(&vectors[..k * p]), k, p)?);
    result.means = Some(row_table(partial.means.clone(), 1, p)?);
    result.variances = Some(row_table(to_t(&variances), 1, p)?);
    tracing::debug!(observations = n, features = p, components = k, "pca finalized");
    Ok(())
}

fn correlation_finalize<T: FloatElement>(
    _ctx: &KernelContext,
    partial: &PcaPartial<T>,
    parameter: &PcaParameter,
    result: &mut PcaResult<T>,
) -> Result<()> {
    let (k, diag) = checked_moments(partial, parameter)?;
    let p = diag.len();
    let correlation = correlation_matrix(partial, &diag);
    let (values, vectors) = jacobi::symmetric_eigen(&correlation, p, jacobi::MAX_SWEEPS)?;
    write_components(partial, &diag, k, &values, &vectors, result)
}

fn correlation_batch<T: FloatElement>(
    ctx: &KernelContext,
    input: &PcaInput<T>,
    parameter: &PcaParameter,
    result: &mut PcaResult<T>,
) -> Result<()> {
    let partial = correlation_partial(ctx, input, parameter)?;
    correlation_finalize(ctx, &partial, parameter, result)
}

fn svd_finalize<T: FloatElement>(
    _ctx: &KernelContext,
    partial: &PcaPartial<T>,
    parameter: &PcaParameter,
    result: &mut PcaResult<T>,
) -> Result<()> {
    let (k, diag) = checked_moments(partial, parameter)?;
    let p = diag.len();
    let correlation = correlation_matrix(partial, &diag);
    let (values, vectors) = jacobi::singular_values(&correlation, p, p, jacobi::MAX_SWEEPS)?;
    write_components(partial, &diag, k, &values, &vectors, result)
}

fn svd_batch<T: FloatElement>(
    ctx: &KernelContext,
    input: &PcaInput<T>,
    parameter: &PcaParameter,
    result: &mut PcaResult<T>,
) -> Result<()> {
    let partial = correlation_partial(ctx, input, parameter)?;
    let (k, diag) = checked_moments(&partial, parameter)?;
    let data = input.data()?;
    let n = data.rows();
    let p = data.cols();

    let scale: Vec<f64> = diag.iter().map(|d| 1.0 / d.sqrt()).collect();
    let means: Vec<f64> = partial.means.iter().map(|m| m.to_f64()).collect();
    let mut normalized = vec![0.0f64; n * p];
    let mut row = vec![T::zero(); p];
    for (i, out) in normalized.chunks_exact_mut(p).enumerate() {
        data.read_row(i, &mut row)?;
        for (j, z) in out.iter_mut().enumerate() {
            *z = (row[j].to_f64() - means[j]) * scale[j];
        }
    }

    let (sigma, vectors) = run_at(ctx.level(), || {
        jacobi::singular_values(&normalized, n, p, jacobi::MAX_SWEEPS)
    })?;
    let values: Vec<f64> = sigma.iter().map(|s| s * s).collect();
    write_components(&partial, &diag, k, &values, &vectors, result)
}

pub(crate) fn register_kernels(registry: &mut KernelRegistry) {
    register::<f32>(registry);
    register::<f64>(registry);
}

fn register<T: FloatElement>(registry: &mut KernelRegistry) {
    let correlation = PcaKernel {
        partial: correlation_partial::<T>,
        finalize: correlation_finalize::<T>,
        batch: correlation_batch::<T>,
    };
    let svd = PcaKernel {
        partial: correlation_partial::<T>,
        finalize: svd_finalize::<T>,
        batch: svd_batch::<T>,
    };
    for level in [SimdLevel::Scalar, SimdLevel::Avx2Fma] {
        // The default method of PCA is the correlation method
        registry.register::<Pca<T>>(Method::DefaultDense, level, correlation);
        registry.register::<Pca<T>>(Method::Correlation, level, correlation);
        registry.register::<Pca<T>>(Method::Svd, level, svd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial_of(rows: &[f64], p: usize) -> PcaPartial<f64> {
        PcaPartial::from_rows(rows, p)
    }

    #[test]
    fn test_chan_merge_matches_single_pass() {
        let rows = [1.0, 2.0, 3.0, 5.0, 4.0, 4.0, 0.0, -1.0, 2.5, 3.5];
        let whole = partial_of(&rows, 2);
        let mut left = partial_of(&rows[..4], 2);
        left.merge(&partial_of(&rows[4..], 2)).unwrap();
        assert_eq!(left.n_observations(), 5);
        for (a, b) in left.means().iter().zip(whole.means()) {
            assert!((a - b).abs() < 1e-12);
        }
        for (a, b) in left.crossproduct().iter().zip(whole.crossproduct()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_merge_with_empty_is_identity() {
        let a = partial_of(&[1.0, 2.0, 3.0, 5.0], 2);
        let mut b = PcaPartial::new(2);
        b.merge(&a).unwrap();
        assert_eq!(a, b);
        b.merge(&PcaPartial::new(2)).unwrap();
        assert_eq!(a, b);
        assert!(b.merge(&PcaPartial::new(3)).is_err());
    }

    #[test]
    fn test_zero_variance_is_numeric_error() {
        let partial = partial_of(&[1.0, 2.0, 1.0, 3.0, 1.0, 5.0], 2);
        let mut result = PcaResult::default();
        let err = correlation_finalize(
            &KernelContext::default(),
            &partial,
            &PcaParameter::default(),
            &mut result,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Numeric { algorithm: "pca", .. }));
    }

    #[test]
    fn test_svd_finalize_matches_correlation_finalize() {
        let rows = [1.0, 2.0, 0.5, 3.0, 5.0, 1.0, 4.0, 4.0, 2.0, 0.0, -1.0, 0.0, 2.5, 3.5, 1.5];
        let partial = partial_of(&rows, 3);
        let ctx = KernelContext::default();
        let parameter = PcaParameter::default();
        let mut by_eigen = PcaResult::default();
        correlation_finalize(&ctx, &partial, &parameter, &mut by_eigen).unwrap();
        let mut by_svd = PcaResult::default();
        svd_finalize(&ctx, &partial, &parameter, &mut by_svd).unwrap();

        for slot in [PcaResultSlot::Eigenvalues, PcaResultSlot::Eigenvectors] {
            let a = by_eigen.get(slot).unwrap().as_row_major().unwrap().to_vec();
            let b = by_svd.get(slot).unwrap().as_row_major().unwrap().to_vec();
            for (x, y) in a.iter().zip(&b) {
                assert!((x - y).abs() < 1e-8, "{slot:?}: {x} vs {y}");
            }
        }
    }
}
