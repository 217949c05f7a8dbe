use super::{NaiveBayesModel, NaiveBayesParameter, NaiveBayesPartial, Smoothing, check_layout, class_of};
use crate::algorithm::{Algorithm, Allocatable, SlotMapped, Training, Validatable};
use crate::dtype::FloatElement;
use crate::error::{Error, Result};
use crate::runtime::{AlgorithmId, KernelContext, KernelRegistry, Method, SimdLevel, run_at};
use crate::table::NumericTable;
use crate::tensor::Tensor;
use std::marker::PhantomData;

/// Rows per parallel accumulation task
const ROW_BLOCK: usize = 256;

/// Training input slots
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrainingInputSlot {
    /// Observations, `n × p`, non-negative counts
    Data,
    /// Class labels, `n × 1`
    Labels,
}

/// Training input
#[derive(Debug, Clone)]
pub struct TrainingInput<T: FloatElement> {
    /// Observations
    pub data: Option<NumericTable<T>>,
    /// Class labels
    pub labels: Option<NumericTable<T>>,
}

impl<T: FloatElement> TrainingInput<T> {
    /// Input with both slots set
    pub fn new(data: NumericTable<T>, labels: NumericTable<T>) -> Self {
        Self {
            data: Some(data),
            labels: Some(labels),
        }
    }

    fn data(&self) -> Result<&NumericTable<T>> {
        self.data.as_ref().ok_or(Error::MissingInput { slot: "data" })
    }

    fn labels(&self) -> Result<&NumericTable<T>> {
        self.labels.as_ref().ok_or(Error::MissingInput { slot: "labels" })
    }
}

impl<T: FloatElement> Default for TrainingInput<T> {
    fn default() -> Self {
        Self {
            data: None,
            labels: None,
        }
    }
}

impl<T: FloatElement> SlotMapped for TrainingInput<T> {
    type Slot = TrainingInputSlot;
    type Value = NumericTable<T>;

    fn get(&self, slot: TrainingInputSlot) -> Option<&NumericTable<T>> {
        match slot {
            TrainingInputSlot::Data => self.data.as_ref(),
            TrainingInputSlot::Labels => self.labels.as_ref(),
        }
    }

    fn set(&mut self, slot: TrainingInputSlot, value: NumericTable<T>) {
        match slot {
            TrainingInputSlot::Data => self.data = Some(value),
            TrainingInputSlot::Labels => self.labels = Some(value),
        }
    }
}

impl<T: FloatElement> Validatable<NaiveBayesParameter> for TrainingInput<T> {
    fn check(&self, parameter: &NaiveBayesParameter) -> Result<()> {
        let data = self.data()?;
        let labels = self.labels()?;
        if labels.shape() != [data.rows(), 1] {
            return Err(Error::shape_mismatch(
                "labels",
                &[data.rows(), 1],
                &labels.shape(),
            ));
        }
        if let Smoothing::PerFeature(alpha) = &parameter.alpha
            && alpha.len() != data.cols()
        {
            return Err(Error::shape_mismatch("alpha", &[data.cols()], &[alpha.len()]));
        }
        for i in 0..labels.rows() {
            class_of(labels.value(i, 0)?, parameter.n_classes)?;
        }
        Ok(())
    }
}

/// Training result slots
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrainingResultSlot {
    /// Trained model
    Model,
}

/// Training result
#[derive(Debug, Clone)]
pub struct TrainingResult<T: FloatElement> {
    /// Trained model
    pub model: Option<NaiveBayesModel<T>>,
}

impl<T: FloatElement> Default for TrainingResult<T> {
    fn default() -> Self {
        Self { model: None }
    }
}

impl<T: FloatElement> SlotMapped for TrainingResult<T> {
    type Slot = TrainingResultSlot;
    type Value = NaiveBayesModel<T>;

    fn get(&self, slot: TrainingResultSlot) -> Option<&NaiveBayesModel<T>> {
        match slot {
            TrainingResultSlot::Model => self.model.as_ref(),
        }
    }

    fn set(&mut self, slot: TrainingResultSlot, value: NaiveBayesModel<T>) {
        match slot {
            TrainingResultSlot::Model => self.model = Some(value),
        }
    }
}

impl<T: FloatElement> Allocatable<TrainingInput<T>, NaiveBayesParameter> for TrainingResult<T> {
    fn allocate(&mut self, input: &TrainingInput<T>, parameter: &NaiveBayesParameter) -> Result<()> {
        // The model is built by finalize; only a mismatched one is rejected
        if let Some(model) = &self.model {
            let expected = [parameter.n_classes, input.data()?.cols()];
            let got = [model.n_classes(), model.n_features()];
            if expected != got {
                return Err(Error::shape_mismatch("model", &expected, &got));
            }
        }
        Ok(())
    }
}

type PartialFn<T> =
    fn(&KernelContext, &TrainingInput<T>, &NaiveBayesParameter) -> Result<NaiveBayesPartial<T>>;
type FinalizeFn<T> = fn(
    &KernelContext,
    &NaiveBayesPartial<T>,
    &NaiveBayesParameter,
    &mut TrainingResult<T>,
) -> Result<()>;

/// Kernel table of Naive Bayes training
pub struct TrainingKernel<T: FloatElement> {
    partial: PartialFn<T>,
    finalize: FinalizeFn<T>,
}

impl<T: FloatElement> Clone for TrainingKernel<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: FloatElement> Copy for TrainingKernel<T> {}

/// Multinomial Naive Bayes training
pub struct NaiveBayesTraining<T>(PhantomData<T>);

impl<T: FloatElement> Algorithm for NaiveBayesTraining<T> {
    const ID: AlgorithmId = AlgorithmId::NaiveBayesTraining;
    type T = T;
    type Input = TrainingInput<T>;
    type Parameter = NaiveBayesParameter;
    type Result = TrainingResult<T>;
    type Kernel = TrainingKernel<T>;

    fn check_method(input: &Self::Input, method: Method) -> Result<()> {
        check_layout(input.data()?, "data", method)
    }

    fn run(
        kernel: Self::Kernel,
        ctx: &KernelContext,
        input: &Self::Input,
        parameter: &Self::Parameter,
        result: &mut Self::Result,
    ) -> Result<()> {
        let partial = (kernel.partial)(ctx, input, parameter)?;
        (kernel.finalize)(ctx, &partial, parameter, result)
    }
}

impl<T: FloatElement> Training for NaiveBayesTraining<T> {
    type Partial = NaiveBayesPartial<T>;

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

fn negative_count(i: usize, j: usize) -> Error {
    Error::invalid_argument(
        "data",
        format!("negative count at row {i}, column {j}"),
    )
}

/// Class and feature counts of every row; `visit(i, f)` feeds `f` the
/// stored entries of row `i`
fn accumulate_rows<T, V>(
    ctx: &KernelContext,
    n_rows: usize,
    n_features: usize,
    labels: &NumericTable<T>,
    n_classes: usize,
    visit: V,
) -> Result<NaiveBayesPartial<T>>
where
    T: FloatElement,
    V: Fn(usize, &mut dyn FnMut(usize, T)) -> Result<()> + Sync,
{
    let p = n_features;
    let blocks = ctx.parallelism().map_collect(n_rows.div_ceil(ROW_BLOCK), |b| {
        let mut local = NaiveBayesPartial::<T>::new(n_classes, p);
        for i in b * ROW_BLOCK..((b + 1) * ROW_BLOCK).min(n_rows) {
            let c = class_of(labels.value(i, 0)?, n_classes)?;
            local.class_counts[c] += T::one();
            let row = &mut local.feature_counts[c * p..(c + 1) * p];
            let mut negative = None;
            visit(i, &mut |j, v| {
                if v < T::zero() {
                    negative.get_or_insert(j);
                }
                row[j] += v;
            })?;
            if let Some(j) = negative {
                return Err(negative_count(i, j));
            }
        }
        Ok(local)
    });

    // Block order is fixed, so the sum does not depend on the thread count
    let mut total = NaiveBayesPartial::new(n_classes, p);
    for block in blocks {
        total.add(&block?);
    }
    Ok(total)
}

fn partial_dense<T: FloatElement>(
    ctx: &KernelContext,
    input: &TrainingInput<T>,
    parameter: &NaiveBayesParameter,
) -> Result<NaiveBayesPartial<T>> {
    let data = input.data()?;
    let labels = input.labels()?;
    run_at(ctx.level(), || {
        accumulate_rows(
            ctx,
            data.rows(),
            data.cols(),
            labels,
            parameter.n_classes,
            |i, f| data.for_each_nonzero_in_row(i, f),
        )
    })
}

fn partial_csr<T: FloatElement>(
    ctx: &KernelContext,
    input: &TrainingInput<T>,
    parameter: &NaiveBayesParameter,
) -> Result<NaiveBayesPartial<T>> {
    let data = input.data()?;
    let labels = input.labels()?;
    let csr = data.as_csr().ok_or(Error::UnsupportedLayout {
        arg: "data",
        layout: data.layout(),
        method: Method::FastCsr,
    })?;
    run_at(ctx.level(), || {
        accumulate_rows(
            ctx,
            data.rows(),
            data.cols(),
            labels,
            parameter.n_classes,
            |i, f| {
                let (cols, vals) = csr.row_entries(i);
                for (&j, &v) in cols.iter().zip(vals) {
                    f(j, v);
                }
                Ok(())
            },
        )
    })
}

fn finalize<T: FloatElement>(
    _ctx: &KernelContext,
    partial: &NaiveBayesPartial<T>,
    parameter: &NaiveBayesParameter,
    result: &mut TrainingResult<T>,
) -> Result<()> {
    let k = parameter.n_classes;
    let p = partial.n_features();
    if partial.n_classes() != k {
        return Err(Error::shape_mismatch("partial", &[k, p], &[partial.n_classes(), p]));
    }
    if let Smoothing::PerFeature(alpha) = &parameter.alpha
        && alpha.len() != p
    {
        return Err(Error::shape_mismatch("alpha", &[p], &[alpha.len()]));
    }

    let log_priors: Vec<T> = match &parameter.priors {
        Some(priors) => {
            let total: f64 = priors.iter().sum();
            priors.iter().map(|&q| T::from_f64((q / total).ln())).collect()
        }
        None => vec![T::from_f64(-(k as f64).ln()); k],
    };

    let alpha_total = parameter.alpha.total(p);
    let mut log_theta = Vec::with_capacity(k * p);
    for c in 0..k {
        let counts = partial.feature_counts(c);
        let denom = counts.iter().map(|v| v.to_f64()).sum::<f64>() + alpha_total;
        for (j, &count) in counts.iter().enumerate() {
            let theta = (count.to_f64() + parameter.alpha.alpha(j)) / denom;
            log_theta.push(T::from_f64(theta.ln()));
        }
    }

    result.model = Some(NaiveBayesModel::new(
        Tensor::from_vec(log_priors, &[k])?,
        Tensor::from_vec(log_theta, &[k, p])?,
    )?);
    tracing::debug!(
        classes = k,
        features = p,
        observations = partial.n_observations(),
        "naive bayes model finalized"
    );
    Ok(())
}

pub(super) fn register_kernels<T: FloatElement>(registry: &mut KernelRegistry) {
    let dense = TrainingKernel {
        partial: partial_dense::<T>,
        finalize: finalize::<T>,
    };
    let csr = TrainingKernel {
        partial: partial_csr::<T>,
        finalize: finalize::<T>,
    };
    for level in [SimdLevel::Scalar, SimdLevel::Avx2Fma] {
        registry.register::<NaiveBayesTraining<T>>(Method::DefaultDense, level, dense);
        registry.register::<NaiveBayesTraining<T>>(Method::FastCsr, level, csr);
    }
}
