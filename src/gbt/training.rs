use super::tree::{self, GrowthLimits};
use super::{GbtModel, GbtParameter};
use crate::algorithm::{Algorithm, Allocatable, SlotMapped, Validatable};
use crate::dtype::FloatElement;
use crate::error::{Error, Result};
use crate::runtime::{AlgorithmId, KernelContext, KernelRegistry, Method, SimdLevel, run_at};
use crate::table::NumericTable;
use std::marker::PhantomData;

/// Training input slots
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrainingInputSlot {
    /// Observations, `n × p`
    Data,
    /// Responses, `n × 1`
    DependentVariable,
}

/// Training input
#[derive(Debug, Clone)]
pub struct TrainingInput<T: FloatElement> {
    /// Observations, `n × p`
    pub data: Option<NumericTable<T>>,
    /// Responses, `n × 1`
    pub dependent_variable: Option<NumericTable<T>>,
}

impl<T: FloatElement> TrainingInput<T> {
    /// Input with both slots set
    pub fn new(data: NumericTable<T>, dependent_variable: NumericTable<T>) -> Self {
        Self {
            data: Some(data),
            dependent_variable: Some(dependent_variable),
        }
    }

    fn data(&self) -> Result<&NumericTable<T>> {
        self.data.as_ref().ok_or(Error::MissingInput { slot: "data" })
    }

    fn dependent_variable(&self) -> Result<&NumericTable<T>> {
        self.dependent_variable.as_ref().ok_or(Error::MissingInput {
            slot: "dependent_variable",
        })
    }
}

impl<T: FloatElement> Default for TrainingInput<T> {
    fn default() -> Self {
        Self {
            data: None,
            dependent_variable: None,
        }
    }
}

impl<T: FloatElement> SlotMapped for TrainingInput<T> {
    type Slot = TrainingInputSlot;
    type Value = NumericTable<T>;

    fn get(&self, slot: TrainingInputSlot) -> Option<&NumericTable<T>> {
        match slot {
            TrainingInputSlot::Data => self.data.as_ref(),
            TrainingInputSlot::DependentVariable => self.dependent_variable.as_ref(),
        }
    }

    fn set(&mut self, slot: TrainingInputSlot, value: NumericTable<T>) {
        match slot {
            TrainingInputSlot::Data => self.data = Some(value),
            TrainingInputSlot::DependentVariable => self.dependent_variable = Some(value),
        }
    }
}

impl<T: FloatElement> Validatable<GbtParameter> for TrainingInput<T> {
    fn check(&self, _: &GbtParameter) -> Result<()> {
        let data = self.data()?;
        let y = self.dependent_variable()?;
        if data.rows() == 0 || data.cols() == 0 {
            return Err(Error::invalid_argument(
                "data",
                format!("empty {}x{} table", data.rows(), data.cols()),
            ));
        }
        if y.shape() != [data.rows(), 1] {
            return Err(Error::shape_mismatch(
                "dependent_variable",
                &[data.rows(), 1],
                &y.shape(),
            ));
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
    pub model: Option<GbtModel<T>>,
}

impl<T: FloatElement> Default for TrainingResult<T> {
    fn default() -> Self {
        Self { model: None }
    }
}

impl<T: FloatElement> SlotMapped for TrainingResult<T> {
    type Slot = TrainingResultSlot;
    type Value = GbtModel<T>;

    fn get(&self, slot: TrainingResultSlot) -> Option<&GbtModel<T>> {
        match slot {
            TrainingResultSlot::Model => self.model.as_ref(),
        }
    }

    fn set(&mut self, slot: TrainingResultSlot, value: GbtModel<T>) {
        match slot {
            TrainingResultSlot::Model => self.model = Some(value),
        }
    }
}

impl<T: FloatElement> Allocatable<TrainingInput<T>, GbtParameter> for TrainingResult<T> {
    // The kernel replaces any model already in the slot
    fn allocate(&mut self, _: &TrainingInput<T>, _: &GbtParameter) -> Result<()> {
        Ok(())
    }
}

type TrainingKernel<T> =
    fn(&KernelContext, &TrainingInput<T>, &GbtParameter, &mut TrainingResult<T>) -> Result<()>;

/// Gradient boosted trees regression training
pub struct GbtRegressionTraining<T>(PhantomData<T>);

impl<T: FloatElement> Algorithm for GbtRegressionTraining<T> {
    const ID: AlgorithmId = AlgorithmId::GbtRegressionTraining;
    type T = T;
    type Input = TrainingInput<T>;
    type Parameter = GbtParameter;
    type Result = TrainingResult<T>;
    type Kernel = TrainingKernel<T>;

    fn run(
        kernel: Self::Kernel,
        ctx: &KernelContext,
        input: &Self::Input,
        parameter: &Self::Parameter,
        result: &mut Self::Result,
    ) -> Result<()> {
        kernel(ctx, input, parameter, result)
    }
}

fn train_dense<T: FloatElement>(
    ctx: &KernelContext,
    input: &TrainingInput<T>,
    parameter: &GbtParameter,
    result: &mut TrainingResult<T>,
) -> Result<()> {
    let data = input.data()?;
    let n = data.rows();
    let columns = (0..data.cols())
        .map(|j| data.column(j))
        .collect::<Result<Vec<_>>>()?;
    let dense = data.to_row_major()?;
    let rows = dense
        .as_row_major()
        .ok_or(Error::invalid_argument("data", "no dense row-major copy"))?;
    let y: Vec<f64> = input
        .dependent_variable()?
        .column(0)?
        .iter()
        .map(|v| v.to_f64())
        .collect();
    if let Some(i) = y.iter().position(|v| !v.is_finite()) {
        return Err(Error::invalid_argument(
            "dependent_variable",
            format!("row {i} is not finite"),
        ));
    }

    let loss = parameter.loss;
    let limits = GrowthLimits {
        max_depth: parameter.max_tree_depth,
        min_observations_in_leaf: parameter.min_observations_in_leaf,
        lambda: parameter.lambda,
        min_split_loss: parameter.min_split_loss,
        shrinkage: parameter.shrinkage,
    };
    let base_score = T::from_f64(loss.base_score(&y));
    let mut f = vec![base_score.to_f64(); n];
    let mut grad = vec![0.0; n];
    let mut hess = vec![0.0; n];
    let mut trees = Vec::with_capacity(parameter.max_iterations);
    let p = data.cols();

    run_at(ctx.level(), || {
        for iteration in 0..parameter.max_iterations {
            for i in 0..n {
                (grad[i], hess[i]) = loss.derivatives(y[i], f[i]);
            }
            let tree = tree::grow(&columns, &grad, &hess, &limits, ctx.parallelism());
            for (i, fi) in f.iter_mut().enumerate() {
                *fi += tree.predict_row(&rows[i * p..(i + 1) * p]).to_f64();
            }
            tracing::trace!(iteration, leaves = tree.n_leaves(), "gbt tree grown");
            trees.push(tree);
        }
    });

    tracing::debug!(
        trees = trees.len(),
        observations = n,
        features = data.cols(),
        "gbt regression trained"
    );
    result.model = Some(GbtModel::new(data.cols(), base_score, trees)?);
    Ok(())
}

pub(super) fn register_kernels<T: FloatElement>(registry: &mut KernelRegistry) {
    for level in [SimdLevel::Scalar, SimdLevel::Avx2Fma] {
        registry.register::<GbtRegressionTraining<T>>(Method::DefaultDense, level, train_dense::<T>);
    }
}
