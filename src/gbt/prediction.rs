use super::{GbtModel, GbtParameter};
use crate::algorithm::{Algorithm, Allocatable, SlotMapped, Validatable};
use crate::dtype::FloatElement;
use crate::error::{Error, Result};
use crate::runtime::{AlgorithmId, KernelContext, KernelRegistry, Method, SimdLevel, run_at};
use crate::table::NumericTable;
use std::marker::PhantomData;

const ROW_BLOCK: usize = 256;

/// Prediction input slots
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PredictionInputSlot {
    /// Observations to score
    Data,
}

/// Prediction input
#[derive(Debug, Clone)]
pub struct PredictionInput<T: FloatElement> {
    /// Observations to score, `n × p`
    pub data: Option<NumericTable<T>>,
    /// Trained model
    pub model: Option<GbtModel<T>>,
}

impl<T: FloatElement> PredictionInput<T> {
    /// Input with data and model set
    pub fn new(data: NumericTable<T>, model: GbtModel<T>) -> Self {
        Self {
            data: Some(data),
            model: Some(model),
        }
    }

    fn data(&self) -> Result<&NumericTable<T>> {
        self.data.as_ref().ok_or(Error::MissingInput { slot: "data" })
    }

    fn model(&self) -> Result<&GbtModel<T>> {
        self.model.as_ref().ok_or(Error::MissingInput { slot: "model" })
    }
}

impl<T: FloatElement> Default for PredictionInput<T> {
    fn default() -> Self {
        Self {
            data: None,
            model: None,
        }
    }
}

impl<T: FloatElement> SlotMapped for PredictionInput<T> {
    type Slot = PredictionInputSlot;
    type Value = NumericTable<T>;

    fn get(&self, slot: PredictionInputSlot) -> Option<&NumericTable<T>> {
        match slot {
            PredictionInputSlot::Data => self.data.as_ref(),
        }
    }

    fn set(&mut self, slot: PredictionInputSlot, value: NumericTable<T>) {
        match slot {
            PredictionInputSlot::Data => self.data = Some(value),
        }
    }
}

impl<T: FloatElement> Validatable<GbtParameter> for PredictionInput<T> {
    fn check(&self, _: &GbtParameter) -> Result<()> {
        let data = self.data()?;
        let model = self.model()?;
        if data.cols() != model.n_features() {
            return Err(Error::shape_mismatch(
                "data",
                &[data.rows(), model.n_features()],
                &data.shape(),
            ));
        }
        Ok(())
    }
}

/// Prediction result slots
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PredictionResultSlot {
    /// Predicted responses
    Prediction,
}

/// Prediction result
#[derive(Debug, Clone)]
pub struct PredictionResult<T: FloatElement> {
    /// Predicted response of every row, `n × 1`
    pub prediction: Option<NumericTable<T>>,
}

impl<T: FloatElement> Default for PredictionResult<T> {
    fn default() -> Self {
        Self { prediction: None }
    }
}

impl<T: FloatElement> SlotMapped for PredictionResult<T> {
    type Slot = PredictionResultSlot;
    type Value = NumericTable<T>;

    fn get(&self, slot: PredictionResultSlot) -> Option<&NumericTable<T>> {
        match slot {
            PredictionResultSlot::Prediction => self.prediction.as_ref(),
        }
    }

    fn set(&mut self, slot: PredictionResultSlot, value: NumericTable<T>) {
        match slot {
            PredictionResultSlot::Prediction => self.prediction = Some(value),
        }
    }
}

impl<T: FloatElement> Allocatable<PredictionInput<T>, GbtParameter> for PredictionResult<T> {
    fn allocate(&mut self, input: &PredictionInput<T>, _: &GbtParameter) -> Result<()> {
        let rows = input.data()?.rows();
        match &self.prediction {
            Some(t) if t.shape() == [rows, 1] && t.layout().is_dense() => Ok(()),
            Some(t) => Err(Error::shape_mismatch("prediction", &[rows, 1], &t.shape())),
            None => {
                self.prediction = Some(NumericTable::zeros(rows, 1)?);
                Ok(())
            }
        }
    }
}

type PredictionKernel<T> =
    fn(&KernelContext, &PredictionInput<T>, &GbtParameter, &mut PredictionResult<T>) -> Result<()>;

/// Gradient boosted trees regression prediction
pub struct GbtRegressionPrediction<T>(PhantomData<T>);

impl<T: FloatElement> Algorithm for GbtRegressionPrediction<T> {
    const ID: AlgorithmId = AlgorithmId::GbtRegressionPrediction;
    type T = T;
    type Input = PredictionInput<T>;
    type Parameter = GbtParameter;
    type Result = PredictionResult<T>;
    type Kernel = PredictionKernel<T>;

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

fn predict_dense<T: FloatElement>(
    ctx: &KernelContext,
    input: &PredictionInput<T>,
    _: &GbtParameter,
    result: &mut PredictionResult<T>,
) -> Result<()> {
    let data = input.data()?;
    let model = input.model()?;
    let p = data.cols();
    let out = result
        .prediction
        .as_mut()
        .ok_or(Error::NotAllocated { arg: "prediction" })?
        .as_row_major_mut()?;

    run_at(ctx.level(), || {
        ctx.parallelism().for_each_chunk(out, ROW_BLOCK, |b, block| {
            let mut row = vec![T::zero(); p];
            for (r, y) in block.iter_mut().enumerate() {
                // Row indices stay below data.rows() and `row` has p entries
                let _ = data.read_row(b * ROW_BLOCK + r, &mut row);
                *y = model.predict_row(&row);
            }
        });
    });
    Ok(())
}

pub(super) fn register_kernels<T: FloatElement>(registry: &mut KernelRegistry) {
    for level in [SimdLevel::Scalar, SimdLevel::Avx2Fma] {
        registry.register::<GbtRegressionPrediction<T>>(
            Method::DefaultDense,
            level,
            predict_dense::<T>,
        );
    }
}
