use super::{NaiveBayesModel, NaiveBayesParameter, check_layout};
use crate::algorithm::{Algorithm, Allocatable, SlotMapped, Validatable};
use crate::dtype::FloatElement;
use crate::error::{Error, Result};
use crate::runtime::{AlgorithmId, KernelContext, KernelRegistry, Method, SimdLevel, run_at};
use crate::table::NumericTable;
use std::marker::PhantomData;

/// Rows labelled per parallel task
const ROW_BLOCK: usize = 128;

/// Prediction input slots
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PredictionInputSlot {
    /// Observations to classify
    Data,
}

/// Prediction input
#[derive(Debug, Clone)]
pub struct PredictionInput<T: FloatElement> {
    /// Observations to classify, `n × p`
    pub data: Option<NumericTable<T>>,
    /// Trained model
    pub model: Option<NaiveBayesModel<T>>,
}

impl<T: FloatElement> PredictionInput<T> {
    /// Input with data and model set
    pub fn new(data: NumericTable<T>, model: NaiveBayesModel<T>) -> Self {
        Self {
            data: Some(data),
            model: Some(model),
        }
    }

    fn data(&self) -> Result<&NumericTable<T>> {
        self.data.as_ref().ok_or(Error::MissingInput { slot: "data" })
    }

    fn model(&self) -> Result<&NaiveBayesModel<T>> {
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

impl<T: FloatElement> Validatable<NaiveBayesParameter> for PredictionInput<T> {
    fn check(&self, parameter: &NaiveBayesParameter) -> Result<()> {
        let data = self.data()?;
        let model = self.model()?;
        if model.n_classes() != parameter.n_classes {
            return Err(Error::invalid_argument(
                "model",
                format!(
                    "model has {} classes, parameter {}",
                    model.n_classes(),
                    parameter.n_classes
                ),
            ));
        }
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
    /// Predicted labels
    Prediction,
}

/// Prediction result
#[derive(Debug, Clone)]
pub struct PredictionResult<T: FloatElement> {
    /// Predicted class of every row, `n × 1`
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

impl<T: FloatElement> Allocatable<PredictionInput<T>, NaiveBayesParameter>
    for PredictionResult<T>
{
    fn allocate(&mut self, input: &PredictionInput<T>, _: &NaiveBayesParameter) -> Result<()> {
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

/// Multinomial Naive Bayes prediction
pub struct NaiveBayesPrediction<T>(PhantomData<T>);

type PredictionKernel<T> = fn(
    &KernelContext,
    &PredictionInput<T>,
    &NaiveBayesParameter,
    &mut PredictionResult<T>,
) -> Result<()>;

impl<T: FloatElement> Algorithm for NaiveBayesPrediction<T> {
    const ID: AlgorithmId = AlgorithmId::NaiveBayesPrediction;
    type T = T;
    type Input = PredictionInput<T>;
    type Parameter = NaiveBayesParameter;
    type Result = PredictionResult<T>;
    type Kernel = PredictionKernel<T>;

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
        kernel(ctx, input, parameter, result)
    }
}

/// Highest-scoring class; the lowest index wins ties
fn argmax<T: FloatElement>(scores: &[T]) -> usize {
    let mut best = 0;
    for (c, &s) in scores.iter().enumerate().skip(1) {
        if s > scores[best] {
            best = c;
        }
    }
    best
}

/// Shared by the dense and CSR keys; the row walk adapts to the layout
fn predict<T: FloatElement>(
    ctx: &KernelContext,
    input: &PredictionInput<T>,
    _: &NaiveBayesParameter,
    result: &mut PredictionResult<T>,
) -> Result<()> {
    let data = input.data()?;
    let model = input.model()?;
    let log_priors = model.log_priors().as_slice()?;
    let log_theta = model.log_theta().as_slice()?;
    let k = model.n_classes();
    let p = model.n_features();
    let out = result
        .prediction
        .as_mut()
        .ok_or(Error::NotAllocated { arg: "prediction" })?
        .as_row_major_mut()?;

    run_at(ctx.level(), || {
        ctx.parallelism().for_each_chunk(out, ROW_BLOCK, |b, labels| {
            let mut scores = vec![T::zero(); k];
            for (r, label) in labels.iter_mut().enumerate() {
                scores.copy_from_slice(log_priors);
                // Row indices stay below data.rows()
                let _ = data.for_each_nonzero_in_row(b * ROW_BLOCK + r, |j, v| {
                    for (c, s) in scores.iter_mut().enumerate() {
                        *s += v * log_theta[c * p + j];
                    }
                });
                *label = T::from_f64(argmax(&scores) as f64);
            }
        });
    });
    Ok(())
}

pub(super) fn register_kernels<T: FloatElement>(registry: &mut KernelRegistry) {
    for level in [SimdLevel::Scalar, SimdLevel::Avx2Fma] {
        registry.register::<NaiveBayesPrediction<T>>(Method::DefaultDense, level, predict::<T>);
        registry.register::<NaiveBayesPrediction<T>>(Method::FastCsr, level, predict::<T>);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_prefers_lowest_index_on_ties() {
        assert_eq!(argmax(&[1.0f64, 3.0, 3.0]), 1);
        assert_eq!(argmax(&[-1.0f32]), 0);
        assert_eq!(argmax(&[2.0f64, 2.0]), 0);
    }
}
