//! Gradient boosted trees regression
//!
//! Training fits `max_iterations` regression trees one after another, each on
//! the first and second derivatives of the loss at the current prediction.
//! Splits are chosen by exact greedy search over every distinct threshold,
//! maximizing the second-order gain
//!
//! ```text
//! gain = ½·(G_L²/(H_L+λ) + G_R²/(H_R+λ) − G²/(H+λ)) − min_split_loss
//! ```
//!
//! and leaves predict `−shrinkage·G/(H+λ)`. The model is the base score plus
//! the sum of its trees.

mod prediction;
mod training;
mod tree;

pub use prediction::{
    GbtRegressionPrediction, PredictionInput, PredictionInputSlot, PredictionResult,
    PredictionResultSlot,
};
pub use training::{
    GbtRegressionTraining, TrainingInput, TrainingInputSlot, TrainingResult, TrainingResultSlot,
};
pub use tree::RegressionTree;

use crate::algorithm::Validatable;
use crate::dtype::FloatElement;
use crate::error::{Error, Result, Status};
use crate::runtime::KernelRegistry;

/// Regression loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Loss {
    /// `L(y, f) = (y − f)²/2`
    #[default]
    Squared,
}

impl Loss {
    /// First and second derivative of the loss in `f`
    pub(crate) fn derivatives(self, y: f64, f: f64) -> (f64, f64) {
        match self {
            Loss::Squared => (f - y, 1.0),
        }
    }

    /// Prediction minimizing the loss over `y` with no trees
    pub(crate) fn base_score(self, y: &[f64]) -> f64 {
        match self {
            Loss::Squared => y.iter().sum::<f64>() / y.len() as f64,
        }
    }
}

/// Boosting configuration shared by training and prediction
#[derive(Debug, Clone, PartialEq)]
pub struct GbtParameter {
    /// Number of boosting rounds, one tree each
    pub max_iterations: usize,
    /// Depth limit of every tree; 0 grows single-leaf trees
    pub max_tree_depth: usize,
    /// Learning rate applied to every leaf, in `(0, 1]`
    pub shrinkage: f64,
    /// Smallest number of observations a leaf may hold
    pub min_observations_in_leaf: usize,
    /// L2 regularization of leaf values
    pub lambda: f64,
    /// Smallest gain a split must achieve
    pub min_split_loss: f64,
    /// Loss to minimize
    pub loss: Loss,
}

impl Default for GbtParameter {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_tree_depth: 6,
            shrinkage: 0.3,
            min_observations_in_leaf: 5,
            lambda: 1.0,
            min_split_loss: 0.0,
            loss: Loss::Squared,
        }
    }
}

impl Validatable for GbtParameter {
    fn check(&self, _: &()) -> Result<()> {
        let mut status = Status::new();
        if self.max_iterations == 0 {
            status.push(Error::invalid_parameter("max_iterations", "must be positive"));
        }
        if !(self.shrinkage > 0.0 && self.shrinkage <= 1.0) {
            status.push(Error::invalid_parameter(
                "shrinkage",
                format!("{} is outside (0, 1]", self.shrinkage),
            ));
        }
        if self.min_observations_in_leaf == 0 {
            status.push(Error::invalid_parameter(
                "min_observations_in_leaf",
                "must be positive",
            ));
        }
        if !(self.lambda >= 0.0 && self.lambda.is_finite()) {
            status.push(Error::invalid_parameter("lambda", "must be non-negative"));
        }
        if !(self.min_split_loss >= 0.0 && self.min_split_loss.is_finite()) {
            status.push(Error::invalid_parameter(
                "min_split_loss",
                "must be non-negative",
            ));
        }
        status.into_result()
    }
}

/// Trained boosted regression model
#[derive(Debug, Clone, PartialEq)]
pub struct GbtModel<T: FloatElement> {
    n_features: usize,
    base_score: T,
    trees: Vec<RegressionTree<T>>,
}

impl<T: FloatElement> GbtModel<T> {
    /// Model over `n_features` features; every split must use one of them
    pub fn new(n_features: usize, base_score: T, trees: Vec<RegressionTree<T>>) -> Result<Self> {
        if let Some(f) = trees.iter().filter_map(|t| t.max_feature()).max()
            && f >= n_features
        {
            return Err(Error::IndexOutOfBounds {
                index: f,
                size: n_features,
            });
        }
        Ok(Self {
            n_features,
            base_score,
            trees,
        })
    }

    /// Number of features
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Prediction before any tree
    pub fn base_score(&self) -> T {
        self.base_score
    }

    /// Trees in boosting order
    pub fn trees(&self) -> &[RegressionTree<T>] {
        &self.trees
    }

    /// Number of trees
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Prediction for one dense row of `n_features` values
    pub fn predict_row(&self, row: &[T]) -> T {
        let mut f = self.base_score;
        for tree in &self.trees {
            f += tree.predict_row(row);
        }
        f
    }
}

pub(crate) fn register_kernels(registry: &mut KernelRegistry) {
    training::register_kernels::<f32>(registry);
    training::register_kernels::<f64>(registry);
    prediction::register_kernels::<f32>(registry);
    prediction::register_kernels::<f64>(registry);
}
