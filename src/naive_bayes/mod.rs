//! Multinomial Naive Bayes classifier
//!
//! Training counts feature totals per class into a [`NaiveBayesPartial`]
//! (batch, online or distributed) and turns them into a
//! [`NaiveBayesModel`] of smoothed log probabilities:
//!
//! ```text
//! log θ[c][j] = ln((count[c][j] + α[j]) / (Σ_j count[c][j] + Σ_j α[j]))
//! ```
//!
//! Prediction scores `log prior[c] + Σ_j x[j]·log θ[c][j]` and picks the
//! highest-scoring class (the lowest index on ties).
//!
//! `Method::DefaultDense` reads dense tables, `Method::FastCsr` reads CSR
//! tables; handing either the other layout is a structural error.

mod prediction;
mod training;

pub use prediction::{
    NaiveBayesPrediction, PredictionInput, PredictionInputSlot, PredictionResult,
    PredictionResultSlot,
};
pub use training::{
    NaiveBayesTraining, TrainingInput, TrainingInputSlot, TrainingKernel, TrainingResult,
    TrainingResultSlot,
};

use crate::algorithm::{Partial, Validatable};
use crate::dtype::{Element, FloatElement};
use crate::error::{Error, Result, Status};
use crate::runtime::{KernelRegistry, Method};
use crate::table::{NumericTable, StorageLayout};
use crate::tensor::Tensor;

/// Additive smoothing of the feature counts
#[derive(Debug, Clone, PartialEq)]
pub enum Smoothing {
    /// The same α for every feature
    Uniform(f64),
    /// One α per feature
    PerFeature(Vec<f64>),
}

impl Smoothing {
    /// α of feature `j`
    fn alpha(&self, j: usize) -> f64 {
        match self {
            Smoothing::Uniform(a) => *a,
            Smoothing::PerFeature(v) => v[j],
        }
    }

    /// Σ α over `n_features` features
    fn total(&self, n_features: usize) -> f64 {
        match self {
            Smoothing::Uniform(a) => *a * n_features as f64,
            Smoothing::PerFeature(v) => v.iter().sum(),
        }
    }
}

impl Default for Smoothing {
    fn default() -> Self {
        Smoothing::Uniform(1.0)
    }
}

/// Naive Bayes configuration shared by training and prediction
#[derive(Debug, Clone, PartialEq)]
pub struct NaiveBayesParameter {
    /// Number of classes; labels are `0..n_classes`
    pub n_classes: usize,
    /// Prior probability of each class; uniform when `None`
    pub priors: Option<Vec<f64>>,
    /// Smoothing of the feature counts
    pub alpha: Smoothing,
}

impl NaiveBayesParameter {
    /// Uniform priors and α = 1
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            priors: None,
            alpha: Smoothing::default(),
        }
    }
}

impl Validatable for NaiveBayesParameter {
    fn check(&self, _: &()) -> Result<()> {
        let mut status = Status::new();
        if self.n_classes < 2 {
            status.push(Error::invalid_parameter(
                "n_classes",
                format!("need at least 2 classes, got {}", self.n_classes),
            ));
        }
        if let Some(priors) = &self.priors {
            if priors.len() != self.n_classes {
                status.push(Error::shape_mismatch(
                    "priors",
                    &[self.n_classes],
                    &[priors.len()],
                ));
            }
            if priors.iter().any(|&p| !(p > 0.0 && p.is_finite())) {
                status.push(Error::invalid_parameter(
                    "priors",
                    "every prior must be positive and finite",
                ));
            }
        }
        let alpha_ok = match &self.alpha {
            Smoothing::Uniform(a) => *a > 0.0 && a.is_finite(),
            Smoothing::PerFeature(v) => v.iter().all(|&a| a > 0.0 && a.is_finite()),
        };
        if !alpha_ok {
            status.push(Error::invalid_parameter(
                "alpha",
                "smoothing must be positive and finite",
            ));
        }
        status.into_result()
    }
}

/// Per-class feature totals; the sufficient statistics of training
#[derive(Debug, Clone, PartialEq)]
pub struct NaiveBayesPartial<T: Element> {
    pub(crate) n_features: usize,
    /// Observations per class
    pub(crate) class_counts: Vec<T>,
    /// `n_classes × n_features`, row-major
    pub(crate) feature_counts: Vec<T>,
}

impl<T: FloatElement> NaiveBayesPartial<T> {
    /// Empty statistics
    pub fn new(n_classes: usize, n_features: usize) -> Self {
        Self {
            n_features,
            class_counts: vec![T::zero(); n_classes],
            feature_counts: vec![T::zero(); n_classes * n_features],
        }
    }

    /// Number of classes
    pub fn n_classes(&self) -> usize {
        self.class_counts.len()
    }

    /// Number of features
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Observations per class
    pub fn class_counts(&self) -> &[T] {
        &self.class_counts
    }

    /// Feature totals of class `c`
    pub fn feature_counts(&self, c: usize) -> &[T] {
        &self.feature_counts[c * self.n_features..(c + 1) * self.n_features]
    }

    /// Total observations
    pub fn n_observations(&self) -> f64 {
        self.class_counts.iter().map(|c| c.to_f64()).sum()
    }

    fn add(&mut self, other: &Self) {
        for (a, &b) in self.class_counts.iter_mut().zip(&other.class_counts) {
            *a += b;
        }
        for (a, &b) in self.feature_counts.iter_mut().zip(&other.feature_counts) {
            *a += b;
        }
    }
}

impl<T: FloatElement> Partial for NaiveBayesPartial<T> {
    fn merge(&mut self, other: &Self) -> Result<()> {
        if self.n_classes() != other.n_classes() || self.n_features != other.n_features {
            return Err(Error::shape_mismatch(
                "partial",
                &[self.n_classes(), self.n_features],
                &[other.n_classes(), other.n_features],
            ));
        }
        self.add(other);
        Ok(())
    }
}

/// Trained multinomial Naive Bayes model
#[derive(Debug, Clone, PartialEq)]
pub struct NaiveBayesModel<T: Element> {
    log_priors: Tensor<T>,
    log_theta: Tensor<T>,
}

impl<T: FloatElement> NaiveBayesModel<T> {
    /// Model from `[n_classes]` log priors and `[n_classes, n_features]`
    /// log feature probabilities
    pub fn new(log_priors: Tensor<T>, log_theta: Tensor<T>) -> Result<Self> {
        log_priors.expect_rank("log_priors", 1)?;
        log_theta.expect_rank("log_theta", 2)?;
        let n_classes = log_priors.shape()[0];
        if log_theta.shape()[0] != n_classes {
            return Err(Error::shape_mismatch(
                "log_theta",
                &[n_classes, log_theta.shape()[1]],
                log_theta.shape(),
            ));
        }
        log_priors.as_slice()?;
        log_theta.as_slice()?;
        Ok(Self {
            log_priors,
            log_theta,
        })
    }

    /// Number of classes
    pub fn n_classes(&self) -> usize {
        self.log_priors.shape()[0]
    }

    /// Number of features
    pub fn n_features(&self) -> usize {
        self.log_theta.shape()[1]
    }

    /// Log prior of every class
    pub fn log_priors(&self) -> &Tensor<T> {
        &self.log_priors
    }

    /// Log feature probability of every (class, feature)
    pub fn log_theta(&self) -> &Tensor<T> {
        &self.log_theta
    }
}

/// Reject tables whose layout `method` cannot read
pub(crate) fn check_layout<T: Element>(
    table: &NumericTable<T>,
    arg: &'static str,
    method: Method,
) -> Result<()> {
    let ok = match method {
        Method::FastCsr => table.layout() == StorageLayout::Csr,
        _ => table.layout().is_dense(),
    };
    if ok {
        Ok(())
    } else {
        Err(Error::UnsupportedLayout {
            arg,
            layout: table.layout(),
            method,
        })
    }
}

/// Class index stored in a label cell
pub(crate) fn class_of<T: Element>(label: T, n_classes: usize) -> Result<usize> {
    let v = label.to_f64();
    if v.fract() != 0.0 || v < 0.0 || v >= n_classes as f64 {
        return Err(Error::invalid_argument(
            "labels",
            format!("label {v} is not a class in 0..{n_classes}"),
        ));
    }
    Ok(v as usize)
}

pub(crate) fn register_kernels(registry: &mut KernelRegistry) {
    training::register_kernels::<f32>(registry);
    training::register_kernels::<f64>(registry);
    prediction::register_kernels::<f32>(registry);
    prediction::register_kernels::<f64>(registry);
}
