//! Column semantics of a numeric table

use crate::dtype::DType;
use crate::error::{Error, Result};

/// Role of one column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    /// Real-valued feature
    Continuous,
    /// Feature taking values in `0..n_categories`
    Categorical {
        /// Number of distinct categories
        n_categories: usize,
    },
    /// Target / class label column
    Label,
}

impl FeatureKind {
    pub(crate) fn to_code(self) -> (u8, u64) {
        match self {
            FeatureKind::Continuous => (0, 0),
            FeatureKind::Categorical { n_categories } => (1, n_categories as u64),
            FeatureKind::Label => (2, 0),
        }
    }

    pub(crate) fn from_code(code: u8, extra: u64) -> Option<Self> {
        match code {
            0 => Some(FeatureKind::Continuous),
            1 => Some(FeatureKind::Categorical {
                n_categories: extra as usize,
            }),
            2 => Some(FeatureKind::Label),
            _ => None,
        }
    }
}

/// Description of one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureDescriptor {
    /// Column name; may be empty
    pub name: String,
    /// Column role
    pub kind: FeatureKind,
    /// Element type of the column
    pub dtype: DType,
}

impl FeatureDescriptor {
    /// Continuous, unnamed column of `dtype`
    pub fn continuous(dtype: DType) -> Self {
        Self {
            name: String::new(),
            kind: FeatureKind::Continuous,
            dtype,
        }
    }

    /// Set the column name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Per-column descriptors of a table
///
/// The dictionary length always equals the column count of the table it is
/// attached to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataDictionary {
    features: Vec<FeatureDescriptor>,
}

impl DataDictionary {
    /// Dictionary of `cols` unnamed continuous columns of one element type
    pub fn homogeneous(cols: usize, dtype: DType) -> Self {
        Self {
            features: vec![FeatureDescriptor::continuous(dtype); cols],
        }
    }

    /// Build from explicit descriptors
    pub fn from_features(features: Vec<FeatureDescriptor>) -> Self {
        Self { features }
    }

    /// Number of described columns
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// True when no column is described
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Descriptor of column `j`
    pub fn get(&self, j: usize) -> Option<&FeatureDescriptor> {
        self.features.get(j)
    }

    /// Replace the descriptor of column `j`
    pub fn set(&mut self, j: usize, feature: FeatureDescriptor) -> Result<()> {
        let size = self.features.len();
        let slot = self
            .features
            .get_mut(j)
            .ok_or(Error::IndexOutOfBounds { index: j, size })?;
        *slot = feature;
        Ok(())
    }

    /// Iterate descriptors in column order
    pub fn iter(&self) -> impl Iterator<Item = &FeatureDescriptor> {
        self.features.iter()
    }

    /// True when every column has element type `dtype`
    pub fn is_homogeneous(&self, dtype: DType) -> bool {
        self.features.iter().all(|f| f.dtype == dtype)
    }
}
