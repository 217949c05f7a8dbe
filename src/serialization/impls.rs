use super::{Reader, Serializable, Writer};
use crate::dtype::{Element, FloatElement};
use crate::error::{Error, Result};
use crate::gbt::{GbtModel, RegressionTree};
use crate::naive_bayes::{NaiveBayesModel, NaiveBayesPartial};
use crate::pca::PcaPartial;
use crate::table::{
    CsrData, DataDictionary, FeatureDescriptor, FeatureKind, NumericTable, StorageLayout,
};
use crate::tensor::Tensor;

mod tags {
    pub const TENSOR: u16 = 1;
    pub const NUMERIC_TABLE: u16 = 2;
    pub const NAIVE_BAYES_MODEL: u16 = 3;
    pub const NAIVE_BAYES_PARTIAL: u16 = 4;
    pub const PCA_PARTIAL: u16 = 5;
    pub const GBT_MODEL: u16 = 6;
}

fn checked_numel(dims: &[usize]) -> Result<usize> {
    dims.iter().try_fold(1usize, |acc, &d| {
        acc.checked_mul(d)
            .ok_or_else(|| Error::deserialization(format!("shape {dims:?} overflows")))
    })
}

fn expect_len(what: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(Error::deserialization(format!(
            "{what} holds {got} values, {expected} expected"
        )));
    }
    Ok(())
}

impl<T: Element> Serializable for Tensor<T> {
    const TYPE_TAG: u16 = tags::TENSOR;
    const VERSION: u16 = 1;
    const NAME: &'static str = "tensor";

    fn encode(&self, w: &mut Writer) {
        w.put_dtype(T::DTYPE);
        w.put_indices(self.shape());
        match self.as_slice() {
            Ok(values) => {
                w.put_u8(1);
                w.put_slice(values);
            }
            Err(_) => w.put_u8(0),
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        r.expect_dtype::<T>()?;
        let dims = r.get_indices()?;
        let numel = checked_numel(&dims)?;
        match r.get_u8()? {
            0 => Ok(Tensor::declare(&dims)),
            1 => {
                let values = r.get_vec::<T>()?;
                expect_len("tensor", values.len(), numel)?;
                Tensor::from_vec(values, &dims)
            }
            flag => Err(Error::deserialization(format!(
                "invalid allocation flag {flag}"
            ))),
        }
    }

    fn declared_shape(&self) -> Vec<usize> {
        self.shape().to_vec()
    }
}

fn layout_code(layout: StorageLayout) -> u8 {
    match layout {
        StorageLayout::DenseRowMajor => 0,
        StorageLayout::DenseColumnMajor => 1,
        StorageLayout::Csr => 2,
    }
}

fn encode_dictionary(w: &mut Writer, dictionary: &DataDictionary) {
    w.put_len(dictionary.len());
    for feature in dictionary.iter() {
        w.put_str(&feature.name);
        let (code, extra) = feature.kind.to_code();
        w.put_u8(code);
        w.put_u64(extra);
        w.put_dtype(feature.dtype);
    }
}

fn decode_dictionary(r: &mut Reader<'_>) -> Result<DataDictionary> {
    let n = r.get_len()?;
    // Every descriptor takes at least 18 bytes
    if n.checked_mul(18).is_none_or(|size| size > r.remaining()) {
        return Err(Error::deserialization(format!(
            "truncated: {n} feature descriptors declared"
        )));
    }
    let mut features = Vec::with_capacity(n);
    for _ in 0..n {
        let name = r.get_string()?;
        let code = r.get_u8()?;
        let extra = r.get_u64()?;
        let kind = FeatureKind::from_code(code, extra)
            .ok_or_else(|| Error::deserialization(format!("unknown feature kind {code}")))?;
        let dtype = r.get_dtype()?;
        features.push(FeatureDescriptor { name, kind, dtype });
    }
    Ok(DataDictionary::from_features(features))
}

impl<T: Element> Serializable for NumericTable<T> {
    const TYPE_TAG: u16 = tags::NUMERIC_TABLE;
    const VERSION: u16 = 1;
    const NAME: &'static str = "numeric table";

    fn encode(&self, w: &mut Writer) {
        w.put_dtype(T::DTYPE);
        w.put_u8(layout_code(self.layout()));
        w.put_len(self.rows());
        w.put_len(self.cols());
        encode_dictionary(w, self.dictionary());
        if let Some(csr) = self.as_csr() {
            w.put_indices(csr.row_offsets());
            w.put_indices(csr.col_indices());
            w.put_slice(csr.values());
        } else if let Some(values) = self.dense_values() {
            w.put_slice(values);
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        r.expect_dtype::<T>()?;
        let layout = r.get_u8()?;
        let rows = r.get_len()?;
        let cols = r.get_len()?;
        let dictionary = decode_dictionary(r)?;
        let table = match layout {
            0 | 1 => {
                let values = r.get_vec::<T>()?;
                expect_len("table", values.len(), checked_numel(&[rows, cols])?)?;
                if layout == 0 {
                    NumericTable::from_row_major(values, rows, cols)?
                } else {
                    NumericTable::from_column_major(values, rows, cols)?
                }
            }
            2 => {
                let row_offsets = r.get_indices()?;
                let col_indices = r.get_indices()?;
                let values = r.get_vec::<T>()?;
                let csr = CsrData::new(row_offsets, col_indices, values, [rows, cols])
                    .map_err(|e| Error::deserialization(format!("invalid CSR arrays: {e}")))?;
                NumericTable::from_csr(csr)
            }
            code => {
                return Err(Error::deserialization(format!(
                    "unknown storage layout {code}"
                )));
            }
        };
        table
            .with_dictionary(dictionary)
            .map_err(|e| Error::deserialization(format!("invalid dictionary: {e}")))
    }

    fn declared_shape(&self) -> Vec<usize> {
        vec![self.rows(), self.cols()]
    }
}

impl<T: FloatElement> Serializable for NaiveBayesModel<T> {
    const TYPE_TAG: u16 = tags::NAIVE_BAYES_MODEL;
    const VERSION: u16 = 1;
    const NAME: &'static str = "naive Bayes model";

    fn encode(&self, w: &mut Writer) {
        self.log_priors().encode(w);
        self.log_theta().encode(w);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let log_priors = Tensor::decode(r)?;
        let log_theta = Tensor::decode(r)?;
        NaiveBayesModel::new(log_priors, log_theta)
            .map_err(|e| Error::deserialization(format!("inconsistent model: {e}")))
    }

    fn declared_shape(&self) -> Vec<usize> {
        vec![self.n_classes(), self.n_features()]
    }
}

impl<T: FloatElement> Serializable for NaiveBayesPartial<T> {
    const TYPE_TAG: u16 = tags::NAIVE_BAYES_PARTIAL;
    const VERSION: u16 = 1;
    const NAME: &'static str = "naive Bayes partial result";

    fn encode(&self, w: &mut Writer) {
        w.put_dtype(T::DTYPE);
        w.put_len(self.n_features);
        w.put_slice(&self.class_counts);
        w.put_slice(&self.feature_counts);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        r.expect_dtype::<T>()?;
        let n_features = r.get_len()?;
        let class_counts = r.get_vec::<T>()?;
        let feature_counts = r.get_vec::<T>()?;
        let expected = checked_numel(&[class_counts.len(), n_features])?;
        expect_len("feature counts", feature_counts.len(), expected)?;
        Ok(Self {
            n_features,
            class_counts,
            feature_counts,
        })
    }

    fn declared_shape(&self) -> Vec<usize> {
        vec![self.n_classes(), self.n_features]
    }
}

impl<T: FloatElement> Serializable for PcaPartial<T> {
    const TYPE_TAG: u16 = tags::PCA_PARTIAL;
    const VERSION: u16 = 1;
    const NAME: &'static str = "PCA partial result";

    fn encode(&self, w: &mut Writer) {
        w.put_dtype(T::DTYPE);
        w.put_u64(self.n_observations);
        w.put_slice(&self.means);
        w.put_slice(&self.crossproduct);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        r.expect_dtype::<T>()?;
        let n_observations = r.get_u64()?;
        let means = r.get_vec::<T>()?;
        let crossproduct = r.get_vec::<T>()?;
        let p = means.len();
        expect_len("cross-product", crossproduct.len(), checked_numel(&[p, p])?)?;
        Ok(Self {
            n_observations,
            means,
            crossproduct,
        })
    }

    fn declared_shape(&self) -> Vec<usize> {
        vec![self.n_features()]
    }
}

impl<T: FloatElement> Serializable for GbtModel<T> {
    const TYPE_TAG: u16 = tags::GBT_MODEL;
    const VERSION: u16 = 1;
    const NAME: &'static str = "gradient boosted trees model";

    fn encode(&self, w: &mut Writer) {
        w.put_dtype(T::DTYPE);
        w.put_len(self.n_features());
        w.put_value(self.base_score());
        w.put_len(self.n_trees());
        for tree in self.trees() {
            w.put_slice(&tree.feature);
            w.put_slice(&tree.threshold);
            w.put_slice(&tree.left);
            w.put_slice(&tree.value);
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        r.expect_dtype::<T>()?;
        let n_features = r.get_len()?;
        let base_score = r.get_value::<T>()?;
        let n_trees = r.get_len()?;
        // Every tree takes at least four length prefixes
        if n_trees.checked_mul(32).is_none_or(|size| size > r.remaining()) {
            return Err(Error::deserialization(format!(
                "truncated: {n_trees} trees declared"
            )));
        }
        let mut trees = Vec::with_capacity(n_trees);
        for _ in 0..n_trees {
            let feature = r.get_vec::<u32>()?;
            let threshold = r.get_vec::<T>()?;
            let left = r.get_vec::<u32>()?;
            let value = r.get_vec::<T>()?;
            let tree = RegressionTree::from_parts(feature, threshold, left, value)
                .map_err(|e| Error::deserialization(format!("invalid tree: {e}")))?;
            trees.push(tree);
        }
        GbtModel::new(n_features, base_score, trees)
            .map_err(|e| Error::deserialization(format!("inconsistent model: {e}")))
    }

    fn declared_shape(&self) -> Vec<usize> {
        vec![self.n_features()]
    }
}

#[cfg(test)]
mod tests {
    use super::super::{deserialize, deserialize_into, serialize};
    use super::*;

    #[test]
    fn test_declared_tensor_round_trips_unallocated() {
        let t = Tensor::<f32>::declare(&[2, 3]);
        let back: Tensor<f32> = deserialize(&serialize(&t)).unwrap();
        assert!(!back.is_allocated());
        assert_eq!(back.shape(), &[2, 3]);
    }

    #[test]
    fn test_precision_mismatch_is_rejected() {
        let t = Tensor::<f32>::from_vec(vec![1.0, 2.0], &[2]).unwrap();
        let err = deserialize::<Tensor<f64>>(&serialize(&t)).unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }));
    }

    #[test]
    fn test_table_layouts_round_trip() {
        let dense = NumericTable::from_column_major(vec![1.0f64, 2.0, 3.0, 4.0], 2, 2).unwrap();
        let back: NumericTable<f64> = deserialize(&serialize(&dense)).unwrap();
        assert_eq!(back, dense);

        let csr = CsrData::new(vec![0, 1, 1], vec![1], vec![5.0f32], [2, 3]).unwrap();
        let sparse = NumericTable::from_csr(csr);
        let back: NumericTable<f32> = deserialize(&serialize(&sparse)).unwrap();
        assert_eq!(back, sparse);
    }

    #[test]
    fn test_dictionary_survives() {
        let mut dictionary = DataDictionary::homogeneous(2, f64::DTYPE);
        dictionary
            .set(
                1,
                FeatureDescriptor {
                    name: "class".into(),
                    kind: FeatureKind::Categorical { n_categories: 4 },
                    dtype: f64::DTYPE,
                },
            )
            .unwrap();
        let table = NumericTable::from_row_major(vec![0.5f64, 1.0], 1, 2)
            .unwrap()
            .with_dictionary(dictionary)
            .unwrap();
        let back: NumericTable<f64> = deserialize(&serialize(&table)).unwrap();
        assert_eq!(back.dictionary(), table.dictionary());
    }

    #[test]
    fn test_deserialize_into_checks_declared_shape() {
        let partial = PcaPartial::<f64>::new(3);
        let bytes = serialize(&partial);
        let mut wrong = PcaPartial::<f64>::new(2);
        let err = deserialize_into(&mut wrong, &bytes).unwrap_err();
        assert!(matches!(err, Error::DeserializationMismatch { .. }));
        assert_eq!(wrong.n_features(), 2);

        let mut right = PcaPartial::<f64>::new(3);
        deserialize_into(&mut right, &bytes).unwrap();
    }

    #[test]
    fn test_wrong_type_tag() {
        let partial = NaiveBayesPartial::<f64>::new(2, 2);
        let err = deserialize::<PcaPartial<f64>>(&serialize(&partial)).unwrap_err();
        assert!(matches!(
            err,
            Error::TypeTagMismatch {
                expected: tags::PCA_PARTIAL,
                got: tags::NAIVE_BAYES_PARTIAL
            }
        ));
    }
}
