//! Auxiliary state handed from a forward pass to its backward pass

use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use std::fmt;
use std::marker::PhantomData;

/// Closed enumeration of one layer's auxiliary slots
pub trait AuxSlot: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Layer the slots belong to
    const LAYER: &'static str;
    /// Every slot, in index order
    const ALL: &'static [Self];
    /// Slot holding the weights used by the forward pass, if the layer has any
    const WEIGHTS: Option<Self> = None;
    /// Slot holding the biases used by the forward pass, if the layer has any
    const BIASES: Option<Self> = None;

    /// Position of this slot in [`AuxSlot::ALL`]
    fn index(self) -> usize;

    /// Slot name used in errors
    fn name(self) -> &'static str;
}

/// Typed arena of auxiliary tensors keyed by the layer's own slot enum
///
/// Slots of another layer cannot be used as keys, so a backward pass can
/// only fail on a *missing* slot, never on a mistyped one. Tensors are
/// shared with the forward result, not copied.
pub struct LayerData<T: Element, S: AuxSlot> {
    slots: Vec<Option<Tensor<T>>>,
    _slot: PhantomData<S>,
}

impl<T: Element, S: AuxSlot> LayerData<T, S> {
    /// Empty layer data
    pub fn new() -> Self {
        Self {
            slots: vec![None; S::ALL.len()],
            _slot: PhantomData,
        }
    }

    /// Store `tensor` in `slot`
    pub fn insert(&mut self, slot: S, tensor: Tensor<T>) {
        self.slots[slot.index()] = Some(tensor);
    }

    /// Tensor in `slot`, if present
    pub fn get(&self, slot: S) -> Option<&Tensor<T>> {
        self.slots[slot.index()].as_ref()
    }

    /// Tensor in `slot`, or [`Error::MissingAuxiliaryData`]
    pub fn require(&self, slot: S) -> Result<&Tensor<T>> {
        self.get(slot).ok_or(Error::MissingAuxiliaryData {
            layer: S::LAYER,
            slot: slot.name(),
        })
    }

    /// Remove and return the tensor in `slot`
    pub fn take(&mut self, slot: S) -> Option<Tensor<T>> {
        self.slots[slot.index()].take()
    }

    /// Drop every slot
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    /// True when no slot is populated
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Populated slots in index order
    pub fn iter(&self) -> impl Iterator<Item = (S, &Tensor<T>)> {
        S::ALL
            .iter()
            .zip(&self.slots)
            .filter_map(|(&s, t)| t.as_ref().map(|t| (s, t)))
    }
}

impl<T: Element, S: AuxSlot> Default for LayerData<T, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element, S: AuxSlot> Clone for LayerData<T, S> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            _slot: PhantomData,
        }
    }
}

impl<T: Element, S: AuxSlot> fmt::Debug for LayerData<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(s, t)| (s, t.shape().to_vec())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    enum TestAux {
        Data,
        Weights,
    }

    impl AuxSlot for TestAux {
        const LAYER: &'static str = "test";
        const ALL: &'static [Self] = &[TestAux::Data, TestAux::Weights];

        fn index(self) -> usize {
            self as usize
        }

        fn name(self) -> &'static str {
            match self {
                TestAux::Data => "auxData",
                TestAux::Weights => "auxWeights",
            }
        }
    }

    #[test]
    fn test_require_missing_slot() {
        let data = LayerData::<f32, TestAux>::new();
        assert!(data.is_empty());
        let err = data.require(TestAux::Weights).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingAuxiliaryData {
                layer: "test",
                slot: "auxWeights"
            }
        ));
    }

    #[test]
    fn test_insert_shares_storage() {
        let t = Tensor::from_vec(vec![1.0f64, 2.0], &[2]).unwrap();
        let mut data = LayerData::<f64, TestAux>::new();
        data.insert(TestAux::Data, t.clone());
        assert!(data.require(TestAux::Data).unwrap().shares_storage(&t));
        assert_eq!(data.iter().count(), 1);
        data.clear();
        assert!(data.is_empty());
    }
}
