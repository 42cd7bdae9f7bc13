//! Execution runtime for loaded models
//!
//! The registry talks to models only through [`ExecutionBackend`], so the
//! ONNX Runtime session can be swapped for any engine that takes one f32
//! tensor and returns one f32 tensor.

use crate::error::AgrivResult;
use ndarray::{ArrayD, ArrayView4, Array4};
use serde::{Deserialize, Serialize};

pub mod inference;

/// Name and declared shape of a model input or output (-1 = dynamic)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<i64>,
}

impl TensorInfo {
    pub fn new(name: impl Into<String>, shape: impl Into<Vec<i64>>) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
        }
    }

    /// Number of values per batch item, when every non-batch dimension is
    /// static. `[N, C]` and `[N, C, 1, 1]` both give `C`.
    pub fn values_per_item(&self) -> Option<usize> {
        match self.shape.split_first() {
            Some((_, rest)) if !rest.is_empty() => rest
                .iter()
                .try_fold(1usize, |acc, &d| (d >= 0).then(|| acc * d as usize)),
            _ => None,
        }
    }

    /// Whether `shape` agrees with every static dimension of the declaration
    pub fn accepts(&self, shape: &[usize]) -> bool {
        self.shape.len() == shape.len()
            && self
                .shape
                .iter()
                .zip(shape)
                .all(|(&declared, &actual)| declared < 0 || declared as usize == actual)
    }
}

/// A loaded model that can run a forward pass
pub trait ExecutionBackend: Send + Sync {
    /// Declared input tensor
    fn input(&self) -> &TensorInfo;

    /// Declared output tensor
    fn output(&self) -> &TensorInfo;

    /// Run one forward pass
    fn run(&self, input: ArrayD<f32>) -> AgrivResult<ArrayD<f32>>;
}

/// Position of the colour channel in a 4-D image tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
    /// (N, H, W, C)
    ChannelsLast,
    /// (N, C, H, W)
    ChannelsFirst,
}

impl TensorLayout {
    /// Resolve the layout a model expects from its declared input shape.
    ///
    /// Graphs with no usable hint get channels-first, the default of the
    /// common conversion tools.
    pub fn from_declared_shape(shape: &[i64]) -> Self {
        match shape {
            [_, 3, _, last] if *last != 3 => Self::ChannelsFirst,
            [_, _, _, 3] => Self::ChannelsLast,
            _ => Self::ChannelsFirst,
        }
    }

    /// Rearrange a channels-last tensor into this layout
    pub fn arrange(&self, nhwc: Array4<f32>) -> ArrayD<f32> {
        match self {
            Self::ChannelsLast => nhwc.into_dyn(),
            Self::ChannelsFirst => nhwc
                .permuted_axes([0, 3, 1, 2])
                .as_standard_layout()
                .into_owned()
                .into_dyn(),
        }
    }
}

/// Numeric element types accepted as model input
pub trait TensorElement: Copy {
    fn to_f32(self) -> f32;
}

macro_rules! impl_tensor_element {
    ($($t:ty),*) => {
        $(impl TensorElement for $t {
            #[inline]
            fn to_f32(self) -> f32 {
                self as f32
            }
        })*
    };
}

impl_tensor_element!(f32, f64, u8, u16, i32, i64);

/// Cast any supported element type to f32
pub fn to_f32_tensor<T: TensorElement>(tensor: ArrayView4<'_, T>) -> Array4<f32> {
    tensor.mapv(TensorElement::to_f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_layout_resolution() {
        assert_eq!(
            TensorLayout::from_declared_shape(&[1, 3, 224, 224]),
            TensorLayout::ChannelsFirst
        );
        assert_eq!(
            TensorLayout::from_declared_shape(&[-1, 224, 224, 3]),
            TensorLayout::ChannelsLast
        );
        assert_eq!(
            TensorLayout::from_declared_shape(&[-1, -1, -1, -1]),
            TensorLayout::ChannelsFirst
        );
    }

    #[test]
    fn test_channels_first_transpose() {
        let mut nhwc = Array4::<f32>::zeros((1, 2, 2, 3));
        nhwc[[0, 1, 0, 2]] = 7.0;

        let nchw = TensorLayout::ChannelsFirst.arrange(nhwc);
        assert_eq!(nchw.shape(), &[1, 3, 2, 2]);
        assert_eq!(nchw[[0, 2, 1, 0]], 7.0);
    }

    #[test]
    fn test_accepts_dynamic_dims() {
        let info = TensorInfo::new("input", vec![-1, 3, 224, 224]);
        assert!(info.accepts(&[1, 3, 224, 224]));
        assert!(!info.accepts(&[1, 224, 224, 3]));
        assert!(!info.accepts(&[3, 224, 224]));
        assert_eq!(TensorInfo::new("out", vec![-1, 3]).values_per_item(), Some(3));
        assert_eq!(TensorInfo::new("out", vec![-1, 3, 1, 1]).values_per_item(), Some(3));
        assert_eq!(TensorInfo::new("out", vec![-1, -1]).values_per_item(), None);
        assert_eq!(TensorInfo::new("out", vec![-1, 3, -1]).values_per_item(), None);
        assert_eq!(TensorInfo::new("out", vec![-1]).values_per_item(), None);
    }

    #[test]
    fn test_cast_to_f32() {
        let bytes = Array4::<u8>::from_elem((1, 1, 1, 3), 200);
        let cast = to_f32_tensor(bytes.view());
        assert!(cast.iter().all(|&v| v == 200.0));
    }
}
