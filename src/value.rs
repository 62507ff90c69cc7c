//! Conversion between native nested values and tensors
//!
//! The wire format carries flat payloads; adapters want ordinary nested
//! containers. [`TensorValue`] bridges the two with the rank and element
//! type fixed at the type level: it is implemented for the numeric scalar
//! types and `String` as leaves, and lifted through `Vec<T>` (variable
//! dimension, declared as `-1`) and `[T; N]` (fixed dimension, declared as
//! its literal size). Jagged nesting is detected at runtime and rejected.

use crate::error::{Error, Result};
use crate::tensor::{ElementType, Tensor};

/// Accumulator for a value's flattened payload
#[derive(Default)]
pub struct ValueSink {
    bytes: Vec<u8>,
    strings: Vec<String>,
}

/// Cursor over a tensor's payload during reconstruction
pub struct ValueSource<'a> {
    bytes: &'a [u8],
    strings: &'a [String],
}

impl<'a> ValueSource<'a> {
    fn take_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(Error::decode("tensor payload is shorter than its shape"));
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn take_string(&mut self) -> Result<String> {
        let (head, tail) = self
            .strings
            .split_first()
            .ok_or_else(|| Error::decode("tensor string table is shorter than its shape"))?;
        self.strings = tail;
        Ok(head.clone())
    }
}

/// A value with a tensor representation known at compile time
pub trait TensorValue: Sized {
    /// Number of sequence dimensions in this type
    const RANK: usize;

    /// Element type of the leaves
    fn dtype() -> ElementType;

    /// Append the declared shape of this type: `-1` per `Vec` dimension,
    /// the literal length per fixed-size array dimension
    fn push_declared_shape(shape: &mut Vec<i64>);

    /// Record this value's dimensions into `shape`, failing on jagged
    /// nesting (a sibling of different length at the same depth)
    fn measure(&self, shape: &mut Vec<i64>, depth: usize) -> Result<()>;

    /// Append this value's leaves to the sink in row-major order
    fn encode(&self, sink: &mut ValueSink);

    /// Rebuild a value of this type from a payload cursor
    fn decode(shape: &[i64], src: &mut ValueSource<'_>) -> Result<Self>;
}

macro_rules! scalar_tensor_value {
    ($ty:ty, $dtype:expr, $size:expr) => {
        impl TensorValue for $ty {
            const RANK: usize = 0;

            fn dtype() -> ElementType {
                $dtype
            }

            fn push_declared_shape(_shape: &mut Vec<i64>) {}

            fn measure(&self, _shape: &mut Vec<i64>, _depth: usize) -> Result<()> {
                Ok(())
            }

            fn encode(&self, sink: &mut ValueSink) {
                sink.bytes.extend_from_slice(&self.to_le_bytes());
            }

            fn decode(_shape: &[i64], src: &mut ValueSource<'_>) -> Result<Self> {
                let raw = src.take_bytes($size)?;
                let raw = raw
                    .try_into()
                    .map_err(|_| Error::decode("truncated scalar"))?;
                Ok(<$ty>::from_le_bytes(raw))
            }
        }
    };
}

scalar_tensor_value!(u8, ElementType::Uint8, 1);
scalar_tensor_value!(i8, ElementType::Int8, 1);
scalar_tensor_value!(u16, ElementType::Uint16, 2);
scalar_tensor_value!(i16, ElementType::Int16, 2);
scalar_tensor_value!(u32, ElementType::Uint32, 4);
scalar_tensor_value!(i32, ElementType::Int32, 4);
scalar_tensor_value!(u64, ElementType::Uint64, 8);
scalar_tensor_value!(i64, ElementType::Int64, 8);
scalar_tensor_value!(f32, ElementType::Float32, 4);
scalar_tensor_value!(f64, ElementType::Float64, 8);

impl TensorValue for String {
    const RANK: usize = 0;

    fn dtype() -> ElementType {
        ElementType::String
    }

    fn push_declared_shape(_shape: &mut Vec<i64>) {}

    fn measure(&self, _shape: &mut Vec<i64>, _depth: usize) -> Result<()> {
        Ok(())
    }

    fn encode(&self, sink: &mut ValueSink) {
        sink.strings.push(self.clone());
    }

    fn decode(_shape: &[i64], src: &mut ValueSource<'_>) -> Result<Self> {
        src.take_string()
    }
}

impl<T: TensorValue> TensorValue for Vec<T> {
    const RANK: usize = T::RANK + 1;

    fn dtype() -> ElementType {
        T::dtype()
    }

    fn push_declared_shape(shape: &mut Vec<i64>) {
        shape.push(-1);
        T::push_declared_shape(shape);
    }

    fn measure(&self, shape: &mut Vec<i64>, depth: usize) -> Result<()> {
        let len = self.len() as i64;
        if shape.len() == depth {
            shape.push(len);
        } else if shape[depth] != len {
            return Err(Error::shape_mismatch(format!(
                "jagged nested sequence: expected length {} at depth {}, found {}",
                shape[depth], depth, len
            )));
        }
        for child in self {
            child.measure(shape, depth + 1)?;
        }
        Ok(())
    }

    fn encode(&self, sink: &mut ValueSink) {
        for child in self {
            child.encode(sink);
        }
    }

    fn decode(shape: &[i64], src: &mut ValueSource<'_>) -> Result<Self> {
        let (&n, rest) = shape
            .split_first()
            .ok_or_else(|| Error::shape_mismatch("tensor rank is smaller than the value rank"))?;
        (0..n).map(|_| T::decode(rest, src)).collect()
    }
}

impl<T: TensorValue, const N: usize> TensorValue for [T; N] {
    const RANK: usize = T::RANK + 1;

    fn dtype() -> ElementType {
        T::dtype()
    }

    fn push_declared_shape(shape: &mut Vec<i64>) {
        shape.push(N as i64);
        T::push_declared_shape(shape);
    }

    fn measure(&self, shape: &mut Vec<i64>, depth: usize) -> Result<()> {
        let len = N as i64;
        if shape.len() == depth {
            shape.push(len);
        } else if shape[depth] != len {
            return Err(Error::shape_mismatch(format!(
                "jagged nested sequence: expected length {} at depth {}, found {}",
                shape[depth], depth, len
            )));
        }
        for child in self {
            child.measure(shape, depth + 1)?;
        }
        Ok(())
    }

    fn encode(&self, sink: &mut ValueSink) {
        for child in self {
            child.encode(sink);
        }
    }

    fn decode(shape: &[i64], src: &mut ValueSource<'_>) -> Result<Self> {
        let (&n, rest) = shape
            .split_first()
            .ok_or_else(|| Error::shape_mismatch("tensor rank is smaller than the value rank"))?;
        if n as usize != N {
            return Err(Error::shape_mismatch(format!(
                "dimension {} does not fit a fixed array of {}",
                n, N
            )));
        }
        let items: Vec<T> = (0..N)
            .map(|_| T::decode(rest, src))
            .collect::<Result<_>>()?;
        items
            .try_into()
            .map_err(|_| Error::shape_mismatch("fixed array length"))
    }
}

/// Infer shape and element type from a nested value and serialize it
pub fn from_value<V: TensorValue>(value: &V) -> Result<Tensor> {
    if V::RANK == 0 {
        return Err(Error::shape_mismatch(
            "scalar values cannot form a tensor; wrap them in a sequence",
        ));
    }
    let mut shape = Vec::with_capacity(V::RANK);
    value.measure(&mut shape, 0)?;
    // empty outer sequences stop the walk early; the remaining dims are 0
    while shape.len() < V::RANK {
        shape.push(0);
    }
    let mut sink = ValueSink::default();
    value.encode(&mut sink);
    if V::dtype() == ElementType::String {
        Tensor::from_strings(sink.strings, shape)
    } else {
        Tensor::from_bytes(sink.bytes, shape, V::dtype())
    }
}

/// Rebuild a nested value of type `V` from a tensor
pub fn to_value<V: TensorValue>(tensor: &Tensor) -> Result<V> {
    if tensor.dtype() != V::dtype() {
        return Err(Error::decode(format!(
            "tensor of type {:?} cannot convert to a {:?} value",
            tensor.dtype(),
            V::dtype()
        )));
    }
    if tensor.shape().len() != V::RANK {
        return Err(Error::shape_mismatch(format!(
            "tensor of rank {} cannot convert to a rank-{} value",
            tensor.shape().len(),
            V::RANK
        )));
    }
    let mut src = ValueSource {
        bytes: tensor.bytes(),
        strings: tensor.strings(),
    };
    V::decode(tensor.shape(), &mut src)
}

/// The declared shape of `V`: `-1` for variable dims, literal sizes for
/// fixed arrays
pub fn declared_shape<V: TensorValue>() -> Vec<i64> {
    let mut shape = Vec::with_capacity(V::RANK);
    V::push_declared_shape(&mut shape);
    shape
}
