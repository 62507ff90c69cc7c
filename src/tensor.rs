//! Native tensor representation
//!
//! [`Tensor`] is the owned, easy-to-use counterpart of the wire table: an
//! element type tag, a row-major shape, and either one contiguous byte
//! payload (numeric types, little-endian) or a string table. Constructors
//! validate the payload length against the shape so a `Tensor` in hand is
//! always internally consistent.

use crate::error::{Error, Result};
use crate::wire;
use flatbuffers::{FlatBufferBuilder, WIPOffset};
use serde::{Deserialize, Serialize};

/// Element types carried on the wire, with stable ordinals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ElementType {
    Null = 0,
    Uint8 = 1,
    Int8 = 2,
    Uint16 = 3,
    Int16 = 4,
    Uint32 = 5,
    Int32 = 6,
    Uint64 = 7,
    Int64 = 8,
    Float16 = 9,
    Float32 = 10,
    Float64 = 11,
    String = 12,
}

impl ElementType {
    /// Element size in bytes, or `None` for `Null` and `String`
    pub fn size(self) -> Option<usize> {
        match self {
            ElementType::Uint8 | ElementType::Int8 => Some(1),
            ElementType::Uint16 | ElementType::Int16 | ElementType::Float16 => Some(2),
            ElementType::Uint32 | ElementType::Int32 | ElementType::Float32 => Some(4),
            ElementType::Uint64 | ElementType::Int64 | ElementType::Float64 => Some(8),
            ElementType::Null | ElementType::String => None,
        }
    }

    pub fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => ElementType::Null,
            1 => ElementType::Uint8,
            2 => ElementType::Int8,
            3 => ElementType::Uint16,
            4 => ElementType::Int16,
            5 => ElementType::Uint32,
            6 => ElementType::Int32,
            7 => ElementType::Uint64,
            8 => ElementType::Int64,
            9 => ElementType::Float16,
            10 => ElementType::Float32,
            11 => ElementType::Float64,
            12 => ElementType::String,
            other => return Err(Error::UnknownType(other)),
        })
    }
}

/// Tensor payload: numeric bytes or a string table
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Bytes(Vec<u8>),
    Strings(Vec<String>),
}

/// An owned tensor with validated shape and payload
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: ElementType,
    shape: Vec<i64>,
    data: TensorData,
}

/// The logical element count of a shape. An empty shape holds zero
/// elements (a rank-0 tensor carries no payload on this wire format).
pub fn elem_count(shape: &[i64]) -> usize {
    if shape.is_empty() {
        return 0;
    }
    shape.iter().product::<i64>().max(0) as usize
}

impl Tensor {
    /// Build a numeric tensor from a pre-laid-out little-endian payload
    pub fn from_bytes(data: Vec<u8>, shape: Vec<i64>, dtype: ElementType) -> Result<Self> {
        let size = match dtype.size() {
            Some(size) => size,
            None => return Err(Error::UnknownType(dtype as u8)),
        };
        let expected = elem_count(&shape) * size;
        if data.len() != expected {
            return Err(Error::shape_mismatch(format!(
                "payload of {} bytes does not match shape {:?} of type {:?} ({} bytes)",
                data.len(),
                shape,
                dtype,
                expected
            )));
        }
        Ok(Tensor {
            dtype,
            shape,
            data: TensorData::Bytes(data),
        })
    }

    /// Build a string tensor
    pub fn from_strings(strings: Vec<String>, shape: Vec<i64>) -> Result<Self> {
        let expected = elem_count(&shape);
        if strings.len() != expected {
            return Err(Error::shape_mismatch(format!(
                "{} strings do not match shape {:?} ({} elements)",
                strings.len(),
                shape,
                expected
            )));
        }
        Ok(Tensor {
            dtype: ElementType::String,
            shape,
            data: TensorData::Strings(strings),
        })
    }

    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    /// The numeric payload; empty for string tensors
    pub fn bytes(&self) -> &[u8] {
        match &self.data {
            TensorData::Bytes(b) => b,
            TensorData::Strings(_) => &[],
        }
    }

    /// The string table; empty for numeric tensors
    pub fn strings(&self) -> &[String] {
        match &self.data {
            TensorData::Bytes(_) => &[],
            TensorData::Strings(s) => s,
        }
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Decode a tensor out of its verified wire table
    pub fn from_wire(t: wire::Tensor<'_>) -> Result<Self> {
        let dtype = ElementType::from_u8(t.type_())?;
        let shape: Vec<i64> = t.shape().map(|s| s.iter().collect()).unwrap_or_default();
        if dtype == ElementType::String {
            let strings: Vec<String> = t
                .string_val()
                .map(|v| v.iter().map(str::to_owned).collect())
                .unwrap_or_default();
            Tensor::from_strings(strings, shape)
        } else {
            let data = t.data().map(|d| d.bytes().to_vec()).unwrap_or_default();
            Tensor::from_bytes(data, shape, dtype)
        }
    }

    /// Serialize into a builder, returning the table offset
    pub fn build<'b>(&self, fbb: &mut FlatBufferBuilder<'b>) -> WIPOffset<wire::Tensor<'b>> {
        let shape = fbb.create_vector(&self.shape);
        match &self.data {
            TensorData::Bytes(bytes) => {
                let data = fbb.create_vector(bytes);
                wire::Tensor::create(
                    fbb,
                    &wire::TensorArgs {
                        type_: self.dtype as u8,
                        shape: Some(shape),
                        data: Some(data),
                        string_val: None,
                    },
                )
            }
            TensorData::Strings(strings) => {
                let offsets: Vec<_> = strings.iter().map(|s| fbb.create_string(s)).collect();
                let string_val = fbb.create_vector(&offsets);
                wire::Tensor::create(
                    fbb,
                    &wire::TensorArgs {
                        type_: self.dtype as u8,
                        shape: Some(shape),
                        data: None,
                        string_val: Some(string_val),
                    },
                )
            }
        }
    }
}
