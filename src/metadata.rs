//! Model metadata descriptors
//!
//! The owned counterparts of the wire `MetadataResponse`/`IOMetadata`
//! tables, also serde-serializable so adapters can expose them as JSON
//! from a GET handler.

use crate::tensor::ElementType;
use crate::wire;
use flatbuffers::{FlatBufferBuilder, WIPOffset};
use serde::{Deserialize, Serialize};

/// Description of one model input or output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IoMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Row-major shape; `-1` marks a variable dimension
    pub shape: Vec<i64>,
    pub dtype: u8,
}

/// Description of the model being served
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub description: String,
    pub inputs: Vec<IoMetadata>,
    pub outputs: Vec<IoMetadata>,
}

impl IoMetadata {
    pub fn new(name: impl Into<String>, shape: Vec<i64>, dtype: ElementType) -> Self {
        IoMetadata {
            name: name.into(),
            description: String::new(),
            shape,
            dtype: dtype as u8,
        }
    }

    fn build<'b>(&self, fbb: &mut FlatBufferBuilder<'b>) -> WIPOffset<wire::IOMetadata<'b>> {
        let name = fbb.create_string(&self.name);
        let description = fbb.create_string(&self.description);
        let shape = fbb.create_vector(&self.shape);
        wire::IOMetadata::create(
            fbb,
            &wire::IOMetadataArgs {
                name: Some(name),
                description: Some(description),
                shape: Some(shape),
                type_: self.dtype,
            },
        )
    }

    fn from_wire(io: wire::IOMetadata<'_>) -> Self {
        IoMetadata {
            name: io.name().unwrap_or_default().to_owned(),
            description: io.description().unwrap_or_default().to_owned(),
            shape: io.shape().map(|s| s.iter().collect()).unwrap_or_default(),
            dtype: io.type_(),
        }
    }
}

impl Metadata {
    /// Serialize into a builder, returning the table offset
    pub fn build<'b>(&self, fbb: &mut FlatBufferBuilder<'b>) -> WIPOffset<wire::MetadataResponse<'b>> {
        let input_offsets: Vec<_> = self.inputs.iter().map(|io| io.build(fbb)).collect();
        let output_offsets: Vec<_> = self.outputs.iter().map(|io| io.build(fbb)).collect();
        let inputs = fbb.create_vector(&input_offsets);
        let outputs = fbb.create_vector(&output_offsets);
        let name = fbb.create_string(&self.name);
        let version = fbb.create_string(&self.version);
        let server = fbb.create_string(&self.server);
        let description = fbb.create_string(&self.description);
        wire::MetadataResponse::create(
            fbb,
            &wire::MetadataResponseArgs {
                name: Some(name),
                version: Some(version),
                server: Some(server),
                description: Some(description),
                inputs: Some(inputs),
                outputs: Some(outputs),
            },
        )
    }

    /// A finished wire buffer holding this metadata response
    pub fn to_response_bytes(&self) -> Vec<u8> {
        let mut fbb = FlatBufferBuilder::with_capacity(1024);
        let offset = self.build(&mut fbb);
        fbb.finish(offset, None);
        fbb.finished_data().to_vec()
    }

    pub fn from_wire(m: wire::MetadataResponse<'_>) -> Self {
        Metadata {
            name: m.name().unwrap_or_default().to_owned(),
            version: m.version().unwrap_or_default().to_owned(),
            server: m.server().unwrap_or_default().to_owned(),
            description: m.description().unwrap_or_default().to_owned(),
            inputs: m
                .inputs()
                .map(|v| v.iter().map(IoMetadata::from_wire).collect())
                .unwrap_or_default(),
            outputs: m
                .outputs()
                .map(|v| v.iter().map(IoMetadata::from_wire).collect())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_wire_round_trip() {
        let meta = Metadata {
            name: "squeeze".into(),
            version: "1.2.0".into(),
            server: "modelpipe/0.1.0".into(),
            description: "an image classifier".into(),
            inputs: vec![IoMetadata::new("input0", vec![-1, 224, 224, 3], ElementType::Float32)],
            outputs: vec![IoMetadata::new("output0", vec![-1, 1000], ElementType::Float32)],
        };
        let bytes = meta.to_response_bytes();
        let back = Metadata::from_wire(wire::root_as_metadata_response(&bytes).unwrap());
        assert_eq!(back.name, "squeeze");
        assert_eq!(back.version, "1.2.0");
        assert_eq!(back.inputs.len(), 1);
        assert_eq!(back.inputs[0].shape, vec![-1, 224, 224, 3]);
        assert_eq!(back.outputs[0].dtype, ElementType::Float32 as u8);
    }

    #[test]
    fn test_metadata_serializes_to_json() {
        let meta = Metadata {
            name: "m".into(),
            ..Default::default()
        };
        let js = serde_json::to_string_pretty(&meta).unwrap();
        assert!(js.contains("\"name\": \"m\""));
    }
}
