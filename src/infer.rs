//! Direct inference pipeline and request decoding helpers
//!
//! Decodes the wire `InferRequest` into named native tensors, resolving
//! absent names against the server defaults by position, and runs the
//! adapter without any caching. The cached pipeline in [`crate::cache`]
//! reuses the same helpers.

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::server::AppContext;
use crate::tensor::Tensor;
use crate::wire;
use std::collections::HashMap;

/// Resolve the requested output names, substituting server defaults for an
/// empty list. Individually empty names are rejected.
pub(crate) fn resolve_output_names(
    app: &AppContext,
    req: &wire::InferRequest<'_>,
) -> Result<Vec<String>> {
    let requested = req.output_names().map(|v| v.len()).unwrap_or(0);
    if requested == 0 {
        if app.default_outputs.is_empty() {
            return Err(Error::decode(
                "no default outputs available - please specify one or more outputs",
            ));
        }
        return Ok(app.default_outputs.clone());
    }
    let mut names = Vec::with_capacity(requested);
    for name in req.output_names().into_iter().flatten() {
        if name.is_empty() {
            return Err(Error::decode("empty output name"));
        }
        names.push(name.to_owned());
    }
    Ok(names)
}

/// Decode the input tensors with their resolved names, in request order
pub(crate) fn decode_inputs(
    app: &AppContext,
    req: &wire::InferRequest<'_>,
) -> Result<Vec<(String, Tensor)>> {
    let tensors = match req.input_tensors() {
        Some(tensors) => tensors,
        None => return Ok(Vec::new()),
    };
    let names = req.input_names();
    let mut inputs = Vec::with_capacity(tensors.len());
    for (i, wire_tensor) in tensors.iter().enumerate() {
        let mut name = names
            .filter(|n| i < n.len())
            .map(|n| n.get(i).to_owned())
            .unwrap_or_default();
        if name.is_empty() {
            name = app
                .default_inputs
                .get(i)
                .cloned()
                .ok_or_else(|| Error::decode(format!("no name for input at position {i}")))?;
        }
        inputs.push((name, Tensor::from_wire(wire_tensor)?));
    }
    Ok(inputs)
}

/// Run the adapter directly, bypassing the result cache
pub(crate) fn get_results(
    app: &AppContext,
    ctx: &mut RequestContext,
    req: &wire::InferRequest<'_>,
) -> Result<Vec<Tensor>> {
    let inputs: HashMap<String, Tensor> = decode_inputs(app, req)?.into_iter().collect();
    let output_names = resolve_output_names(app, req)?;
    (app.apply)(ctx, req.config().unwrap_or_default(), inputs, &output_names)
}
