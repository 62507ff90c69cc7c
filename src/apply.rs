//! The typed-apply shim
//!
//! Adapters write an ordinary typed function
//! `Fn(&mut RequestContext, C, I) -> Result<O>` over nested native values;
//! this module wraps it into the uniform [`Applier`] interface the server
//! and cache speak, inferring element types and declared shapes from the
//! signature. Adapter panics are caught and surfaced as `ApplyFailed`.

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::metadata::{IoMetadata, Metadata};
use crate::server::{AppContext, GetHandler, ServeOptions};
use crate::tensor::{ElementType, Tensor};
use crate::value::{declared_shape, from_value, to_value, TensorValue};
use actix_web::HttpResponse;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

/// The uniform apply interface: named input tensors in, output tensors out
pub type ApplyFn = dyn Fn(&mut RequestContext, &str, HashMap<String, Tensor>, &[String]) -> Result<Vec<Tensor>>
    + Send
    + Sync;

/// Shared handle to an apply function
pub type Applier = Arc<ApplyFn>;

/// Parse the free-form request config string into the adapter's config type
pub trait FromConfig: Sized {
    fn from_config(raw: &str) -> Result<Self>;
}

impl FromConfig for String {
    fn from_config(raw: &str) -> Result<Self> {
        Ok(raw.to_owned())
    }
}

impl FromConfig for () {
    fn from_config(_raw: &str) -> Result<Self> {
        Ok(())
    }
}

/// Wrapper marking a config type that is parsed from JSON
pub struct Json<T>(pub T);

impl<T: DeserializeOwned> FromConfig for Json<T> {
    fn from_config(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map(Json)
            .map_err(|e| Error::decode(format!("config is not valid JSON: {e}")))
    }
}

/// A tuple of input values extracted from the request's named tensors
pub trait ApplyInputs: Sized {
    const COUNT: usize;
    fn dtypes() -> Vec<ElementType>;
    fn declared_shapes() -> Vec<Vec<i64>>;
    fn from_tensors(tensors: &[Tensor]) -> Result<Self>;
}

macro_rules! impl_apply_inputs {
    ($count:expr; $( $ty:ident => $idx:tt ),+) => {
        impl<$( $ty: TensorValue ),+> ApplyInputs for ($( $ty, )+) {
            const COUNT: usize = $count;

            fn dtypes() -> Vec<ElementType> {
                vec![$( $ty::dtype() ),+]
            }

            fn declared_shapes() -> Vec<Vec<i64>> {
                vec![$( declared_shape::<$ty>() ),+]
            }

            fn from_tensors(tensors: &[Tensor]) -> Result<Self> {
                if tensors.len() != $count {
                    return Err(Error::decode(format!(
                        "{} inputs sent but {} are required",
                        tensors.len(),
                        $count
                    )));
                }
                Ok(($( to_value::<$ty>(&tensors[$idx])?, )+))
            }
        }
    };
}

impl_apply_inputs!(1; A => 0);
impl_apply_inputs!(2; A => 0, B => 1);
impl_apply_inputs!(3; A => 0, B => 1, C => 2);
impl_apply_inputs!(4; A => 0, B => 1, C => 2, D => 3);

/// A tuple of output values converted back into tensors
pub trait ApplyOutputs {
    const COUNT: usize;
    fn dtypes() -> Vec<ElementType>;
    fn declared_shapes() -> Vec<Vec<i64>>;
    fn into_tensors(self) -> Result<Vec<Tensor>>;
}

macro_rules! impl_apply_outputs {
    ($count:expr; $( $ty:ident / $var:ident ),+) => {
        impl<$( $ty: TensorValue ),+> ApplyOutputs for ($( $ty, )+) {
            const COUNT: usize = $count;

            fn dtypes() -> Vec<ElementType> {
                vec![$( $ty::dtype() ),+]
            }

            fn declared_shapes() -> Vec<Vec<i64>> {
                vec![$( declared_shape::<$ty>() ),+]
            }

            fn into_tensors(self) -> Result<Vec<Tensor>> {
                let ($( $var, )+) = self;
                Ok(vec![$( from_value(&$var)? ),+])
            }
        }
    };
}

impl_apply_outputs!(1; A / a);
impl_apply_outputs!(2; A / a, B / b);
impl_apply_outputs!(3; A / a, B / b, C / c);

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

fn check_explicit_shape(name: &str, explicit: Option<&Vec<i64>>, tensor: &Tensor) -> Result<()> {
    let Some(want) = explicit else {
        return Ok(());
    };
    if want.is_empty() {
        return Ok(());
    }
    let mismatch = want.len() != tensor.shape().len()
        || want
            .iter()
            .zip(tensor.shape())
            .any(|(&w, &got)| w != -1 && w != got);
    if mismatch {
        return Err(Error::shape_mismatch(format!(
            "{name} doesn't have shape {want:?}"
        )));
    }
    Ok(())
}

/// Wrap a typed adapter function into [`ServeOptions`]
///
/// Default input names are `input0 … input{n-1}`, default output names
/// `output0 … output{m-1}`. Shapes inferred from the signature may be
/// overridden per position with `in_shapes`/`out_shapes`; explicit
/// input dimensions other than `-1` are enforced against each request.
/// The generated GET handler serves the metadata descriptor as JSON.
pub fn build_simple_apply<C, I, O, F>(
    apply: F,
    in_shapes: Option<Vec<Vec<i64>>>,
    out_shapes: Option<Vec<Vec<i64>>>,
) -> ServeOptions
where
    C: FromConfig + 'static,
    I: ApplyInputs + 'static,
    O: ApplyOutputs + 'static,
    F: Fn(&mut RequestContext, C, I) -> Result<O> + Send + Sync + 'static,
{
    let explicit_in: Vec<Option<Vec<i64>>> = (0..I::COUNT)
        .map(|i| in_shapes.as_ref().and_then(|s| s.get(i)).cloned())
        .collect();

    let declared_in = I::declared_shapes();
    let declared_out = O::declared_shapes();
    let in_dtypes = I::dtypes();
    let out_dtypes = O::dtypes();

    let default_inputs: Vec<String> = (0..I::COUNT).map(|i| format!("input{i}")).collect();
    let default_outputs: Vec<String> = (0..O::COUNT).map(|i| format!("output{i}")).collect();

    let mut meta = Metadata {
        name: "simple-model".to_owned(),
        version: String::new(),
        server: format!("modelpipe/{}", env!("CARGO_PKG_VERSION")),
        description:
            "A modelpipe server wrapping a typed apply function with automatic value conversion."
                .to_owned(),
        inputs: Vec::with_capacity(I::COUNT),
        outputs: Vec::with_capacity(O::COUNT),
    };
    for (i, name) in default_inputs.iter().enumerate() {
        let shape = explicit_in[i].clone().unwrap_or_else(|| declared_in[i].clone());
        meta.inputs.push(IoMetadata::new(name, shape, in_dtypes[i]));
    }
    for (i, name) in default_outputs.iter().enumerate() {
        let shape = out_shapes
            .as_ref()
            .and_then(|s| s.get(i))
            .cloned()
            .unwrap_or_else(|| declared_out[i].clone());
        meta.outputs.push(IoMetadata::new(name, shape, out_dtypes[i]));
    }

    let expected_names = default_inputs.clone();
    let applier: Applier = Arc::new(move |ctx, config, mut inputs, _output_names| {
        if inputs.len() != I::COUNT {
            return Err(Error::decode(format!(
                "{} inputs sent but {} are required",
                inputs.len(),
                I::COUNT
            )));
        }
        let mut tensors = Vec::with_capacity(I::COUNT);
        for (i, name) in expected_names.iter().enumerate() {
            let tensor = inputs
                .remove(name)
                .ok_or_else(|| Error::decode(format!("missing input '{name}'")))?;
            check_explicit_shape(name, explicit_in[i].as_ref(), &tensor)?;
            tensors.push(tensor);
        }
        if let Some(stray) = inputs.keys().next() {
            return Err(Error::decode(format!("unexpected input '{stray}' was sent")));
        }

        let config = C::from_config(config)?;
        let values = I::from_tensors(&tensors)?;

        match catch_unwind(AssertUnwindSafe(|| apply(ctx, config, values))) {
            Ok(Ok(outputs)) => outputs.into_tensors(),
            Ok(Err(err)) => Err(err),
            Err(payload) => {
                debug!(
                    "adapter panic backtrace:\n{}",
                    std::backtrace::Backtrace::force_capture()
                );
                Err(Error::apply_failed(format!(
                    "apply panicked: {}",
                    panic_message(&payload)
                )))
            }
        }
    });

    let get_handler: GetHandler = Arc::new(|app: &AppContext| {
        let body = serde_json::to_string_pretty(&app.meta)?;
        Ok(HttpResponse::Ok()
            .content_type("application/json")
            .body(body))
    });

    ServeOptions {
        meta,
        default_inputs,
        default_outputs,
        apply: applier,
        get_handler: Some(get_handler),
        ..ServeOptions::default()
    }
}
