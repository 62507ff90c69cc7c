//! A model-serving framework with a content-addressed row cache
//!
//! modelpipe exposes adapter-supplied `apply` functions (a runtime binding,
//! a batching proxy, an identity echo) as a uniform remote-inference
//! protocol over tensor-typed inputs and outputs. Between request decoding
//! and the adapter sits a row-wise result cache: each batch row is keyed by
//! a SHA-512 over its bytes and re-served without recomputation across
//! requests, permutations, and batch sizes.
//!
//! Serving an identity model takes one call:
//!
//! ```no_run
//! use modelpipe::{serve, RequestContext, Result};
//!
//! #[actix_web::main]
//! async fn main() -> Result<()> {
//!     serve(
//!         "0.0.0.0:9000",
//!         false,
//!         |_ctx: &mut RequestContext, _config: String, (x,): (Vec<f32>,)| Ok((x,)),
//!         None,
//!         None,
//!     )
//!     .await
//! }
//! ```
//!
//! Clients use [`client::infer`] / [`client::metadata`] with `http://` or
//! `shm+unix://` URIs.

pub mod api;
pub mod apply;
pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
mod infer;
pub mod metadata;
pub mod pool;
pub mod server;
pub mod shm;
pub mod tensor;
pub mod value;
pub mod wire;

pub use apply::{build_simple_apply, Applier, ApplyInputs, ApplyOutputs, FromConfig, Json};
pub use cache::ResultCache;
pub use client::{infer, infer_multi, RemoteClient, ShmClient};
pub use config::Config;
pub use context::RequestContext;
pub use error::{Error, Result};
pub use metadata::{IoMetadata, Metadata};
pub use pool::EnginePool;
pub use server::{
    client_count, serve, serve_raw, AppContext, GetHandler, RestApplier, ServeOptions,
};
pub use tensor::{ElementType, Tensor, TensorData};
pub use value::{declared_shape, from_value, to_value, TensorValue};
