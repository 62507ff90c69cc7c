//! Per-request context
//!
//! Owns the response build buffer, the advisory cancellation flag, and the
//! deferred cleanup callback an adapter may register (typically to return a
//! borrowed engine to its pool). The cleanup runs exactly once, after the
//! response has been constructed.

use crate::tensor::Tensor;
use crate::wire;
use flatbuffers::FlatBufferBuilder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Scratchpad attached to one in-flight inference request
pub struct RequestContext {
    has_died: Arc<AtomicBool>,
    /// Invoked once after the response is built, success or failure
    pub cleanup: Option<Box<dyn FnOnce() + Send>>,
    builder: FlatBufferBuilder<'static>,
}

impl RequestContext {
    pub fn new(has_died: Arc<AtomicBool>) -> Self {
        RequestContext {
            has_died,
            cleanup: None,
            builder: FlatBufferBuilder::with_capacity(1024),
        }
    }

    /// A context with no cancellation watcher attached
    pub fn detached() -> Self {
        Self::new(Arc::new(AtomicBool::new(false)))
    }

    /// False once the client has gone away. Advisory: long-running
    /// adapters may poll this to cut a computation short.
    pub fn is_alive(&self) -> bool {
        !self.has_died.load(Ordering::Relaxed)
    }

    pub fn set_dead(&self) {
        self.has_died.store(true, Ordering::Relaxed);
    }

    /// Serialize an infer response carrying `outputs` into the request's
    /// build buffer, returning the finished wire bytes.
    pub fn encode_infer_response(&mut self, outputs: &[Tensor]) -> Vec<u8> {
        let fbb = &mut self.builder;
        fbb.reset();
        let offsets: Vec<_> = outputs.iter().map(|t| t.build(fbb)).collect();
        let tensors = fbb.create_vector(&offsets);
        let response = wire::InferResponse::create(
            fbb,
            &wire::InferResponseArgs {
                output_tensors: Some(tensors),
                errors: None,
            },
        );
        fbb.finish(response, None);
        fbb.finished_data().to_vec()
    }

    pub(crate) fn run_cleanup(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// A response carrying only error records, for transports without a
/// status-code side channel.
pub fn encode_error_response(code: i64, message: &str) -> Vec<u8> {
    let mut fbb = FlatBufferBuilder::with_capacity(256);
    let message = fbb.create_string(message);
    let record = wire::Error::create(&mut fbb, code, Some(message));
    let errors = fbb.create_vector(&[record]);
    let response = wire::InferResponse::create(
        &mut fbb,
        &wire::InferResponseArgs {
            output_tensors: None,
            errors: Some(errors),
        },
    );
    fbb.finish(response, None);
    fbb.finished_data().to_vec()
}
