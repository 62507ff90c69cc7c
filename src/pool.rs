//! Engine pool for single-threaded inference backends
//!
//! An engine (a native session handle, usually `Arc`-wrapped) must never be
//! used by two requests at once. A single-engine pool arbitrates with a
//! mutex held for the duration of `apply`; a multi-engine pool hands out
//! engines from a deque, busy-waiting in short sleeps when drained. Either
//! way the release is registered as the request's cleanup, so the engine
//! is only reusable after the response has been built.
//!
//! `acquire` blocks and must be called from the blocking pool (inside an
//! apply function), never on an async executor thread.

use crate::context::RequestContext;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const DRAINED_POOL_BACKOFF: Duration = Duration::from_micros(500);

/// A pool of identical engines handed out one request at a time
pub struct EnginePool<E: Clone + Send + 'static> {
    engines: Arc<Mutex<VecDeque<E>>>,
    /// Present only for single-engine pools: held across `apply`
    gate: Option<Arc<tokio::sync::Mutex<()>>>,
}

impl<E: Clone + Send + 'static> EnginePool<E> {
    pub fn new(engines: Vec<E>) -> Self {
        let gate = (engines.len() == 1).then(|| Arc::new(tokio::sync::Mutex::new(())));
        EnginePool {
            engines: Arc::new(Mutex::new(engines.into())),
            gate,
        }
    }

    /// Borrow an engine for the duration of `apply`, registering a cleanup
    /// on `ctx` that releases it after the response is built.
    pub fn acquire(&self, ctx: &mut RequestContext) -> E {
        if let Some(gate) = &self.gate {
            let guard = Arc::clone(gate).blocking_lock_owned();
            let engine = self
                .engines
                .lock()
                .front()
                .cloned()
                .expect("single-engine pool holds exactly one engine");
            ctx.cleanup = Some(Box::new(move || drop(guard)));
            return engine;
        }

        let engine = loop {
            if let Some(engine) = self.engines.lock().pop_front() {
                break engine;
            }
            thread::sleep(DRAINED_POOL_BACKOFF);
        };
        let engines = Arc::clone(&self.engines);
        let returned = engine.clone();
        ctx.cleanup = Some(Box::new(move || engines.lock().push_back(returned)));
        engine
    }

    /// Engines currently available without waiting
    pub fn available(&self) -> usize {
        if self.gate.is_some() {
            // the deque is never drained in single-engine mode
            usize::from(self.gate.as_ref().is_some_and(|g| g.try_lock().is_ok()))
        } else {
            self.engines.lock().len()
        }
    }
}
