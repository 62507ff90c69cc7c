//! Server bootstrap and process-wide state
//!
//! [`serve`] wraps a typed adapter function and runs it; [`serve_raw`] takes
//! fully assembled [`ServeOptions`] for adapters that implement the uniform
//! apply interface directly. Every accepted TCP connection is counted in a
//! process-wide atomic and gets a 3-minute keepalive; the count drives the
//! `/control/shutdown` drain.

use crate::api;
use crate::apply::{build_simple_apply, Applier, ApplyInputs, ApplyOutputs, FromConfig};
use crate::cache::{self, ResultCache, WriteBack};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::infer;
use crate::metadata::Metadata;
use crate::shm;
use crate::wire;
use actix_web::dev::{Extensions, Service};
use actix_web::{web, App, HttpResponse, HttpServer};
use socket2::{SockRef, TcpKeepalive};
use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Largest accepted request body
const MAX_REQUEST_BYTES: usize = 1 << 30;
/// Keepalive period applied to every accepted connection
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(3 * 60);

static CLIENT_COUNT: AtomicI64 = AtomicI64::new(0);

/// Live TCP connections accepted by this process
pub fn client_count() -> i64 {
    CLIENT_COUNT.load(Ordering::SeqCst)
}

/// Dropped when its connection closes, keeping the counter honest
struct ConnectionTrack;

impl ConnectionTrack {
    fn new() -> Self {
        CLIENT_COUNT.fetch_add(1, Ordering::SeqCst);
        ConnectionTrack
    }
}

impl Drop for ConnectionTrack {
    fn drop(&mut self) {
        CLIENT_COUNT.fetch_sub(1, Ordering::SeqCst);
    }
}

fn on_connect(conn: &dyn Any, ext: &mut Extensions) {
    if let Some(stream) = conn.downcast_ref::<actix_web::rt::net::TcpStream>() {
        let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_PERIOD);
        if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
            warn!("could not enable keepalive: {e}");
        }
    }
    ext.insert(Arc::new(ConnectionTrack::new()));
}

/// Adapter-supplied handler for `GET /`
pub type GetHandler = Arc<dyn Fn(&AppContext) -> Result<HttpResponse> + Send + Sync>;

/// Adapter-supplied handler for the JSON `POST /rest` endpoint
pub type RestApplier =
    Arc<dyn Fn(HashMap<String, serde_json::Value>, &[String]) -> Result<serde_json::Value> + Send + Sync>;

/// Process-wide serving state, shared with every handler
pub struct AppContext {
    pub meta: Metadata,
    pub apply: Applier,
    pub get_handler: Option<GetHandler>,
    pub rest_apply: Option<RestApplier>,
    pub default_inputs: Vec<String>,
    pub default_outputs: Vec<String>,
    pub cache: Option<Arc<ResultCache>>,
    pub is_ready: AtomicI64,
    pub is_alive: AtomicI64,
}

/// Everything `serve_raw` needs to run a server
pub struct ServeOptions {
    pub listen: String,
    pub cache_file: Option<PathBuf>,
    pub shm_socket: Option<PathBuf>,
    pub meta: Metadata,
    pub default_inputs: Vec<String>,
    pub default_outputs: Vec<String>,
    pub apply: Applier,
    pub rest_apply: Option<RestApplier>,
    pub get_handler: Option<GetHandler>,
}

impl Default for ServeOptions {
    fn default() -> Self {
        ServeOptions {
            listen: "127.0.0.1:9000".to_owned(),
            cache_file: None,
            shm_socket: None,
            meta: Metadata::default(),
            default_inputs: Vec::new(),
            default_outputs: Vec::new(),
            apply: Arc::new(|_, _, _, _| Err(Error::apply_failed("no apply function configured"))),
            rest_apply: None,
            get_handler: None,
        }
    }
}

/// Decode a wire `Request` and produce the wire response bytes
///
/// Inference runs on the blocking pool; a panic escaping the adapter shim
/// is contained here and surfaced as `ApplyFailed`. The returned write-back
/// (if any) has already been scheduled.
pub(crate) async fn handle_request_bytes(
    app: Arc<AppContext>,
    body: web::Bytes,
    has_died: Arc<AtomicBool>,
) -> Result<Vec<u8>> {
    let root = wire::root_as_request(&body).map_err(|e| Error::decode(e.to_string()))?;
    if root.req_as_infer_request().is_none() {
        return Ok(app.meta.to_response_bytes());
    }

    let worker_app = Arc::clone(&app);
    let join = tokio::task::spawn_blocking(move || -> Result<(Vec<u8>, Option<WriteBack>)> {
        let root = wire::root_as_request(&body).map_err(|e| Error::decode(e.to_string()))?;
        let req = root
            .req_as_infer_request()
            .ok_or_else(|| Error::decode("request lost its infer table"))?;
        let mut ctx = RequestContext::new(has_died);
        let computed = match worker_app.cache.as_deref() {
            Some(cache) => cache::get_results_cached(&worker_app, cache, &mut ctx, &req),
            None => infer::get_results(&worker_app, &mut ctx, &req).map(|outputs| (outputs, None)),
        };
        let built = computed.map(|(outputs, wb)| (ctx.encode_infer_response(&outputs), wb));
        // the cleanup contract: after the response is constructed,
        // success or failure, before the engine can be reused
        ctx.run_cleanup();
        built
    })
    .await;

    let (response, write_back) = match join {
        Ok(result) => result?,
        Err(e) if e.is_panic() => {
            error!("inference task panicked");
            return Err(Error::apply_failed("apply panicked"));
        }
        Err(e) => return Err(Error::transport(format!("inference task failed: {e}"))),
    };
    if let (Some(cache), Some(wb)) = (app.cache.clone(), write_back) {
        cache::spawn_write_back(cache, wb);
    }
    Ok(response)
}

/// Serve a typed adapter function (see [`build_simple_apply`]) on `listen`.
/// With `cache` set, row results persist in `cache.db` next to the process.
pub async fn serve<C, I, O, F>(
    listen: &str,
    cache: bool,
    apply: F,
    in_shapes: Option<Vec<Vec<i64>>>,
    out_shapes: Option<Vec<Vec<i64>>>,
) -> Result<()>
where
    C: FromConfig + 'static,
    I: ApplyInputs + 'static,
    O: ApplyOutputs + 'static,
    F: Fn(&mut RequestContext, C, I) -> Result<O> + Send + Sync + 'static,
{
    let mut opts = build_simple_apply(apply, in_shapes, out_shapes);
    opts.listen = listen.to_owned();
    if cache {
        opts.cache_file = Some(PathBuf::from("cache.db"));
    }
    serve_raw(opts).await
}

/// Start the model server from fully assembled options
pub async fn serve_raw(opts: ServeOptions) -> Result<()> {
    let cache = match &opts.cache_file {
        Some(path) => Some(Arc::new(ResultCache::open(path)?)),
        None => None,
    };
    let app = Arc::new(AppContext {
        meta: opts.meta,
        apply: opts.apply,
        get_handler: opts.get_handler,
        rest_apply: opts.rest_apply,
        default_inputs: opts.default_inputs,
        default_outputs: opts.default_outputs,
        cache,
        is_ready: AtomicI64::new(1),
        is_alive: AtomicI64::new(1),
    });

    if let Some(socket) = opts.shm_socket.clone() {
        let shm_app = Arc::clone(&app);
        tokio::spawn(async move {
            if let Err(e) = shm::serve_shm(shm_app, socket).await {
                error!("shared-memory transport failed: {e}");
            }
        });
    }

    let data = web::Data::from(Arc::clone(&app));
    info!("listening on '{}'", opts.listen);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .app_data(web::PayloadConfig::new(MAX_REQUEST_BYTES))
            .wrap_fn(|req, srv| {
                let path = req.path().to_owned();
                let started = Instant::now();
                let fut = srv.call(req);
                async move {
                    let res = fut.await;
                    info!("request for {path} took {:?}", started.elapsed());
                    res
                }
            })
            .configure(api::routes::configure)
    })
    .on_connect(on_connect)
    .bind(&opts.listen)?
    .run()
    .await?;

    if let Some(socket) = &opts.shm_socket {
        let _ = std::fs::remove_file(socket);
    }
    Ok(())
}
