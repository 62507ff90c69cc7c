//! HTTP request handlers
//!
//! The binary endpoint decodes a wire `Request` and dispatches inference or
//! metadata; the lifecycle endpoints read and flip the two process
//! counters. Each in-flight inference gets a watcher task that races the
//! client-disconnect signal against request completion and flips the
//! request's cancellation flag, which adapters may poll.

use crate::error::Error;
use crate::server::{self, handle_request_bytes, AppContext};
use actix_web::{web, HttpResponse, ResponseError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

fn text(body: impl Into<String>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(body.into())
}

/// Handler for `POST /`: binary inference or metadata
pub async fn post_root(data: web::Data<AppContext>, body: web::Bytes) -> HttpResponse {
    let request_id = Uuid::new_v4();

    let has_died = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let (gone_tx, gone_rx) = oneshot::channel::<()>();
    let flag = Arc::clone(&has_died);
    tokio::spawn(async move {
        tokio::select! {
            _ = done_rx => {}
            _ = gone_rx => {}
        }
        flag.store(true, Ordering::Relaxed);
    });
    // held across the await: dropped early only when the client disconnects
    // and actix cancels this handler, which fires the watcher
    let _client_gone = gone_tx;

    info!(%request_id, "processing binary request");
    let result = handle_request_bytes(data.into_inner(), body, has_died).await;
    let _ = done_tx.send(());

    match result {
        Ok(bytes) => HttpResponse::Ok()
            .content_type("application/octet-stream")
            .body(bytes),
        Err(e) => {
            warn!(%request_id, "request failed: {e}");
            e.error_response()
        }
    }
}

/// Handler for `GET /`: delegates to the adapter, else 500
pub async fn get_root(data: web::Data<AppContext>) -> HttpResponse {
    match &data.get_handler {
        Some(handler) => handler(&data).unwrap_or_else(|e| e.error_response()),
        None => HttpResponse::InternalServerError()
            .content_type("text/plain; charset=utf-8")
            .body("Unhandled GET"),
    }
}

/// Handler for `POST /rest`: JSON inputs through the adapter's REST applier
pub async fn rest(
    data: web::Data<AppContext>,
    body: web::Json<HashMap<String, Value>>,
) -> HttpResponse {
    let Some(rest_apply) = &data.rest_apply else {
        return Error::decode("no REST applier registered").error_response();
    };
    match rest_apply(body.into_inner(), &data.default_outputs) {
        Ok(value) => HttpResponse::Ok().json(value),
        Err(e) => HttpResponse::BadRequest()
            .content_type("text/plain; charset=utf-8")
            .body(e.to_string()),
    }
}

/// Handler for `GET /control/is_ready`
pub async fn is_ready(data: web::Data<AppContext>) -> HttpResponse {
    if data.is_ready.load(Ordering::SeqCst) == 1 {
        text("ok\n")
    } else {
        Error::NotReady.error_response()
    }
}

/// Handler for `GET /control/is_alive`
pub async fn is_alive(data: web::Data<AppContext>) -> HttpResponse {
    if data.is_alive.load(Ordering::SeqCst) == 1 {
        text("ok\n")
    } else {
        Error::NotAlive.error_response()
    }
}

/// Handler for `GET /control/shutdown`: stop admitting work, drain down to
/// this connection, wait out a proxy grace period, then report dead
pub async fn shutdown(data: web::Data<AppContext>) -> HttpResponse {
    info!("shutdown requested, draining connections");
    data.is_ready.fetch_sub(1, Ordering::SeqCst);
    while server::client_count() > 1 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    // give a fronting proxy time to drop us from its pool
    tokio::time::sleep(Duration::from_secs(5)).await;
    data.is_alive.fetch_sub(1, Ordering::SeqCst);
    text("shutdown\n")
}

/// Handler for `GET /control/client_count`
pub async fn client_count() -> HttpResponse {
    text(format!("{}\n", server::client_count()))
}

/// Default handler for unmatched routes
pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound()
        .content_type("text/plain; charset=utf-8")
        .body("not found")
}
