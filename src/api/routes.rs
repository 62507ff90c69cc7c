//! Route configuration
//!
//! Wires every endpoint to its handler; unmatched paths fall through to a
//! plain 404.

use super::handlers;
use actix_web::web;

/// Configure all routes on an actix `App`
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/control/is_ready", web::get().to(handlers::is_ready))
        .route("/control/is_alive", web::get().to(handlers::is_alive))
        .route("/control/shutdown", web::get().to(handlers::shutdown))
        .route("/control/client_count", web::get().to(handlers::client_count))
        .route("/rest", web::post().to(handlers::rest))
        .route("/", web::get().to(handlers::get_root))
        .route("/", web::post().to(handlers::post_root))
        .default_service(web::route().to(handlers::not_found));
}
