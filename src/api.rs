//! HTTP surface of the server
//!
//! Binary inference and metadata on `POST /`, the adapter's GET handler on
//! `GET /`, JSON inference on `POST /rest`, and the lifecycle endpoints
//! under `/control/`.

pub mod handlers;
pub mod routes;
