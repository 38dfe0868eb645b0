//! # HTTP Server Module
//!
//! Exposes the transaction scenarios over HTTP with axum.
//!
//! # Endpoints
//!
//! - `/health` - Health check
//! - `/txpipeline` - Watched update racing a mutator
//! - `/syntax-error` - Batch aborted before execution
//! - `/logic-error` - Batch with a single failing command
//! - `/observability/*` - Metrics and health

pub mod config;
pub mod observability_routes;
pub mod server;
pub mod txn_routes;

pub use config::HttpServerConfig;
pub use server::HttpServer;
