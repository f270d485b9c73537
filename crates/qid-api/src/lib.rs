//! HTTP transport for QID.
//!
//! Serves the control-plane API over the [`qid_core::Service`] trait and
//! bridges the pub/sub queue over HTTP so out-of-process workers need no
//! broker of their own. The [`Client`] implements the same `Service`,
//! `Topic` and `Subscription` contracts against a remote server.

pub mod client;
pub mod error;
pub mod queue_http;
pub mod routes;

pub use client::Client;
pub use error::ApiError;
pub use queue_http::QueueBridge;

use std::sync::Arc;

use qid_core::Service;

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub svc: Arc<dyn Service>,
    pub queue: Arc<QueueBridge>,
}

impl AppState {
    pub fn new(svc: Arc<dyn Service>, queue: Arc<QueueBridge>) -> AppState {
        AppState { svc, queue }
    }
}
