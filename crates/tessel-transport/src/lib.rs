//! # tessel-transport
//!
//! Request/response exchange between the Tessel runtime and the remote
//! authoritative store.
//!
//! - [`Transport`]: the collaborator contract the runtime consumes
//! - [`HttpTransport`]: `POST` exchanges and `GET` static templates over `reqwest`
//! - [`TransportError`]: failures distinct from application errors

#![deny(unsafe_code)]

pub mod errors;
pub mod http;

use async_trait::async_trait;
use tessel_core::{ExchangeRequest, ExchangeResponse, TemplatePayload};

pub use errors::{Result, TransportError};
pub use http::HttpTransport;

/// Executes remote exchanges for components and templates.
///
/// The runtime is single-threaded, so implementations need not be `Send`.
#[async_trait(?Send)]
pub trait Transport {
    /// Send a request and return a response carrying the `type: response` marker.
    async fn exchange(&self, request: &ExchangeRequest) -> Result<ExchangeResponse>;

    /// Fetch a template from the static client-reachable location.
    async fn fetch_static_template(&self, component: &str) -> Result<TemplatePayload>;
}
