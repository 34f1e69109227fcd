//! # tessel-core
//!
//! Foundation types shared by every Tessel crate.
//!
//! - **Modes**: [`Mode`] selects how an interaction consults the remote store
//! - **Component ids**: [`ComponentId`] newtype (`name` or `name_id`)
//! - **Variables**: [`Var`] tagged union of scalar, structured, and component-reference values
//! - **Envelopes**: [`Envelope`] / [`ComponentRef`] wire and storage form of variables
//! - **Wire types**: [`ExchangeRequest`] / [`ExchangeResponse`] for the transport
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod envelope;
pub mod ids;
pub mod logging;
pub mod mode;
pub mod vars;
pub mod wire;

pub use envelope::{ComponentRef, ComponentTag, Envelope};
pub use ids::ComponentId;
pub use mode::{Mode, ParseModeError};
pub use vars::{Var, VarMap, same_value};
pub use wire::{
    ExchangeRequest, ExchangeResponse, RequestTag, ResponseComponent, TemplatePayload,
    TemplateProbe,
};
