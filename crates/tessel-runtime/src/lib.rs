//! # tessel-runtime
//!
//! The reactive synchronization engine. Three layers, leaves first:
//!
//! - [`cache::TemplateCache`]: versioned templates with a lazily loaded,
//!   coalesced-flush version index
//! - [`registry::InstanceRegistry`]: live component records, variable diffs,
//!   full vs. rune-patch rendering
//! - [`session::Session`]: the per-component in-flight state machine and the
//!   single entry point for interactions
//!
//! Collaborators are traits: [`surface::Container`], [`render::Renderer`],
//! [`tessel_transport::Transport`], [`tessel_store::LocalStore`], and the
//! [`component::ComponentFactories`] table.
//!
//! A session is single-threaded: it is `!Send`, must run inside a
//! [`tokio::task::LocalSet`], and spawns respawns and index flushes with
//! `spawn_local`.

#![deny(unsafe_code)]

pub mod cache;
pub mod component;
pub mod errors;
pub mod registry;
pub mod render;
pub mod session;
pub mod surface;

use std::future::Future;
use std::pin::Pin;

pub use cache::{Template, TemplateCache};
pub use component::{Component, ComponentContext, ComponentFactories, DataComponent};
pub use errors::{ComponentError, RenderError, Result, RuntimeError};
pub use registry::InstanceRegistry;
pub use render::{MarkupRenderer, RenderValue, Renderer};
pub use session::{FlightEntry, Session, SessionDeps, SessionHandle};
pub use surface::{Container, MemoryNode};

/// A boxed future bound to the current thread.
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;
