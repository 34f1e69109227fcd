//! Runtime error types.

use tessel_core::ComponentId;
use tessel_settings::SettingsError;
use tessel_store::StoreError;
use tessel_transport::TransportError;
use thiserror::Error;

/// Failures raised by a renderer or a container.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The template markup cannot be rendered.
    #[error("malformed template {component}: {message}")]
    MalformedTemplate {
        /// Component name.
        component: String,
        /// What is wrong with it.
        message: String,
    },

    /// A rune slot expected in the rendered subtree is missing.
    #[error("no slot for {key} in {component_id}")]
    MissingSlot {
        /// Component whose subtree was searched.
        component_id: ComponentId,
        /// Variable bound to the slot.
        key: String,
    },

    /// The surface rejected content.
    #[error("surface error: {0}")]
    Surface(String),
}

/// Failures raised by a component's own lifecycle hooks.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// The component factory could not build an instance.
    #[error("cannot instantiate {component}: {message}")]
    Instantiate {
        /// Component name.
        component: String,
        /// Cause.
        message: String,
    },

    /// Post-creation hydration failed.
    #[error("hydrate failed: {0}")]
    Hydrate(String),

    /// Teardown failed.
    #[error("teardown failed: {0}")]
    Teardown(String),
}

/// Errors returned by the session, registry, and cache.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Settings are invalid. Raised only at construction.
    #[error("configuration error: {0}")]
    Config(#[from] SettingsError),

    /// Neither an explicit nor a default mode was recognized.
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    /// The component id is not tracked.
    #[error("component not found: {0}")]
    ComponentNotFound(ComponentId),

    /// No template is cached under the name.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// No factory is registered for the component name.
    #[error("component not registered: {0}")]
    ComponentNotRegistered(String),

    /// A record already exists for the component id.
    #[error("component already exists: {0}")]
    AlreadyExists(ComponentId),

    /// The server declared a key without sending its value.
    #[error("{component_id}: declared key {key} missing from payload")]
    MissingKey {
        /// Component being created.
        component_id: ComponentId,
        /// Missing key.
        key: String,
    },

    /// No container could be resolved for the component.
    #[error("no container for {0}")]
    NoContainer(ComponentId),

    /// The session was dropped.
    #[error("session closed")]
    SessionClosed,

    /// Remote exchange failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Local store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Rendering failed.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// A component hook failed.
    #[error("component error: {0}")]
    Component(#[from] ComponentError),

    /// Stored JSON could not be (de)serialized.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl RuntimeError {
    /// Error category string for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration",
            Self::InvalidMode(_)
            | Self::ComponentNotFound(_)
            | Self::TemplateNotFound(_)
            | Self::ComponentNotRegistered(_) => "not_found",
            Self::Transport(_) => "transport",
            Self::AlreadyExists(_) | Self::SessionClosed => "state",
            Self::MissingKey { .. } | Self::NoContainer(_) => "internal",
            Self::Store(_) | Self::Serde(_) => "store",
            Self::Render(_) => "render",
            Self::Component(_) => "component",
        }
    }

    /// Whether re-issuing the interaction may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Store(_) => true,
            Self::Config(_)
            | Self::InvalidMode(_)
            | Self::ComponentNotFound(_)
            | Self::TemplateNotFound(_)
            | Self::ComponentNotRegistered(_)
            | Self::AlreadyExists(_)
            | Self::MissingKey { .. }
            | Self::NoContainer(_)
            | Self::SessionClosed
            | Self::Render(_)
            | Self::Component(_)
            | Self::Serde(_) => false,
        }
    }
}

/// Convenience type alias for runtime results.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(
            RuntimeError::InvalidMode("EAGER".into()).category(),
            "not_found"
        );
        assert_eq!(
            RuntimeError::NoContainer(ComponentId::new("x", None)).category(),
            "internal"
        );
        assert_eq!(
            RuntimeError::from(TransportError::MissingMarker).category(),
            "transport"
        );
        assert_eq!(
            RuntimeError::from(SettingsError::invalid("store.poolSize", "zero")).category(),
            "configuration"
        );
    }

    #[test]
    fn transport_recoverability_follows_status() {
        let busy = RuntimeError::from(TransportError::Status {
            status: 503,
            body: String::new(),
        });
        assert!(busy.is_recoverable());
        let bad = RuntimeError::from(TransportError::Status {
            status: 422,
            body: String::new(),
        });
        assert!(!bad.is_recoverable());
        assert!(!RuntimeError::InvalidMode("x".into()).is_recoverable());
    }

    #[test]
    fn missing_key_display() {
        let err = RuntimeError::MissingKey {
            component_id: ComponentId::new("counter", None),
            key: "count".into(),
        };
        assert_eq!(err.to_string(), "counter: declared key count missing from payload");
    }
}
