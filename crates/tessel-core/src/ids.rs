//! Component identifiers.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a live component within a session.
///
/// Derived from the component name, suffixed with `_<id>` when the component
/// carries an instance id. Two interactions that derive the same
/// `ComponentId` address the same record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    /// Derive the id for `component` with an optional instance id.
    ///
    /// An empty instance id is treated as absent.
    #[must_use]
    pub fn new(component: &str, id: Option<&str>) -> Self {
        match id.filter(|id| !id.is_empty()) {
            Some(id) => Self(format!("{component}_{id}")),
            None => Self(component.to_owned()),
        }
    }

    /// Wrap an already-derived id string.
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ComponentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ComponentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
