//! Time-ordered unique identifiers for messages and agents.
//!
//! Backed by UUIDv7: 128 bits, lexicographically sortable by creation instant,
//! globally unique without coordination.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A globally unique, time-ordered identifier.
///
/// `Identifier`s created later always compare greater than ones created
/// earlier, so a sorted list of identifiers is also a list sorted by
/// creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(Uuid);

impl Identifier {
    /// Generates a fresh identifier stamped with the current time.
    pub fn new() -> Self {
        Identifier(Uuid::now_v7())
    }

    /// Returns the identifier's canonical hyphenated string form.
    pub fn as_string(&self) -> String {
        self.0.to_string()
    }

    /// Parses an identifier previously produced by [`Identifier::as_string`].
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Identifier)
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
