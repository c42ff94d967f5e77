//! Field labels and their numeric wire ids.
//!
//! On the wire, record and variant fields are identified by a 32-bit id:
//! either a verbatim number or the hash of the field name. Fields are always
//! ordered by this id, not by declaration order.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The hash function mapping field names to wire ids:
/// `h(s) = sum(h * 223 + byte) mod 2^32`.
pub fn label_hash(name: &str) -> u32 {
    name.bytes()
        .fold(0u32, |h, b| h.wrapping_mul(223).wrapping_add(b as u32))
}

/// A record or variant field label: a name, or a bare numeric id for
/// positional (tuple) fields.
#[derive(Clone, Debug)]
pub enum Label {
    Named(String),
    Id(u32),
}

impl Label {
    /// The numeric id this label has on the wire.
    pub fn id(&self) -> u32 {
        match self {
            Label::Named(name) => label_hash(name),
            Label::Id(id) => *id,
        }
    }
}

// Labels are compared by wire id only: `Named("ok")` and `Id(hash("ok"))`
// are the same field.
impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Label {}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id().cmp(&other.id())
    }
}

impl Hash for Label {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Named(name) => f.write_str(name),
            Label::Id(id) => write!(f, "{}", id),
        }
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Label::Named(name.to_string())
    }
}

impl From<String> for Label {
    fn from(name: String) -> Self {
        Label::Named(name)
    }
}

impl From<u32> for Label {
    fn from(id: u32) -> Self {
        Label::Id(id)
    }
}
