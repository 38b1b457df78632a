//! Observation kinds
//!
//! An observation kind selects which measurement function and which noise
//! block apply to a batch. Kinds are plain integer tags; the human-readable
//! names exist for logging only and never drive control flow.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer-keyed observation tag.
///
/// Distinct kinds always carry distinct codes; two names can never resolve
/// to the same tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationKind(pub u32);

impl ObservationKind {
    /// Placeholder for an unidentified source.
    pub const UNKNOWN: Self = Self(0);
    /// A time step with no measurement attached.
    pub const NO_OBSERVATION: Self = Self(1);

    /// Creates a kind from its integer code.
    #[inline]
    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    /// Returns the integer code.
    #[inline]
    pub const fn code(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kind#{}", self.0)
    }
}

/// `kind -> display string` lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindNames {
    names: BTreeMap<ObservationKind, String>,
}

impl KindNames {
    /// Vocabulary holding only the reserved kinds.
    pub fn new() -> Self {
        let mut names = BTreeMap::new();
        names.insert(ObservationKind::UNKNOWN, "Unknown".to_string());
        names.insert(ObservationKind::NO_OBSERVATION, "No observation".to_string());
        Self { names }
    }

    /// Adds a name for `kind`. A later name for the same code replaces the earlier one.
    pub fn with(mut self, kind: ObservationKind, name: impl Into<String>) -> Self {
        self.insert(kind, name);
        self
    }

    /// Inserts or replaces the name for `kind`.
    pub fn insert(&mut self, kind: ObservationKind, name: impl Into<String>) -> Option<String> {
        self.names.insert(kind, name.into())
    }

    /// Looks up a name. Unregistered kinds render as `"Unknown"`.
    pub fn name(&self, kind: ObservationKind) -> &str {
        self.names.get(&kind).map(String::as_str).unwrap_or("Unknown")
    }

    /// Iterates registered `(kind, name)` pairs in code order.
    pub fn iter(&self) -> impl Iterator<Item = (ObservationKind, &str)> {
        self.names.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl Default for KindNames {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_kinds_are_distinct() {
        assert_ne!(ObservationKind::UNKNOWN, ObservationKind::NO_OBSERVATION);
        assert_eq!(ObservationKind::new(7).code(), 7);
    }

    #[test]
    fn test_names() {
        let position = ObservationKind::new(2);
        let names = KindNames::new().with(position, "Position");

        assert_eq!(names.name(position), "Position");
        assert_eq!(names.name(ObservationKind::NO_OBSERVATION), "No observation");
        assert_eq!(names.name(ObservationKind::new(99)), "Unknown");
        assert_eq!(names.iter().count(), 3);
    }
}
