//! Identifier types for evalhub entities.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a usecase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UsecaseId(pub Uuid);

impl UsecaseId {
    /// Create a new usecase ID with a UUIDv7 (time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse from a string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok().map(Self)
    }
}

impl Default for UsecaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UsecaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a dataset within a usecase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub Uuid);

impl DatasetId {
    /// Create a new dataset ID with a UUIDv7 (time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse from a string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok().map(Self)
    }
}

impl Default for DatasetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for an evaluation within a usecase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvaluationId(pub Uuid);

impl EvaluationId {
    /// Create a new evaluation ID with a UUIDv7 (time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse from a string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok().map(Self)
    }
}

impl Default for EvaluationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EvaluationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(UsecaseId::new(), UsecaseId::new());
        assert_ne!(EvaluationId::new(), EvaluationId::new());
    }

    #[test]
    fn parse_round_trips_display() {
        let id = DatasetId::new();
        assert_eq!(DatasetId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(EvaluationId::parse("not-a-uuid").is_none());
    }

    #[test]
    fn id_serializes_as_uuid_string() {
        let id = UsecaseId(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }
}
