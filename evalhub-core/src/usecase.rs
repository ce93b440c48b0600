//! Usecase entity: the top-level grouping for datasets and evaluations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::UsecaseId;

/// Payload for creating or updating a usecase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsecaseDraft {
    /// Human-readable name.
    pub name: String,

    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Tags for categorization.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Arbitrary key-value metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl UsecaseDraft {
    /// Create a draft with the given name and no extras.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("usecase name must not be empty".into()));
        }
        Ok(())
    }
}

/// A top-level grouping for datasets and evaluations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usecase {
    /// Unique identifier.
    pub id: UsecaseId,

    /// Human-readable name.
    pub name: String,

    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Tags for categorization.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Arbitrary key-value metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,

    /// When the usecase was created.
    pub created_at: DateTime<Utc>,

    /// When the usecase was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Usecase {
    /// Create a new usecase from a draft.
    #[must_use]
    pub fn new(id: UsecaseId, draft: UsecaseDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name,
            description: draft.description,
            tags: draft.tags,
            metadata: draft.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an update draft, refreshing the update timestamp.
    pub fn apply(&mut self, draft: UsecaseDraft, now: DateTime<Utc>) {
        self.name = draft.name;
        self.description = draft.description;
        self.tags = draft.tags;
        self.metadata = draft.metadata;
        self.updated_at = now;
    }
}
