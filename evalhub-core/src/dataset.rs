//! Dataset entity: an ordered sequence of input/golden-output records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{DatasetId, UsecaseId};

/// One evaluation example: an input paired with its golden output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    /// Input presented to the model.
    pub input: String,
    /// Expected (golden) output.
    pub expected: String,
}

/// Payload for creating or updating a dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetDraft {
    /// Name of the dataset, unique within its usecase.
    pub alias: String,

    /// The records, in order.
    #[serde(default)]
    pub records: Vec<DatasetRecord>,
}

impl DatasetDraft {
    /// Create a draft with the given alias and no records.
    #[must_use]
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            records: Vec::new(),
        }
    }

    /// Add a record to the draft.
    #[must_use]
    pub fn with_record(mut self, input: impl Into<String>, expected: impl Into<String>) -> Self {
        self.records.push(DatasetRecord {
            input: input.into(),
            expected: expected.into(),
        });
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.alias.trim().is_empty() {
            return Err(Error::Validation("dataset alias must not be empty".into()));
        }
        Ok(())
    }
}

/// A named collection of input/golden-output records.
///
/// Datasets become immutable once a completed evaluation references them, to
/// preserve reproducibility; the service facade enforces this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Unique identifier.
    pub id: DatasetId,

    /// Usecase this dataset belongs to.
    pub usecase_id: UsecaseId,

    /// Name, unique within the usecase.
    pub alias: String,

    /// The records, in order.
    pub records: Vec<DatasetRecord>,

    /// When the dataset was created.
    pub created_at: DateTime<Utc>,

    /// When the dataset was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Dataset {
    /// Create a new dataset from a draft.
    #[must_use]
    pub fn new(id: DatasetId, usecase_id: UsecaseId, draft: DatasetDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            usecase_id,
            alias: draft.alias,
            records: draft.records,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an update draft, refreshing the update timestamp.
    pub fn apply(&mut self, draft: DatasetDraft, now: DateTime<Utc>) {
        self.alias = draft.alias;
        self.records = draft.records;
        self.updated_at = now;
    }
}
