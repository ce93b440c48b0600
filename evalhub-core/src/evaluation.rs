//! Evaluation entity and its status lifecycle.
//!
//! An evaluation is one run of a model against a dataset. Its status moves
//! through a fixed state machine:
//!
//! ```text
//! pending -> running -> completed | failed
//! pending | running -> cancelled
//! ```
//!
//! Terminal states (`completed`, `failed`, `cancelled`) admit no further
//! transitions, and `completed_at` is set exactly when a terminal state is
//! entered.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{DatasetId, EvaluationId, UsecaseId};

/// Current status of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    /// Created but not yet started.
    Pending,
    /// Actively running against its dataset.
    Running,
    /// Finished with metrics (terminal).
    Completed,
    /// Finished with an error (terminal).
    Failed,
    /// Stopped before finishing (terminal).
    Cancelled,
}

impl EvaluationStatus {
    /// Convert to the persisted string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from the persisted string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this status admits no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A requested status change, with the payload the target status requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    /// `pending -> running`.
    Start,
    /// `running -> completed`; requires a non-empty metrics payload.
    Complete {
        /// Metric name to value, recorded with the evaluation.
        metrics: BTreeMap<String, f64>,
    },
    /// `running -> failed`; requires an error message.
    Fail {
        /// What went wrong.
        error: String,
    },
    /// `pending | running -> cancelled`.
    Cancel,
}

impl Transition {
    /// The status this transition moves to.
    #[must_use]
    pub fn target(&self) -> EvaluationStatus {
        match self {
            Self::Start => EvaluationStatus::Running,
            Self::Complete { .. } => EvaluationStatus::Completed,
            Self::Fail { .. } => EvaluationStatus::Failed,
            Self::Cancel => EvaluationStatus::Cancelled,
        }
    }
}

/// One run of a model against a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Unique identifier.
    pub id: EvaluationId,

    /// Usecase this evaluation belongs to.
    pub usecase_id: UsecaseId,

    /// Dataset this evaluation ran against.
    pub dataset_id: DatasetId,

    /// Human-readable name.
    pub name: String,

    /// Current lifecycle status.
    pub status: EvaluationStatus,

    /// Metric name to value, populated on completion.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,

    /// Error message, populated on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the evaluation was created.
    pub created_at: DateTime<Utc>,

    /// When the evaluation was last updated.
    pub updated_at: DateTime<Utc>,

    /// When the evaluation started running (None while pending).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the evaluation reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Evaluation {
    /// Create a new pending evaluation.
    #[must_use]
    pub fn new(
        id: EvaluationId,
        usecase_id: UsecaseId,
        dataset_id: DatasetId,
        name: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            usecase_id,
            dataset_id,
            name,
            status: EvaluationStatus::Pending,
            metrics: BTreeMap::new(),
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a status transition.
    ///
    /// On success the status, timestamps and payload fields are updated.
    /// On any error the evaluation is left unchanged: illegal pairs fail
    /// with [`Error::InvalidTransition`], missing payloads with
    /// [`Error::Validation`].
    pub fn apply_transition(&mut self, transition: &Transition, now: DateTime<Utc>) -> Result<()> {
        let target = transition.target();
        let allowed = matches!(
            (self.status, transition),
            (EvaluationStatus::Pending, Transition::Start)
                | (EvaluationStatus::Running, Transition::Complete { .. })
                | (EvaluationStatus::Running, Transition::Fail { .. })
                | (
                    EvaluationStatus::Pending | EvaluationStatus::Running,
                    Transition::Cancel
                )
        );
        if !allowed {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: target,
            });
        }

        match transition {
            Transition::Start => {
                self.started_at = Some(now);
            }
            Transition::Complete { metrics } => {
                if metrics.is_empty() {
                    return Err(Error::Validation(
                        "completion requires a non-empty metrics payload".into(),
                    ));
                }
                self.metrics = metrics.clone();
                self.completed_at = Some(now);
            }
            Transition::Fail { error } => {
                if error.trim().is_empty() {
                    return Err(Error::Validation("failure requires an error message".into()));
                }
                self.error = Some(error.clone());
                self.completed_at = Some(now);
            }
            Transition::Cancel => {
                self.completed_at = Some(now);
            }
        }

        self.status = target;
        self.updated_at = now;
        Ok(())
    }
}
