//! Evaluation management for model quality tracking.
//!
//! This crate manages usecases, their datasets of input/golden-output
//! records, and evaluation runs against those datasets, with metric rollups
//! at every granularity.
//!
//! # Architecture
//!
//! - **Repositories** wrap the document store with typed CRUD; every store
//!   call goes through the bounded-backoff retry executor.
//! - **[`EvalHub`]** is the service facade: it owns cross-entity rules and
//!   serializes status transitions per evaluation.
//! - **[`MetricsAggregator`]** keeps incremental-mean rollups per usecase,
//!   dataset and evaluation.
//! - **[`TimeoutSweeper`]** fails evaluations that run past their deadline
//!   and enforces metrics retention.

mod config;
mod dataset;
mod error;
mod evaluation;
mod metrics;
mod repository;
mod service;
mod sweep;
mod types;
mod usecase;

// Configuration
pub use config::EvalHubConfig;

// Entities and drafts
pub use dataset::{Dataset, DatasetDraft, DatasetRecord};
pub use usecase::{Usecase, UsecaseDraft};

// Evaluation lifecycle
pub use evaluation::{Evaluation, EvaluationStatus, Transition};

// Errors
pub use error::{Error, Result};

// Metrics
pub use metrics::{MetricRecord, MetricStat, MetricsAggregator, rollup_key};

// Repositories
pub use repository::{DatasetRepository, EvaluationRepository, Page, UsecaseRepository};

// Service facade
pub use service::EvalHub;

// Background sweeper
pub use sweep::{SweepStats, TimeoutSweeper, sweep};

// ID types
pub use types::{DatasetId, EvaluationId, UsecaseId};
