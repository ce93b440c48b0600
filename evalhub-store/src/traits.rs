//! Core trait for collection-scoped document CRUD.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Logical collections managed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Top-level usecases.
    Usecases,
    /// Datasets belonging to usecases.
    Datasets,
    /// Evaluation runs.
    Evaluations,
    /// Metric rollups.
    Metrics,
}

impl Collection {
    /// Convert to the backend table/namespace name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usecases => "usecases",
            Self::Datasets => "datasets",
            Self::Evaluations => "evaluations",
            Self::Metrics => "metrics",
        }
    }

    /// All collections, in schema-creation order.
    pub const ALL: [Collection; 4] = [
        Self::Usecases,
        Self::Datasets,
        Self::Evaluations,
        Self::Metrics,
    ];
}

/// Equality filter on top-level document fields.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// Create an empty filter (matches every document).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a top-level field to equal the given value.
    #[must_use]
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push((field.to_string(), value.into()));
        self
    }

    /// The accumulated equality clauses.
    #[must_use]
    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    /// Whether a document satisfies every clause.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        self.clauses
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }
}

/// Compare-and-set guard for [`DocumentStore::update_one`].
///
/// The update applies only if the stored document's `field` currently equals
/// `expected`. Document-level atomicity of the backend is all that is
/// required; no multi-document transactions.
#[derive(Debug, Clone)]
pub struct CasGuard {
    /// Top-level field to compare.
    pub field: String,
    /// Value the field must currently hold.
    pub expected: Value,
}

impl CasGuard {
    /// Guard on a single top-level field.
    #[must_use]
    pub fn on(field: &str, expected: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            expected: expected.into(),
        }
    }
}

/// Collection-scoped CRUD over JSON documents keyed by string identifiers.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by identifier.
    async fn find_one(&self, collection: Collection, id: &str) -> Result<Option<Value>>;

    /// Fetch all documents matching the filter. Order is unspecified;
    /// callers impose their own ordering.
    async fn find_many(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>>;

    /// Insert a document under a caller-supplied identifier.
    ///
    /// Fails with [`StoreError::Conflict`] if the identifier already exists,
    /// which is what makes retried inserts idempotent.
    ///
    /// [`StoreError::Conflict`]: crate::StoreError::Conflict
    async fn insert_one(&self, collection: Collection, id: &str, doc: Value) -> Result<()>;

    /// Replace a document, optionally guarded by a compare-and-set check.
    ///
    /// Returns `Ok(false)` when the identifier is absent or the guard did
    /// not match the stored document.
    async fn update_one(
        &self,
        collection: Collection,
        id: &str,
        doc: Value,
        guard: Option<&CasGuard>,
    ) -> Result<bool>;

    /// Delete a document. Returns `Ok(false)` when the identifier is absent.
    async fn delete_one(&self, collection: Collection, id: &str) -> Result<bool>;
}
