//! Typed repositories over the document store.
//!
//! Each repository method is one store operation submitted through the retry
//! executor. Identifiers are supplied by the entities themselves, which keeps
//! retried inserts idempotent. Ordering and paging are applied here, after
//! the read, since the store leaves result order unspecified.

use std::sync::Arc;

use evalhub_store::{
    CasGuard, Collection, DocumentStore, Filter, RetryPolicy, run_with_retry,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::evaluation::{Evaluation, EvaluationStatus};
use crate::types::{DatasetId, EvaluationId, UsecaseId};
use crate::usecase::Usecase;

/// Offset/limit window applied to a listing after ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Number of items to skip.
    #[serde(default)]
    pub offset: usize,

    /// Maximum number of items to return; `None` means unbounded.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Page {
    /// A window starting at `offset` returning at most `limit` items.
    #[must_use]
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    /// The unbounded window.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    fn apply<T>(self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

async fn fetch_doc(
    store: &Arc<dyn DocumentStore>,
    retry: &RetryPolicy,
    operation: &'static str,
    collection: Collection,
    id: &str,
) -> Result<Option<Value>> {
    Ok(run_with_retry(retry, operation, || {
        let store = Arc::clone(store);
        let id = id.to_string();
        async move { store.find_one(collection, &id).await }
    })
    .await?)
}

async fn fetch_docs(
    store: &Arc<dyn DocumentStore>,
    retry: &RetryPolicy,
    operation: &'static str,
    collection: Collection,
    filter: &Filter,
) -> Result<Vec<Value>> {
    Ok(run_with_retry(retry, operation, || {
        let store = Arc::clone(store);
        let filter = filter.clone();
        async move { store.find_many(collection, &filter).await }
    })
    .await?)
}

async fn insert_doc(
    store: &Arc<dyn DocumentStore>,
    retry: &RetryPolicy,
    operation: &'static str,
    collection: Collection,
    id: &str,
    doc: Value,
) -> Result<()> {
    Ok(run_with_retry(retry, operation, || {
        let store = Arc::clone(store);
        let id = id.to_string();
        let doc = doc.clone();
        async move { store.insert_one(collection, &id, doc).await }
    })
    .await?)
}

async fn update_doc(
    store: &Arc<dyn DocumentStore>,
    retry: &RetryPolicy,
    operation: &'static str,
    collection: Collection,
    id: &str,
    doc: Value,
    guard: Option<&CasGuard>,
) -> Result<bool> {
    Ok(run_with_retry(retry, operation, || {
        let store = Arc::clone(store);
        let id = id.to_string();
        let doc = doc.clone();
        let guard = guard.cloned();
        async move { store.update_one(collection, &id, doc, guard.as_ref()).await }
    })
    .await?)
}

async fn delete_doc(
    store: &Arc<dyn DocumentStore>,
    retry: &RetryPolicy,
    operation: &'static str,
    collection: Collection,
    id: &str,
) -> Result<bool> {
    Ok(run_with_retry(retry, operation, || {
        let store = Arc::clone(store);
        let id = id.to_string();
        async move { store.delete_one(collection, &id).await }
    })
    .await?)
}

/// CRUD for usecases.
pub struct UsecaseRepository {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl UsecaseRepository {
    /// Create a repository over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Persist a new usecase. Fails with [`Error::Conflict`] if the id exists.
    pub async fn create(&self, usecase: &Usecase) -> Result<()> {
        let doc = serde_json::to_value(usecase)?;
        insert_doc(
            &self.store,
            &self.retry,
            "usecases.insert",
            Collection::Usecases,
            &usecase.id.to_string(),
            doc,
        )
        .await
    }

    /// Fetch a usecase by id.
    pub async fn get(&self, id: UsecaseId) -> Result<Usecase> {
        let doc = fetch_doc(
            &self.store,
            &self.retry,
            "usecases.find",
            Collection::Usecases,
            &id.to_string(),
        )
        .await?
        .ok_or_else(|| Error::not_found("usecase", id))?;
        Ok(serde_json::from_value(doc)?)
    }

    /// List all usecases in creation order.
    pub async fn list(&self) -> Result<Vec<Usecase>> {
        let docs = fetch_docs(
            &self.store,
            &self.retry,
            "usecases.list",
            Collection::Usecases,
            &Filter::new(),
        )
        .await?;
        let mut usecases = docs
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<Usecase>, _>>()?;
        usecases.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(usecases)
    }

    /// Replace a stored usecase. Fails with [`Error::NotFound`] if absent.
    pub async fn update(&self, usecase: &Usecase) -> Result<()> {
        let doc = serde_json::to_value(usecase)?;
        let applied = update_doc(
            &self.store,
            &self.retry,
            "usecases.update",
            Collection::Usecases,
            &usecase.id.to_string(),
            doc,
            None,
        )
        .await?;
        if !applied {
            return Err(Error::not_found("usecase", usecase.id));
        }
        Ok(())
    }

    /// Delete a usecase. Fails with [`Error::NotFound`] if absent.
    pub async fn delete(&self, id: UsecaseId) -> Result<()> {
        let deleted = delete_doc(
            &self.store,
            &self.retry,
            "usecases.delete",
            Collection::Usecases,
            &id.to_string(),
        )
        .await?;
        if !deleted {
            return Err(Error::not_found("usecase", id));
        }
        Ok(())
    }
}

/// CRUD for datasets, scoped to their owning usecase.
pub struct DatasetRepository {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl DatasetRepository {
    /// Create a repository over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Persist a new dataset.
    pub async fn create(&self, dataset: &Dataset) -> Result<()> {
        let doc = serde_json::to_value(dataset)?;
        insert_doc(
            &self.store,
            &self.retry,
            "datasets.insert",
            Collection::Datasets,
            &dataset.id.to_string(),
            doc,
        )
        .await
    }

    /// Fetch a dataset, checking it belongs to the usecase.
    pub async fn get(&self, usecase_id: UsecaseId, id: DatasetId) -> Result<Dataset> {
        let doc = fetch_doc(
            &self.store,
            &self.retry,
            "datasets.find",
            Collection::Datasets,
            &id.to_string(),
        )
        .await?
        .ok_or_else(|| Error::not_found("dataset", id))?;
        let dataset: Dataset = serde_json::from_value(doc)?;
        if dataset.usecase_id != usecase_id {
            return Err(Error::not_found("dataset", id));
        }
        Ok(dataset)
    }

    /// List a usecase's datasets in creation order.
    pub async fn list(&self, usecase_id: UsecaseId) -> Result<Vec<Dataset>> {
        let filter = Filter::new().eq("usecase_id", usecase_id.to_string());
        let docs = fetch_docs(
            &self.store,
            &self.retry,
            "datasets.list",
            Collection::Datasets,
            &filter,
        )
        .await?;
        let mut datasets = docs
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<Dataset>, _>>()?;
        datasets.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(datasets)
    }

    /// Look a dataset up by its alias within a usecase.
    pub async fn find_by_alias(
        &self,
        usecase_id: UsecaseId,
        alias: &str,
    ) -> Result<Option<Dataset>> {
        let filter = Filter::new()
            .eq("usecase_id", usecase_id.to_string())
            .eq("alias", alias);
        let mut docs = fetch_docs(
            &self.store,
            &self.retry,
            "datasets.find_by_alias",
            Collection::Datasets,
            &filter,
        )
        .await?;
        match docs.pop() {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Replace a stored dataset. Fails with [`Error::NotFound`] if absent.
    pub async fn update(&self, dataset: &Dataset) -> Result<()> {
        let doc = serde_json::to_value(dataset)?;
        let applied = update_doc(
            &self.store,
            &self.retry,
            "datasets.update",
            Collection::Datasets,
            &dataset.id.to_string(),
            doc,
            None,
        )
        .await?;
        if !applied {
            return Err(Error::not_found("dataset", dataset.id));
        }
        Ok(())
    }

    /// Delete a dataset after checking ownership.
    pub async fn delete(&self, usecase_id: UsecaseId, id: DatasetId) -> Result<()> {
        self.get(usecase_id, id).await?;
        let deleted = delete_doc(
            &self.store,
            &self.retry,
            "datasets.delete",
            Collection::Datasets,
            &id.to_string(),
        )
        .await?;
        if !deleted {
            return Err(Error::not_found("dataset", id));
        }
        Ok(())
    }
}

/// CRUD for evaluations, scoped to their owning usecase.
pub struct EvaluationRepository {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl EvaluationRepository {
    /// Create a repository over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Persist a new evaluation.
    pub async fn create(&self, evaluation: &Evaluation) -> Result<()> {
        let doc = serde_json::to_value(evaluation)?;
        insert_doc(
            &self.store,
            &self.retry,
            "evaluations.insert",
            Collection::Evaluations,
            &evaluation.id.to_string(),
            doc,
        )
        .await
    }

    /// Fetch an evaluation, checking it belongs to the usecase.
    pub async fn get(&self, usecase_id: UsecaseId, id: EvaluationId) -> Result<Evaluation> {
        let doc = fetch_doc(
            &self.store,
            &self.retry,
            "evaluations.find",
            Collection::Evaluations,
            &id.to_string(),
        )
        .await?
        .ok_or_else(|| Error::not_found("evaluation", id))?;
        let evaluation: Evaluation = serde_json::from_value(doc)?;
        if evaluation.usecase_id != usecase_id {
            return Err(Error::not_found("evaluation", id));
        }
        Ok(evaluation)
    }

    /// List a usecase's evaluations, optionally filtered by status, in
    /// creation order, windowed by `page`.
    pub async fn list(
        &self,
        usecase_id: UsecaseId,
        status: Option<EvaluationStatus>,
        page: Page,
    ) -> Result<Vec<Evaluation>> {
        let mut filter = Filter::new().eq("usecase_id", usecase_id.to_string());
        if let Some(status) = status {
            filter = filter.eq("status", status.as_str());
        }
        let docs = fetch_docs(
            &self.store,
            &self.retry,
            "evaluations.list",
            Collection::Evaluations,
            &filter,
        )
        .await?;
        let mut evaluations = docs
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<Evaluation>, _>>()?;
        evaluations.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(page.apply(evaluations))
    }

    /// List running evaluations across every usecase (timeout sweeping).
    pub async fn list_running(&self) -> Result<Vec<Evaluation>> {
        let filter = Filter::new().eq("status", EvaluationStatus::Running.as_str());
        let docs = fetch_docs(
            &self.store,
            &self.retry,
            "evaluations.list_running",
            Collection::Evaluations,
            &filter,
        )
        .await?;
        Ok(docs
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<Evaluation>, _>>()?)
    }

    /// Replace a stored evaluation unconditionally.
    pub async fn update(&self, evaluation: &Evaluation) -> Result<()> {
        let doc = serde_json::to_value(evaluation)?;
        let applied = update_doc(
            &self.store,
            &self.retry,
            "evaluations.update",
            Collection::Evaluations,
            &evaluation.id.to_string(),
            doc,
            None,
        )
        .await?;
        if !applied {
            return Err(Error::not_found("evaluation", evaluation.id));
        }
        Ok(())
    }

    /// Replace a stored evaluation only if its status is still `expected`.
    ///
    /// Returns `Ok(false)` when another writer changed the status first.
    pub async fn update_status_guarded(
        &self,
        evaluation: &Evaluation,
        expected: EvaluationStatus,
    ) -> Result<bool> {
        let doc = serde_json::to_value(evaluation)?;
        let guard = CasGuard::on("status", expected.as_str());
        update_doc(
            &self.store,
            &self.retry,
            "evaluations.update_status",
            Collection::Evaluations,
            &evaluation.id.to_string(),
            doc,
            Some(&guard),
        )
        .await
    }

    /// Delete an evaluation after checking ownership.
    pub async fn delete(&self, usecase_id: UsecaseId, id: EvaluationId) -> Result<()> {
        self.get(usecase_id, id).await?;
        let deleted = delete_doc(
            &self.store,
            &self.retry,
            "evaluations.delete",
            Collection::Evaluations,
            &id.to_string(),
        )
        .await?;
        if !deleted {
            return Err(Error::not_found("evaluation", id));
        }
        Ok(())
    }
}
