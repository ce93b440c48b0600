//! Service facade over repositories and the metrics aggregator.
//!
//! `EvalHub` owns all cross-entity rules: parent-existence checks, alias
//! uniqueness, restricted deletes, dataset immutability, and the serialized
//! status-transition path. Transitions on one evaluation are linearized by a
//! per-id async lock plus a compare-and-set on the previous status, so two
//! writers racing the same evaluation see exactly one winner.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use evalhub_store::DocumentStore;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::EvalHubConfig;
use crate::dataset::{Dataset, DatasetDraft};
use crate::error::{Error, Result};
use crate::evaluation::{Evaluation, EvaluationStatus, Transition};
use crate::metrics::{MetricRecord, MetricsAggregator};
use crate::repository::{DatasetRepository, EvaluationRepository, Page, UsecaseRepository};
use crate::types::{DatasetId, EvaluationId, UsecaseId};
use crate::usecase::{Usecase, UsecaseDraft};

/// The evaluation management service.
pub struct EvalHub {
    usecases: UsecaseRepository,
    datasets: DatasetRepository,
    evaluations: EvaluationRepository,
    aggregator: MetricsAggregator,
    config: EvalHubConfig,
    // Per-evaluation transition locks; entries are removed once no task
    // holds a reference.
    transition_locks: Mutex<HashMap<EvaluationId, Arc<Mutex<()>>>>,
}

impl EvalHub {
    /// Create the service over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, config: EvalHubConfig) -> Self {
        let retry = config.retry.clone();
        Self {
            usecases: UsecaseRepository::new(Arc::clone(&store), retry.clone()),
            datasets: DatasetRepository::new(Arc::clone(&store), retry.clone()),
            evaluations: EvaluationRepository::new(Arc::clone(&store), retry.clone()),
            aggregator: MetricsAggregator::new(store, retry),
            config,
            transition_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration this service was built with.
    #[must_use]
    pub fn config(&self) -> &EvalHubConfig {
        &self.config
    }

    // --- usecases ---

    /// Create a usecase from a draft.
    pub async fn create_usecase(&self, draft: UsecaseDraft) -> Result<Usecase> {
        draft.validate()?;
        let usecase = Usecase::new(UsecaseId::new(), draft, Utc::now());
        self.usecases.create(&usecase).await?;
        debug!(usecase_id = %usecase.id, name = %usecase.name, "created usecase");
        Ok(usecase)
    }

    /// Fetch a usecase by id.
    pub async fn get_usecase(&self, id: UsecaseId) -> Result<Usecase> {
        self.usecases.get(id).await
    }

    /// List all usecases in creation order.
    pub async fn list_usecases(&self) -> Result<Vec<Usecase>> {
        self.usecases.list().await
    }

    /// Apply an update draft to a usecase.
    pub async fn update_usecase(&self, id: UsecaseId, draft: UsecaseDraft) -> Result<Usecase> {
        draft.validate()?;
        let mut usecase = self.usecases.get(id).await?;
        usecase.apply(draft, Utc::now());
        self.usecases.update(&usecase).await?;
        Ok(usecase)
    }

    /// Delete a usecase.
    ///
    /// Refused with [`Error::Conflict`] while datasets or evaluations exist,
    /// unless `force` is set, in which case children are deleted first.
    /// Metric rollups are left for retention to reclaim.
    pub async fn delete_usecase(&self, id: UsecaseId, force: bool) -> Result<()> {
        self.usecases.get(id).await?;
        let datasets = self.datasets.list(id).await?;
        let evaluations = self.evaluations.list(id, None, Page::all()).await?;

        if !force && (!datasets.is_empty() || !evaluations.is_empty()) {
            return Err(Error::Conflict(format!(
                "usecase {id} still has {} dataset(s) and {} evaluation(s)",
                datasets.len(),
                evaluations.len()
            )));
        }

        for evaluation in &evaluations {
            self.evaluations.delete(id, evaluation.id).await?;
        }
        for dataset in &datasets {
            self.datasets.delete(id, dataset.id).await?;
        }
        self.usecases.delete(id).await?;
        debug!(usecase_id = %id, force, "deleted usecase");
        Ok(())
    }

    // --- datasets ---

    /// Create a dataset under a usecase. The alias must be unique within
    /// the usecase.
    pub async fn create_dataset(&self, usecase_id: UsecaseId, draft: DatasetDraft) -> Result<Dataset> {
        draft.validate()?;
        self.usecases.get(usecase_id).await?;
        if self
            .datasets
            .find_by_alias(usecase_id, &draft.alias)
            .await?
            .is_some()
        {
            return Err(Error::Conflict(format!(
                "dataset alias '{}' already exists in usecase {usecase_id}",
                draft.alias
            )));
        }
        let dataset = Dataset::new(DatasetId::new(), usecase_id, draft, Utc::now());
        self.datasets.create(&dataset).await?;
        debug!(usecase_id = %usecase_id, dataset_id = %dataset.id, alias = %dataset.alias, "created dataset");
        Ok(dataset)
    }

    /// Fetch a dataset by id within a usecase.
    pub async fn get_dataset(&self, usecase_id: UsecaseId, id: DatasetId) -> Result<Dataset> {
        self.datasets.get(usecase_id, id).await
    }

    /// List a usecase's datasets in creation order.
    pub async fn list_datasets(&self, usecase_id: UsecaseId) -> Result<Vec<Dataset>> {
        self.usecases.get(usecase_id).await?;
        self.datasets.list(usecase_id).await
    }

    /// Apply an update draft to a dataset.
    ///
    /// Refused with [`Error::Conflict`] once a completed evaluation
    /// references the dataset, to keep recorded metrics reproducible.
    pub async fn update_dataset(
        &self,
        usecase_id: UsecaseId,
        id: DatasetId,
        draft: DatasetDraft,
    ) -> Result<Dataset> {
        draft.validate()?;
        let mut dataset = self.datasets.get(usecase_id, id).await?;

        let completed = self
            .evaluations
            .list(usecase_id, Some(EvaluationStatus::Completed), Page::all())
            .await?;
        if completed.iter().any(|e| e.dataset_id == id) {
            return Err(Error::Conflict(format!(
                "dataset {id} is referenced by a completed evaluation and is immutable"
            )));
        }

        if draft.alias != dataset.alias
            && self
                .datasets
                .find_by_alias(usecase_id, &draft.alias)
                .await?
                .is_some()
        {
            return Err(Error::Conflict(format!(
                "dataset alias '{}' already exists in usecase {usecase_id}",
                draft.alias
            )));
        }

        dataset.apply(draft, Utc::now());
        self.datasets.update(&dataset).await?;
        Ok(dataset)
    }

    /// Delete a dataset. Refused with [`Error::Conflict`] while any
    /// evaluation references it.
    pub async fn delete_dataset(&self, usecase_id: UsecaseId, id: DatasetId) -> Result<()> {
        self.datasets.get(usecase_id, id).await?;
        let evaluations = self.evaluations.list(usecase_id, None, Page::all()).await?;
        if evaluations.iter().any(|e| e.dataset_id == id) {
            return Err(Error::Conflict(format!(
                "dataset {id} is still referenced by evaluations"
            )));
        }
        self.datasets.delete(usecase_id, id).await
    }

    // --- evaluations ---

    /// Create a pending evaluation of the given dataset.
    pub async fn create_evaluation(
        &self,
        usecase_id: UsecaseId,
        dataset_id: DatasetId,
        name: impl Into<String>,
    ) -> Result<Evaluation> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::Validation("evaluation name must not be empty".into()));
        }
        // Ownership check on the dataset implies the usecase exists.
        self.datasets.get(usecase_id, dataset_id).await?;
        let evaluation = Evaluation::new(EvaluationId::new(), usecase_id, dataset_id, name, Utc::now());
        self.evaluations.create(&evaluation).await?;
        debug!(usecase_id = %usecase_id, evaluation_id = %evaluation.id, "created evaluation");
        Ok(evaluation)
    }

    /// Fetch an evaluation by id within a usecase.
    pub async fn get_evaluation(
        &self,
        usecase_id: UsecaseId,
        id: EvaluationId,
    ) -> Result<Evaluation> {
        self.evaluations.get(usecase_id, id).await
    }

    /// List a usecase's evaluations in creation order, optionally filtered
    /// by status and windowed.
    pub async fn list_evaluations(
        &self,
        usecase_id: UsecaseId,
        status: Option<EvaluationStatus>,
        page: Page,
    ) -> Result<Vec<Evaluation>> {
        self.usecases.get(usecase_id).await?;
        self.evaluations.list(usecase_id, status, page).await
    }

    /// List running evaluations across every usecase.
    pub async fn list_running_evaluations(&self) -> Result<Vec<Evaluation>> {
        self.evaluations.list_running().await
    }

    /// Delete an evaluation. Its metric record, if any, is left for
    /// retention to reclaim.
    pub async fn delete_evaluation(&self, usecase_id: UsecaseId, id: EvaluationId) -> Result<()> {
        self.evaluations.delete(usecase_id, id).await
    }

    /// Apply a status transition to an evaluation.
    ///
    /// Transitions on the same evaluation are serialized: the per-id lock
    /// orders local callers, and the status compare-and-set catches writers
    /// that bypassed the lock (another process on the same store). A lost
    /// race surfaces as [`Error::InvalidTransition`] against the committed
    /// status. On completion the metrics are forwarded to the aggregator;
    /// a rollup that already exists is treated as already recorded.
    pub async fn update_status(
        &self,
        usecase_id: UsecaseId,
        evaluation_id: EvaluationId,
        transition: Transition,
    ) -> Result<Evaluation> {
        let lock = self.transition_lock(evaluation_id).await;
        let guard = lock.lock_owned().await;
        let result = self
            .apply_status_locked(usecase_id, evaluation_id, transition)
            .await;
        drop(guard);
        self.release_transition_lock(evaluation_id).await;
        result
    }

    async fn apply_status_locked(
        &self,
        usecase_id: UsecaseId,
        evaluation_id: EvaluationId,
        transition: Transition,
    ) -> Result<Evaluation> {
        let mut evaluation = self.evaluations.get(usecase_id, evaluation_id).await?;
        let previous = evaluation.status;
        evaluation.apply_transition(&transition, Utc::now())?;

        let won = self
            .evaluations
            .update_status_guarded(&evaluation, previous)
            .await?;
        if !won {
            // Another writer committed first; report against its result.
            let current = self.evaluations.get(usecase_id, evaluation_id).await?;
            return Err(Error::InvalidTransition {
                from: current.status,
                to: transition.target(),
            });
        }
        debug!(
            evaluation_id = %evaluation_id,
            from = previous.as_str(),
            to = evaluation.status.as_str(),
            "evaluation status changed"
        );

        if let Transition::Complete { metrics } = &transition {
            match self
                .aggregator
                .record(usecase_id, evaluation.dataset_id, evaluation_id, metrics)
                .await
            {
                Ok(()) => {}
                Err(Error::DuplicateMetricRecord { .. }) => {
                    debug!(evaluation_id = %evaluation_id, "metrics already recorded");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(evaluation)
    }

    async fn transition_lock(&self, id: EvaluationId) -> Arc<Mutex<()>> {
        let mut table = self.transition_locks.lock().await;
        Arc::clone(table.entry(id).or_default())
    }

    async fn release_transition_lock(&self, id: EvaluationId) {
        let mut table = self.transition_locks.lock().await;
        if let Some(entry) = table.get(&id)
            && Arc::strong_count(entry) == 1
        {
            table.remove(&id);
        }
    }

    // --- metrics ---

    /// Fetch the metric rollup for a usecase, one of its datasets, or one
    /// of its evaluations.
    pub async fn get_metrics(
        &self,
        usecase_id: UsecaseId,
        dataset_id: Option<DatasetId>,
        evaluation_id: Option<EvaluationId>,
    ) -> Result<MetricRecord> {
        self.aggregator.query(usecase_id, dataset_id, evaluation_id).await
    }

    /// Purge metric rollups older than the retention window, measured from
    /// `now`. Returns how many were removed.
    pub async fn purge_expired_metrics(&self, now: DateTime<Utc>) -> Result<usize> {
        self.aggregator
            .purge_older_than(self.config.retention_cutoff(now))
            .await
    }

    /// Record metrics for an evaluation directly. Used by the completion
    /// path; exposed for backfill tooling.
    pub async fn record_metrics(
        &self,
        usecase_id: UsecaseId,
        dataset_id: DatasetId,
        evaluation_id: EvaluationId,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<()> {
        self.aggregator
            .record(usecase_id, dataset_id, evaluation_id, metrics)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalhub_store::MemoryStore;

    fn hub() -> EvalHub {
        EvalHub::new(Arc::new(MemoryStore::new()), EvalHubConfig::default())
    }

    fn values(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    async fn seeded(hub: &EvalHub) -> (Usecase, Dataset, Evaluation) {
        let usecase = hub
            .create_usecase(UsecaseDraft::new("support-bot"))
            .await
            .unwrap();
        let dataset = hub
            .create_dataset(usecase.id, DatasetDraft::new("suite").with_record("2+2", "4"))
            .await
            .unwrap();
        let evaluation = hub
            .create_evaluation(usecase.id, dataset.id, "nightly")
            .await
            .unwrap();
        (usecase, dataset, evaluation)
    }

    #[tokio::test]
    async fn create_get_roundtrip() {
        let hub = hub();
        let (usecase, dataset, evaluation) = seeded(&hub).await;

        assert_eq!(hub.get_usecase(usecase.id).await.unwrap(), usecase);
        assert_eq!(hub.get_dataset(usecase.id, dataset.id).await.unwrap(), dataset);
        assert_eq!(
            hub.get_evaluation(usecase.id, evaluation.id).await.unwrap(),
            evaluation
        );
        assert_eq!(evaluation.status, EvaluationStatus::Pending);
    }

    #[tokio::test]
    async fn dataset_requires_existing_usecase() {
        let hub = hub();
        let err = hub
            .create_dataset(UsecaseId::new(), DatasetDraft::new("suite"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "usecase", .. }));
    }

    #[tokio::test]
    async fn duplicate_alias_in_usecase_conflicts() {
        let hub = hub();
        let (usecase, _, _) = seeded(&hub).await;

        let err = hub
            .create_dataset(usecase.id, DatasetDraft::new("suite"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Same alias under a different usecase is fine.
        let other = hub.create_usecase(UsecaseDraft::new("other")).await.unwrap();
        assert!(hub
            .create_dataset(other.id, DatasetDraft::new("suite"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn full_lifecycle_records_metrics() {
        let hub = hub();
        let (usecase, dataset, evaluation) = seeded(&hub).await;

        hub.update_status(usecase.id, evaluation.id, Transition::Start)
            .await
            .unwrap();
        let completed = hub
            .update_status(
                usecase.id,
                evaluation.id,
                Transition::Complete {
                    metrics: values(&[("accuracy", 0.95)]),
                },
            )
            .await
            .unwrap();

        assert_eq!(completed.status, EvaluationStatus::Completed);
        assert!(completed.completed_at.is_some());

        let rollup = hub
            .get_metrics(usecase.id, Some(dataset.id), None)
            .await
            .unwrap();
        assert_eq!(rollup.metrics["accuracy"].count, 1);
        assert!((rollup.metrics["accuracy"].mean - 0.95).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn cancel_pending_evaluation() {
        let hub = hub();
        let (usecase, _, evaluation) = seeded(&hub).await;

        let cancelled = hub
            .update_status(usecase.id, evaluation.id, Transition::Cancel)
            .await
            .unwrap();
        assert_eq!(cancelled.status, EvaluationStatus::Cancelled);

        // Terminal: no further transitions.
        let err = hub
            .update_status(usecase.id, evaluation.id, Transition::Start)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn racing_transitions_have_exactly_one_winner() {
        let hub = hub();
        let (usecase, _, evaluation) = seeded(&hub).await;
        hub.update_status(usecase.id, evaluation.id, Transition::Start)
            .await
            .unwrap();

        let (complete, cancel) = tokio::join!(
            hub.update_status(
                usecase.id,
                evaluation.id,
                Transition::Complete {
                    metrics: values(&[("accuracy", 1.0)]),
                },
            ),
            hub.update_status(usecase.id, evaluation.id, Transition::Cancel),
        );

        assert!(complete.is_ok() != cancel.is_ok());
        let loser = if complete.is_ok() { cancel } else { complete };
        assert!(matches!(loser, Err(Error::InvalidTransition { .. })));

        let settled = hub.get_evaluation(usecase.id, evaluation.id).await.unwrap();
        assert!(settled.status.is_terminal());
    }

    #[tokio::test]
    async fn transition_lock_table_is_garbage_collected() {
        let hub = hub();
        let (usecase, _, evaluation) = seeded(&hub).await;

        hub.update_status(usecase.id, evaluation.id, Transition::Start)
            .await
            .unwrap();

        assert!(hub.transition_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn delete_usecase_with_children_requires_force() {
        let hub = hub();
        let (usecase, _, _) = seeded(&hub).await;

        let err = hub.delete_usecase(usecase.id, false).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        hub.delete_usecase(usecase.id, true).await.unwrap();
        assert!(matches!(
            hub.get_usecase(usecase.id).await,
            Err(Error::NotFound { .. })
        ));
        assert!(hub.list_usecases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dataset_is_immutable_after_completed_evaluation() {
        let hub = hub();
        let (usecase, dataset, evaluation) = seeded(&hub).await;

        // Mutable while the evaluation has not completed.
        hub.update_dataset(
            usecase.id,
            dataset.id,
            DatasetDraft::new("suite").with_record("3+3", "6"),
        )
        .await
        .unwrap();

        hub.update_status(usecase.id, evaluation.id, Transition::Start)
            .await
            .unwrap();
        hub.update_status(
            usecase.id,
            evaluation.id,
            Transition::Complete {
                metrics: values(&[("accuracy", 1.0)]),
            },
        )
        .await
        .unwrap();

        let err = hub
            .update_dataset(usecase.id, dataset.id, DatasetDraft::new("suite"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn dataset_delete_refused_while_referenced() {
        let hub = hub();
        let (usecase, dataset, evaluation) = seeded(&hub).await;

        let err = hub.delete_dataset(usecase.id, dataset.id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        hub.delete_evaluation(usecase.id, evaluation.id).await.unwrap();
        hub.delete_dataset(usecase.id, dataset.id).await.unwrap();
    }

    #[tokio::test]
    async fn list_evaluations_orders_and_filters() {
        let hub = hub();
        let (usecase, dataset, first) = seeded(&hub).await;
        let second = hub
            .create_evaluation(usecase.id, dataset.id, "second")
            .await
            .unwrap();

        hub.update_status(usecase.id, first.id, Transition::Start)
            .await
            .unwrap();

        let running = hub
            .list_evaluations(usecase.id, Some(EvaluationStatus::Running), Page::all())
            .await
            .unwrap();
        assert_eq!(running.iter().map(|e| e.id).collect::<Vec<_>>(), [first.id]);

        let pending = hub
            .list_evaluations(usecase.id, Some(EvaluationStatus::Pending), Page::all())
            .await
            .unwrap();
        assert_eq!(pending.iter().map(|e| e.id).collect::<Vec<_>>(), [second.id]);
    }

    #[tokio::test]
    async fn purge_expired_metrics_respects_retention() {
        let hub = hub();
        let (usecase, _, evaluation) = seeded(&hub).await;
        hub.update_status(usecase.id, evaluation.id, Transition::Start)
            .await
            .unwrap();
        hub.update_status(
            usecase.id,
            evaluation.id,
            Transition::Complete {
                metrics: values(&[("accuracy", 1.0)]),
            },
        )
        .await
        .unwrap();

        // Fresh rollups survive a purge at the current time.
        assert_eq!(hub.purge_expired_metrics(Utc::now()).await.unwrap(), 0);

        // Past the retention window everything goes.
        let later = Utc::now() + chrono::Duration::days(31);
        assert_eq!(hub.purge_expired_metrics(later).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn empty_evaluation_name_fails_validation() {
        let hub = hub();
        let (usecase, dataset, _) = seeded(&hub).await;

        let err = hub
            .create_evaluation(usecase.id, dataset.id, "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
