//! Metric rollups at usecase, dataset and evaluation granularity.
//!
//! Completing an evaluation feeds its metrics here. The evaluation-level
//! record is an exact copy of the reported values; dataset- and
//! usecase-level rollups fold values in with an incremental mean, so they
//! never need to re-read sibling evaluations.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use evalhub_store::{CasGuard, Collection, DocumentStore, Filter, RetryPolicy, run_with_retry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{DatasetId, EvaluationId, UsecaseId};

/// Running aggregate of one named metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStat {
    /// Number of observations folded in.
    pub count: u64,
    /// Mean of the observations.
    pub mean: f64,
}

impl MetricStat {
    /// Fold one observation into the running mean.
    pub fn observe(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }
}

/// A stored rollup document at one granularity.
///
/// `version` is bumped on every rollup update and guards the
/// read-modify-write cycle against concurrent writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Owning usecase.
    pub usecase_id: UsecaseId,

    /// Dataset scope, when rolled up per dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<DatasetId>,

    /// Evaluation scope, when this is a single evaluation's record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_id: Option<EvaluationId>,

    /// Per-metric running aggregates.
    pub metrics: BTreeMap<String, MetricStat>,

    /// Compare-and-set version, bumped on every update.
    pub version: u64,

    /// When the record was last written; drives retention.
    pub updated_at: DateTime<Utc>,
}

impl MetricRecord {
    fn new(
        usecase_id: UsecaseId,
        dataset_id: Option<DatasetId>,
        evaluation_id: Option<EvaluationId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            usecase_id,
            dataset_id,
            evaluation_id,
            metrics: BTreeMap::new(),
            version: 0,
            updated_at: now,
        }
    }

    /// Storage key for this record's granularity.
    #[must_use]
    pub fn key(&self) -> String {
        rollup_key(
            &self.usecase_id,
            self.dataset_id.as_ref(),
            self.evaluation_id.as_ref(),
        )
    }

    fn observe_all(&mut self, values: &BTreeMap<String, f64>, now: DateTime<Utc>) {
        for (name, value) in values {
            self.metrics.entry(name.clone()).or_default().observe(*value);
        }
        self.updated_at = now;
    }
}

/// Storage key for a rollup. Evaluation scope takes precedence over dataset
/// scope, so an evaluation record is addressable without knowing its dataset.
#[must_use]
pub fn rollup_key(
    usecase_id: &UsecaseId,
    dataset_id: Option<&DatasetId>,
    evaluation_id: Option<&EvaluationId>,
) -> String {
    match (dataset_id, evaluation_id) {
        (_, Some(evaluation_id)) => format!("usecase/{usecase_id}/evaluation/{evaluation_id}"),
        (Some(dataset_id), None) => format!("usecase/{usecase_id}/dataset/{dataset_id}"),
        (None, None) => format!("usecase/{usecase_id}"),
    }
}

/// Maintains metric rollups in the `metrics` collection.
pub struct MetricsAggregator {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

// Bound on the compare-and-set loop for one rollup update.
const MAX_CAS_ROUNDS: u32 = 16;

impl MetricsAggregator {
    /// Create an aggregator over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Record a completed evaluation's metrics.
    ///
    /// Inserts the evaluation-level record first; if one already exists the
    /// call fails with [`Error::DuplicateMetricRecord`] and the rollups are
    /// untouched, so a replayed completion cannot double-count. On first
    /// insert the values are then folded into the dataset- and
    /// usecase-level rollups.
    pub async fn record(
        &self,
        usecase_id: UsecaseId,
        dataset_id: DatasetId,
        evaluation_id: EvaluationId,
        values: &BTreeMap<String, f64>,
    ) -> Result<()> {
        if values.is_empty() {
            return Err(Error::Validation("metrics payload must not be empty".into()));
        }

        let now = Utc::now();
        let mut record = MetricRecord::new(usecase_id, Some(dataset_id), Some(evaluation_id), now);
        record.observe_all(values, now);

        match self.insert(&record.key(), &record).await {
            Ok(()) => {}
            Err(Error::Conflict(_)) => {
                return Err(Error::DuplicateMetricRecord {
                    evaluation_id: evaluation_id.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
        debug!(%usecase_id, %evaluation_id, "recorded evaluation metrics");

        self.fold_into_rollup(usecase_id, Some(dataset_id), values)
            .await?;
        self.fold_into_rollup(usecase_id, None, values).await?;
        Ok(())
    }

    /// Fetch the rollup for the given scope.
    pub async fn query(
        &self,
        usecase_id: UsecaseId,
        dataset_id: Option<DatasetId>,
        evaluation_id: Option<EvaluationId>,
    ) -> Result<MetricRecord> {
        let key = rollup_key(&usecase_id, dataset_id.as_ref(), evaluation_id.as_ref());
        let doc = self
            .find(&key)
            .await?
            .ok_or_else(|| Error::not_found("metrics", &key))?;
        Ok(serde_json::from_value(doc)?)
    }

    /// Delete rollups last written before the cutoff. Returns how many were
    /// removed.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let store = &self.store;
        let docs = run_with_retry(&self.retry, "metrics.list", || {
            let store = Arc::clone(store);
            async move { store.find_many(Collection::Metrics, &Filter::new()).await }
        })
        .await?;

        let mut purged = 0;
        for doc in docs {
            let record: MetricRecord = serde_json::from_value(doc)?;
            if record.updated_at >= cutoff {
                continue;
            }
            let key = record.key();
            let deleted = run_with_retry(&self.retry, "metrics.delete", || {
                let store = Arc::clone(store);
                let key = key.clone();
                async move { store.delete_one(Collection::Metrics, &key).await }
            })
            .await?;
            if deleted {
                purged += 1;
            }
        }

        if purged > 0 {
            info!(purged, %cutoff, "purged expired metric rollups");
        }
        Ok(purged)
    }

    /// Fold values into one rollup with a version-guarded
    /// read-modify-write loop.
    async fn fold_into_rollup(
        &self,
        usecase_id: UsecaseId,
        dataset_id: Option<DatasetId>,
        values: &BTreeMap<String, f64>,
    ) -> Result<()> {
        let key = rollup_key(&usecase_id, dataset_id.as_ref(), None);

        for _ in 0..MAX_CAS_ROUNDS {
            match self.find(&key).await? {
                None => {
                    let now = Utc::now();
                    let mut fresh = MetricRecord::new(usecase_id, dataset_id, None, now);
                    fresh.observe_all(values, now);
                    match self.insert(&key, &fresh).await {
                        Ok(()) => return Ok(()),
                        // Another writer created the rollup first; fold into
                        // theirs on the next round.
                        Err(Error::Conflict(_)) => continue,
                        Err(err) => return Err(err),
                    }
                }
                Some(doc) => {
                    let mut record: MetricRecord = serde_json::from_value(doc)?;
                    let guard = CasGuard::on("version", record.version);
                    record.version += 1;
                    record.observe_all(values, Utc::now());
                    if self.update(&key, &record, &guard).await? {
                        return Ok(());
                    }
                }
            }
        }

        Err(Error::Conflict(format!(
            "rollup {key} stayed contended for {MAX_CAS_ROUNDS} rounds"
        )))
    }

    async fn find(&self, key: &str) -> Result<Option<Value>> {
        let store = &self.store;
        Ok(run_with_retry(&self.retry, "metrics.find", || {
            let store = Arc::clone(store);
            let key = key.to_string();
            async move { store.find_one(Collection::Metrics, &key).await }
        })
        .await?)
    }

    async fn insert(&self, key: &str, record: &MetricRecord) -> Result<()> {
        let doc = serde_json::to_value(record)?;
        let store = &self.store;
        Ok(run_with_retry(&self.retry, "metrics.insert", || {
            let store = Arc::clone(store);
            let key = key.to_string();
            let doc = doc.clone();
            async move { store.insert_one(Collection::Metrics, &key, doc).await }
        })
        .await?)
    }

    async fn update(&self, key: &str, record: &MetricRecord, guard: &CasGuard) -> Result<bool> {
        let doc = serde_json::to_value(record)?;
        let store = &self.store;
        Ok(run_with_retry(&self.retry, "metrics.update", || {
            let store = Arc::clone(store);
            let key = key.to_string();
            let doc = doc.clone();
            let guard = guard.clone();
            async move {
                store
                    .update_one(Collection::Metrics, &key, doc, Some(&guard))
                    .await
            }
        })
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalhub_store::MemoryStore;

    fn aggregator() -> MetricsAggregator {
        MetricsAggregator::new(Arc::new(MemoryStore::new()), RetryPolicy::default())
    }

    fn values(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn observe_tracks_incremental_mean() {
        let mut stat = MetricStat::default();
        stat.observe(10.0);
        stat.observe(20.0);
        stat.observe(30.0);

        assert_eq!(stat.count, 3);
        assert!((stat.mean - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rollup_key_encodes_granularity() {
        let u = UsecaseId::new();
        let d = DatasetId::new();
        let e = EvaluationId::new();

        assert_eq!(rollup_key(&u, None, None), format!("usecase/{u}"));
        assert_eq!(
            rollup_key(&u, Some(&d), None),
            format!("usecase/{u}/dataset/{d}")
        );
        // Evaluation records are keyed without the dataset so they can be
        // looked up by evaluation id alone.
        assert_eq!(
            rollup_key(&u, Some(&d), Some(&e)),
            format!("usecase/{u}/evaluation/{e}")
        );
    }

    #[tokio::test]
    async fn record_writes_all_three_granularities() {
        let agg = aggregator();
        let u = UsecaseId::new();
        let d = DatasetId::new();
        let e = EvaluationId::new();

        agg.record(u, d, e, &values(&[("accuracy", 0.9)]))
            .await
            .unwrap();

        let eval_record = agg.query(u, None, Some(e)).await.unwrap();
        assert_eq!(eval_record.metrics["accuracy"].count, 1);
        assert!((eval_record.metrics["accuracy"].mean - 0.9).abs() < f64::EPSILON);

        let dataset_rollup = agg.query(u, Some(d), None).await.unwrap();
        assert_eq!(dataset_rollup.metrics["accuracy"].count, 1);

        let usecase_rollup = agg.query(u, None, None).await.unwrap();
        assert_eq!(usecase_rollup.metrics["accuracy"].count, 1);
    }

    #[tokio::test]
    async fn two_evaluations_fold_into_one_dataset_rollup() {
        let agg = aggregator();
        let u = UsecaseId::new();
        let d = DatasetId::new();

        agg.record(u, d, EvaluationId::new(), &values(&[("a", 10.0)]))
            .await
            .unwrap();
        agg.record(u, d, EvaluationId::new(), &values(&[("a", 20.0)]))
            .await
            .unwrap();

        let rollup = agg.query(u, Some(d), None).await.unwrap();
        assert_eq!(rollup.metrics["a"].count, 2);
        assert!((rollup.metrics["a"].mean - 15.0).abs() < f64::EPSILON);
        assert_eq!(rollup.version, 1);
    }

    #[tokio::test]
    async fn duplicate_record_is_rejected_and_rollups_unchanged() {
        let agg = aggregator();
        let u = UsecaseId::new();
        let d = DatasetId::new();
        let e = EvaluationId::new();

        agg.record(u, d, e, &values(&[("a", 10.0)])).await.unwrap();
        let err = agg
            .record(u, d, e, &values(&[("a", 99.0)]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DuplicateMetricRecord { .. }));
        let rollup = agg.query(u, Some(d), None).await.unwrap();
        assert_eq!(rollup.metrics["a"].count, 1);
        assert!((rollup.metrics["a"].mean - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn empty_payload_fails_validation() {
        let agg = aggregator();
        let err = agg
            .record(
                UsecaseId::new(),
                DatasetId::new(),
                EvaluationId::new(),
                &BTreeMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn query_missing_rollup_is_not_found() {
        let agg = aggregator();
        let err = agg
            .query(UsecaseId::new(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "metrics", .. }));
    }

    #[tokio::test]
    async fn purge_removes_only_records_older_than_cutoff() {
        let agg = aggregator();
        let u = UsecaseId::new();

        agg.record(u, DatasetId::new(), EvaluationId::new(), &values(&[("a", 1.0)]))
            .await
            .unwrap();

        // Nothing is older than a cutoff in the past.
        let past = Utc::now() - chrono::Duration::days(30);
        assert_eq!(agg.purge_older_than(past).await.unwrap(), 0);

        // Everything is older than a cutoff in the future.
        let future = Utc::now() + chrono::Duration::days(1);
        let purged = agg.purge_older_than(future).await.unwrap();
        assert_eq!(purged, 3);
        assert!(matches!(
            agg.query(u, None, None).await,
            Err(Error::NotFound { .. })
        ));
    }
}
