//! Privileged client: arbitrary queries, stale scans, raw writes, deletes.

use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde_json::Value;
use tracing::info;

use super::JobSwarm;
use crate::config::SwarmConfig;
use crate::entity::Record;
use crate::error::Result;
use crate::filter::{Clause, Filter};
use crate::model::{Job, JobStatus, timestamp};
use crate::storage::{Datastore, MutationResult, StoredEntity};
use crate::telemetry::metrics;
use crate::validate::{require_non_empty, type_error};

/// Controller client. Dereferences to [`JobSwarm`] for worker operations.
#[derive(Debug, Clone)]
pub struct Controller {
    swarm: JobSwarm,
}

impl Deref for Controller {
    type Target = JobSwarm;

    fn deref(&self) -> &JobSwarm {
        &self.swarm
    }
}

impl Controller {
    /// Build a controller. Fails with `Error::Permission` unless
    /// `config.controller` is set.
    pub fn new(config: SwarmConfig, store: Arc<dyn Datastore>) -> Result<Self> {
        JobSwarm::new(config, store)?.into_controller()
    }

    pub(super) fn from_swarm(swarm: JobSwarm) -> Self {
        Self { swarm }
    }

    /// Run `filter` and return raw entities. Each OR branch is a separate
    /// query with the filter's order and limit; results are concatenated
    /// and not deduplicated.
    pub async fn get_entities(&self, filter: &Filter) -> Result<Vec<StoredEntity>> {
        self.swarm.query_entities(filter).await
    }

    /// [`Controller::get_entities`], decoded as jobs.
    ///
    /// A single record that does not decode as a job fails the whole call
    /// with [`Error::Serialization`](crate::error::Error::Serialization).
    /// Use [`Controller::get_entities`] to read collections that may hold
    /// foreign or partial records.
    pub async fn get_jobs(&self, filter: &Filter) -> Result<Vec<Job>> {
        self.swarm.query_jobs(filter).await
    }

    /// Active jobs started before the `stale_after` cutoff and reserved jobs
    /// reserved before the `stale_after_reserved` cutoff.
    pub async fn get_stale_jobs(&self, job_type: Option<&str>) -> Result<Vec<Job>> {
        let filter = stale_filter(self.config(), Utc::now(), job_type)?;
        self.get_jobs(&filter).await
    }

    /// Write an arbitrary record. A string `kind` field picks the collection
    /// and is not stored.
    pub async fn create_raw_entity(&self, mut record: Record) -> Result<MutationResult> {
        let kind = match record.remove("kind") {
            None => self.config().entity_kind.clone(),
            Some(Value::String(kind)) => {
                require_non_empty("Entity kind", &kind)?;
                kind
            }
            Some(other) => return Err(type_error("Entity kind", "String", &other)),
        };
        let result = self.swarm.save_records(&kind, vec![record]).await?;
        info!(%kind, "raw entity created");
        Ok(result)
    }

    pub async fn delete_job(&self, job: &Job) -> Result<MutationResult> {
        let key = job.key()?.clone();
        let kind = key.kind.clone();
        let result = self.store().delete(vec![key]).await?;
        metrics::jobs_deleted().add(result.count as u64, &[KeyValue::new("kind", kind)]);
        Ok(result)
    }

    /// Delete everything `filter` matches, `max_delete_length` keys per
    /// store call, one call at a time.
    pub async fn delete_jobs(&self, filter: &Filter) -> Result<MutationResult> {
        let keys: Vec<_> = self
            .get_entities(filter)
            .await?
            .into_iter()
            .map(|entity| entity.key)
            .collect();

        let mut total = MutationResult::default();
        for batch in keys.chunks(self.config().max_delete_length) {
            let result = self.store().delete(batch.to_vec()).await?;
            metrics::jobs_deleted().add(
                result.count as u64,
                &[KeyValue::new("kind", self.config().entity_kind.clone())],
            );
            total += result;
        }
        info!(deleted = total.count, matched = keys.len(), "bulk delete finished");
        Ok(total)
    }
}

/// `status=active AND startTime < active cutoff` OR
/// `status=reserved AND reservationTime < reserved cutoff`, each narrowed by
/// `job_type` when given.
pub(crate) fn stale_filter(
    config: &SwarmConfig,
    now: DateTime<Utc>,
    job_type: Option<&str>,
) -> Result<Filter> {
    let (active_cutoff, reserved_cutoff) = config.stale_cutoffs(now)?;

    let with_type = |clause: Clause| match job_type {
        Some(job_type) => clause.eq("type", job_type),
        None => clause,
    };
    let active = Clause::new()
        .eq("status", JobStatus::Active.as_str())
        .lt("startTime", timestamp::format(&active_cutoff));
    let reserved = Clause::new()
        .eq("status", JobStatus::Reserved.as_str())
        .lt("reservationTime", timestamp::format(&reserved_cutoff));

    Ok(Filter::any_of(vec![with_type(active), with_type(reserved)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::filter::{Comparator, Where};
    use chrono::TimeZone;

    fn stale_config() -> SwarmConfig {
        SwarmConfig {
            controller: true,
            stale_after: Some("30 minutes".into()),
            stale_after_reserved: Some("10 minutes".into()),
            ..SwarmConfig::new("proj", "ns")
        }
    }

    #[test]
    fn stale_filter_has_one_branch_per_claim_state() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let filter = stale_filter(&stale_config(), now, Some("render")).unwrap();
        let Where::AnyOf(branches) = &filter.clause else {
            panic!("expected a disjunction");
        };
        assert_eq!(branches.len(), 2);

        let queries = filter.queries("ns", "Job");
        let active = &queries[0].predicates;
        assert_eq!(active[1].field, "startTime");
        assert_eq!(active[1].op, Comparator::Lt);
        assert_eq!(active[1].value, "2024-05-01T11:30:00.000Z");
        assert_eq!(active[2].field, "type");

        let reserved = &queries[1].predicates;
        assert_eq!(reserved[1].field, "reservationTime");
        assert_eq!(reserved[1].value, "2024-05-01T11:50:00.000Z");
    }

    #[test]
    fn stale_filter_requires_durations() {
        let config = SwarmConfig {
            stale_after_reserved: None,
            ..stale_config()
        };
        assert!(matches!(
            stale_filter(&config, Utc::now(), None),
            Err(Error::Config(_))
        ));
    }
}
