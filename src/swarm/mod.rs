//! Job queue coordinator. The public API for creating, claiming and
//! transitioning jobs.
//!
//! [`JobSwarm`] is the worker client. [`Controller`] is the privileged
//! client for arbitrary queries, raw writes and deletes; it can only be
//! obtained from a configuration with `controller = true`.
//!
//! Nothing is cached between calls: every transition re-reads the current
//! record inside a store transaction before writing. The coordinator never
//! retries. A caller that loses a race for a job gets the store's error and
//! decides what to do next.

mod controller;
mod transition;

pub use controller::Controller;

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{debug, info};

use crate::config::SwarmConfig;
use crate::entity::{Entity, EntityKey, Record};
use crate::error::{Error, Result};
use crate::filter::{Clause, Filter, Query};
use crate::model::{FailureDetail, Job, JobStatus, NewJob, Transition};
use crate::storage::{Datastore, MutationResult, StoredEntity};
use crate::telemetry::metrics;

struct Shared {
    config: SwarmConfig,
    store: Arc<dyn Datastore>,
}

/// Worker client. Cheap to clone; clones share configuration and store.
#[derive(Clone)]
pub struct JobSwarm {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for JobSwarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSwarm")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl JobSwarm {
    /// Validate `config` and build a client over `store`.
    pub fn new(config: SwarmConfig, store: Arc<dyn Datastore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared { config, store }),
        })
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.shared.config
    }

    /// Upgrade to the privileged client. Fails unless the configuration
    /// grants the controller capability.
    pub fn into_controller(self) -> Result<Controller> {
        if !self.config().controller {
            return Err(Error::Permission);
        }
        Ok(Controller::from_swarm(self))
    }

    pub(crate) fn store(&self) -> &dyn Datastore {
        self.shared.store.as_ref()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get_job(&self, key: &EntityKey) -> Result<Option<Job>> {
        let Some(record) = self.store().get(key).await? else {
            return Ok(None);
        };
        Job::from_stored(StoredEntity {
            key: key.clone(),
            record,
        })
        .map(Some)
    }

    /// The earliest-created open job, optionally narrowed by name and type.
    ///
    /// With `last_job_only` the store sorts by `created` and returns one
    /// match. Without it every match is fetched and the earliest is picked
    /// here.
    pub async fn get_next_job(
        &self,
        name: Option<&str>,
        job_type: Option<&str>,
        last_job_only: bool,
    ) -> Result<Option<Job>> {
        let clause = narrow(Clause::new().eq("status", JobStatus::Open.as_str()), name, job_type);

        if last_job_only {
            let filter = Filter::matching(clause).order("created").limit(1);
            return Ok(self.query_jobs(&filter).await?.into_iter().next());
        }

        let jobs = self.query_jobs(&Filter::matching(clause)).await?;
        Ok(jobs.into_iter().min_by_key(|job| job.created))
    }

    pub async fn get_existing_active_jobs(
        &self,
        name: Option<&str>,
        job_type: Option<&str>,
    ) -> Result<Vec<Job>> {
        let clause = narrow(
            Clause::new().eq("status", JobStatus::Active.as_str()),
            name,
            job_type,
        );
        self.query_jobs(&Filter::matching(clause)).await
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Create one open job, or one sibling per chunk for an oversized payload.
    pub async fn create_open_job(&self, new: NewJob) -> Result<MutationResult> {
        let config = self.config();
        let name = new.name.clone();
        let jobs = new.into_jobs(&config.environment, config.max_field_length)?;
        let chunked = jobs.len() > 1;

        let records = jobs
            .iter()
            .map(Job::to_record)
            .collect::<Result<Vec<_>>>()?;
        let result = self.save_records(&config.entity_kind, records).await?;

        metrics::jobs_created().add(
            result.count as u64,
            &[
                KeyValue::new("kind", config.entity_kind.clone()),
                KeyValue::new("chunked", chunked.to_string()),
            ],
        );
        info!(%name, records = result.count, chunked, "open job created");
        Ok(result)
    }

    /// Create jobs one at a time, in order. Stops at the first failure;
    /// jobs created before it stay created.
    pub async fn create_jobs(&self, items: Vec<NewJob>) -> Result<MutationResult> {
        let mut total = MutationResult::default();
        for item in items {
            total += self.create_open_job(item).await?;
        }
        Ok(total)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    pub async fn activate_job(&self, job: &Job) -> Result<MutationResult> {
        self.apply_transition(job, Transition::Activate).await
    }

    pub async fn complete_job(&self, job: &Job) -> Result<MutationResult> {
        self.apply_transition(job, Transition::Complete).await
    }

    /// Mark the job failed, recording `error`.
    pub async fn complete_job_with_error(
        &self,
        job: &Job,
        error: impl Into<FailureDetail>,
    ) -> Result<MutationResult> {
        self.apply_transition(job, Transition::Fail(error.into()))
            .await
    }

    pub async fn skip_job(&self, job: &Job) -> Result<MutationResult> {
        self.apply_transition(job, Transition::Skip).await
    }

    pub async fn mark_job_stale(&self, job: &Job) -> Result<MutationResult> {
        self.apply_transition(job, Transition::MarkStale).await
    }

    /// Claim the job for `claimant` without activating it.
    pub async fn reserve_job(
        &self,
        job: &Job,
        claimant: impl Into<String>,
    ) -> Result<MutationResult> {
        self.apply_transition(
            job,
            Transition::Reserve {
                claimant: claimant.into(),
            },
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Store plumbing
    // -----------------------------------------------------------------------

    /// Run every branch of `filter` in order and concatenate the results.
    /// Overlapping branches yield duplicates.
    pub(crate) async fn query_entities(&self, filter: &Filter) -> Result<Vec<StoredEntity>> {
        let config = self.config();
        let mut results = Vec::new();
        for query in filter.queries(&config.namespace, &config.entity_kind) {
            results.extend(self.run_query(&query).await?);
        }
        Ok(results)
    }

    /// All-or-nothing: the first record that is not a job fails the call.
    pub(crate) async fn query_jobs(&self, filter: &Filter) -> Result<Vec<Job>> {
        self.query_entities(filter)
            .await?
            .into_iter()
            .map(Job::from_stored)
            .collect()
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<StoredEntity>> {
        let started = Instant::now();
        let hits = self.store().run_query(query).await?;
        metrics::queries().add(1, &[KeyValue::new("kind", query.kind.clone())]);
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "query")],
        );
        debug!(
            kind = %query.kind,
            predicates = query.predicates.len(),
            hits = hits.len(),
            "query executed"
        );
        Ok(hits)
    }

    /// Save records as new entities of `kind` in one store call.
    pub(crate) async fn save_records(
        &self,
        kind: &str,
        records: Vec<Record>,
    ) -> Result<MutationResult> {
        let config = self.config();
        let entities = records
            .iter()
            .map(|record| {
                let key = self.store().new_key(&config.namespace, kind);
                Entity::new(key, record, config.max_index_length)
            })
            .collect();
        self.store().save(entities).await
    }
}

fn narrow(mut clause: Clause, name: Option<&str>, job_type: Option<&str>) -> Clause {
    if let Some(name) = name {
        clause = clause.eq("name", name);
    }
    if let Some(job_type) = job_type {
        clause = clause.eq("type", job_type);
    }
    clause
}
