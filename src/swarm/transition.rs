//! Transactional read-modify-write of a single job.
//!
//! The store overwrites whole records, so a transition reads the current
//! record inside a transaction, merges its field delta over it, writes it
//! back under the same key and commits. Any failure after the transaction
//! begins rolls it back and surfaces the original error.

use std::time::Instant;

use opentelemetry::KeyValue;
use serde_json::Value;
use tracing::{Instrument, debug, warn};

use super::JobSwarm;
use crate::entity::{Entity, EntityKey};
use crate::error::{Error, Result};
use crate::model::{Job, JobStatus, Transition, timestamp};
use crate::storage::{MutationResult, Transaction};
use crate::telemetry::job::{record_status_change, start_transition_span};
use crate::telemetry::metrics;

impl JobSwarm {
    pub(crate) async fn apply_transition(
        &self,
        job: &Job,
        transition: Transition,
    ) -> Result<MutationResult> {
        let key = job.key()?.clone();
        let span = start_transition_span(transition.name(), &key);
        let started = Instant::now();

        let outcome = async {
            let mut tx = self.store().transaction().await?;
            match self.merge_and_commit(&mut *tx, &key, &transition).await {
                Ok(result) => Ok(result),
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(%key, error = %rollback_err, "rollback failed");
                    }
                    Err(e)
                }
            }
        }
        .instrument(span.clone())
        .await;

        let result_label = match &outcome {
            Ok(_) => "ok",
            Err(Error::NotFound(_)) => "not_found",
            Err(Error::Conflict(_)) => "conflict",
            Err(_) => "error",
        };
        metrics::job_transitions().add(
            1,
            &[
                KeyValue::new("transition", transition.name()),
                KeyValue::new("result", result_label),
            ],
        );
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "job.transition")],
        );
        outcome
    }

    async fn merge_and_commit(
        &self,
        tx: &mut dyn Transaction,
        key: &EntityKey,
        transition: &Transition,
    ) -> Result<MutationResult> {
        let mut current = tx
            .get(key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("entity with key {key} does not exist")))?;

        let to = transition.status();
        let from = current
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        record_status_change(&tracing::Span::current(), &from, to.as_str());
        if let Ok(from) = from.parse::<JobStatus>() {
            if from != to && !from.can_transition_to(to) {
                debug!(%key, %from, %to, "transition outside the lifecycle graph");
            }
        }

        current.extend(transition.fields(timestamp::now()));
        tx.save(Entity::new(
            key.clone(),
            &current,
            self.config().max_index_length,
        ))
        .await?;
        tx.commit().await
    }
}
