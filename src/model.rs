//! Core data model.
//!
//! A job is a named unit of work with an optional user-defined type, an
//! opaque payload, and a lifecycle status. Status changes are expressed as
//! [`Transition`]s: a target status plus the field delta merged onto the
//! stored record.

pub mod chunk;
pub mod timestamp;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{EntityKey, Record};
use crate::error::{Error, Result};
use crate::storage::StoredEntity;

use chunk::ChunkSequence;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A job record as stored in the backing collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Store key. Present on every job read back from the store; never
    /// serialized into the record itself.
    #[serde(skip)]
    pub key: Option<EntityKey>,

    pub name: String,

    /// User-defined category.
    #[serde(rename = "type", default)]
    pub job_type: Option<String>,

    pub status: JobStatus,

    /// Set once at creation.
    #[serde(with = "timestamp")]
    pub created: DateTime<Utc>,

    #[serde(default, with = "timestamp::option")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, with = "timestamp::option")]
    pub completion_time: Option<DateTime<Utc>>,

    #[serde(default, with = "timestamp::option")]
    pub reservation_time: Option<DateTime<Utc>>,

    /// Identity of the claimant that reserved this job.
    #[serde(default)]
    pub reservation: Option<String>,

    /// Failure detail recorded by a failed completion.
    #[serde(default)]
    pub error: Option<String>,

    /// Deployment environment the job was created in.
    #[serde(default)]
    pub environment: String,

    /// Opaque payload, or one chunk of it.
    #[serde(default)]
    pub data: Option<String>,
}

impl Job {
    /// A fresh open job.
    pub fn open(
        name: impl Into<String>,
        job_type: Option<String>,
        data: Option<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            key: None,
            name: name.into(),
            job_type,
            status: JobStatus::Open,
            created: timestamp::now(),
            start_time: None,
            completion_time: None,
            reservation_time: None,
            reservation: None,
            error: None,
            environment: environment.into(),
            data,
        }
    }

    /// The store key, or a validation error for jobs that were never stored.
    pub fn key(&self) -> Result<&EntityKey> {
        self.key.as_ref().ok_or_else(|| {
            Error::Validation(format!("unable to retrieve key for job `{}`", self.name))
        })
    }

    /// Flatten into a store record.
    pub fn to_record(&self) -> Result<Record> {
        match serde_json::to_value(self)? {
            Value::Object(record) => Ok(record),
            other => Err(Error::Other(format!(
                "job serialized to a non-object value: {other}"
            ))),
        }
    }

    /// Rebuild a job from a stored entity, keeping its key.
    pub fn from_stored(stored: StoredEntity) -> Result<Self> {
        let mut job: Job = serde_json::from_value(Value::Object(stored.record))?;
        job.key = Some(stored.key);
        Ok(job)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a worker.
    Open,
    /// A worker is processing it.
    Active,
    /// Claimed ahead of activation.
    Reserved,
    Complete,
    Failed,
    Skipped,
    /// A claim outlived its timeout. Needs corrective action.
    Stale,
}

impl JobStatus {
    /// Is `to` a forward edge of the lifecycle graph?
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Open, Active)
                | (Open, Reserved)
                | (Reserved, Active)
                | (Active, Complete)
                | (Active, Failed)
                | (Active, Skipped)
                | (Active, Stale)
                | (Reserved, Stale)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Open => "open",
            JobStatus::Active => "active",
            JobStatus::Reserved => "reserved",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
            JobStatus::Stale => "stale",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(JobStatus::Open),
            "active" => Ok(JobStatus::Active),
            "reserved" => Ok(JobStatus::Reserved),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            "skipped" => Ok(JobStatus::Skipped),
            "stale" => Ok(JobStatus::Stale),
            _ => Err(Error::Validation(format!("unknown job status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// A status change and the fields it writes.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Activate,
    Complete,
    Fail(FailureDetail),
    Skip,
    MarkStale,
    Reserve { claimant: String },
}

impl Transition {
    /// Status the job ends up in.
    pub fn status(&self) -> JobStatus {
        match self {
            Transition::Activate => JobStatus::Active,
            Transition::Complete => JobStatus::Complete,
            Transition::Fail(_) => JobStatus::Failed,
            Transition::Skip => JobStatus::Skipped,
            Transition::MarkStale => JobStatus::Stale,
            Transition::Reserve { .. } => JobStatus::Reserved,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transition::Activate => "activate",
            Transition::Complete => "complete",
            Transition::Fail(_) => "fail",
            Transition::Skip => "skip",
            Transition::MarkStale => "mark_stale",
            Transition::Reserve { .. } => "reserve",
        }
    }

    /// Field delta to merge over the stored record. Never touches `created`.
    pub fn fields(&self, now: DateTime<Utc>) -> Record {
        let now = Value::String(timestamp::format(&now));
        let mut fields = Record::new();
        fields.insert("status".into(), Value::String(self.status().to_string()));
        match self {
            Transition::Activate => {
                fields.insert("startTime".into(), now);
            }
            Transition::Complete | Transition::Skip => {
                fields.insert("completionTime".into(), now);
            }
            Transition::Fail(detail) => {
                fields.insert("error".into(), Value::String(detail.0.clone()));
                fields.insert("completionTime".into(), now);
            }
            Transition::MarkStale => {}
            Transition::Reserve { claimant } => {
                fields.insert("reservation".into(), Value::String(claimant.clone()));
                fields.insert("reservationTime".into(), now);
            }
        }
        fields
    }
}

/// Failure detail stored on a failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDetail(pub String);

impl FailureDetail {
    /// Serialize a structured error as a JSON string of its trace.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut trace = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            trace.push_str("\ncaused by: ");
            trace.push_str(&cause.to_string());
            source = cause.source();
        }
        Self(Value::String(trace).to_string())
    }
}

impl From<&str> for FailureDetail {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FailureDetail {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<Value> for FailureDetail {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self(s),
            other => Self(other.to_string()),
        }
    }
}

impl From<&Error> for FailureDetail {
    fn from(err: &Error) -> Self {
        Self::from_error(err)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for new open jobs.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub(crate) name: String,
    pub(crate) job_type: Option<String>,
    pub(crate) data: Option<String>,
    pub(crate) split_by: Option<String>,
}

impl NewJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            job_type: None,
            data: None,
            split_by: None,
        }
    }

    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Delimiter used to cut an oversized payload into chunks. Without one,
    /// the payload is cut at character boundaries.
    pub fn split_by(mut self, delimiter: impl Into<String>) -> Self {
        self.split_by = Some(delimiter.into());
        self
    }

    /// Expand into the open job records to write: one, or one per payload
    /// chunk when `data` reaches `max_field_length` bytes.
    ///
    /// Name and type are stored as given, blank strings included.
    pub fn into_jobs(self, environment: &str, max_field_length: usize) -> Result<Vec<Job>> {
        let Some(data) = self.data else {
            return Ok(vec![Job::open(self.name, self.job_type, None, environment)]);
        };
        if data.len() < max_field_length {
            return Ok(vec![Job::open(
                self.name,
                self.job_type,
                Some(data),
                environment,
            )]);
        }

        let chunks = ChunkSequence::split(&data, self.split_by.as_deref(), max_field_length)?;
        Ok(chunks
            .into_chunks()
            .into_iter()
            .map(|chunk| {
                Job::open(
                    self.name.clone(),
                    self.job_type.clone(),
                    Some(chunk),
                    environment,
                )
            })
            .collect())
    }
}
