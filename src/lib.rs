//! # jobswarm
//!
//! Job queue coordinator over a transactional key-value entity store.
//!
//! Workers create, find and claim jobs through [`JobSwarm`]; a privileged
//! [`Controller`] runs arbitrary queries, finds stale jobs, writes raw
//! entities and deletes in batches. Stores implement
//! [`storage::Datastore`]: [`db::Db`] on Postgres, [`MemoryStore`] in
//! process. Observability goes through OpenTelemetry.

pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod filter;
pub mod model;
pub mod storage;
pub mod swarm;
pub mod telemetry;
pub mod validate;

pub use config::SwarmConfig;
pub use error::{Error, Result};
pub use filter::{Clause, Filter};
pub use model::{Job, JobStatus, NewJob};
pub use storage::MemoryStore;
pub use swarm::{Controller, JobSwarm};
