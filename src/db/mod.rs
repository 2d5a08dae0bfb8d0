//! Postgres-backed [`Datastore`](crate::storage::Datastore).
//!
//! Entities are JSONB rows keyed by (project, namespace, kind, id). Field
//! names excluded from indexing are listed per row and never match query
//! predicates. Transactions run at `REPEATABLE READ` and lock the rows they
//! read with `FOR UPDATE`. Of two overlapping transitions of one job the
//! later one fails with [`Error::Conflict`](crate::error::Error::Conflict).

mod entities;

use crate::error::{Error, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool; scoped to one project.
pub struct Db {
    pool: PgPool,
    project_id: String,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str, project_id: impl Into<String>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self {
            pool,
            project_id: project_id.into(),
        })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }
}
