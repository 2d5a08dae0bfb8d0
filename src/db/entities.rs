//! Entity reads, queries, writes and transactions via direct SQLx.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use super::Db;
use crate::entity::{Entity, EntityKey, Record, decode};
use crate::error::{Error, Result};
use crate::filter::Query;
use crate::storage::{Datastore, MutationResult, StoredEntity, Transaction};

#[async_trait]
impl Datastore for Db {
    async fn get(&self, key: &EntityKey) -> Result<Option<Record>> {
        let row: Option<(Json<Value>,)> = sqlx::query_as(
            "SELECT data FROM entities
             WHERE project_id = $1 AND namespace = $2 AND kind = $3 AND id = $4",
        )
        .bind(&self.project_id)
        .bind(&key.namespace)
        .bind(&key.kind)
        .bind(key.id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(data,)| into_record(data.0, key)).transpose()
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<StoredEntity>> {
        let mut builder = select_query(&self.project_id, query)?;
        let rows: Vec<EntityRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(EntityRow::into_stored).collect()
    }

    async fn save(&self, entities: Vec<Entity>) -> Result<MutationResult> {
        let mut tx = self.pool.begin().await?;
        for entity in &entities {
            upsert(&mut tx, &self.project_id, entity).await?;
        }
        tx.commit().await?;
        Ok(MutationResult::new(entities.len()))
    }

    async fn delete(&self, keys: Vec<EntityKey>) -> Result<MutationResult> {
        let namespaces: Vec<String> = keys.iter().map(|k| k.namespace.clone()).collect();
        let kinds: Vec<String> = keys.iter().map(|k| k.kind.clone()).collect();
        let ids: Vec<Uuid> = keys.iter().map(|k| k.id).collect();

        let deleted = sqlx::query(
            "DELETE FROM entities
             WHERE project_id = $1
             AND (namespace, kind, id) IN (
                 SELECT * FROM UNNEST($2::text[], $3::text[], $4::uuid[])
             )",
        )
        .bind(&self.project_id)
        .bind(namespaces)
        .bind(kinds)
        .bind(ids)
        .execute(&self.pool)
        .await?
        .rows_affected();

        debug!(requested = keys.len(), deleted, "delete batch executed");
        Ok(MutationResult::new(keys.len()))
    }

    async fn transaction(&self) -> Result<Box<dyn Transaction>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTransaction {
            tx: Some(tx),
            project_id: self.project_id.clone(),
            writes: 0,
        }))
    }
}

/// Repeatable-read transaction over a pooled connection. Rows read are
/// locked until the transaction ends; a transaction that reads or writes a
/// row another one has changed since its snapshot fails with
/// [`Error::Conflict`].
pub struct PgTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
    project_id: String,
    writes: usize,
}

impl PgTransaction {
    fn open(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| Error::Other("transaction already finished".into()))
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn get(&mut self, key: &EntityKey) -> Result<Option<Record>> {
        let project_id = self.project_id.clone();
        let tx = self.open()?;
        let row: Option<(Json<Value>,)> = sqlx::query_as(
            "SELECT data FROM entities
             WHERE project_id = $1 AND namespace = $2 AND kind = $3 AND id = $4
             FOR UPDATE",
        )
        .bind(project_id)
        .bind(&key.namespace)
        .bind(&key.kind)
        .bind(key.id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|err| serialization_conflict(err, key))?;

        row.map(|(data,)| into_record(data.0, key)).transpose()
    }

    async fn save(&mut self, entity: Entity) -> Result<()> {
        let project_id = self.project_id.clone();
        let tx = self.open()?;
        upsert(tx, &project_id, &entity)
            .await
            .map_err(|err| match err {
                Error::Database(err) => serialization_conflict(err, &entity.key),
                other => other,
            })?;
        self.writes += 1;
        Ok(())
    }

    async fn commit(&mut self) -> Result<MutationResult> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| Error::Other("transaction already finished".into()))?;
        tx.commit().await.map_err(|err| match err {
            sqlx::Error::Database(db) if is_serialization_failure(db.code().as_deref()) => {
                Error::Conflict(format!("transaction commit failed: {db}"))
            }
            other => Error::Database(other),
        })?;
        Ok(MutationResult::new(self.writes))
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

/// SQLSTATE 40001 (serialization failure) and 40P01 (deadlock).
fn is_serialization_failure(code: Option<&str>) -> bool {
    matches!(code, Some("40001") | Some("40P01"))
}

fn serialization_conflict(err: sqlx::Error, key: &EntityKey) -> Error {
    match err {
        sqlx::Error::Database(db) if is_serialization_failure(db.code().as_deref()) => {
            Error::Conflict(format!("entity {key} changed concurrently: {db}"))
        }
        other => Error::Database(other),
    }
}

async fn upsert(conn: &mut PgConnection, project_id: &str, entity: &Entity) -> Result<()> {
    let unindexed: Vec<String> = entity
        .fields
        .iter()
        .filter(|f| f.exclude_from_indexes)
        .map(|f| f.name.clone())
        .collect();

    sqlx::query(
        "INSERT INTO entities (project_id, namespace, kind, id, data, unindexed)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (project_id, namespace, kind, id)
         DO UPDATE SET data = EXCLUDED.data, unindexed = EXCLUDED.unindexed",
    )
    .bind(project_id)
    .bind(&entity.key.namespace)
    .bind(&entity.key.kind)
    .bind(entity.key.id)
    .bind(Json(Value::Object(decode(&entity.fields))))
    .bind(unindexed)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Conjunctive SELECT for `query`. Each predicate and the order field must
/// be present and indexed; comparisons only hold between like-typed values.
fn select_query(project_id: &str, query: &Query) -> Result<QueryBuilder<'static, Postgres>> {
    let mut builder = QueryBuilder::new(
        "SELECT namespace, kind, id, data FROM entities WHERE project_id = ",
    );
    builder.push_bind(project_id.to_string());
    builder.push(" AND namespace = ").push_bind(query.namespace.clone());
    builder.push(" AND kind = ").push_bind(query.kind.clone());

    for predicate in &query.predicates {
        push_indexed(&mut builder, &predicate.field);
        builder
            .push(" AND jsonb_typeof(data -> ")
            .push_bind(predicate.field.clone())
            .push(") = jsonb_typeof(")
            .push_bind(Json(predicate.value.clone()))
            .push(")");
        builder
            .push(" AND data -> ")
            .push_bind(predicate.field.clone())
            .push(format!(" {} ", predicate.op.symbol()))
            .push_bind(Json(predicate.value.clone()));
    }

    match &query.order {
        Some(field) => {
            push_indexed(&mut builder, field);
            builder
                .push(" ORDER BY data -> ")
                .push_bind(field.clone())
                .push(", seq");
        }
        None => {
            builder.push(" ORDER BY seq");
        }
    }
    if let Some(limit) = query.limit {
        let limit = i64::try_from(limit)
            .map_err(|_| Error::Validation(format!("query limit {limit} is too large")))?;
        builder.push(" LIMIT ").push_bind(limit);
    }
    Ok(builder)
}

fn push_indexed(builder: &mut QueryBuilder<'static, Postgres>, field: &str) {
    builder
        .push(" AND data ? ")
        .push_bind(field.to_string())
        .push(" AND NOT (")
        .push_bind(field.to_string())
        .push(" = ANY(unindexed))");
}

#[derive(sqlx::FromRow)]
struct EntityRow {
    namespace: String,
    kind: String,
    id: Uuid,
    data: Json<Value>,
}

impl EntityRow {
    fn into_stored(self) -> Result<StoredEntity> {
        let key = EntityKey::new(self.namespace, self.kind, self.id);
        let record = into_record(self.data.0, &key)?;
        Ok(StoredEntity { key, record })
    }
}

fn into_record(data: Value, key: &EntityKey) -> Result<Record> {
    match data {
        Value::Object(record) => Ok(record),
        other => Err(Error::Other(format!(
            "entity {key} holds a non-object value: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(limit: Option<usize>) -> Query {
        Query {
            namespace: "testing".into(),
            kind: "Job".into(),
            predicates: Vec::new(),
            order: None,
            limit,
        }
    }

    #[test]
    fn limit_is_bound() {
        let builder = select_query("proj", &query(Some(3))).unwrap();
        assert!(builder.sql().ends_with(" LIMIT $4"));
    }

    #[test]
    fn oversized_limit_is_rejected() {
        let Err(err) = select_query("proj", &query(Some(usize::MAX))) else {
            panic!("expected an error for an oversized limit");
        };
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn serialization_failures_are_recognized() {
        assert!(is_serialization_failure(Some("40001")));
        assert!(is_serialization_failure(Some("40P01")));
        assert!(!is_serialization_failure(Some("23505")));
        assert!(!is_serialization_failure(None));
    }
}
