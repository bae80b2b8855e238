//! PostgreSQL store backend.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info};

use super::{Condition, Record, Store, StoreError, StoreQuery, sql};
use crate::schema::{DbType, LiveColumn, LiveTable, SchemaChange};

/// Store backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a driver error, recognising unique violations (SQLSTATE 23505).
fn map_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err
        && db.code().as_deref() == Some("23505")
    {
        return StoreError::UniqueViolation {
            index: db.constraint().map(str::to_string),
        };
    }
    StoreError::Database(err)
}

fn into_record(value: Value) -> Result<Record, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Decode(format!("expected object row, got {other}"))),
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn select(&self, query: &StoreQuery) -> Result<Vec<Record>, StoreError> {
        let statement = sql::select_json(query);
        debug!(sql = %statement, "select");

        let rows: Vec<Value> = sqlx::query_scalar(&statement)
            .fetch_all(&self.pool)
            .await
            .map_err(map_error)?;

        rows.into_iter().map(into_record).collect()
    }

    async fn count(&self, query: &StoreQuery) -> Result<u64, StoreError> {
        let statement = sql::count(query);
        let total: i64 = sqlx::query_scalar(&statement)
            .fetch_one(&self.pool)
            .await
            .map_err(map_error)?;
        Ok(total.max(0) as u64)
    }

    async fn insert(&self, table: &str, row: &Record) -> Result<Record, StoreError> {
        let statement =
            sql::insert_json(table, row).map_err(|e| StoreError::Statement(e.to_string()))?;

        let stored: Value = sqlx::query_scalar(&statement)
            .fetch_one(&self.pool)
            .await
            .map_err(map_error)?;

        into_record(stored)
    }

    async fn update(
        &self,
        table: &str,
        condition: &Condition,
        changes: &Record,
    ) -> Result<u64, StoreError> {
        if changes.is_empty() {
            return Ok(0);
        }
        let statement = sql::update(table, condition, changes);
        let result = sqlx::query(&statement)
            .execute(&self.pool)
            .await
            .map_err(map_error)?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, table: &str, condition: &Condition) -> Result<u64, StoreError> {
        let statement = sql::delete(table, condition);
        let result = sqlx::query(&statement)
            .execute(&self.pool)
            .await
            .map_err(map_error)?;
        Ok(result.rows_affected())
    }

    async fn describe(&self, table: &str) -> Result<Option<LiveTable>, StoreError> {
        let columns: Vec<(String, String)> = sqlx::query_as(
            "SELECT column_name::text, data_type::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        if columns.is_empty() {
            return Ok(None);
        }

        let index_names: Vec<String> = sqlx::query_scalar(
            "SELECT indexname::text FROM pg_indexes \
             WHERE schemaname = current_schema() AND tablename = $1",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(LiveTable {
            columns: columns
                .into_iter()
                .map(|(name, data_type)| LiveColumn {
                    db_type: DbType::from_postgres(&data_type),
                    name,
                })
                .collect(),
            index_names,
        }))
    }

    async fn apply(&self, changes: &[SchemaChange]) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for change in changes {
            for statement in sql::schema_change(change) {
                debug!(sql = %statement, "executing schema change");
                sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&statement))
                    .await
                    .map_err(map_error)?;
            }
        }
        tx.commit().await?;

        info!(count = changes.len(), "schema changes applied");
        Ok(())
    }

    async fn healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
