//! SQLite state execution instance repository.
//!
//! Implements `InstanceRepository` from `shipyard-core`. Each instance is
//! stored as a JSON document next to the columns the executor queries by;
//! the implicit rowid preserves creation order.

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use shipyard_core::repository::InstanceRepository;
use shipyard_types::error::RepositoryError;
use shipyard_types::instance::StateExecutionInstance;
use shipyard_types::status::ExecutionStatus;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `InstanceRepository`.
pub struct SqliteInstanceRepository {
    pool: DatabasePool,
}

impl SqliteInstanceRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn query_error(e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => RepositoryError::Connection,
        other => RepositoryError::Query(other.to_string()),
    }
}

fn encode(instance: &StateExecutionInstance) -> Result<String, RepositoryError> {
    serde_json::to_string(instance)
        .map_err(|e| RepositoryError::Query(format!("serialize instance: {e}")))
}

fn decode_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<StateExecutionInstance>, RepositoryError> {
    rows.iter()
        .map(|row| {
            let body: String = row.try_get("body").map_err(query_error)?;
            serde_json::from_str(&body)
                .map_err(|e| RepositoryError::Query(format!("invalid instance JSON: {e}")))
        })
        .collect()
}

/// `?, ?, ...` for an IN clause of `n` values.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

const INSERT_SQL: &str = r#"INSERT INTO state_execution_instances
    (id, app_id, execution_id, parent_instance_id, state_name, status, body, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#;

// ---------------------------------------------------------------------------
// InstanceRepository impl
// ---------------------------------------------------------------------------

impl InstanceRepository for SqliteInstanceRepository {
    async fn insert(&self, instance: &StateExecutionInstance) -> Result<(), RepositoryError> {
        self.insert_all(std::slice::from_ref(instance)).await
    }

    async fn insert_all(&self, instances: &[StateExecutionInstance]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        for instance in instances {
            let body = encode(instance)?;
            let now = Utc::now().to_rfc3339();
            sqlx::query(INSERT_SQL)
                .bind(instance.id.to_string())
                .bind(&instance.app_id)
                .bind(instance.execution_id.to_string())
                .bind(instance.parent_instance_id.map(|id| id.to_string()))
                .bind(&instance.state_name)
                .bind(instance.status.as_str())
                .bind(&body)
                .bind(instance.created_at.to_rfc3339())
                .bind(&now)
                .execute(&mut *tx)
                .await
                .map_err(query_error)?;
        }
        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn get(
        &self,
        app_id: &str,
        instance_id: Uuid,
    ) -> Result<Option<StateExecutionInstance>, RepositoryError> {
        let rows = sqlx::query("SELECT body FROM state_execution_instances WHERE app_id = ? AND id = ?")
            .bind(app_id)
            .bind(instance_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;
        Ok(decode_rows(&rows)?.into_iter().next())
    }

    async fn update_if_status(
        &self,
        instance: &StateExecutionInstance,
        expected: &[ExecutionStatus],
    ) -> Result<bool, RepositoryError> {
        if expected.is_empty() {
            return Ok(false);
        }
        let sql = format!(
            "UPDATE state_execution_instances SET status = ?, body = ?, updated_at = ? \
             WHERE app_id = ? AND id = ? AND status IN ({})",
            placeholders(expected.len())
        );
        let body = encode(instance)?;
        let mut query = sqlx::query(&sql)
            .bind(instance.status.as_str())
            .bind(&body)
            .bind(Utc::now().to_rfc3339())
            .bind(&instance.app_id)
            .bind(instance.id.to_string());
        for status in expected {
            query = query.bind(status.as_str());
        }

        let result = query.execute(&self.pool.writer).await.map_err(query_error)?;
        if result.rows_affected() == 0 {
            tracing::debug!(
                instance_id = %instance.id,
                status = %instance.status,
                "status compare-and-set missed"
            );
        }
        Ok(result.rows_affected() > 0)
    }

    async fn list_by_parent(
        &self,
        app_id: &str,
        parent_id: Uuid,
    ) -> Result<Vec<StateExecutionInstance>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT body FROM state_execution_instances WHERE app_id = ? AND parent_instance_id = ? ORDER BY rowid",
        )
        .bind(app_id)
        .bind(parent_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;
        decode_rows(&rows)
    }

    async fn list_by_execution(
        &self,
        app_id: &str,
        execution_id: Uuid,
    ) -> Result<Vec<StateExecutionInstance>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT body FROM state_execution_instances WHERE app_id = ? AND execution_id = ? ORDER BY rowid",
        )
        .bind(app_id)
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;
        decode_rows(&rows)
    }

    async fn list_active(&self) -> Result<Vec<StateExecutionInstance>, RepositoryError> {
        let sql = format!(
            "SELECT body FROM state_execution_instances WHERE status IN ({}) ORDER BY rowid",
            placeholders(ExecutionStatus::ACTIVE.len())
        );
        let mut query = sqlx::query(&sql);
        for status in ExecutionStatus::ACTIVE {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool.reader).await.map_err(query_error)?;
        decode_rows(&rows)
    }
}
