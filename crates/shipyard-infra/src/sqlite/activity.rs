//! SQLite activity sink.
//!
//! `ActivitySink` is synchronous (states call it from `execute`), so writes
//! are handed to a background writer task over an unbounded channel and
//! applied in order.

use chrono::{DateTime, Utc};
use sqlx::Row;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use shipyard_core::collaborator::ActivitySink;
use shipyard_types::error::RepositoryError;
use shipyard_types::status::ExecutionStatus;
use shipyard_types::task::{Activity, ActivityKind};

use super::pool::DatabasePool;

enum ActivityWrite {
    Save(Activity),
    UpdateStatus { id: Uuid, status: ExecutionStatus },
}

/// Write-only activity sink backed by SQLite.
#[derive(Clone)]
pub struct SqliteActivitySink {
    writes: mpsc::UnboundedSender<ActivityWrite>,
}

impl SqliteActivitySink {
    /// Start the writer task.
    ///
    /// The task exits once every clone of the sink has been dropped and the
    /// queued writes are flushed; await the handle to wait for that.
    pub fn spawn(pool: DatabasePool) -> (Self, JoinHandle<()>) {
        let (writes, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            while let Some(write) = rx.recv().await {
                if let Err(e) = apply(&pool, write).await {
                    tracing::warn!(error = %e, "activity write failed");
                }
            }
            tracing::debug!("activity writer stopped");
        });
        (Self { writes }, handle)
    }

    fn send(&self, write: ActivityWrite) {
        if self.writes.send(write).is_err() {
            tracing::error!("activity writer stopped, activity dropped");
        }
    }
}

impl ActivitySink for SqliteActivitySink {
    fn save(&self, activity: Activity) -> Uuid {
        let id = activity.id;
        self.send(ActivityWrite::Save(activity));
        id
    }

    fn update_status(&self, activity_id: Uuid, status: ExecutionStatus) {
        self.send(ActivityWrite::UpdateStatus {
            id: activity_id,
            status,
        });
    }
}

fn kind_str(kind: ActivityKind) -> &'static str {
    match kind {
        ActivityKind::Command => "command",
        ActivityKind::Approval => "approval",
        ActivityKind::Verification => "verification",
    }
}

fn parse_kind(s: &str) -> Result<ActivityKind, RepositoryError> {
    match s {
        "command" => Ok(ActivityKind::Command),
        "approval" => Ok(ActivityKind::Approval),
        "verification" => Ok(ActivityKind::Verification),
        other => Err(RepositoryError::Query(format!("invalid activity kind: {other}"))),
    }
}

async fn apply(pool: &DatabasePool, write: ActivityWrite) -> Result<(), RepositoryError> {
    let now = Utc::now().to_rfc3339();
    let result = match write {
        ActivityWrite::Save(activity) => sqlx::query(
            r#"INSERT INTO activities
               (id, app_id, execution_id, instance_id, state_name, command_name, kind, status, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(activity.id.to_string())
        .bind(&activity.app_id)
        .bind(activity.execution_id.to_string())
        .bind(activity.instance_id.to_string())
        .bind(&activity.state_name)
        .bind(&activity.command_name)
        .bind(kind_str(activity.kind))
        .bind(activity.status.as_str())
        .bind(activity.created_at.to_rfc3339())
        .bind(&now)
        .execute(&pool.writer)
        .await,
        ActivityWrite::UpdateStatus { id, status } => {
            sqlx::query("UPDATE activities SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(&now)
                .bind(id.to_string())
                .execute(&pool.writer)
                .await
        }
    };
    result
        .map(|_| ())
        .map_err(|e| RepositoryError::Query(e.to_string()))
}

/// Activities of one execution, oldest first.
///
/// Read side for audit views; the engine itself never reads activities.
pub async fn list_activities(
    pool: &DatabasePool,
    app_id: &str,
    execution_id: Uuid,
) -> Result<Vec<Activity>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT * FROM activities WHERE app_id = ? AND execution_id = ? ORDER BY created_at, rowid",
    )
    .bind(app_id)
    .bind(execution_id.to_string())
    .fetch_all(&pool.reader)
    .await
    .map_err(|e| RepositoryError::Query(e.to_string()))?;

    rows.iter().map(row_to_activity).collect()
}

fn row_to_activity(row: &sqlx::sqlite::SqliteRow) -> Result<Activity, RepositoryError> {
    let get = |column: &str| -> Result<String, RepositoryError> {
        row.try_get(column)
            .map_err(|e| RepositoryError::Query(e.to_string()))
    };
    let uuid = |column: &str| -> Result<Uuid, RepositoryError> {
        get(column)?
            .parse()
            .map_err(|e| RepositoryError::Query(format!("invalid UUID in {column}: {e}")))
    };
    let status = get("status")?;
    let created_at = DateTime::parse_from_rfc3339(&get("created_at")?)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))?;

    Ok(Activity {
        id: uuid("id")?,
        app_id: get("app_id")?,
        execution_id: uuid("execution_id")?,
        instance_id: uuid("instance_id")?,
        state_name: get("state_name")?,
        command_name: get("command_name")?,
        kind: parse_kind(&get("kind")?)?,
        status: status
            .parse::<ExecutionStatus>()
            .map_err(RepositoryError::Query)?,
        created_at,
    })
}
