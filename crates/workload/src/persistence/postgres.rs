//! PostgreSQL implementation of WorkloadQueueStore
//!
//! Production persistence using PostgreSQL with:
//! - Lease-based polling with `FOR UPDATE SKIP LOCKED`
//! - A partial unique index enforcing one live queue item per workload
//! - Guarded status updates so terminal statuses never change
//! - A `workload_mutex` row per key, taken under `FOR UPDATE`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::workload::{NewWorkload, Workload, WorkloadLabel, WorkloadPriority, WorkloadStatus};

const WORKLOAD_COLUMNS: &str = "id, workload_type, priority, dataplane_group, dataplane_id, \
     status, mutex_key, labels, input_payload, log_path, auto_id, deadline, last_heartbeat_at, \
     termination_source, termination_reason, created_at, updated_at";

/// PostgreSQL implementation of WorkloadQueueStore
///
/// # Example
///
/// ```ignore
/// use workload_engine::PostgresWorkloadQueueStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/workloads").await?;
/// let store = PostgresWorkloadQueueStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresWorkloadQueueStore {
    pool: PgPool,
}

impl PostgresWorkloadQueueStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run workload migrations: {}", e);
                StoreError::Database(e.to_string())
            })
    }

    async fn load_status(&self, workload_id: &str) -> Result<WorkloadStatus, StoreError> {
        let row = sqlx::query("SELECT status FROM workload WHERE id = $1")
            .bind(workload_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to load workload status: {}", e);
                StoreError::Database(e.to_string())
            })?
            .ok_or_else(|| StoreError::WorkloadNotFound(workload_id.to_string()))?;

        parse_status(row.get("status"))
    }

    /// Shared path for success/failure/cancelled
    async fn terminate(
        &self,
        workload_id: &str,
        to: WorkloadStatus,
        source: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let row = sqlx::query(&format!(
            "SELECT {WORKLOAD_COLUMNS} FROM workload WHERE id = $1 FOR UPDATE"
        ))
        .bind(workload_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to lock workload: {}", e);
            StoreError::Database(e.to_string())
        })?
        .ok_or_else(|| StoreError::WorkloadNotFound(workload_id.to_string()))?;

        let workload = workload_from_row(&row)?;
        if !check_terminal_transition(&workload, to)? {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE workload
            SET status = $2,
                deadline = NULL,
                termination_source = COALESCE($3, termination_source),
                termination_reason = COALESCE($4, termination_reason),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(workload_id)
        .bind(to.as_str())
        .bind(source)
        .bind(reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to update workload status: {}", e);
            StoreError::Database(e.to_string())
        })?;

        ack_in(&mut tx, workload_id).await?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(%workload_id, status = %to, "workload terminated");
        Ok(())
    }
}

#[async_trait]
impl WorkloadQueueStore for PostgresWorkloadQueueStore {
    // =========================================================================
    // Workload Operations
    // =========================================================================

    #[instrument(skip(self, workload), fields(workload_id = %workload.id))]
    async fn create_workload(&self, workload: NewWorkload) -> Result<Workload, StoreError> {
        let labels = serde_json::to_value(&workload.labels)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO workload (id, workload_type, priority, dataplane_group, status,
                                  mutex_key, labels, input_payload, log_path, auto_id)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            RETURNING {WORKLOAD_COLUMNS}
            "#
        ))
        .bind(&workload.id)
        .bind(workload.workload_type.as_str())
        .bind(workload.priority.to_int())
        .bind(&workload.dataplane_group)
        .bind(&workload.mutex_key)
        .bind(&labels)
        .bind(&workload.input_payload)
        .bind(&workload.log_path)
        .bind(&workload.auto_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create workload: {}", e);
            StoreError::Database(e.to_string())
        })?
        .ok_or_else(|| StoreError::Conflict(workload.id.clone()))?;

        workload_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn get_workload(&self, workload_id: &str) -> Result<Workload, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {WORKLOAD_COLUMNS} FROM workload WHERE id = $1"
        ))
        .bind(workload_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get workload: {}", e);
            StoreError::Database(e.to_string())
        })?
        .ok_or_else(|| StoreError::WorkloadNotFound(workload_id.to_string()))?;

        workload_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn claim(
        &self,
        workload_id: &str,
        dataplane_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // Pending and lapsed claims are rebound; a live claim only matches its owner
        let row = sqlx::query(
            r#"
            UPDATE workload
            SET status = 'claimed',
                dataplane_id = $2,
                deadline = CASE
                    WHEN status = 'pending' OR deadline <= NOW() THEN $3
                    ELSE deadline
                END,
                updated_at = CASE
                    WHEN status = 'pending' OR deadline <= NOW() THEN NOW()
                    ELSE updated_at
                END
            WHERE id = $1
              AND (status = 'pending'
                   OR (status = 'claimed' AND (dataplane_id = $2 OR deadline <= NOW())))
            RETURNING id
            "#,
        )
        .bind(workload_id)
        .bind(dataplane_id)
        .bind(deadline)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to claim workload: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if row.is_some() {
            return Ok(true);
        }

        // Distinguish "not ours" from "does not exist"
        self.load_status(workload_id).await?;
        Ok(false)
    }

    #[instrument(skip(self))]
    async fn mark_launched(
        &self,
        workload_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let updated = sqlx::query(
            r#"
            UPDATE workload
            SET status = 'launched', deadline = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('claimed', 'launched')
            RETURNING id
            "#,
        )
        .bind(workload_id)
        .bind(deadline)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to mark workload launched: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if updated.is_none() {
            drop(tx);
            let from = self.load_status(workload_id).await?;
            return Err(StoreError::InvalidStatusTransition {
                id: workload_id.to_string(),
                from,
                to: WorkloadStatus::Launched,
            });
        }

        ack_in(&mut tx, workload_id).await?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(%workload_id, "workload launched");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn heartbeat(
        &self,
        workload_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE workload
            SET status = 'running',
                deadline = $2,
                last_heartbeat_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('claimed', 'launched', 'running')
            RETURNING id
            "#,
        )
        .bind(workload_id)
        .bind(deadline)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to record heartbeat: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if updated.is_none() {
            let from = self.load_status(workload_id).await?;
            return Err(StoreError::InvalidStatusTransition {
                id: workload_id.to_string(),
                from,
                to: WorkloadStatus::Running,
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn succeed(&self, workload_id: &str) -> Result<(), StoreError> {
        self.terminate(workload_id, WorkloadStatus::Success, None, None)
            .await
    }

    #[instrument(skip(self))]
    async fn fail(&self, workload_id: &str, source: &str, reason: &str) -> Result<(), StoreError> {
        self.terminate(workload_id, WorkloadStatus::Failure, Some(source), Some(reason))
            .await
    }

    #[instrument(skip(self))]
    async fn cancel(
        &self,
        workload_id: &str,
        source: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        self.terminate(
            workload_id,
            WorkloadStatus::Cancelled,
            Some(source),
            Some(reason),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn find_active_by_mutex_key(
        &self,
        mutex_key: &str,
    ) -> Result<Vec<Workload>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {WORKLOAD_COLUMNS}
            FROM workload
            WHERE mutex_key = $1
              AND status IN ('pending', 'claimed', 'launched', 'running')
            ORDER BY created_at
            "#
        ))
        .bind(mutex_key)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to search workloads by mutex key: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.iter().map(workload_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn acquire_mutex(
        &self,
        mutex_key: &str,
        workload_id: &str,
    ) -> Result<MutexAcquisition, StoreError> {
        self.load_status(workload_id).await?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            StoreError::Database(e.to_string())
        })?;

        sqlx::query(
            r#"
            INSERT INTO workload_mutex (mutex_key, workload_id, acquired_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (mutex_key) DO NOTHING
            "#,
        )
        .bind(mutex_key)
        .bind(workload_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to insert mutex key: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let row = sqlx::query(
            r#"
            SELECT m.workload_id AS holder,
                   COALESCE(w.status IN ('claimed', 'launched', 'running')
                            AND (w.deadline IS NULL OR w.deadline > NOW()), FALSE) AS live
            FROM workload_mutex m
            LEFT JOIN workload w ON w.id = m.workload_id
            WHERE m.mutex_key = $1
            FOR UPDATE OF m
            "#,
        )
        .bind(mutex_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to lock mutex key: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let holder: String = row.get("holder");
        let live: bool = row.get("live");
        if holder != workload_id && live {
            return Ok(MutexAcquisition::HeldBy(holder));
        }

        if holder != workload_id {
            sqlx::query(
                r#"
                UPDATE workload_mutex
                SET workload_id = $2, acquired_at = NOW()
                WHERE mutex_key = $1
                "#,
            )
            .bind(mutex_key)
            .bind(workload_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to take over mutex key: {}", e);
                StoreError::Database(e.to_string())
            })?;
            debug!(%mutex_key, %workload_id, previous = %holder, "mutex key taken over");
        }

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            StoreError::Database(e.to_string())
        })?;
        Ok(MutexAcquisition::Acquired)
    }

    // =========================================================================
    // Queue Operations
    // =========================================================================

    #[instrument(skip(self))]
    async fn enqueue(
        &self,
        dataplane_group: &str,
        priority: WorkloadPriority,
        workload_id: &str,
    ) -> Result<QueueItem, StoreError> {
        // Surfaces WorkloadNotFound before the foreign key does
        self.load_status(workload_id).await?;

        let row = sqlx::query(
            r#"
            INSERT INTO workload_queue (id, workload_id, dataplane_group, priority,
                                        created_at, poll_deadline)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (workload_id) WHERE acked_at IS NULL DO NOTHING
            RETURNING id, workload_id, dataplane_group, priority, created_at,
                      poll_deadline, acked_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(workload_id)
        .bind(dataplane_group)
        .bind(priority.to_int())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to enqueue workload: {}", e);
            StoreError::Database(e.to_string())
        })?
        .ok_or_else(|| StoreError::AlreadyEnqueued(workload_id.to_string()))?;

        debug!(%workload_id, %dataplane_group, %priority, "enqueued workload");
        queue_item_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn requeue(
        &self,
        workload_id: &str,
        not_before: DateTime<Utc>,
    ) -> Result<QueueItem, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let released = sqlx::query(
            r#"
            UPDATE workload
            SET status = 'pending', dataplane_id = NULL, deadline = NULL, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'claimed')
            RETURNING dataplane_group, priority
            "#,
        )
        .bind(workload_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to release workload: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let Some(released) = released else {
            drop(tx);
            let from = self.load_status(workload_id).await?;
            return Err(StoreError::InvalidStatusTransition {
                id: workload_id.to_string(),
                from,
                to: WorkloadStatus::Pending,
            });
        };
        let dataplane_group: String = released.get("dataplane_group");
        let priority: i32 = released.get("priority");

        ack_in(&mut tx, workload_id).await?;

        let row = sqlx::query(
            r#"
            INSERT INTO workload_queue (id, workload_id, dataplane_group, priority,
                                        created_at, poll_deadline)
            VALUES ($1, $2, $3, $4, NOW(), $5)
            RETURNING id, workload_id, dataplane_group, priority, created_at,
                      poll_deadline, acked_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(workload_id)
        .bind(&dataplane_group)
        .bind(priority)
        .bind(not_before)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to requeue workload: {}", e);
            StoreError::Database(e.to_string())
        })?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(%workload_id, %dataplane_group, %not_before, "requeued workload");
        queue_item_from_row(&row)
    }

    #[instrument(skip(self), fields(group = ?request.dataplane_group, quantity = request.quantity))]
    async fn poll(&self, request: PollRequest) -> Result<Vec<Workload>, StoreError> {
        if request.quantity == 0 {
            return Ok(vec![]);
        }

        // Select eligible rows skipping ones locked by concurrent pollers, then
        // push their lease deadline forward in the same statement.
        let rows = sqlx::query(&format!(
            r#"
            WITH claimable AS (
                SELECT id
                FROM workload_queue
                WHERE acked_at IS NULL
                  AND poll_deadline <= NOW()
                  AND ($1::text IS NULL OR dataplane_group = $1)
                  AND ($2::int IS NULL OR priority = $2)
                ORDER BY created_at, id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            ),
            leased AS (
                UPDATE workload_queue q
                SET poll_deadline = NOW() + make_interval(secs => $4)
                FROM claimable c
                WHERE q.id = c.id
                RETURNING q.workload_id, q.created_at, q.id AS queue_id
            )
            SELECT {WORKLOAD_COLUMNS}
            FROM workload w
            JOIN leased l ON l.workload_id = w.id
            ORDER BY l.created_at, l.queue_id
            "#,
            WORKLOAD_COLUMNS = prefixed_columns("w")
        ))
        .bind(request.dataplane_group.as_deref())
        .bind(request.priority.map(WorkloadPriority::to_int))
        .bind(request.quantity as i64)
        .bind(request.redelivery_window.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to poll workload queue: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.iter().map(workload_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn ack(&self, workload_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE workload_queue
            SET acked_at = NOW()
            WHERE workload_id = $1 AND acked_at IS NULL
            "#,
        )
        .bind(workload_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to ack queue item: {}", e);
            StoreError::Database(e.to_string())
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn count_enqueued(
        &self,
        dataplane_group: Option<&str>,
        priority: Option<WorkloadPriority>,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM workload_queue
            WHERE acked_at IS NULL
              AND poll_deadline <= NOW()
              AND ($1::text IS NULL OR dataplane_group = $1)
              AND ($2::int IS NULL OR priority = $2)
            "#,
        )
        .bind(dataplane_group)
        .bind(priority.map(WorkloadPriority::to_int))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to count enqueued items: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let count: i64 = row.get("count");
        Ok(count as u64)
    }

    #[instrument(skip(self))]
    async fn queue_stats(&self) -> Result<Vec<QueueStats>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT dataplane_group, priority, COUNT(*) AS count
            FROM workload_queue
            WHERE acked_at IS NULL
              AND poll_deadline <= NOW()
            GROUP BY dataplane_group, priority
            ORDER BY dataplane_group, priority
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load queue stats: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.iter()
            .map(|row| {
                let count: i64 = row.get("count");
                Ok(QueueStats {
                    dataplane_group: row.get("dataplane_group"),
                    priority: parse_priority(row.get("priority"))?,
                    enqueued_count: count as u64,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn delete_acked_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM workload_queue
            WHERE acked_at IS NOT NULL AND acked_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to delete acked queue items: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

async fn ack_in(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    workload_id: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE workload_queue
        SET acked_at = NOW()
        WHERE workload_id = $1 AND acked_at IS NULL
        "#,
    )
    .bind(workload_id)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        error!("Failed to ack queue item: {}", e);
        StoreError::Database(e.to_string())
    })?;
    Ok(())
}

fn prefixed_columns(alias: &str) -> String {
    WORKLOAD_COLUMNS
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_status(s: &str) -> Result<WorkloadStatus, StoreError> {
    s.parse().map_err(StoreError::Serialization)
}

fn parse_priority(value: i32) -> Result<WorkloadPriority, StoreError> {
    WorkloadPriority::from_int(value)
        .ok_or_else(|| StoreError::Serialization(format!("unknown priority: {value}")))
}

fn workload_from_row(row: &PgRow) -> Result<Workload, StoreError> {
    let workload_type: String = row.get("workload_type");
    let status: String = row.get("status");
    let labels_json: serde_json::Value = row.get("labels");
    let labels: Vec<WorkloadLabel> = serde_json::from_value(labels_json)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    Ok(Workload {
        id: row.get("id"),
        workload_type: workload_type
            .parse()
            .map_err(StoreError::Serialization)?,
        priority: parse_priority(row.get("priority"))?,
        dataplane_group: row.get("dataplane_group"),
        dataplane_id: row.get("dataplane_id"),
        status: parse_status(&status)?,
        mutex_key: row.get("mutex_key"),
        labels,
        input_payload: row.get("input_payload"),
        log_path: row.get("log_path"),
        auto_id: row.get("auto_id"),
        deadline: row.get("deadline"),
        last_heartbeat_at: row.get("last_heartbeat_at"),
        termination_source: row.get("termination_source"),
        termination_reason: row.get("termination_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn queue_item_from_row(row: &PgRow) -> Result<QueueItem, StoreError> {
    Ok(QueueItem {
        id: row.get("id"),
        workload_id: row.get("workload_id"),
        dataplane_group: row.get("dataplane_group"),
        priority: parse_priority(row.get("priority"))?,
        created_at: row.get("created_at"),
        poll_deadline: row.get("poll_deadline"),
        acked_at: row.get("acked_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_columns() {
        let cols = prefixed_columns("w");
        assert!(cols.starts_with("w.id, w.workload_type"));
        assert!(cols.ends_with("w.updated_at"));
        assert!(!cols.contains("  "));
    }

    #[test]
    fn test_parse_priority_rejects_unknown() {
        assert_eq!(parse_priority(0).unwrap(), WorkloadPriority::Default);
        assert!(matches!(
            parse_priority(9),
            Err(StoreError::Serialization(_))
        ));
    }
}
