//! Tasks, sales agents, the audit trail and the persisted job queue.

use crate::db::models::{AuditEntry, JobRecord, JobStatus, SalesAgent, Task, TaskStatus};
use crate::db::sqlite::CrmStorage;
use crate::error::CrmError;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

const TASK_SELECT: &str = r#"SELECT id, customer_id, assignee_id, title, due_at, status, created_at,
    completed_at FROM tasks"#;

const AGENT_SELECT: &str = r#"SELECT user_id, priority, weight, active, assigned_count,
    last_assigned_at FROM sales_agents"#;

const JOB_SELECT: &str = r#"SELECT id, kind, payload, status, attempts, last_error, created_at,
    updated_at FROM jobs"#;

impl CrmStorage {
    pub async fn insert_task(
        &self,
        customer_id: Option<i64>,
        assignee_id: i64,
        title: &str,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<Task, CrmError> {
        let id = sqlx::query(
            r#"INSERT INTO tasks (customer_id, assignee_id, title, due_at, status, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(customer_id)
        .bind(assignee_id)
        .bind(title)
        .bind(due_at)
        .bind(TaskStatus::Open)
        .bind(Utc::now())
        .execute(self.pool())
        .await?
        .last_insert_rowid();
        self.get_task(id).await
    }

    pub async fn get_task(&self, id: i64) -> Result<Task, CrmError> {
        sqlx::query_as::<_, Task>(&format!("{TASK_SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| CrmError::NotFound(format!("task {id}")))
    }

    pub async fn list_tasks(
        &self,
        assignee_id: Option<i64>,
        status: Option<TaskStatus>,
        due_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Task>, CrmError> {
        Ok(sqlx::query_as::<_, Task>(&format!(
            r#"{TASK_SELECT}
               WHERE (? IS NULL OR assignee_id = ?)
                 AND (? IS NULL OR status = ?)
                 AND (? IS NULL OR (due_at IS NOT NULL AND due_at < ?))
               ORDER BY due_at IS NULL, due_at, id"#
        ))
        .bind(assignee_id)
        .bind(assignee_id)
        .bind(status)
        .bind(status)
        .bind(due_before)
        .bind(due_before)
        .fetch_all(self.pool())
        .await?)
    }

    pub async fn complete_task(&self, id: i64) -> Result<Task, CrmError> {
        sqlx::query("UPDATE tasks SET status = ?, completed_at = ? WHERE id = ?")
            .bind(TaskStatus::Done)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        self.get_task(id).await
    }

    pub async fn upsert_sales_agent(
        &self,
        user_id: i64,
        priority: i64,
        weight: i64,
        active: bool,
    ) -> Result<SalesAgent, CrmError> {
        sqlx::query(
            r#"INSERT INTO sales_agents (user_id, priority, weight, active) VALUES (?, ?, ?, ?)
               ON CONFLICT(user_id) DO UPDATE SET
                   priority = excluded.priority,
                   weight = excluded.weight,
                   active = excluded.active"#,
        )
        .bind(user_id)
        .bind(priority)
        .bind(weight.max(1))
        .bind(active)
        .execute(self.pool())
        .await?;
        Ok(
            sqlx::query_as::<_, SalesAgent>(&format!("{AGENT_SELECT} WHERE user_id = ?"))
                .bind(user_id)
                .fetch_one(self.pool())
                .await?,
        )
    }

    pub async fn list_sales_agents(&self) -> Result<Vec<SalesAgent>, CrmError> {
        Ok(
            sqlx::query_as::<_, SalesAgent>(&format!("{AGENT_SELECT} ORDER BY user_id"))
                .fetch_all(self.pool())
                .await?,
        )
    }

    pub async fn record_assignment(
        &self,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), CrmError> {
        sqlx::query(
            r#"UPDATE sales_agents SET assigned_count = assigned_count + 1, last_assigned_at = ?
               WHERE user_id = ?"#,
        )
        .bind(at)
        .bind(user_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn insert_audit(
        &self,
        actor_id: Option<i64>,
        entity: &str,
        entity_id: i64,
        action: &str,
        detail: &serde_json::Value,
    ) -> Result<(), CrmError> {
        sqlx::query(
            r#"INSERT INTO audit_log (actor_id, entity, entity_id, action, detail, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(actor_id)
        .bind(entity)
        .bind(entity_id)
        .bind(action)
        .bind(detail.to_string())
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_audit(&self, entity: &str, entity_id: i64) -> Result<Vec<AuditEntry>, CrmError> {
        let rows = sqlx::query(
            r#"SELECT id, actor_id, entity, entity_id, action, detail, created_at
               FROM audit_log WHERE entity = ? AND entity_id = ? ORDER BY id"#,
        )
        .bind(entity)
        .bind(entity_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(Self::row_to_audit).collect()
    }

    pub async fn insert_job(&self, kind: &str, payload: &str) -> Result<i64, CrmError> {
        let now = Utc::now();
        Ok(sqlx::query(
            r#"INSERT INTO jobs (kind, payload, status, attempts, created_at, updated_at)
               VALUES (?, ?, ?, 0, ?, ?)"#,
        )
        .bind(kind)
        .bind(payload)
        .bind(JobStatus::Queued)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?
        .last_insert_rowid())
    }

    pub async fn get_job(&self, id: i64) -> Result<JobRecord, CrmError> {
        sqlx::query_as::<_, JobRecord>(&format!("{JOB_SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| CrmError::NotFound(format!("job {id}")))
    }

    /// Move a job to `running` and count the attempt.
    pub async fn start_job(&self, id: i64) -> Result<JobRecord, CrmError> {
        sqlx::query("UPDATE jobs SET status = ?, attempts = attempts + 1, updated_at = ? WHERE id = ?")
            .bind(JobStatus::Running)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        self.get_job(id).await
    }

    pub async fn finish_job(
        &self,
        id: i64,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<(), CrmError> {
        sqlx::query("UPDATE jobs SET status = ?, last_error = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(last_error)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Ids of jobs left queued or running by a previous process.
    pub async fn unfinished_jobs(&self) -> Result<Vec<i64>, CrmError> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT id FROM jobs WHERE status IN (?, ?) ORDER BY id")
                .bind(JobStatus::Queued)
                .bind(JobStatus::Running)
                .fetch_all(self.pool())
                .await?,
        )
    }

    fn row_to_audit(row: SqliteRow) -> Result<AuditEntry, CrmError> {
        let detail_json: String = row.try_get("detail")?;
        Ok(AuditEntry {
            id: row.try_get("id")?,
            actor_id: row.try_get("actor_id")?,
            entity: row.try_get("entity")?,
            entity_id: row.try_get("entity_id")?,
            action: row.try_get("action")?,
            detail: serde_json::from_str(&detail_json)?,
            created_at: row.try_get("created_at")?,
        })
    }
}
