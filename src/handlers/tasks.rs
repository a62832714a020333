use super::scoped_customer;
use crate::db::models::{Task, TaskStatus};
use crate::error::CrmError;
use crate::middleware::AuthUser;
use crate::router::CrmState;
use crate::service::rac::Permission;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct NewTask {
    #[serde(default)]
    pub customer_id: Option<i64>,
    /// Defaults to the caller.
    #[serde(default)]
    pub assignee_id: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskQuery {
    pub assignee_id: Option<i64>,
    pub status: Option<TaskStatus>,
    pub due_before: Option<DateTime<Utc>>,
}

/// GET /api/v1/tasks
pub async fn list(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Vec<Task>>, CrmError> {
    principal.require(Permission::TasksWrite)?;
    let assignee = principal.assignment_scope().or(query.assignee_id);
    Ok(Json(
        state
            .storage
            .list_tasks(assignee, query.status, query.due_before)
            .await?,
    ))
}

/// POST /api/v1/tasks
pub async fn create(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Json(req): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), CrmError> {
    principal.require(Permission::TasksWrite)?;
    let title = req.title.trim();
    if title.is_empty() {
        return Err(CrmError::BadRequest("title is required".to_string()));
    }
    let assignee_id = req
        .assignee_id
        .or(principal.user_id)
        .ok_or_else(|| CrmError::BadRequest("assignee_id is required".to_string()))?;
    if principal.own_customers_only && principal.user_id != Some(assignee_id) {
        return Err(CrmError::Forbidden(
            "agents may only create tasks for themselves".to_string(),
        ));
    }
    state.storage.get_user(assignee_id).await?;
    if let Some(customer_id) = req.customer_id {
        scoped_customer(&state, &principal, Permission::TasksWrite, customer_id).await?;
    }

    let task = state
        .storage
        .insert_task(req.customer_id, assignee_id, title, req.due_at)
        .await?;
    state
        .jobs
        .audit(&principal, "task", task.id, "create", json!({"assignee_id": assignee_id}))
        .await;
    Ok((StatusCode::CREATED, Json(task)))
}

/// PUT /api/v1/tasks/{id}/complete
pub async fn complete(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Task>, CrmError> {
    principal.require(Permission::TasksWrite)?;
    let current = state.storage.get_task(id).await?;
    if principal.own_customers_only && principal.user_id != Some(current.assignee_id) {
        return Err(CrmError::Forbidden(format!("task {id} is not assigned to you")));
    }
    if current.status == TaskStatus::Done {
        return Ok(Json(current));
    }
    let task = state.storage.complete_task(id).await?;
    state
        .jobs
        .audit(&principal, "task", id, "complete", json!({}))
        .await;
    Ok(Json(task))
}
