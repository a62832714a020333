use crate::db::models::{AuditEntry, JobRecord};
use crate::error::CrmError;
use crate::middleware::AuthUser;
use crate::router::CrmState;
use crate::service::rac::Permission;
use axum::{
    Json,
    extract::{Path, State},
};

/// GET /api/v1/audit/{entity}/{id}
pub async fn audit(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path((entity, id)): Path<(String, i64)>,
) -> Result<Json<Vec<AuditEntry>>, CrmError> {
    principal.require(Permission::UsersManage)?;
    Ok(Json(state.storage.list_audit(&entity, id).await?))
}

/// GET /api/v1/jobs/{id}
pub async fn job(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<JobRecord>, CrmError> {
    principal.require(Permission::CustomersRead)?;
    Ok(Json(state.storage.get_job(id).await?))
}
