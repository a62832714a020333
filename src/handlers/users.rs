use crate::db::models::{Role, SalesAgent, User};
use crate::error::CrmError;
use crate::middleware::AuthUser;
use crate::router::CrmState;
use crate::service::funnel::normalize_phone;
use crate::service::payments::{self, Commission};
use crate::service::rac::Permission;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct NewUserRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: String,
    #[serde(default)]
    pub commission_rate: Decimal,
}

/// The only response that ever carries the API token.
#[derive(Debug, Serialize)]
pub struct CreatedUser {
    #[serde(flatten)]
    pub user: User,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct AgentRequest {
    pub user_id: i64,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_weight")]
    pub weight: i64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_priority() -> i64 {
    100
}

fn default_weight() -> i64 {
    1
}

fn default_active() -> bool {
    true
}

/// POST /api/v1/users
pub async fn create(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Json(req): Json<NewUserRequest>,
) -> Result<(StatusCode, Json<CreatedUser>), CrmError> {
    principal.require(Permission::UsersManage)?;
    let name = req.name.trim();
    let email = req.email.trim();
    if name.is_empty() || !email.contains('@') {
        return Err(CrmError::BadRequest(
            "a user needs a name and a valid email".to_string(),
        ));
    }
    if req.commission_rate < Decimal::ZERO || req.commission_rate > Decimal::ONE {
        return Err(CrmError::BadRequest(
            "commission_rate must be within 0..=1".to_string(),
        ));
    }
    let phone = match req.phone.as_deref() {
        Some(raw) => Some(
            normalize_phone(raw)
                .ok_or_else(|| CrmError::BadRequest(format!("invalid phone number `{raw}`")))?,
        ),
        None => None,
    };

    let user = state
        .storage
        .create_user(name, email, phone.as_deref(), &req.role, req.commission_rate)
        .await?;
    state
        .jobs
        .audit(&principal, "user", user.id, "create", json!({"role": user.role_name}))
        .await;
    info!(user_id = user.id, role = %user.role_name, "user created");
    let token = format!("{}.{}", user.id, user.api_token);
    Ok((StatusCode::CREATED, Json(CreatedUser { user, token })))
}

/// GET /api/v1/users
pub async fn list(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<Vec<User>>, CrmError> {
    principal.require(Permission::UsersManage)?;
    Ok(Json(state.storage.list_users().await?))
}

/// GET /api/v1/roles
pub async fn roles(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<Vec<Role>>, CrmError> {
    principal.require(Permission::UsersManage)?;
    Ok(Json(state.storage.list_roles().await?))
}

/// POST /api/v1/agents: enrol a user in lead distribution or change their settings.
pub async fn upsert_agent(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Json(req): Json<AgentRequest>,
) -> Result<Json<SalesAgent>, CrmError> {
    principal.require(Permission::UsersManage)?;
    let user = state.storage.get_user(req.user_id).await?;
    if !user.active {
        return Err(CrmError::BadRequest(format!("user {} is inactive", user.id)));
    }
    let agent = state
        .storage
        .upsert_sales_agent(user.id, req.priority, req.weight, req.active)
        .await?;
    state
        .jobs
        .audit(
            &principal,
            "sales_agent",
            user.id,
            "upsert",
            json!({"priority": agent.priority, "weight": agent.weight, "active": agent.active}),
        )
        .await;
    Ok(Json(agent))
}

/// GET /api/v1/me
pub async fn me(AuthUser(principal): AuthUser) -> Json<Value> {
    let permissions: Vec<Permission> = Permission::ALL
        .into_iter()
        .filter(|p| principal.has(*p))
        .collect();
    Json(json!({
        "user_id": principal.user_id,
        "name": principal.name,
        "role": principal.role,
        "permissions": permissions,
        "own_customers_only": principal.own_customers_only,
    }))
}

/// GET /api/v1/users/{id}/commissions
pub async fn commissions(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Commission>, CrmError> {
    principal.require(Permission::CommissionsRead)?;
    if principal.own_customers_only && principal.user_id != Some(id) {
        return Err(CrmError::Forbidden(
            "agents may only read their own commission".to_string(),
        ));
    }
    Ok(Json(payments::agent_commission(&state.storage, id).await?))
}
