pub mod admin;
pub mod comms;
pub mod customers;
pub mod docproc;
pub mod finance;
pub mod notifications;
pub mod tasks;
pub mod users;
pub mod webhooks;

use crate::db::models::Customer;
use crate::error::CrmError;
use crate::router::CrmState;
use crate::service::rac::{Permission, Principal};
use axum::Json;
use serde::Serialize;
use serde_json::{Value, json};

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Response for work handed to the job queue.
#[derive(Debug, Serialize)]
pub struct Accepted {
    pub job_id: i64,
}

/// Load a customer the caller may act on with `permission`.
/// The permission is checked before the lookup so unauthorized callers
/// cannot enumerate ids.
pub(crate) async fn scoped_customer(
    state: &CrmState,
    principal: &Principal,
    permission: Permission,
    id: i64,
) -> Result<Customer, CrmError> {
    principal.require(permission)?;
    let customer = state.storage.get_customer(id).await?;
    principal.require_customer(permission, &customer)?;
    Ok(customer)
}
