use super::{Accepted, scoped_customer};
use crate::db::models::{
    Contract, Customer, CustomerFilter, CustomerPatch, Disposition, NewCustomer, Page, PageParams,
    Stage,
};
use crate::error::CrmError;
use crate::middleware::AuthUser;
use crate::router::CrmState;
use crate::service::esign;
use crate::service::funnel::{self, normalize_phone};
use crate::service::jobs::JobKind;
use crate::service::lead_distro::DistroMode;
use crate::service::lead_import;
use crate::service::rac::Permission;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct DistributeQuery {
    #[serde(default)]
    pub distribute: bool,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub csv: String,
    #[serde(default)]
    pub distribute: bool,
}

#[derive(Debug, Deserialize)]
pub struct DispositionRequest {
    #[serde(default)]
    pub disposition_id: Option<i64>,
    #[serde(default)]
    pub disposition: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssignRequest {
    /// Explicit agent; otherwise the lead distributor picks one.
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub mode: Option<DistroMode>,
}

async fn assign_to(
    state: &CrmState,
    customer_id: i64,
    user_id: Option<i64>,
    mode: Option<DistroMode>,
) -> Result<Customer, CrmError> {
    let agent = match user_id {
        Some(id) => {
            let user = state.storage.get_user(id).await?;
            if !user.active {
                return Err(CrmError::BadRequest(format!("user {id} is inactive")));
            }
            id
        }
        None => state.distro.next_agent(mode).await?,
    };
    let customer = state.storage.assign_customer(customer_id, agent).await?;
    info!(customer_id, agent, "customer assigned");
    Ok(customer)
}

/// POST /api/v1/leads
pub async fn create_lead(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Query(query): Query<DistributeQuery>,
    Json(new): Json<NewCustomer>,
) -> Result<(StatusCode, Json<Customer>), CrmError> {
    principal.require(Permission::CustomersWrite)?;
    if query.distribute {
        principal.require(Permission::LeadsDistribute)?;
    }
    let mut customer = funnel::create_lead(&state.storage, new).await?;
    if query.distribute {
        customer = assign_to(&state, customer.id, None, None).await?;
    } else if let Some(own) = principal.user_id.filter(|_| principal.own_customers_only) {
        // restricted agents keep the leads they enter
        customer = state.storage.assign_customer(customer.id, own).await?;
    }
    state
        .jobs
        .audit(&principal, "customer", customer.id, "create", json!({"source": customer.source}))
        .await;
    Ok((StatusCode::CREATED, Json(customer)))
}

/// POST /api/v1/leads/import: validates the header now, imports in the background.
pub async fn import_leads(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Json(req): Json<ImportRequest>,
) -> Result<(StatusCode, Json<Accepted>), CrmError> {
    principal.require(Permission::LeadsImport)?;
    if req.distribute {
        principal.require(Permission::LeadsDistribute)?;
    }
    let (leads, errors) = lead_import::parse_leads(req.csv.as_bytes())?;
    let job_id = state
        .jobs
        .enqueue(JobKind::ImportLeads {
            csv: req.csv,
            distribute: req.distribute,
        })
        .await?;
    state
        .jobs
        .audit(
            &principal,
            "job",
            job_id,
            "leads.import",
            json!({"rows": leads.len() + errors.len()}),
        )
        .await;
    Ok((StatusCode::ACCEPTED, Json(Accepted { job_id })))
}

/// GET /api/v1/dispositions
pub async fn dispositions(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<Vec<Disposition>>, CrmError> {
    principal.require(Permission::CustomersRead)?;
    Ok(Json(state.storage.list_dispositions().await?))
}

/// GET /api/v1/customers
pub async fn list(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Query(filter): Query<CustomerFilter>,
    Query(page): Query<PageParams>,
) -> Result<Json<Page<Customer>>, CrmError> {
    principal.require(Permission::CustomersRead)?;
    Ok(Json(
        state
            .storage
            .list_customers(&filter, principal.assignment_scope(), page)
            .await?,
    ))
}

/// GET /api/v1/customers/{id}
pub async fn get(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Customer>, CrmError> {
    Ok(Json(
        scoped_customer(&state, &principal, Permission::CustomersRead, id).await?,
    ))
}

fn sanitize_patch(patch: &mut CustomerPatch) -> Result<(), CrmError> {
    for (field, value) in [
        ("first_name", &patch.first_name),
        ("last_name", &patch.last_name),
    ] {
        if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(CrmError::BadRequest(format!("{field} must not be empty")));
        }
    }
    if let Some(email) = patch.email.as_mut() {
        *email = email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(CrmError::BadRequest(format!("invalid email `{email}`")));
        }
    }
    if let Some(raw) = patch.phone.as_deref() {
        let phone = normalize_phone(raw)
            .ok_or_else(|| CrmError::BadRequest(format!("invalid phone number `{raw}`")))?;
        patch.phone = Some(phone);
    }
    if let Some(state) = patch.state.as_mut() {
        *state = state.trim().to_uppercase();
    }
    if patch
        .estimated_debt
        .is_some_and(|d| d < rust_decimal::Decimal::ZERO)
    {
        return Err(CrmError::BadRequest(
            "estimated_debt must not be negative".to_string(),
        ));
    }
    Ok(())
}

/// PATCH /api/v1/customers/{id}
pub async fn update(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
    Json(mut patch): Json<CustomerPatch>,
) -> Result<Json<Customer>, CrmError> {
    scoped_customer(&state, &principal, Permission::CustomersWrite, id).await?;
    sanitize_patch(&mut patch)?;
    let customer = state.storage.update_customer(id, &patch).await?;
    state
        .jobs
        .audit(&principal, "customer", id, "update", json!({}))
        .await;
    Ok(Json(customer))
}

/// DELETE /api/v1/customers/{id}: only leads may be removed.
pub async fn delete(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, CrmError> {
    let customer = scoped_customer(&state, &principal, Permission::CustomersWrite, id).await?;
    if customer.stage != Stage::Lead {
        return Err(CrmError::Conflict(format!(
            "customer {id} is a {} and cannot be deleted",
            customer.stage.as_str()
        )));
    }
    state.storage.delete_customer(id).await?;
    state
        .jobs
        .audit(&principal, "customer", id, "delete", json!({"name": customer.full_name()}))
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/customers/{id}/disposition
pub async fn set_disposition(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<DispositionRequest>,
) -> Result<Json<Customer>, CrmError> {
    let customer = scoped_customer(&state, &principal, Permission::CustomersWrite, id).await?;
    let target = match (req.disposition_id, req.disposition.as_deref()) {
        (Some(did), _) => state.storage.disposition_by_id(did).await?,
        (None, Some(name)) => state.storage.disposition_by_name(name.trim()).await?,
        (None, None) => {
            return Err(CrmError::BadRequest(
                "disposition_id or disposition is required".to_string(),
            ));
        }
    };
    let updated = funnel::change_disposition(&state.storage, &customer, &target).await?;
    state
        .jobs
        .audit(
            &principal,
            "customer",
            id,
            "disposition",
            json!({"from": customer.disposition, "to": updated.disposition}),
        )
        .await;
    Ok(Json(updated))
}

/// POST /api/v1/customers/{id}/assign
pub async fn assign(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<Customer>, CrmError> {
    scoped_customer(&state, &principal, Permission::LeadsDistribute, id).await?;
    let customer = assign_to(&state, id, req.user_id, req.mode).await?;
    state
        .jobs
        .audit(&principal, "customer", id, "assign", json!({"agent": customer.assigned_to}))
        .await;
    Ok(Json(customer))
}

/// POST /api/v1/customers/{id}/contract
pub async fn send_contract(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<Contract>), CrmError> {
    let customer = scoped_customer(&state, &principal, Permission::ContractsSend, id).await?;
    let contract =
        esign::send_contract(&state.storage, &state.providers.docusign, &customer).await?;
    state
        .jobs
        .audit(
            &principal,
            "customer",
            id,
            "contract.sent",
            json!({"envelope_id": contract.envelope_id}),
        )
        .await;
    Ok((StatusCode::CREATED, Json(contract)))
}

