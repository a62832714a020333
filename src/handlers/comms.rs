//! SMS, communication history and appointment routes.

use super::{Accepted, scoped_customer};
use crate::db::models::{Appointment, Communication};
use crate::error::CrmError;
use crate::middleware::AuthUser;
use crate::router::CrmState;
use crate::service::appointments::{self, AppointmentPatch, AppointmentQuery, NewAppointment};
use crate::service::comms::MAX_SMS_LEN;
use crate::service::funnel::normalize_phone;
use crate::service::jobs::JobKind;
use crate::service::rac::Permission;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct SmsRequest {
    pub text: String,
    /// Defaults to the customer's phone.
    #[serde(default)]
    pub to: Option<String>,
}

/// POST /api/v1/customers/{id}/sms: queued, sent by the job worker.
pub async fn send_sms(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<SmsRequest>,
) -> Result<(StatusCode, Json<Accepted>), CrmError> {
    let customer = scoped_customer(&state, &principal, Permission::CommsSend, id).await?;
    let raw = req
        .to
        .as_deref()
        .or(customer.phone.as_deref())
        .ok_or_else(|| CrmError::BadRequest("customer has no phone number".to_string()))?;
    let to = normalize_phone(raw)
        .ok_or_else(|| CrmError::BadRequest(format!("invalid destination number `{raw}`")))?;
    if req.text.trim().is_empty() || req.text.chars().count() > MAX_SMS_LEN {
        return Err(CrmError::BadRequest(format!(
            "sms text must be 1..={MAX_SMS_LEN} characters"
        )));
    }

    let job_id = state
        .jobs
        .enqueue(JobKind::SendSms {
            customer_id: Some(id),
            user_id: principal.user_id,
            to,
            text: req.text,
        })
        .await?;
    state
        .jobs
        .audit(&principal, "customer", id, "sms.send", json!({"job_id": job_id}))
        .await;
    Ok((StatusCode::ACCEPTED, Json(Accepted { job_id })))
}

/// GET /api/v1/customers/{id}/communications
pub async fn communications(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Communication>>, CrmError> {
    scoped_customer(&state, &principal, Permission::CustomersRead, id).await?;
    Ok(Json(state.storage.list_communications(id).await?))
}

/// GET /api/v1/appointments: restricted agents only see their own calendar.
pub async fn list_appointments(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Query(query): Query<AppointmentQuery>,
) -> Result<Json<Vec<Appointment>>, CrmError> {
    principal.require(Permission::AppointmentsWrite)?;
    let agent_id = principal.assignment_scope().or(query.agent_id);
    Ok(Json(
        appointments::list(&state.storage, agent_id, &query).await?,
    ))
}

/// POST /api/v1/appointments
pub async fn create_appointment(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Json(mut req): Json<NewAppointment>,
) -> Result<(StatusCode, Json<Appointment>), CrmError> {
    scoped_customer(&state, &principal, Permission::AppointmentsWrite, req.customer_id).await?;
    if let Some(own) = principal.assignment_scope() {
        if req.agent_id.is_some_and(|a| a != own) {
            return Err(CrmError::Forbidden(
                "agents may only book their own calendar".to_string(),
            ));
        }
        req.agent_id = Some(own);
    }
    let appt = appointments::create(&state.storage, req).await?;
    state
        .jobs
        .audit(
            &principal,
            "appointment",
            appt.id,
            "create",
            json!({"customer_id": appt.customer_id, "starts_at": appt.starts_at}),
        )
        .await;
    Ok((StatusCode::CREATED, Json(appt)))
}

/// PATCH /api/v1/appointments/{id}: status change or reschedule.
pub async fn update_appointment(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
    Json(patch): Json<AppointmentPatch>,
) -> Result<Json<Appointment>, CrmError> {
    principal.require(Permission::AppointmentsWrite)?;
    let current = state.storage.get_appointment(id).await?;
    scoped_customer(&state, &principal, Permission::AppointmentsWrite, current.customer_id).await?;
    let appt = appointments::update(&state.storage, &current, &patch).await?;
    state
        .jobs
        .audit(
            &principal,
            "appointment",
            id,
            "update",
            json!({"status": appt.status, "starts_at": appt.starts_at}),
        )
        .await;
    Ok(Json(appt))
}
