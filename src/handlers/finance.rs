//! Credit report, debt, bank account and payment schedule routes.

use super::{Accepted, scoped_customer};
use crate::db::models::{
    BankAccount, CreditReportAccount, Debt, DebtPatch, NewDebt, Payment, PaymentPlan,
    PaymentStatus,
};
use crate::error::CrmError;
use crate::middleware::AuthUser;
use crate::router::CrmState;
use crate::service::bank::{self, BankAccountRequest};
use crate::service::credit_report::{self, AnswersRequest, StartRequest, StartResponse};
use crate::service::debts;
use crate::service::jobs::JobKind;
use crate::service::payments::{self, PlanRequest};
use crate::service::rac::{Permission, Principal};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Serialize)]
pub struct Schedule {
    pub plan: PaymentPlan,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Serialize)]
pub struct BankAccountAccepted {
    pub account: BankAccount,
    pub job_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct PaymentStatusRequest {
    pub status: PaymentStatus,
}

/// POST /api/v1/customers/{id}/credit-report
pub async fn start_credit_report(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<StartRequest>,
) -> Result<Json<StartResponse>, CrmError> {
    let customer = scoped_customer(&state, &principal, Permission::CreditReports, id).await?;
    let resp =
        credit_report::start(&state.storage, &state.providers.smart_credit, &customer, &req)
            .await?;
    state
        .jobs
        .audit(
            &principal,
            "customer",
            id,
            "credit_report.start",
            json!({"status": resp.account.status}),
        )
        .await;
    Ok(Json(resp))
}

/// POST /api/v1/customers/{id}/credit-report/answers
pub async fn answer_credit_report(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<AnswersRequest>,
) -> Result<Json<CreditReportAccount>, CrmError> {
    scoped_customer(&state, &principal, Permission::CreditReports, id).await?;
    if req.answers.is_empty() {
        return Err(CrmError::BadRequest("answers must not be empty".to_string()));
    }
    let account = credit_report::answer(
        &state.storage,
        &state.providers.smart_credit,
        id,
        &req.answers,
    )
    .await?;
    state
        .jobs
        .audit(
            &principal,
            "customer",
            id,
            "credit_report.answer",
            json!({"status": account.status}),
        )
        .await;
    Ok(Json(account))
}

/// POST /api/v1/customers/{id}/credit-report/pull
pub async fn pull_credit_report(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<Accepted>), CrmError> {
    scoped_customer(&state, &principal, Permission::CreditReports, id).await?;
    let account = state.storage.credit_report_account(id).await?;
    credit_report::ensure_pullable(account.as_ref())?;
    let job_id = state
        .jobs
        .enqueue(JobKind::ImportCreditReport { customer_id: id })
        .await?;
    state
        .jobs
        .audit(&principal, "customer", id, "credit_report.pull", json!({"job_id": job_id}))
        .await;
    Ok((StatusCode::ACCEPTED, Json(Accepted { job_id })))
}

/// GET /api/v1/customers/{id}/debts
pub async fn list_debts(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Debt>>, CrmError> {
    scoped_customer(&state, &principal, Permission::CustomersRead, id).await?;
    Ok(Json(state.storage.list_debts(id).await?))
}

/// POST /api/v1/customers/{id}/debts
pub async fn add_debt(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
    Json(new): Json<NewDebt>,
) -> Result<(StatusCode, Json<Debt>), CrmError> {
    scoped_customer(&state, &principal, Permission::DebtsWrite, id).await?;
    let debt = debts::add(&state.storage, id, new).await?;
    state
        .jobs
        .audit(&principal, "debt", debt.id, "create", json!({"customer_id": id}))
        .await;
    Ok((StatusCode::CREATED, Json(debt)))
}

async fn scoped_debt(
    state: &CrmState,
    principal: &Principal,
    id: i64,
) -> Result<Debt, CrmError> {
    principal.require(Permission::DebtsWrite)?;
    let debt = state.storage.get_debt(id).await?;
    scoped_customer(state, principal, Permission::DebtsWrite, debt.customer_id).await?;
    Ok(debt)
}

/// PATCH /api/v1/debts/{id}
pub async fn update_debt(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
    Json(patch): Json<DebtPatch>,
) -> Result<Json<Debt>, CrmError> {
    let current = scoped_debt(&state, &principal, id).await?;
    let debt = debts::update(&state.storage, &current, &patch).await?;
    state
        .jobs
        .audit(
            &principal,
            "debt",
            id,
            "update",
            json!({"status": debt.status, "settlement_amount": debt.settlement_amount}),
        )
        .await;
    Ok(Json(debt))
}

/// DELETE /api/v1/debts/{id}
pub async fn delete_debt(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, CrmError> {
    let debt = scoped_debt(&state, &principal, id).await?;
    state.storage.delete_debt(id).await?;
    state
        .jobs
        .audit(&principal, "debt", id, "delete", json!({"customer_id": debt.customer_id}))
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/customers/{id}/bank-account: store, then validate with DataX in the background.
pub async fn save_bank_account(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<BankAccountRequest>,
) -> Result<(StatusCode, Json<BankAccountAccepted>), CrmError> {
    scoped_customer(&state, &principal, Permission::BankValidate, id).await?;
    let account = bank::save_account(&state.storage, id, &req).await?;
    let job_id = state
        .jobs
        .enqueue(JobKind::ValidateBankAccount { customer_id: id })
        .await?;
    state
        .jobs
        .audit(
            &principal,
            "customer",
            id,
            "bank_account.save",
            json!({"routing_number": account.routing_number, "job_id": job_id}),
        )
        .await;
    Ok((StatusCode::ACCEPTED, Json(BankAccountAccepted { account, job_id })))
}

/// GET /api/v1/customers/{id}/payment-schedule
pub async fn payment_schedule(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Schedule>, CrmError> {
    scoped_customer(&state, &principal, Permission::CustomersRead, id).await?;
    let plan = state
        .storage
        .payment_plan(id)
        .await?
        .ok_or_else(|| CrmError::NotFound(format!("payment schedule for customer {id}")))?;
    let payments = state.storage.list_payments(id).await?;
    Ok(Json(Schedule { plan, payments }))
}

/// POST /api/v1/customers/{id}/payment-schedule
pub async fn create_payment_schedule(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<PlanRequest>,
) -> Result<(StatusCode, Json<Schedule>), CrmError> {
    scoped_customer(&state, &principal, Permission::PaymentsWrite, id).await?;
    let (plan, payments) = payments::create_plan(&state.storage, id, req).await?;
    state
        .jobs
        .audit(
            &principal,
            "customer",
            id,
            "payment_schedule.create",
            json!({
                "enrolled_debt": plan.enrolled_debt,
                "term_months": plan.term_months,
                "fee_pct": plan.fee_pct,
            }),
        )
        .await;
    Ok((StatusCode::CREATED, Json(Schedule { plan, payments })))
}

/// PUT /api/v1/payments/{id}/status
pub async fn set_payment_status(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<PaymentStatusRequest>,
) -> Result<Json<Payment>, CrmError> {
    principal.require(Permission::PaymentsWrite)?;
    let current = state.storage.get_payment(id).await?;
    scoped_customer(&state, &principal, Permission::PaymentsWrite, current.customer_id).await?;
    let payment = payments::set_status(&state.storage, id, req.status).await?;
    state
        .jobs
        .audit(
            &principal,
            "payment",
            id,
            "status",
            json!({"from": current.status, "to": payment.status}),
        )
        .await;
    Ok(Json(payment))
}
