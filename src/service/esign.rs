//! Settlement agreements sent through Docusign and their Connect callbacks.

use crate::api::docusign::DocusignApi;
use crate::db::CrmStorage;
use crate::db::models::{Contract, ContractStatus, Customer, Debt, DebtStatus, Payment, PaymentPlan};
use crate::error::CrmError;
use crate::service::funnel::{self, ACTIVE_CLIENT, CONTRACT_SENT, CONTRACT_SIGNED};
use crate::service::notify::Notifier;
use crate::types::docusign::{ConnectEvent, TextTab};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

fn tab(label: impl Into<String>, value: impl ToString) -> TextTab {
    TextTab {
        tab_label: label.into(),
        value: value.to_string(),
    }
}

fn money(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}

/// Text tabs filled into the agreement template.
pub fn contract_tabs(
    customer: &Customer,
    debts: &[Debt],
    plan: &PaymentPlan,
    payments: &[Payment],
) -> Vec<TextTab> {
    let enrolled: Vec<&Debt> = debts
        .iter()
        .filter(|d| d.status == DebtStatus::Enrolled)
        .collect();
    let total: Decimal = enrolled.iter().map(|d| d.current_balance).sum();
    let address = [
        customer.address.as_deref(),
        customer.city.as_deref(),
        customer.state.as_deref(),
        customer.zip.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(", ");
    let monthly = payments.first().map(|p| p.amount).unwrap_or_default();

    let mut tabs = vec![
        tab("client_full_name", customer.full_name()),
        tab("client_address", address),
        tab("client_phone", customer.phone.as_deref().unwrap_or_default()),
        tab("client_email", customer.email.as_deref().unwrap_or_default()),
        tab("enrolled_debt_total", money(total)),
        tab("program_fee_pct", format!("{}%", (plan.fee_pct * Decimal::ONE_HUNDRED).normalize())),
        tab("term_months", plan.term_months),
        tab("monthly_payment", money(monthly)),
        tab("first_payment_date", plan.first_payment.format("%m/%d/%Y")),
    ];
    for (i, debt) in enrolled.iter().enumerate() {
        let n = i + 1;
        tabs.push(tab(format!("debt_{n}_creditor"), &debt.creditor));
        tabs.push(tab(format!("debt_{n}_balance"), money(debt.current_balance)));
    }
    tabs
}

/// Send the agreement for signature and move the customer to `Contract Sent`.
pub async fn send_contract(
    storage: &CrmStorage,
    api: &DocusignApi,
    customer: &Customer,
) -> Result<Contract, CrmError> {
    let email = customer
        .email
        .as_deref()
        .ok_or_else(|| CrmError::BadRequest("customer has no email address".to_string()))?;
    let debts = storage.list_debts(customer.id).await?;
    if !debts.iter().any(|d| d.status == DebtStatus::Enrolled) {
        return Err(CrmError::BadRequest(
            "customer has no enrolled debts".to_string(),
        ));
    }
    let plan = storage
        .payment_plan(customer.id)
        .await?
        .ok_or_else(|| CrmError::BadRequest("customer has no payment schedule".to_string()))?;
    let payments = storage.list_payments(customer.id).await?;
    if storage
        .contracts_for(customer.id)
        .await?
        .iter()
        .any(|c| matches!(c.status, ContractStatus::Sent | ContractStatus::Delivered))
    {
        return Err(CrmError::Conflict(
            "a contract is already out for signature".to_string(),
        ));
    }

    let tabs = contract_tabs(customer, &debts, &plan, &payments);
    let envelope_id = api.create_envelope(&customer.full_name(), email, tabs).await?;
    let contract = storage.insert_contract(customer.id, &envelope_id).await?;
    funnel::promote(storage, customer.id, CONTRACT_SENT).await?;
    info!(customer_id = customer.id, %envelope_id, "contract sent");
    Ok(contract)
}

fn event_status(event: &str) -> Option<ContractStatus> {
    match event {
        "envelope-sent" => Some(ContractStatus::Sent),
        "envelope-delivered" => Some(ContractStatus::Delivered),
        "envelope-completed" => Some(ContractStatus::Completed),
        "envelope-declined" => Some(ContractStatus::Declined),
        "envelope-voided" => Some(ContractStatus::Voided),
        _ => None,
    }
}

/// Apply a Connect event. A completed envelope converts the customer to a client.
pub async fn handle_connect_event(
    storage: &CrmStorage,
    notifier: &Notifier,
    event: &ConnectEvent,
) -> Result<Option<Contract>, CrmError> {
    let Some(status) = event_status(&event.event) else {
        return Ok(None);
    };
    let Some(contract) = storage.contract_by_envelope(&event.data.envelope_id).await? else {
        warn!(envelope_id = %event.data.envelope_id, "connect event for unknown envelope");
        return Ok(None);
    };
    if contract.status == ContractStatus::Completed {
        // completed is final; replays are ignored
        return Ok(Some(contract));
    }

    storage.set_contract_status(contract.id, status).await?;
    if status == ContractStatus::Completed {
        funnel::promote(storage, contract.customer_id, CONTRACT_SIGNED).await?;
        funnel::promote(storage, contract.customer_id, ACTIVE_CLIENT).await?;
        let customer = storage.get_customer(contract.customer_id).await?;
        if let Some(agent) = customer.assigned_to {
            notifier.notify(
                agent,
                "contract.signed",
                json!({"customer_id": customer.id, "envelope_id": contract.envelope_id}),
            );
        }
    }
    info!(
        envelope_id = %contract.envelope_id,
        status = ?status,
        "contract status updated"
    );
    storage
        .contract_by_envelope(&event.data.envelope_id)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{DebtSource, PaymentStatus, Stage};
    use chrono::{NaiveDate, Utc};

    fn customer() -> Customer {
        Customer {
            id: 4,
            stage: Stage::Candidate,
            disposition_id: 7,
            disposition: CONTRACT_SENT.into(),
            first_name: "Ada".into(),
            last_name: "Byrne".into(),
            email: Some("ada@example.com".into()),
            phone: Some("+15551234567".into()),
            address: Some("1 Main St".into()),
            city: Some("Austin".into()),
            state: Some("TX".into()),
            zip: Some("73301".into()),
            estimated_debt: None,
            assigned_to: None,
            source: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn debt(creditor: &str, balance: i64, status: DebtStatus) -> Debt {
        Debt {
            id: 1,
            customer_id: 4,
            creditor: creditor.into(),
            account_number: "1234".into(),
            account_type: None,
            original_balance: Decimal::from(balance),
            current_balance: Decimal::from(balance),
            settlement_amount: None,
            status,
            source: DebtSource::Manual,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn tabs_cover_client_plan_and_enrolled_debts() {
        let plan = PaymentPlan {
            customer_id: 4,
            enrolled_debt: Decimal::from(3000),
            fee_pct: Decimal::new(25, 2),
            savings_pct: Decimal::new(5, 1),
            term_months: 24,
            service_fee: Decimal::ZERO,
            first_payment: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            created_at: Utc::now(),
        };
        let payments = vec![Payment {
            id: 1,
            customer_id: 4,
            installment: 1,
            due_date: plan.first_payment,
            amount: Decimal::new(9375, 2),
            fee: Decimal::new(3125, 2),
            status: PaymentStatus::Scheduled,
            updated_at: Utc::now(),
        }];
        let debts = vec![
            debt("Visa", 1000, DebtStatus::Enrolled),
            debt("Old Loan", 900, DebtStatus::NotEnrolled),
            debt("Store Card", 2000, DebtStatus::Enrolled),
        ];
        let tabs = contract_tabs(&customer(), &debts, &plan, &payments);
        let get = |label: &str| {
            tabs.iter()
                .find(|t| t.tab_label == label)
                .map(|t| t.value.clone())
        };

        assert_eq!(get("client_full_name").as_deref(), Some("Ada Byrne"));
        assert_eq!(get("client_address").as_deref(), Some("1 Main St, Austin, TX, 73301"));
        assert_eq!(get("enrolled_debt_total").as_deref(), Some("3000.00"));
        assert_eq!(get("program_fee_pct").as_deref(), Some("25%"));
        assert_eq!(get("term_months").as_deref(), Some("24"));
        assert_eq!(get("monthly_payment").as_deref(), Some("93.75"));
        assert_eq!(get("first_payment_date").as_deref(), Some("03/01/2025"));
        assert_eq!(get("debt_1_creditor").as_deref(), Some("Visa"));
        assert_eq!(get("debt_2_creditor").as_deref(), Some("Store Card"));
        assert_eq!(get("debt_2_balance").as_deref(), Some("2000.00"));
        assert_eq!(get("debt_3_creditor"), None);
    }

    #[test]
    fn connect_events_map_to_statuses() {
        assert_eq!(event_status("envelope-completed"), Some(ContractStatus::Completed));
        assert_eq!(event_status("envelope-voided"), Some(ContractStatus::Voided));
        assert_eq!(event_status("recipient-sent"), None);
    }
}
