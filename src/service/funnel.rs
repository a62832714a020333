//! Funnel rules: how leads become candidates and candidates become clients.

use crate::db::CrmStorage;
use crate::db::models::{ContractStatus, Customer, Disposition, NewCustomer, Stage};
use crate::error::CrmError;
use tracing::info;

pub const NEW_LEAD: &str = "New Lead";
pub const CREDIT_REPORT_PULLED: &str = "Credit Report Pulled";
pub const CONTRACT_SENT: &str = "Contract Sent";
pub const CONTRACT_SIGNED: &str = "Contract Signed";
pub const ACTIVE_CLIENT: &str = "Active Client";
pub const NSF: &str = "NSF";

/// Normalize a phone number to E.164. Ten-digit input is taken as US.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if trimmed.starts_with('+') && (8..=15).contains(&digits.len()) {
        return Some(format!("+{digits}"));
    }
    match digits.len() {
        10 => Some(format!("+1{digits}")),
        11 if digits.starts_with('1') => Some(format!("+{digits}")),
        _ => None,
    }
}

/// Trim and validate contact fields of a new lead in place.
pub fn sanitize_new_customer(new: &mut NewCustomer) -> Result<(), CrmError> {
    new.first_name = new.first_name.trim().to_string();
    new.last_name = new.last_name.trim().to_string();
    if new.first_name.is_empty() || new.last_name.is_empty() {
        return Err(CrmError::BadRequest(
            "first_name and last_name are required".to_string(),
        ));
    }
    if let Some(email) = new.email.take() {
        let email = email.trim().to_lowercase();
        if !email.is_empty() {
            if !email.contains('@') {
                return Err(CrmError::BadRequest(format!("invalid email `{email}`")));
            }
            new.email = Some(email);
        }
    }
    if let Some(phone) = new.phone.take() {
        if !phone.trim().is_empty() {
            new.phone = Some(
                normalize_phone(&phone)
                    .ok_or_else(|| CrmError::BadRequest(format!("invalid phone `{phone}`")))?,
            );
        }
    }
    if let Some(state) = new.state.as_mut() {
        *state = state.trim().to_uppercase();
    }
    if new.estimated_debt.is_some_and(|d| d.is_sign_negative()) {
        return Err(CrmError::BadRequest(
            "estimated_debt must not be negative".to_string(),
        ));
    }
    Ok(())
}

/// Stage moves are forward only, and entering the client stage needs a signed contract.
pub fn check_transition(
    current: &Customer,
    target: &Disposition,
    contract_completed: bool,
) -> Result<(), CrmError> {
    if target.stage < current.stage {
        return Err(CrmError::InvalidTransition {
            from: current.stage.as_str().to_string(),
            to: target.stage.as_str().to_string(),
        });
    }
    if target.stage == Stage::Client && current.stage != Stage::Client && !contract_completed {
        return Err(CrmError::InvalidTransition {
            from: current.disposition.clone(),
            to: format!("{} (contract not signed)", target.name),
        });
    }
    Ok(())
}

pub async fn create_lead(storage: &CrmStorage, mut new: NewCustomer) -> Result<Customer, CrmError> {
    sanitize_new_customer(&mut new)?;
    let disposition = storage.disposition_by_name(NEW_LEAD).await?;
    let customer = storage.create_customer(&new, &disposition).await?;
    info!(customer_id = customer.id, "lead created");
    Ok(customer)
}

async fn contract_completed(storage: &CrmStorage, customer: &Customer) -> Result<bool, CrmError> {
    if customer.disposition == CONTRACT_SIGNED {
        return Ok(true);
    }
    Ok(storage
        .contracts_for(customer.id)
        .await?
        .iter()
        .any(|c| c.status == ContractStatus::Completed))
}

/// Set a disposition after validating the stage transition.
pub async fn change_disposition(
    storage: &CrmStorage,
    customer: &Customer,
    target: &Disposition,
) -> Result<Customer, CrmError> {
    let completed = contract_completed(storage, customer).await?;
    check_transition(customer, target, completed)?;
    let updated = storage.set_disposition(customer.id, target).await?;
    info!(
        customer_id = customer.id,
        from = %customer.disposition,
        to = %target.name,
        "disposition changed"
    );
    Ok(updated)
}

/// Move a customer to `name` unless they already sit in a later stage.
/// Returns `None` when the customer was left untouched.
pub async fn promote(
    storage: &CrmStorage,
    customer_id: i64,
    name: &str,
) -> Result<Option<Customer>, CrmError> {
    let customer = storage.get_customer(customer_id).await?;
    let target = storage.disposition_by_name(name).await?;
    if customer.stage > target.stage || customer.disposition_id == target.id {
        return Ok(None);
    }
    change_disposition(storage, &customer, &target).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn customer(stage: Stage, disposition: &str) -> Customer {
        Customer {
            id: 1,
            stage,
            disposition_id: 1,
            disposition: disposition.to_string(),
            first_name: "Ada".into(),
            last_name: "Byrne".into(),
            email: None,
            phone: None,
            address: None,
            city: None,
            state: None,
            zip: None,
            estimated_debt: None,
            assigned_to: None,
            source: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn disposition(name: &str, stage: Stage) -> Disposition {
        Disposition {
            id: 99,
            name: name.to_string(),
            stage,
        }
    }

    #[test]
    fn phones_normalize_to_e164() {
        assert_eq!(normalize_phone("(555) 123-4567").as_deref(), Some("+15551234567"));
        assert_eq!(normalize_phone("1-555-123-4567").as_deref(), Some("+15551234567"));
        assert_eq!(normalize_phone("+44 20 7946 0958").as_deref(), Some("+442079460958"));
        assert_eq!(normalize_phone("12345"), None);
    }

    #[test]
    fn sanitize_rejects_missing_names_and_bad_phone() {
        let mut new = NewCustomer {
            first_name: "  ".into(),
            last_name: "Byrne".into(),
            ..Default::default()
        };
        assert!(sanitize_new_customer(&mut new).is_err());

        let mut new = NewCustomer {
            first_name: "Ada".into(),
            last_name: "Byrne".into(),
            phone: Some("555".into()),
            ..Default::default()
        };
        assert!(sanitize_new_customer(&mut new).is_err());

        let mut new = NewCustomer {
            first_name: " Ada ".into(),
            last_name: "Byrne".into(),
            email: Some(" ADA@Example.com ".into()),
            phone: Some("555.123.4567".into()),
            state: Some("tx".into()),
            estimated_debt: Some(Decimal::new(1_250_000, 2)),
            ..Default::default()
        };
        sanitize_new_customer(&mut new).unwrap();
        assert_eq!(new.first_name, "Ada");
        assert_eq!(new.email.as_deref(), Some("ada@example.com"));
        assert_eq!(new.phone.as_deref(), Some("+15551234567"));
        assert_eq!(new.state.as_deref(), Some("TX"));
    }

    #[test]
    fn stages_never_move_backwards() {
        let current = customer(Stage::Candidate, "Contract Sent");
        let err = check_transition(&current, &disposition("Contacted", Stage::Lead), false);
        assert!(matches!(err, Err(CrmError::InvalidTransition { .. })));
        assert!(check_transition(&current, &disposition("Candidate Lost", Stage::Candidate), false).is_ok());
    }

    #[test]
    fn client_stage_requires_signed_contract() {
        let current = customer(Stage::Candidate, "Contract Sent");
        let target = disposition(ACTIVE_CLIENT, Stage::Client);
        assert!(check_transition(&current, &target, false).is_err());
        assert!(check_transition(&current, &target, true).is_ok());

        let client = customer(Stage::Client, ACTIVE_CLIENT);
        assert!(check_transition(&client, &disposition(NSF, Stage::Client), false).is_ok());
    }
}
