use crate::api::datax::DataxApi;
use crate::db::CrmStorage;
use crate::db::models::{BankAccount, BankValidation};
use crate::error::CrmError;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct BankAccountRequest {
    pub routing_number: String,
    pub account_number: String,
    #[serde(default = "default_account_type")]
    pub account_type: String,
    pub holder_name: String,
}

fn default_account_type() -> String {
    "checking".to_string()
}

/// ABA routing number checksum: weights 3, 7, 1 repeated, sum divisible by 10.
pub fn valid_routing_number(routing: &str) -> bool {
    if routing.len() != 9 || !routing.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = routing
        .bytes()
        .map(|b| u32::from(b - b'0'))
        .zip([3, 7, 1].into_iter().cycle())
        .map(|(d, w)| d * w)
        .sum();
    sum % 10 == 0
}

pub fn validate_request(req: &BankAccountRequest) -> Result<(), CrmError> {
    if !valid_routing_number(req.routing_number.trim()) {
        return Err(CrmError::BadRequest(format!(
            "routing number `{}` fails the ABA checksum",
            req.routing_number.trim()
        )));
    }
    let account = req.account_number.trim();
    if !(4..=17).contains(&account.len()) || !account.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CrmError::BadRequest(
            "account_number must be 4 to 17 digits".to_string(),
        ));
    }
    if !matches!(req.account_type.as_str(), "checking" | "savings") {
        return Err(CrmError::BadRequest(
            "account_type must be checking or savings".to_string(),
        ));
    }
    if req.holder_name.trim().is_empty() {
        return Err(CrmError::BadRequest("holder_name is required".to_string()));
    }
    Ok(())
}

/// Store the account in `pending` state; verification runs as a job.
pub async fn save_account(
    storage: &CrmStorage,
    customer_id: i64,
    req: &BankAccountRequest,
) -> Result<BankAccount, CrmError> {
    validate_request(req)?;
    storage
        .upsert_bank_account(
            customer_id,
            req.routing_number.trim(),
            req.account_number.trim(),
            &req.account_type,
            req.holder_name.trim(),
        )
        .await
}

/// Run the DataX inquiry for a stored account and record the outcome.
pub async fn verify(
    storage: &CrmStorage,
    api: &DataxApi,
    customer_id: i64,
) -> Result<BankValidation, CrmError> {
    let account = storage
        .bank_account(customer_id)
        .await?
        .ok_or_else(|| CrmError::NotFound(format!("bank account for {customer_id}")))?;
    let customer = storage.get_customer(customer_id).await?;

    let track_id = format!("crm-{}-{}", customer_id, account.id);
    let result = api
        .verify_account(
            &track_id,
            &customer.first_name,
            &customer.last_name,
            &account.routing_number,
            &account.account_number,
        )
        .await?;
    storage
        .set_bank_validation(customer_id, result.validation, result.message.as_deref())
        .await?;
    info!(
        customer_id,
        validation = ?result.validation,
        transaction_id = ?result.transaction_id,
        "bank account verified"
    );
    Ok(result.validation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aba_checksum() {
        // well-known valid routing numbers
        assert!(valid_routing_number("011000015"));
        assert!(valid_routing_number("021000021"));
        assert!(!valid_routing_number("021000022"));
        assert!(!valid_routing_number("12345678"));
        assert!(!valid_routing_number("01100001a"));
    }

    #[test]
    fn request_validation() {
        let mut req = BankAccountRequest {
            routing_number: "021000021".into(),
            account_number: "123456789".into(),
            account_type: "checking".into(),
            holder_name: "Ada Byrne".into(),
        };
        assert!(validate_request(&req).is_ok());
        req.account_type = "brokerage".into();
        assert!(validate_request(&req).is_err());
        req.account_type = "savings".into();
        req.account_number = "12".into();
        assert!(validate_request(&req).is_err());
    }
}
