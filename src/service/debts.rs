use crate::db::CrmStorage;
use crate::db::models::{Debt, DebtPatch, DebtSource, DebtStatus, NewDebt};
use crate::error::CrmError;
use rust_decimal::Decimal;

pub fn validate_new(new: &NewDebt) -> Result<(), CrmError> {
    if new.creditor.trim().is_empty() {
        return Err(CrmError::BadRequest("creditor is required".to_string()));
    }
    if new.account_number.trim().is_empty() {
        return Err(CrmError::BadRequest("account_number is required".to_string()));
    }
    if new.original_balance < Decimal::ZERO
        || new.current_balance.is_some_and(|b| b < Decimal::ZERO)
    {
        return Err(CrmError::BadRequest("balances must not be negative".to_string()));
    }
    if new.status == DebtStatus::Settled {
        return Err(CrmError::BadRequest(
            "a new debt cannot start out settled".to_string(),
        ));
    }
    Ok(())
}

/// Check a patch against the stored debt. A settled debt needs a settlement
/// amount no larger than its current balance.
pub fn validate_patch(current: &Debt, patch: &DebtPatch) -> Result<(), CrmError> {
    let balance = patch.current_balance.unwrap_or(current.current_balance);
    if balance < Decimal::ZERO {
        return Err(CrmError::BadRequest("balances must not be negative".to_string()));
    }
    let status = patch.status.unwrap_or(current.status);
    let settlement = patch.settlement_amount.or(current.settlement_amount);
    if let Some(amount) = settlement
        && (amount <= Decimal::ZERO || amount > balance)
    {
        return Err(CrmError::BadRequest(
            "settlement_amount must be positive and not exceed the current balance".to_string(),
        ));
    }
    if status == DebtStatus::Settled && settlement.is_none() {
        return Err(CrmError::BadRequest(
            "settling a debt requires a settlement_amount".to_string(),
        ));
    }
    Ok(())
}

pub async fn add(storage: &CrmStorage, customer_id: i64, new: NewDebt) -> Result<Debt, CrmError> {
    validate_new(&new)?;
    storage.get_customer(customer_id).await?;
    storage.insert_debt(customer_id, &new, DebtSource::Manual).await
}

pub async fn update(storage: &CrmStorage, current: &Debt, patch: &DebtPatch) -> Result<Debt, CrmError> {
    validate_patch(current, patch)?;
    storage.update_debt(current.id, patch).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn debt() -> Debt {
        Debt {
            id: 1,
            customer_id: 1,
            creditor: "Visa".into(),
            account_number: "4000123412341234".into(),
            account_type: None,
            original_balance: Decimal::from(5000),
            current_balance: Decimal::from(4000),
            settlement_amount: None,
            status: DebtStatus::Enrolled,
            source: DebtSource::Manual,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn settling_requires_amount_within_balance() {
        let settle = |amount: Option<i64>| DebtPatch {
            status: Some(DebtStatus::Settled),
            settlement_amount: amount.map(Decimal::from),
            ..Default::default()
        };
        assert!(validate_patch(&debt(), &settle(None)).is_err());
        assert!(validate_patch(&debt(), &settle(Some(4500))).is_err());
        assert!(validate_patch(&debt(), &settle(Some(0))).is_err());
        assert!(validate_patch(&debt(), &settle(Some(1600))).is_ok());
    }

    #[test]
    fn lowering_balance_below_settlement_is_rejected() {
        let mut d = debt();
        d.settlement_amount = Some(Decimal::from(2000));
        let patch = DebtPatch {
            current_balance: Some(Decimal::from(1000)),
            ..Default::default()
        };
        assert!(validate_patch(&d, &patch).is_err());
    }

    #[test]
    fn new_debts_need_creditor_and_number() {
        let new = NewDebt {
            creditor: " ".into(),
            account_number: "1".into(),
            account_type: None,
            original_balance: Decimal::from(10),
            current_balance: None,
            status: DebtStatus::Enrolled,
        };
        assert!(validate_new(&new).is_err());
    }
}
