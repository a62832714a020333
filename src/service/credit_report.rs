//! Smart Credit enrollment and import of bureau trade lines as debts.

use crate::api::smart_credit::SmartCreditApi;
use crate::db::CrmStorage;
use crate::db::models::{
    CreditReportAccount, CreditReportStatus, Customer, Debt, DebtSource, DebtStatus, NewDebt,
    Stage, last4,
};
use crate::error::CrmError;
use crate::service::funnel::{self, CREDIT_REPORT_PULLED};
use crate::service::notify::Notifier;
use crate::types::smart_credit::{CreateCustomerRequest, SecurityAnswer, SecurityQuestion, TradeLine};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use tracing::{info, warn};

// secured or government-backed lines cannot be negotiated
const EXCLUDED_ACCOUNT_TYPES: [&str; 5] = ["mortgage", "auto", "student", "home equity", "lease"];

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub ssn: String,
    pub date_of_birth: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub account: CreditReportAccount,
    pub questions: Vec<SecurityQuestion>,
}

#[derive(Debug, Deserialize)]
pub struct AnswersRequest {
    pub answers: Vec<SecurityAnswer>,
}

fn clean_ssn(raw: &str) -> Result<String, CrmError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 9 {
        return Err(CrmError::BadRequest("ssn must have 9 digits".to_string()));
    }
    Ok(digits)
}

/// Open the proxy account and fetch identity questions.
pub async fn start(
    storage: &CrmStorage,
    api: &SmartCreditApi,
    customer: &Customer,
    req: &StartRequest,
) -> Result<StartResponse, CrmError> {
    let email = customer
        .email
        .as_deref()
        .ok_or_else(|| CrmError::BadRequest("customer has no email address".to_string()))?;
    let ssn = clean_ssn(&req.ssn)?;

    let result = async {
        let tracking = api.start_signup().await?;
        let create = CreateCustomerRequest {
            client_key: api.client_key(),
            tracking_token: &tracking,
            first_name: &customer.first_name,
            last_name: &customer.last_name,
            email,
            phone: customer.phone.as_deref(),
            street: customer.address.as_deref(),
            zip: customer.zip.as_deref(),
            ssn: &ssn,
            birth_date: req.date_of_birth,
        };
        let customer_token = api.create_customer(&create).await?;
        let questions = api.security_questions(&tracking, &customer_token).await?;
        Ok::<_, CrmError>((tracking, customer_token, questions))
    }
    .await;

    match result {
        Ok((tracking, customer_token, questions)) => {
            let account = storage
                .upsert_credit_report_account(
                    customer.id,
                    Some(&tracking),
                    Some(&customer_token),
                    CreditReportStatus::SecurityQuestions,
                    None,
                )
                .await?;
            info!(customer_id = customer.id, questions = questions.len(), "credit report enrollment started");
            Ok(StartResponse { account, questions })
        }
        Err(e) => {
            storage
                .upsert_credit_report_account(
                    customer.id,
                    None,
                    None,
                    CreditReportStatus::Failed,
                    Some(&e.to_string()),
                )
                .await?;
            Err(e)
        }
    }
}

/// Submit identity answers; a verified account may pull its report.
pub async fn answer(
    storage: &CrmStorage,
    api: &SmartCreditApi,
    customer_id: i64,
    answers: &[SecurityAnswer],
) -> Result<CreditReportAccount, CrmError> {
    let account = storage
        .credit_report_account(customer_id)
        .await?
        .ok_or_else(|| CrmError::NotFound(format!("credit report account for {customer_id}")))?;
    if account.status != CreditReportStatus::SecurityQuestions {
        return Err(CrmError::InvalidTransition {
            from: format!("{:?}", account.status).to_lowercase(),
            to: "verified".to_string(),
        });
    }
    let (Some(tracking), Some(token)) = (account.tracking_token.as_deref(), account.customer_token.as_deref())
    else {
        return Err(CrmError::Conflict("credit report enrollment is incomplete".to_string()));
    };

    let resp = api.answer_security_questions(tracking, token, answers).await?;
    let (status, error) = if resp.verified {
        (CreditReportStatus::Verified, None)
    } else {
        (
            CreditReportStatus::Failed,
            Some(resp.message.unwrap_or_else(|| "identity verification failed".to_string())),
        )
    };
    info!(customer_id, verified = resp.verified, "security answers submitted");
    storage
        .upsert_credit_report_account(customer_id, None, None, status, error.as_deref())
        .await
}

/// Reports can be pulled once identity is verified, and pulled again later.
pub fn ensure_pullable(account: Option<&CreditReportAccount>) -> Result<(), CrmError> {
    match account.map(|a| a.status) {
        Some(CreditReportStatus::Verified | CreditReportStatus::ReportPulled) => Ok(()),
        Some(other) => Err(CrmError::InvalidTransition {
            from: format!("{other:?}").to_lowercase(),
            to: "report_pulled".to_string(),
        }),
        None => Err(CrmError::BadRequest(
            "credit report enrollment has not been started".to_string(),
        )),
    }
}

pub fn is_settleable(line: &TradeLine) -> bool {
    if line.balance <= Decimal::ZERO {
        return false;
    }
    let kind = line.account_type.as_deref().unwrap_or_default().to_lowercase();
    !EXCLUDED_ACCOUNT_TYPES.iter().any(|x| kind.contains(x))
}

fn dedupe_key(creditor: &str, account_number: &str) -> (String, String) {
    (creditor.trim().to_lowercase(), last4(account_number.trim()).to_string())
}

/// Trade lines worth enrolling that are not already on file.
pub fn new_debts_from(lines: &[TradeLine], existing: &[Debt]) -> Vec<NewDebt> {
    let mut seen: HashSet<(String, String)> = existing
        .iter()
        .map(|d| dedupe_key(&d.creditor, &d.account_number))
        .collect();

    lines
        .iter()
        .filter(|l| is_settleable(l))
        .filter(|l| seen.insert(dedupe_key(&l.creditor_name, &l.account_number)))
        .map(|l| NewDebt {
            creditor: l.creditor_name.trim().to_string(),
            account_number: l.account_number.trim().to_string(),
            account_type: l.account_type.clone(),
            original_balance: l.high_balance.unwrap_or(l.balance).max(l.balance),
            current_balance: Some(l.balance),
            status: DebtStatus::Enrolled,
        })
        .collect()
}

/// Fetch the report, store new debts, and move a lead to the candidate stage.
pub async fn import_report(
    storage: &CrmStorage,
    api: &SmartCreditApi,
    notifier: &Notifier,
    customer_id: i64,
) -> Result<Vec<Debt>, CrmError> {
    let account = storage.credit_report_account(customer_id).await?;
    ensure_pullable(account.as_ref())?;
    let token = account
        .as_ref()
        .and_then(|a| a.customer_token.clone())
        .ok_or_else(|| CrmError::Conflict("credit report account has no customer token".to_string()))?;

    let lines = match api.fetch_report(&token).await {
        Ok(lines) => lines,
        Err(e) => {
            if !e.is_retryable() {
                storage
                    .upsert_credit_report_account(
                        customer_id,
                        None,
                        None,
                        CreditReportStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await?;
            }
            return Err(e);
        }
    };

    let existing = storage.list_debts(customer_id).await?;
    let mut created = Vec::new();
    for new in new_debts_from(&lines, &existing) {
        created.push(storage.insert_debt(customer_id, &new, DebtSource::CreditReport).await?);
    }
    storage
        .upsert_credit_report_account(customer_id, None, None, CreditReportStatus::ReportPulled, None)
        .await?;

    let customer = storage.get_customer(customer_id).await?;
    if customer.stage == Stage::Lead {
        if let Err(e) = funnel::promote(storage, customer_id, CREDIT_REPORT_PULLED).await {
            warn!(customer_id, error = %e, "could not advance disposition after report pull");
        }
    }
    if let Some(agent) = customer.assigned_to {
        notifier.notify(
            agent,
            "credit_report.pulled",
            json!({"customer_id": customer_id, "debts_added": created.len()}),
        );
    }
    info!(
        customer_id,
        trade_lines = lines.len(),
        debts_added = created.len(),
        "credit report imported"
    );
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;

    fn line(creditor: &str, number: &str, kind: &str, balance: &str) -> TradeLine {
        TradeLine {
            creditor_name: creditor.to_string(),
            account_number: number.to_string(),
            account_type: Some(kind.to_string()),
            high_balance: None,
            balance: Decimal::from_str(balance).unwrap(),
            account_status: None,
        }
    }

    #[test]
    fn only_unsecured_open_balances_are_settleable() {
        assert!(is_settleable(&line("Visa", "1", "Credit Card", "10")));
        assert!(is_settleable(&line("Collector", "1", "Collection", "10")));
        assert!(!is_settleable(&line("Visa", "1", "Credit Card", "0")));
        assert!(!is_settleable(&line("Bank", "1", "Mortgage", "1000")));
        assert!(!is_settleable(&line("Dealer", "1", "Auto Loan", "1000")));
    }

    #[test]
    fn trade_lines_dedupe_by_creditor_and_last4() {
        let existing = vec![Debt {
            id: 1,
            customer_id: 1,
            creditor: "Big Bank".into(),
            account_number: "xxxx1111".into(),
            account_type: None,
            original_balance: Decimal::from(100),
            current_balance: Decimal::from(100),
            settlement_amount: None,
            status: DebtStatus::Enrolled,
            source: DebtSource::Manual,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }];
        let lines = vec![
            line("BIG BANK ", "4000000011111111", "Credit Card", "250"),
            line("Store Card", "5555000022222222", "Revolving", "75.10"),
            line("Store Card", "9999000022222222", "Revolving", "75.10"),
            line("Other", "123", "Mortgage", "9000"),
        ];
        let debts = new_debts_from(&lines, &existing);
        assert_eq!(debts.len(), 1);
        assert_eq!(debts[0].creditor, "Store Card");
        assert_eq!(debts[0].current_balance, Some(Decimal::from_str("75.10").unwrap()));
    }

    #[test]
    fn pull_requires_verified_identity() {
        assert!(matches!(ensure_pullable(None), Err(CrmError::BadRequest(_))));
        let mut account = CreditReportAccount {
            id: 1,
            customer_id: 1,
            tracking_token: None,
            customer_token: None,
            status: CreditReportStatus::SecurityQuestions,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(ensure_pullable(Some(&account)).is_err());
        account.status = CreditReportStatus::Verified;
        assert!(ensure_pullable(Some(&account)).is_ok());
    }

    #[test]
    fn ssn_is_normalized() {
        assert_eq!(clean_ssn("123-45-6789").unwrap(), "123456789");
        assert!(clean_ssn("12345").is_err());
    }
}
