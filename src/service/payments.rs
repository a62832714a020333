//! Settlement program schedule and sales commission math.

use crate::db::CrmStorage;
use crate::db::models::{Payment, PaymentPlan, PaymentStatus, Stage};
use crate::error::CrmError;
use crate::service::funnel::{self, NSF};
use chrono::{Months, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const MIN_TERM: i64 = 6;
pub const MAX_TERM: i64 = 72;

/// One row of a computed schedule before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Installment {
    pub number: i64,
    pub due_date: NaiveDate,
    pub amount: Decimal,
    pub fee: Decimal,
}

/// Body of `POST /customers/{id}/payment-schedule`.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanRequest {
    /// Defaults to the customer's enrolled debt total.
    #[serde(default)]
    pub enrolled_debt: Option<Decimal>,
    pub fee_pct: Decimal,
    pub savings_pct: Decimal,
    pub term_months: i64,
    #[serde(default)]
    pub monthly_service_fee: Decimal,
    pub first_payment: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct Commission {
    pub user_id: i64,
    pub rate: Decimal,
    pub cleared_fees: Decimal,
    pub cleared_installments: usize,
    pub commission: Decimal,
}

pub fn validate_plan(plan: &PaymentPlan) -> Result<(), CrmError> {
    if plan.enrolled_debt <= Decimal::ZERO {
        return Err(CrmError::BadRequest(
            "enrolled debt must be greater than zero".to_string(),
        ));
    }
    if !(MIN_TERM..=MAX_TERM).contains(&plan.term_months) {
        return Err(CrmError::BadRequest(format!(
            "term_months must be within {MIN_TERM}..={MAX_TERM}"
        )));
    }
    if plan.fee_pct < Decimal::ZERO || plan.fee_pct > Decimal::new(5, 1) {
        return Err(CrmError::BadRequest("fee_pct must be within 0..=0.5".to_string()));
    }
    if plan.savings_pct < Decimal::ZERO || plan.savings_pct > Decimal::new(9, 1) {
        return Err(CrmError::BadRequest(
            "savings_pct must be within 0..=0.9".to_string(),
        ));
    }
    if plan.service_fee < Decimal::ZERO {
        return Err(CrmError::BadRequest(
            "monthly_service_fee must not be negative".to_string(),
        ));
    }
    Ok(())
}

fn cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Split `total` into `n` cent-rounded parts; the last part takes the
/// remainder and must not go negative.
fn spread(total: Decimal, n: i64) -> Result<Vec<Decimal>, CrmError> {
    let each = cents(total / Decimal::from(n));
    let last = total - each * Decimal::from(n - 1);
    if last < Decimal::ZERO {
        return Err(CrmError::BadRequest(format!(
            "{total} cannot be spread over {n} installments"
        )));
    }
    let mut parts = vec![each; n as usize];
    if let Some(slot) = parts.last_mut() {
        *slot = last;
    }
    Ok(parts)
}

/// Total amount the client pays over the program.
pub fn program_total(plan: &PaymentPlan) -> Decimal {
    let settlements = plan.enrolled_debt * (Decimal::ONE - plan.savings_pct);
    cents(settlements + program_fee(plan) + plan.service_fee * Decimal::from(plan.term_months))
}

pub fn program_fee(plan: &PaymentPlan) -> Decimal {
    cents(plan.enrolled_debt * plan.fee_pct)
}

/// Monthly installments for a validated plan. Due dates that fall past the
/// end of a shorter month are clamped to its last day.
pub fn build_schedule(plan: &PaymentPlan) -> Result<Vec<Installment>, CrmError> {
    validate_plan(plan)?;
    let amounts = spread(program_total(plan), plan.term_months)?;
    let fees = spread(program_fee(plan), plan.term_months)?;

    amounts
        .into_iter()
        .zip(fees)
        .enumerate()
        .map(|(i, (amount, fee))| {
            let due_date = plan
                .first_payment
                .checked_add_months(Months::new(i as u32))
                .ok_or_else(|| CrmError::BadRequest("first_payment out of range".to_string()))?;
            Ok(Installment {
                number: i as i64 + 1,
                due_date,
                amount,
                fee,
            })
        })
        .collect()
}

/// Commission earned on the fee portion of cleared installments.
pub fn commission(user_id: i64, rate: Decimal, cleared: &[Payment]) -> Commission {
    let cleared: Vec<&Payment> = cleared
        .iter()
        .filter(|p| p.status == PaymentStatus::Cleared)
        .collect();
    let cleared_fees: Decimal = cleared.iter().map(|p| p.fee).sum();
    Commission {
        user_id,
        rate,
        cleared_fees,
        cleared_installments: cleared.len(),
        commission: cents(cleared_fees * rate),
    }
}

/// Build and persist a new schedule. A previous one is replaced only while
/// all of its installments are still scheduled.
pub async fn create_plan(
    storage: &CrmStorage,
    customer_id: i64,
    req: PlanRequest,
) -> Result<(PaymentPlan, Vec<Payment>), CrmError> {
    let enrolled_debt = match req.enrolled_debt {
        Some(d) => d,
        None => storage.enrolled_debt_total(customer_id).await?,
    };
    let plan = PaymentPlan {
        customer_id,
        enrolled_debt,
        fee_pct: req.fee_pct,
        savings_pct: req.savings_pct,
        term_months: req.term_months,
        service_fee: req.monthly_service_fee,
        first_payment: req.first_payment,
        created_at: Utc::now(),
    };
    let schedule = build_schedule(&plan)?;
    let payments = storage.replace_payment_plan(&plan, &schedule).await?;
    info!(
        customer_id,
        installments = payments.len(),
        total = %program_total(&plan),
        "payment schedule created"
    );
    Ok((plan, payments))
}

/// Update one installment. An NSF moves the customer to the `NSF` disposition.
pub async fn set_status(
    storage: &CrmStorage,
    payment_id: i64,
    status: PaymentStatus,
) -> Result<Payment, CrmError> {
    let current = storage.get_payment(payment_id).await?;
    if current.status == PaymentStatus::Cancelled && status != PaymentStatus::Cancelled {
        return Err(CrmError::InvalidTransition {
            from: "cancelled".to_string(),
            to: format!("{status:?}").to_lowercase(),
        });
    }
    let payment = storage.set_payment_status(payment_id, status).await?;
    if status == PaymentStatus::Nsf
        && storage.get_customer(payment.customer_id).await?.stage == Stage::Client
    {
        funnel::promote(storage, payment.customer_id, NSF).await?;
    }
    Ok(payment)
}

pub async fn agent_commission(storage: &CrmStorage, user_id: i64) -> Result<Commission, CrmError> {
    let user = storage.get_user(user_id).await?;
    let cleared = storage.cleared_payments_for_agent(user_id).await?;
    Ok(commission(user_id, user.commission_rate, &cleared))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn plan(debt: &str, term: i64) -> PaymentPlan {
        PaymentPlan {
            customer_id: 1,
            enrolled_debt: dec(debt),
            fee_pct: dec("0.25"),
            savings_pct: dec("0.5"),
            term_months: term,
            service_fee: dec("10"),
            first_payment: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn schedule_sums_to_program_total() {
        let p = plan("10000", 24);
        // 5000 settlements + 2500 fee + 240 service
        assert_eq!(program_total(&p), dec("7740"));
        let schedule = build_schedule(&p).unwrap();
        assert_eq!(schedule.len(), 24);
        assert_eq!(schedule.iter().map(|i| i.amount).sum::<Decimal>(), dec("7740"));
        assert_eq!(schedule.iter().map(|i| i.fee).sum::<Decimal>(), dec("2500"));
        assert_eq!(schedule[0].amount, dec("322.50"));
    }

    #[test]
    fn last_installment_absorbs_rounding() {
        let mut p = plan("1000", 7);
        p.service_fee = Decimal::ZERO;
        p.savings_pct = Decimal::ZERO;
        p.fee_pct = Decimal::ZERO;
        let schedule = build_schedule(&p).unwrap();
        // 1000 / 7 = 142.857.. -> 142.86 x6 = 857.16, last = 142.84
        assert_eq!(schedule[0].amount, dec("142.86"));
        assert_eq!(schedule[6].amount, dec("142.84"));
        assert_eq!(schedule.iter().map(|i| i.amount).sum::<Decimal>(), dec("1000"));
    }

    #[test]
    fn tiny_programs_never_produce_negative_installments() {
        let mut p = plan("0.72", 72);
        p.service_fee = Decimal::ZERO;
        p.fee_pct = Decimal::ZERO;
        // 0.36 / 72 rounds up to 0.01, which leaves -0.35 for the last one
        let err = build_schedule(&p).unwrap_err();
        assert!(matches!(err, CrmError::BadRequest(_)));

        let mut p = plan("1.44", 72);
        p.service_fee = Decimal::ZERO;
        p.fee_pct = Decimal::ZERO;
        let schedule = build_schedule(&p).unwrap();
        assert!(schedule.iter().all(|i| i.amount >= Decimal::ZERO));
        assert_eq!(schedule.iter().map(|i| i.amount).sum::<Decimal>(), dec("0.72"));
    }

    #[tokio::test]
    async fn processed_installments_lock_the_schedule() {
        let storage = CrmStorage::connect("sqlite::memory:").await.unwrap();
        let agent = storage
            .create_user("Jo", "jo@example.com", None, "sales_agent", dec("0.1"))
            .await
            .unwrap();
        let customer = funnel::create_lead(
            &storage,
            crate::db::models::NewCustomer {
                first_name: "Ada".into(),
                last_name: "Byrne".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        storage.assign_customer(customer.id, agent.id).await.unwrap();
        let req = PlanRequest {
            enrolled_debt: Some(dec("10000")),
            fee_pct: dec("0.25"),
            savings_pct: dec("0.5"),
            term_months: 24,
            monthly_service_fee: Decimal::ZERO,
            first_payment: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
        };

        // untouched schedules may be replaced
        create_plan(&storage, customer.id, req.clone()).await.unwrap();
        let (_, payments) = create_plan(&storage, customer.id, req.clone()).await.unwrap();
        assert_eq!(payments.len(), 24);

        set_status(&storage, payments[0].id, PaymentStatus::Cleared).await.unwrap();
        let before = agent_commission(&storage, agent.id).await.unwrap();
        assert!(before.commission > Decimal::ZERO);

        let err = create_plan(&storage, customer.id, req).await.unwrap_err();
        assert!(matches!(err, CrmError::Conflict(_)));
        let after = agent_commission(&storage, agent.id).await.unwrap();
        assert_eq!(after.commission, before.commission);
        let kept = storage.list_payments(customer.id).await.unwrap();
        assert_eq!(kept.len(), 24);
        assert_eq!(kept[0].status, PaymentStatus::Cleared);
    }

    #[test]
    fn due_dates_clamp_to_month_end() {
        let schedule = build_schedule(&plan("10000", 6)).unwrap();
        let dates: Vec<String> = schedule.iter().map(|i| i.due_date.to_string()).collect();
        assert_eq!(dates[0], "2025-01-31");
        assert_eq!(dates[1], "2025-02-28");
        assert_eq!(dates[2], "2025-03-31");
        assert_eq!(dates[3], "2025-04-30");
    }

    #[test]
    fn invalid_plans_are_rejected() {
        assert!(build_schedule(&plan("10000", 5)).is_err());
        assert!(build_schedule(&plan("10000", 73)).is_err());
        assert!(build_schedule(&plan("0", 12)).is_err());
        let mut p = plan("10000", 12);
        p.fee_pct = dec("0.51");
        assert!(build_schedule(&p).is_err());
        let mut p = plan("10000", 12);
        p.savings_pct = dec("0.95");
        assert!(build_schedule(&p).is_err());
    }

    #[test]
    fn commission_counts_only_cleared_fees() {
        let payment = |fee: &str, status| Payment {
            id: 1,
            customer_id: 1,
            installment: 1,
            due_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            amount: dec("300"),
            fee: dec(fee),
            status,
            updated_at: Utc::now(),
        };
        let payments = [
            payment("100", PaymentStatus::Cleared),
            payment("100", PaymentStatus::Cleared),
            payment("100", PaymentStatus::Nsf),
        ];
        let c = commission(9, dec("0.1"), &payments);
        assert_eq!(c.cleared_installments, 2);
        assert_eq!(c.cleared_fees, dec("200"));
        assert_eq!(c.commission, dec("20.00"));
    }
}
