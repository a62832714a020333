//! Credit-report accounts, debts, bank accounts and payment schedules.

use crate::db::models::{
    BankAccount, BankValidation, CreditReportAccount, CreditReportStatus, Debt, DebtPatch,
    DebtSource, DebtStatus, NewDebt, Payment, PaymentPlan, PaymentStatus,
};
use crate::db::sqlite::{CrmStorage, decimal_col, opt_decimal_col};
use crate::error::CrmError;
use crate::service::payments::Installment;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

impl CrmStorage {
    pub async fn upsert_credit_report_account(
        &self,
        customer_id: i64,
        tracking_token: Option<&str>,
        customer_token: Option<&str>,
        status: CreditReportStatus,
        last_error: Option<&str>,
    ) -> Result<CreditReportAccount, CrmError> {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO credit_report_accounts (
                customer_id, tracking_token, customer_token, status, last_error, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(customer_id) DO UPDATE SET
                tracking_token = COALESCE(excluded.tracking_token, tracking_token),
                customer_token = COALESCE(excluded.customer_token, customer_token),
                status = excluded.status,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at"#,
        )
        .bind(customer_id)
        .bind(tracking_token)
        .bind(customer_token)
        .bind(status)
        .bind(last_error)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        self.credit_report_account(customer_id)
            .await?
            .ok_or_else(|| CrmError::NotFound(format!("credit report account for {customer_id}")))
    }

    pub async fn credit_report_account(
        &self,
        customer_id: i64,
    ) -> Result<Option<CreditReportAccount>, CrmError> {
        Ok(sqlx::query_as::<_, CreditReportAccount>(
            r#"SELECT id, customer_id, tracking_token, customer_token, status, last_error,
               created_at, updated_at FROM credit_report_accounts WHERE customer_id = ?"#,
        )
        .bind(customer_id)
        .fetch_optional(self.pool())
        .await?)
    }

    pub async fn insert_debt(
        &self,
        customer_id: i64,
        new: &NewDebt,
        source: DebtSource,
    ) -> Result<Debt, CrmError> {
        let now = Utc::now();
        let current = new.current_balance.unwrap_or(new.original_balance);
        let id = sqlx::query(
            r#"INSERT INTO debts (
                customer_id, creditor, account_number, account_type, original_balance,
                current_balance, status, source, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(customer_id)
        .bind(&new.creditor)
        .bind(&new.account_number)
        .bind(&new.account_type)
        .bind(new.original_balance.to_string())
        .bind(current.to_string())
        .bind(new.status)
        .bind(source)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?
        .last_insert_rowid();
        self.get_debt(id).await
    }

    pub async fn get_debt(&self, id: i64) -> Result<Debt, CrmError> {
        let row = sqlx::query(&format!("{DEBT_SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| CrmError::NotFound(format!("debt {id}")))?;
        Self::row_to_debt(row)
    }

    pub async fn list_debts(&self, customer_id: i64) -> Result<Vec<Debt>, CrmError> {
        let rows = sqlx::query(&format!("{DEBT_SELECT} WHERE customer_id = ? ORDER BY id"))
            .bind(customer_id)
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(Self::row_to_debt).collect()
    }

    pub async fn update_debt(&self, id: i64, patch: &DebtPatch) -> Result<Debt, CrmError> {
        sqlx::query(
            r#"UPDATE debts SET
                creditor = COALESCE(?, creditor),
                account_type = COALESCE(?, account_type),
                current_balance = COALESCE(?, current_balance),
                settlement_amount = COALESCE(?, settlement_amount),
                status = COALESCE(?, status),
                updated_at = ?
              WHERE id = ?"#,
        )
        .bind(&patch.creditor)
        .bind(&patch.account_type)
        .bind(patch.current_balance.map(|d| d.to_string()))
        .bind(patch.settlement_amount.map(|d| d.to_string()))
        .bind(patch.status)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;
        self.get_debt(id).await
    }

    pub async fn delete_debt(&self, id: i64) -> Result<(), CrmError> {
        let result = sqlx::query("DELETE FROM debts WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(CrmError::NotFound(format!("debt {id}")));
        }
        Ok(())
    }

    pub async fn enrolled_debt_total(&self, customer_id: i64) -> Result<Decimal, CrmError> {
        Ok(self
            .list_debts(customer_id)
            .await?
            .iter()
            .filter(|d| d.status == DebtStatus::Enrolled)
            .map(|d| d.current_balance)
            .sum())
    }

    pub async fn upsert_bank_account(
        &self,
        customer_id: i64,
        routing_number: &str,
        account_number: &str,
        account_type: &str,
        holder_name: &str,
    ) -> Result<BankAccount, CrmError> {
        sqlx::query(
            r#"INSERT INTO bank_accounts (
                customer_id, routing_number, account_number, account_type, holder_name, validation
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(customer_id) DO UPDATE SET
                routing_number = excluded.routing_number,
                account_number = excluded.account_number,
                account_type = excluded.account_type,
                holder_name = excluded.holder_name,
                validation = excluded.validation,
                validation_message = NULL,
                validated_at = NULL"#,
        )
        .bind(customer_id)
        .bind(routing_number)
        .bind(account_number)
        .bind(account_type)
        .bind(holder_name)
        .bind(BankValidation::Pending)
        .execute(self.pool())
        .await?;
        self.bank_account(customer_id)
            .await?
            .ok_or_else(|| CrmError::NotFound(format!("bank account for {customer_id}")))
    }

    pub async fn bank_account(&self, customer_id: i64) -> Result<Option<BankAccount>, CrmError> {
        Ok(sqlx::query_as::<_, BankAccount>(
            r#"SELECT id, customer_id, routing_number, account_number, account_type, holder_name,
               validation, validation_message, validated_at
               FROM bank_accounts WHERE customer_id = ?"#,
        )
        .bind(customer_id)
        .fetch_optional(self.pool())
        .await?)
    }

    pub async fn set_bank_validation(
        &self,
        customer_id: i64,
        validation: BankValidation,
        message: Option<&str>,
    ) -> Result<(), CrmError> {
        sqlx::query(
            r#"UPDATE bank_accounts SET validation = ?, validation_message = ?, validated_at = ?
               WHERE customer_id = ?"#,
        )
        .bind(validation)
        .bind(message)
        .bind(Utc::now())
        .bind(customer_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Replace a customer's plan and its installments atomically. Refused
    /// with `Conflict` once any installment has left `scheduled`, so cleared
    /// and NSF history survives.
    pub async fn replace_payment_plan(
        &self,
        plan: &PaymentPlan,
        installments: &[Installment],
    ) -> Result<Vec<Payment>, CrmError> {
        let mut tx = self.pool().begin().await?;
        let now = Utc::now();

        sqlx::query("DELETE FROM payments WHERE customer_id = ? AND status = ?")
            .bind(plan.customer_id)
            .bind(PaymentStatus::Scheduled)
            .execute(&mut *tx)
            .await?;
        let settled: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE customer_id = ?")
            .bind(plan.customer_id)
            .fetch_one(&mut *tx)
            .await?;
        if settled > 0 {
            tx.rollback().await?;
            return Err(CrmError::Conflict(format!(
                "customer {} has {settled} processed installments; the schedule can no longer be replaced",
                plan.customer_id
            )));
        }
        sqlx::query(
            r#"INSERT INTO payment_plans (
                customer_id, enrolled_debt, fee_pct, savings_pct, term_months, service_fee,
                first_payment, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(customer_id) DO UPDATE SET
                enrolled_debt = excluded.enrolled_debt,
                fee_pct = excluded.fee_pct,
                savings_pct = excluded.savings_pct,
                term_months = excluded.term_months,
                service_fee = excluded.service_fee,
                first_payment = excluded.first_payment,
                created_at = excluded.created_at"#,
        )
        .bind(plan.customer_id)
        .bind(plan.enrolled_debt.to_string())
        .bind(plan.fee_pct.to_string())
        .bind(plan.savings_pct.to_string())
        .bind(plan.term_months)
        .bind(plan.service_fee.to_string())
        .bind(plan.first_payment)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for inst in installments {
            sqlx::query(
                r#"INSERT INTO payments (customer_id, installment, due_date, amount, fee, status, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(plan.customer_id)
            .bind(inst.number)
            .bind(inst.due_date)
            .bind(inst.amount.to_string())
            .bind(inst.fee.to_string())
            .bind(PaymentStatus::Scheduled)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.list_payments(plan.customer_id).await
    }

    pub async fn payment_plan(&self, customer_id: i64) -> Result<Option<PaymentPlan>, CrmError> {
        let row = sqlx::query(
            r#"SELECT customer_id, enrolled_debt, fee_pct, savings_pct, term_months, service_fee,
               first_payment, created_at FROM payment_plans WHERE customer_id = ?"#,
        )
        .bind(customer_id)
        .fetch_optional(self.pool())
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(PaymentPlan {
            customer_id: row.try_get("customer_id")?,
            enrolled_debt: decimal_col(&row, "enrolled_debt")?,
            fee_pct: decimal_col(&row, "fee_pct")?,
            savings_pct: decimal_col(&row, "savings_pct")?,
            term_months: row.try_get("term_months")?,
            service_fee: decimal_col(&row, "service_fee")?,
            first_payment: row.try_get("first_payment")?,
            created_at: row.try_get("created_at")?,
        }))
    }

    pub async fn list_payments(&self, customer_id: i64) -> Result<Vec<Payment>, CrmError> {
        let rows = sqlx::query(&format!(
            "{PAYMENT_SELECT} WHERE customer_id = ? ORDER BY installment"
        ))
        .bind(customer_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(Self::row_to_payment).collect()
    }

    pub async fn get_payment(&self, id: i64) -> Result<Payment, CrmError> {
        let row = sqlx::query(&format!("{PAYMENT_SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| CrmError::NotFound(format!("payment {id}")))?;
        Self::row_to_payment(row)
    }

    pub async fn set_payment_status(
        &self,
        id: i64,
        status: PaymentStatus,
    ) -> Result<Payment, CrmError> {
        sqlx::query("UPDATE payments SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        self.get_payment(id).await
    }

    /// Cleared installments of every customer assigned to `agent_id`.
    pub async fn cleared_payments_for_agent(&self, agent_id: i64) -> Result<Vec<Payment>, CrmError> {
        let rows = sqlx::query(
            r#"SELECT p.id, p.customer_id, p.installment, p.due_date, p.amount, p.fee, p.status, p.updated_at
               FROM payments p JOIN customers c ON c.id = p.customer_id
               WHERE c.assigned_to = ? AND p.status = ?
               ORDER BY p.customer_id, p.installment"#,
        )
        .bind(agent_id)
        .bind(PaymentStatus::Cleared)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(Self::row_to_payment).collect()
    }

    fn row_to_debt(row: SqliteRow) -> Result<Debt, CrmError> {
        Ok(Debt {
            id: row.try_get("id")?,
            customer_id: row.try_get("customer_id")?,
            creditor: row.try_get("creditor")?,
            account_number: row.try_get("account_number")?,
            account_type: row.try_get("account_type")?,
            original_balance: decimal_col(&row, "original_balance")?,
            current_balance: decimal_col(&row, "current_balance")?,
            settlement_amount: opt_decimal_col(&row, "settlement_amount")?,
            status: row.try_get("status")?,
            source: row.try_get("source")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_payment(row: SqliteRow) -> Result<Payment, CrmError> {
        Ok(Payment {
            id: row.try_get("id")?,
            customer_id: row.try_get("customer_id")?,
            installment: row.try_get("installment")?,
            due_date: row.try_get("due_date")?,
            amount: decimal_col(&row, "amount")?,
            fee: decimal_col(&row, "fee")?,
            status: row.try_get("status")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const DEBT_SELECT: &str = r#"SELECT id, customer_id, creditor, account_number, account_type,
    original_balance, current_balance, settlement_amount, status, source, created_at, updated_at
    FROM debts"#;

const PAYMENT_SELECT: &str = r#"SELECT id, customer_id, installment, due_date, amount, fee, status, updated_at
    FROM payments"#;
