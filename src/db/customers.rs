use crate::db::models::{
    Customer, CustomerFilter, CustomerPatch, Disposition, NewCustomer, Page, PageParams,
};
use crate::db::sqlite::{CrmStorage, opt_decimal_col};
use crate::error::CrmError;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

const CUSTOMER_SELECT: &str = r#"SELECT c.id, c.stage, c.disposition_id, d.name AS disposition,
    c.first_name, c.last_name, c.email, c.phone, c.address, c.city, c.state, c.zip,
    c.estimated_debt, c.assigned_to, c.source, c.created_at, c.updated_at
    FROM customers c JOIN dispositions d ON d.id = c.disposition_id"#;

impl CrmStorage {
    pub async fn create_customer(
        &self,
        new: &NewCustomer,
        disposition: &Disposition,
    ) -> Result<Customer, CrmError> {
        let now = Utc::now();
        let id = sqlx::query(
            r#"INSERT INTO customers (
                stage, disposition_id, first_name, last_name, email, phone,
                address, city, state, zip, estimated_debt, source, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(disposition.stage)
        .bind(disposition.id)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(&new.address)
        .bind(&new.city)
        .bind(&new.state)
        .bind(&new.zip)
        .bind(new.estimated_debt.map(|d| d.to_string()))
        .bind(&new.source)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?
        .last_insert_rowid();
        self.get_customer(id).await
    }

    pub async fn get_customer(&self, id: i64) -> Result<Customer, CrmError> {
        let row = sqlx::query(&format!("{CUSTOMER_SELECT} WHERE c.id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| CrmError::NotFound(format!("customer {id}")))?;
        Self::row_to_customer(row)
    }

    /// Most recently created customer whose phone matches exactly.
    pub async fn customer_by_phone(&self, phone: &str) -> Result<Option<Customer>, CrmError> {
        let row = sqlx::query(&format!(
            "{CUSTOMER_SELECT} WHERE c.phone = ? ORDER BY c.id DESC LIMIT 1"
        ))
        .bind(phone)
        .fetch_optional(self.pool())
        .await?;
        row.map(Self::row_to_customer).transpose()
    }

    pub async fn list_customers(
        &self,
        filter: &CustomerFilter,
        scope: Option<i64>,
        page: PageParams,
    ) -> Result<Page<Customer>, CrmError> {
        let mut count_qb = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM customers c JOIN dispositions d ON d.id = c.disposition_id",
        );
        push_customer_filters(&mut count_qb, filter, scope);
        let total: i64 = count_qb.build_query_scalar().fetch_one(self.pool()).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(CUSTOMER_SELECT);
        push_customer_filters(&mut qb, filter, scope);
        qb.push(" ORDER BY c.id DESC LIMIT ")
            .push_bind(page.per_page())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = qb.build().fetch_all(self.pool()).await?;
        let items = rows
            .into_iter()
            .map(Self::row_to_customer)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            total,
            page: page.page(),
            per_page: page.per_page(),
        })
    }

    pub async fn update_customer(
        &self,
        id: i64,
        patch: &CustomerPatch,
    ) -> Result<Customer, CrmError> {
        let result = sqlx::query(
            r#"UPDATE customers SET
                first_name = COALESCE(?, first_name),
                last_name = COALESCE(?, last_name),
                email = COALESCE(?, email),
                phone = COALESCE(?, phone),
                address = COALESCE(?, address),
                city = COALESCE(?, city),
                state = COALESCE(?, state),
                zip = COALESCE(?, zip),
                estimated_debt = COALESCE(?, estimated_debt),
                updated_at = ?
              WHERE id = ?"#,
        )
        .bind(&patch.first_name)
        .bind(&patch.last_name)
        .bind(&patch.email)
        .bind(&patch.phone)
        .bind(&patch.address)
        .bind(&patch.city)
        .bind(&patch.state)
        .bind(&patch.zip)
        .bind(patch.estimated_debt.map(|d| d.to_string()))
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(CrmError::NotFound(format!("customer {id}")));
        }
        self.get_customer(id).await
    }

    /// Store a disposition and the stage it belongs to.
    pub async fn set_disposition(
        &self,
        id: i64,
        disposition: &Disposition,
    ) -> Result<Customer, CrmError> {
        sqlx::query(
            "UPDATE customers SET disposition_id = ?, stage = ?, updated_at = ? WHERE id = ?",
        )
        .bind(disposition.id)
        .bind(disposition.stage)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;
        self.get_customer(id).await
    }

    pub async fn assign_customer(&self, id: i64, user_id: i64) -> Result<Customer, CrmError> {
        sqlx::query("UPDATE customers SET assigned_to = ?, updated_at = ? WHERE id = ?")
            .bind(user_id)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        self.get_customer(id).await
    }

    pub async fn delete_customer(&self, id: i64) -> Result<(), CrmError> {
        let result = sqlx::query("DELETE FROM customers WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(CrmError::NotFound(format!("customer {id}")));
        }
        Ok(())
    }

    fn row_to_customer(row: SqliteRow) -> Result<Customer, CrmError> {
        Ok(Customer {
            id: row.try_get("id")?,
            stage: row.try_get("stage")?,
            disposition_id: row.try_get("disposition_id")?,
            disposition: row.try_get("disposition")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            address: row.try_get("address")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            zip: row.try_get("zip")?,
            estimated_debt: opt_decimal_col(&row, "estimated_debt")?,
            assigned_to: row.try_get("assigned_to")?,
            source: row.try_get("source")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn push_customer_filters(
    qb: &mut QueryBuilder<'_, Sqlite>,
    filter: &CustomerFilter,
    scope: Option<i64>,
) {
    qb.push(" WHERE 1 = 1");
    if let Some(stage) = filter.stage {
        qb.push(" AND c.stage = ").push_bind(stage);
    }
    if let Some(disposition_id) = filter.disposition_id {
        qb.push(" AND c.disposition_id = ").push_bind(disposition_id);
    }
    if let Some(assigned_to) = filter.assigned_to {
        qb.push(" AND c.assigned_to = ").push_bind(assigned_to);
    }
    if let Some(owner) = scope {
        qb.push(" AND c.assigned_to = ").push_bind(owner);
    }
    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{q}%");
        qb.push(" AND (c.first_name || ' ' || c.last_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.email LIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.phone LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}
