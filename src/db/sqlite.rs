use crate::db::models::{Disposition, Role, Stage, User};
use crate::db::schema::SQLITE_INIT;
use crate::error::CrmError;
use crate::service::rac::Permission;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;

pub type SqlitePool = Pool<Sqlite>;

/// Typed access to every CRM table. Per-entity queries live in the sibling
/// modules as further `impl CrmStorage` blocks.
#[derive(Clone)]
pub struct CrmStorage {
    pool: SqlitePool,
}

impl CrmStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open (creating if missing) the database and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self, CrmError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let mut pool_opts = SqlitePoolOptions::new();
        if database_url.contains(":memory:") {
            // every connection would otherwise get its own empty database
            pool_opts = pool_opts
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_opts.connect_with(connect_opts).await?;
        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize the schema by executing the bundled DDL.
    pub async fn init_schema(&self) -> Result<(), CrmError> {
        // sqlx::query runs one statement at a time
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>, CrmError> {
        let rows = sqlx::query("SELECT id, name, permissions, own_customers_only FROM roles ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_role).collect()
    }

    pub async fn role_by_name(&self, name: &str) -> Result<Role, CrmError> {
        let row = sqlx::query(
            "SELECT id, name, permissions, own_customers_only FROM roles WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CrmError::BadRequest(format!("unknown role `{name}`")))?;
        Self::row_to_role(row)
    }

    pub async fn role_by_id(&self, id: i64) -> Result<Role, CrmError> {
        let row = sqlx::query(
            "SELECT id, name, permissions, own_customers_only FROM roles WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_role(row)
    }

    /// Insert a user with a freshly generated API secret.
    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        phone: Option<&str>,
        role_name: &str,
        commission_rate: Decimal,
    ) -> Result<User, CrmError> {
        let role = self.role_by_name(role_name).await?;
        let secret = uuid::Uuid::new_v4().simple().to_string();
        let id = sqlx::query(
            r#"INSERT INTO users (name, email, phone, role_id, api_token, commission_rate, active, created_at)
               VALUES (?, ?, ?, ?, ?, ?, 1, ?)"#,
        )
        .bind(name)
        .bind(email.to_lowercase())
        .bind(phone)
        .bind(role.id)
        .bind(&secret)
        .bind(commission_rate.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.get_user(id).await
    }

    pub async fn get_user(&self, id: i64) -> Result<User, CrmError> {
        let row = sqlx::query(&format!("{USER_SELECT} WHERE u.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CrmError::NotFound(format!("user {id}")))?;
        Self::row_to_user(row)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, CrmError> {
        let rows = sqlx::query(&format!("{USER_SELECT} ORDER BY u.id"))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_user).collect()
    }

    pub async fn list_dispositions(&self) -> Result<Vec<Disposition>, CrmError> {
        Ok(
            sqlx::query_as::<_, Disposition>("SELECT id, name, stage FROM dispositions ORDER BY id")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    pub async fn disposition_by_name(&self, name: &str) -> Result<Disposition, CrmError> {
        sqlx::query_as::<_, Disposition>("SELECT id, name, stage FROM dispositions WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CrmError::BadRequest(format!("unknown disposition `{name}`")))
    }

    pub async fn disposition_by_id(&self, id: i64) -> Result<Disposition, CrmError> {
        sqlx::query_as::<_, Disposition>("SELECT id, name, stage FROM dispositions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CrmError::BadRequest(format!("unknown disposition id {id}")))
    }

    pub async fn first_disposition_of(&self, stage: Stage) -> Result<Disposition, CrmError> {
        sqlx::query_as::<_, Disposition>(
            "SELECT id, name, stage FROM dispositions WHERE stage = ? ORDER BY id LIMIT 1",
        )
        .bind(stage)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CrmError::Config(format!("no disposition seeded for {}", stage.as_str())))
    }

    fn row_to_role(row: SqliteRow) -> Result<Role, CrmError> {
        let permissions_json: String = row.try_get("permissions")?;
        let permissions: Vec<Permission> = serde_json::from_str(&permissions_json)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(Role {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            permissions,
            own_customers_only: row.try_get("own_customers_only")?,
        })
    }

    fn row_to_user(row: SqliteRow) -> Result<User, CrmError> {
        Ok(User {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            role_id: row.try_get("role_id")?,
            role_name: row.try_get("role_name")?,
            api_token: row.try_get("api_token")?,
            commission_rate: decimal_col(&row, "commission_rate")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

const USER_SELECT: &str = r#"SELECT u.id, u.name, u.email, u.phone, u.role_id, r.name AS role_name,
    u.api_token, u.commission_rate, u.active, u.created_at
    FROM users u JOIN roles r ON r.id = u.role_id"#;

pub(crate) fn decimal_col(row: &SqliteRow, col: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(col)?;
    Decimal::from_str(&raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

pub(crate) fn opt_decimal_col(row: &SqliteRow, col: &str) -> Result<Option<Decimal>, sqlx::Error> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|s| Decimal::from_str(&s).map_err(|e| sqlx::Error::Decode(Box::new(e))))
        .transpose()
}
