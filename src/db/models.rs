use crate::service::rac::Permission;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use sqlx::FromRow;

/// Funnel stage. Ordering follows the funnel: a customer only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Stage {
    Lead,
    Candidate,
    Client,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Lead => "lead",
            Stage::Candidate => "candidate",
            Stage::Client => "client",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub permissions: Vec<Permission>,
    pub own_customers_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role_id: i64,
    pub role_name: String,
    #[serde(skip_serializing)]
    pub api_token: String,
    pub commission_rate: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Disposition {
    pub id: i64,
    pub name: String,
    pub stage: Stage,
}

#[derive(Debug, Clone, Serialize)]
pub struct Customer {
    pub id: i64,
    pub stage: Stage,
    pub disposition_id: i64,
    pub disposition: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub estimated_debt: Option<Decimal>,
    pub assigned_to: Option<i64>,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Contact fields for a new lead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCustomer {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub estimated_debt: Option<Decimal>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Partial update of contact fields; `None` leaves a column untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub estimated_debt: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerFilter {
    pub stage: Option<Stage>,
    pub disposition_id: Option<i64>,
    pub assigned_to: Option<i64>,
    pub q: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CreditReportStatus {
    Pending,
    SecurityQuestions,
    Verified,
    ReportPulled,
    Failed,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CreditReportAccount {
    pub id: i64,
    pub customer_id: i64,
    #[serde(skip_serializing)]
    pub tracking_token: Option<String>,
    #[serde(skip_serializing)]
    pub customer_token: Option<String>,
    pub status: CreditReportStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DebtStatus {
    Enrolled,
    NotEnrolled,
    Settled,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DebtSource {
    Manual,
    CreditReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct Debt {
    pub id: i64,
    pub customer_id: i64,
    pub creditor: String,
    #[serde(serialize_with = "serialize_masked")]
    pub account_number: String,
    pub account_type: Option<String>,
    pub original_balance: Decimal,
    pub current_balance: Decimal,
    pub settlement_amount: Option<Decimal>,
    pub status: DebtStatus,
    pub source: DebtSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Debt {
    pub fn last4(&self) -> &str {
        last4(&self.account_number)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDebt {
    pub creditor: String,
    pub account_number: String,
    #[serde(default)]
    pub account_type: Option<String>,
    pub original_balance: Decimal,
    #[serde(default)]
    pub current_balance: Option<Decimal>,
    #[serde(default = "default_debt_status")]
    pub status: DebtStatus,
}

fn default_debt_status() -> DebtStatus {
    DebtStatus::Enrolled
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebtPatch {
    pub creditor: Option<String>,
    pub account_type: Option<String>,
    pub current_balance: Option<Decimal>,
    pub settlement_amount: Option<Decimal>,
    pub status: Option<DebtStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum BankValidation {
    Pending,
    Valid,
    Invalid,
    Unknown,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BankAccount {
    pub id: i64,
    pub customer_id: i64,
    pub routing_number: String,
    #[serde(serialize_with = "serialize_masked")]
    pub account_number: String,
    pub account_type: String,
    pub holder_name: String,
    pub validation: BankValidation,
    pub validation_message: Option<String>,
    pub validated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPlan {
    pub customer_id: i64,
    pub enrolled_debt: Decimal,
    pub fee_pct: Decimal,
    pub savings_pct: Decimal,
    pub term_months: i64,
    pub service_fee: Decimal,
    pub first_payment: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentStatus {
    Scheduled,
    Cleared,
    Nsf,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub id: i64,
    pub customer_id: i64,
    pub installment: i64,
    pub due_date: NaiveDate,
    pub amount: Decimal,
    pub fee: Decimal,
    pub status: PaymentStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Voice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Communication {
    pub id: i64,
    pub customer_id: Option<i64>,
    pub user_id: Option<i64>,
    pub channel: Channel,
    pub direction: Direction,
    pub from_number: String,
    pub to_number: String,
    pub body: Option<String>,
    pub provider_id: Option<String>,
    pub status: String,
    pub duration_secs: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCommunication {
    pub customer_id: Option<i64>,
    pub user_id: Option<i64>,
    pub channel: Channel,
    pub direction: Direction,
    pub from_number: String,
    pub to_number: String,
    pub body: Option<String>,
    pub provider_id: Option<String>,
    pub status: String,
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    NoShow,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Appointment {
    pub id: i64,
    pub customer_id: i64,
    pub agent_id: i64,
    pub starts_at: DateTime<Utc>,
    pub summary: Option<String>,
    pub status: AppointmentStatus,
    pub reminded: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DocStatus {
    Received,
    Triaged,
    InReview,
    Completed,
    Rejected,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocStatus::Received => "received",
            DocStatus::Triaged => "triaged",
            DocStatus::InReview => "in_review",
            DocStatus::Completed => "completed",
            DocStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Document {
    pub id: i64,
    pub customer_id: Option<i64>,
    pub file_name: String,
    pub content_type: String,
    #[serde(skip_serializing)]
    pub storage_key: String,
    pub size_bytes: i64,
    pub doc_type: Option<String>,
    pub status: DocStatus,
    pub reviewer_id: Option<i64>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ContractStatus {
    Sent,
    Delivered,
    Completed,
    Declined,
    Voided,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Contract {
    pub id: i64,
    pub customer_id: i64,
    pub envelope_id: String,
    pub status: ContractStatus,
    pub sent_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Done,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub customer_id: Option<i64>,
    pub assignee_id: i64,
    pub title: String,
    pub due_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct SalesAgent {
    pub user_id: i64,
    pub priority: i64,
    pub weight: i64,
    pub active: bool,
    pub assigned_count: i64,
    pub last_assigned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor_id: Option<i64>,
    pub entity: String,
    pub entity_id: i64,
    pub action: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct JobRecord {
    pub id: i64,
    pub kind: String,
    #[serde(skip_serializing)]
    pub payload: String,
    pub status: JobStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageParams {
    pub const DEFAULT_PER_PAGE: i64 = 25;
    pub const MAX_PER_PAGE: i64 = 100;

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page
            .unwrap_or(Self::DEFAULT_PER_PAGE)
            .clamp(1, Self::MAX_PER_PAGE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.per_page()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

pub fn last4(account_number: &str) -> &str {
    let len = account_number.len();
    if len <= 4 {
        account_number
    } else {
        account_number.get(len - 4..).unwrap_or(account_number)
    }
}

pub fn mask(account_number: &str) -> String {
    format!("****{}", last4(account_number))
}

fn serialize_masked<S: Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&mask(value))
}
