//! SQL DDL and seed rows for the CRM store.
//! SQLite-first; every statement is idempotent so it runs on each boot.

/// Statements are separated by `;` and executed one at a time, so seed
/// literals must never contain a semicolon.
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS roles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    permissions TEXT NOT NULL, -- JSON array of permission names
    own_customers_only INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    phone TEXT NULL,
    role_id INTEGER NOT NULL REFERENCES roles(id),
    api_token TEXT NOT NULL UNIQUE,
    commission_rate TEXT NOT NULL DEFAULT '0', -- decimal
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dispositions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    stage TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS customers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    stage TEXT NOT NULL,
    disposition_id INTEGER NOT NULL REFERENCES dispositions(id),
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    email TEXT NULL,
    phone TEXT NULL,
    address TEXT NULL,
    city TEXT NULL,
    state TEXT NULL,
    zip TEXT NULL,
    estimated_debt TEXT NULL, -- decimal
    assigned_to INTEGER NULL REFERENCES users(id),
    source TEXT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_customers_phone ON customers(phone);
CREATE INDEX IF NOT EXISTS idx_customers_assigned_to ON customers(assigned_to);

CREATE TABLE IF NOT EXISTS credit_report_accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NOT NULL UNIQUE REFERENCES customers(id) ON DELETE CASCADE,
    tracking_token TEXT NULL,
    customer_token TEXT NULL,
    status TEXT NOT NULL,
    last_error TEXT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS debts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
    creditor TEXT NOT NULL,
    account_number TEXT NOT NULL,
    account_type TEXT NULL,
    original_balance TEXT NOT NULL,
    current_balance TEXT NOT NULL,
    settlement_amount TEXT NULL,
    status TEXT NOT NULL,
    source TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_debts_customer ON debts(customer_id);

CREATE TABLE IF NOT EXISTS bank_accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NOT NULL UNIQUE REFERENCES customers(id) ON DELETE CASCADE,
    routing_number TEXT NOT NULL,
    account_number TEXT NOT NULL,
    account_type TEXT NOT NULL,
    holder_name TEXT NOT NULL,
    validation TEXT NOT NULL,
    validation_message TEXT NULL,
    validated_at TEXT NULL
);

CREATE TABLE IF NOT EXISTS payment_plans (
    customer_id INTEGER PRIMARY KEY REFERENCES customers(id) ON DELETE CASCADE,
    enrolled_debt TEXT NOT NULL,
    fee_pct TEXT NOT NULL,
    savings_pct TEXT NOT NULL,
    term_months INTEGER NOT NULL,
    service_fee TEXT NOT NULL,
    first_payment TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS payments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
    installment INTEGER NOT NULL,
    due_date TEXT NOT NULL,
    amount TEXT NOT NULL,
    fee TEXT NOT NULL,
    status TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (customer_id, installment)
);

CREATE TABLE IF NOT EXISTS communications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NULL REFERENCES customers(id) ON DELETE SET NULL,
    user_id INTEGER NULL REFERENCES users(id),
    channel TEXT NOT NULL,
    direction TEXT NOT NULL,
    from_number TEXT NOT NULL,
    to_number TEXT NOT NULL,
    body TEXT NULL,
    provider_id TEXT NULL,
    status TEXT NOT NULL,
    duration_secs INTEGER NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_communications_customer ON communications(customer_id);
CREATE INDEX IF NOT EXISTS idx_communications_provider ON communications(provider_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_communications_inbound_sms
    ON communications(provider_id)
    WHERE channel = 'sms' AND direction = 'inbound' AND provider_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS appointments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
    agent_id INTEGER NOT NULL REFERENCES users(id),
    starts_at TEXT NOT NULL,
    summary TEXT NULL,
    status TEXT NOT NULL,
    reminded INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_appointments_agent ON appointments(agent_id, starts_at);

CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NULL REFERENCES customers(id) ON DELETE SET NULL,
    file_name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    storage_key TEXT NOT NULL UNIQUE,
    size_bytes INTEGER NOT NULL,
    doc_type TEXT NULL,
    status TEXT NOT NULL,
    reviewer_id INTEGER NULL REFERENCES users(id),
    notes TEXT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS contracts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
    envelope_id TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    sent_at TEXT NOT NULL,
    completed_at TEXT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NULL REFERENCES customers(id) ON DELETE CASCADE,
    assignee_id INTEGER NOT NULL REFERENCES users(id),
    title TEXT NOT NULL,
    due_at TEXT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT NULL
);

CREATE TABLE IF NOT EXISTS sales_agents (
    user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    priority INTEGER NOT NULL DEFAULT 100,
    weight INTEGER NOT NULL DEFAULT 1,
    active INTEGER NOT NULL DEFAULT 1,
    assigned_count INTEGER NOT NULL DEFAULT 0,
    last_assigned_at TEXT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    actor_id INTEGER NULL,
    entity TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    detail TEXT NOT NULL, -- JSON
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log(entity, entity_id);

CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL, -- JSON
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

INSERT OR IGNORE INTO roles (name, permissions, own_customers_only) VALUES
    ('admin', '["customers_read","customers_write","leads_import","leads_distribute","debts_write","credit_reports","bank_validate","payments_write","comms_send","appointments_write","docproc_manage","contracts_send","tasks_write","users_manage","commissions_read"]', 0),
    ('sales_manager', '["customers_read","customers_write","leads_import","leads_distribute","debts_write","credit_reports","bank_validate","payments_write","comms_send","appointments_write","contracts_send","tasks_write","commissions_read"]', 0),
    ('sales_agent', '["customers_read","customers_write","debts_write","credit_reports","bank_validate","comms_send","appointments_write","contracts_send","tasks_write"]', 1),
    ('processor', '["customers_read","debts_write","payments_write","docproc_manage","tasks_write"]', 0),
    ('viewer', '["customers_read"]', 0);

INSERT OR IGNORE INTO dispositions (name, stage) VALUES
    ('New Lead', 'lead'),
    ('Contacted', 'lead'),
    ('No Answer', 'lead'),
    ('Not Interested', 'lead'),
    ('Qualified', 'lead'),
    ('Credit Report Pulled', 'candidate'),
    ('Contract Sent', 'candidate'),
    ('Contract Signed', 'candidate'),
    ('Candidate Lost', 'candidate'),
    ('Active Client', 'client'),
    ('NSF', 'client'),
    ('Graduated', 'client'),
    ('Cancelled', 'client')
"#;
