use crate::db::CrmStorage;
use crate::db::models::NewCustomer;
use crate::error::CrmError;
use crate::service::distro_actor::DistroHandle;
use crate::service::funnel;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::io::Read;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct LeadRow {
    first_name: String,
    last_name: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    email: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    phone: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    state: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    estimated_debt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    /// 1-based data row, header excluded.
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub created: Vec<i64>,
    pub errors: Vec<RowError>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

/// Accepts `12500`, `12,500.00` and `$12,500`.
fn parse_amount(raw: &str) -> Result<Decimal, String> {
    let cleaned: String = raw.chars().filter(|c| !matches!(c, '$' | ',' | ' ')).collect();
    Decimal::from_str(&cleaned).map_err(|_| format!("invalid estimated_debt `{raw}`"))
}

impl LeadRow {
    fn into_new_customer(self) -> Result<NewCustomer, String> {
        let estimated_debt = self.estimated_debt.as_deref().map(parse_amount).transpose()?;
        let mut new = NewCustomer {
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone: self.phone,
            state: self.state,
            estimated_debt,
            source: Some("csv_import".to_string()),
            ..Default::default()
        };
        funnel::sanitize_new_customer(&mut new).map_err(|e| match e {
            CrmError::BadRequest(msg) => msg,
            other => other.to_string(),
        })?;
        Ok(new)
    }
}

/// Parse a lead CSV. Header problems fail the whole file; bad rows are
/// collected and the rest of the file still parses.
pub fn parse_leads<R: Read>(reader: R) -> Result<(Vec<(usize, NewCustomer)>, Vec<RowError>), CrmError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    for required in ["first_name", "last_name"] {
        if !headers.iter().any(|h| h == required) {
            return Err(CrmError::BadRequest(format!(
                "CSV header is missing column `{required}`"
            )));
        }
    }

    let mut leads = Vec::new();
    let mut errors = Vec::new();
    for (idx, record) in csv_reader.deserialize::<LeadRow>().enumerate() {
        let row = idx + 1;
        let parsed = record
            .map_err(|e| e.to_string())
            .and_then(LeadRow::into_new_customer);
        match parsed {
            Ok(new) => leads.push((row, new)),
            Err(message) => errors.push(RowError { row, message }),
        }
    }
    Ok((leads, errors))
}

/// Create every valid lead, optionally handing each to the distributor.
pub async fn import_leads(
    storage: &CrmStorage,
    distro: Option<&DistroHandle>,
    csv_text: &str,
) -> Result<ImportReport, CrmError> {
    let (leads, errors) = parse_leads(csv_text.as_bytes())?;
    let mut report = ImportReport {
        created: Vec::with_capacity(leads.len()),
        errors,
    };

    for (row, new) in leads {
        match funnel::create_lead(storage, new).await {
            Ok(customer) => {
                if let Some(distro) = distro {
                    match distro.next_agent(None).await {
                        Ok(agent) => {
                            storage.assign_customer(customer.id, agent).await?;
                        }
                        Err(e) => warn!(customer_id = customer.id, error = %e, "imported lead left unassigned"),
                    }
                }
                report.created.push(customer.id);
            }
            Err(e) => report.errors.push(RowError {
                row,
                message: e.to_string(),
            }),
        }
    }
    report.errors.sort_by_key(|e| e.row);

    info!(
        created = report.created.len(),
        failed = report.errors.len(),
        "lead import finished"
    );
    Ok(report)
}
