//! Document intake: upload, triage, review.

use crate::db::CrmStorage;
use crate::db::models::{DocStatus, Document};
use crate::error::CrmError;
use crate::service::document_store::DocumentStore;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::{info, warn};

/// Decoded size cap; the base64 body must still fit the 25 MiB route limit.
pub const MAX_DOCUMENT_BYTES: usize = 18 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub file_name: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Base64 file body.
    pub content: String,
    #[serde(default)]
    pub customer_id: Option<i64>,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

#[derive(Debug, Deserialize)]
pub struct TriageRequest {
    pub doc_type: String,
    pub customer_id: Option<i64>,
    #[serde(default)]
    pub reviewer_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: DocStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Allowed moves of the review workflow. Triage has its own operation.
pub fn can_transition(from: DocStatus, to: DocStatus) -> bool {
    use DocStatus::*;
    matches!(
        (from, to),
        (Received, Triaged)
            | (Triaged, InReview)
            | (InReview, Completed)
            | (Received | Triaged | InReview, Rejected)
    )
}

fn ensure_transition(from: DocStatus, to: DocStatus) -> Result<(), CrmError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(CrmError::InvalidTransition {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        })
    }
}

pub async fn upload(
    storage: &CrmStorage,
    store: &DocumentStore,
    req: UploadRequest,
) -> Result<Document, CrmError> {
    let file_name = req.file_name.trim();
    if file_name.is_empty() {
        return Err(CrmError::BadRequest("file_name is required".to_string()));
    }
    let bytes = STANDARD.decode(req.content.trim())?;
    if bytes.is_empty() || bytes.len() > MAX_DOCUMENT_BYTES {
        return Err(CrmError::BadRequest(format!(
            "document must be 1..={MAX_DOCUMENT_BYTES} bytes"
        )));
    }
    if let Some(customer_id) = req.customer_id {
        storage.get_customer(customer_id).await?;
    }

    let key = DocumentStore::new_key(file_name);
    let size = bytes.len() as i64;
    store.put(&key, bytes, &req.content_type).await?;
    let doc = match storage
        .insert_document(req.customer_id, file_name, &req.content_type, &key, size)
        .await
    {
        Ok(doc) => doc,
        Err(e) => {
            if let Err(cleanup) = store.delete(&key).await {
                warn!(key, error = %cleanup, "orphaned document blob left behind");
            }
            return Err(e);
        }
    };
    info!(document_id = doc.id, size, "document received");
    Ok(doc)
}

/// Classify a received document and attach it to a customer.
pub async fn triage(
    storage: &CrmStorage,
    doc: &Document,
    req: &TriageRequest,
) -> Result<Document, CrmError> {
    ensure_transition(doc.status, DocStatus::Triaged)?;
    let doc_type = req.doc_type.trim();
    if doc_type.is_empty() {
        return Err(CrmError::BadRequest("doc_type is required".to_string()));
    }
    let customer_id = req
        .customer_id
        .or(doc.customer_id)
        .ok_or_else(|| CrmError::BadRequest("triage requires a customer".to_string()))?;
    storage.get_customer(customer_id).await?;
    if let Some(reviewer) = req.reviewer_id {
        storage.get_user(reviewer).await?;
    }
    storage
        .triage_document(doc.id, customer_id, doc_type, req.reviewer_id)
        .await
}

pub async fn set_status(
    storage: &CrmStorage,
    doc: &Document,
    req: &StatusRequest,
) -> Result<Document, CrmError> {
    if req.status == DocStatus::Triaged {
        return Err(CrmError::BadRequest(
            "use the triage operation to classify a document".to_string(),
        ));
    }
    ensure_transition(doc.status, req.status)?;
    if req.status == DocStatus::Rejected && req.notes.as_deref().is_none_or(|n| n.trim().is_empty()) {
        return Err(CrmError::BadRequest(
            "rejecting a document requires notes".to_string(),
        ));
    }
    storage
        .set_document_status(doc.id, req.status, req.notes.as_deref())
        .await
}
