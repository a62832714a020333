use crate::db::models::{DocStatus, Document};
use crate::error::CrmError;
use crate::middleware::AuthUser;
use crate::router::CrmState;
use crate::service::docproc::{self, StatusRequest, TriageRequest, UploadRequest};
use crate::service::rac::Permission;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Default, Deserialize)]
pub struct DocumentQuery {
    pub status: Option<DocStatus>,
    pub reviewer_id: Option<i64>,
    pub customer_id: Option<i64>,
}

/// GET /api/v1/docproc
pub async fn list(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Query(query): Query<DocumentQuery>,
) -> Result<Json<Vec<Document>>, CrmError> {
    principal.require(Permission::DocprocManage)?;
    Ok(Json(
        state
            .storage
            .list_documents(query.status, query.reviewer_id, query.customer_id)
            .await?,
    ))
}

/// POST /api/v1/docproc
pub async fn upload(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Json(req): Json<UploadRequest>,
) -> Result<(StatusCode, Json<Document>), CrmError> {
    principal.require(Permission::DocprocManage)?;
    let doc = docproc::upload(&state.storage, &state.documents, req).await?;
    state
        .jobs
        .audit(
            &principal,
            "document",
            doc.id,
            "upload",
            json!({"file_name": doc.file_name, "size_bytes": doc.size_bytes}),
        )
        .await;
    Ok((StatusCode::CREATED, Json(doc)))
}

/// GET /api/v1/docproc/{id}/file
pub async fn download(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
) -> Result<Response, CrmError> {
    principal.require(Permission::DocprocManage)?;
    let doc = state.storage.get_document(id).await?;
    let bytes = state.documents.get(&doc.storage_key).await?;
    let content_type = HeaderValue::from_str(&doc.content_type)
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));
    let file_name: String = doc
        .file_name
        .chars()
        .filter(|c| (c.is_ascii_graphic() && *c != '"') || *c == ' ')
        .collect();
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .unwrap_or(HeaderValue::from_static("attachment"));
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// PUT /api/v1/docproc/{id}/triage
pub async fn triage(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<TriageRequest>,
) -> Result<Json<Document>, CrmError> {
    principal.require(Permission::DocprocManage)?;
    let current = state.storage.get_document(id).await?;
    let doc = docproc::triage(&state.storage, &current, &req).await?;
    state
        .jobs
        .audit(
            &principal,
            "document",
            id,
            "triage",
            json!({"doc_type": doc.doc_type, "customer_id": doc.customer_id, "reviewer_id": doc.reviewer_id}),
        )
        .await;
    Ok(Json(doc))
}

/// PUT /api/v1/docproc/{id}/status
pub async fn set_status(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Document>, CrmError> {
    principal.require(Permission::DocprocManage)?;
    let current = state.storage.get_document(id).await?;
    let doc = docproc::set_status(&state.storage, &current, &req).await?;
    state
        .jobs
        .audit(
            &principal,
            "document",
            id,
            "status",
            json!({"from": current.status, "to": doc.status}),
        )
        .await;
    Ok(Json(doc))
}
