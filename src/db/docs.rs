use crate::db::models::{Contract, ContractStatus, DocStatus, Document};
use crate::db::sqlite::CrmStorage;
use crate::error::CrmError;
use chrono::Utc;

const DOC_SELECT: &str = r#"SELECT id, customer_id, file_name, content_type, storage_key, size_bytes,
    doc_type, status, reviewer_id, notes, created_at, updated_at FROM documents"#;

const CONTRACT_SELECT: &str =
    "SELECT id, customer_id, envelope_id, status, sent_at, completed_at FROM contracts";

impl CrmStorage {
    pub async fn insert_document(
        &self,
        customer_id: Option<i64>,
        file_name: &str,
        content_type: &str,
        storage_key: &str,
        size_bytes: i64,
    ) -> Result<Document, CrmError> {
        let now = Utc::now();
        let id = sqlx::query(
            r#"INSERT INTO documents (
                customer_id, file_name, content_type, storage_key, size_bytes, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(customer_id)
        .bind(file_name)
        .bind(content_type)
        .bind(storage_key)
        .bind(size_bytes)
        .bind(DocStatus::Received)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?
        .last_insert_rowid();
        self.get_document(id).await
    }

    pub async fn get_document(&self, id: i64) -> Result<Document, CrmError> {
        sqlx::query_as::<_, Document>(&format!("{DOC_SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| CrmError::NotFound(format!("document {id}")))
    }

    pub async fn list_documents(
        &self,
        status: Option<DocStatus>,
        reviewer_id: Option<i64>,
        customer_id: Option<i64>,
    ) -> Result<Vec<Document>, CrmError> {
        Ok(sqlx::query_as::<_, Document>(&format!(
            r#"{DOC_SELECT}
               WHERE (? IS NULL OR status = ?)
                 AND (? IS NULL OR reviewer_id = ?)
                 AND (? IS NULL OR customer_id = ?)
               ORDER BY id"#
        ))
        .bind(status)
        .bind(status)
        .bind(reviewer_id)
        .bind(reviewer_id)
        .bind(customer_id)
        .bind(customer_id)
        .fetch_all(self.pool())
        .await?)
    }

    pub async fn triage_document(
        &self,
        id: i64,
        customer_id: i64,
        doc_type: &str,
        reviewer_id: Option<i64>,
    ) -> Result<Document, CrmError> {
        sqlx::query(
            r#"UPDATE documents SET customer_id = ?, doc_type = ?, reviewer_id = COALESCE(?, reviewer_id),
               status = ?, updated_at = ? WHERE id = ?"#,
        )
        .bind(customer_id)
        .bind(doc_type)
        .bind(reviewer_id)
        .bind(DocStatus::Triaged)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;
        self.get_document(id).await
    }

    pub async fn set_document_status(
        &self,
        id: i64,
        status: DocStatus,
        notes: Option<&str>,
    ) -> Result<Document, CrmError> {
        sqlx::query(
            "UPDATE documents SET status = ?, notes = COALESCE(?, notes), updated_at = ? WHERE id = ?",
        )
        .bind(status)
        .bind(notes)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;
        self.get_document(id).await
    }

    pub async fn insert_contract(
        &self,
        customer_id: i64,
        envelope_id: &str,
    ) -> Result<Contract, CrmError> {
        let id = sqlx::query(
            "INSERT INTO contracts (customer_id, envelope_id, status, sent_at) VALUES (?, ?, ?, ?)",
        )
        .bind(customer_id)
        .bind(envelope_id)
        .bind(ContractStatus::Sent)
        .bind(Utc::now())
        .execute(self.pool())
        .await?
        .last_insert_rowid();
        Ok(
            sqlx::query_as::<_, Contract>(&format!("{CONTRACT_SELECT} WHERE id = ?"))
                .bind(id)
                .fetch_one(self.pool())
                .await?,
        )
    }

    pub async fn contract_by_envelope(
        &self,
        envelope_id: &str,
    ) -> Result<Option<Contract>, CrmError> {
        Ok(
            sqlx::query_as::<_, Contract>(&format!("{CONTRACT_SELECT} WHERE envelope_id = ?"))
                .bind(envelope_id)
                .fetch_optional(self.pool())
                .await?,
        )
    }

    pub async fn contracts_for(&self, customer_id: i64) -> Result<Vec<Contract>, CrmError> {
        Ok(sqlx::query_as::<_, Contract>(&format!(
            "{CONTRACT_SELECT} WHERE customer_id = ? ORDER BY id"
        ))
        .bind(customer_id)
        .fetch_all(self.pool())
        .await?)
    }

    pub async fn set_contract_status(
        &self,
        id: i64,
        status: ContractStatus,
    ) -> Result<(), CrmError> {
        let completed_at = (status == ContractStatus::Completed).then(Utc::now);
        sqlx::query(
            "UPDATE contracts SET status = ?, completed_at = COALESCE(?, completed_at) WHERE id = ?",
        )
        .bind(status)
        .bind(completed_at)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
