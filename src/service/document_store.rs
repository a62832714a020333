//! Blob storage for uploaded documents: the local filesystem by default,
//! S3 when built with the `s3` feature and a bucket is configured.

use crate::config::StorageConfig;
use crate::error::CrmError;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

#[derive(Clone)]
pub enum DocumentStore {
    Local {
        root: PathBuf,
    },
    #[cfg(feature = "s3")]
    S3 {
        client: aws_sdk_s3::Client,
        bucket: String,
    },
}

impl DocumentStore {
    pub fn local(root: impl Into<PathBuf>) -> Self {
        DocumentStore::Local { root: root.into() }
    }

    pub async fn from_config(cfg: &StorageConfig) -> Result<Self, CrmError> {
        #[cfg(feature = "s3")]
        {
            if let Some(bucket) = cfg.s3_bucket.clone() {
                use aws_config::BehaviorVersion;
                use aws_sdk_s3::config::Region;

                let shared = aws_config::load_defaults(BehaviorVersion::latest()).await;
                let mut builder = aws_sdk_s3::config::Builder::from(&shared);
                if let Some(region) = cfg.s3_region.clone() {
                    builder = builder.region(Region::new(region));
                }
                let client = aws_sdk_s3::Client::from_conf(builder.build());
                info!(%bucket, "documents stored in S3");
                return Ok(DocumentStore::S3 { client, bucket });
            }
        }

        tokio::fs::create_dir_all(&cfg.local_root).await?;
        info!(root = %cfg.local_root.display(), "documents stored on local disk");
        Ok(Self::local(cfg.local_root.clone()))
    }

    /// Storage key for a new upload: a random prefix plus the cleaned file name.
    pub fn new_key(file_name: &str) -> String {
        let clean: String = file_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let clean = clean.trim_start_matches('.');
        let clean = if clean.is_empty() { "upload" } else { clean };
        format!("docs/{}-{}", uuid::Uuid::new_v4().simple(), clean)
    }

    fn local_path(root: &Path, key: &str) -> Result<PathBuf, CrmError> {
        let rel = Path::new(key);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(CrmError::BadRequest(format!("invalid storage key `{key}`")));
        }
        Ok(root.join(rel))
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), CrmError> {
        match self {
            DocumentStore::Local { root } => {
                let path = Self::local_path(root, key)?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, bytes).await?;
                debug!(key, content_type, "document written to disk");
            }
            #[cfg(feature = "s3")]
            DocumentStore::S3 { client, bucket } => {
                client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .content_type(content_type)
                    .body(bytes.into())
                    .send()
                    .await
                    .map_err(|e| CrmError::transient("s3", format!("put_object failed: {e}")))?;
                debug!(key, content_type, "document uploaded to S3");
            }
        }
        Ok(())
    }

    /// Remove a stored blob. A missing blob is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), CrmError> {
        match self {
            DocumentStore::Local { root } => {
                let path = Self::local_path(root, key)?;
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => debug!(key, "document removed from disk"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            #[cfg(feature = "s3")]
            DocumentStore::S3 { client, bucket } => {
                client
                    .delete_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| CrmError::provider("s3", format!("delete_object failed: {e}")))?;
                debug!(key, "document removed from S3");
            }
        }
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, CrmError> {
        match self {
            DocumentStore::Local { root } => {
                let path = Self::local_path(root, key)?;
                match tokio::fs::read(&path).await {
                    Ok(bytes) => Ok(bytes),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Err(CrmError::NotFound(format!("stored file `{key}`")))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            #[cfg(feature = "s3")]
            DocumentStore::S3 { client, bucket } => {
                let object = client
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| CrmError::provider("s3", format!("get_object failed: {e}")))?;
                let data = object
                    .body
                    .collect()
                    .await
                    .map_err(|e| CrmError::provider("s3", format!("read body failed: {e}")))?;
                Ok(data.into_bytes().to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_sanitized() {
        let key = DocumentStore::new_key("../../etc/pass wd.pdf");
        assert!(key.starts_with("docs/"));
        assert!(key.ends_with("_.._etc_pass_wd.pdf"));
        assert!(!key.contains("/../"));
    }

    #[test]
    fn traversal_keys_are_rejected() {
        let root = Path::new("/tmp/docs");
        assert!(DocumentStore::local_path(root, "../secret").is_err());
        assert!(DocumentStore::local_path(root, "/etc/passwd").is_err());
        assert!(DocumentStore::local_path(root, "docs/a.pdf").is_ok());
    }

    #[tokio::test]
    async fn local_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::local(dir.path());
        let key = DocumentStore::new_key("stmt.pdf");
        store.put(&key, b"%PDF-1.4".to_vec(), "application/pdf").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), b"%PDF-1.4");
        assert!(matches!(
            store.get("docs/missing.pdf").await,
            Err(CrmError::NotFound(_))
        ));

        store.delete(&key).await.unwrap();
        assert!(matches!(store.get(&key).await, Err(CrmError::NotFound(_))));
        store.delete(&key).await.unwrap();
    }
}
