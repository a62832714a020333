use crate::error::CrmError;
use crate::service::lead_distro::DistroMode;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use url::Url;

/// Layered service configuration: built-in defaults, then `config.toml`,
/// then `CRM_*` environment variables (`CRM_BASIC__DATABASE_URL=...`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub distro: DistroConfig,
    pub smart_credit: SmartCreditConfig,
    pub datax: DataxConfig,
    pub bandwidth: BandwidthConfig,
    pub docusign: DocusignConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub listen_addr: String,
    pub database_url: String,
    pub loglevel: String,
    /// Key granting a synthetic admin principal via `x-api-key`.
    pub admin_key: String,
    pub proxy: Option<Url>,
    pub job_concurrency: usize,
    pub reminder_lead_minutes: i64,
    /// Shared secret expected in `x-webhook-secret` on provider callbacks.
    pub webhook_secret: Option<String>,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            database_url: "sqlite:crm.db".to_string(),
            loglevel: "info".to_string(),
            admin_key: String::new(),
            proxy: None,
            job_concurrency: 4,
            reminder_lead_minutes: 60,
            webhook_secret: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DistroConfig {
    pub mode: DistroMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartCreditConfig {
    pub base_url: String,
    pub client_key: String,
    pub sponsor_code: String,
}

impl Default for SmartCreditConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.smartcredit.com/api/".to_string(),
            client_key: String::new(),
            sponsor_code: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataxConfig {
    pub endpoint: String,
    pub license_key: String,
    pub password: String,
    pub call_type: String,
}

impl Default for DataxConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.dataxltd.com/v2".to_string(),
            license_key: String::new(),
            password: String::new(),
            call_type: "bav1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthConfig {
    pub base_url: String,
    pub account_id: String,
    pub username: String,
    pub password: String,
    pub application_id: String,
    pub from_number: String,
    /// Outbound message rate towards the messaging API.
    pub per_second: u32,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            base_url: "https://messaging.bandwidth.com/api/v2".to_string(),
            account_id: String::new(),
            username: String::new(),
            password: String::new(),
            application_id: String::new(),
            from_number: String::new(),
            per_second: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocusignConfig {
    pub base_url: String,
    pub account_id: String,
    pub template_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub auth_url: String,
    pub token_url: String,
    /// Pre-issued token; skips the refresh grant when set.
    pub access_token: Option<String>,
}

impl Default for DocusignConfig {
    fn default() -> Self {
        Self {
            base_url: "https://demo.docusign.net/restapi".to_string(),
            account_id: String::new(),
            template_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            auth_url: "https://account-d.docusign.com/oauth/auth".to_string(),
            token_url: "https://account-d.docusign.com/oauth/token".to_string(),
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub local_root: PathBuf,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_root: PathBuf::from("./documents"),
            s3_bucket: None,
            s3_region: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, CrmError> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("CRM_").split("__"))
            .extract()
            .map_err(|e| CrmError::Config(e.to_string()))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, CrmError> {
        self.basic
            .listen_addr
            .parse()
            .map_err(|e| CrmError::Config(format!("invalid listen_addr: {e}")))
    }

    pub fn job_concurrency(&self) -> usize {
        self.basic.job_concurrency.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = Config::default();
        assert_eq!(cfg.socket_addr().unwrap().port(), 8000);
        assert_eq!(cfg.distro.mode, DistroMode::RoundRobin);
        assert!(cfg.basic.admin_key.is_empty());
    }

    #[test]
    fn job_concurrency_never_zero() {
        let mut cfg = Config::default();
        cfg.basic.job_concurrency = 0;
        assert_eq!(cfg.job_concurrency(), 1);
    }

    #[test]
    fn env_overrides_nested_values() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CRM_BASIC__LISTEN_ADDR", "127.0.0.1:9100");
            jail.set_env("CRM_DISTRO__MODE", "time_ratio");
            let cfg = Config::load().expect("config loads");
            assert_eq!(cfg.socket_addr().unwrap().port(), 9100);
            assert_eq!(cfg.distro.mode, DistroMode::TimeRatio);
            Ok(())
        });
    }
}
