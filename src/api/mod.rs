//! Third-party provider clients.

pub mod bandwidth;
pub mod datax;
pub mod docusign;
pub mod http;
pub mod smart_credit;

use crate::config::Config;
use crate::error::CrmError;
use bandwidth::BandwidthApi;
use datax::DataxApi;
use docusign::DocusignApi;
use smart_credit::SmartCreditApi;

/// Every provider client, sharing one connection pool.
#[derive(Clone)]
pub struct Providers {
    pub smart_credit: SmartCreditApi,
    pub datax: DataxApi,
    pub bandwidth: BandwidthApi,
    pub docusign: DocusignApi,
}

impl Providers {
    pub fn new(cfg: &Config) -> Result<Self, CrmError> {
        let client = http::build_client(cfg.basic.proxy.as_ref())?;
        Ok(Self {
            smart_credit: SmartCreditApi::new(client.clone(), cfg.smart_credit.clone()),
            datax: DataxApi::new(client.clone(), cfg.datax.clone()),
            bandwidth: BandwidthApi::new(client.clone(), cfg.bandwidth.clone()),
            docusign: DocusignApi::new(client, cfg.docusign.clone()),
        })
    }
}
