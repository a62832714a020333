//! Wire payloads exchanged with third-party providers.

pub mod bandwidth;
pub mod datax;
pub mod docusign;
pub mod smart_credit;
