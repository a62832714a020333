pub mod appointments;
pub mod bank;
pub mod comms;
pub mod credit_report;
pub mod debts;
pub mod distro_actor;
pub mod docproc;
pub mod document_store;
pub mod esign;
pub mod funnel;
pub mod jobs;
pub mod lead_distro;
pub mod lead_import;
pub mod notify;
pub mod payments;
pub mod rac;
pub mod reminders;
