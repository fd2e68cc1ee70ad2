pub mod crm_schema;
pub mod integration;
pub mod notification_log;
pub mod sync_event;
pub mod webhook_event;
