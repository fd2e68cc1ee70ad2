pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::services::{
    crm::{CrmClient, RestCrmClient},
    intake::IntakeService,
    notification::NotificationService,
    sync::SyncService,
};
use sqlx::PgPool;
use std::sync::{Arc, RwLock};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub crm_client: Arc<dyn CrmClient>,
    pub notification_service: NotificationService,
    pub sync_service: SyncService,
    pub intake_service: IntakeService,
    /// Effective base URL used when generating intake URLs; updatable at
    /// runtime through the admin surface.
    pub webhook_base_url: Arc<RwLock<String>>,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let config = crate::config::get_config();

        let crm_client: Arc<dyn CrmClient> =
            Arc::new(RestCrmClient::new(config.crm_api_url.clone()));
        let notification_service =
            NotificationService::new(pool.clone(), config.email_service_url.clone());
        let sync_service = SyncService::new(
            pool.clone(),
            crm_client.clone(),
            Arc::new(notification_service.clone()),
        );
        let intake_service = IntakeService::new(pool.clone(), sync_service.clone());
        let webhook_base_url = Arc::new(RwLock::new(
            config.webhook_base_url.trim_end_matches('/').to_string(),
        ));

        Self {
            pool,
            crm_client,
            notification_service,
            sync_service,
            intake_service,
            webhook_base_url,
        }
    }
}
