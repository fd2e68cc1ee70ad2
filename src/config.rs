use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub webhook_base_url: String,
    pub email_service_url: String,
    pub crm_api_url: String,
    pub webhook_workers: usize,
    pub sync_workers: usize,
    pub notification_workers: usize,
    pub admin_rps: u32,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            webhook_base_url: get_env("WEBHOOK_BASE_URL")?,
            email_service_url: get_env("EMAIL_SERVICE_URL")?,
            crm_api_url: get_env("CRM_API_URL")?,
            webhook_workers: get_env_parse_or("WEBHOOK_WORKERS", 5)?,
            sync_workers: get_env_parse_or("SYNC_WORKERS", 3)?,
            notification_workers: get_env_parse_or("NOTIFICATION_WORKERS", 2)?,
            admin_rps: get_env_parse_or("ADMIN_RPS", 20)?,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
