use std::env;

use crate::models::Address;

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub mail_collection: String,
    pub default_from_email: String,
    pub default_from_name: Option<String>,
    pub mailtrap_api_token: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        // An empty display name is treated as unset so the provider never
        // receives an empty `name` field.
        let default_from_name = env::var("DEFAULT_FROM_NAME")
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        Ok(Config {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            mail_collection: env::var("MAIL_COLLECTION").unwrap_or_else(|_| "mail".to_string()),
            default_from_email: env::var("DEFAULT_FROM_EMAIL")
                .map_err(|_| ConfigError::MissingFromEmail)?,
            default_from_name,
            mailtrap_api_token: env::var("MAILTRAP_API_TOKEN")
                .map_err(|_| ConfigError::MissingApiToken)?,
        })
    }

    /// Process-wide default sender, used when a mail document carries no `from`.
    pub fn default_from(&self) -> Address {
        Address {
            email: self.default_from_email.clone(),
            name: self.default_from_name.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DEFAULT_FROM_EMAIL environment variable is required")]
    MissingFromEmail,
    #[error("MAILTRAP_API_TOKEN environment variable is required")]
    MissingApiToken,
}
