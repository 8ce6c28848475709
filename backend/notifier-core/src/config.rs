// src/config.rs
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment configuration error: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid business timezone: {0}")]
    InvalidTimezone(String),
}

fn default_template_path() -> PathBuf {
    PathBuf::from("assets/absence_notification_form.json")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_business_timezone() -> String {
    "Europe/Berlin".to_string()
}

fn default_months_ago() -> u32 {
    1
}

fn default_decision_maker_role() -> String {
    "Decision Maker".to_string()
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    3000
}

fn default_http_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    // Zoho connector
    pub zoho_connector_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    // Document generation
    #[serde(default = "default_template_path")]
    pub form_template_path: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    // Workflow
    #[serde(default = "default_business_timezone")]
    pub business_timezone: String,
    #[serde(default = "default_months_ago")]
    pub months_ago: u32,
    #[serde(default = "default_decision_maker_role")]
    pub decision_maker_role: String,

    // Server Configuration
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();
        Ok(envy::from_env::<AppConfig>()?)
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.business_timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.business_timezone.clone()))
    }
}

/// Form values that are not derived from CRM data, read from `FORM_*` variables.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct FormDefaults {
    pub measure_title: Option<String>,
    pub justification: Option<String>,
    pub attained_despite_absences: Option<bool>,
    pub not_attained_due_to_absences: Option<bool>,
    pub days_since_start_no_longer_attainable: Option<i64>,
    pub repeat_option_0: Option<bool>,
    pub repeat_option_1: Option<bool>,
    pub repeat_from_date: Option<String>,
    pub termination_from_date: Option<String>,
}

impl FormDefaults {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Ok(envy::prefixed("FORM_").from_env::<FormDefaults>()?)
    }
}
