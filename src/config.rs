//! Configuration management for the fraud scoring service

use crate::models::gbdt::BoostingParams;
use crate::types::scoring::SeverityThresholds;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub database: DatabaseConfig,
    pub model: ModelConfig,
    pub cache: CacheConfig,
    pub severity: SeverityThresholds,
    pub notifications: NotificationsConfig,
    pub dispatcher: DispatcherConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming scoring requests
    pub request_subject: String,
    /// Subject for outgoing scoring reports
    pub report_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            request_subject: "fraud.score.requests".to_string(),
            report_subject: "fraud.score.reports".to_string(),
        }
    }
}

/// Transaction database
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/transactions.db".to_string(),
        }
    }
}

/// Model artifact and training configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Artifact location; its existence decides whether training runs
    pub path: String,
    /// SMOTE neighbors
    pub k_neighbors: usize,
    /// SMOTE random seed
    pub seed: u64,
    pub boosting: BoostingParams,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "models/fraud_model.json".to_string(),
            k_neighbors: 5,
            seed: 42,
            boosting: BoostingParams::default(),
        }
    }
}

/// Historical rate cache
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

/// Alert channels. Empty values disable a channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub slack_webhook_url: String,
    pub slack_timeout_secs: u64,
    /// Subject line of severe-alert emails
    pub email_subject: String,
    pub smtp: SmtpConfig,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            slack_webhook_url: String::new(),
            slack_timeout_secs: 5,
            email_subject: "Severe Fraud Alert".to_string(),
            smtp: SmtpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from: String,
    pub to: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            user: String::new(),
            pass: String::new(),
            from: String::new(),
            to: Vec::new(),
            timeout_secs: 10,
        }
    }
}

/// Background side-effect queue
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Jobs waiting beyond this are dropped
    pub queue_capacity: usize,
    /// Jobs running at once
    pub max_in_flight: usize,
    /// Deadline for notification jobs
    pub job_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_in_flight: 4,
            job_timeout_ms: 30_000,
        }
    }
}

/// Request processing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Scoring requests handled concurrently
    pub workers: usize,
    /// Seconds between metrics summaries
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            metrics_interval_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file and the environment
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path. The file is optional;
    /// `FRAUD__SECTION__KEY` variables override it, and the plain variables
    /// read by [`AppConfig::apply_env_overrides`] override both.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("FRAUD")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("notifications.smtp.to"),
            )
            .build()
            .context("Failed to build configuration")?;

        let mut app: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(app)
    }

    /// Apply the deployment variables `MODEL_PATH`, `DATABASE_PATH`,
    /// `SLACK_WEBHOOK_URL`, `SMTP_*`, `EMAIL_FROM` and `EMAIL_TO`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(path) = get("MODEL_PATH") {
            self.model.path = path;
        }
        if let Some(path) = get("DATABASE_PATH") {
            self.database.path = path;
        }
        if let Some(url) = get("SLACK_WEBHOOK_URL") {
            self.notifications.slack_webhook_url = url;
        }

        let smtp = &mut self.notifications.smtp;
        if let Some(host) = get("SMTP_HOST") {
            smtp.host = host;
        }
        if let Some(port) = get("SMTP_PORT").and_then(|port| port.parse().ok()) {
            smtp.port = port;
        }
        if let Some(user) = get("SMTP_USER") {
            smtp.user = user;
        }
        if let Some(pass) = get("SMTP_PASS") {
            smtp.pass = pass;
        }
        if let Some(from) = get("EMAIL_FROM") {
            smtp.from = from;
        }
        if let Some(to) = get("EMAIL_TO") {
            smtp.to = to
                .split(',')
                .map(str::trim)
                .filter(|addr| !addr.is_empty())
                .map(String::from)
                .collect();
        }
    }
}
