//! Process-wide application settings.
//!
//! Settings are persisted as JSON in the primary store's `_params` table
//! under the `settings` id, and held in memory by the app. Unknown or
//! missing fields fall back to defaults so older rows keep loading.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logger::Level;
use crate::storage::db::Db;

/// `_params` id of the persisted settings row.
pub const SETTINGS_PARAM_ID: &str = "settings";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub meta: MetaConfig,
    pub logs: LogsConfig,
    pub smtp: SmtpConfig,
    pub s3: S3Config,
    pub backups: BackupsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    pub app_name: String,
    pub app_url: String,
    pub sender_name: String,
    pub sender_address: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            app_name: "Dualite".into(),
            app_url: "http://localhost:8090".into(),
            sender_name: "Support".into(),
            sender_address: "support@example.com".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Retention in days. 0 disables log persistence entirely.
    pub max_days: u32,
    /// Minimum persisted severity.
    pub min_level: Level,
    pub log_ip: bool,
    pub log_auth_id: bool,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            max_days: 5,
            min_level: Level::INFO,
            log_ip: true,
            log_auth_id: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub tls: bool,
    pub local_name: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "smtp.example.com".into(),
            port: 587,
            username: String::new(),
            password: String::new(),
            tls: false,
            local_name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub enabled: bool,
    pub bucket: String,
    pub region: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret: String,
    pub force_path_style: bool,
}

impl S3Config {
    /// Check that every field needed to reach the bucket is set.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("bucket", &self.bucket),
            ("region", &self.region),
            ("endpoint", &self.endpoint),
            ("access_key", &self.access_key),
            ("secret", &self.secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::config(format!(
                "S3 storage is missing: {}",
                missing.join(", ")
            )))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupsConfig {
    /// Schedule expression for automatic backups; empty disables them.
    pub cron: String,
    pub cron_max_keep: u32,
    pub s3: S3Config,
}

impl Settings {
    /// Validate the settings before they are persisted.
    pub fn validate(&self) -> Result<()> {
        if self.meta.app_name.trim().is_empty() {
            return Err(Error::validation("meta.app_name cannot be empty"));
        }

        let level = self.logs.min_level;
        if level < Level::DEBUG || level > Level::ERROR {
            return Err(Error::validation(format!(
                "logs.min_level must be between {} and {}, got {}",
                Level::DEBUG.as_i32(),
                Level::ERROR.as_i32(),
                level.as_i32()
            )));
        }

        if self.smtp.enabled {
            if self.smtp.host.trim().is_empty() {
                return Err(Error::validation("smtp.host is required when SMTP is enabled"));
            }
            if self.smtp.port == 0 {
                return Err(Error::validation("smtp.port is required when SMTP is enabled"));
            }
        }

        if self.s3.enabled {
            self.s3
                .validate()
                .map_err(|e| Error::validation(format!("s3: {e}")))?;
        }

        if self.backups.s3.enabled {
            self.backups
                .s3
                .validate()
                .map_err(|e| Error::validation(format!("backups.s3: {e}")))?;
        }

        Ok(())
    }

    /// Load the persisted settings, if any.
    pub fn load(db: &Db) -> Result<Option<Self>> {
        let raw: Option<String> = db.query_row_optional(
            "SELECT value FROM _params WHERE id = ?1",
            [SETTINGS_PARAM_ID],
            |row| row.get(0),
        )?;

        raw.map(|json| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }

    /// Upsert the settings row.
    pub fn persist(&self, db: &Db) -> Result<()> {
        let json = serde_json::to_string(self)?;
        let now = crate::now_millis();
        db.execute(
            "INSERT INTO _params (id, value, created, updated) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET value = excluded.value, updated = excluded.updated",
            rusqlite::params![SETTINGS_PARAM_ID, json, now],
        )?;
        Ok(())
    }
}
