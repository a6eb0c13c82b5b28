//! Mail transport and file storage backend selection.
//!
//! The concrete variant is chosen from the current settings at the point of
//! need; nothing here is cached across settings changes.

use std::path::PathBuf;

use crate::error::Result;
use crate::settings::{MetaConfig, S3Config, SmtpConfig};

/// Sender identity shared by every transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Sender {
    pub name: String,
    pub address: String,
}

impl From<&MetaConfig> for Sender {
    fn from(meta: &MetaConfig) -> Self {
        Self {
            name: meta.sender_name.clone(),
            address: meta.sender_address.clone(),
        }
    }
}

/// SMTP relay connection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpClient {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub tls: bool,
    pub local_name: String,
}

impl From<&SmtpConfig> for SmtpClient {
    fn from(config: &SmtpConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            tls: config.tls,
            local_name: config.local_name.clone(),
        }
    }
}

/// Mail transport.
#[derive(Debug, Clone, PartialEq)]
pub enum MailClient {
    /// Local `sendmail` binary.
    Sendmail { sender: Sender },
    /// Remote SMTP relay.
    Smtp { sender: Sender, client: SmtpClient },
}

impl MailClient {
    /// Pick the transport for the given settings.
    pub fn select(meta: &MetaConfig, smtp: &SmtpConfig) -> Self {
        let sender = Sender::from(meta);
        if smtp.enabled {
            Self::Smtp {
                sender,
                client: SmtpClient::from(smtp),
            }
        } else {
            Self::Sendmail { sender }
        }
    }

    pub fn sender(&self) -> &Sender {
        match self {
            Self::Sendmail { sender } | Self::Smtp { sender, .. } => sender,
        }
    }

    pub fn is_smtp(&self) -> bool {
        matches!(self, Self::Smtp { .. })
    }
}

/// File storage backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Filesystem {
    Local { root: PathBuf },
    S3(S3Config),
}

impl Filesystem {
    /// Pick the backend: S3 when enabled (and fully configured), else `local_root`.
    pub fn select(s3: &S3Config, local_root: PathBuf) -> Result<Self> {
        if s3.enabled {
            s3.validate()?;
            Ok(Self::S3(s3.clone()))
        } else {
            Ok(Self::Local { root: local_root })
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_mail_client_follows_smtp_toggle() {
        let meta = MetaConfig::default();
        let mut smtp = SmtpConfig::default();

        let client = MailClient::select(&meta, &smtp);
        assert!(!client.is_smtp());
        assert_eq!(client.sender().address, meta.sender_address);

        smtp.enabled = true;
        let client = MailClient::select(&meta, &smtp);
        match client {
            MailClient::Smtp { client, .. } => assert_eq!(client.host, smtp.host),
            other => panic!("expected SMTP client, got {other:?}"),
        }
    }

    #[test]
    fn test_filesystem_selection() {
        let mut s3 = S3Config::default();
        let local = Filesystem::select(&s3, PathBuf::from("/data/storage")).unwrap();
        assert_eq!(
            local,
            Filesystem::Local {
                root: PathBuf::from("/data/storage")
            }
        );

        s3.enabled = true;
        let err = Filesystem::select(&s3, PathBuf::from("/data/storage")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
