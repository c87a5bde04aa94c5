//! Durable session record.
//!
//! A field-named JSON document holding everything needed to resume a
//! session without logging in again: application key, identity, key
//! material and optionally the last tree snapshot.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::SessionKeys;
use crate::error::{MegaError, Result};
use crate::fs::Node;

pub const RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default = "default_version")]
    pub version: u32,
    pub app_key: String,
    pub email: String,
    #[serde(default)]
    pub user_handle: String,
    pub session_id: String,
    #[serde(with = "crate::base64::key16")]
    pub master_key: [u8; 16],
    #[serde(
        default,
        with = "crate::base64::key16_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_key: Option<[u8; 16]>,
    /// Flat tree snapshot, parents before children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<Vec<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_folder: Option<String>,
}

fn default_version() -> u32 {
    RECORD_VERSION
}

impl SessionRecord {
    pub fn new(app_key: impl Into<String>, keys: &SessionKeys) -> Self {
        Self {
            version: RECORD_VERSION,
            app_key: app_key.into(),
            email: keys.email.clone(),
            user_handle: keys.user_handle.clone(),
            session_id: keys.session_id.clone(),
            master_key: keys.master_key,
            session_key: keys.session_key,
            tree: None,
            current_folder: None,
        }
    }

    /// Key material and identity carried by the record.
    pub fn keys(&self) -> SessionKeys {
        SessionKeys {
            email: self.email.clone(),
            user_handle: self.user_handle.clone(),
            session_id: self.session_id.clone(),
            master_key: self.master_key,
            session_key: self.session_key,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a record. Missing or malformed fields are `CorruptState`.
    pub fn from_json(json: &str) -> Result<Self> {
        let record: Self =
            serde_json::from_str(json).map_err(|e| MegaError::CorruptState(e.to_string()))?;
        if record.session_id.is_empty() {
            return Err(MegaError::CorruptState("empty session id".to_string()));
        }
        if record.version > RECORD_VERSION {
            return Err(MegaError::CorruptState(format!(
                "record version {} is newer than supported {}",
                record.version, RECORD_VERSION
            )));
        }
        Ok(record)
    }

    /// Write the record through a temporary file so a crash never leaves a
    /// half-written record behind.
    pub async fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        tokio::fs::write(&temp, json.as_bytes()).await?;
        tokio::fs::rename(&temp, path).await?;
        debug!("session record saved to {}", path.display());
        Ok(())
    }

    /// Read a record. Returns `Ok(None)` if the file does not exist.
    pub async fn load_from<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(MegaError::CorruptState(e.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_json(&json).map(Some)
    }
}
