//! Persisted rejoin record.
//!
//! Just enough identity survives a restart to rejoin the same room without
//! going through the manual join flow. Peer identities themselves are never
//! reused; the saved `peer_id` exists only so a returning host can prove it
//! held the seat before the restart.

use std::fs;
use std::path::PathBuf;

use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectRecord {
    pub room_id: String,
    pub nickname: String,
    pub is_host: bool,
    pub peer_id: String,
    pub updated_at: i64,
}

/// Small JSON document at a fixed path in client-local storage.
#[derive(Debug, Clone)]
pub struct ReconnectStore {
    path: PathBuf,
}

impl ReconnectStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Loads the saved record. A malformed file is discarded on the spot so
    /// the next load starts clean.
    pub fn load(&self) -> Option<ReconnectRecord> {
        let contents = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!("discarding malformed reconnect record: {err}");
                self.clear();
                None
            }
        }
    }

    /// Best effort: losing the record only costs the automatic rejoin.
    pub fn save(&self, record: &ReconnectRecord) {
        let serialized = match serde_json::to_string_pretty(record) {
            Ok(serialized) => serialized,
            Err(err) => {
                warn!("failed to serialize reconnect record: {err}");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(err) = fs::write(&self.path, serialized) {
            warn!("failed to persist reconnect record: {err}");
        }
    }

    pub fn clear(&self) {
        let _ = fs::remove_file(&self.path);
    }
}
