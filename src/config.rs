//! Configuration file of the `ebics-client` binary.

use crate::application::client::ClientConfig;
use crate::domain::identity::{Bank, User};
use crate::domain::protocol::ConnectionProfile;
use crate::error::Result;
use crate::infrastructure::http::DEFAULT_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One bank connection: who we are, where the bank is, and which protocol
/// generation to speak.
///
/// ```json
/// {
///   "bank": { "host_id": "EBIXQUAL", "url": "https://server-ebics.webank.fr:28103/WbkPortalFileTransfert/EbicsProtocol" },
///   "user": { "partner_id": "PARTNER1", "user_id": "USER1" },
///   "profile": { "protocol": "H004", "signature_version": "A006" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EbicsConfig {
    pub bank: Bank,
    pub user: User,
    pub profile: ConnectionProfile,
    #[serde(default)]
    pub client: ClientConfig,
    /// HTTP timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl EbicsConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read(path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }
}
