use crate::domain::keyring::{KeyMaterial, KeyRole, Keyring};
use crate::domain::protocol::{ConnectionProfile, KeyVersion, ProtocolVersion};
use crate::error::{EbicsError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Persistence shape of a keyring. Key material is base64 encoded; the
/// password is never part of the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyringRecord {
    pub version: ProtocolVersion,
    #[serde(default)]
    pub user: UserKeysRecord,
    #[serde(default)]
    pub bank: BankKeysRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserKeysRecord {
    #[serde(rename = "A", default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<KeyRecord>,
    #[serde(rename = "E", default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<KeyRecord>,
    #[serde(rename = "X", default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<KeyRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankKeysRecord {
    #[serde(rename = "E", default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<KeyRecord>,
    #[serde(rename = "X", default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<KeyRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<KeyVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl KeyRecord {
    fn from_key(key: &KeyMaterial) -> Self {
        Self {
            version: Some(key.version()),
            certificate: key.certificate().map(|c| STANDARD.encode(c)),
            public_key: STANDARD.encode(key.public_key()),
            private_key: key.private_key().map(|k| STANDARD.encode(k)),
        }
    }

    /// `default_version` applies only when the record has no version tag.
    fn into_key(self, role: KeyRole, default_version: KeyVersion) -> Result<KeyMaterial> {
        let version = self.version.unwrap_or(default_version);
        if version.role() != role {
            return Err(EbicsError::ValidationError(format!(
                "{version} cannot be stored as the {role} key"
            )));
        }

        let mut key = KeyMaterial::new(version, decode(&self.public_key, "publicKey")?);
        if let Some(private_key) = self.private_key {
            key = key.with_private_key(decode(&private_key, "privateKey")?);
        }
        if let Some(certificate) = self.certificate {
            key = key.with_certificate(decode(&certificate, "certificate")?);
        }
        Ok(key)
    }
}

fn decode(value: &str, field: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value.trim())
        .map_err(|e| EbicsError::ValidationError(format!("{field} is not valid base64: {e}")))
}

impl KeyringRecord {
    pub fn from_keyring(keyring: &Keyring) -> Self {
        let mut record = Self {
            version: keyring.version(),
            user: UserKeysRecord::default(),
            bank: BankKeysRecord::default(),
        };
        for key in keyring.user_keys() {
            let slot = match key.role() {
                KeyRole::Signature => &mut record.user.signature,
                KeyRole::Authentication => &mut record.user.authentication,
                KeyRole::Encryption => &mut record.user.encryption,
            };
            *slot = Some(KeyRecord::from_key(key));
        }
        for key in keyring.bank_keys() {
            let slot = match key.role() {
                KeyRole::Encryption => &mut record.bank.encryption,
                _ => &mut record.bank.authentication,
            };
            *slot = Some(KeyRecord::from_key(key));
        }
        record
    }

    /// Rebuilds a keyring. User signature keys without a version tag take the
    /// profile's signature version.
    pub fn into_keyring(self, profile: ConnectionProfile, password: impl Into<String>) -> Result<Keyring> {
        if self.version != profile.protocol {
            return Err(EbicsError::ValidationError(format!(
                "keyring record is for {} but the connection uses {}",
                self.version, profile.protocol
            )));
        }

        let mut keyring = Keyring::new(profile, password);
        let user = [
            (KeyRole::Signature, self.user.signature, profile.signature_version),
            (KeyRole::Authentication, self.user.authentication, KeyVersion::X002),
            (KeyRole::Encryption, self.user.encryption, KeyVersion::E002),
        ];
        for (role, record, default_version) in user {
            if let Some(record) = record {
                keyring.set_user_signature(record.into_key(role, default_version)?)?;
            }
        }

        let bank = [
            (KeyRole::Authentication, self.bank.authentication, KeyVersion::X002),
            (KeyRole::Encryption, self.bank.encryption, KeyVersion::E002),
        ];
        for (role, record, default_version) in bank {
            if let Some(record) = record {
                keyring.set_bank_signature(role, record.into_key(role, default_version)?)?;
            }
        }
        Ok(keyring)
    }
}
