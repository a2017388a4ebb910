use crate::domain::keyring::KeyRole;
use crate::error::{EbicsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three EBICS protocol generations the engine speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// EBICS 2.4
    H003,
    /// EBICS 2.5
    H004,
    /// EBICS 3.0
    H005,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H003 => "H003",
            Self::H004 => "H004",
            Self::H005 => "H005",
        }
    }

    pub fn namespace(&self) -> &'static str {
        match self {
            Self::H003 => "http://www.ebics.org/H003",
            Self::H004 => "urn:org:ebics:H004",
            Self::H005 => "urn:org:ebics:H005",
        }
    }

    /// Namespace of the user signature documents (`UserSignatureData`,
    /// `SignaturePubKeyOrderData`).
    pub fn signature_namespace(&self) -> &'static str {
        match self {
            Self::H003 | Self::H004 => "http://www.ebics.org/S001",
            Self::H005 => "http://www.ebics.org/S002",
        }
    }

    pub fn revision(&self) -> &'static str {
        "1"
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = EbicsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "H003" => Ok(Self::H003),
            "H004" => Ok(Self::H004),
            "H005" => Ok(Self::H005),
            other => Err(EbicsError::UnsupportedOperationError(format!(
                "protocol version '{other}' is not supported"
            ))),
        }
    }
}

/// Algorithm tag attached to every piece of key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyVersion {
    /// RSASSA-PKCS1-v1_5 with SHA-256 electronic signature.
    A005,
    /// RSASSA-PSS with SHA-256 electronic signature.
    A006,
    /// Authentication signature over the canonical request.
    X002,
    /// Encryption of the transaction key.
    E002,
}

impl KeyVersion {
    pub fn role(&self) -> KeyRole {
        match self {
            Self::A005 | Self::A006 => KeyRole::Signature,
            Self::X002 => KeyRole::Authentication,
            Self::E002 => KeyRole::Encryption,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A005 => "A005",
            Self::A006 => "A006",
            Self::X002 => "X002",
            Self::E002 => "E002",
        }
    }
}

impl fmt::Display for KeyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyVersion {
    type Err = EbicsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "A005" => Ok(Self::A005),
            "A006" => Ok(Self::A006),
            "X002" => Ok(Self::X002),
            "E002" => Ok(Self::E002),
            other => Err(EbicsError::UnsupportedOperationError(format!(
                "key version '{other}' is not supported"
            ))),
        }
    }
}

/// The resolved protocol generation and signature version for one bank
/// connection.
///
/// Resolving these (bank documentation, HEV probe, bank-specific tables) is the
/// caller's job; the engine only consumes the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub protocol: ProtocolVersion,
    pub signature_version: KeyVersion,
}

impl ConnectionProfile {
    pub fn new(protocol: ProtocolVersion, signature_version: KeyVersion) -> Result<Self> {
        if signature_version.role() != KeyRole::Signature {
            return Err(EbicsError::ValidationError(format!(
                "{signature_version} is not a signature version"
            )));
        }
        Ok(Self {
            protocol,
            signature_version,
        })
    }
}
