use crate::domain::keyring::{KeyOwner, KeyRole};
use crate::domain::return_code::{ReturnCode, ReturnCodeClass};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum EbicsError {
    #[error("Signature missing: the {owner} {role} key is not present in the keyring")]
    #[diagnostic(code(ebics::signature_missing), help("run keygen for user keys or hpb for bank keys"))]
    SignatureMissingError { owner: KeyOwner, role: KeyRole },
    #[error("Password error: the private key could not be unlocked")]
    #[diagnostic(code(ebics::password))]
    PasswordError,
    #[error("Unsupported operation: {0}")]
    UnsupportedOperationError(String),
    #[error("Protocol violation: {0}")]
    ProtocolViolationError(String),
    #[error("Bank rejected the request with code {code}: {report_text}")]
    #[diagnostic(code(ebics::bank_rejection))]
    BankRejectionError {
        code: ReturnCode,
        report_text: String,
    },
    #[error("Transport error: {0}")]
    TransportError(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Crypto error: {0}")]
    CryptoError(String),
    #[error("XML error: {0}")]
    XmlError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl EbicsError {
    pub fn signature_missing(owner: KeyOwner, role: KeyRole) -> Self {
        Self::SignatureMissingError { owner, role }
    }

    /// The bank return code behind a rejection, if this error is one.
    pub fn return_code(&self) -> Option<&ReturnCode> {
        match self {
            Self::BankRejectionError { code, .. } => Some(code),
            _ => None,
        }
    }

    /// True when the bank rejected the request because the subscriber is not
    /// (yet) activated. Callers usually re-send the key letters instead of failing.
    pub fn is_activation_pending(&self) -> bool {
        self.return_code()
            .is_some_and(|code| code.classify() == ReturnCodeClass::ActivationPending)
    }
}

pub type Result<T> = std::result::Result<T, EbicsError>;
