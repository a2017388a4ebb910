use crate::error::{EbicsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A six digit EBICS return code, technical or business.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReturnCode(String);

impl ReturnCode {
    pub const OK: &'static str = "000000";
    pub const DOWNLOAD_POSTPROCESS_DONE: &'static str = "011000";
    pub const DOWNLOAD_POSTPROCESS_SKIPPED: &'static str = "011001";

    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_string())
    }

    pub fn ok() -> Self {
        Self::new(Self::OK)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn classify(&self) -> ReturnCodeClass {
        match self.as_str() {
            Self::OK | Self::DOWNLOAD_POSTPROCESS_DONE => ReturnCodeClass::Success,
            // EBICS_NO_DOWNLOAD_DATA_AVAILABLE and the bank-specific variants.
            "090005" | "091005" | "091116" => ReturnCodeClass::NoData,
            // Subscriber unknown / not yet activated / authentication pending.
            "091002" | "061001" | "061002" => ReturnCodeClass::ActivationPending,
            Self::DOWNLOAD_POSTPROCESS_SKIPPED => ReturnCodeClass::ReceiptSkipped,
            _ => ReturnCodeClass::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        self.classify() == ReturnCodeClass::Success
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCodeClass {
    Success,
    NoData,
    ActivationPending,
    /// The bank skipped post-processing after a negative receipt.
    ReceiptSkipped,
    Failure,
}

/// What the engine does next after a response has been checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Proceed,
    NoData,
}

/// Named policies deciding which non-success codes become non-error outcomes.
///
/// Everything not covered here surfaces as `BankRejectionError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReturnCodePolicy {
    /// Treat "no download data available" as a successful empty result.
    pub no_data_as_empty: bool,
}

impl Default for ReturnCodePolicy {
    fn default() -> Self {
        Self {
            no_data_as_empty: true,
        }
    }
}

impl ReturnCodePolicy {
    pub fn strict() -> Self {
        Self {
            no_data_as_empty: false,
        }
    }

    pub fn evaluate(&self, code: &ReturnCode, report_text: &str) -> Result<ResponseOutcome> {
        match code.classify() {
            ReturnCodeClass::Success => Ok(ResponseOutcome::Proceed),
            ReturnCodeClass::NoData if self.no_data_as_empty => Ok(ResponseOutcome::NoData),
            _ => Err(rejection(code, report_text)),
        }
    }

    /// Receipt responses: a negative receipt may legitimately be answered with
    /// `011001`.
    pub fn evaluate_receipt(&self, code: &ReturnCode, report_text: &str, positive: bool) -> Result<()> {
        match code.classify() {
            ReturnCodeClass::Success => Ok(()),
            ReturnCodeClass::ReceiptSkipped if !positive => Ok(()),
            _ => Err(rejection(code, report_text)),
        }
    }
}

fn rejection(code: &ReturnCode, report_text: &str) -> EbicsError {
    EbicsError::BankRejectionError {
        code: code.clone(),
        report_text: report_text.to_string(),
    }
}
