use crate::domain::return_code::ReturnCode;
use crate::domain::transaction::TransactionId;
use crate::error::{EbicsError, Result};
use crate::interfaces::xml::{self, Element};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Read};
use std::str::FromStr;

/// EBICS order types understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Ini,
    Hia,
    Hpb,
    H3k,
    Hcs,
    Spr,
    Htd,
    Hkd,
    Hpd,
    Hac,
    Ptk,
    Fdl,
    Btd,
    Ful,
    Btu,
}

impl OrderType {
    pub const ALL: [OrderType; 15] = [
        OrderType::Ini,
        OrderType::Hia,
        OrderType::Hpb,
        OrderType::H3k,
        OrderType::Hcs,
        OrderType::Spr,
        OrderType::Htd,
        OrderType::Hkd,
        OrderType::Hpd,
        OrderType::Hac,
        OrderType::Ptk,
        OrderType::Fdl,
        OrderType::Btd,
        OrderType::Ful,
        OrderType::Btu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ini => "INI",
            Self::Hia => "HIA",
            Self::Hpb => "HPB",
            Self::H3k => "H3K",
            Self::Hcs => "HCS",
            Self::Spr => "SPR",
            Self::Htd => "HTD",
            Self::Hkd => "HKD",
            Self::Hpd => "HPD",
            Self::Hac => "HAC",
            Self::Ptk => "PTK",
            Self::Fdl => "FDL",
            Self::Btd => "BTD",
            Self::Ful => "FUL",
            Self::Btu => "BTU",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = EbicsError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|order| order.as_str() == upper)
            .ok_or_else(|| {
                EbicsError::UnsupportedOperationError(format!("order type '{s}' is not supported"))
            })
    }
}

/// Inclusive date range of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(EbicsError::ValidationError(format!(
                "date range starts after it ends ({start} > {end})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

/// EBICS 3.0 business transaction format (BTF) parameters of BTD/BTU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessService {
    pub service_name: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub service_option: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    pub message_name: String,
    #[serde(default)]
    pub message_version: Option<String>,
}

impl BusinessService {
    pub fn new(service_name: impl Into<String>, message_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            scope: None,
            service_option: None,
            container: None,
            message_name: message_name.into(),
            message_version: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_service_option(mut self, option: impl Into<String>) -> Self {
        self.service_option = Some(option.into());
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn with_message_version(mut self, version: impl Into<String>) -> Self {
        self.message_version = Some(version.into());
        self
    }
}

/// Order-specific parameters. Which of them an order needs is decided by its
/// catalog descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderParameters {
    pub date_range: Option<DateRange>,
    /// FDL/FUL file format, e.g. `camt.xxx.cfonb120.stm`.
    pub file_format: Option<String>,
    pub service: Option<BusinessService>,
    /// BTU only: file name announced to the bank.
    pub file_name: Option<String>,
}

/// What the caller asks for: an order type, its parameters and, for uploads,
/// the plaintext order data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub order_type: OrderType,
    pub parameters: OrderParameters,
    pub payload: Vec<u8>,
}

impl OrderRequest {
    pub fn new(order_type: OrderType) -> Self {
        Self {
            order_type,
            parameters: OrderParameters::default(),
            payload: Vec::new(),
        }
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.parameters.date_range = Some(range);
        self
    }

    pub fn with_file_format(mut self, format: impl Into<String>) -> Self {
        self.parameters.file_format = Some(format.into());
        self
    }

    pub fn with_service(mut self, service: BusinessService) -> Self {
        self.parameters.service = Some(service);
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.parameters.file_name = Some(name.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderOutcome {
    Completed,
    /// The bank had nothing to deliver; the payload is empty.
    NoData,
    /// The download was acknowledged negatively; the payload is still returned.
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedFile {
    pub name: String,
    pub content: Vec<u8>,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Final result of one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderResult {
    pub order_type: OrderType,
    pub outcome: OrderOutcome,
    pub return_code: ReturnCode,
    pub report_text: String,
    pub transaction_id: Option<TransactionId>,
    /// Bank or client order id of uploads.
    pub order_id: Option<String>,
    pub payload: Vec<u8>,
}

impl OrderResult {
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Parses the payload as an XML document (HTD, HKD, HAC, camt, ...).
    pub fn document(&self) -> Result<Element> {
        xml::parse(&self.payload)
    }

    /// The files contained in the payload. ZIP containers are unpacked;
    /// anything else is returned as a single file named after the order type.
    pub fn files(&self) -> Result<Vec<EmbeddedFile>> {
        if self.payload.is_empty() {
            return Ok(Vec::new());
        }
        if !self.payload.starts_with(ZIP_MAGIC) {
            return Ok(vec![EmbeddedFile {
                name: self.order_type.as_str().to_ascii_lowercase(),
                content: self.payload.clone(),
            }]);
        }

        let zip_error = |e: zip::result::ZipError| {
            EbicsError::ValidationError(format!("{} payload is not a valid ZIP: {e}", self.order_type))
        };
        let mut archive = zip::ZipArchive::new(Cursor::new(&self.payload)).map_err(zip_error)?;
        let mut files = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).map_err(zip_error)?;
            if entry.is_dir() {
                continue;
            }
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            files.push(EmbeddedFile {
                name: entry.name().to_string(),
                content,
            });
        }
        Ok(files)
    }
}
