use serde::{Deserialize, Serialize};

/// The bank's EBICS host. Supplied by the caller and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    pub host_id: String,
    pub url: String,
    /// ISO 3166 country code, used as the default scope of business services.
    #[serde(default)]
    pub country_code: Option<String>,
}

impl Bank {
    pub fn new(host_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            url: url.into(),
            country_code: None,
        }
    }

    pub fn with_country_code(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = Some(country_code.into());
        self
    }
}

/// The subscriber talking to the bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub partner_id: String,
    pub user_id: String,
}

impl User {
    pub fn new(partner_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            partner_id: partner_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// Client product identification sent in every request header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub language: String,
}

impl Default for Product {
    fn default() -> Self {
        Self {
            name: concat!("ebics-client ", env!("CARGO_PKG_VERSION")).to_string(),
            language: "en".to_string(),
        }
    }
}
