use crate::domain::identity::{Bank, Product, User};
use crate::domain::keyring::Keyring;
use crate::domain::order::{OrderParameters, OrderType};
use crate::domain::transaction::TransactionId;
use crate::infrastructure::crypto;
use chrono::{DateTime, Utc};

/// Everything one order needs to build its requests. Created per order and
/// dropped when the order completes.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    pub bank: &'a Bank,
    pub user: &'a User,
    pub product: &'a Product,
    pub keyring: &'a Keyring,
    pub order_type: OrderType,
    pub parameters: OrderParameters,
    pub timestamp: DateTime<Utc>,
    pub nonce: String,
    /// H003 only: client-assigned order id.
    pub order_id: Option<String>,
    pub transaction_id: Option<TransactionId>,
    pub segment_number: Option<u32>,
    pub last_segment: bool,
}

impl<'a> RequestContext<'a> {
    pub fn new(
        bank: &'a Bank,
        user: &'a User,
        product: &'a Product,
        keyring: &'a Keyring,
        order_type: OrderType,
    ) -> Self {
        Self {
            bank,
            user,
            product,
            keyring,
            order_type,
            parameters: OrderParameters::default(),
            timestamp: Utc::now(),
            nonce: crypto::generate_nonce(),
            order_id: None,
            transaction_id: None,
            segment_number: None,
            last_segment: false,
        }
    }

    pub fn with_parameters(mut self, parameters: OrderParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    /// Moves the context to the next round trip of a running transaction.
    pub fn advance(&mut self, transaction_id: &TransactionId, segment_number: Option<u32>, last_segment: bool) {
        self.transaction_id = Some(transaction_id.clone());
        self.segment_number = segment_number;
        self.last_segment = last_segment;
    }

    /// `2024-01-31T12:00:00.000Z`
    pub fn timestamp_text(&self) -> String {
        self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }
}
