use super::transaction::{DownloadTransaction, TransactionKey};
use crate::error::Result;
use crate::interfaces::record::KeyringRecord;
use async_trait::async_trait;

/// Exchanges one request document with the bank host.
///
/// Timeouts belong to the implementation; the engine never retries.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Posts one request and returns the raw response body.
    ///
    /// # Arguments
    ///
    /// * `url` - The bank host endpoint.
    /// * `request` - The serialized request document.
    async fn post(&self, url: &str, request: Vec<u8>) -> Result<Vec<u8>>;
}

/// Loads and saves keyring records. Where and how they are stored is up to
/// the implementation.
#[async_trait]
pub trait KeyringStore: Send + Sync {
    /// Returns `None` when nothing was saved under `name`.
    ///
    /// # Arguments
    ///
    /// * `name` - The keyring name.
    async fn load(&self, name: &str) -> Result<Option<KeyringRecord>>;

    /// Replaces any record saved under the same name.
    ///
    /// # Arguments
    ///
    /// * `name` - The keyring name.
    /// * `record` - The serializable keyring to persist.
    async fn save(&self, name: &str, record: KeyringRecord) -> Result<()>;
}

/// Order-data envelope: transaction key handling plus payload sealing.
pub trait PayloadCodec: Send + Sync {
    fn generate_key(&self) -> TransactionKey;

    /// Wraps the transaction key for the owner of `public_key`.
    ///
    /// # Arguments
    ///
    /// * `public_key` - The recipient's DER SubjectPublicKeyInfo.
    /// * `key` - The transaction key to wrap.
    fn wrap_key(&self, public_key: &[u8], key: &TransactionKey) -> Result<Vec<u8>>;

    /// Unwraps a transaction key with the user's encryption private key.
    ///
    /// # Arguments
    ///
    /// * `private_key` - The encrypted PKCS#8 private key.
    /// * `password` - The password protecting `private_key`.
    /// * `wrapped` - The transaction key as sent by the bank.
    fn unwrap_key(&self, private_key: &[u8], password: &str, wrapped: &[u8]) -> Result<TransactionKey>;

    /// Compresses then encrypts.
    ///
    /// # Arguments
    ///
    /// * `key` - The transaction key.
    /// * `plaintext` - The order data.
    fn seal(&self, key: &TransactionKey, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts then decompresses.
    ///
    /// # Arguments
    ///
    /// * `key` - The transaction key.
    /// * `ciphertext` - The reassembled encrypted order data.
    fn open(&self, key: &TransactionKey, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

pub type HttpTransportBox = Box<dyn HttpTransport>;
pub type PayloadCodecBox = Box<dyn PayloadCodec>;

/// Decides whether a fully downloaded transaction is acknowledged positively.
pub type ReceiptDecisionFn = dyn Fn(&DownloadTransaction) -> bool + Send + Sync;
pub type ReceiptDecision = Box<ReceiptDecisionFn>;
