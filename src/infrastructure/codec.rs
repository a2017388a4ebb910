use crate::domain::ports::PayloadCodec;
use crate::domain::transaction::TransactionKey;
use crate::error::Result;
use crate::infrastructure::crypto;

/// Upper bound for inflated order data unless configured otherwise.
pub const DEFAULT_MAX_ORDER_DATA_SIZE: usize = 64 * 1024 * 1024;

/// The E002 envelope: RSA-wrapped AES-128 transaction key, zlib-compressed
/// and AES-128-CBC encrypted order data.
#[derive(Debug, Clone, Copy)]
pub struct E002Codec {
    max_order_data_size: usize,
}

impl E002Codec {
    pub fn new() -> Self {
        Self {
            max_order_data_size: DEFAULT_MAX_ORDER_DATA_SIZE,
        }
    }

    /// Caps how large opened order data may inflate.
    ///
    /// # Arguments
    ///
    /// * `limit` - The maximum plaintext size in bytes.
    pub fn with_max_order_data_size(mut self, limit: usize) -> Self {
        self.max_order_data_size = limit;
        self
    }
}

impl Default for E002Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadCodec for E002Codec {
    fn generate_key(&self) -> TransactionKey {
        crypto::generate_transaction_key()
    }

    fn wrap_key(&self, public_key: &[u8], key: &TransactionKey) -> Result<Vec<u8>> {
        crypto::encrypt_transaction_key(public_key, key)
    }

    fn unwrap_key(&self, private_key: &[u8], password: &str, wrapped: &[u8]) -> Result<TransactionKey> {
        crypto::decrypt_transaction_key(private_key, password, wrapped)
    }

    fn seal(&self, key: &TransactionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
        crypto::encrypt_by_key(key, &crypto::compress(plaintext)?)
    }

    fn open(&self, key: &TransactionKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
        crypto::decompress(&crypto::decrypt_by_key(key, ciphertext)?, self.max_order_data_size)
    }
}
