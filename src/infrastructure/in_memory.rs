use crate::domain::ports::{HttpTransport, KeyringStore, PayloadCodec};
use crate::domain::transaction::TransactionKey;
use crate::error::{EbicsError, Result};
use crate::interfaces::record::KeyringRecord;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// A thread-safe in-memory keyring store.
///
/// Uses `Arc<RwLock<HashMap<String, KeyringRecord>>>` so clones share state.
#[derive(Default, Clone)]
pub struct InMemoryKeyringStore {
    records: Arc<RwLock<HashMap<String, KeyringRecord>>>,
}

impl InMemoryKeyringStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyringStore for InMemoryKeyringStore {
    async fn load(&self, name: &str) -> Result<Option<KeyringRecord>> {
        let records = self.records.read().await;
        Ok(records.get(name).cloned())
    }

    async fn save(&self, name: &str, record: KeyringRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(name.to_string(), record);
        Ok(())
    }
}

/// One request seen by a [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: String,
    pub body: Vec<u8>,
}

/// Replays queued bank responses in order and records every request.
///
/// Clones share the queue and the log, so a test can keep a handle after
/// giving the transport to the engine. Running out of responses is a
/// transport failure.
#[derive(Default, Clone)]
pub struct ScriptedTransport {
    responses: Arc<Mutex<VecDeque<std::result::Result<Vec<u8>, String>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_response(&self, response: impl Into<Vec<u8>>) {
        self.responses.lock().await.push_back(Ok(response.into()));
    }

    pub async fn push_failure(&self, message: impl Into<String>) {
        self.responses.lock().await.push_back(Err(message.into()));
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.responses.lock().await.len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn post(&self, url: &str, request: Vec<u8>) -> Result<Vec<u8>> {
        self.requests.lock().await.push(RecordedRequest {
            url: url.to_string(),
            body: request,
        });
        match self.responses.lock().await.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(EbicsError::TransportError(message.into())),
            None => Err(EbicsError::TransportError(
                "no scripted response left".into(),
            )),
        }
    }
}

/// Codec that leaves keys and payloads untouched, so scripted bank responses
/// can carry plain base64 order data.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCodec;

impl PayloadCodec for PassthroughCodec {
    fn generate_key(&self) -> TransactionKey {
        TransactionKey::new(Vec::new())
    }

    fn wrap_key(&self, _public_key: &[u8], key: &TransactionKey) -> Result<Vec<u8>> {
        Ok(key.as_bytes().to_vec())
    }

    fn unwrap_key(&self, _private_key: &[u8], _password: &str, wrapped: &[u8]) -> Result<TransactionKey> {
        Ok(TransactionKey::new(wrapped.to_vec()))
    }

    fn seal(&self, _key: &TransactionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn open(&self, _key: &TransactionKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}
