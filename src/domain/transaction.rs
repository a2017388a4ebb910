use crate::domain::order::OrderType;
use crate::error::{EbicsError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encrypted order data above this size would need more than one transfer
/// segment, which the engine does not send.
pub const MAX_UPLOAD_SEGMENT_SIZE: usize = 1024 * 1024;

/// Bank-assigned identifier shared by every round trip of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Symmetric key of one transaction.
#[derive(Clone, PartialEq, Eq)]
pub struct TransactionKey(Vec<u8>);

impl TransactionKey {
    pub fn new(key: Vec<u8>) -> Self {
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionKey(<{} bytes>)", self.0.len())
    }
}

/// One chunk of a segmented download, exactly as declared by the bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub transaction_id: TransactionId,
    /// 1-based position within the transaction.
    pub index: u32,
    pub num_segments: u32,
    pub last: bool,
    /// Base64 of the encrypted chunk.
    pub chunk: String,
}

impl Segment {
    fn decode(&self) -> Result<Vec<u8>> {
        let compact: String = self.chunk.split_whitespace().collect();
        STANDARD.decode(compact).map_err(|e| {
            EbicsError::ProtocolViolationError(format!(
                "segment {} is not valid base64: {e}",
                self.index
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Initializing,
    AwaitingSegment,
    AwaitingReceipt,
    Reassembling,
    Complete,
}

/// Append-only record of a segmented download.
///
/// The segment sequence is checked against the bank's own metadata on every
/// append; a non-monotonic index, a changed transaction id or a segment past
/// `NumSegments` fails immediately.
#[derive(Debug, Clone)]
pub struct DownloadTransaction {
    order_type: OrderType,
    state: DownloadState,
    transaction_key: Option<TransactionKey>,
    segments: Vec<Segment>,
    payload: Option<Vec<u8>>,
}

impl DownloadTransaction {
    pub fn new(order_type: OrderType) -> Self {
        Self {
            order_type,
            state: DownloadState::Initializing,
            transaction_key: None,
            segments: Vec::new(),
            payload: None,
        }
    }

    /// Records the initialisation response: the unwrapped transaction key and
    /// the first segment.
    pub fn begin(&mut self, transaction_key: TransactionKey, first: Segment) -> Result<()> {
        if self.state != DownloadState::Initializing {
            return Err(violation(format!(
                "transaction already started, state is {:?}",
                self.state
            )));
        }
        if first.index != 1 {
            return Err(violation(format!(
                "initialisation returned segment {} instead of 1",
                first.index
            )));
        }
        if first.num_segments == 0 {
            return Err(violation("bank declared zero segments".to_string()));
        }
        check_last_flag(&first)?;

        self.transaction_key = Some(transaction_key);
        self.advance(first);
        Ok(())
    }

    pub fn append(&mut self, segment: Segment) -> Result<()> {
        if self.state != DownloadState::AwaitingSegment {
            return Err(violation(format!(
                "segment {} received while {:?}",
                segment.index, self.state
            )));
        }
        let Some(previous) = self.segments.last() else {
            return Err(violation("no initial segment".to_string()));
        };
        if segment.transaction_id != previous.transaction_id {
            return Err(violation(format!(
                "transaction id changed from {} to {}",
                previous.transaction_id, segment.transaction_id
            )));
        }
        if segment.index != previous.index + 1 {
            return Err(violation(format!(
                "expected segment {}, got {}",
                previous.index + 1,
                segment.index
            )));
        }
        if segment.num_segments != previous.num_segments {
            return Err(violation(format!(
                "segment count changed from {} to {}",
                previous.num_segments, segment.num_segments
            )));
        }
        if segment.index > segment.num_segments {
            return Err(violation(format!(
                "segment {} exceeds the declared {} segments",
                segment.index, segment.num_segments
            )));
        }
        check_last_flag(&segment)?;

        self.advance(segment);
        Ok(())
    }

    fn advance(&mut self, segment: Segment) {
        self.state = if segment.last {
            DownloadState::AwaitingReceipt
        } else {
            DownloadState::AwaitingSegment
        };
        self.segments.push(segment);
    }

    /// Index the next transfer request has to ask for.
    pub fn next_segment_index(&self) -> Option<u32> {
        match self.state {
            DownloadState::AwaitingSegment => self.segments.last().map(|s| s.index + 1),
            _ => None,
        }
    }

    /// Called once the receipt has been accepted by the bank.
    pub fn receipt_sent(&mut self) -> Result<()> {
        if self.state != DownloadState::AwaitingReceipt {
            return Err(violation(format!("receipt sent while {:?}", self.state)));
        }
        self.state = DownloadState::Reassembling;
        Ok(())
    }

    /// Concatenation of every segment's decoded bytes, in segment order.
    pub fn encrypted_payload(&self) -> Result<Vec<u8>> {
        let declared = self.num_segments().unwrap_or(0) as usize;
        if declared == 0 || self.segments.len() != declared {
            return Err(violation(format!(
                "{} of {} segments received",
                self.segments.len(),
                declared
            )));
        }
        let mut out = Vec::new();
        for segment in &self.segments {
            out.extend(segment.decode()?);
        }
        Ok(out)
    }

    pub fn complete(&mut self, payload: Vec<u8>) -> Result<()> {
        if self.state != DownloadState::Reassembling {
            return Err(violation(format!("completed while {:?}", self.state)));
        }
        self.payload = Some(payload);
        self.state = DownloadState::Complete;
        Ok(())
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.segments.first().map(|s| &s.transaction_id)
    }

    pub fn transaction_key(&self) -> Option<&TransactionKey> {
        self.transaction_key.as_ref()
    }

    pub fn num_segments(&self) -> Option<u32> {
        self.segments.first().map(|s| s.num_segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

fn check_last_flag(segment: &Segment) -> Result<()> {
    let should_be_last = segment.index == segment.num_segments;
    if segment.last != should_be_last {
        return Err(violation(format!(
            "segment {} of {} has lastSegment={}",
            segment.index, segment.num_segments, segment.last
        )));
    }
    Ok(())
}

fn violation(message: String) -> EbicsError {
    EbicsError::ProtocolViolationError(message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Initializing,
    Transferring,
    Complete,
}

/// An upload: one transaction key and one encrypted payload sent as a single
/// transfer segment.
#[derive(Debug, Clone)]
pub struct UploadTransaction {
    order_type: OrderType,
    state: UploadState,
    transaction_key: TransactionKey,
    encrypted_payload: Vec<u8>,
    transaction_id: Option<TransactionId>,
}

impl UploadTransaction {
    pub fn new(
        order_type: OrderType,
        transaction_key: TransactionKey,
        encrypted_payload: Vec<u8>,
    ) -> Result<Self> {
        if encrypted_payload.len() > MAX_UPLOAD_SEGMENT_SIZE {
            return Err(EbicsError::UnsupportedOperationError(format!(
                "{} bytes of encrypted order data need more than one segment",
                encrypted_payload.len()
            )));
        }
        Ok(Self {
            order_type,
            state: UploadState::Initializing,
            transaction_key,
            encrypted_payload,
            transaction_id: None,
        })
    }

    /// Zero for signature-only orders, otherwise one.
    pub fn num_segments(&self) -> u32 {
        if self.encrypted_payload.is_empty() { 0 } else { 1 }
    }

    pub fn initialized(&mut self, transaction_id: TransactionId) -> Result<()> {
        if self.state != UploadState::Initializing {
            return Err(violation(format!("initialised twice, state is {:?}", self.state)));
        }
        self.transaction_id = Some(transaction_id);
        self.state = if self.num_segments() == 0 {
            UploadState::Complete
        } else {
            UploadState::Transferring
        };
        Ok(())
    }

    pub fn transferred(&mut self, transaction_id: &TransactionId) -> Result<()> {
        if self.state != UploadState::Transferring {
            return Err(violation(format!("transfer finished while {:?}", self.state)));
        }
        if self.transaction_id.as_ref() != Some(transaction_id) {
            return Err(violation(format!(
                "transfer answered for transaction {transaction_id}"
            )));
        }
        self.state = UploadState::Complete;
        Ok(())
    }

    /// Base64 of the single transfer segment.
    pub fn segment_chunk(&self) -> String {
        STANDARD.encode(&self.encrypted_payload)
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn transaction_key(&self) -> &TransactionKey {
        &self.transaction_key
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }
}
