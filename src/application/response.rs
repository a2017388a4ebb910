//! ResponseHandler: reads return codes, transaction metadata, segments and
//! key material out of bank responses.

use crate::domain::keyring::{KeyMaterial, KeyOwner, KeyRole, Keyring};
use crate::domain::ports::PayloadCodec;
use crate::domain::protocol::{KeyVersion, ProtocolVersion};
use crate::domain::return_code::ReturnCode;
use crate::domain::transaction::{Segment, TransactionId, TransactionKey};
use crate::error::{EbicsError, Result};
use crate::infrastructure::crypto;
use crate::interfaces::xml::{self, Element};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

fn violation(message: impl Into<String>) -> EbicsError {
    EbicsError::ProtocolViolationError(message.into())
}

fn decode_base64(value: &str, what: &str) -> Result<Vec<u8>> {
    let compact: String = value.split_whitespace().collect();
    STANDARD
        .decode(compact)
        .map_err(|e| violation(format!("{what} is not valid base64: {e}")))
}

fn required_text(document: &Element, path: &[&str]) -> Result<String> {
    document
        .find_text(path)
        .ok_or_else(|| violation(format!("response has no {}", path.join("/"))))
}

pub fn parse_response(bytes: &[u8]) -> Result<Element> {
    xml::parse(bytes)
}

/// The technical code from the header, or the business code from the body
/// when the technical one is `000000`.
pub fn retrieve_return_code(response: &Element) -> Result<ReturnCode> {
    if response.local_name() == "ebicsHEVResponse" {
        return required_text(response, &["SystemReturnCode", "ReturnCode"]).map(ReturnCode::new);
    }

    let technical = ReturnCode::new(required_text(response, &["header", "mutable", "ReturnCode"])?);
    if technical.as_str() != ReturnCode::OK {
        return Ok(technical);
    }
    match response.find_text(&["body", "ReturnCode"]) {
        Some(business) => Ok(ReturnCode::new(business)),
        None => Ok(technical),
    }
}

pub fn retrieve_report_text(response: &Element) -> String {
    if response.local_name() == "ebicsHEVResponse" {
        return response
            .find_text(&["SystemReturnCode", "ReportText"])
            .unwrap_or_default();
    }
    response
        .find_text(&["header", "mutable", "ReportText"])
        .unwrap_or_default()
}

pub fn retrieve_transaction_id(response: &Element) -> Result<TransactionId> {
    required_text(response, &["header", "static", "TransactionID"]).map(TransactionId::new)
}

/// Segment metadata plus the chunk of a download response. Transfer
/// responses do not repeat `NumSegments`; the caller passes the known count.
pub fn extract_download_segment(response: &Element, num_segments: Option<u32>) -> Result<Segment> {
    let transaction_id = retrieve_transaction_id(response)?;

    let num_segments = match response.find_text(&["header", "static", "NumSegments"]) {
        Some(text) => parse_number(&text, "NumSegments")?,
        None => num_segments.ok_or_else(|| violation("response has no NumSegments"))?,
    };

    let segment = response
        .find(&["header", "mutable", "SegmentNumber"])
        .ok_or_else(|| violation("response has no SegmentNumber"))?;
    let index = parse_number(&segment.text(), "SegmentNumber")?;
    let last = match segment.attr("lastSegment") {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        other => return Err(violation(format!("invalid lastSegment flag {other:?}"))),
    };

    let chunk = required_text(response, &["body", "DataTransfer", "OrderData"])?;
    Ok(Segment {
        transaction_id,
        index,
        num_segments,
        last,
        chunk,
    })
}

fn parse_number(text: &str, what: &str) -> Result<u32> {
    text.trim()
        .parse()
        .map_err(|_| violation(format!("{what} '{text}' is not a number")))
}

fn user_encryption_key(keyring: &Keyring) -> Result<&[u8]> {
    keyring
        .user_signature(KeyRole::Encryption)?
        .private_key()
        .ok_or_else(|| EbicsError::signature_missing(KeyOwner::User, KeyRole::Encryption))
}

fn unwrap_transaction_key(
    response: &Element,
    keyring: &Keyring,
    codec: &dyn PayloadCodec,
) -> Result<TransactionKey> {
    let wrapped = required_text(response, &["body", "DataTransfer", "DataEncryptionInfo", "TransactionKey"])?;
    let wrapped = decode_base64(&wrapped, "TransactionKey")?;
    codec.unwrap_key(user_encryption_key(keyring)?, keyring.password(), &wrapped)
}

/// First response of a download.
#[derive(Debug, Clone)]
pub struct InitializationSegment {
    pub transaction_id: TransactionId,
    pub transaction_key: TransactionKey,
    pub segment: Segment,
}

/// Reads the transaction id, unwraps the transaction key with the user's
/// encryption key and takes the first segment.
pub fn extract_initialization_segment(
    response: &Element,
    keyring: &Keyring,
    codec: &dyn PayloadCodec,
) -> Result<InitializationSegment> {
    let segment = extract_download_segment(response, None)?;
    let transaction_key = unwrap_transaction_key(response, keyring, codec)?;
    Ok(InitializationSegment {
        transaction_id: segment.transaction_id.clone(),
        transaction_key,
        segment,
    })
}

/// What the bank told us after an upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSegment {
    pub transaction_id: TransactionId,
    /// Assigned by the bank (H004/H005) or sent by us (H003).
    pub order_id: Option<String>,
}

pub fn extract_upload_segment(request: &Element, response: &Element) -> Result<UploadSegment> {
    let transaction_id = retrieve_transaction_id(response)?;
    let order_id = response
        .find_text(&["header", "mutable", "OrderID"])
        .or_else(|| response.find_text(&["body", "OrderID"]))
        .or_else(|| request.find_text(&["header", "static", "OrderDetails", "OrderID"]));
    Ok(UploadSegment {
        transaction_id,
        order_id,
    })
}

/// Decrypted order data of a key management response (HPB).
pub fn extract_key_management_order_data(
    response: &Element,
    keyring: &Keyring,
    codec: &dyn PayloadCodec,
) -> Result<Vec<u8>> {
    let transaction_key = unwrap_transaction_key(response, keyring, codec)?;
    let order_data = required_text(response, &["body", "DataTransfer", "OrderData"])?;
    codec.open(&transaction_key, &decode_base64(&order_data, "OrderData")?)
}

/// Bank keys of an `HPBResponseOrderData` document.
#[derive(Debug, Clone)]
pub struct BankKeys {
    pub authentication: KeyMaterial,
    pub encryption: KeyMaterial,
}

fn bank_key(info: &Element, version_element: &str) -> Result<KeyMaterial> {
    let version: KeyVersion = required_text(info, &[version_element])?.parse()?;

    let certificate = info
        .find_text(&["X509Data", "X509Certificate"])
        .map(|c| decode_base64(&c, "X509Certificate"))
        .transpose()?;
    let public_key = match &certificate {
        Some(certificate) => crypto::public_key_from_certificate(certificate)?,
        None => {
            let modulus = required_text(info, &["PubKeyValue", "RSAKeyValue", "Modulus"])?;
            let exponent = required_text(info, &["PubKeyValue", "RSAKeyValue", "Exponent"])?;
            crypto::public_key_from_components(
                &decode_base64(&modulus, "Modulus")?,
                &decode_base64(&exponent, "Exponent")?,
            )?
        }
    };

    let key = KeyMaterial::new(version, public_key);
    Ok(match certificate {
        Some(certificate) => key.with_certificate(certificate),
        None => key,
    })
}

pub fn parse_bank_keys(order_data: &[u8]) -> Result<BankKeys> {
    let document = xml::parse(order_data)?;
    let authentication = document
        .child("AuthenticationPubKeyInfo")
        .ok_or_else(|| violation("HPB order data has no AuthenticationPubKeyInfo"))?;
    let encryption = document
        .child("EncryptionPubKeyInfo")
        .ok_or_else(|| violation("HPB order data has no EncryptionPubKeyInfo"))?;

    Ok(BankKeys {
        authentication: bank_key(authentication, "AuthenticationVersion")?,
        encryption: bank_key(encryption, "EncryptionVersion")?,
    })
}

/// One entry of an HEV response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedVersion {
    /// `None` for generations this client does not speak.
    pub protocol: Option<ProtocolVersion>,
    pub protocol_name: String,
    pub version: String,
}

pub fn parse_hev(response: &Element) -> Result<Vec<SupportedVersion>> {
    if response.local_name() != "ebicsHEVResponse" {
        return Err(violation(format!(
            "expected ebicsHEVResponse, got {}",
            response.name()
        )));
    }
    Ok(response
        .children_named("VersionNumber")
        .map(|entry| {
            let protocol_name = entry.attr("ProtocolVersion").unwrap_or_default().to_string();
            SupportedVersion {
                protocol: protocol_name.parse().ok(),
                protocol_name,
                version: entry.text(),
            }
        })
        .collect())
}
