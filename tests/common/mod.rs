#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ebics_client::domain::identity::{Bank, User};
use ebics_client::domain::keyring::{KeyMaterial, KeyRole, Keyring};
use ebics_client::domain::ports::PayloadCodec;
use ebics_client::domain::protocol::{ConnectionProfile, KeyVersion, ProtocolVersion};
use ebics_client::infrastructure::codec::E002Codec;
use ebics_client::infrastructure::crypto;
use ebics_client::infrastructure::in_memory::{RecordedRequest, ScriptedTransport};
use ebics_client::interfaces::record::KeyringRecord;
use ebics_client::interfaces::xml::dsig::{self, DSIG_NAMESPACE};
use ebics_client::interfaces::xml::{self, Element};
use ebics_client::{ClientConfig, EbicsClient};
use std::sync::OnceLock;

pub const KEY_SIZE: usize = 1024;
pub const PASSWORD: &str = "secret";
pub const BANK_PASSWORD: &str = "bank";
pub const BANK_URL: &str = "https://bank.example/ebics";
pub const NAMESPACE: &str = "urn:org:ebics:H004";

pub const USER_SUBJECT: &str = "CN=USER,O=PARTNER";

pub struct KeyPair {
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
    /// Self-signed, as an EBICS 3.0 bank would publish it through HPB.
    pub certificate: Vec<u8>,
}

impl KeyPair {
    fn generate(password: &str, subject: &str) -> Self {
        let (public_key, private_key) = crypto::generate_key_pair(KEY_SIZE, password).unwrap();
        let certificate = crypto::self_signed_certificate(&public_key, &private_key, password, subject).unwrap();
        Self {
            public_key,
            private_key,
            certificate,
        }
    }
}

/// Keys are expensive to generate; every test binary generates them once.
pub struct Fixture {
    pub user_keyring: Keyring,
    pub bank_authentication: KeyPair,
    pub bank_encryption: KeyPair,
}

pub fn fixture() -> &'static Fixture {
    static FIXTURE: OnceLock<Fixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let profile = ConnectionProfile::new(ProtocolVersion::H004, KeyVersion::A006).unwrap();
        let mut user_keyring = Keyring::new(profile, PASSWORD);
        user_keyring.create_user_signatures(KEY_SIZE).unwrap();
        Fixture {
            user_keyring,
            bank_authentication: KeyPair::generate(BANK_PASSWORD, "CN=HOST X002"),
            bank_encryption: KeyPair::generate(BANK_PASSWORD, "CN=HOST E002"),
        }
    })
}

/// User keys only, as after INI/HIA.
pub fn keyring_without_bank_keys() -> Keyring {
    fixture().user_keyring.clone()
}

/// User and bank keys, as after HPB.
pub fn keyring() -> Keyring {
    let f = fixture();
    let mut keyring = keyring_without_bank_keys();
    keyring
        .set_bank_signature(
            KeyRole::Authentication,
            KeyMaterial::new(KeyVersion::X002, f.bank_authentication.public_key.clone()),
        )
        .unwrap();
    keyring
        .set_bank_signature(
            KeyRole::Encryption,
            KeyMaterial::new(KeyVersion::E002, f.bank_encryption.public_key.clone()),
        )
        .unwrap();
    keyring
}

/// The same keys under another protocol generation.
pub fn keyring_for(protocol: ProtocolVersion) -> Keyring {
    let mut record = KeyringRecord::from_keyring(&keyring());
    record.version = protocol;
    let profile = ConnectionProfile::new(protocol, KeyVersion::A006).unwrap();
    record.into_keyring(profile, PASSWORD).unwrap()
}

/// H005 user keys carrying self-signed certificates, as before INI/HIA/H3K.
pub fn certified_keyring_without_bank_keys() -> Keyring {
    static CERTIFIED: OnceLock<Keyring> = OnceLock::new();
    CERTIFIED
        .get_or_init(|| {
            let mut record = KeyringRecord::from_keyring(&keyring_without_bank_keys());
            record.version = ProtocolVersion::H005;
            let profile = ConnectionProfile::new(ProtocolVersion::H005, KeyVersion::A006).unwrap();
            let mut keyring = record.into_keyring(profile, PASSWORD).unwrap();
            keyring.certify_user_signatures(USER_SUBJECT).unwrap();
            keyring
        })
        .clone()
}

pub fn client(transport: &ScriptedTransport) -> EbicsClient {
    client_with(
        transport,
        ClientConfig {
            key_size: KEY_SIZE,
            ..Default::default()
        },
    )
}

pub fn client_with(transport: &ScriptedTransport, config: ClientConfig) -> EbicsClient {
    EbicsClient::new(
        Bank::new("HOST", BANK_URL),
        User::new("PARTNER", "USER"),
        Box::new(transport.clone()),
        config,
    )
}

/// Signs a bank response with the fixture bank X002 key.
pub fn signed_by_bank(response: Element) -> Vec<u8> {
    dsig::sign(response, &fixture().bank_authentication.private_key, BANK_PASSWORD)
        .unwrap()
        .to_bytes()
}

fn text(name: &str, value: impl Into<String>) -> Element {
    Element::text_element(name, value)
}

fn mutable(code: &str, report_text: &str) -> Element {
    Element::new("mutable")
        .with_child(text("ReturnCode", code))
        .with_child(text("ReportText", report_text))
}

fn ebics_response(static_header: Element, mutable_header: Element, body: Element) -> Element {
    Element::new("ebicsResponse")
        .with_attr("xmlns", NAMESPACE)
        .with_attr("xmlns:ds", DSIG_NAMESPACE)
        .with_attr("Version", "H004")
        .with_attr("Revision", "1")
        .with_child(
            Element::new("header")
                .with_attr("authenticate", "true")
                .with_child(static_header)
                .with_child(mutable_header),
        )
        .with_child(body)
}

fn transaction_static(transaction_id: &str, num_segments: Option<u32>) -> Element {
    Element::new("static")
        .with_child(text("TransactionID", transaction_id))
        .with_optional_child(num_segments.map(|n| text("NumSegments", n.to_string())))
}

fn ok_body() -> Element {
    Element::new("body").with_child(text("ReturnCode", "000000").with_attr("authenticate", "true"))
}

/// Segment `index` of a download. The initialisation response (index 1)
/// also carries the wrapped transaction key.
pub fn segment_response(
    transaction_id: &str,
    index: u32,
    num_segments: u32,
    chunk: &str,
    wrapped_key: Option<&str>,
) -> Element {
    let mutable_header = Element::new("mutable")
        .with_child(text("TransactionPhase", if index == 1 { "Initialisation" } else { "Transfer" }))
        .with_child(
            Element::new("SegmentNumber")
                .with_attr("lastSegment", (index == num_segments).to_string())
                .with_text(index.to_string()),
        )
        .with_child(text("ReturnCode", "000000"))
        .with_child(text("ReportText", "[EBICS_OK] OK"));

    let encryption_info = wrapped_key.map(|key| {
        Element::new("DataEncryptionInfo")
            .with_attr("authenticate", "true")
            .with_child(text("TransactionKey", key))
    });
    let body = Element::new("body")
        .with_child(
            Element::new("DataTransfer")
                .with_optional_child(encryption_info)
                .with_child(text("OrderData", chunk)),
        )
        .with_child(text("ReturnCode", "000000").with_attr("authenticate", "true"));

    ebics_response(
        transaction_static(transaction_id, Some(num_segments)),
        mutable_header,
        body,
    )
}

/// A response that only carries a technical return code.
pub fn code_response(code: &str, report_text: &str) -> Element {
    ebics_response(
        transaction_static("TX0", None),
        mutable(code, report_text),
        ok_body(),
    )
}

pub fn receipt_response(code: &str) -> Element {
    ebics_response(
        transaction_static("TX1", None),
        mutable(code, "[EBICS_DOWNLOAD_POSTPROCESS_DONE] Positive acknowledgement received"),
        ok_body(),
    )
}

/// Initialisation or transfer answer of an upload.
pub fn upload_response(transaction_id: &str, order_id: Option<&str>) -> Element {
    let mut mutable_header = Element::new("mutable");
    if let Some(order_id) = order_id {
        mutable_header = mutable_header.with_child(text("OrderID", order_id));
    }
    let mutable_header = mutable_header
        .with_child(text("ReturnCode", "000000"))
        .with_child(text("ReportText", "[EBICS_OK] OK"));
    ebics_response(transaction_static(transaction_id, None), mutable_header, ok_body())
}

/// A successful transaction answer whose static header lost its
/// `TransactionID`.
pub fn response_without_transaction_id() -> Element {
    ebics_response(Element::new("static"), mutable("000000", "[EBICS_OK] OK"), ok_body())
}

pub fn key_management_response(code: &str, report_text: &str) -> Element {
    Element::new("ebicsKeyManagementResponse")
        .with_attr("xmlns", NAMESPACE)
        .with_attr("Version", "H004")
        .with_attr("Revision", "1")
        .with_child(
            Element::new("header")
                .with_attr("authenticate", "true")
                .with_child(Element::new("static"))
                .with_child(mutable(code, report_text)),
        )
        .with_child(Element::new("body").with_child(text("ReturnCode", "000000")))
}

/// Raw key value, or only the certificate when `certified`.
fn pub_key_info(name: &str, version_element: &str, version: &str, key: &KeyPair, certified: bool) -> Element {
    let info = Element::new(name);
    let info = if certified {
        info.with_child(
            Element::new("ds:X509Data").with_child(text("ds:X509Certificate", STANDARD.encode(&key.certificate))),
        )
    } else {
        let (modulus, exponent) = crypto::public_key_components(&key.public_key).unwrap();
        info.with_child(
            Element::new("PubKeyValue").with_child(
                Element::new("ds:RSAKeyValue")
                    .with_child(text("ds:Modulus", STANDARD.encode(modulus)))
                    .with_child(text("ds:Exponent", STANDARD.encode(exponent))),
            ),
        )
    };
    info.with_child(text(version_element, version))
}

/// HPB answer carrying the fixture bank keys, encrypted for the user.
pub fn hpb_response(user_keyring: &Keyring) -> Element {
    hpb_response_with(user_keyring, false)
}

/// HPB answer publishing the fixture bank certificates instead of raw keys.
pub fn certified_hpb_response(user_keyring: &Keyring) -> Element {
    hpb_response_with(user_keyring, true)
}

fn hpb_response_with(user_keyring: &Keyring, certified: bool) -> Element {
    let f = fixture();
    let order_data = Element::new("HPBResponseOrderData")
        .with_attr("xmlns", NAMESPACE)
        .with_attr("xmlns:ds", DSIG_NAMESPACE)
        .with_child(pub_key_info(
            "AuthenticationPubKeyInfo",
            "AuthenticationVersion",
            "X002",
            &f.bank_authentication,
            certified,
        ))
        .with_child(pub_key_info(
            "EncryptionPubKeyInfo",
            "EncryptionVersion",
            "E002",
            &f.bank_encryption,
            certified,
        ))
        .with_child(text("HostID", "HOST"));

    let encrypted = encrypt_for_user(user_keyring, &order_data.to_bytes(), 1);
    Element::new("ebicsKeyManagementResponse")
        .with_attr("xmlns", NAMESPACE)
        .with_attr("Version", "H004")
        .with_attr("Revision", "1")
        .with_child(
            Element::new("header")
                .with_attr("authenticate", "true")
                .with_child(Element::new("static"))
                .with_child(mutable("000000", "[EBICS_OK] OK")),
        )
        .with_child(
            Element::new("body")
                .with_child(
                    Element::new("DataTransfer")
                        .with_child(
                            Element::new("DataEncryptionInfo")
                                .with_attr("authenticate", "true")
                                .with_child(text("TransactionKey", encrypted.wrapped_key)),
                        )
                        .with_child(text("OrderData", encrypted.chunks.concat())),
                )
                .with_child(text("ReturnCode", "000000")),
        )
}

/// Order data sealed the way the bank does it: a fresh transaction key
/// wrapped with the user's E key, ciphertext split into base64 chunks.
pub struct EncryptedDownload {
    pub wrapped_key: String,
    pub chunks: Vec<String>,
}

pub fn encrypt_for_user(user_keyring: &Keyring, payload: &[u8], segments: usize) -> EncryptedDownload {
    let codec = E002Codec::new();
    let key = codec.generate_key();
    let sealed = codec.seal(&key, payload).unwrap();
    let user_encryption = user_keyring.user_signature(KeyRole::Encryption).unwrap();
    let wrapped = codec.wrap_key(user_encryption.public_key(), &key).unwrap();

    let chunk_size = sealed.len().div_ceil(segments);
    let chunks: Vec<String> = sealed.chunks(chunk_size).map(|c| STANDARD.encode(c)).collect();
    assert_eq!(chunks.len(), segments, "payload too small for {segments} segments");
    EncryptedDownload {
        wrapped_key: STANDARD.encode(wrapped),
        chunks,
    }
}

pub fn parse_request(request: &RecordedRequest) -> Element {
    xml::parse(&request.body).unwrap()
}

/// Receipt codes of all receipt requests, in order.
pub fn receipt_codes(requests: &[RecordedRequest]) -> Vec<String> {
    requests
        .iter()
        .map(parse_request)
        .filter_map(|doc| doc.find_text(&["body", "TransferReceipt", "ReceiptCode"]))
        .collect()
}
