mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::{
    certified_hpb_response, certified_keyring_without_bank_keys, client, code_response, fixture, hpb_response,
    key_management_response, keyring, keyring_without_bank_keys, parse_request, upload_response, PASSWORD,
};
use ebics_client::domain::keyring::{KeyRole, Keyring};
use ebics_client::domain::order::{OrderOutcome, OrderType};
use ebics_client::domain::ports::KeyringStore;
use ebics_client::domain::protocol::{ConnectionProfile, KeyVersion, ProtocolVersion};
use ebics_client::infrastructure::crypto;
use ebics_client::infrastructure::in_memory::{InMemoryKeyringStore, ScriptedTransport};
use ebics_client::interfaces::record::KeyringRecord;
use ebics_client::interfaces::xml::{self, Element};
use ebics_client::EbicsError;

fn components(public_key: &[u8]) -> (Vec<u8>, Vec<u8>) {
    crypto::public_key_components(public_key).unwrap()
}

fn public_key(keyring: &Keyring, role: KeyRole) -> Vec<u8> {
    keyring.user_signature(role).unwrap().public_key().to_vec()
}

/// Base64 then zlib, as key management requests carry their documents.
fn inflate(request: &Element, field: &str) -> Vec<u8> {
    let encoded = request.find_text(&["body", "DataTransfer", field]).unwrap();
    crypto::decompress(&STANDARD.decode(encoded).unwrap(), 1 << 20).unwrap()
}

/// The order data of an unsecured key letter.
fn key_letter(request: &Element) -> Element {
    xml::parse(&inflate(request, "OrderData")).unwrap()
}

#[tokio::test]
async fn test_key_letters_are_sent_unsecured() {
    let transport = ScriptedTransport::new();
    transport
        .push_response(key_management_response("000000", "[EBICS_OK] OK").to_bytes())
        .await;
    transport
        .push_response(key_management_response("000000", "[EBICS_OK] OK").to_bytes())
        .await;
    let keyring = keyring_without_bank_keys();
    let client = client(&transport);

    let ini = client.ini(&keyring).await.unwrap();
    assert_eq!(ini.order_type, OrderType::Ini);
    assert_eq!(ini.outcome, OrderOutcome::Completed);
    assert_eq!(ini.return_code.as_str(), "000000");
    let hia = client.hia(&keyring).await.unwrap();
    assert_eq!(hia.order_type, OrderType::Hia);

    let requests: Vec<Element> = transport.requests().await.iter().map(parse_request).collect();
    assert!(requests.iter().all(|r| r.local_name() == "ebicsUnsecuredRequest"));
    assert!(requests.iter().all(|r| r.child("AuthSignature").is_none()));

    let ini_letter = key_letter(&requests[0]);
    assert_eq!(ini_letter.local_name(), "SignaturePubKeyOrderData");
    assert_eq!(
        ini_letter.find_text(&["SignaturePubKeyInfo", "SignatureVersion"]).as_deref(),
        Some("A006")
    );
    let modulus = ini_letter
        .find_text(&["SignaturePubKeyInfo", "PubKeyValue", "RSAKeyValue", "Modulus"])
        .unwrap();
    let (expected, _) = components(&public_key(&keyring, KeyRole::Signature));
    assert_eq!(STANDARD.decode(modulus).unwrap(), expected);

    let hia_letter = key_letter(&requests[1]);
    assert_eq!(hia_letter.local_name(), "HIARequestOrderData");
    assert_eq!(
        hia_letter
            .find_text(&["AuthenticationPubKeyInfo", "AuthenticationVersion"])
            .as_deref(),
        Some("X002")
    );
    assert_eq!(
        hia_letter.find_text(&["EncryptionPubKeyInfo", "EncryptionVersion"]).as_deref(),
        Some("E002")
    );
}

/// Base64 of the certificate attached to a user key.
fn encoded_certificate(keyring: &Keyring, role: KeyRole) -> String {
    STANDARD.encode(keyring.user_signature(role).unwrap().certificate().unwrap())
}

#[tokio::test]
async fn test_h005_key_letters_carry_certificates_only() {
    let transport = ScriptedTransport::new();
    transport
        .push_response(key_management_response("000000", "[EBICS_OK] OK").to_bytes())
        .await;
    transport
        .push_response(key_management_response("000000", "[EBICS_OK] OK").to_bytes())
        .await;
    let keyring = certified_keyring_without_bank_keys();
    assert!(keyring.is_certified());
    let client = client(&transport);

    client.ini(&keyring).await.unwrap();
    client.hia(&keyring).await.unwrap();

    let requests: Vec<Element> = transport.requests().await.iter().map(parse_request).collect();
    assert!(requests.iter().all(|r| r.local_name() == "ebicsUnsecuredRequest"));
    assert!(requests.iter().all(|r| r.attr("Version") == Some("H005")));
    assert_eq!(
        requests[1]
            .find_text(&["header", "static", "OrderDetails", "AdminOrderType"])
            .as_deref(),
        Some("HIA")
    );

    let ini_letter = key_letter(&requests[0]);
    assert_eq!(
        ini_letter.find_text(&["SignaturePubKeyInfo", "X509Data", "X509Certificate"]),
        Some(encoded_certificate(&keyring, KeyRole::Signature))
    );
    assert!(ini_letter.find(&["SignaturePubKeyInfo", "PubKeyValue"]).is_none());

    let hia_letter = key_letter(&requests[1]);
    assert_eq!(hia_letter.local_name(), "HIARequestOrderData");
    for (info, role) in [
        ("AuthenticationPubKeyInfo", KeyRole::Authentication),
        ("EncryptionPubKeyInfo", KeyRole::Encryption),
    ] {
        assert_eq!(
            hia_letter.find_text(&[info, "X509Data", "X509Certificate"]),
            Some(encoded_certificate(&keyring, role)),
            "{info}"
        );
        assert!(hia_letter.find(&[info, "PubKeyValue"]).is_none(), "{info}");
    }
}

#[tokio::test]
async fn test_h3k_sends_all_certificates_signed() {
    let transport = ScriptedTransport::new();
    transport
        .push_response(key_management_response("000000", "[EBICS_OK] OK").to_bytes())
        .await;
    let keyring = certified_keyring_without_bank_keys();

    let result = client(&transport).h3k(&keyring).await.unwrap();
    assert_eq!(result.order_type, OrderType::H3k);
    assert_eq!(result.outcome, OrderOutcome::Completed);

    let request = parse_request(&transport.requests().await[0]);
    assert_eq!(request.local_name(), "ebicsUnsignedRequest");
    assert!(request.child("AuthSignature").is_none());
    assert_eq!(
        request
            .find_text(&["header", "static", "OrderDetails", "AdminOrderType"])
            .as_deref(),
        Some("H3K")
    );

    let order_bytes = inflate(&request, "OrderData");
    let letter = xml::parse(&order_bytes).unwrap();
    assert_eq!(letter.local_name(), "H3KRequestOrderData");
    for (info, role) in [
        ("SignatureCertificateInfo", KeyRole::Signature),
        ("AuthenticationCertificateInfo", KeyRole::Authentication),
        ("EncryptionCertificateInfo", KeyRole::Encryption),
    ] {
        assert_eq!(
            letter.find_text(&[info, "X509Data", "X509Certificate"]),
            Some(encoded_certificate(&keyring, role)),
            "{info}"
        );
    }
    assert_eq!(
        letter.find_text(&["SignatureCertificateInfo", "SignatureVersion"]).as_deref(),
        Some("A006")
    );

    let signature_data = xml::parse(&inflate(&request, "SignatureData")).unwrap();
    assert_eq!(signature_data.local_name(), "UserSignatureData");
    let value = signature_data
        .find_text(&["OrderSignatureData", "SignatureValue"])
        .unwrap();
    assert!(crypto::verify(
        &public_key(&keyring, KeyRole::Signature),
        KeyVersion::A006,
        &order_bytes,
        &STANDARD.decode(value).unwrap()
    ));
}

#[tokio::test]
async fn test_h3k_needs_a_certified_keyring() {
    let transport = ScriptedTransport::new();
    let mut record = KeyringRecord::from_keyring(&keyring_without_bank_keys());
    record.version = ProtocolVersion::H005;
    let profile = ConnectionProfile::new(ProtocolVersion::H005, KeyVersion::A006).unwrap();
    let uncertified = record.into_keyring(profile, PASSWORD).unwrap();

    let err = client(&transport).h3k(&uncertified).await.unwrap_err();
    assert!(matches!(err, EbicsError::UnsupportedOperationError(_)), "{err:?}");
    assert!(transport.requests().await.is_empty());
}

#[tokio::test]
async fn test_hpb_certificates_drive_the_bank_key_digests() {
    let transport = ScriptedTransport::new();
    let mut keyring = certified_keyring_without_bank_keys();
    transport.push_response(certified_hpb_response(&keyring).to_bytes()).await;
    transport
        .push_response(code_response("090005", "[EBICS_NO_DOWNLOAD_DATA_AVAILABLE] No data").to_bytes())
        .await;
    let client = client(&transport);

    let keys = client.hpb(&mut keyring).await.unwrap();
    let f = fixture();
    assert_eq!(keys.authentication.certificate(), Some(f.bank_authentication.certificate.as_slice()));
    let installed = keyring.bank_signature(KeyRole::Encryption).unwrap();
    assert_eq!(installed.certificate(), Some(f.bank_encryption.certificate.as_slice()));
    assert_eq!(components(installed.public_key()), components(&f.bank_encryption.public_key));

    let result = client.htd(&keyring).await.unwrap();
    assert_eq!(result.outcome, OrderOutcome::NoData);

    let requests = transport.requests().await;
    let hpb = parse_request(&requests[0]);
    assert_eq!(hpb.local_name(), "ebicsNoPubKeyDigestsRequest");
    let htd = parse_request(&requests[1]);
    let digests = htd.find(&["header", "static", "BankPubKeyDigests"]).unwrap();
    let authentication = digests.child("Authentication").unwrap().text();
    assert_eq!(
        authentication,
        crypto::calculate_certificate_fingerprint(&f.bank_authentication.certificate)
    );
    assert_ne!(
        authentication,
        crypto::calculate_public_key_digest(&f.bank_authentication.public_key).unwrap()
    );
    assert_eq!(
        digests.child("Encryption").unwrap().text(),
        crypto::calculate_certificate_fingerprint(&f.bank_encryption.certificate)
    );
}

#[tokio::test]
async fn test_rejected_key_letter_is_an_error() {
    let transport = ScriptedTransport::new();
    transport
        .push_response(key_management_response("091002", "[EBICS_INVALID_USER_OR_USER_STATE] Unknown").to_bytes())
        .await;

    let err = client(&transport)
        .ini(&keyring_without_bank_keys())
        .await
        .unwrap_err();
    assert!(err.is_activation_pending());
}

#[tokio::test]
async fn test_key_letters_need_user_keys() {
    let transport = ScriptedTransport::new();
    let profile = ConnectionProfile::new(ProtocolVersion::H004, KeyVersion::A006).unwrap();
    let empty = Keyring::new(profile, PASSWORD);

    let err = client(&transport).hia(&empty).await.unwrap_err();
    assert!(matches!(err, EbicsError::SignatureMissingError { .. }));
    assert!(transport.requests().await.is_empty());
}

#[tokio::test]
async fn test_hpb_installs_bank_keys() {
    let transport = ScriptedTransport::new();
    let mut keyring = keyring_without_bank_keys();
    transport.push_response(hpb_response(&keyring).to_bytes()).await;

    let keys = client(&transport).hpb(&mut keyring).await.unwrap();
    assert_eq!(keys.authentication.version(), KeyVersion::X002);
    assert_eq!(keys.encryption.version(), KeyVersion::E002);

    let f = fixture();
    let installed = keyring.bank_signature(KeyRole::Authentication).unwrap();
    assert_eq!(
        components(installed.public_key()),
        components(&f.bank_authentication.public_key)
    );
    let installed = keyring.bank_signature(KeyRole::Encryption).unwrap();
    assert_eq!(components(installed.public_key()), components(&f.bank_encryption.public_key));

    let request = parse_request(&transport.requests().await[0]);
    assert_eq!(request.local_name(), "ebicsNoPubKeyDigestsRequest");
    assert!(request.child("AuthSignature").is_some());
    assert_eq!(
        request.find_text(&["header", "static", "OrderDetails", "OrderType"]).as_deref(),
        Some("HPB")
    );
}

#[tokio::test]
async fn test_failed_hpb_leaves_keyring_untouched() {
    let transport = ScriptedTransport::new();
    transport
        .push_response(key_management_response("091002", "[EBICS_INVALID_USER_OR_USER_STATE] Unknown").to_bytes())
        .await;
    let mut keyring = keyring_without_bank_keys();

    let err = client(&transport).hpb(&mut keyring).await.unwrap_err();
    assert!(err.is_activation_pending());
    assert!(!keyring.has_bank_signature(KeyRole::Authentication));
    assert!(!keyring.has_bank_signature(KeyRole::Encryption));
}

#[tokio::test]
async fn test_hcs_replaces_user_keys_once_accepted() {
    let transport = ScriptedTransport::new();
    transport
        .push_response(upload_response("TX-HCS", Some("N0K4")).to_bytes())
        .await;
    transport.push_response(upload_response("TX-HCS", None).to_bytes()).await;
    let mut keyring = keyring();
    let before: Vec<_> = KeyRole::ALL.iter().map(|r| public_key(&keyring, *r)).collect();

    let result = client(&transport).hcs(&mut keyring).await.unwrap();
    assert_eq!(result.order_type, OrderType::Hcs);
    assert_eq!(result.order_id.as_deref(), Some("N0K4"));

    for (role, old) in KeyRole::ALL.iter().zip(&before) {
        let key = keyring.user_signature(*role).unwrap();
        assert_ne!(key.public_key(), old.as_slice(), "{role:?}");
        assert!(key.private_key().is_some());
    }
    let init = parse_request(&transport.requests().await[0]);
    assert_eq!(
        init.find_text(&["header", "static", "OrderDetails", "OrderType"]).as_deref(),
        Some("HCS")
    );
}

#[tokio::test]
async fn test_rejected_hcs_keeps_current_keys() {
    let transport = ScriptedTransport::new();
    transport
        .push_response(code_response("090003", "[EBICS_AUTHORISATION_ORDER_TYPE_FAILED] Not allowed").to_bytes())
        .await;
    let mut keyring = keyring();
    let before: Vec<_> = KeyRole::ALL.iter().map(|r| public_key(&keyring, *r)).collect();

    let err = client(&transport).hcs(&mut keyring).await.unwrap_err();
    assert_eq!(err.return_code().map(|c| c.as_str()), Some("090003"));
    let after: Vec<_> = KeyRole::ALL.iter().map(|r| public_key(&keyring, *r)).collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_keyring_survives_the_store() {
    let store = InMemoryKeyringStore::new();
    let keyring = keyring();
    let record = KeyringRecord::from_keyring(&keyring);
    store.save("PARTNER/USER", record.clone()).await.unwrap();

    let loaded = store.load("PARTNER/USER").await.unwrap().unwrap();
    assert_eq!(loaded, record);
    let restored = loaded.into_keyring(keyring.profile(), PASSWORD).unwrap();
    assert_eq!(KeyringRecord::from_keyring(&restored), record);
    assert!(restored.has_bank_signature(KeyRole::Encryption));
    assert!(store.load("OTHER/USER").await.unwrap().is_none());
}

#[test]
fn test_certified_keyring_survives_the_record() {
    let keyring = certified_keyring_without_bank_keys();
    let record = KeyringRecord::from_keyring(&keyring);
    let restored = record.clone().into_keyring(keyring.profile(), PASSWORD).unwrap();
    assert!(restored.is_certified());
    assert_eq!(KeyringRecord::from_keyring(&restored), record);
}

#[tokio::test]
async fn test_hev_lists_versions() {
    let transport = ScriptedTransport::new();
    transport
        .push_response(
            r#"<ebicsHEVResponse xmlns="http://www.ebics.org/H000">
<SystemReturnCode><ReturnCode>000000</ReturnCode><ReportText>[EBICS_OK] OK</ReportText></SystemReturnCode>
<VersionNumber ProtocolVersion="H004">02.50</VersionNumber>
<VersionNumber ProtocolVersion="H005">03.00</VersionNumber>
<VersionNumber ProtocolVersion="H006">04.00</VersionNumber>
</ebicsHEVResponse>"#,
        )
        .await;

    let versions = client(&transport).hev().await.unwrap();
    let protocols: Vec<_> = versions.iter().map(|v| v.protocol).collect();
    assert_eq!(
        protocols,
        [Some(ProtocolVersion::H004), Some(ProtocolVersion::H005), None]
    );
    assert_eq!(versions[1].version, "03.00");

    let request = parse_request(&transport.requests().await[0]);
    assert_eq!(request.local_name(), "ebicsHEVRequest");
    assert_eq!(request.find_text(&["HostID"]).as_deref(), Some("HOST"));
}
