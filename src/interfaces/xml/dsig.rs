//! The EBICS `AuthSignature`: an XMLDSig signature (X002) whose single
//! reference covers every element carrying `authenticate="true"`.

use super::c14n::{self, NamespaceScope};
use super::document::Element;
use crate::domain::protocol::KeyVersion;
use crate::error::{EbicsError, Result};
use crate::infrastructure::crypto;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub const DSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const SIGNATURE_ALGORITHM: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const DIGEST_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const AUTH_REFERENCE_URI: &str = "#xpointer(//*[@authenticate='true'])";

const AUTH_SIGNATURE: &str = "AuthSignature";

fn is_authenticated(element: &Element) -> bool {
    element.attr("authenticate") == Some("true")
}

/// SHA-256 over the canonical forms of all authenticated elements.
pub fn authenticated_digest(document: &Element) -> [u8; 32] {
    let input = c14n::canonicalize_matching(document, is_authenticated);
    crypto::digest(input.as_bytes())
}

fn signed_info(digest: &str) -> Element {
    Element::new("ds:SignedInfo")
        .with_child(Element::new("ds:CanonicalizationMethod").with_attr("Algorithm", C14N_ALGORITHM))
        .with_child(Element::new("ds:SignatureMethod").with_attr("Algorithm", SIGNATURE_ALGORITHM))
        .with_child(
            Element::new("ds:Reference")
                .with_attr("URI", AUTH_REFERENCE_URI)
                .with_child(
                    Element::new("ds:Transforms").with_child(
                        Element::new("ds:Transform").with_attr("Algorithm", C14N_ALGORITHM),
                    ),
                )
                .with_child(Element::new("ds:DigestMethod").with_attr("Algorithm", DIGEST_ALGORITHM))
                .with_child(Element::text_element("ds:DigestValue", digest)),
        )
}

/// Signs a fully assembled request and inserts the `AuthSignature` right after
/// its `header`. The root must declare the `ds` prefix.
pub fn sign(document: Element, private_key: &[u8], password: &str) -> Result<Element> {
    let digest = STANDARD.encode(authenticated_digest(&document));
    let signed_info = signed_info(&digest);

    let scope = c14n::scope_of(&document, &NamespaceScope::new());
    let canonical = c14n::canonicalize_in_scope(&signed_info, &scope);
    let signature = crypto::sign(private_key, password, KeyVersion::X002, canonical.as_bytes())?;

    let auth_signature = Element::new(AUTH_SIGNATURE)
        .with_child(signed_info)
        .with_child(Element::text_element("ds:SignatureValue", STANDARD.encode(signature)));
    Ok(document.with_child_after("header", auth_signature))
}

fn decode(value: &str, what: &str) -> Result<Vec<u8>> {
    let compact: String = value.split_whitespace().collect();
    STANDARD
        .decode(compact)
        .map_err(|e| EbicsError::ProtocolViolationError(format!("{what} is not valid base64: {e}")))
}

/// Checks the `AuthSignature` of a bank response against the bank's X002 key.
pub fn verify(document: &Element, public_key: &[u8]) -> Result<()> {
    let violation = |message: &str| EbicsError::ProtocolViolationError(message.to_string());

    let auth_signature = document
        .child(AUTH_SIGNATURE)
        .ok_or_else(|| violation("response carries no AuthSignature"))?;
    let signed_info = auth_signature
        .child("SignedInfo")
        .ok_or_else(|| violation("AuthSignature has no SignedInfo"))?;

    let declared = signed_info
        .find_text(&["Reference", "DigestValue"])
        .ok_or_else(|| violation("AuthSignature has no DigestValue"))?;
    let declared = decode(&declared, "DigestValue")?;
    if declared != authenticated_digest(document) {
        return Err(violation("authenticated content does not match the AuthSignature digest"));
    }

    let signature = auth_signature
        .find_text(&["SignatureValue"])
        .ok_or_else(|| violation("AuthSignature has no SignatureValue"))?;
    let signature = decode(&signature, "SignatureValue")?;

    let document_scope = c14n::scope_of(document, &NamespaceScope::new());
    let scope = c14n::scope_of(auth_signature, &document_scope);
    let canonical = c14n::canonicalize_in_scope(signed_info, &scope);
    if !crypto::verify(public_key, KeyVersion::X002, canonical.as_bytes(), &signature) {
        return Err(violation("bank authentication signature is invalid"));
    }
    Ok(())
}
