//! Order data documents of the key management orders and the user signature
//! document embedded in signed uploads.

use super::strategy::ProtocolStrategy;
use crate::application::context::RequestContext;
use crate::domain::keyring::{KeyRole, UserKeySet};
use crate::error::Result;
use crate::interfaces::xml::Element;
use crate::interfaces::xml::dsig::DSIG_NAMESPACE;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

fn identification(ctx: &RequestContext<'_>) -> [Element; 2] {
    [
        Element::text_element("PartnerID", ctx.user.partner_id.as_str()),
        Element::text_element("UserID", ctx.user.user_id.as_str()),
    ]
}

fn signature_root(name: &str, ctx: &RequestContext<'_>) -> Element {
    Element::new(name)
        .with_attr("xmlns", ctx.keyring.version().signature_namespace())
        .with_attr("xmlns:ds", DSIG_NAMESPACE)
}

fn protocol_root(name: &str, ctx: &RequestContext<'_>) -> Element {
    Element::new(name)
        .with_attr("xmlns", ctx.keyring.version().namespace())
        .with_attr("xmlns:ds", DSIG_NAMESPACE)
}

/// `UserSignatureData` carrying one electronic signature over the order data.
pub fn user_signature_data(ctx: &RequestContext<'_>, signature: &[u8]) -> Result<Element> {
    let version = ctx.keyring.user_signature(KeyRole::Signature)?.version();
    Ok(signature_root("UserSignatureData", ctx).with_child(
        Element::new("OrderSignatureData")
            .with_child(Element::text_element("SignatureVersion", version.as_str()))
            .with_child(Element::text_element("SignatureValue", STANDARD.encode(signature)))
            .with_children(identification(ctx)),
    ))
}

/// INI order data.
pub fn signature_pub_key_order_data(strategy: &dyn ProtocolStrategy, ctx: &RequestContext<'_>) -> Result<Element> {
    let key = ctx.keyring.user_signature(KeyRole::Signature)?;
    let info = strategy.build_key_info("SignaturePubKeyInfo", key, "SignatureVersion", ctx)?;
    Ok(signature_root("SignaturePubKeyOrderData", ctx)
        .with_child(info)
        .with_children(identification(ctx)))
}

/// HIA order data.
pub fn hia_request_order_data(strategy: &dyn ProtocolStrategy, ctx: &RequestContext<'_>) -> Result<Element> {
    let authentication = ctx.keyring.user_signature(KeyRole::Authentication)?;
    let encryption = ctx.keyring.user_signature(KeyRole::Encryption)?;
    Ok(protocol_root("HIARequestOrderData", ctx)
        .with_child(strategy.build_key_info(
            "AuthenticationPubKeyInfo",
            authentication,
            "AuthenticationVersion",
            ctx,
        )?)
        .with_child(strategy.build_key_info(
            "EncryptionPubKeyInfo",
            encryption,
            "EncryptionVersion",
            ctx,
        )?)
        .with_children(identification(ctx)))
}

/// H3K order data: all three certificates at once.
pub fn h3k_request_order_data(strategy: &dyn ProtocolStrategy, ctx: &RequestContext<'_>) -> Result<Element> {
    let keyring = ctx.keyring;
    Ok(protocol_root("H3KRequestOrderData", ctx)
        .with_child(strategy.build_key_info(
            "SignatureCertificateInfo",
            keyring.user_signature(KeyRole::Signature)?,
            "SignatureVersion",
            ctx,
        )?)
        .with_child(strategy.build_key_info(
            "AuthenticationCertificateInfo",
            keyring.user_signature(KeyRole::Authentication)?,
            "AuthenticationVersion",
            ctx,
        )?)
        .with_child(strategy.build_key_info(
            "EncryptionCertificateInfo",
            keyring.user_signature(KeyRole::Encryption)?,
            "EncryptionVersion",
            ctx,
        )?)
        .with_children(identification(ctx)))
}

/// HCS order data announcing a complete replacement key set.
pub fn hcs_request_order_data(
    strategy: &dyn ProtocolStrategy,
    ctx: &RequestContext<'_>,
    keys: &UserKeySet,
) -> Result<Element> {
    let signature_info = strategy
        .build_key_info("SignaturePubKeyInfo", &keys.signature, "SignatureVersion", ctx)?
        .with_attr("xmlns", ctx.keyring.version().signature_namespace());

    Ok(protocol_root("HCSRequestOrderData", ctx)
        .with_child(strategy.build_key_info(
            "AuthenticationPubKeyInfo",
            &keys.authentication,
            "AuthenticationVersion",
            ctx,
        )?)
        .with_child(strategy.build_key_info(
            "EncryptionPubKeyInfo",
            &keys.encryption,
            "EncryptionVersion",
            ctx,
        )?)
        .with_child(signature_info)
        .with_children(identification(ctx)))
}
