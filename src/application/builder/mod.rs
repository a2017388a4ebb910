//! RequestBuilder: assembles complete request documents.
//!
//! Documents are plain element trees built bottom-up. The authentication
//! signature is always the last step, after the whole document exists.

pub mod order_data;
pub mod strategy;

use crate::application::catalog::{Flow, OrderDescriptor};
use crate::application::context::RequestContext;
use crate::domain::keyring::{KeyOwner, KeyRole};
use crate::domain::order::OrderType;
use crate::domain::ports::PayloadCodec;
use crate::domain::protocol::ProtocolVersion;
use crate::domain::transaction::{TransactionId, UploadTransaction};
use crate::error::{EbicsError, Result};
use crate::infrastructure::crypto;
use crate::interfaces::xml::Element;
use crate::interfaces::xml::dsig::{self, DIGEST_ALGORITHM, DSIG_NAMESPACE};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use strategy::{ProtocolStrategy, strategy_for};

pub const HEV_NAMESPACE: &str = "http://www.ebics.org/H000";
const SECURITY_MEDIUM: &str = "0000";

/// Signature-only orders sign a single blank as their order data.
pub const SIGNATURE_ONLY_ORDER_DATA: &[u8] = b" ";

pub struct RequestBuilder<'a> {
    strategy: &'static dyn ProtocolStrategy,
    codec: &'a dyn PayloadCodec,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(protocol: ProtocolVersion, codec: &'a dyn PayloadCodec) -> Self {
        Self {
            strategy: strategy_for(protocol),
            codec,
        }
    }

    pub fn strategy(&self) -> &'static dyn ProtocolStrategy {
        self.strategy
    }

    /// The version probe. It needs no keyring and is the same for every
    /// generation.
    pub fn hev(host_id: &str) -> Element {
        Element::new("ebicsHEVRequest")
            .with_attr("xmlns", HEV_NAMESPACE)
            .with_child(Element::text_element("HostID", host_id))
    }

    fn root(&self, name: &str) -> Element {
        let version = self.strategy.version();
        Element::new(name)
            .with_attr("xmlns", version.namespace())
            .with_attr("xmlns:ds", DSIG_NAMESPACE)
            .with_attr("Version", version.as_str())
            .with_attr("Revision", version.revision())
    }

    fn product(ctx: &RequestContext<'_>) -> Element {
        Element::new("Product")
            .with_attr("Language", ctx.product.language.as_str())
            .with_text(ctx.product.name.as_str())
    }

    fn host_id(ctx: &RequestContext<'_>) -> Element {
        Element::text_element("HostID", ctx.bank.host_id.as_str())
    }

    fn bank_pub_key_digests(ctx: &RequestContext<'_>) -> Result<Element> {
        let authentication = ctx.keyring.bank_signature(KeyRole::Authentication)?;
        let encryption = ctx.keyring.bank_signature(KeyRole::Encryption)?;
        Ok(Element::new("BankPubKeyDigests")
            .with_child(
                Element::new("Authentication")
                    .with_attr("Version", authentication.version().as_str())
                    .with_attr("Algorithm", DIGEST_ALGORITHM)
                    .with_text(ctx.keyring.key_digest(authentication)?),
            )
            .with_child(
                Element::new("Encryption")
                    .with_attr("Version", encryption.version().as_str())
                    .with_attr("Algorithm", DIGEST_ALGORITHM)
                    .with_text(ctx.keyring.key_digest(encryption)?),
            ))
    }

    /// `static` header of initialisation requests. Key management requests
    /// leave out the bank key digests; unsecured ones also the nonce.
    fn initialisation_static(
        &self,
        ctx: &RequestContext<'_>,
        descriptor: &OrderDescriptor,
        with_nonce: bool,
        num_segments: Option<u32>,
    ) -> Result<Element> {
        let mut header = Element::new("static").with_child(Self::host_id(ctx));
        if with_nonce {
            header = header
                .with_child(Element::text_element("Nonce", ctx.nonce.as_str()))
                .with_child(Element::text_element("Timestamp", ctx.timestamp_text()));
        }
        header = header
            .with_child(Element::text_element("PartnerID", ctx.user.partner_id.as_str()))
            .with_child(Element::text_element("UserID", ctx.user.user_id.as_str()))
            .with_child(Self::product(ctx))
            .with_child(self.strategy.build_order_details(ctx, descriptor)?);
        if descriptor.is_secured() {
            header = header.with_child(Self::bank_pub_key_digests(ctx)?);
        }
        Ok(header
            .with_child(Element::text_element("SecurityMedium", SECURITY_MEDIUM))
            .with_optional_child(num_segments.map(|n| Element::text_element("NumSegments", n.to_string()))))
    }

    fn header(static_header: Element, mutable_header: Element) -> Element {
        Element::new("header")
            .with_attr("authenticate", "true")
            .with_child(static_header)
            .with_child(mutable_header)
    }

    fn phase(phase: &str) -> Element {
        Element::new("mutable").with_child(Element::text_element("TransactionPhase", phase))
    }

    fn transaction_static(ctx: &RequestContext<'_>) -> Result<Element> {
        let transaction_id = Self::transaction_id(ctx)?;
        Ok(Element::new("static")
            .with_child(Self::host_id(ctx))
            .with_child(Element::text_element("TransactionID", transaction_id.as_str())))
    }

    fn transaction_id<'c>(ctx: &'c RequestContext<'_>) -> Result<&'c TransactionId> {
        ctx.transaction_id.as_ref().ok_or_else(|| {
            EbicsError::ValidationError(format!("{} has no transaction yet", ctx.order_type))
        })
    }

    fn segment(ctx: &RequestContext<'_>) -> Result<Element> {
        let number = ctx.segment_number.ok_or_else(|| {
            EbicsError::ValidationError(format!("{} transfer without segment number", ctx.order_type))
        })?;
        Ok(Element::new("SegmentNumber")
            .with_attr("lastSegment", ctx.last_segment.to_string())
            .with_text(number.to_string()))
    }

    /// Signs the finished document with the user's X002 key.
    fn authenticate(&self, ctx: &RequestContext<'_>, document: Element) -> Result<Element> {
        let key = ctx.keyring.user_signature(KeyRole::Authentication)?;
        let private_key = key
            .private_key()
            .ok_or_else(|| EbicsError::signature_missing(KeyOwner::User, KeyRole::Authentication))?;
        dsig::sign(document, private_key, ctx.keyring.password())
    }

    fn electronic_signature(ctx: &RequestContext<'_>, data: &[u8]) -> Result<Element> {
        let key = ctx.keyring.user_signature(KeyRole::Signature)?;
        let private_key = key
            .private_key()
            .ok_or_else(|| EbicsError::signature_missing(KeyOwner::User, KeyRole::Signature))?;
        let signature = crypto::sign(private_key, ctx.keyring.password(), key.version(), data)?;
        order_data::user_signature_data(ctx, &signature)
    }

    fn compressed(document: &Element) -> Result<String> {
        Ok(STANDARD.encode(crypto::compress(&document.to_bytes())?))
    }

    /// INI, HIA and H3K. INI/HIA are unsecured; H3K is unsigned but carries
    /// an electronic signature over its order data.
    pub fn key_submission(&self, ctx: &RequestContext<'_>, descriptor: &OrderDescriptor) -> Result<Element> {
        let static_header = self.initialisation_static(ctx, descriptor, false, None)?;
        let header = Self::header(static_header, Element::new("mutable"));

        let (root, data_transfer) = match descriptor.order_type {
            OrderType::Ini => {
                let order_data = order_data::signature_pub_key_order_data(self.strategy, ctx)?;
                (
                    "ebicsUnsecuredRequest",
                    Element::new("DataTransfer")
                        .with_child(Element::text_element("OrderData", Self::compressed(&order_data)?)),
                )
            }
            OrderType::Hia => {
                let order_data = order_data::hia_request_order_data(self.strategy, ctx)?;
                (
                    "ebicsUnsecuredRequest",
                    Element::new("DataTransfer")
                        .with_child(Element::text_element("OrderData", Self::compressed(&order_data)?)),
                )
            }
            OrderType::H3k => {
                let order_data = order_data::h3k_request_order_data(self.strategy, ctx)?.to_bytes();
                let signature = Self::electronic_signature(ctx, &order_data)?;
                (
                    "ebicsUnsignedRequest",
                    Element::new("DataTransfer")
                        .with_child(
                            Element::new("SignatureData")
                                .with_attr("authenticate", "true")
                                .with_text(Self::compressed(&signature)?),
                        )
                        .with_child(Element::text_element(
                            "OrderData",
                            STANDARD.encode(crypto::compress(&order_data)?),
                        )),
                )
            }
            other => {
                return Err(EbicsError::UnsupportedOperationError(format!(
                    "{other} is not a key submission"
                )));
            }
        };

        Ok(self
            .root(root)
            .with_child(header)
            .with_child(Element::new("body").with_child(data_transfer)))
    }

    /// HPB: signed, but without bank key digests since the bank keys are what
    /// is being fetched.
    pub fn key_download(&self, ctx: &RequestContext<'_>, descriptor: &OrderDescriptor) -> Result<Element> {
        let static_header = self.initialisation_static(ctx, descriptor, true, None)?;
        let document = self
            .root("ebicsNoPubKeyDigestsRequest")
            .with_child(Self::header(static_header, Element::new("mutable")))
            .with_child(Element::new("body"));
        self.authenticate(ctx, document)
    }

    pub fn download_init(&self, ctx: &RequestContext<'_>, descriptor: &OrderDescriptor) -> Result<Element> {
        let static_header = self.initialisation_static(ctx, descriptor, true, None)?;
        let document = self
            .root("ebicsRequest")
            .with_child(Self::header(static_header, Self::phase("Initialisation")))
            .with_child(Element::new("body"));
        self.authenticate(ctx, document)
    }

    pub fn download_transfer(&self, ctx: &RequestContext<'_>) -> Result<Element> {
        let mutable_header = Self::phase("Transfer").with_child(Self::segment(ctx)?);
        let document = self
            .root("ebicsRequest")
            .with_child(Self::header(Self::transaction_static(ctx)?, mutable_header))
            .with_child(Element::new("body"));
        self.authenticate(ctx, document)
    }

    /// Receipt code 0 acknowledges the download, 1 declines it.
    pub fn receipt(&self, ctx: &RequestContext<'_>, positive: bool) -> Result<Element> {
        let code = if positive { "0" } else { "1" };
        let body = Element::new("body").with_child(
            Element::new("TransferReceipt")
                .with_attr("authenticate", "true")
                .with_child(Element::text_element("ReceiptCode", code)),
        );
        let document = self
            .root("ebicsRequest")
            .with_child(Self::header(Self::transaction_static(ctx)?, Self::phase("Receipt")))
            .with_child(body);
        self.authenticate(ctx, document)
    }

    /// Initialisation of an upload: the order data is signed with the user's
    /// A key, the transaction key is wrapped for the bank and the signature
    /// (and later the order data) is sealed with it.
    pub fn upload_init(
        &self,
        ctx: &RequestContext<'_>,
        descriptor: &OrderDescriptor,
        order_data: &[u8],
    ) -> Result<(Element, UploadTransaction)> {
        let bank_encryption = ctx.keyring.bank_signature(KeyRole::Encryption)?;
        let signature_only = descriptor.flow == Flow::SignatureOnly;
        let signed_data = if signature_only {
            SIGNATURE_ONLY_ORDER_DATA
        } else {
            order_data
        };

        let transaction_key = self.codec.generate_key();
        let wrapped_key = self.codec.wrap_key(bank_encryption.public_key(), &transaction_key)?;
        let signature = Self::electronic_signature(ctx, signed_data)?;
        let signature_data = self.codec.seal(&transaction_key, &signature.to_bytes())?;
        let encrypted_payload = if signature_only {
            Vec::new()
        } else {
            self.codec.seal(&transaction_key, order_data)?
        };
        let upload = UploadTransaction::new(descriptor.order_type, transaction_key, encrypted_payload)?;

        let static_header =
            self.initialisation_static(ctx, descriptor, true, Some(upload.num_segments()))?;
        let data_transfer = Element::new("DataTransfer")
            .with_child(
                Element::new("DataEncryptionInfo")
                    .with_attr("authenticate", "true")
                    .with_child(
                        Element::new("EncryptionPubKeyDigest")
                            .with_attr("Version", bank_encryption.version().as_str())
                            .with_attr("Algorithm", DIGEST_ALGORITHM)
                            .with_text(ctx.keyring.key_digest(bank_encryption)?),
                    )
                    .with_child(Element::text_element("TransactionKey", STANDARD.encode(wrapped_key))),
            )
            .with_child(
                Element::new("SignatureData")
                    .with_attr("authenticate", "true")
                    .with_text(STANDARD.encode(signature_data)),
            )
            .with_children(self.strategy.build_upload_extras(ctx, signed_data));

        let document = self
            .root("ebicsRequest")
            .with_child(Self::header(static_header, Self::phase("Initialisation")))
            .with_child(Element::new("body").with_child(data_transfer));
        Ok((self.authenticate(ctx, document)?, upload))
    }

    /// The single transfer segment of an upload.
    pub fn upload_transfer(&self, ctx: &RequestContext<'_>, upload: &UploadTransaction) -> Result<Element> {
        let mutable_header = Self::phase("Transfer").with_child(Self::segment(ctx)?);
        let body = Element::new("body").with_child(
            Element::new("DataTransfer")
                .with_child(Element::text_element("OrderData", upload.segment_chunk())),
        );
        let document = self
            .root("ebicsRequest")
            .with_child(Self::header(Self::transaction_static(ctx)?, mutable_header))
            .with_child(body);
        self.authenticate(ctx, document)
    }
}
