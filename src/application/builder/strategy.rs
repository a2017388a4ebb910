//! Per-generation request shaping. Every difference between H003, H004 and
//! H005 documents lives behind [`ProtocolStrategy`]; the builder itself is
//! shared.

use crate::application::catalog::{Flow, OrderDescriptor, ParameterShape};
use crate::application::context::RequestContext;
use crate::domain::keyring::KeyMaterial;
use crate::domain::order::{BusinessService, DateRange};
use crate::domain::protocol::ProtocolVersion;
use crate::error::{EbicsError, Result};
use crate::infrastructure::crypto;
use crate::interfaces::xml::Element;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub trait ProtocolStrategy: Send + Sync {
    fn version(&self) -> ProtocolVersion;

    /// `<OrderDetails>` of an initialisation or key management request.
    fn build_order_details(&self, ctx: &RequestContext<'_>, descriptor: &OrderDescriptor) -> Result<Element>;

    /// A public key description (`SignaturePubKeyInfo`, `AuthenticationPubKeyInfo`,
    /// `EncryptionCertificateInfo`, ...) inside key management order data.
    fn build_key_info(
        &self,
        element: &str,
        key: &KeyMaterial,
        version_element: &str,
        ctx: &RequestContext<'_>,
    ) -> Result<Element>;

    /// Extra `DataTransfer` children of a signed upload.
    fn build_upload_extras(&self, ctx: &RequestContext<'_>, order_data: &[u8]) -> Vec<Element>;
}

pub fn strategy_for(version: ProtocolVersion) -> &'static dyn ProtocolStrategy {
    match version {
        ProtocolVersion::H003 => &H003Strategy,
        ProtocolVersion::H004 => &H004Strategy,
        ProtocolVersion::H005 => &H005Strategy,
    }
}

fn date_range(range: &DateRange) -> Element {
    Element::new("DateRange")
        .with_child(Element::text_element("Start", range.start().format("%Y-%m-%d").to_string()))
        .with_child(Element::text_element("End", range.end().format("%Y-%m-%d").to_string()))
}

fn x509_data(certificate: &[u8]) -> Element {
    Element::new("ds:X509Data")
        .with_child(Element::text_element("ds:X509Certificate", STANDARD.encode(certificate)))
}

fn rsa_key_value(key: &KeyMaterial) -> Result<Element> {
    let (modulus, exponent) = crypto::public_key_components(key.public_key())?;
    Ok(Element::new("ds:RSAKeyValue")
        .with_child(Element::text_element("ds:Modulus", STANDARD.encode(modulus)))
        .with_child(Element::text_element("ds:Exponent", STANDARD.encode(exponent))))
}

/// Optional date range, only for downloads.
fn download_range(ctx: &RequestContext<'_>, descriptor: &OrderDescriptor) -> Option<Element> {
    if descriptor.flow != Flow::Download {
        return None;
    }
    ctx.parameters.date_range.as_ref().map(date_range)
}

fn missing(what: &str, descriptor: &OrderDescriptor) -> EbicsError {
    EbicsError::ValidationError(format!("{} requires {what}", descriptor.order_type))
}

/// Order details shared by H003 and H004: `OrderType`, optional `OrderID`,
/// `OrderAttribute` and the order parameters.
fn classic_order_details(
    ctx: &RequestContext<'_>,
    descriptor: &OrderDescriptor,
    order_id: Option<&str>,
) -> Result<Element> {
    let details = Element::new("OrderDetails")
        .with_child(Element::text_element("OrderType", descriptor.order_type.as_str()))
        .with_optional_child(order_id.map(|id| Element::text_element("OrderID", id)))
        .with_child(Element::text_element("OrderAttribute", descriptor.order_attribute));

    let parameters = match descriptor.parameters {
        ParameterShape::None => None,
        ParameterShape::Standard => Some(Element::new("StandardOrderParams")),
        ParameterShape::DateRange => Some(
            Element::new("StandardOrderParams").with_optional_child(download_range(ctx, descriptor)),
        ),
        ParameterShape::FileFormat => {
            let format = ctx
                .parameters
                .file_format
                .as_deref()
                .ok_or_else(|| missing("a file format", descriptor))?;
            let mut file_format = Element::new("FileFormat");
            if let Some(country) = &ctx.bank.country_code {
                file_format = file_format.with_attr("CountryCode", country.as_str());
            }
            Some(
                Element::new(descriptor.parameters_element())
                    .with_optional_child(download_range(ctx, descriptor))
                    .with_child(file_format.with_text(format)),
            )
        }
        ParameterShape::BusinessService => {
            return Err(EbicsError::UnsupportedOperationError(format!(
                "{} needs business service parameters, which require H005",
                descriptor.order_type
            )));
        }
    };
    Ok(details.with_optional_child(parameters))
}

/// Only certified keyrings send certificates next to the raw key value.
fn classic_key_info(
    element: &str,
    key: &KeyMaterial,
    version_element: &str,
    ctx: &RequestContext<'_>,
) -> Result<Element> {
    let certificate = key.certificate().filter(|_| ctx.keyring.is_certified());
    Ok(Element::new(element)
        .with_optional_child(certificate.map(x509_data))
        .with_child(
            Element::new("PubKeyValue")
                .with_child(rsa_key_value(key)?)
                .with_child(Element::text_element("TimeStamp", ctx.timestamp_text())),
        )
        .with_child(Element::text_element(version_element, key.version().as_str())))
}

/// EBICS 2.4. Uploads and key management carry a client-generated `OrderID`.
pub struct H003Strategy;

impl ProtocolStrategy for H003Strategy {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::H003
    }

    fn build_order_details(&self, ctx: &RequestContext<'_>, descriptor: &OrderDescriptor) -> Result<Element> {
        let order_id = match descriptor.flow {
            Flow::Download | Flow::KeyDownload => None,
            _ => Some(ctx.order_id.as_deref().ok_or_else(|| {
                EbicsError::ValidationError(format!(
                    "{} requires an order id in H003",
                    descriptor.order_type
                ))
            })?),
        };
        classic_order_details(ctx, descriptor, order_id)
    }

    fn build_key_info(
        &self,
        element: &str,
        key: &KeyMaterial,
        version_element: &str,
        ctx: &RequestContext<'_>,
    ) -> Result<Element> {
        classic_key_info(element, key, version_element, ctx)
    }

    fn build_upload_extras(&self, _ctx: &RequestContext<'_>, _order_data: &[u8]) -> Vec<Element> {
        Vec::new()
    }
}

/// EBICS 2.5.
pub struct H004Strategy;

impl ProtocolStrategy for H004Strategy {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::H004
    }

    fn build_order_details(&self, ctx: &RequestContext<'_>, descriptor: &OrderDescriptor) -> Result<Element> {
        classic_order_details(ctx, descriptor, None)
    }

    fn build_key_info(
        &self,
        element: &str,
        key: &KeyMaterial,
        version_element: &str,
        ctx: &RequestContext<'_>,
    ) -> Result<Element> {
        classic_key_info(element, key, version_element, ctx)
    }

    fn build_upload_extras(&self, _ctx: &RequestContext<'_>, _order_data: &[u8]) -> Vec<Element> {
        Vec::new()
    }
}

/// EBICS 3.0: `AdminOrderType`, BTF services, certificate-only key exchange
/// and an explicit data digest on uploads.
pub struct H005Strategy;

impl H005Strategy {
    fn service(ctx: &RequestContext<'_>, service: &BusinessService) -> Element {
        let scope = service.scope.clone().or_else(|| ctx.bank.country_code.clone());
        let mut message = Element::new("MsgName");
        if let Some(version) = &service.message_version {
            message = message.with_attr("version", version.as_str());
        }

        Element::new("Service")
            .with_child(Element::text_element("ServiceName", service.service_name.as_str()))
            .with_optional_child(scope.map(|scope| Element::text_element("Scope", scope)))
            .with_optional_child(
                service
                    .service_option
                    .as_deref()
                    .map(|option| Element::text_element("ServiceOption", option)),
            )
            .with_optional_child(
                service
                    .container
                    .as_deref()
                    .map(|container| Element::new("Container").with_attr("containerType", container)),
            )
            .with_child(message.with_text(service.message_name.as_str()))
    }
}

impl ProtocolStrategy for H005Strategy {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::H005
    }

    fn build_order_details(&self, ctx: &RequestContext<'_>, descriptor: &OrderDescriptor) -> Result<Element> {
        let details = Element::new("OrderDetails")
            .with_child(Element::text_element("AdminOrderType", descriptor.order_type.as_str()));

        let parameters = match descriptor.parameters {
            ParameterShape::None => None,
            ParameterShape::Standard => Some(Element::new("StandardOrderParams")),
            ParameterShape::DateRange => Some(
                Element::new("StandardOrderParams").with_optional_child(download_range(ctx, descriptor)),
            ),
            ParameterShape::BusinessService => {
                let service = ctx
                    .parameters
                    .service
                    .as_ref()
                    .ok_or_else(|| missing("a business service", descriptor))?;
                let mut params = Element::new(descriptor.parameters_element());
                if descriptor.flow == Flow::Upload
                    && let Some(file_name) = &ctx.parameters.file_name
                {
                    params = params.with_attr("fileName", file_name.as_str());
                }
                Some(
                    params
                        .with_child(Self::service(ctx, service))
                        .with_optional_child(download_range(ctx, descriptor)),
                )
            }
            ParameterShape::FileFormat => {
                return Err(EbicsError::UnsupportedOperationError(format!(
                    "{} is replaced by BTD/BTU in H005",
                    descriptor.order_type
                )));
            }
        };
        Ok(details.with_optional_child(parameters))
    }

    fn build_key_info(
        &self,
        element: &str,
        key: &KeyMaterial,
        version_element: &str,
        ctx: &RequestContext<'_>,
    ) -> Result<Element> {
        if !ctx.keyring.is_certified() {
            return Err(EbicsError::UnsupportedOperationError(
                "H005 key exchange requires a certified keyring".to_string(),
            ));
        }
        let certificate = key.certificate().ok_or_else(|| {
            EbicsError::UnsupportedOperationError(format!(
                "H005 key exchange requires an X.509 certificate for the {} key",
                key.role()
            ))
        })?;
        Ok(Element::new(element)
            .with_child(x509_data(certificate))
            .with_child(Element::text_element(version_element, key.version().as_str())))
    }

    fn build_upload_extras(&self, ctx: &RequestContext<'_>, order_data: &[u8]) -> Vec<Element> {
        let signature_version = ctx.keyring.profile().signature_version;
        vec![
            Element::new("DataDigest")
                .with_attr("SignatureVersion", signature_version.as_str())
                .with_text(STANDARD.encode(crypto::digest(order_data))),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::catalog::OrderCatalog;
    use crate::domain::identity::{Bank, Product, User};
    use crate::domain::keyring::{KeyRole, Keyring};
    use crate::domain::order::{OrderParameters, OrderType};
    use crate::domain::protocol::{ConnectionProfile, KeyVersion};
    use chrono::NaiveDate;

    struct Fixture {
        bank: Bank,
        user: User,
        product: Product,
        keyring: Keyring,
    }

    fn fixture(protocol: ProtocolVersion) -> Fixture {
        let profile = ConnectionProfile::new(protocol, KeyVersion::A006).unwrap();
        Fixture {
            bank: Bank::new("HOST", "https://bank.example/ebics").with_country_code("FR"),
            user: User::new("PARTNER", "USER"),
            product: Product::default(),
            keyring: Keyring::new(profile, "pw"),
        }
    }

    fn context(f: &Fixture, order: OrderType, parameters: OrderParameters) -> RequestContext<'_> {
        RequestContext::new(&f.bank, &f.user, &f.product, &f.keyring, order).with_parameters(parameters)
    }

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_h004_file_download_details() {
        let f = fixture(ProtocolVersion::H004);
        let parameters = OrderParameters {
            date_range: Some(range()),
            file_format: Some("camt.xxx.cfonb120.stm".to_string()),
            ..Default::default()
        };
        let ctx = context(&f, OrderType::Fdl, parameters);
        let descriptor = OrderCatalog::descriptor(OrderType::Fdl).unwrap();

        let details = strategy_for(ProtocolVersion::H004)
            .build_order_details(&ctx, descriptor)
            .unwrap();
        assert_eq!(details.find_text(&["OrderType"]).as_deref(), Some("FDL"));
        assert_eq!(details.find_text(&["OrderAttribute"]).as_deref(), Some("DZHNN"));
        assert_eq!(
            details.find_text(&["FDLOrderParams", "DateRange", "Start"]).as_deref(),
            Some("2024-03-01")
        );
        let format = details.find(&["FDLOrderParams", "FileFormat"]).unwrap();
        assert_eq!(format.attr("CountryCode"), Some("FR"));
        assert!(details.child("OrderID").is_none());
    }

    #[test]
    fn test_h003_uploads_need_an_order_id() {
        let f = fixture(ProtocolVersion::H003);
        let parameters = OrderParameters {
            file_format: Some("pain.001.001.03".to_string()),
            ..Default::default()
        };
        let descriptor = OrderCatalog::descriptor(OrderType::Ful).unwrap();
        let strategy = strategy_for(ProtocolVersion::H003);

        let ctx = context(&f, OrderType::Ful, parameters.clone());
        assert!(strategy.build_order_details(&ctx, descriptor).is_err());

        let ctx = context(&f, OrderType::Ful, parameters).with_order_id("A00B");
        let details = strategy.build_order_details(&ctx, descriptor).unwrap();
        assert_eq!(details.find_text(&["OrderID"]).as_deref(), Some("A00B"));
    }

    #[test]
    fn test_h005_business_service_details() {
        let f = fixture(ProtocolVersion::H005);
        let parameters = OrderParameters {
            date_range: Some(range()),
            service: Some(
                BusinessService::new("EOP", "camt.053")
                    .with_container("ZIP")
                    .with_message_version("08"),
            ),
            ..Default::default()
        };
        let ctx = context(&f, OrderType::Btd, parameters);
        let descriptor = OrderCatalog::descriptor(OrderType::Btd).unwrap();

        let details = strategy_for(ProtocolVersion::H005)
            .build_order_details(&ctx, descriptor)
            .unwrap();
        assert_eq!(details.find_text(&["AdminOrderType"]).as_deref(), Some("BTD"));
        assert!(details.child("OrderAttribute").is_none());
        let service = details.find(&["BTDOrderParams", "Service"]).unwrap();
        assert_eq!(service.find_text(&["Scope"]).as_deref(), Some("FR"));
        assert_eq!(service.child("Container").unwrap().attr("containerType"), Some("ZIP"));
        assert_eq!(service.child("MsgName").unwrap().attr("version"), Some("08"));
        assert!(details.find(&["BTDOrderParams", "DateRange"]).is_some());
    }

    #[test]
    fn test_h005_key_info_requires_certificates() {
        let f = fixture(ProtocolVersion::H005);
        let ctx = context(&f, OrderType::Ini, OrderParameters::default());
        let (public_key, _) = crypto::generate_key_pair(1024, "pw").unwrap();
        let key = KeyMaterial::new(KeyVersion::A006, public_key);

        let result = strategy_for(ProtocolVersion::H005).build_key_info(
            "SignaturePubKeyInfo",
            &key,
            "SignatureVersion",
            &ctx,
        );
        assert!(matches!(result, Err(EbicsError::UnsupportedOperationError(_))));

        let info = strategy_for(ProtocolVersion::H004)
            .build_key_info("SignaturePubKeyInfo", &key, "SignatureVersion", &ctx)
            .unwrap();
        assert_eq!(info.find_text(&["SignatureVersion"]).as_deref(), Some("A006"));
        assert_eq!(
            info.find_text(&["PubKeyValue", "RSAKeyValue", "Exponent"]).as_deref(),
            Some("AQAB")
        );
    }

    #[test]
    fn test_only_certified_keyrings_send_certificates() {
        let mut f = fixture(ProtocolVersion::H004);
        f.keyring.create_user_signatures(1024).unwrap();
        let key = f.keyring.user_signature(KeyRole::Signature).unwrap().clone();
        let certificate =
            crypto::self_signed_certificate(key.public_key(), key.private_key().unwrap(), "pw", "CN=USER").unwrap();
        let lone_certificate = key.with_certificate(certificate);

        let ctx = context(&f, OrderType::Ini, OrderParameters::default());
        let info = strategy_for(ProtocolVersion::H004)
            .build_key_info("SignaturePubKeyInfo", &lone_certificate, "SignatureVersion", &ctx)
            .unwrap();
        assert!(info.child("X509Data").is_none());
        let result = strategy_for(ProtocolVersion::H005).build_key_info(
            "SignaturePubKeyInfo",
            &lone_certificate,
            "SignatureVersion",
            &ctx,
        );
        assert!(matches!(result, Err(EbicsError::UnsupportedOperationError(_))));

        f.keyring.certify_user_signatures("CN=USER,O=PARTNER").unwrap();
        let ctx = context(&f, OrderType::Ini, OrderParameters::default());
        let key = f.keyring.user_signature(KeyRole::Signature).unwrap();
        let encoded = STANDARD.encode(key.certificate().unwrap());

        let info = strategy_for(ProtocolVersion::H004)
            .build_key_info("SignaturePubKeyInfo", key, "SignatureVersion", &ctx)
            .unwrap();
        assert_eq!(info.find_text(&["X509Data", "X509Certificate"]), Some(encoded.clone()));
        assert!(info.child("PubKeyValue").is_some());

        let info = strategy_for(ProtocolVersion::H005)
            .build_key_info("SignaturePubKeyInfo", key, "SignatureVersion", &ctx)
            .unwrap();
        assert_eq!(info.find_text(&["X509Data", "X509Certificate"]), Some(encoded));
        assert!(info.child("PubKeyValue").is_none());
        assert_eq!(info.find_text(&["SignatureVersion"]).as_deref(), Some("A006"));
    }
}
