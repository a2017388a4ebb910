//! Data-driven description of every supported order type.
//!
//! Adding an order type means adding a row to [`DESCRIPTORS`]; the builder and
//! the engine are shaped entirely by these rows.

use crate::domain::keyring::{KeyRole, Keyring};
use crate::domain::order::{OrderRequest, OrderType};
use crate::domain::protocol::ProtocolVersion;
use crate::error::{EbicsError, Result};

/// Which round trips an order takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// INI/HIA/H3K: one unsigned request carrying public keys.
    KeySubmission,
    /// HPB: one signed request, bank keys in the response.
    KeyDownload,
    /// Initialisation, transfer segments, receipt.
    Download,
    /// Initialisation plus one transfer segment.
    Upload,
    /// Initialisation carrying only a signature; no order data is transferred.
    SignatureOnly,
}

/// Shape of the order parameter element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterShape {
    /// No parameter element at all (key management).
    None,
    /// An empty `StandardOrderParams`.
    Standard,
    /// `StandardOrderParams` with an optional date range.
    DateRange,
    /// `<ORDER>OrderParams` with a mandatory `FileFormat` (FDL/FUL).
    FileFormat,
    /// `<ORDER>OrderParams` with a mandatory `Service` (BTD/BTU).
    BusinessService,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderDescriptor {
    pub order_type: OrderType,
    pub flow: Flow,
    pub user_roles: &'static [KeyRole],
    pub bank_roles: &'static [KeyRole],
    pub parameters: ParameterShape,
    pub protocols: &'static [ProtocolVersion],
    /// `OrderAttribute` of H003/H004 requests.
    pub order_attribute: &'static str,
}

impl OrderDescriptor {
    pub fn supports(&self, protocol: ProtocolVersion) -> bool {
        self.protocols.contains(&protocol)
    }

    /// True when the request carries a digest of the bank keys.
    pub fn is_secured(&self) -> bool {
        !matches!(self.flow, Flow::KeySubmission | Flow::KeyDownload)
    }

    /// Name of the `<XXXOrderParams>` element for file and business orders.
    pub fn parameters_element(&self) -> String {
        match self.parameters {
            ParameterShape::FileFormat | ParameterShape::BusinessService => {
                format!("{}OrderParams", self.order_type)
            }
            _ => "StandardOrderParams".to_string(),
        }
    }
}

const ALL_PROTOCOLS: &[ProtocolVersion] =
    &[ProtocolVersion::H003, ProtocolVersion::H004, ProtocolVersion::H005];
const PRE_H005: &[ProtocolVersion] = &[ProtocolVersion::H003, ProtocolVersion::H004];
const H004_ONWARDS: &[ProtocolVersion] = &[ProtocolVersion::H004, ProtocolVersion::H005];
const H005_ONLY: &[ProtocolVersion] = &[ProtocolVersion::H005];

const NO_ROLES: &[KeyRole] = &[];
const SIGNATURE: &[KeyRole] = &[KeyRole::Signature];
const AUTH_AND_ENCRYPTION: &[KeyRole] = &[KeyRole::Authentication, KeyRole::Encryption];
const ALL_ROLES: &[KeyRole] = &KeyRole::ALL;

const fn download(order_type: OrderType, parameters: ParameterShape, protocols: &'static [ProtocolVersion]) -> OrderDescriptor {
    OrderDescriptor {
        order_type,
        flow: Flow::Download,
        user_roles: ALL_ROLES,
        bank_roles: AUTH_AND_ENCRYPTION,
        parameters,
        protocols,
        order_attribute: "DZHNN",
    }
}

const fn upload(order_type: OrderType, parameters: ParameterShape, protocols: &'static [ProtocolVersion]) -> OrderDescriptor {
    OrderDescriptor {
        order_type,
        flow: Flow::Upload,
        user_roles: ALL_ROLES,
        bank_roles: AUTH_AND_ENCRYPTION,
        parameters,
        protocols,
        order_attribute: "OZHNN",
    }
}

pub const DESCRIPTORS: &[OrderDescriptor] = &[
    OrderDescriptor {
        order_type: OrderType::Ini,
        flow: Flow::KeySubmission,
        user_roles: SIGNATURE,
        bank_roles: NO_ROLES,
        parameters: ParameterShape::None,
        protocols: ALL_PROTOCOLS,
        order_attribute: "DZNNN",
    },
    OrderDescriptor {
        order_type: OrderType::Hia,
        flow: Flow::KeySubmission,
        user_roles: AUTH_AND_ENCRYPTION,
        bank_roles: NO_ROLES,
        parameters: ParameterShape::None,
        protocols: ALL_PROTOCOLS,
        order_attribute: "DZNNN",
    },
    OrderDescriptor {
        order_type: OrderType::H3k,
        flow: Flow::KeySubmission,
        user_roles: ALL_ROLES,
        bank_roles: NO_ROLES,
        parameters: ParameterShape::None,
        protocols: H005_ONLY,
        order_attribute: "DZNNN",
    },
    OrderDescriptor {
        order_type: OrderType::Hpb,
        flow: Flow::KeyDownload,
        user_roles: ALL_ROLES,
        bank_roles: NO_ROLES,
        parameters: ParameterShape::None,
        protocols: ALL_PROTOCOLS,
        order_attribute: "DZHNN",
    },
    upload(OrderType::Hcs, ParameterShape::Standard, H004_ONWARDS),
    OrderDescriptor {
        order_type: OrderType::Spr,
        flow: Flow::SignatureOnly,
        user_roles: ALL_ROLES,
        bank_roles: AUTH_AND_ENCRYPTION,
        parameters: ParameterShape::Standard,
        protocols: ALL_PROTOCOLS,
        order_attribute: "UZHNN",
    },
    download(OrderType::Htd, ParameterShape::Standard, ALL_PROTOCOLS),
    download(OrderType::Hkd, ParameterShape::Standard, ALL_PROTOCOLS),
    download(OrderType::Hpd, ParameterShape::Standard, ALL_PROTOCOLS),
    download(OrderType::Hac, ParameterShape::DateRange, ALL_PROTOCOLS),
    download(OrderType::Ptk, ParameterShape::DateRange, PRE_H005),
    download(OrderType::Fdl, ParameterShape::FileFormat, PRE_H005),
    download(OrderType::Btd, ParameterShape::BusinessService, H005_ONLY),
    upload(OrderType::Ful, ParameterShape::FileFormat, PRE_H005),
    upload(OrderType::Btu, ParameterShape::BusinessService, H005_ONLY),
];

pub struct OrderCatalog;

impl OrderCatalog {
    pub fn descriptor(order_type: OrderType) -> Result<&'static OrderDescriptor> {
        DESCRIPTORS
            .iter()
            .find(|d| d.order_type == order_type)
            .ok_or_else(|| {
                EbicsError::UnsupportedOperationError(format!("{order_type} has no descriptor"))
            })
    }

    /// The descriptor of `order_type` if it exists for `protocol`.
    pub fn resolve(order_type: OrderType, protocol: ProtocolVersion) -> Result<&'static OrderDescriptor> {
        let descriptor = Self::descriptor(order_type)?;
        if !descriptor.supports(protocol) {
            return Err(EbicsError::UnsupportedOperationError(format!(
                "{order_type} is not available in {protocol}"
            )));
        }
        Ok(descriptor)
    }

    /// Checks everything that can be checked before the first network call:
    /// protocol support, required keys and parameters.
    pub fn validate(request: &OrderRequest, keyring: &Keyring) -> Result<&'static OrderDescriptor> {
        let descriptor = Self::resolve(request.order_type, keyring.version())?;

        for role in descriptor.user_roles {
            keyring.user_signature(*role)?;
        }
        for role in descriptor.bank_roles {
            keyring.bank_signature(*role)?;
        }

        let parameters = &request.parameters;
        match descriptor.parameters {
            ParameterShape::FileFormat if parameters.file_format.is_none() => {
                return Err(EbicsError::ValidationError(format!(
                    "{} requires a file format",
                    request.order_type
                )));
            }
            ParameterShape::BusinessService if parameters.service.is_none() => {
                return Err(EbicsError::ValidationError(format!(
                    "{} requires a business service",
                    request.order_type
                )));
            }
            _ => {}
        }

        if descriptor.flow == Flow::Upload && request.payload.is_empty() {
            return Err(EbicsError::ValidationError(format!(
                "{} requires order data",
                request.order_type
            )));
        }
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::keyring::{KeyMaterial, KeyOwner};
    use crate::domain::order::BusinessService;
    use crate::domain::protocol::{ConnectionProfile, KeyVersion};

    #[test]
    fn test_every_order_type_has_one_descriptor() {
        for order in OrderType::ALL {
            let count = DESCRIPTORS.iter().filter(|d| d.order_type == order).count();
            assert_eq!(count, 1, "{order}");
        }
    }

    #[test]
    fn test_generation_specific_orders() {
        assert!(OrderCatalog::resolve(OrderType::Btd, ProtocolVersion::H005).is_ok());
        assert!(matches!(
            OrderCatalog::resolve(OrderType::Btd, ProtocolVersion::H004),
            Err(EbicsError::UnsupportedOperationError(_))
        ));
        assert!(OrderCatalog::resolve(OrderType::H3k, ProtocolVersion::H003).is_err());
        assert!(OrderCatalog::resolve(OrderType::Fdl, ProtocolVersion::H005).is_err());
    }

    #[test]
    fn test_parameter_element_names() {
        let fdl = OrderCatalog::descriptor(OrderType::Fdl).unwrap();
        assert_eq!(fdl.parameters_element(), "FDLOrderParams");
        let hac = OrderCatalog::descriptor(OrderType::Hac).unwrap();
        assert_eq!(hac.parameters_element(), "StandardOrderParams");
        assert!(!OrderCatalog::descriptor(OrderType::Ini).unwrap().is_secured());
    }

    #[test]
    fn test_validate_reports_missing_bank_key_first_by_role() {
        let profile = ConnectionProfile::new(ProtocolVersion::H004, KeyVersion::A005).unwrap();
        let mut keyring = Keyring::new(profile, "pw");
        keyring.create_user_signatures(1024).unwrap();
        keyring
            .set_bank_signature(
                KeyRole::Authentication,
                KeyMaterial::new(KeyVersion::X002, vec![1]),
            )
            .unwrap();

        let request = OrderRequest::new(OrderType::Ful)
            .with_file_format("pain.001.001.03")
            .with_payload(b"data".to_vec());
        assert!(matches!(
            OrderCatalog::validate(&request, &keyring),
            Err(EbicsError::SignatureMissingError {
                owner: KeyOwner::Bank,
                role: KeyRole::Encryption
            })
        ));
    }

    #[test]
    fn test_validate_parameters() {
        let profile = ConnectionProfile::new(ProtocolVersion::H005, KeyVersion::A006).unwrap();
        let mut keyring = Keyring::new(profile, "pw");
        keyring.create_user_signatures(1024).unwrap();
        for (role, version) in [(KeyRole::Authentication, KeyVersion::X002), (KeyRole::Encryption, KeyVersion::E002)] {
            keyring
                .set_bank_signature(role, KeyMaterial::new(version, vec![1]))
                .unwrap();
        }

        let missing = OrderRequest::new(OrderType::Btd);
        assert!(matches!(
            OrderCatalog::validate(&missing, &keyring),
            Err(EbicsError::ValidationError(_))
        ));

        let complete = OrderRequest::new(OrderType::Btd)
            .with_service(BusinessService::new("EOP", "camt.053"));
        assert_eq!(
            OrderCatalog::validate(&complete, &keyring).unwrap().flow,
            Flow::Download
        );
    }
}
