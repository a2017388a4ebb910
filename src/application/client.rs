//! `EbicsClient`: one method per order, on top of the transaction engine.

use crate::application::builder::order_data;
use crate::application::builder::strategy::strategy_for;
use crate::application::catalog::{Flow, OrderCatalog, OrderDescriptor};
use crate::application::context::RequestContext;
use crate::application::engine::TransactionEngine;
use crate::application::response::{BankKeys, SupportedVersion};
use crate::domain::identity::{Bank, Product, User};
use crate::domain::keyring::{KeyRole, Keyring};
use crate::domain::order::{BusinessService, DateRange, OrderRequest, OrderResult, OrderType};
use crate::domain::ports::{HttpTransportBox, PayloadCodecBox, ReceiptDecision};
use crate::domain::protocol::{ConnectionProfile, ProtocolVersion};
use crate::domain::return_code::ReturnCodePolicy;
use crate::domain::transaction::DownloadTransaction;
use crate::error::{EbicsError, Result};
use crate::infrastructure::codec::{E002Codec, DEFAULT_MAX_ORDER_DATA_SIZE};
use crate::infrastructure::crypto;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_KEY_SIZE: usize = 2048;

/// Library-level settings. Every field has a default, so `{}` is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub product: Product,
    pub return_codes: ReturnCodePolicy,
    /// Check the bank's X002 signature on every transaction response.
    pub verify_bank_signatures: bool,
    /// RSA modulus size of newly generated user keys.
    pub key_size: usize,
    /// Largest order data a download or HPB response may inflate to.
    pub max_order_data_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            product: Product::default(),
            return_codes: ReturnCodePolicy::default(),
            verify_bank_signatures: false,
            key_size: DEFAULT_KEY_SIZE,
            max_order_data_size: DEFAULT_MAX_ORDER_DATA_SIZE,
        }
    }
}

/// Entry point for callers: owns the bank and user identity and the engine,
/// borrows the keyring per order.
///
/// Orders against the same keyring must not run concurrently; `hpb` and
/// `hcs` take it mutably for that reason.
pub struct EbicsClient {
    bank: Bank,
    user: User,
    config: ClientConfig,
    engine: TransactionEngine,
    receipt_decision: ReceiptDecision,
}

impl EbicsClient {
    pub fn new(bank: Bank, user: User, transport: HttpTransportBox, config: ClientConfig) -> Self {
        let codec = E002Codec::new().with_max_order_data_size(config.max_order_data_size);
        let engine = TransactionEngine::new(transport)
            .with_codec(Box::new(codec))
            .with_policy(config.return_codes)
            .with_bank_signature_verification(config.verify_bank_signatures);
        Self {
            bank,
            user,
            config,
            engine,
            receipt_decision: Box::new(|_: &DownloadTransaction| true),
        }
    }

    pub fn with_codec(mut self, codec: PayloadCodecBox) -> Self {
        self.engine = self.engine.with_codec(codec);
        self
    }

    /// Replaces the default "always acknowledge" receipt decision.
    pub fn with_receipt_decision(
        mut self,
        decision: impl Fn(&DownloadTransaction) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.receipt_decision = Box::new(decision);
        self
    }

    pub fn bank(&self) -> &Bank {
        &self.bank
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A keyring with freshly generated user keys of the configured size.
    /// H005 keys come with self-signed certificates issued to the user.
    pub fn create_keyring(&self, profile: ConnectionProfile, password: impl Into<String>) -> Result<Keyring> {
        let mut keyring = Keyring::new(profile, password);
        keyring.create_user_signatures(self.config.key_size)?;
        if profile.protocol == ProtocolVersion::H005 {
            let subject = format!("CN={},O={}", self.user.user_id, self.user.partner_id);
            keyring.certify_user_signatures(&subject)?;
        }
        info!(protocol = %profile.protocol, signature = %profile.signature_version, "user keys generated");
        Ok(keyring)
    }

    /// H003 requests other than downloads carry a client-assigned order id.
    fn context<'a>(&'a self, keyring: &'a Keyring, descriptor: &OrderDescriptor) -> RequestContext<'a> {
        let ctx = RequestContext::new(&self.bank, &self.user, &self.config.product, keyring, descriptor.order_type);
        let needs_order_id = keyring.version() == ProtocolVersion::H003
            && !matches!(descriptor.flow, Flow::Download | Flow::KeyDownload);
        if needs_order_id {
            ctx.with_order_id(crypto::generate_order_id())
        } else {
            ctx
        }
    }

    pub async fn hev(&self) -> Result<Vec<SupportedVersion>> {
        self.engine.probe_versions(&self.bank).await
    }

    async fn submit_keys(&self, keyring: &Keyring, order_type: OrderType) -> Result<OrderResult> {
        let descriptor = OrderCatalog::validate(&OrderRequest::new(order_type), keyring)?;
        self.engine
            .submit_keys(self.context(keyring, descriptor), descriptor)
            .await
    }

    /// Sends the signature public key.
    pub async fn ini(&self, keyring: &Keyring) -> Result<OrderResult> {
        self.submit_keys(keyring, OrderType::Ini).await
    }

    /// Sends the authentication and encryption public keys.
    pub async fn hia(&self, keyring: &Keyring) -> Result<OrderResult> {
        self.submit_keys(keyring, OrderType::Hia).await
    }

    /// Sends all three certificates at once (EBICS 3.0).
    pub async fn h3k(&self, keyring: &Keyring) -> Result<OrderResult> {
        self.submit_keys(keyring, OrderType::H3k).await
    }

    /// Downloads the bank keys and installs them in the keyring.
    pub async fn hpb(&self, keyring: &mut Keyring) -> Result<BankKeys> {
        let keys = {
            let keyring: &Keyring = keyring;
            let descriptor = OrderCatalog::validate(&OrderRequest::new(OrderType::Hpb), keyring)?;
            self.engine
                .download_bank_keys(self.context(keyring, descriptor), descriptor)
                .await?
        };
        keyring.set_bank_signature(KeyRole::Authentication, keys.authentication.clone())?;
        keyring.set_bank_signature(KeyRole::Encryption, keys.encryption.clone())?;
        info!(
            authentication = %keys.authentication.version(),
            encryption = %keys.encryption.version(),
            "bank keys installed"
        );
        Ok(keys)
    }

    /// Replaces all three user keys. The new keys are generated outside the
    /// keyring, announced signed with the current signature key and only
    /// installed once the bank has accepted them.
    pub async fn hcs(&self, keyring: &mut Keyring) -> Result<OrderResult> {
        let new_keys = keyring.generate_user_signatures(self.config.key_size)?;
        let result = {
            let keyring: &Keyring = keyring;
            let descriptor = OrderCatalog::resolve(OrderType::Hcs, keyring.version())?;
            let ctx = self.context(keyring, descriptor);
            let document =
                order_data::hcs_request_order_data(strategy_for(keyring.version()), &ctx, &new_keys)?.to_bytes();
            let request = OrderRequest::new(OrderType::Hcs).with_payload(document);
            OrderCatalog::validate(&request, keyring)?;
            self.engine.upload(ctx, descriptor, &request.payload).await?
        };
        keyring.install_user_signatures(new_keys)?;
        info!("user keys replaced");
        Ok(result)
    }

    /// Suspends the subscriber.
    pub async fn spr(&self, keyring: &Keyring) -> Result<OrderResult> {
        self.execute(keyring, OrderRequest::new(OrderType::Spr)).await
    }

    /// Runs any order whose flow does not change the keyring.
    pub async fn execute(&self, keyring: &Keyring, request: OrderRequest) -> Result<OrderResult> {
        let descriptor = OrderCatalog::validate(&request, keyring)?;
        let ctx = self
            .context(keyring, descriptor)
            .with_parameters(request.parameters.clone());

        match (descriptor.order_type, descriptor.flow) {
            (OrderType::Hcs, _) | (_, Flow::KeyDownload) => Err(EbicsError::UnsupportedOperationError(
                format!("{} changes the keyring and has its own client method", request.order_type),
            )),
            (_, Flow::KeySubmission) => self.engine.submit_keys(ctx, descriptor).await,
            (_, Flow::Download) => {
                self.engine
                    .download(ctx, descriptor, self.receipt_decision.as_ref())
                    .await
            }
            (_, Flow::Upload | Flow::SignatureOnly) => self.engine.upload(ctx, descriptor, &request.payload).await,
        }
    }

    /// Subscriber and order type details.
    pub async fn htd(&self, keyring: &Keyring) -> Result<OrderResult> {
        self.execute(keyring, OrderRequest::new(OrderType::Htd)).await
    }

    /// Customer and subscriber parameters.
    pub async fn hkd(&self, keyring: &Keyring) -> Result<OrderResult> {
        self.execute(keyring, OrderRequest::new(OrderType::Hkd)).await
    }

    /// Bank parameters.
    pub async fn hpd(&self, keyring: &Keyring) -> Result<OrderResult> {
        self.execute(keyring, OrderRequest::new(OrderType::Hpd)).await
    }

    /// Customer acknowledgement (XML protocol of previous orders).
    pub async fn hac(&self, keyring: &Keyring, range: Option<DateRange>) -> Result<OrderResult> {
        self.execute(keyring, with_optional_range(OrderRequest::new(OrderType::Hac), range))
            .await
    }

    /// Customer protocol as plain text (EBICS 2.x).
    pub async fn ptk(&self, keyring: &Keyring, range: Option<DateRange>) -> Result<OrderResult> {
        self.execute(keyring, with_optional_range(OrderRequest::new(OrderType::Ptk), range))
            .await
    }

    /// File download by file format (EBICS 2.x).
    pub async fn fdl(
        &self,
        keyring: &Keyring,
        file_format: &str,
        range: Option<DateRange>,
    ) -> Result<OrderResult> {
        let request = OrderRequest::new(OrderType::Fdl).with_file_format(file_format);
        self.execute(keyring, with_optional_range(request, range)).await
    }

    /// Business transaction download (EBICS 3.0).
    pub async fn btd(
        &self,
        keyring: &Keyring,
        service: BusinessService,
        range: Option<DateRange>,
    ) -> Result<OrderResult> {
        let request = OrderRequest::new(OrderType::Btd).with_service(service);
        self.execute(keyring, with_optional_range(request, range)).await
    }

    /// File upload by file format (EBICS 2.x).
    pub async fn ful(&self, keyring: &Keyring, file_format: &str, order_data: Vec<u8>) -> Result<OrderResult> {
        let request = OrderRequest::new(OrderType::Ful)
            .with_file_format(file_format)
            .with_payload(order_data);
        self.execute(keyring, request).await
    }

    /// Business transaction upload (EBICS 3.0).
    pub async fn btu(
        &self,
        keyring: &Keyring,
        service: BusinessService,
        file_name: Option<&str>,
        order_data: Vec<u8>,
    ) -> Result<OrderResult> {
        let mut request = OrderRequest::new(OrderType::Btu)
            .with_service(service)
            .with_payload(order_data);
        if let Some(name) = file_name {
            request = request.with_file_name(name);
        }
        self.execute(keyring, request).await
    }
}

fn with_optional_range(request: OrderRequest, range: Option<DateRange>) -> OrderRequest {
    match range {
        Some(range) => request.with_date_range(range),
        None => request,
    }
}
