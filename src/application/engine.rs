use crate::application::builder::RequestBuilder;
use crate::application::catalog::OrderDescriptor;
use crate::application::context::RequestContext;
use crate::application::response::{self, BankKeys, SupportedVersion};
use crate::domain::identity::Bank;
use crate::domain::keyring::KeyRole;
use crate::domain::order::{OrderOutcome, OrderResult};
use crate::domain::ports::{HttpTransportBox, PayloadCodecBox, ReceiptDecisionFn};
use crate::domain::return_code::{ResponseOutcome, ReturnCode, ReturnCodePolicy};
use crate::domain::transaction::{DownloadTransaction, UploadState};
use crate::error::Result;
use crate::infrastructure::codec::E002Codec;
use crate::interfaces::xml::{Element, dsig};
use tracing::{debug, info, warn};

/// Drives the round trips of one order against the bank host.
///
/// Every step waits for the previous response: later requests need the
/// transaction id and segment count the bank assigned. Nothing is retried; a
/// failed round trip fails the whole order.
pub struct TransactionEngine {
    transport: HttpTransportBox,
    codec: PayloadCodecBox,
    policy: ReturnCodePolicy,
    verify_bank_signatures: bool,
}

impl TransactionEngine {
    /// Creates an engine with the E002 codec and the default return code
    /// policy.
    ///
    /// # Arguments
    ///
    /// * `transport` - The channel every request goes through.
    pub fn new(transport: HttpTransportBox) -> Self {
        Self {
            transport,
            codec: Box::new(E002Codec::new()),
            policy: ReturnCodePolicy::default(),
            verify_bank_signatures: false,
        }
    }

    /// Replaces the order-data envelope.
    ///
    /// # Arguments
    ///
    /// * `codec` - The codec used for transaction keys and payloads.
    pub fn with_codec(mut self, codec: PayloadCodecBox) -> Self {
        self.codec = codec;
        self
    }

    /// # Arguments
    ///
    /// * `policy` - Decides which return codes fail an order.
    pub fn with_policy(mut self, policy: ReturnCodePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Verifies the X002 signature of every `ebicsResponse` against the bank
    /// authentication key.
    pub fn with_bank_signature_verification(mut self, enabled: bool) -> Self {
        self.verify_bank_signatures = enabled;
        self
    }

    fn builder(&self, ctx: &RequestContext<'_>) -> RequestBuilder<'_> {
        RequestBuilder::new(ctx.keyring.version(), self.codec.as_ref())
    }

    async fn exchange(&self, ctx: &RequestContext<'_>, request: &Element) -> Result<Element> {
        debug!(order = %ctx.order_type, request = request.local_name(), "sending request");
        let bytes = self.transport.post(&ctx.bank.url, request.to_bytes()).await?;
        let document = response::parse_response(&bytes)?;

        if self.verify_bank_signatures && document.local_name() == "ebicsResponse" {
            let key = ctx.keyring.bank_signature(KeyRole::Authentication)?;
            dsig::verify(&document, key.public_key())?;
        }
        Ok(document)
    }

    /// Applies the configured policy to a response.
    fn evaluate(&self, ctx: &RequestContext<'_>, response: &Element) -> Result<(ReturnCode, String, ResponseOutcome)> {
        Self::evaluate_with(self.policy, ctx, response)
    }

    /// Like [`Self::evaluate`], but "no data" is a rejection too.
    fn require_success(ctx: &RequestContext<'_>, response: &Element) -> Result<(ReturnCode, String)> {
        let (code, report_text, _) = Self::evaluate_with(ReturnCodePolicy::strict(), ctx, response)?;
        Ok((code, report_text))
    }

    fn evaluate_with(
        policy: ReturnCodePolicy,
        ctx: &RequestContext<'_>,
        response: &Element,
    ) -> Result<(ReturnCode, String, ResponseOutcome)> {
        let code = response::retrieve_return_code(response)?;
        let report_text = response::retrieve_report_text(response);
        match policy.evaluate(&code, &report_text) {
            Ok(outcome) => Ok((code, report_text, outcome)),
            Err(err) => {
                warn!(order = %ctx.order_type, code = %code, report_text = %report_text, "bank rejected the request");
                Err(err)
            }
        }
    }

    /// Initialisation, one transfer per remaining segment, receipt, then
    /// decryption of the reassembled payload.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The keyring, bank and order parameters of the request.
    /// * `descriptor` - The catalog entry of the order type.
    /// * `decision` - Chooses between a positive and a negative receipt.
    pub async fn download(
        &self,
        mut ctx: RequestContext<'_>,
        descriptor: &OrderDescriptor,
        decision: &ReceiptDecisionFn,
    ) -> Result<OrderResult> {
        let order = ctx.order_type;
        let builder = self.builder(&ctx);
        info!(order = %order, protocol = %ctx.keyring.version(), "starting download");

        let request = builder.download_init(&ctx, descriptor)?;
        let response = self.exchange(&ctx, &request).await?;
        let (code, report_text, outcome) = self.evaluate(&ctx, &response)?;
        if outcome == ResponseOutcome::NoData {
            info!(order = %order, code = %code, "no download data available");
            return Ok(OrderResult {
                order_type: order,
                outcome: OrderOutcome::NoData,
                return_code: code,
                report_text,
                transaction_id: None,
                order_id: None,
                payload: Vec::new(),
            });
        }

        let init = response::extract_initialization_segment(&response, ctx.keyring, self.codec.as_ref())?;
        let transaction_id = init.transaction_id;
        let transaction_key = init.transaction_key.clone();
        debug!(
            order = %order,
            transaction_id = %transaction_id,
            segment = init.segment.index,
            num_segments = init.segment.num_segments,
            "initialisation segment received"
        );
        let mut transaction = DownloadTransaction::new(order);
        transaction.begin(init.transaction_key, init.segment)?;

        while let Some(index) = transaction.next_segment_index() {
            let num_segments = transaction.num_segments();
            ctx.advance(&transaction_id, Some(index), Some(index) == num_segments);

            let request = builder.download_transfer(&ctx)?;
            let response = self.exchange(&ctx, &request).await?;
            Self::require_success(&ctx, &response)?;
            let segment = response::extract_download_segment(&response, num_segments)?;
            debug!(
                order = %order,
                transaction_id = %transaction_id,
                segment = segment.index,
                "segment received"
            );
            transaction.append(segment)?;
        }

        let positive = decision(&transaction);
        if !positive {
            warn!(order = %order, transaction_id = %transaction_id, "sending negative receipt");
        }
        ctx.advance(&transaction_id, None, false);
        let request = builder.receipt(&ctx, positive)?;
        let response = self.exchange(&ctx, &request).await?;
        let receipt_code = response::retrieve_return_code(&response)?;
        let receipt_text = response::retrieve_report_text(&response);
        if let Err(err) = self.policy.evaluate_receipt(&receipt_code, &receipt_text, positive) {
            warn!(order = %order, transaction_id = %transaction_id, code = %receipt_code, "receipt rejected");
            return Err(err);
        }
        transaction.receipt_sent()?;

        let payload = self
            .codec
            .open(&transaction_key, &transaction.encrypted_payload()?)?;
        transaction.complete(payload.clone())?;
        info!(
            order = %order,
            transaction_id = %transaction_id,
            bytes = payload.len(),
            "download complete"
        );

        Ok(OrderResult {
            order_type: order,
            outcome: if positive {
                OrderOutcome::Completed
            } else {
                OrderOutcome::Declined
            },
            return_code: receipt_code,
            report_text: receipt_text,
            transaction_id: Some(transaction_id),
            order_id: None,
            payload,
        })
    }

    /// Initialisation carrying the signature and the wrapped transaction key,
    /// then the single transfer segment (none for signature-only orders).
    ///
    /// # Arguments
    ///
    /// * `ctx` - The keyring, bank and order parameters of the request.
    /// * `descriptor` - The catalog entry of the order type.
    /// * `order_data` - The plaintext to sign and send.
    pub async fn upload(
        &self,
        mut ctx: RequestContext<'_>,
        descriptor: &OrderDescriptor,
        order_data: &[u8],
    ) -> Result<OrderResult> {
        let order = ctx.order_type;
        let builder = self.builder(&ctx);
        let (request, mut upload) = builder.upload_init(&ctx, descriptor, order_data)?;
        info!(
            order = %order,
            protocol = %ctx.keyring.version(),
            num_segments = upload.num_segments(),
            "starting upload"
        );

        let response = self.exchange(&ctx, &request).await?;
        let (mut code, mut report_text) = Self::require_success(&ctx, &response)?;
        let initialised = response::extract_upload_segment(&request, &response)?;
        let transaction_id = initialised.transaction_id;
        upload.initialized(transaction_id.clone())?;
        debug!(order = %order, transaction_id = %transaction_id, "upload initialised");

        if upload.state() == UploadState::Transferring {
            ctx.advance(&transaction_id, Some(1), true);
            let request = builder.upload_transfer(&ctx, &upload)?;
            let response = self.exchange(&ctx, &request).await?;
            (code, report_text) = Self::require_success(&ctx, &response)?;
            let answered = response::retrieve_transaction_id(&response)?;
            upload.transferred(&answered)?;
            debug!(order = %order, transaction_id = %transaction_id, segment = 1, "segment sent");
        }

        info!(
            order = %order,
            transaction_id = %transaction_id,
            order_id = initialised.order_id.as_deref().unwrap_or("-"),
            "upload complete"
        );
        Ok(OrderResult {
            order_type: order,
            outcome: OrderOutcome::Completed,
            return_code: code,
            report_text,
            transaction_id: Some(transaction_id),
            order_id: initialised.order_id,
            payload: Vec::new(),
        })
    }

    /// INI, HIA and H3K: a single request/response exchange.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The keyring holding the keys to submit.
    /// * `descriptor` - The catalog entry of the order type.
    pub async fn submit_keys(&self, ctx: RequestContext<'_>, descriptor: &OrderDescriptor) -> Result<OrderResult> {
        let order = ctx.order_type;
        info!(order = %order, protocol = %ctx.keyring.version(), "submitting keys");
        let request = self.builder(&ctx).key_submission(&ctx, descriptor)?;
        let response = self.exchange(&ctx, &request).await?;
        let (code, report_text) = Self::require_success(&ctx, &response)?;

        let order_id = response
            .find_text(&["header", "mutable", "OrderID"])
            .or_else(|| ctx.order_id.clone());
        info!(order = %order, code = %code, "keys accepted");
        Ok(OrderResult {
            order_type: order,
            outcome: OrderOutcome::Completed,
            return_code: code,
            report_text,
            transaction_id: None,
            order_id,
            payload: Vec::new(),
        })
    }

    /// HPB: returns the bank keys without installing them.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The keyring whose encryption key opens the response.
    /// * `descriptor` - The catalog entry of the order type.
    pub async fn download_bank_keys(&self, ctx: RequestContext<'_>, descriptor: &OrderDescriptor) -> Result<BankKeys> {
        info!(order = %ctx.order_type, protocol = %ctx.keyring.version(), "downloading bank keys");
        let request = self.builder(&ctx).key_download(&ctx, descriptor)?;
        let response = self.exchange(&ctx, &request).await?;
        Self::require_success(&ctx, &response)?;

        let order_data =
            response::extract_key_management_order_data(&response, ctx.keyring, self.codec.as_ref())?;
        response::parse_bank_keys(&order_data)
    }

    /// HEV: asks the host which protocol versions it speaks.
    ///
    /// # Arguments
    ///
    /// * `bank` - The host to ask.
    pub async fn probe_versions(&self, bank: &Bank) -> Result<Vec<SupportedVersion>> {
        info!(host = %bank.host_id, "probing supported versions");
        let request = RequestBuilder::hev(&bank.host_id);
        let bytes = self.transport.post(&bank.url, request.to_bytes()).await?;
        let response = response::parse_response(&bytes)?;

        let code = response::retrieve_return_code(&response)?;
        let report_text = response::retrieve_report_text(&response);
        ReturnCodePolicy::strict().evaluate(&code, &report_text)?;
        response::parse_hev(&response)
    }
}
