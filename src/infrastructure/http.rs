use crate::domain::ports::HttpTransport;
use crate::error::{EbicsError, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// `HttpTransport` over `reqwest` with rustls. Any non-2xx status is a
/// transport failure.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EbicsError::TransportError(Box::new(e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(&self, url: &str, request: Vec<u8>) -> Result<Vec<u8>> {
        debug!(url, bytes = request.len(), "posting EBICS request");
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "text/xml; charset=UTF-8")
            .body(request)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| EbicsError::TransportError(Box::new(e)))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| EbicsError::TransportError(Box::new(e)))?;
        Ok(body.to_vec())
    }
}
