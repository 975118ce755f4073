//! XML-RPC over HTTP, for digital-modes companion applications.
//!
//! [`XmlRpcTransport`] implements [`RpcTransport`] by POSTing encoded
//! method calls to the `/RPC2` endpoint of a local application such as
//! fldigi. Each call is bounded by its own timeout.

use std::time::Duration;

use async_trait::async_trait;
use shackctl_core::error::{Error, Result};
use shackctl_core::transport::{RpcTransport, RpcValue};
use tokio::net::lookup_host;

use crate::xml;

/// Path of the XML-RPC endpoint.
const RPC_PATH: &str = "/RPC2";

/// XML-RPC client bound to one endpoint.
#[derive(Debug, Clone)]
pub struct XmlRpcTransport {
    client: reqwest::Client,
    url: String,
}

impl XmlRpcTransport {
    /// Check that `host` resolves, then target `http://host:port/RPC2`.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let found = lookup_host((host, port))
            .await
            .map(|mut addrs| addrs.next().is_some())
            .unwrap_or(false);
        if !found {
            tracing::error!(host = %host, "XML-RPC host lookup failed");
            return Err(Error::HostNotFound(host.to_string()));
        }
        Self::with_url(format!("http://{host}:{port}{RPC_PATH}"))
    }

    /// Target an explicit endpoint URL.
    pub fn with_url(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Initialization(format!("cannot build HTTP client: {e}")))?;
        let url = url.into();
        tracing::debug!(url = %url, "XML-RPC endpoint configured");
        Ok(Self { client, url })
    }
}

#[async_trait]
impl RpcTransport for XmlRpcTransport {
    async fn call(
        &mut self,
        method: &str,
        params: &[RpcValue],
        timeout: Duration,
    ) -> Result<RpcValue> {
        let body = xml::encode_call(method, params);
        tracing::trace!(url = %self.url, method = %method, "XML-RPC call");

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "text/xml")
            .body(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_request_error(e, &self.url))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %self.url, method = %method, status = %status, "XML-RPC HTTP error");
            return Err(Error::Protocol(format!("HTTP {status} from {}", self.url)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| map_request_error(e, &self.url))?;
        let value = xml::decode_response(&text)?;
        tracing::trace!(method = %method, result = %value, "XML-RPC reply");
        Ok(value)
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

fn map_request_error(e: reqwest::Error, url: &str) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else if e.is_connect() {
        Error::ConnectionRefused(url.to_string())
    } else {
        Error::Protocol(format!("request to {url} failed: {e}"))
    }
}
