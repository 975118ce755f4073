//! Keying through a digital-modes application over XML-RPC.
//!
//! The application keys its own transmitter, so sending text means placing
//! it in the TX buffer and switching to transmit if the rig was receiving.
//! A trailing `^r` tells it to return to receive when the buffer drains.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use shackctl_core::capability::Capabilities;
use shackctl_core::driver::DeviceDriver;
use shackctl_core::error::{Error, Result};
use shackctl_core::profile::{DeviceProfile, LinkSettings};
use shackctl_core::transport::{RpcTransport, RpcValue};
use shackctl_core::types::BackendKind;
use shackctl_transport::XmlRpcTransport;

/// Default XML-RPC port.
pub const DEFAULT_PORT: u16 = 7362;

/// Suffix that returns the application to receive after the text.
const RETURN_TO_RX: &str = "^r";

pub struct FldigiDriver {
    rpc: Option<Box<dyn RpcTransport>>,
    timeout: Duration,
    version: Option<String>,
}

impl Default for FldigiDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FldigiDriver {
    pub fn new() -> Self {
        Self {
            rpc: None,
            timeout: Duration::from_millis(1000),
            version: None,
        }
    }

    pub fn with_transport(rpc: Box<dyn RpcTransport>) -> Self {
        Self {
            rpc: Some(rpc),
            ..Self::new()
        }
    }

    /// Application version reported at initialization.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Make one call; every failure names the call that failed.
    async fn call(
        &mut self,
        call: &'static str,
        method: &str,
        params: &[RpcValue],
    ) -> Result<RpcValue> {
        if self.version.is_none() {
            return Err(Error::KeyerNotConnected);
        }
        let timeout = self.timeout;
        let rpc = self.rpc.as_mut().ok_or(Error::KeyerNotConnected)?;
        rpc.call(method, params, timeout)
            .await
            .map_err(|e| Error::RpcCallFailed {
                call,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl DeviceDriver for FldigiDriver {
    fn backend(&self) -> BackendKind {
        BackendKind::DigitalModesRpc
    }

    async fn initialize(&mut self, profile: &DeviceProfile) -> Result<Capabilities> {
        self.timeout = profile.command_timeout();
        self.version = None;

        if self.rpc.is_none() {
            let LinkSettings::Network { host, port } = &profile.link else {
                return Err(Error::Configuration(format!(
                    "digital-modes keyer needs a network link, got {:?}",
                    profile.link
                )));
            };
            self.rpc = Some(Box::new(XmlRpcTransport::connect(host, *port).await?));
        }

        let timeout = self.timeout;
        let rpc = self.rpc.as_mut().ok_or(Error::KeyerNotConnected)?;
        let reply = rpc
            .call("fldigi.version", &[], timeout)
            .await
            .map_err(|e| Error::Initialization(format!("no answer from {}: {e}", rpc.endpoint())))?;
        let Some(version) = reply.as_str().map(str::to_string) else {
            return Err(Error::Initialization(format!(
                "{} answered fldigi.version with {reply}, expected a string",
                rpc.endpoint()
            )));
        };
        info!(endpoint = %rpc.endpoint(), version = %version, "digital-modes application connected");
        self.version = Some(version);

        Ok(Capabilities::SEND_MORSE | Capabilities::STOP_MORSE)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.version = None;
        self.rpc = None;
        Ok(())
    }

    async fn send_morse(&mut self, text: &str) -> Result<()> {
        let state = self.call("TRX state", "main.get_trx_state", &[]).await?;
        let receiving = match state.as_str() {
            Some(s) => s.eq_ignore_ascii_case("RX"),
            None => {
                return Err(Error::RpcCallFailed {
                    call: "TRX state",
                    reason: format!("expected a string, got {state}"),
                });
            }
        };

        if receiving {
            self.call("Clear", "text.clear_tx", &[]).await?;
        }
        let buffered = format!("{text}{RETURN_TO_RX}");
        self.call("Send", "text.add_tx", &[RpcValue::String(buffered)])
            .await?;
        if receiving {
            self.call("TX", "main.tx", &[]).await?;
        }
        debug!(chars = text.len(), switched = receiving, "text queued for transmit");
        Ok(())
    }

    async fn stop_sending(&mut self) -> Result<()> {
        self.call("Abort", "main.abort", &[]).await?;
        self.call("Clear", "text.clear_tx", &[]).await?;
        Ok(())
    }
}
