//! Broker endpoint parsing.
//!
//! The URL scheme selects both the transport and the TLS mode:
//! `mqtt`/`mqtt-tcp` (plain TCP, port 1883), `mqtts` (TLS, 8883), `ws`
//! (websocket, 80), and `wss` (websocket over TLS, 443). An explicit
//! port always wins over the scheme default.

use url::Url;

use crate::error::{RelayError, Result};

/// Transport family selected by the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerTransport {
    Tcp,
    Tls,
    Ws,
    Wss,
}

/// A validated broker endpoint.
#[derive(Debug, Clone)]
pub struct BrokerUrl {
    transport: BrokerTransport,
    host: String,
    port: u16,
    path: String,
}

impl BrokerUrl {
    /// Parse and validate a broker URL.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| RelayError::InvalidConfig(format!("invalid broker url {raw:?}: {e}")))?;

        let (transport, default_port) = match url.scheme() {
            "mqtt" | "mqtt-tcp" => (BrokerTransport::Tcp, 1883),
            "mqtts" => (BrokerTransport::Tls, 8883),
            "ws" => (BrokerTransport::Ws, 80),
            "wss" => (BrokerTransport::Wss, 443),
            other => {
                return Err(RelayError::InvalidConfig(format!(
                    "unsupported broker url scheme: {other}"
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| RelayError::InvalidConfig(format!("broker url {raw:?} has no host")))?
            .to_string();
        let port = url.port().unwrap_or(default_port);

        // Websocket endpoints default to the conventional MQTT path.
        let path = match url.path() {
            "" | "/" => "/mqtt".to_string(),
            p => p.to_string(),
        };

        Ok(Self {
            transport,
            host,
            port,
            path,
        })
    }

    pub fn transport(&self) -> BrokerTransport {
        self.transport
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether this endpoint uses a websocket transport.
    pub fn is_websocket(&self) -> bool {
        matches!(self.transport, BrokerTransport::Ws | BrokerTransport::Wss)
    }

    /// Full URL handed to the MQTT client for websocket transports.
    pub fn websocket_url(&self) -> String {
        let scheme = match self.transport {
            BrokerTransport::Ws => "ws",
            _ => "wss",
        };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}
