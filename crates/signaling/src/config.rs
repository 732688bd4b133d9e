//! Signaling server configuration

use crate::engine::{opus_codec, RtpCodecCapability};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

/// Media worker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Lowest RTC port the worker binds
    pub rtc_min_port: u16,

    /// Highest RTC port the worker binds
    pub rtc_max_port: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            rtc_min_port: 2000,
            rtc_max_port: 2020,
        }
    }
}

/// Address a transport listens on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenIp {
    /// Local bind address
    pub ip: IpAddr,

    /// Public address advertised in candidates instead of `ip`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announced_ip: Option<String>,
}

/// Settings applied to every WebRTC transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcTransportConfig {
    /// Addresses to gather candidates on
    pub listen_ips: Vec<ListenIp>,

    /// Offer UDP candidates
    pub enable_udp: bool,

    /// Offer TCP candidates
    pub enable_tcp: bool,

    /// Rank UDP candidates above TCP
    pub prefer_udp: bool,
}

impl Default for WebRtcTransportConfig {
    fn default() -> Self {
        Self {
            listen_ips: vec![ListenIp {
                ip: IpAddr::from([127, 0, 0, 1]),
                announced_ip: None,
            }],
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
        }
    }
}

/// Routing context settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Codecs the router can route
    pub media_codecs: Vec<RtpCodecCapability>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            media_codecs: vec![opus_codec()],
        }
    }
}

/// Configuration for the signaling server
///
/// Every section is optional in TOML; missing values take the defaults.
///
/// ```toml
/// listen_address = "0.0.0.0"
/// port = 3000
///
/// [worker]
/// rtc_min_port = 40000
/// rtc_max_port = 40100
///
/// [[webrtc_transport.listen_ips]]
/// ip = "0.0.0.0"
/// announced_ip = "203.0.113.7"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the signaling endpoint binds to
    pub listen_address: String,

    /// Port of the signaling endpoint (0 picks a free port)
    pub port: u16,

    /// Maximum number of concurrent sessions (0 = unlimited)
    pub max_sessions: usize,

    /// Media engine worker settings
    pub worker: WorkerConfig,

    /// Routing context settings
    pub router: RouterConfig,

    /// Options for every WebRTC transport created
    pub webrtc_transport: WebRtcTransportConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            port: 3000,
            max_sessions: 0,
            worker: WorkerConfig::default(),
            router: RouterConfig::default(),
            webrtc_transport: WebRtcTransportConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file and validate it
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Socket address of the signaling endpoint
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.listen_address.parse().map_err(|e| {
            Error::InvalidConfig(format!(
                "listen_address {:?} is not an IP address: {}",
                self.listen_address, e
            ))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `listen_address` is empty or not an IP address
    /// - the worker port range is zero or inverted
    /// - no media codec is configured
    /// - no listen ip is configured, or an announced ip does not parse
    /// - neither UDP nor TCP is enabled
    pub fn validate(&self) -> Result<()> {
        if self.listen_address.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "listen_address must not be empty".to_string(),
            ));
        }
        self.socket_addr()?;

        let worker = &self.worker;
        if worker.rtc_min_port == 0 || worker.rtc_min_port > worker.rtc_max_port {
            return Err(Error::InvalidConfig(format!(
                "worker port range {}-{} is invalid",
                worker.rtc_min_port, worker.rtc_max_port
            )));
        }

        if self.router.media_codecs.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one media codec is required".to_string(),
            ));
        }

        let transport = &self.webrtc_transport;
        if transport.listen_ips.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one listen ip is required".to_string(),
            ));
        }
        for listen_ip in &transport.listen_ips {
            if let Some(announced) = &listen_ip.announced_ip {
                announced.parse::<IpAddr>().map_err(|_| {
                    Error::InvalidConfig(format!(
                        "announced_ip {:?} is not an IP address",
                        announced
                    ))
                })?;
            }
        }
        if !transport.enable_udp && !transport.enable_tcp {
            return Err(Error::InvalidConfig(
                "webrtc_transport must enable UDP or TCP".to_string(),
            ));
        }

        Ok(())
    }
}
