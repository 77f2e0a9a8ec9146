//! Message bus configuration
//!
//! Configuration is a JSON document naming the transport `type` plus one entry
//! per topic or service name:
//!
//! ```json
//! {
//!     "type": "tcp",
//!     "allowed_clients": ["camera-key"],
//!     "camera": { "host": "127.0.0.1", "port": 5569, "client_key": "camera-key" }
//! }
//! ```
//!
//! `ipc` configurations use `socket_dir` instead of host/port, and `inproc`
//! needs nothing else.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Allows any client key when present in `allowed_clients`
pub const ANY_CLIENT: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// In-memory broker scoped to one client
    Inproc,
    #[serde(alias = "zmq_tcp")]
    Tcp,
    #[serde(alias = "zmq_ipc")]
    Ipc,
}

/// Per topic/service settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Socket file name under `socket_dir`, defaults to the endpoint name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_file: Option<String>,
    /// Key presented when subscribing to or requesting from this endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "type")]
    pub transport: TransportKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_dir: Option<PathBuf>,

    /// Client keys accepted by publishers and services of this client;
    /// `None` accepts everyone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_clients: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,

    /// How long a publisher waits on one subscriber before dropping it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_timeout_ms: Option<u64>,

    #[serde(flatten)]
    pub endpoints: HashMap<String, EndpointConfig>,
}

impl Config {
    fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            socket_dir: None,
            allowed_clients: None,
            connect_timeout_ms: None,
            send_timeout_ms: None,
            endpoints: HashMap::new(),
        }
    }

    pub fn inproc() -> Self {
        Self::new(TransportKind::Inproc)
    }

    pub fn tcp() -> Self {
        Self::new(TransportKind::Tcp)
    }

    pub fn ipc(socket_dir: impl AsRef<Path>) -> Self {
        Self {
            socket_dir: Some(socket_dir.as_ref().to_path_buf()),
            ..Self::new(TransportKind::Ipc)
        }
    }

    pub fn with_endpoint(mut self, name: impl Into<String>, endpoint: EndpointConfig) -> Self {
        self.endpoints.insert(name.into(), endpoint);
        self
    }

    pub fn with_allowed_clients<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_clients = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Parse a JSON configuration document
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(e.to_string()))
    }

    /// Build a configuration from an already parsed JSON mapping
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::config(e.to_string()))
    }

    /// Read and parse a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::config("configuration file name cannot be empty"));
        }
        let json = std::fs::read_to_string(path)?;
        Self::parse(&json)
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints.get(name)
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SEND_TIMEOUT)
    }

    /// Check a peer's presented key against `allowed_clients`
    pub fn is_client_allowed(&self, key: Option<&str>) -> bool {
        match &self.allowed_clients {
            None => true,
            Some(allowed) => allowed
                .iter()
                .any(|k| k == ANY_CLIENT || Some(k.as_str()) == key),
        }
    }
}

impl EndpointConfig {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            ..Self::default()
        }
    }

    pub fn with_socket_file(mut self, file: impl Into<String>) -> Self {
        self.socket_file = Some(file.into());
        self
    }

    pub fn with_client_key(mut self, key: impl Into<String>) -> Self {
        self.client_key = Some(key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_config_with_endpoints() {
        let config = Config::parse(
            r#"{
                "type": "zmq_tcp",
                "allowed_clients": ["*"],
                "camera": {"host": "127.0.0.1", "port": 5569},
                "echo": {"host": "localhost", "port": 5570, "client_key": "abc"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.transport, TransportKind::Tcp);
        assert_eq!(config.endpoint("camera"), Some(&EndpointConfig::tcp("127.0.0.1", 5569)));
        assert_eq!(
            config.endpoint("echo").and_then(|e| e.client_key.as_deref()),
            Some("abc")
        );
        assert!(config.endpoint("missing").is_none());
    }

    #[test]
    fn parses_ipc_config() {
        let config = Config::parse(r#"{"type": "zmq_ipc", "socket_dir": "/tmp/socks"}"#).unwrap();
        assert_eq!(config.transport, TransportKind::Ipc);
        assert_eq!(config.socket_dir, Some(PathBuf::from("/tmp/socks")));
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn rejects_unknown_transport() {
        let err = Config::parse(r#"{"type": "carrier_pigeon"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn client_allow_list() {
        let open = Config::inproc();
        assert!(open.is_client_allowed(None));

        let restricted = Config::inproc().with_allowed_clients(["good"]);
        assert!(restricted.is_client_allowed(Some("good")));
        assert!(!restricted.is_client_allowed(Some("bad")));
        assert!(!restricted.is_client_allowed(None));

        let wildcard = Config::inproc().with_allowed_clients([ANY_CLIENT]);
        assert!(wildcard.is_client_allowed(None));
    }

    #[test]
    fn empty_file_name_is_rejected() {
        assert!(matches!(Config::from_file(""), Err(Error::Config(_))));
    }

    #[test]
    fn connect_timeout_defaults() {
        assert_eq!(Config::tcp().connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
        let config = Config::tcp().with_connect_timeout(Duration::from_millis(250));
        assert_eq!(config.connect_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn send_timeout_defaults() {
        assert_eq!(Config::tcp().send_timeout(), DEFAULT_SEND_TIMEOUT);
        let config = Config::parse(r#"{"type": "tcp", "send_timeout_ms": 40}"#).unwrap();
        assert_eq!(config.send_timeout(), Duration::from_millis(40));
        assert!(config.endpoints.is_empty());
    }
}
