//! Upstream endpoint and relay routing.
//!
//! Browsers can't open plain `ws://` sockets to arbitrary hosts from an
//! https page, so every connection goes through one of two fixed relays.
//! The relay is picked by whether the host looks like a domain name.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Port used when the user leaves the port field empty.
pub const DEFAULT_PORT: u16 = 8081;

pub const DEFAULT_DOMAIN_RELAY: &str = "wss://hws.maliya.top/proxy";
pub const DEFAULT_ADDRESS_RELAY: &str = "wss://sfws.maliy.top";

/// A user-supplied backend address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into().trim().to_string(),
            port,
        }
    }

    /// Build an endpoint from the raw host and port text fields.
    ///
    /// An empty port means "use the default". The host may be empty; callers
    /// decide whether that's an error via [`Endpoint::is_configured`].
    pub fn parse(host: &str, port: &str) -> Result<Self, ConfigError> {
        let port = port.trim();
        let port = if port.is_empty() {
            None
        } else {
            Some(
                port.parse::<u16>()
                    .map_err(|_| ConfigError::InvalidPort(port.to_string()))?,
            )
        };
        Ok(Self::new(host, port))
    }

    /// Parse `host` or `host:port`.
    pub fn parse_address(address: &str) -> Result<Self, ConfigError> {
        let address = address.trim();
        match address.rsplit_once(':') {
            // Bare IPv6 addresses contain colons too; only split when the
            // tail is all digits.
            Some((host, port))
                if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
            {
                Self::parse(host, port)
            }
            _ => Self::parse(address, ""),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.host.is_empty()
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// `host:port` with the default port filled in.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port_or_default())
    }

    /// The backend's own websocket URL.
    pub fn upstream_url(&self) -> String {
        format!("ws://{}", self.server_address())
    }

    /// Whether the host looks like a domain name rather than a bare address.
    pub fn is_domain(&self) -> bool {
        self.host.bytes().any(|b| b.is_ascii_alphabetic())
    }

    /// The URL the client actually opens.
    pub fn socket_url(&self, routes: &RelayRoutes) -> Result<String, ConfigError> {
        if !self.is_configured() {
            return Err(ConfigError::MissingHost);
        }
        if routes.direct {
            return Ok(self.upstream_url());
        }
        let relay = if self.is_domain() {
            &routes.domain_relay
        } else {
            &routes.address_relay
        };
        let url = Url::parse_with_params(relay, &[("url", self.upstream_url())]).map_err(|e| {
            ConfigError::InvalidRelay {
                url: relay.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(url.to_string())
    }
}

/// The two relay endpoints, or direct mode for local backends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRoutes {
    pub domain_relay: String,
    pub address_relay: String,
    /// Skip the relay and connect to the upstream URL directly.
    #[serde(default)]
    pub direct: bool,
}

impl Default for RelayRoutes {
    fn default() -> Self {
        Self {
            domain_relay: DEFAULT_DOMAIN_RELAY.to_string(),
            address_relay: DEFAULT_ADDRESS_RELAY.to_string(),
            direct: false,
        }
    }
}

impl RelayRoutes {
    pub fn direct() -> Self {
        Self {
            direct: true,
            ..Self::default()
        }
    }
}
