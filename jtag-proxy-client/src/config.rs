use std::{fmt::Display, time::Duration};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Address of the remote debug bridge.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Endpoint {
        Endpoint {
            host: host.into(),
            port,
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Endpoint,
    /// Upper bound for the blocking connect performed by [`crate::JtagProxy::connect`].
    pub connect_timeout: Duration,
}

impl Config {
    /// Configuration for a bridge on `localhost` at `port`.
    pub fn new(port: u16) -> Config {
        Builder::new().build(port)
    }
}

/// Builder to create a [Config]. The port has no default and must be given to [`Builder::build`].
///
/// # Example
///
/// ```
/// use jtag_proxy_client::config::Builder;
/// use std::time::Duration;
///
/// let config = Builder::new()
///     .host("10.0.0.2")
///     .connect_timeout(Duration::from_secs(2))
///     .build(4567);
/// assert_eq!(config.endpoint.to_string(), "10.0.0.2:4567");
/// ```
pub struct Builder {
    host: String,
    connect_timeout: Duration,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the host name or IP address of the debug bridge
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the timeout of the initial, blocking connect
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn build(self, port: u16) -> Config {
        Config {
            endpoint: Endpoint::new(self.host, port),
            connect_timeout: self.connect_timeout,
        }
    }
}

#[test]
fn default_config() {
    let config = Config::new(1234);
    assert_eq!(config.endpoint, Endpoint::new("localhost", 1234));
    assert_eq!(config.connect_timeout, Duration::from_secs(10));
}
