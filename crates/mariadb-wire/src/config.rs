//! MariaDB connection configuration.
//!
//! Provides the parameters for establishing a connection: server address,
//! credentials, negotiated options and client-side limits.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use mariadb_wire_core::error::ConfigError;
use mariadb_wire_core::Error;

use crate::protocol::capabilities;

/// MariaDB connection configuration.
#[derive(Debug, Clone)]
pub struct MariaDbConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 3306)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    pub password: Option<String>,
    /// Database to select at connect time
    pub database: Option<String>,
    /// Character set id (default: utf8mb4_general_ci)
    pub charset: u8,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Extra connect attributes, `"key:value,key2:value2"`
    pub connection_attributes: Option<String>,
    /// Allow the server to request LOCAL INFILE transfers (off by default)
    pub local_infile: bool,
    /// Reject outgoing payloads larger than this many bytes
    pub max_allowed_packet: Option<u32>,
    /// Bytes of each frame shown in wire traces
    pub max_query_size_to_log: usize,
    /// Server-side statement time limit
    pub query_timeout: Option<Duration>,
}

impl Default for MariaDbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            charset: crate::protocol::charset::DEFAULT_CHARSET,
            connect_timeout: Duration::from_secs(30),
            connection_attributes: None,
            local_infile: false,
            max_allowed_packet: None,
            max_query_size_to_log: 1024,
            query_timeout: None,
        }
    }
}

impl MariaDbConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hostname.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the character set.
    pub fn charset(mut self, charset: u8) -> Self {
        self.charset = charset;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the connect attributes sent after the built-in ones.
    pub fn connection_attributes(mut self, attributes: impl Into<String>) -> Self {
        self.connection_attributes = Some(attributes.into());
        self
    }

    /// Enable or disable LOCAL INFILE handling.
    ///
    /// # Security Warning
    /// The server chooses which file to read. Requests are only honored when
    /// the file name appears in the command text, but only enable this for
    /// servers you trust.
    pub fn local_infile(mut self, enabled: bool) -> Self {
        self.local_infile = enabled;
        self
    }

    /// Bound the size of outgoing payloads.
    pub fn max_allowed_packet(mut self, size: u32) -> Self {
        self.max_allowed_packet = Some(size);
        self
    }

    /// Set how many bytes of each frame are dumped in traces.
    pub fn max_query_size_to_log(mut self, size: usize) -> Self {
        self.max_query_size_to_log = size;
        self
    }

    /// Limit statement execution time on the server.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Get the socket address string for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolve the server address.
    pub fn resolve(&self) -> Result<SocketAddr, Error> {
        let addr = self.socket_addr();
        let mut addrs = addr.to_socket_addrs().map_err(|e| {
            Error::Config(ConfigError {
                message: format!("Invalid socket address {}: {}", addr, e),
                source: Some(Box::new(e)),
            })
        })?;
        addrs.next().ok_or_else(|| {
            Error::Config(ConfigError {
                message: format!("No address found for {}", addr),
                source: None,
            })
        })
    }

    /// Statement timeout in whole seconds, as sent to the server.
    pub fn query_timeout_secs(&self) -> Option<u32> {
        self.query_timeout
            .map(|t| u32::try_from(t.as_secs()).unwrap_or(u32::MAX))
    }

    /// Build capability flags based on configuration.
    pub fn capability_flags(&self) -> u64 {
        let mut flags = capabilities::DEFAULT_CLIENT_FLAGS;

        if self.database.is_some() {
            flags |= capabilities::CLIENT_CONNECT_WITH_DB;
        }

        if self.local_infile {
            flags |= capabilities::CLIENT_LOCAL_FILES;
        }

        flags
    }
}
