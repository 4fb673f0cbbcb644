//! Connection phase packets: the server greeting and the client's answer.

#![allow(clippy::cast_possible_truncation)]

use mariadb_wire_core::Error;

use crate::auth::plugins;
use crate::protocol::{PacketReader, PacketWriter, capabilities, charset, protocol_error, truncated};

/// Maximum packet size announced to the server (1 GiB).
pub const CLIENT_MAX_PACKET_SIZE: u32 = 1024 * 1024 * 1024;

const MARIADB_RPL_HACK_PREFIX: &str = "5.5.5-";

/// Parsed server version string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerVersion {
    raw: String,
    mariadb: bool,
    major: u32,
    minor: u32,
    patch: u32,
}

impl ServerVersion {
    /// Parse a version such as `8.0.36` or `5.5.5-10.11.6-MariaDB-log`.
    pub fn parse(version: &str) -> Self {
        let (raw, hacked) = match version.strip_prefix(MARIADB_RPL_HACK_PREFIX) {
            Some(rest) => (rest, true),
            None => (version, false),
        };
        let mariadb = hacked || raw.contains("MariaDB");

        let mut numbers = [0u32; 3];
        let mut idx = 0;
        for c in raw.chars() {
            match c {
                '0'..='9' => {
                    let digit = c as u32 - '0' as u32;
                    numbers[idx] = numbers[idx].saturating_mul(10).saturating_add(digit);
                }
                '.' if idx < 2 => idx += 1,
                _ => break,
            }
        }

        Self {
            raw: raw.to_string(),
            mariadb,
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
        }
    }

    /// Version text with the replication prefix removed.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_mariadb(&self) -> bool {
        self.mariadb
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn patch(&self) -> u32 {
        self.patch
    }

    /// Whether this version is at least `major.minor.patch`.
    pub fn at_least(&self, major: u32, minor: u32, patch: u32) -> bool {
        (self.major, self.minor, self.patch) >= (major, minor, patch)
    }
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Protocol-10 greeting sent by the server when the socket opens.
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: ServerVersion,
    pub connection_id: u32,
    /// Scramble: part 1 (8 bytes) followed by part 2 without its NUL.
    pub seed: Vec<u8>,
    /// Server capabilities, MariaDB extended flags in the upper 32 bits.
    pub capabilities: u64,
    pub default_charset: u8,
    pub status_flags: u16,
    pub auth_plugin: String,
}

impl InitialHandshake {
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let mut reader = PacketReader::new(data);

        if reader.peek() == Some(0xFF) {
            let err = reader
                .parse_err_packet()
                .ok_or_else(|| truncated("error packet", data))?;
            return Err(protocol_error(format!(
                "Server refused connection: ({}) {}",
                err.error_code, err.error_message
            )));
        }

        let protocol_version = reader
            .read_u8()
            .ok_or_else(|| truncated("protocol version", data))?;
        if protocol_version != 10 {
            return Err(protocol_error(format!(
                "Unsupported protocol version: {}",
                protocol_version
            )));
        }

        let version = reader
            .read_null_string()
            .ok_or_else(|| truncated("server version", data))?;
        let connection_id = reader
            .read_u32_le()
            .ok_or_else(|| truncated("connection id", data))?;
        let seed1 = reader
            .read_bytes(8)
            .ok_or_else(|| truncated("seed", data))?;
        reader.skip(1);

        let caps_lower = reader
            .read_u16_le()
            .ok_or_else(|| truncated("capability flags", data))?;
        let default_charset = reader.read_u8().unwrap_or(charset::DEFAULT_CHARSET);
        let status_flags = reader.read_u16_le().unwrap_or(0);
        let caps_upper = reader.read_u16_le().unwrap_or(0);
        let mut caps = u64::from(caps_lower) | (u64::from(caps_upper) << 16);

        let auth_data_len = reader.read_u8().unwrap_or(0) as usize;
        reader.skip(6);
        let extended = reader.read_u32_le().unwrap_or(0);
        if caps & capabilities::CLIENT_MYSQL == 0 {
            caps |= u64::from(extended) << 32;
        }

        let mut seed = seed1.to_vec();
        if caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            let len2 = auth_data_len.saturating_sub(8).max(13);
            let part2 = reader
                .read_bytes(len2.min(reader.remaining()))
                .unwrap_or_default();
            let part2 = part2.strip_suffix(&[0]).unwrap_or(part2);
            seed.extend_from_slice(part2);
        }

        let auth_plugin = if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            reader
                .read_null_string()
                .unwrap_or_else(|| reader.read_rest_string())
        } else {
            String::new()
        };
        let auth_plugin = if auth_plugin.is_empty() {
            plugins::MYSQL_NATIVE_PASSWORD.to_string()
        } else {
            auth_plugin
        };

        Ok(Self {
            protocol_version,
            server_version: ServerVersion::parse(&version),
            connection_id,
            seed,
            capabilities: caps,
            default_charset,
            status_flags,
            auth_plugin,
        })
    }
}

/// The client's answer to [`InitialHandshake`].
#[derive(Debug, Clone)]
pub struct HandshakeResponse<'a> {
    /// Negotiated capability set.
    pub capabilities: u64,
    pub charset: u8,
    pub user: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin: &'a str,
    pub server_host: &'a str,
    /// User attributes as `key:value` pairs separated by commas.
    pub connection_attributes: Option<&'a str>,
}

impl HandshakeResponse<'_> {
    pub fn encode(&self) -> PacketWriter {
        let caps = self.capabilities;
        let mut w = PacketWriter::packet();

        w.write_u32_le(caps as u32);
        w.write_u32_le(CLIENT_MAX_PACKET_SIZE);
        w.write_u8(self.charset);
        w.write_zeros(19);
        w.write_u32_le((caps >> 32) as u32);

        w.write_null_string(self.user);

        if caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            w.write_lenenc_bytes(self.auth_response);
        } else if caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            // scrambles are at most 32 bytes
            w.write_u8(self.auth_response.len() as u8);
            w.write_bytes(self.auth_response);
        } else {
            w.write_bytes(self.auth_response);
            w.write_u8(0);
        }

        if caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            w.write_null_string(self.database.unwrap_or(""));
        }

        if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            w.write_null_string(self.auth_plugin);
        }

        if caps & capabilities::CLIENT_CONNECT_ATTRS != 0 {
            let attrs = connect_attributes(self.server_host, self.connection_attributes);
            w.write_lenenc_bytes(attrs.as_bytes());
        }
        w
    }
}

/// Key/value block sent with CONNECT_ATTRS.
fn connect_attributes(server_host: &str, user_attributes: Option<&str>) -> PacketWriter {
    let mut w = PacketWriter::with_capacity(200);
    let mut pair = |key: &str, value: &str| {
        w.write_lenenc_string(key);
        w.write_lenenc_string(value);
    };
    pair("_client_name", env!("CARGO_PKG_NAME"));
    pair("_client_version", env!("CARGO_PKG_VERSION"));
    pair("_server_host", server_host);
    pair("_os", std::env::consts::OS);
    pair("_thread", &std::process::id().to_string());

    if let Some(attributes) = user_attributes {
        for token in attributes.split(',') {
            match token.split_once(':') {
                Some((key, value)) => pair(key, value),
                None => pair(token, ""),
            }
        }
    }
    w
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::capabilities::*;
    use crate::testing;

    #[test]
    fn test_server_version_parse() {
        let v = ServerVersion::parse("5.5.5-10.11.6-MariaDB-log");
        assert!(v.is_mariadb());
        assert_eq!(v.as_str(), "10.11.6-MariaDB-log");
        assert_eq!((v.major(), v.minor(), v.patch()), (10, 11, 6));
        assert!(v.at_least(10, 2, 0));

        let v = ServerVersion::parse("8.0.36");
        assert!(!v.is_mariadb());
        assert_eq!((v.major(), v.minor(), v.patch()), (8, 0, 36));
        assert!(!v.at_least(8, 1, 0));

        assert!(ServerVersion::parse("11.4.2-MariaDB").is_mariadb());
    }

    #[test]
    fn test_parse_mariadb_greeting() {
        let seed: [u8; 20] = std::array::from_fn(|i| i as u8 + 1);
        let server = CLIENT_PROTOCOL_41
            | CLIENT_SECURE_CONNECTION
            | CLIENT_PLUGIN_AUTH
            | MARIADB_CLIENT_EXTENDED_TYPE_INFO;
        let raw = testing::handshake_packet(server, "mysql_native_password", &seed);
        let hs = InitialHandshake::parse(&raw).unwrap();

        assert_eq!(hs.protocol_version, 10);
        assert_eq!(hs.connection_id, 42);
        assert_eq!(hs.seed, seed.to_vec());
        assert_eq!(hs.capabilities, server);
        assert_eq!(hs.auth_plugin, "mysql_native_password");
        assert_eq!(hs.default_charset, charset::DEFAULT_CHARSET);
        assert!(hs.server_version.is_mariadb());
    }

    #[test]
    fn test_extended_caps_ignored_for_mysql() {
        let server = CLIENT_MYSQL | CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION;
        let mut raw = testing::handshake_packet(server, "", &[9u8; 20]);
        // a MySQL server may put anything in the reserved area
        raw[50..54].copy_from_slice(&[0xFF; 4]);
        let hs = InitialHandshake::parse(&raw).unwrap();
        assert_eq!(hs.capabilities, server);
        assert_eq!(hs.auth_plugin, "mysql_native_password");
    }

    #[test]
    fn test_greeting_errors() {
        let err = InitialHandshake::parse(&[9, b'x', 0]).unwrap_err();
        assert!(err.to_string().contains("Unsupported protocol version: 9"));

        let err = InitialHandshake::parse(&[10, b'8', 0, 1]).unwrap_err();
        assert!(err.to_string().contains("connection id"));

        let refused = testing::err_packet(1040, "08004", "Too many connections");
        let err = InitialHandshake::parse(&refused).unwrap_err();
        assert!(err.to_string().contains("Too many connections"));
    }

    fn response(caps: u64) -> Vec<u8> {
        let r = HandshakeResponse {
            capabilities: caps,
            charset: charset::DEFAULT_CHARSET,
            user: "app",
            auth_response: &[0xAA; 20],
            database: Some("shop"),
            auth_plugin: "mysql_native_password",
            server_host: "db.local",
            connection_attributes: Some("program:etl,flag"),
        };
        r.encode().into_bytes()
    }

    #[test]
    fn test_response_layout() {
        let caps = CLIENT_PROTOCOL_41
            | CLIENT_SECURE_CONNECTION
            | CLIENT_PLUGIN_AUTH
            | CLIENT_CONNECT_WITH_DB
            | MARIADB_CLIENT_EXTENDED_TYPE_INFO;
        let bytes = response(caps);
        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_u32_le(), Some(caps as u32));
        assert_eq!(r.read_u32_le(), Some(CLIENT_MAX_PACKET_SIZE));
        assert_eq!(r.read_u8(), Some(charset::DEFAULT_CHARSET));
        assert!(r.skip(19));
        assert_eq!(r.read_u32_le(), Some((caps >> 32) as u32));
        assert_eq!(r.read_null_string().as_deref(), Some("app"));
        assert_eq!(r.read_u8(), Some(20));
        assert_eq!(r.read_bytes(20), Some(&[0xAA; 20][..]));
        assert_eq!(r.read_null_string().as_deref(), Some("shop"));
        assert_eq!(
            r.read_null_string().as_deref(),
            Some("mysql_native_password")
        );
        assert!(r.is_empty());
    }

    #[test]
    fn test_response_lenenc_auth_and_attributes() {
        let caps = CLIENT_PROTOCOL_41
            | CLIENT_SECURE_CONNECTION
            | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
            | CLIENT_CONNECT_ATTRS;
        let bytes = response(caps);
        let mut r = PacketReader::new(&bytes);
        assert!(r.skip(32));
        assert_eq!(r.read_null_string().as_deref(), Some("app"));
        assert_eq!(r.read_lenenc_bytes(), Some(&[0xAA; 20][..]));

        let block = r.read_lenenc_bytes().unwrap();
        assert!(r.is_empty());
        let mut attrs = PacketReader::new(block);
        let mut pairs = Vec::new();
        while !attrs.is_empty() {
            let k = attrs.read_lenenc_string().unwrap();
            let v = attrs.read_lenenc_string().unwrap();
            pairs.push((k, v));
        }
        assert_eq!(pairs[0], ("_client_name".to_string(), "mariadb-wire".to_string()));
        assert_eq!(pairs[2], ("_server_host".to_string(), "db.local".to_string()));
        assert_eq!(pairs[4].0, "_thread");
        assert_eq!(pairs[5], ("program".to_string(), "etl".to_string()));
        assert_eq!(pairs[6], ("flag".to_string(), String::new()));
    }

    #[test]
    fn test_response_without_secure_connection() {
        let bytes = response(CLIENT_PROTOCOL_41);
        let mut r = PacketReader::new(&bytes);
        assert!(r.skip(32));
        assert_eq!(r.read_null_string().as_deref(), Some("app"));
        assert_eq!(r.read_bytes(20), Some(&[0xAA; 20][..]));
        assert_eq!(r.read_u8(), Some(0));
        assert!(r.is_empty());
    }
}
