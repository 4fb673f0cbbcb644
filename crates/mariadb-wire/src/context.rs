//! Per-connection protocol context.

use crate::handshake::{InitialHandshake, ServerVersion};
use crate::protocol::capabilities;
use crate::protocol::server_status;

/// State negotiated at handshake and updated by every status-carrying
/// response.
#[derive(Debug, Clone)]
pub struct Context {
    client_capabilities: u64,
    server_capabilities: u64,
    charset: u8,
    server_status: u16,
    warnings: u16,
    thread_id: u32,
    server_version: ServerVersion,
    seed: Vec<u8>,
    eof_deprecated: bool,
    skip_meta: bool,
    extended_info: bool,
}

impl Context {
    /// Build the context from the server greeting and the capabilities this
    /// client asked for.
    pub fn new(handshake: &InitialHandshake, requested: u64, charset: u8) -> Self {
        let negotiated = requested & handshake.capabilities;
        Self {
            client_capabilities: negotiated,
            server_capabilities: handshake.capabilities,
            charset,
            server_status: handshake.status_flags,
            warnings: 0,
            thread_id: handshake.connection_id,
            server_version: handshake.server_version.clone(),
            seed: handshake.seed.clone(),
            eof_deprecated: negotiated & capabilities::CLIENT_DEPRECATE_EOF != 0,
            skip_meta: negotiated & capabilities::MARIADB_CLIENT_CACHE_METADATA != 0,
            extended_info: negotiated & capabilities::MARIADB_CLIENT_EXTENDED_TYPE_INFO != 0,
        }
    }

    /// Negotiated capability set.
    pub fn client_capabilities(&self) -> u64 {
        self.client_capabilities
    }

    pub fn has_client_capability(&self, flag: u64) -> bool {
        self.client_capabilities & flag != 0
    }

    pub fn has_server_capability(&self, flag: u64) -> bool {
        self.server_capabilities & flag != 0
    }

    pub fn charset(&self) -> u8 {
        self.charset
    }

    pub fn server_status(&self) -> u16 {
        self.server_status
    }

    pub fn set_server_status(&mut self, status: u16) {
        self.server_status = status;
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    pub fn set_warnings(&mut self, warnings: u16) {
        self.warnings = warnings;
    }

    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    pub fn server_version(&self) -> &ServerVersion {
        &self.server_version
    }

    /// Authentication seed from the greeting.
    pub fn seed(&self) -> &[u8] {
        &self.seed
    }

    /// A result ends with an OK-shaped packet instead of EOF.
    pub fn eof_deprecated(&self) -> bool {
        self.eof_deprecated
    }

    /// OK packets carry a lenenc info string and session-state changes.
    pub fn session_track(&self) -> bool {
        self.has_client_capability(capabilities::CLIENT_SESSION_TRACK)
    }

    /// Result metadata may be omitted when unchanged.
    pub fn can_skip_meta(&self) -> bool {
        self.skip_meta
    }

    /// Column definitions carry MariaDB extended type info.
    pub fn extended_info(&self) -> bool {
        self.extended_info
    }

    pub fn no_backslash_escapes(&self) -> bool {
        self.server_status & server_status::SERVER_STATUS_NO_BACKSLASH_ESCAPES != 0
    }

    pub fn in_transaction(&self) -> bool {
        self.server_status & server_status::SERVER_STATUS_IN_TRANS != 0
    }

    /// Assume a transaction may be open after a failed command.
    pub fn mark_in_transaction(&mut self) {
        self.server_status |= server_status::SERVER_STATUS_IN_TRANS;
    }
}
