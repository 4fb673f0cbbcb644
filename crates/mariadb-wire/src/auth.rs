//! Authentication plugins.
//!
//! Each mechanism implements [`AuthenticationPlugin`]; the client looks one
//! up by the name the server announces and drives it until the server
//! answers OK or ERR. Adding a mechanism never touches the framer or the
//! command state machine.
//!
//! # mysql_native_password
//!
//! ```text
//! SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
//! ```
//!
//! # caching_sha2_password
//!
//! Fast auth (if cached on server):
//! ```text
//! XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed))
//! ```
//!
//! Full auth sends the password in clear over a secure channel, or RSA
//! encrypted with the server's public key otherwise.

use mariadb_wire_core::Error;
use mariadb_wire_core::error::{ConnectionError, ConnectionErrorKind};

use sha1::Sha1;
use sha2::{Digest, Sha256};

use rand::rngs::OsRng;

use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;

/// Well-known authentication plugin names.
pub mod plugins {
    /// SHA1-based authentication (legacy default)
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    /// SHA256-based authentication (MySQL 8.0+ default)
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    /// RSA-based SHA256 authentication
    pub const SHA256_PASSWORD: &str = "sha256_password";
    /// Clear text password, secure channel only
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
}

/// Response codes for caching_sha2_password protocol.
pub mod caching_sha2 {
    /// Request for public key (client should send 0x02)
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// Fast auth success
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Full auth needed (switch to secure channel or RSA)
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// What the client does after a plugin consumed extra server data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStep {
    /// Send this payload, then read the next server packet.
    Send(Vec<u8>),
    /// Send nothing; the server's next packet settles the exchange.
    Wait,
}

/// One authentication mechanism.
pub trait AuthenticationPlugin: Send {
    /// Name announced in the handshake and auth switch packets.
    fn name(&self) -> &'static str;

    /// Store the credential and the server's scramble.
    fn initialize(&mut self, password: Option<&str>, seed: &[u8]);

    /// First response, sent in the handshake response or after a switch.
    fn initial_response(&mut self, secure: bool) -> Result<Vec<u8>, Error>;

    /// Consume an extra-data packet (`0x01` prefix removed).
    fn continue_auth(&mut self, data: &[u8], secure: bool) -> Result<AuthStep, Error> {
        let _ = (data, secure);
        Err(auth_error(format!(
            "Unexpected authentication data for plugin {}",
            self.name()
        )))
    }
}

impl std::fmt::Debug for dyn AuthenticationPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationPlugin")
            .field("name", &self.name())
            .finish()
    }
}

/// Look up a plugin by name.
pub fn plugin_for(name: &str) -> Option<Box<dyn AuthenticationPlugin>> {
    match name {
        plugins::MYSQL_NATIVE_PASSWORD => Some(Box::new(NativePasswordPlugin::default())),
        plugins::MYSQL_CLEAR_PASSWORD => Some(Box::new(ClearPasswordPlugin::default())),
        plugins::CACHING_SHA2_PASSWORD => Some(Box::new(CachingSha2PasswordPlugin::default())),
        plugins::SHA256_PASSWORD => Some(Box::new(Sha256PasswordPlugin::default())),
        _ => None,
    }
}

/// Look up a plugin, failing with an authentication error when unknown.
pub fn require_plugin(name: &str) -> Result<Box<dyn AuthenticationPlugin>, Error> {
    plugin_for(name).ok_or_else(|| {
        auth_error(format!(
            "Client does not support authentication protocol requested by server: {}",
            name
        ))
    })
}

pub(crate) fn auth_error(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message: msg.into(),
        source: None,
    })
}

/// `mysql_native_password`.
#[derive(Debug, Default)]
pub struct NativePasswordPlugin {
    password: Option<String>,
    seed: Vec<u8>,
}

impl AuthenticationPlugin for NativePasswordPlugin {
    fn name(&self) -> &'static str {
        plugins::MYSQL_NATIVE_PASSWORD
    }

    fn initialize(&mut self, password: Option<&str>, seed: &[u8]) {
        self.password = password.map(str::to_string);
        self.seed = seed.to_vec();
    }

    fn initial_response(&mut self, _secure: bool) -> Result<Vec<u8>, Error> {
        Ok(mysql_native_password(
            self.password.as_deref().unwrap_or(""),
            &self.seed,
        ))
    }
}

/// `mysql_clear_password`.
#[derive(Debug, Default)]
pub struct ClearPasswordPlugin {
    password: Option<String>,
}

impl AuthenticationPlugin for ClearPasswordPlugin {
    fn name(&self) -> &'static str {
        plugins::MYSQL_CLEAR_PASSWORD
    }

    fn initialize(&mut self, password: Option<&str>, _seed: &[u8]) {
        self.password = password.map(str::to_string);
    }

    fn initial_response(&mut self, secure: bool) -> Result<Vec<u8>, Error> {
        if !secure {
            return Err(auth_error(
                "Cannot send password in clear if SSL is not enabled.",
            ));
        }
        Ok(nul_terminated(self.password.as_deref().unwrap_or("")))
    }
}

/// `caching_sha2_password`.
#[derive(Debug, Default)]
pub struct CachingSha2PasswordPlugin {
    password: Option<String>,
    seed: Vec<u8>,
    awaiting_key: bool,
}

impl AuthenticationPlugin for CachingSha2PasswordPlugin {
    fn name(&self) -> &'static str {
        plugins::CACHING_SHA2_PASSWORD
    }

    fn initialize(&mut self, password: Option<&str>, seed: &[u8]) {
        self.password = password.map(str::to_string);
        self.seed = seed.to_vec();
        self.awaiting_key = false;
    }

    fn initial_response(&mut self, _secure: bool) -> Result<Vec<u8>, Error> {
        Ok(caching_sha2_password(
            self.password.as_deref().unwrap_or(""),
            &self.seed,
        ))
    }

    fn continue_auth(&mut self, data: &[u8], secure: bool) -> Result<AuthStep, Error> {
        let password = self.password.as_deref().unwrap_or("");
        if self.awaiting_key {
            self.awaiting_key = false;
            let encrypted = sha256_password_rsa(password, &self.seed, data)?;
            return Ok(AuthStep::Send(encrypted));
        }

        match data.first() {
            Some(&caching_sha2::FAST_AUTH_SUCCESS) => Ok(AuthStep::Wait),
            Some(&caching_sha2::PERFORM_FULL_AUTH) => {
                if secure {
                    Ok(AuthStep::Send(nul_terminated(password)))
                } else {
                    self.awaiting_key = true;
                    Ok(AuthStep::Send(vec![caching_sha2::REQUEST_PUBLIC_KEY]))
                }
            }
            Some(other) => Err(auth_error(format!(
                "Unknown caching_sha2_password response: {:#04x}",
                other
            ))),
            None => Err(auth_error("Empty caching_sha2_password response")),
        }
    }
}

/// `sha256_password`.
#[derive(Debug, Default)]
pub struct Sha256PasswordPlugin {
    password: Option<String>,
    seed: Vec<u8>,
}

impl AuthenticationPlugin for Sha256PasswordPlugin {
    fn name(&self) -> &'static str {
        plugins::SHA256_PASSWORD
    }

    fn initialize(&mut self, password: Option<&str>, seed: &[u8]) {
        self.password = password.map(str::to_string);
        self.seed = seed.to_vec();
    }

    fn initial_response(&mut self, secure: bool) -> Result<Vec<u8>, Error> {
        match self.password.as_deref() {
            None | Some("") => Ok(vec![0]),
            Some(password) if secure => Ok(nul_terminated(password)),
            // ask for the public key
            Some(_) => Ok(vec![0x01]),
        }
    }

    fn continue_auth(&mut self, data: &[u8], _secure: bool) -> Result<AuthStep, Error> {
        let password = self.password.as_deref().unwrap_or("");
        let encrypted = sha256_password_rsa(password, &self.seed, data)?;
        Ok(AuthStep::Send(encrypted))
    }
}

fn nul_terminated(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password.as_bytes());
    out.push(0);
    out
}

/// Compute the mysql_native_password scramble.
///
/// Returns an empty response for an empty password.
pub fn mysql_native_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }

    let seed = &auth_data[..auth_data.len().min(20)];

    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; 20] = Sha1::digest(stage1).into();

    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3: [u8; 20] = hasher.finalize().into();

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Compute the caching_sha2_password fast authentication scramble.
///
/// Returns an empty response for an empty password.
pub fn caching_sha2_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }

    // MySQL sends a 20-byte scramble followed by NUL
    let seed = if auth_data.len() == 21 && auth_data.last() == Some(&0) {
        &auth_data[..20]
    } else {
        auth_data
    };

    let password_hash: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let password_hash_hash: [u8; 32] = Sha256::digest(password_hash).into();

    let mut hasher = Sha256::new();
    hasher.update(password_hash_hash);
    hasher.update(seed);
    let scramble: [u8; 32] = hasher.finalize().into();

    password_hash
        .iter()
        .zip(scramble.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Encrypt `password + NUL`, XORed with the rotating seed, with the
/// server's RSA public key (OAEP padding).
pub fn sha256_password_rsa(
    password: &str,
    seed: &[u8],
    public_key_pem: &[u8],
) -> Result<Vec<u8>, Error> {
    if seed.is_empty() {
        return Err(auth_error("Authentication seed is empty"));
    }

    let mut pw = nul_terminated(password);
    for (i, b) in pw.iter_mut().enumerate() {
        *b ^= seed[i % seed.len()];
    }

    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| auth_error(format!("Public key is not valid UTF-8 PEM: {e}")))?;

    let pub_key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| auth_error(format!("Failed to parse RSA public key PEM: {e}")))?;

    pub_key
        .encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &pw)
        .map_err(|e| auth_error(format!("RSA OAEP encryption failed: {e}")))
}
