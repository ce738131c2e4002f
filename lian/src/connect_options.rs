// Copyright (c) 2023 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use codec::utils::random_string;
use codec::QoS;

use crate::backoff::Backoff;
use crate::error::{Error, ErrorKind};

const MIN_CHANNEL_CAPACITY: usize = 1;
const MAX_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_CHANNEL_CAPACITY: usize = 128;
const DEFAULT_KEEP_ALIVE_FACTOR: f64 = 1.2;

/// Username/password credentials presented in the Connect packet.
#[derive(Clone, Debug)]
pub struct UsernameAuth {
    pub username: String,
    pub password: String,
}

/// Will message stored on the Server and published on behalf of the client
/// when the connection ends abnormally.
#[derive(Clone, Debug)]
pub struct LastWill {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub message: Vec<u8>,
}

/// TLS settings shared by all server connections.
///
/// Certificate and key files are PEM encoded. Paths are checked when the
/// config is handed to [`ConnectOptions::set_tls`]; a missing or unreadable
/// file fails loudly there, before any dial is attempted.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    /// Extra root CA file appended to the builtin webpki roots.
    pub root_ca: Option<PathBuf>,

    /// Client certificate chain for mutual TLS.
    pub cert_file: Option<PathBuf>,

    /// Private key matching `cert_file`.
    pub key_file: Option<PathBuf>,

    /// Override the server name used for SNI and certificate checks.
    /// Defaults to the host part of the server address.
    pub domain: Option<String>,

    /// Do not verify the server certificate chain. Dangerous, only for
    /// development setups with self signed certificates.
    pub skip_verify: bool,
}

impl TlsConfig {
    /// Check that every configured file is readable and that client
    /// certificate and key are given as a pair.
    ///
    /// # Errors
    ///
    /// Returns error on a missing or unreadable file, or on a lone
    /// `cert_file`/`key_file`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(Error::new(
                ErrorKind::CertError,
                "cert_file and key_file must be set together",
            ));
        }
        for path in self
            .root_ca
            .iter()
            .chain(self.cert_file.iter())
            .chain(self.key_file.iter())
        {
            if let Err(err) = File::open(path) {
                return Err(Error::from_string(
                    ErrorKind::CertError,
                    format!("Cannot read {}: {err}", path.display()),
                ));
            }
        }
        Ok(())
    }
}

/// Immutable client configuration, assembled before the first connect.
///
/// Setters are chainable and clamp values into their valid ranges. Once the
/// options object is handed to a `Client` it is never mutated again.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    servers: Vec<String>,
    client_id: String,
    clean_session: bool,
    keep_alive: Duration,
    keep_alive_factor: f64,
    connect_timeout: Duration,
    auth: Option<UsernameAuth>,
    last_will: Option<LastWill>,
    tls: Option<TlsConfig>,
    send_channel_capacity: usize,
    recv_channel_capacity: usize,
    backoff: Backoff,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            servers: vec!["localhost:1883".to_string()],
            client_id: random_string(8),
            clean_session: true,
            keep_alive: Duration::from_secs(30),
            keep_alive_factor: DEFAULT_KEEP_ALIVE_FACTOR,
            connect_timeout: Duration::from_secs(10),
            auth: None,
            last_will: None,
            tls: None,
            send_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            recv_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backoff: Backoff::default(),
        }
    }
}

impl ConnectOptions {
    /// Create options for a list of `host:port` server addresses.
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn set_client_id(&mut self, client_id: &str) -> &mut Self {
        self.client_id = client_id.to_string();
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    /// Update keep alive interval. Zero disables the keepalive supervisor.
    pub fn set_keep_alive(&mut self, keep_alive: Duration) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Update keep alive factor. The connection counts as dead when no ping
    /// response arrives within `keep_alive * factor`. Values not above 1.0
    /// fall back to the default of 1.2.
    pub fn set_keep_alive_factor(&mut self, factor: f64) -> &mut Self {
        if factor > 1.0 {
            self.keep_alive_factor = factor;
        } else {
            log::warn!("Ignored keep alive factor {factor}, must be > 1.0");
            self.keep_alive_factor = DEFAULT_KEEP_ALIVE_FACTOR;
        }
        self
    }

    #[must_use]
    pub const fn keep_alive_factor(&self) -> f64 {
        self.keep_alive_factor
    }

    /// Update timeout bounding both the dial step and the ConnAck wait.
    pub fn set_connect_timeout(&mut self, connect_timeout: Duration) -> &mut Self {
        self.connect_timeout = connect_timeout;
        self
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn set_auth(&mut self, username: &str, password: &str) -> &mut Self {
        self.auth = Some(UsernameAuth {
            username: username.to_string(),
            password: password.to_string(),
        });
        self
    }

    #[must_use]
    pub const fn auth(&self) -> Option<&UsernameAuth> {
        self.auth.as_ref()
    }

    pub fn set_last_will(&mut self, last_will: LastWill) -> &mut Self {
        self.last_will = Some(last_will);
        self
    }

    #[must_use]
    pub const fn last_will(&self) -> Option<&LastWill> {
        self.last_will.as_ref()
    }

    /// Install the TLS settings after validating them.
    ///
    /// # Panics
    ///
    /// Panics when `tls` names a missing or unreadable file, or a client
    /// certificate without its key.
    pub fn set_tls(&mut self, tls: TlsConfig) -> &mut Self {
        if let Err(err) = tls.validate() {
            panic!("Invalid TLS config: {err}");
        }
        self.tls = Some(tls);
        self
    }

    #[must_use]
    pub const fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }

    /// Update capacity of the shared outbound queue, clamped to `[1, 1024]`.
    pub fn set_send_channel_capacity(&mut self, capacity: usize) -> &mut Self {
        self.send_channel_capacity = capacity.clamp(MIN_CHANNEL_CAPACITY, MAX_CHANNEL_CAPACITY);
        self
    }

    #[must_use]
    pub const fn send_channel_capacity(&self) -> usize {
        self.send_channel_capacity
    }

    /// Update capacity of the shared inbound publish queue, clamped to `[1, 1024]`.
    pub fn set_recv_channel_capacity(&mut self, capacity: usize) -> &mut Self {
        self.recv_channel_capacity = capacity.clamp(MIN_CHANNEL_CAPACITY, MAX_CHANNEL_CAPACITY);
        self
    }

    #[must_use]
    pub const fn recv_channel_capacity(&self) -> usize {
        self.recv_channel_capacity
    }

    pub fn set_backoff(&mut self, backoff: Backoff) -> &mut Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn backoff(&self) -> &Backoff {
        &self.backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_client_id_is_random() {
        let options = ConnectOptions::default();
        assert_eq!(options.client_id().len(), 8);
    }

    #[test]
    fn test_channel_capacity_clamping() {
        let mut options = ConnectOptions::default();
        assert_eq!(options.send_channel_capacity(), 128);

        options.set_send_channel_capacity(0);
        assert_eq!(options.send_channel_capacity(), 1);

        options.set_send_channel_capacity(100_000);
        assert_eq!(options.send_channel_capacity(), 1024);

        options.set_recv_channel_capacity(0);
        assert_eq!(options.recv_channel_capacity(), 1);
        options.set_recv_channel_capacity(4096);
        assert_eq!(options.recv_channel_capacity(), 1024);
    }

    #[test]
    fn test_keep_alive_factor_fallback() {
        let mut options = ConnectOptions::default();
        options.set_keep_alive_factor(1.0);
        assert_eq!(options.keep_alive_factor(), 1.2);

        options.set_keep_alive_factor(0.3);
        assert_eq!(options.keep_alive_factor(), 1.2);

        options.set_keep_alive_factor(2.5);
        assert_eq!(options.keep_alive_factor(), 2.5);
    }

    #[test]
    fn test_server_list() {
        let options = ConnectOptions::new(["a.example.com:1883", "b.example.com:1883"]);
        assert_eq!(options.servers().len(), 2);
    }

    #[test]
    fn test_tls_without_files_is_accepted() {
        let mut options = ConnectOptions::default();
        options.set_tls(TlsConfig {
            skip_verify: true,
            ..TlsConfig::default()
        });
        assert!(options.tls().is_some());
    }

    #[test]
    #[should_panic(expected = "Invalid TLS config")]
    fn test_tls_missing_root_ca_panics() {
        let mut options = ConnectOptions::default();
        options.set_tls(TlsConfig {
            root_ca: Some(PathBuf::from("/no/such/ca.pem")),
            ..TlsConfig::default()
        });
    }

    #[test]
    #[should_panic(expected = "Invalid TLS config")]
    fn test_tls_cert_without_key_panics() {
        let mut options = ConnectOptions::default();
        options.set_tls(TlsConfig {
            cert_file: Some(PathBuf::from("/no/such/client.pem")),
            ..TlsConfig::default()
        });
    }
}
