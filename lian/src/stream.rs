// Copyright (c) 2023 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fs::File;
use std::io::{self, BufReader};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::{ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::{
    self, Certificate, ClientConfig, OwnedTrustAnchor, PrivateKey, RootCertStore, ServerName,
};
use tokio_rustls::TlsConnector;

use crate::connect_options::TlsConfig;
use crate::error::{Error, ErrorKind};

/// Transport stream between client and server, plain TCP or TCP over TLS.
pub enum Stream {
    Mqtt(TcpStream),
    Mqtts(Box<TlsStream<TcpStream>>),
}

impl Stream {
    /// Dial `server` and, when `tls` is set, run the TLS handshake on top.
    ///
    /// # Errors
    ///
    /// Returns error if the socket cannot be connected or the TLS setup fails.
    pub async fn connect(server: &str, tls: Option<&TlsConfig>) -> Result<Self, Error> {
        let tcp_stream = TcpStream::connect(server).await?;
        match tls {
            None => Ok(Self::Mqtt(tcp_stream)),
            Some(tls) => Self::connect_tls(server, tcp_stream, tls).await,
        }
    }

    async fn connect_tls(
        server: &str,
        tcp_stream: TcpStream,
        tls: &TlsConfig,
    ) -> Result<Self, Error> {
        let config = build_client_config(tls)?;
        let connector = TlsConnector::from(Arc::new(config));

        let domain = match &tls.domain {
            Some(domain) => domain.as_str(),
            None => server.split(':').next().unwrap_or(server),
        };
        let server_name = ServerName::try_from(domain)?;
        let tls_stream = connector.connect(server_name, tcp_stream).await?;
        Ok(Self::Mqtts(Box::new(tls_stream)))
    }
}

fn build_client_config(tls: &TlsConfig) -> Result<ClientConfig, Error> {
    let mut root_store = RootCertStore::empty();
    root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));
    if let Some(root_ca) = &tls.root_ca {
        for cert in load_certs(root_ca)? {
            root_store.add(&cert)?;
        }
    }

    let builder = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store);
    let mut config = match (&tls.cert_file, &tls.key_file) {
        (Some(cert_file), Some(key_file)) => {
            let certs = load_certs(cert_file)?;
            let key = load_private_key(key_file)?;
            builder.with_client_auth_cert(certs, key)?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(Error::new(
                ErrorKind::CertError,
                "cert_file and key_file must be set together",
            ))
        }
    };

    if tls.skip_verify {
        log::warn!("TLS certificate verification is disabled");
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(DangerousServerVerifier));
    }

    Ok(config)
}

fn load_certs(path: &std::path::Path) -> Result<Vec<Certificate>, Error> {
    let file = File::open(path).map_err(|err| {
        Error::from_string(
            ErrorKind::CertError,
            format!("Failed to open cert file {}: {err}", path.display()),
        )
    })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader).map_err(|err| {
        Error::from_string(
            ErrorKind::CertError,
            format!("Failed to parse cert file {}: {err}", path.display()),
        )
    })?;
    if certs.is_empty() {
        return Err(Error::from_string(
            ErrorKind::CertError,
            format!("No certificate found in {}", path.display()),
        ));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_private_key(path: &std::path::Path) -> Result<PrivateKey, Error> {
    let file = File::open(path).map_err(|err| {
        Error::from_string(
            ErrorKind::CertError,
            format!("Failed to open key file {}: {err}", path.display()),
        )
    })?;
    let mut reader = BufReader::new(file);
    loop {
        match rustls_pemfile::read_one(&mut reader).map_err(|err| {
            Error::from_string(
                ErrorKind::CertError,
                format!("Failed to parse key file {}: {err}", path.display()),
            )
        })? {
            Some(rustls_pemfile::Item::PKCS8Key(key) | rustls_pemfile::Item::RSAKey(key) | rustls_pemfile::Item::ECKey(key)) => {
                return Ok(PrivateKey(key));
            }
            Some(_) => continue,
            None => {
                return Err(Error::from_string(
                    ErrorKind::CertError,
                    format!("No private key found in {}", path.display()),
                ));
            }
        }
    }
}

/// Accepts any server certificate. Installed only with `skip_verify`.
struct DangerousServerVerifier;

impl ServerCertVerifier for DangerousServerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Mqtt(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Mqtts(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Mqtt(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Mqtts(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Mqtt(stream) => Pin::new(stream).poll_flush(cx),
            Self::Mqtts(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Mqtt(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Mqtts(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
