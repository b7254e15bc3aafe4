/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{convert::TryFrom, io, sync::Arc};

use rustls::{
    client::{
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        verify_server_name,
    },
    server::ParsedCertificate,
    ClientConfig, RootCertStore, SignatureScheme,
};
use rustls_pki_types::{ServerName, TrustAnchor};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;

use crate::{Error, SmtpClient};

use super::{stream::SmtpStream, AssertReply};

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<SmtpStream<T>> {
    /// Upgrade the connection to TLS.
    pub async fn start_tls(
        &mut self,
        tls_connector: &TlsConnector,
        hostname: &str,
    ) -> crate::Result<()> {
        // Send STARTTLS command
        self.cmd(b"STARTTLS\r\n").await?.assert_code(220)?;

        self.into_tls(tls_connector, hostname).await
    }

    /// Performs the TLS handshake over the current plain text stream. When
    /// the handshake fails the plain text stream is kept, so the session can
    /// still be reset and closed. A handshake that times out takes the stream
    /// down with it and leaves [`SmtpStream::None`] behind.
    pub async fn into_tls(
        &mut self,
        tls_connector: &TlsConnector,
        hostname: &str,
    ) -> crate::Result<()> {
        let server_name = ServerName::try_from(hostname)
            .map_err(|_| crate::Error::InvalidTLSName)?
            .to_owned();

        let stream = match std::mem::take(&mut self.stream) {
            SmtpStream::Plain(stream) => stream,
            stream => {
                self.stream = stream;
                return Ok(());
            }
        };

        match tokio::time::timeout(
            self.timeout,
            tls_connector.connect(server_name, stream).into_fallible(),
        )
        .await
        {
            Ok(Ok(stream)) => {
                self.stream = SmtpStream::Tls(stream);
                Ok(())
            }
            Ok(Err((err, stream))) => {
                self.stream = SmtpStream::Plain(stream);
                Err(tls_error(err))
            }
            Err(_) => {
                log::warn!("TLS handshake with {hostname} timed out, connection dropped");
                Err(crate::Error::Timeout)
            }
        }
    }
}

fn tls_error(err: io::Error) -> Error {
    let kind = err.kind();
    if let Some(inner) = err.into_inner() {
        match inner.downcast::<rustls::Error>() {
            Ok(error) => Error::Tls(error),
            Err(error) => Error::Io(io::Error::new(kind, error)),
        }
    } else {
        Error::Io(io::Error::new(kind, "Unspecified"))
    }
}

/// Builds the connector used for STARTTLS. Unless `verify_certs` is set, the
/// certificate chain is not required to be trusted but the server certificate
/// must still be issued for the server name.
pub fn build_tls_connector(verify_certs: bool) -> TlsConnector {
    let config = if verify_certs {
        let mut root_cert_store = RootCertStore::empty();

        root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| TrustAnchor {
            subject: ta.subject.clone(),
            subject_public_key_info: ta.subject_public_key_info.clone(),
            name_constraints: ta.name_constraints.clone(),
        }));

        ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth()
    } else {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(ServerNameVerifier {}))
            .with_no_client_auth()
    };

    TlsConnector::from(Arc::new(config))
}

#[doc(hidden)]
#[derive(Debug)]
struct ServerNameVerifier;

impl ServerCertVerifier for ServerNameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &rustls_pki_types::CertificateDer<'_>,
        _intermediates: &[rustls_pki_types::CertificateDer<'_>],
        server_name: &rustls_pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        verify_server_name(&ParsedCertificate::try_from(end_entity)?, server_name)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}
