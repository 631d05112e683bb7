//! TLS client setup (trust, version/suite restriction, SNI, host
//! verification) and the `SSTP_DUPLEX_POST` HTTP upgrade (spec.md §4.2).

use super::{http_status_code, TransportReader, TransportWriter};
use crate::config::{Config, TlsVersion};
use crate::error::TransportError;
use crate::external::TrustStore;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme, SupportedCipherSuite};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Wraps the standard WebPKI path verifier and stashes a copy of whatever
/// leaf certificate it is asked to verify, win or lose, so a failed
/// handshake can still hand the untrusted leaf to the `Reporter` (spec.md
/// §4.2: "surfaces the leaf certificate via the Reporter so the user can
/// save it").
///
/// Hostname matching is deliberately NOT this verifier's job: it always
/// forgives a `NotValidForName` failure from the inner verifier (which by
/// construction can only be reached once the certificate chain itself has
/// already validated — webpki checks the chain before it checks the
/// name). `connect_tls` re-runs an explicit hostname check against
/// `config.hostname` afterward, gated on `verify_host` alone, which is the
/// only place that flag has any effect (spec.md §4.2: "if `verifyHost`,
/// verify the peer hostname").
#[derive(Debug)]
struct CapturingVerifier {
    inner: Arc<WebPkiServerVerifier>,
    captured_leaf: Mutex<Option<Vec<u8>>>,
}

impl CapturingVerifier {
    fn new(inner: Arc<WebPkiServerVerifier>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            captured_leaf: Mutex::new(None),
        })
    }

    fn take_captured_leaf(&self) -> Option<Vec<u8>> {
        self.captured_leaf.lock().unwrap().clone()
    }
}

impl ServerCertVerifier for CapturingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        *self.captured_leaf.lock().unwrap() = Some(end_entity.as_ref().to_vec());
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) => Ok(verified),
            Err(rustls::Error::InvalidCertificate(rustls::CertificateError::NotValidForName)) => {
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

pub async fn connect_tls(
    tcp: TcpStream,
    config: &Config,
    trust_store: Option<&dyn TrustStore>,
) -> Result<(TlsStream<TcpStream>, Vec<u8>), TransportError> {
    let root_store = build_root_store(config, trust_store)?;

    let provider = rustls::crypto::ring::default_provider();
    let suites: Vec<SupportedCipherSuite> = if config.tls.select_suites {
        provider
            .cipher_suites
            .iter()
            .filter(|s| {
                config
                    .tls
                    .suites
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(s.suite().as_str().unwrap_or("")))
            })
            .cloned()
            .collect()
    } else {
        provider.cipher_suites.clone()
    };

    let versions: &[&rustls::SupportedProtocolVersion] = match config.tls.version() {
        TlsVersion::Tls12 => &[&rustls::version::TLS12],
        TlsVersion::Tls13 => &[&rustls::version::TLS13],
        TlsVersion::Default => rustls::ALL_VERSIONS,
    };

    let crypto_provider = Arc::new(rustls::crypto::CryptoProvider {
        cipher_suites: suites,
        ..provider
    });

    let webpki_verifier = WebPkiServerVerifier::builder(Arc::new(root_store))
        .build()
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    let verifier = CapturingVerifier::new(webpki_verifier);

    let tls_config = ClientConfig::builder_with_provider(crypto_provider)
        .with_protocol_versions(versions)
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(verifier.clone())
        .with_no_client_auth();

    let connector = TlsConnector::from(Arc::new(tls_config));

    let sni_host = if config.tls.use_custom_sni {
        config
            .tls
            .custom_sni
            .clone()
            .unwrap_or_else(|| config.hostname.clone())
    } else {
        config.hostname.clone()
    };
    let server_name = ServerName::try_from(sni_host)
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .to_owned();

    let tls_stream = connector.connect(server_name, tcp).await.map_err(|e| {
        match verifier.take_captured_leaf() {
            Some(leaf) => TransportError::CertificateUntrusted(leaf),
            None => TransportError::Tls(e.to_string()),
        }
    })?;

    let leaf_cert = tls_stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .map(|cert| cert.as_ref().to_vec())
        .ok_or_else(|| TransportError::Tls("server presented no certificate".into()))?;

    // `CapturingVerifier` never enforces a hostname match itself (see its
    // doc comment), so this is the only place `verify_host` has any
    // effect, and it always checks against `config.hostname` — never the
    // custom SNI value used for the handshake itself (spec.md §4.2: "NOT
    // the custom SNI").
    if config.tls.verify_host {
        verify_hostname(&leaf_cert, &config.hostname)
            .map_err(|_| TransportError::CertificateUntrusted(leaf_cert.clone()))?;
    }

    Ok((tls_stream, leaf_cert))
}

fn build_root_store(
    config: &Config,
    trust_store: Option<&dyn TrustStore>,
) -> Result<RootCertStore, TransportError> {
    let mut store = RootCertStore::empty();
    if config.tls.specify_trust {
        let trust_store = trust_store
            .ok_or_else(|| TransportError::Tls("no trust store supplied for SSL_DO_SPECIFY_CERT".into()))?;
        let cas = trust_store
            .list_ca_certs()
            .map_err(|e| TransportError::Tls(e))?;
        for (_name, pem) in cas {
            for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
                let cert = cert.map_err(|e| TransportError::Tls(e.to_string()))?;
                store
                    .add(cert)
                    .map_err(|e| TransportError::Tls(e.to_string()))?;
            }
        }
    } else {
        for cert in rustls_native_certs::load_native_certs().certs {
            store.add(cert).map_err(|e| TransportError::Tls(e.to_string()))?;
        }
    }
    Ok(store)
}

/// A minimal SAN check, used only for the custom-SNI re-verification case
/// above; the common path relies on rustls's own verifier.
fn verify_hostname(leaf_der: &[u8], hostname: &str) -> Result<(), TransportError> {
    use x509_parser::prelude::*;
    let (_, cert) = X509Certificate::from_der(leaf_der)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    let matches = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| {
            ext.value.general_names.iter().any(|name| match name {
                GeneralName::DNSName(dns) => dns.eq_ignore_ascii_case(hostname),
                _ => false,
            })
        })
        .unwrap_or(false);
    if matches {
        Ok(())
    } else {
        Err(TransportError::Tls(format!(
            "certificate does not match hostname {hostname}"
        )))
    }
}

const DUPLEX_POST_PATH: &str = "/sra_{BA195980-CD49-458b-9E23-C84EE0ADCD75}/";

pub async fn duplex_post_upgrade(
    reader: &mut TransportReader,
    writer: &TransportWriter,
    hostname: &str,
    guid: &str,
) -> Result<(), TransportError> {
    let request = format!(
        "SSTP_DUPLEX_POST {DUPLEX_POST_PATH} HTTP/1.1\r\nContent-Length: 18446744073709551615\r\nHost: {hostname}\r\nSSTPCORRELATIONID: {{{guid}}}\r\n\r\n"
    );
    writer.send(request.as_bytes()).await?;

    let mut buf = [0u8; 4096];
    let mut response = Vec::new();
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(TransportError::MalformedHttp);
        }
        response.extend_from_slice(&buf[..n]);
        if response.len() >= 4 && &response[response.len() - 4..] == b"\r\n\r\n" {
            break;
        }
    }
    match http_status_code(&response)? {
        200 => Ok(()),
        other => Err(TransportError::DuplexPostRejected(other)),
    }
}
