//! TLS configuration

use std::path::PathBuf;
use std::sync::Arc;

use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::CryptoProvider;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

/// TLS configuration
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub skip_verify: bool,
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub sni: Option<String>,
}

impl TlsConfig {
    /// Check if client certificate authentication is configured
    pub fn has_client_cert(&self) -> bool {
        self.client_cert.is_some() && self.client_key.is_some()
    }

    /// Build a rustls client configuration from these settings
    pub fn client_config(&self) -> Result<ClientConfig, String> {
        let builder = if self.skip_verify {
            let provider = tokio_rustls::rustls::crypto::aws_lc_rs::default_provider();
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerification(provider)))
        } else {
            ClientConfig::builder().with_root_certificates(self.root_store()?)
        };

        if self.has_client_cert() {
            let certs = self.load_client_certs()?;
            let key = self.load_client_key()?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| format!("Invalid client cert/key: {}", e))
        } else {
            Ok(builder.with_no_client_auth())
        }
    }

    fn root_store(&self) -> Result<RootCertStore, String> {
        let mut roots = RootCertStore::empty();

        if let Some(ref ca_path) = self.ca_cert {
            let ca_data =
                std::fs::read(ca_path).map_err(|e| format!("Failed to read CA cert: {}", e))?;
            let certs: Vec<_> = rustls_pemfile::certs(&mut ca_data.as_slice())
                .filter_map(|r| r.ok())
                .collect();
            if certs.is_empty() {
                return Err("No certificates found in CA file".to_string());
            }
            for cert in certs {
                let _ = roots.add(cert);
            }
        } else {
            let native = rustls_native_certs::load_native_certs();
            for cert in native.certs {
                let _ = roots.add(cert);
            }
        }

        Ok(roots)
    }

    fn load_client_certs(&self) -> Result<Vec<CertificateDer<'static>>, String> {
        let path = self.client_cert.as_ref().expect("checked by caller");
        let data = std::fs::read(path).map_err(|e| format!("Failed to read client cert: {}", e))?;
        let certs: Vec<_> = rustls_pemfile::certs(&mut data.as_slice())
            .filter_map(|r| r.ok())
            .collect();
        if certs.is_empty() {
            return Err("No certificates found in client cert file".to_string());
        }
        Ok(certs)
    }

    fn load_client_key(
        &self,
    ) -> Result<tokio_rustls::rustls::pki_types::PrivateKeyDer<'static>, String> {
        let path = self.client_key.as_ref().expect("checked by caller");
        let data = std::fs::read(path).map_err(|e| format!("Failed to read client key: {}", e))?;
        rustls_pemfile::private_key(&mut data.as_slice())
            .map_err(|e| format!("Invalid client key: {:?}", e))?
            .ok_or_else(|| "No private key found in PEM".to_string())
    }
}

/// Accept any server certificate; signatures are still checked against
/// the presented chain. Only reachable behind --tls-skip-verify.
#[derive(Debug)]
struct NoVerification(CryptoProvider);

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        tokio_rustls::rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        tokio_rustls::rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
