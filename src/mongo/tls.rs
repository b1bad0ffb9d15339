use crate::config::ConfigError;
use mongodb::options::{Tls, TlsOptions};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::CertificateDer;
use std::io::Write;
use tempfile::NamedTempFile;

/// A parsed CA bundle written to a private temporary file.
///
/// The driver only loads CA certificates from a path, so the file has to stay
/// on disk for as long as the client may open new connections.
#[derive(Debug)]
pub struct CaBundle {
    certificates: usize,
    file: NamedTempFile,
}

impl CaBundle {
    /// Parse every certificate in `pem` and materialize the bundle.
    pub fn from_pem(pem: &str) -> Result<Self, ConfigError> {
        let certificates = parse_certificates(pem)?;

        let mut file = tempfile::Builder::new()
            .prefix("mongodb-ca-")
            .suffix(".pem")
            .tempfile()
            .map_err(|e| ConfigError::Certificate(e.to_string()))?;
        file.write_all(pem.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| ConfigError::Certificate(e.to_string()))?;

        tracing::debug!(
            "Wrote CA bundle with {} certificate(s) to {}",
            certificates.len(),
            file.path().display()
        );

        Ok(Self {
            certificates: certificates.len(),
            file,
        })
    }

    pub fn len(&self) -> usize {
        self.certificates
    }

    pub fn is_empty(&self) -> bool {
        self.certificates == 0
    }

    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }

    pub fn tls(&self, allow_invalid_certificates: bool) -> Tls {
        Tls::Enabled(
            TlsOptions::builder()
                .ca_file_path(self.path().to_path_buf())
                .allow_invalid_certificates(allow_invalid_certificates)
                .build(),
        )
    }
}

/// Decode all `CERTIFICATE` sections of a PEM bundle.
///
/// Every section must hold an X.509 certificate usable as a trust anchor.
/// The driver silently skips entries it cannot load, so they are rejected here.
pub fn parse_certificates(pem: &str) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let certificates = CertificateDer::pem_slice_iter(pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Certificate(e.to_string()))?;

    if certificates.is_empty() {
        return Err(ConfigError::Certificate(
            "no certificate found in bundle".to_string(),
        ));
    }
    for (index, certificate) in certificates.iter().enumerate() {
        webpki::anchor_from_trusted_cert(certificate).map_err(|e| {
            ConfigError::Certificate(format!("certificate #{} is not valid X.509: {}", index + 1, e))
        })?;
    }
    Ok(certificates)
}

/// TLS settings for the client, if any.
///
/// A certificate bundle turns TLS on even when `ssl` is false. Without a bundle,
/// `ssl` enables TLS against the system roots.
pub fn tls_settings(
    ssl: bool,
    insecure_skip_verify: bool,
    bundle: Option<&CaBundle>,
) -> Option<Tls> {
    match bundle {
        Some(bundle) => Some(bundle.tls(insecure_skip_verify)),
        None if ssl => Some(Tls::Enabled(
            TlsOptions::builder()
                .allow_invalid_certificates(insecure_skip_verify)
                .build(),
        )),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CA: &str = include_str!("../../tests/fixtures/ca.pem");
    const CA_BUNDLE: &str = include_str!("../../tests/fixtures/ca-bundle.pem");

    #[test]
    fn test_empty_bundle_rejected() {
        let err = parse_certificates("").unwrap_err();
        assert!(err.to_string().starts_with("Failed parsing pem file"));
    }

    #[test]
    fn test_non_pem_text_rejected() {
        assert!(CaBundle::from_pem("not a certificate").is_err());
    }

    #[test]
    fn test_truncated_section_rejected() {
        let err = parse_certificates("-----BEGIN CERTIFICATE-----\nMIIB\n").unwrap_err();
        assert!(matches!(err, ConfigError::Certificate(_)));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let pem = "-----BEGIN CERTIFICATE-----\n!!!not-base64!!!\n-----END CERTIFICATE-----\n";
        assert!(parse_certificates(pem).is_err());
    }

    #[test]
    fn test_all_sections_parsed() {
        let certificates = parse_certificates(CA_BUNDLE).unwrap();
        assert_eq!(certificates.len(), 2);
        assert_ne!(certificates[0], certificates[1]);

        let bundle = CaBundle::from_pem(CA_BUNDLE).unwrap();
        assert_eq!(bundle.len(), 2);
        assert_eq!(std::fs::read_to_string(bundle.path()).unwrap(), CA_BUNDLE);
    }

    #[test]
    fn test_non_x509_section_rejected() {
        let pem = "-----BEGIN CERTIFICATE-----\nAQID\n-----END CERTIFICATE-----\n";
        let err = parse_certificates(pem).unwrap_err();
        assert!(matches!(err, ConfigError::Certificate(_)));
        assert!(CaBundle::from_pem(pem).is_err());
    }

    #[test]
    fn test_bundle_with_one_bad_section_rejected() {
        let pem = format!("{}-----BEGIN CERTIFICATE-----\nBAUG\n-----END CERTIFICATE-----\n", CA);
        let err = parse_certificates(&pem).unwrap_err();
        assert!(err.to_string().contains("certificate #2"));
    }

    #[test]
    fn test_tls_disabled_without_ssl_or_bundle() {
        assert!(tls_settings(false, false, None).is_none());
        assert!(matches!(tls_settings(true, false, None), Some(Tls::Enabled(_))));
    }

    #[test]
    fn test_bundle_enables_tls() {
        let bundle = CaBundle::from_pem(CA).unwrap();
        match tls_settings(false, true, Some(&bundle)) {
            Some(Tls::Enabled(options)) => {
                assert_eq!(options.allow_invalid_certificates, Some(true));
                assert_eq!(options.ca_file_path.as_deref(), Some(bundle.path()));
            }
            other => panic!("unexpected tls settings: {:?}", other),
        }
    }
}
