//! PEM/X.509 decoding.
//!
//! The decoder looks at the first PEM block of a buffer and parses its DER
//! payload as one or more concatenated certificates. Later blocks are ignored
//! unless bundle decoding is switched on, in which case every later
//! `CERTIFICATE` block is decoded as well.

use std::collections::BTreeMap;

use x509_parser::pem::Pem;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::SkipReason;
use crate::model::DecodedCertificate;

/// Textual marker of an RSA private key. Keys carry no expiry.
pub const PRIVATE_KEY_MARKER: &str = "RSA PRIVATE KEY";

/// PEM label of a certificate block.
pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Label attached to decoded certificates carrying the subject CN.
pub const COMMON_NAME_LABEL: &str = "common_name";

#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateDecoder {
    bundles: bool,
}

impl CertificateDecoder {
    /// Decodes only the first PEM block of every buffer.
    pub fn new() -> Self {
        CertificateDecoder { bundles: false }
    }

    /// Decodes the first PEM block and every later certificate block.
    pub fn with_bundles() -> Self {
        CertificateDecoder { bundles: true }
    }

    pub fn decode(&self, raw: &[u8]) -> Result<Vec<DecodedCertificate>, SkipReason> {
        let text = String::from_utf8_lossy(raw);
        if text.contains(PRIVATE_KEY_MARKER) {
            return Err(SkipReason::IsPrivateKey);
        }

        // Malformed blocks are passed over, as is any text between blocks.
        let mut blocks = Pem::iter_from_buffer(text.as_bytes()).filter_map(Result::ok);
        let first = blocks.next().ok_or(SkipReason::NotACertificate)?;
        if is_private_key(&first) {
            return Err(SkipReason::IsPrivateKey);
        }

        let mut decoded = parse_certificates(&first.contents)?;
        if self.bundles {
            for block in blocks.filter(|b| b.label == CERTIFICATE_LABEL) {
                match parse_certificates(&block.contents) {
                    Ok(more) => decoded.extend(more),
                    Err(reason) => {
                        tracing::warn!("skipping bundled certificate block: {}", reason)
                    }
                }
            }
        }
        Ok(decoded)
    }
}

fn is_private_key(block: &Pem) -> bool {
    block.label.ends_with("PRIVATE KEY")
}

/// Parses a DER buffer holding one or more concatenated certificates.
pub fn parse_certificates(der: &[u8]) -> Result<Vec<DecodedCertificate>, SkipReason> {
    let mut decoded = Vec::new();
    let mut rest = der;
    while !rest.is_empty() {
        let (remaining, cert) = X509Certificate::from_der(rest)
            .map_err(|e| SkipReason::DecodeError(e.to_string()))?;
        decoded.push(certificate_info(&cert));
        rest = remaining;
    }
    Ok(decoded)
}

fn certificate_info(cert: &X509Certificate<'_>) -> DecodedCertificate {
    let mut subject_labels = BTreeMap::new();
    if let Some(common_name) = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
    {
        subject_labels.insert(COMMON_NAME_LABEL.to_string(), common_name.to_string());
    }

    DecodedCertificate {
        not_after: cert.validity().not_after.timestamp(),
        issuer_name: cert.issuer().to_string(),
        subject_labels,
    }
}
