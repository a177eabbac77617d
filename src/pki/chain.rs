//! X.509 chain checks for issued certificates.

use std::time::Duration;

use x509_parser::pem::Pem;
use x509_parser::prelude::*;

use crate::errors::{BootstrapError, Result};

/// Result of a successful chain walk, leaf first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub subjects: Vec<String>,
}

impl ChainVerification {
    /// Number of certificates between the leaf and the root, inclusive.
    pub fn depth(&self) -> usize {
        self.subjects.len()
    }

    pub fn root_subject(&self) -> Option<&str> {
        self.subjects.last().map(String::as_str)
    }
}

/// Decode every PEM certificate block in `pem` to DER.
pub fn pem_blocks(pem: &str) -> Result<Vec<Vec<u8>>> {
    let mut blocks = Vec::new();
    for block in Pem::iter_from_buffer(pem.as_bytes()) {
        let block =
            block.map_err(|e| BootstrapError::validation(format!("invalid PEM data: {}", e)))?;
        if block.label == "CERTIFICATE" {
            blocks.push(block.contents);
        }
    }

    if blocks.is_empty() {
        return Err(BootstrapError::validation("no certificate found in PEM data"));
    }
    Ok(blocks)
}

fn parse_der(der: &[u8]) -> Result<X509Certificate<'_>> {
    X509Certificate::from_der(der)
        .map(|(_, cert)| cert)
        .map_err(|e| BootstrapError::validation(format!("failed to parse certificate: {}", e)))
}

fn is_self_signed(cert: &X509Certificate<'_>) -> bool {
    cert.issuer() == cert.subject() && cert.verify_signature(None).is_ok()
}

fn is_ca(cert: &X509Certificate<'_>) -> bool {
    matches!(cert.basic_constraints(), Ok(Some(bc)) if bc.value.ca)
}

/// Check that `leaf` chains through `chain` to a self-signed root.
///
/// Every link must match issuer to subject, carry a valid signature from a CA
/// certificate, and be inside its validity window. `chain` may hold bundles and
/// may include the root.
pub fn verify_chain(leaf: &str, chain: &[String]) -> Result<ChainVerification> {
    let leaf_der = pem_blocks(leaf)?.remove(0);
    let mut pool_der = Vec::new();
    for pem in chain {
        for der in pem_blocks(pem)? {
            if der != leaf_der && !pool_der.contains(&der) {
                pool_der.push(der);
            }
        }
    }

    let leaf_cert = parse_der(&leaf_der)?;
    let pool = pool_der.iter().map(|der| parse_der(der)).collect::<Result<Vec<_>>>()?;

    let mut subjects = vec![leaf_cert.subject().to_string()];
    let mut current = &leaf_cert;

    for _ in 0..=pool.len() {
        if !current.validity().is_valid() {
            return Err(BootstrapError::validation(format!(
                "certificate '{}' is outside its validity period",
                current.subject()
            )));
        }

        if is_self_signed(current) {
            return Ok(ChainVerification { subjects });
        }

        let issuer = pool
            .iter()
            .find(|candidate| {
                candidate.subject() == current.issuer()
                    && current.verify_signature(Some(candidate.public_key())).is_ok()
            })
            .ok_or_else(|| {
                BootstrapError::validation(format!(
                    "no issuer for '{}' in chain (expected '{}')",
                    current.subject(),
                    current.issuer()
                ))
            })?;

        if !is_ca(issuer) {
            return Err(BootstrapError::validation(format!(
                "issuer '{}' is not a CA certificate",
                issuer.subject()
            )));
        }

        subjects.push(issuer.subject().to_string());
        current = issuer;
    }

    Err(BootstrapError::validation("certificate chain does not terminate in a self-signed root"))
}

/// Summary of a CA certificate read back from a mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    pub subject: String,
    pub issuer: String,
    pub self_signed: bool,
    pub lifetime: Duration,
}

/// Parse the first certificate in `pem` into a [`CertificateSummary`].
pub fn summarize(pem: &str) -> Result<CertificateSummary> {
    let der = pem_blocks(pem)?.remove(0);
    let cert = parse_der(&der)?;
    let validity = cert.validity();
    let seconds = validity.not_after.timestamp() - validity.not_before.timestamp();

    Ok(CertificateSummary {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        self_signed: is_self_signed(&cert),
        lifetime: Duration::from_secs(u64::try_from(seconds).unwrap_or(0)),
    })
}
