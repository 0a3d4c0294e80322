//! Key generation, signing requests and certificate decoding.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, KeyPair, RsaKeySize};
use rustls::sign::CertifiedKey;
use tracing::debug;

use crate::error::CryptoError;

pub const DEFAULT_RSA_KEY_SIZE: u32 = 2048;
pub const DEFAULT_EC_KEY_SIZE: u32 = 256;

/// Algorithm of the certificate key (not the account key).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
}

impl KeyAlgorithm {
    pub fn default_key_size(self) -> u32 {
        match self {
            KeyAlgorithm::Rsa => DEFAULT_RSA_KEY_SIZE,
            KeyAlgorithm::Ec => DEFAULT_EC_KEY_SIZE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "rsa",
            KeyAlgorithm::Ec => "ec",
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rsa" => Ok(KeyAlgorithm::Rsa),
            "ec" => Ok(KeyAlgorithm::Ec),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fresh certificate key and the CSR signed with it.
pub struct GeneratedKey {
    /// PKCS#8 PEM
    pub private_key_pem: String,
    /// DER-encoded PKCS#10 request
    pub csr_der: Vec<u8>,
}

impl fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("csr_len", &self.csr_der.len())
            .finish_non_exhaustive()
    }
}

fn generate_key_pair(algorithm: KeyAlgorithm, key_size: u32) -> Result<KeyPair, CryptoError> {
    let generated = match (algorithm, key_size) {
        (KeyAlgorithm::Ec, 256) => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256),
        (KeyAlgorithm::Ec, 384) => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384),
        (KeyAlgorithm::Rsa, 2048) => KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, RsaKeySize::_2048),
        (KeyAlgorithm::Rsa, 3072) => KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, RsaKeySize::_3072),
        (KeyAlgorithm::Rsa, 4096) => KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, RsaKeySize::_4096),
        (algorithm, size) => {
            return Err(CryptoError::UnsupportedKeySize {
                algorithm: algorithm.as_str(),
                size,
            })
        }
    };
    generated.map_err(|e| CryptoError::KeyGeneration(e.to_string()))
}

/// Generate a certificate key and a CSR covering `domains`.
pub fn generate_key_and_csr(
    algorithm: KeyAlgorithm,
    key_size: Option<u32>,
    domains: &[String],
) -> Result<GeneratedKey, CryptoError> {
    let key_size = key_size.unwrap_or_else(|| algorithm.default_key_size());
    let key_pair = generate_key_pair(algorithm, key_size)?;

    let mut params =
        CertificateParams::new(domains.to_vec()).map_err(|e| CryptoError::Csr(e.to_string()))?;
    params.distinguished_name = DistinguishedName::new();
    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| CryptoError::Csr(e.to_string()))?;

    debug!(
        algorithm = %algorithm,
        key_size = key_size,
        domains = ?domains,
        "Generated certificate key and CSR"
    );

    Ok(GeneratedKey {
        private_key_pem: key_pair.serialize_pem(),
        csr_der: csr.der().to_vec(),
    })
}

/// A certificate chain as returned by the authority, with the validity of
/// its leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// PEM chain, leaf first
    pub pem: Vec<u8>,
    /// Epoch milliseconds
    pub not_before: i64,
    /// Epoch milliseconds
    pub not_after: i64,
}

impl IssuedCertificate {
    /// Read the validity window from the first certificate of a PEM chain.
    pub fn from_pem(pem: Vec<u8>) -> Result<Self, CryptoError> {
        let (_, block) = x509_parser::pem::parse_x509_pem(&pem)
            .map_err(|e| CryptoError::Pem(e.to_string()))?;
        let cert = block
            .parse_x509()
            .map_err(|e| CryptoError::Certificate(e.to_string()))?;

        let validity = cert.validity();
        let not_before = validity.not_before.timestamp() * 1000;
        let not_after = validity.not_after.timestamp() * 1000;

        Ok(Self {
            pem,
            not_before,
            not_after,
        })
    }
}

/// Build the rustls signing material for a PEM chain and PEM private key.
pub fn certified_key(
    certificate_pem: &[u8],
    private_key_pem: &[u8],
) -> Result<Arc<CertifiedKey>, CryptoError> {
    let chain = rustls_pemfile::certs(&mut &certificate_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CryptoError::Pem(e.to_string()))?;
    if chain.is_empty() {
        return Err(CryptoError::Pem("no certificate in PEM".to_string()));
    }

    let key = rustls_pemfile::private_key(&mut &private_key_pem[..])
        .map_err(|e| CryptoError::Pem(e.to_string()))?
        .ok_or_else(|| CryptoError::Pem("no private key in PEM".to_string()))?;

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    let signing_key = provider.key_provider.load_private_key(key)?;

    Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
}

/// Self-signed certificates for tests.
#[cfg(test)]
pub(crate) mod testing {
    use rcgen::{date_time_ymd, CertificateParams, KeyPair};

    /// Returns `(certificate_pem, private_key_pem)` valid from January 1st of
    /// `from_year` to January 1st of `to_year`.
    pub fn self_signed(domains: &[&str], from_year: i32, to_year: i32) -> (String, String) {
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params =
            CertificateParams::new(domains.iter().map(|d| d.to_string()).collect::<Vec<_>>())
                .unwrap();
        params.not_before = date_time_ymd(from_year, 1, 1);
        params.not_after = date_time_ymd(to_year, 1, 1);
        let cert = params.self_signed(&key_pair).unwrap();
        (cert.pem(), key_pair.serialize_pem())
    }

    /// Epoch milliseconds of January 1st, 00:00 UTC.
    pub fn new_year_millis(year: i32) -> i64 {
        chrono::NaiveDate::from_ymd_opt(year, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{new_year_millis, self_signed};
    use super::*;

    #[test]
    fn test_parse_algorithm() {
        assert_eq!("rsa".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::Rsa);
        assert_eq!("ec".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::Ec);
        assert!(matches!(
            "dsa".parse::<KeyAlgorithm>(),
            Err(CryptoError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_default_key_sizes() {
        assert_eq!(KeyAlgorithm::Rsa.default_key_size(), 2048);
        assert_eq!(KeyAlgorithm::Ec.default_key_size(), 256);
    }

    #[test]
    fn test_generate_ec_key_and_csr() {
        let domains = vec!["example.com".to_string(), "www.example.com".to_string()];
        let generated = generate_key_and_csr(KeyAlgorithm::Ec, None, &domains).unwrap();

        assert!(generated.private_key_pem.contains("PRIVATE KEY"));
        assert!(!generated.csr_der.is_empty());
        // DER SEQUENCE tag
        assert_eq!(generated.csr_der[0], 0x30);
    }

    #[test]
    fn test_unsupported_key_size() {
        let domains = vec!["example.com".to_string()];
        let err = generate_key_and_csr(KeyAlgorithm::Ec, Some(521), &domains).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::UnsupportedKeySize { algorithm: "ec", size: 521 }
        ));
    }

    #[test]
    fn test_issued_certificate_validity() {
        let (cert_pem, _) = self_signed(&["example.com"], 2020, 2030);
        let issued = IssuedCertificate::from_pem(cert_pem.into_bytes()).unwrap();

        assert_eq!(issued.not_before, new_year_millis(2020));
        assert_eq!(issued.not_after, new_year_millis(2030));
    }

    #[test]
    fn test_issued_certificate_rejects_garbage() {
        assert!(IssuedCertificate::from_pem(b"not a certificate".to_vec()).is_err());
    }

    #[test]
    fn test_certified_key() {
        let (cert_pem, key_pem) = self_signed(&["example.com"], 2020, 2030);
        let key = certified_key(cert_pem.as_bytes(), key_pem.as_bytes()).unwrap();
        assert_eq!(key.cert.len(), 1);
    }

    #[test]
    fn test_certified_key_requires_key() {
        let (cert_pem, _) = self_signed(&["example.com"], 2020, 2030);
        assert!(certified_key(cert_pem.as_bytes(), b"").is_err());
    }
}
