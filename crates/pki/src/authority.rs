//! Certificate authorities
//!
//! A [`CertificateAuthority`] holds a CA certificate and key as PEM and signs
//! leaf certificates on request. Issued certificates are memoized by request,
//! so asking twice for the same certificate returns byte-identical material
//! until it comes within [`RENEWAL_WINDOW_DAYS`] of expiry and is re-signed.

use crate::error::{PkiError, Result};
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Default validity period for CA certificates (10 years)
pub const CA_VALIDITY_YEARS: i64 = 10;

/// Default validity period for leaf certificates (1 year)
pub const CERT_VALIDITY_YEARS: i64 = 1;

/// Memoized leaf certificates are re-signed once they get this close to expiry
pub const RENEWAL_WINDOW_DAYS: i64 = 30;

/// Compute certificate validity period from now
fn compute_validity(validity: ::time::Duration) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    (now, now + validity)
}

fn default_leaf_validity() -> ::time::Duration {
    ::time::Duration::days(CERT_VALIDITY_YEARS * 365)
}

#[derive(Clone)]
struct MemoizedCertificate {
    certificate: IssuedCertificate,
    not_after: ::time::OffsetDateTime,
}

impl MemoizedCertificate {
    fn needs_renewal(&self, now: ::time::OffsetDateTime) -> bool {
        self.not_after - now <= ::time::Duration::days(RENEWAL_WINDOW_DAYS)
    }
}

/// Extended key usages a leaf certificate can be issued with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExtendedUsage {
    ServerAuth,
    ClientAuth,
}

impl ExtendedUsage {
    fn purpose(self) -> ExtendedKeyUsagePurpose {
        match self {
            Self::ServerAuth => ExtendedKeyUsagePurpose::ServerAuth,
            Self::ClientAuth => ExtendedKeyUsagePurpose::ClientAuth,
        }
    }
}

/// What to put in a leaf certificate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertificateRequest {
    /// Subject common name; also the logical name of the certificate
    pub common_name: String,
    /// Subject organizations (Kubernetes reads these as groups)
    pub organizations: Vec<String>,
    pub usages: Vec<ExtendedUsage>,
    /// DNS names or IP addresses
    pub subject_alt_names: Vec<String>,
}

impl CertificateRequest {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            organizations: Vec::new(),
            usages: Vec::new(),
            subject_alt_names: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_organizations(mut self, organizations: &[String]) -> Self {
        self.organizations = organizations.to_vec();
        self
    }

    #[must_use]
    pub fn with_usages(mut self, usages: &[ExtendedUsage]) -> Self {
        self.usages = usages.to_vec();
        self
    }

    #[must_use]
    pub fn with_subject_alt_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subject_alt_names = names.into_iter().map(Into::into).collect();
        self
    }
}

/// A PEM encoded certificate and the private key it was issued for
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub certificate: String,
    pub private_key: String,
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("certificate", &self.certificate)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Issues certificates within one trust domain.
///
/// Object safe so clusters can hold `Arc<dyn CertificateIssuer>` and tests
/// can substitute counting or failing issuers.
pub trait CertificateIssuer: Send + Sync {
    /// PEM encoded CA certificate clients of this trust domain should trust
    fn ca_certificate(&self) -> &str;

    /// Issue a certificate for `request`
    fn issue(&self, request: &CertificateRequest) -> Result<IssuedCertificate>;

    /// Issue a certificate named `name` for the given subject identities and
    /// extended usages
    fn issue_certificate(
        &self,
        name: &str,
        subject_names: &[String],
        usages: &[ExtendedUsage],
    ) -> Result<IssuedCertificate> {
        self.issue(
            &CertificateRequest::new(name)
                .with_organizations(subject_names)
                .with_usages(usages),
        )
    }
}

/// rcgen backed certificate authority
#[derive(Clone)]
pub struct CertificateAuthority {
    /// CA key pair serialized as PEM (KeyPair isn't Clone)
    ca_key_pem: String,
    ca_cert_pem: String,
    leaf_validity: ::time::Duration,
    issued: Arc<Mutex<HashMap<CertificateRequest, MemoizedCertificate>>>,
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("ca_cert_pem", &self.ca_cert_pem)
            .field("leaf_validity", &self.leaf_validity)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Create a new self-signed CA
    pub fn new(common_name: &str) -> Result<Self> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let (not_before, not_after) = compute_validity(::time::Duration::days(CA_VALIDITY_YEARS * 365));
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate()
            .map_err(|e| PkiError::KeyGeneration(format!("failed to generate CA key: {}", e)))?;

        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGeneration(format!("failed to create CA cert: {}", e))
        })?;

        debug!("Generated certificate authority {}", common_name);

        Ok(Self {
            ca_key_pem: key_pair.serialize_pem(),
            ca_cert_pem: cert.pem(),
            leaf_validity: default_leaf_validity(),
            issued: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Load a CA from PEM material
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let key_pair = KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::Parse(format!("failed to parse CA key: {}", e)))?;
        Issuer::from_ca_cert_pem(cert_pem, &key_pair)
            .map_err(|e| PkiError::Parse(format!("failed to parse CA certificate: {}", e)))?;

        Ok(Self {
            ca_key_pem: key_pem.to_string(),
            ca_cert_pem: cert_pem.to_string(),
            leaf_validity: default_leaf_validity(),
            issued: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Issue leaf certificates valid for `validity` instead of the default
    #[must_use]
    pub fn with_leaf_validity(mut self, validity: ::time::Duration) -> Self {
        self.leaf_validity = validity;
        self
    }

    /// Get the CA private key in PEM format (for storage in cluster status)
    pub fn ca_key_pem(&self) -> &str {
        &self.ca_key_pem
    }

    fn load_key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| PkiError::Parse(format!("failed to load CA key: {}", e)))
    }

    /// Sign a fresh leaf certificate, bypassing the memo
    fn sign(&self, request: &CertificateRequest) -> Result<MemoizedCertificate> {
        if request.organizations.len() > 1 {
            return Err(PkiError::InvalidRequest(format!(
                "certificate {} requests {} organizations, at most one is supported",
                request.common_name,
                request.organizations.len()
            )));
        }

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(request.common_name.clone()),
        );
        if let Some(organization) = request.organizations.first() {
            dn.push(
                DnType::OrganizationName,
                DnValue::Utf8String(organization.clone()),
            );
        }
        params.distinguished_name = dn;

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = request.usages.iter().map(|u| u.purpose()).collect();

        let (not_before, not_after) = compute_validity(self.leaf_validity);
        params.not_before = not_before;
        params.not_after = not_after;

        params.subject_alt_names = request
            .subject_alt_names
            .iter()
            .map(|san| {
                if let Ok(ip) = san.parse::<std::net::IpAddr>() {
                    Ok(SanType::IpAddress(ip))
                } else {
                    Ia5String::try_from(san.clone())
                        .map(SanType::DnsName)
                        .map_err(|e| {
                            PkiError::InvalidRequest(format!("invalid DNS name '{}': {}", san, e))
                        })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let leaf_key = KeyPair::generate().map_err(|e| {
            PkiError::KeyGeneration(format!(
                "failed to generate key for {}: {}",
                request.common_name, e
            ))
        })?;

        let ca_key = self.load_key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| PkiError::Parse(format!("failed to create issuer: {}", e)))?;

        let cert = params.signed_by(&leaf_key, &issuer).map_err(|e| {
            PkiError::CertificateGeneration(format!(
                "failed to sign certificate {}: {}",
                request.common_name, e
            ))
        })?;

        debug!("Issued certificate {}", request.common_name);

        Ok(MemoizedCertificate {
            certificate: IssuedCertificate {
                certificate: cert.pem(),
                private_key: leaf_key.serialize_pem(),
            },
            not_after,
        })
    }
}

impl CertificateIssuer for CertificateAuthority {
    fn ca_certificate(&self) -> &str {
        &self.ca_cert_pem
    }

    fn issue(&self, request: &CertificateRequest) -> Result<IssuedCertificate> {
        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = issued.get(request) {
            if !existing.needs_renewal(::time::OffsetDateTime::now_utc()) {
                return Ok(existing.certificate.clone());
            }
            debug!("Renewing certificate {} expiring at {:?}", request.common_name, existing.not_after);
        }
        let signed = self.sign(request)?;
        let certificate = signed.certificate.clone();
        issued.insert(request.clone(), signed);
        Ok(certificate)
    }
}
