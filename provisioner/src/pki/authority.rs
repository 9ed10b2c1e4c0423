use crate::error::{self, Result};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SerialNumber,
};
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use time::{Duration, OffsetDateTime};

pub const CA_VALIDITY_DAYS: i64 = 3650;
pub const LEAF_VALIDITY_DAYS: i64 = 365;

/// Subject alternative names, kept sorted so two sets compare equal regardless of the order the
/// hosts were listed in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AltNames {
    pub ips: BTreeSet<IpAddr>,
    pub dns: BTreeSet<String>,
}

impl AltNames {
    /// Adds `value` as an IP SAN when it parses as one, as a DNS SAN otherwise.
    pub fn add(&mut self, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        match value.parse::<IpAddr>() {
            Ok(ip) => {
                self.ips.insert(ip);
            }
            Err(_) => {
                self.dns.insert(value.to_lowercase());
            }
        }
    }

    pub fn merge(&mut self, other: &AltNames) {
        self.ips.extend(other.ips.iter().copied());
        self.dns.extend(other.dns.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty() && self.dns.is_empty()
    }

    pub fn contains(&self, other: &AltNames) -> bool {
        self.ips.is_superset(&other.ips) && self.dns.is_superset(&other.dns)
    }

    fn to_strings(&self) -> Vec<String> {
        self.ips
            .iter()
            .map(IpAddr::to_string)
            .chain(self.dns.iter().cloned())
            .collect()
    }
}

impl Display for AltNames {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_strings().join(","))
    }
}

/// What a leaf certificate should say about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafSpec {
    pub name: String,
    pub common_name: String,
    pub organization: String,
    pub alt_names: AltNames,
    /// Adds the server-auth usage. Every leaf carries client-auth.
    pub server: bool,
    /// Name of the authority that signs this leaf.
    pub signer: &'static str,
}

pub fn generate_key() -> Result<KeyPair> {
    KeyPair::generate().context(error::PkiGenerateSnafu {
        what: "generate private key",
    })
}

pub fn parse_key(name: &str, pem: &str) -> Result<KeyPair> {
    KeyPair::from_pem(pem).map_err(|e| error::Error::InvalidUpstreamKey {
        name: name.to_string(),
        message: e.to_string(),
    })
}

fn serial() -> SerialNumber {
    let mut bytes: [u8; 16] = rand::random();
    // Positive integers only.
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

fn subject(common_name: &str, organization: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    if !organization.is_empty() {
        dn.push(DnType::OrganizationName, organization);
    }
    dn
}

fn leaf_params(spec: &LeafSpec) -> Result<CertificateParams> {
    let mut params =
        CertificateParams::new(spec.alt_names.to_strings()).context(error::PkiGenerateSnafu {
            what: format!("build parameters for '{}'", spec.name),
        })?;
    params.distinguished_name = subject(&spec.common_name, &spec.organization);
    params.serial_number = Some(serial());
    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::hours(1);
    params.not_after = now + Duration::days(LEAF_VALIDITY_DAYS);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    if spec.server {
        params
            .extended_key_usages
            .push(ExtendedKeyUsagePurpose::ServerAuth);
    }
    params.use_authority_key_identifier_extension = true;
    Ok(params)
}

/// A fresh self-signed CA. Returns `(certificate PEM, key PEM)`.
pub fn new_ca(common_name: &str) -> Result<(String, String)> {
    let key = generate_key()?;
    let mut params = CertificateParams::default();
    params.distinguished_name = subject(common_name, "");
    params.serial_number = Some(serial());
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
    ];
    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::hours(1);
    params.not_after = now + Duration::days(CA_VALIDITY_DAYS);
    let cert = params.self_signed(&key).context(error::PkiGenerateSnafu {
        what: format!("self-sign '{}'", common_name),
    })?;
    Ok((cert.pem(), key.serialize_pem()))
}

/// A PKCS#10 request for `spec`, signed with `key`.
pub fn csr(spec: &LeafSpec, key: &KeyPair) -> Result<String> {
    leaf_params(spec)?
        .serialize_request(key)
        .and_then(|request| request.pem())
        .context(error::PkiGenerateSnafu {
            what: format!("create a signing request for '{}'", spec.name),
        })
}

/// A loaded certificate authority able to sign leaves.
pub struct Authority {
    pub name: String,
    pub certificate: String,
    issuer: Issuer<'static, KeyPair>,
}

impl Authority {
    pub fn load(name: &str, certificate: &str, key: Option<&str>) -> Result<Self> {
        let key_pem = key.context(error::MissingCaSnafu { name })?;
        let key = parse_key(name, key_pem)?;
        let issuer =
            Issuer::from_ca_cert_pem(certificate, key).context(error::PkiGenerateSnafu {
                what: format!("load authority '{}'", name),
            })?;
        Ok(Self {
            name: name.to_string(),
            certificate: certificate.to_string(),
            issuer,
        })
    }

    /// Signs `spec` for the holder of `key` and returns the leaf PEM.
    pub fn sign(&self, spec: &LeafSpec, key: &KeyPair) -> Result<String> {
        let cert = leaf_params(spec)?
            .signed_by(key, &self.issuer)
            .context(error::PkiGenerateSnafu {
                what: format!("sign '{}' with '{}'", spec.name, self.name),
            })?;
        Ok(cert.pem())
    }
}
