use super::authority::AltNames;
use crate::error::{self, Result};
use rke_model::constants::{API_PROXY_CLIENT_CERT_NAME, CA_CERT_NAME, REQUEST_HEADER_CA_CERT_NAME};
use rke_model::CertificateBundle;
use snafu::{ensure, OptionExt};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use x509_parser::prelude::*;

/// The parts of a certificate the authority makes decisions on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    pub alt_names: AltNames,
    pub not_after: i64,
    pub client_auth: bool,
    pub is_ca: bool,
}

fn der(name: &str, pem_text: &str) -> Result<Vec<u8>> {
    ::pem::parse(pem_text)
        .map(|p| p.contents().to_vec())
        .map_err(|e| error::Error::PkiParse {
            name: name.to_string(),
            message: e.to_string(),
        })
}

fn parse_err<E: std::fmt::Display>(name: &str) -> impl Fn(E) -> error::Error + '_ {
    move |e| error::Error::PkiParse {
        name: name.to_string(),
        message: e.to_string(),
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => Some(IpAddr::V4(Ipv4Addr::new(
            bytes[0], bytes[1], bytes[2], bytes[3],
        ))),
        16 => <[u8; 16]>::try_from(bytes)
            .ok()
            .map(|octets| IpAddr::V6(Ipv6Addr::from(octets))),
        _ => None,
    }
}

pub fn inspect(name: &str, pem_text: &str) -> Result<CertInfo> {
    let der = der(name, pem_text)?;
    let (_, cert) = parse_x509_certificate(&der).map_err(parse_err(name))?;

    let mut alt_names = AltNames::default();
    if let Some(san) = cert.subject_alternative_name().map_err(parse_err(name))? {
        for general in &san.value.general_names {
            match general {
                GeneralName::DNSName(dns) => alt_names.add(dns),
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_bytes(bytes) {
                        alt_names.ips.insert(ip);
                    }
                }
                _ => {}
            }
        }
    }
    let client_auth = cert
        .extended_key_usage()
        .map_err(parse_err(name))?
        .map(|eku| eku.value.client_auth)
        .unwrap_or(false);

    Ok(CertInfo {
        alt_names,
        not_after: cert.validity().not_after.timestamp(),
        client_auth,
        is_ca: cert.is_ca(),
    })
}

/// Verifies that `leaf_pem` carries a signature from `ca_pem`.
pub fn verify_signed_by(name: &str, leaf_pem: &str, ca_pem: &str) -> Result<()> {
    let leaf_der = der(name, leaf_pem)?;
    let ca_der = der(name, ca_pem)?;
    let (_, leaf) = parse_x509_certificate(&leaf_der).map_err(parse_err(name))?;
    let (_, ca) = parse_x509_certificate(&ca_der).map_err(parse_err(name))?;
    leaf.verify_signature(Some(ca.public_key()))
        .map_err(parse_err(name))
}

pub fn check_expiry(name: &str, info: &CertInfo, now: i64) -> Result<()> {
    ensure!(
        info.not_after > now,
        error::CertExpiredSnafu {
            name,
            not_after: chrono::DateTime::from_timestamp(info.not_after, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| info.not_after.to_string()),
        }
    );
    Ok(())
}

/// The authority that signs `name`.
pub fn signer_of(name: &str) -> &'static str {
    if name == API_PROXY_CLIENT_CERT_NAME {
        REQUEST_HEADER_CA_CERT_NAME
    } else {
        CA_CERT_NAME
    }
}

/// Every non-authority certificate in `bundle` must verify against its authority and carry the
/// client-auth usage.
pub fn validate_bundle(bundle: &CertificateBundle) -> Result<()> {
    for (name, entry) in bundle {
        if name == CA_CERT_NAME || name == REQUEST_HEADER_CA_CERT_NAME || entry.certificate.is_empty()
        {
            continue;
        }
        let signer = signer_of(name);
        let ca = bundle
            .get(signer)
            .filter(|ca| !ca.certificate.is_empty())
            .context(error::MissingCaSnafu { name: signer })?;
        verify_signed_by(name, &entry.certificate, &ca.certificate)?;
        let info = inspect(name, &entry.certificate)?;
        ensure!(
            info.client_auth,
            error::PkiParseSnafu {
                name: name.as_str(),
                message: "certificate lacks the client-auth usage",
            }
        );
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::super::authority::{generate_key, new_ca, Authority, LeafSpec};
    use super::*;

    fn spec(name: &str, ips: &[&str]) -> LeafSpec {
        let mut alt_names = AltNames::default();
        for ip in ips {
            alt_names.add(ip);
        }
        LeafSpec {
            name: name.to_string(),
            common_name: name.to_string(),
            organization: String::new(),
            alt_names,
            server: false,
            signer: CA_CERT_NAME,
        }
    }

    #[test]
    fn inspect_reads_sans_and_usage() {
        let (ca_cert, ca_key) = new_ca(CA_CERT_NAME).unwrap();
        let authority = Authority::load(CA_CERT_NAME, &ca_cert, Some(&ca_key)).unwrap();
        let leaf = authority
            .sign(&spec("kube-node", &["10.0.0.1", "node-1"]), &generate_key().unwrap())
            .unwrap();
        let info = inspect("kube-node", &leaf).unwrap();
        assert!(info.client_auth);
        assert!(!info.is_ca);
        assert_eq!(info.alt_names.to_string(), "10.0.0.1,node-1");
        assert!(inspect(CA_CERT_NAME, &ca_cert).unwrap().is_ca);
        verify_signed_by("kube-node", &leaf, &ca_cert).unwrap();
        check_expiry("kube-node", &info, 0).unwrap();
        assert!(check_expiry("kube-node", &info, i64::MAX).is_err());
    }

    #[test]
    fn foreign_signature_fails() {
        let (ca_cert, ca_key) = new_ca(CA_CERT_NAME).unwrap();
        let (other_cert, _) = new_ca("other-ca").unwrap();
        let authority = Authority::load(CA_CERT_NAME, &ca_cert, Some(&ca_key)).unwrap();
        let leaf = authority
            .sign(&spec("kube-proxy", &[]), &generate_key().unwrap())
            .unwrap();
        assert!(verify_signed_by("kube-proxy", &leaf, &other_cert).is_err());
    }

    #[test]
    fn garbage_pem_is_a_parse_error() {
        assert!(matches!(
            inspect("kube-node", "not a certificate"),
            Err(error::Error::PkiParse { .. })
        ));
    }
}
