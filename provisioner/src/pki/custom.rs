//! Certificates supplied by the operator in a directory instead of generated here.

use super::authority;
use super::bundle::new_entry;
use super::generate::{attach_kubeconfigs, leaf_specs};
use super::validate;
use crate::error::{self, Component, Result};
use log::{debug, info};
use rke_model::config::ClusterConfig;
use rke_model::constants::*;
use rke_model::{CertificateBundle, CertificateEntry};
use snafu::{ensure, ResultExt};
use std::fs;
use std::io::Write;
use std::path::Path;

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context(error::IoSnafu {
            component: Component::Pki,
            what: format!("read '{}'", path.display()),
        }),
    }
}

fn load_entry(dir: &Path, name: &str, common_name: &str) -> Result<Option<CertificateEntry>> {
    let certificate = match read_optional(&dir.join(format!("{}.pem", name)))? {
        Some(certificate) => certificate,
        None => return Ok(None),
    };
    let key = read_optional(&dir.join(format!("{}-key.pem", name)))?;
    if let Some(key) = &key {
        authority::parse_key(name, key)?;
    }
    let mut entry = new_entry(name, common_name, "");
    entry.certificate = certificate;
    entry.key = key;
    Ok(Some(entry))
}

/// Loads every certificate the cluster needs from `<dir>/<name>.pem` and `<dir>/<name>-key.pem`.
/// Leaves must verify against the loaded CA and cover the alternative names the cluster needs.
pub fn load_dir(dir: &Path, config: &ClusterConfig) -> Result<CertificateBundle> {
    info!("[pki] Loading custom certificates from '{}'", dir.display());
    let now = chrono::Utc::now().timestamp();
    let mut bundle = CertificateBundle::new();

    let ca = load_entry(dir, CA_CERT_NAME, CA_CERT_NAME)?.ok_or_else(|| {
        error::Error::MissingCa {
            name: CA_CERT_NAME.to_string(),
        }
    })?;
    bundle.insert(CA_CERT_NAME.to_string(), ca);
    if let Some(ca) = load_entry(dir, REQUEST_HEADER_CA_CERT_NAME, REQUEST_HEADER_CA_CERT_NAME)? {
        bundle.insert(REQUEST_HEADER_CA_CERT_NAME.to_string(), ca);
    }

    for spec in leaf_specs(config)? {
        let mut entry = load_entry(dir, &spec.name, &spec.common_name)?.ok_or_else(|| {
            error::Error::PkiParse {
                name: spec.name.clone(),
                message: format!("'{}.pem' is missing from '{}'", spec.name, dir.display()),
            }
        })?;
        ensure!(
            entry.key.is_some(),
            error::InvalidUpstreamKeySnafu {
                name: spec.name.as_str(),
                message: "private key file is missing",
            }
        );
        let info = validate::inspect(&spec.name, &entry.certificate)?;
        validate::check_expiry(&spec.name, &info, now)?;
        ensure!(
            info.alt_names.contains(&spec.alt_names),
            error::AltNameMismatchSnafu {
                name: spec.name.as_str()
            }
        );
        let signer = bundle
            .get(spec.signer)
            .map(|ca| ca.certificate.clone())
            .ok_or_else(|| error::Error::MissingCa {
                name: spec.signer.to_string(),
            })?;
        entry.chain = vec![entry.certificate.clone(), signer];
        debug!("[pki] Loaded custom certificate '{}'", spec.name);
        bundle.insert(spec.name.clone(), entry);
    }

    if let Some(token) = load_entry(dir, SERVICE_ACCOUNT_TOKEN_KEY_NAME, SERVICE_ACCOUNT_TOKEN_KEY_NAME)? {
        bundle.insert(SERVICE_ACCOUNT_TOKEN_KEY_NAME.to_string(), token);
    }

    validate::validate_bundle(&bundle)?;
    attach_kubeconfigs(config, &mut bundle);
    Ok(bundle)
}

/// Writes the signing requests and keys of a CSR-mode bundle to `dir`.
pub fn write_csrs(dir: &Path, bundle: &CertificateBundle) -> Result<()> {
    fs::create_dir_all(dir).context(error::IoSnafu {
        component: Component::Pki,
        what: format!("create '{}'", dir.display()),
    })?;
    for (name, entry) in bundle {
        if let Some(csr) = &entry.csr {
            write_private(&dir.join(format!("{}-csr.pem", name)), csr)?;
        }
        if let Some(key) = &entry.key {
            write_private(&dir.join(format!("{}-key.pem", name)), key)?;
        }
    }
    info!("[pki] Wrote signing requests to '{}'", dir.display());
    Ok(())
}

fn write_private(path: &Path, contents: &str) -> Result<()> {
    let context = || error::IoSnafu {
        component: Component::Pki,
        what: format!("write '{}'", path.display()),
    };
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).with_context(|_| context())?;
    file.write_all(contents.as_bytes())
        .with_context(|_| context())
}
