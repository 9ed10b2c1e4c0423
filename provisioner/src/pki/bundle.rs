//! Transport metadata for certificate entries and the per-host subsets shipped to each node.

use rke_model::config::ClusterConfig;
use rke_model::constants::*;
use rke_model::{CertificateBundle, CertificateEntry, Node};

/// `kube-etcd-10-0-0-1` for `10.0.0.1`.
pub fn etcd_cert_name(address: &str) -> String {
    format!("{}-{}", ETCD_CERT_NAME, dashed(address))
}

/// `kube-kubelet-10-0-0-1` for `10.0.0.1`.
pub fn kubelet_cert_name(address: &str) -> String {
    format!("{}-{}", KUBELET_CERT_NAME, dashed(address))
}

fn dashed(address: &str) -> String {
    address.replace(['.', ':'], "-")
}

/// `KUBE_APISERVER` for `kube-apiserver`.
pub fn env_name(name: &str) -> String {
    name.to_uppercase().replace(['-', '.'], "_")
}

pub fn key_env_name(name: &str) -> String {
    format!("{}_KEY", env_name(name))
}

pub fn config_env_name(name: &str) -> String {
    format!("KUBECFG_{}", env_name(name))
}

pub fn cert_path(name: &str) -> String {
    format!("{}{}.pem", CERT_PATH_PREFIX, name)
}

pub fn key_path(name: &str) -> String {
    format!("{}{}-key.pem", CERT_PATH_PREFIX, name)
}

pub fn config_path(name: &str) -> String {
    format!("{}kubecfg-{}.yaml", CERT_PATH_PREFIX, name)
}

/// An empty entry with every derived transport name filled in.
pub fn new_entry(name: &str, common_name: &str, organization: &str) -> CertificateEntry {
    CertificateEntry {
        name: name.to_string(),
        common_name: common_name.to_string(),
        organization: organization.to_string(),
        env_name: env_name(name),
        env_file_name: format!("{}_PATH", env_name(name)),
        path: cert_path(name),
        key_path: key_path(name),
        key_env_name: key_env_name(name),
        config_env_name: config_env_name(name),
        ..Default::default()
    }
}

/// Whether `name` is one of the per-host certificates.
pub fn is_per_host(name: &str) -> bool {
    let etcd = name.starts_with(&format!("{}-", ETCD_CERT_NAME))
        && name != ETCD_CLIENT_CERT_NAME
        && name != ETCD_CLIENT_CA_CERT_NAME;
    etcd || name.starts_with(&format!("{}-", KUBELET_CERT_NAME))
}

/// The certificate names `node` receives. Private keys of the authorities never leave the driver.
pub fn names_for_host(config: &ClusterConfig, node: &Node, bundle: &CertificateBundle) -> Vec<String> {
    let mut names = vec![CA_CERT_NAME.to_string()];
    let own_kubelet = kubelet_cert_name(&node.address);
    let own_etcd = etcd_cert_name(&node.address);

    if node.is_control() {
        for name in bundle.keys() {
            if name == CA_CERT_NAME {
                continue;
            }
            if name.starts_with(&format!("{}-", KUBELET_CERT_NAME)) && *name != own_kubelet {
                continue;
            }
            names.push(name.clone());
        }
        return names;
    }

    names.push(KUBE_NODE_CERT_NAME.to_string());
    names.push(KUBE_PROXY_CERT_NAME.to_string());
    if node.is_etcd() && bundle.contains_key(&own_etcd) {
        names.push(own_etcd);
    }
    if config.services.kubelet.generate_serving_certificate && bundle.contains_key(&own_kubelet) {
        names.push(own_kubelet);
    }
    names.retain(|name| bundle.contains_key(name));
    names
}

/// The `NAME=value` env list the cert deployer consumes. Authority keys are omitted.
pub fn host_env(config: &ClusterConfig, node: &Node, bundle: &CertificateBundle) -> Vec<String> {
    let mut env = Vec::new();
    for name in names_for_host(config, node, bundle) {
        let entry = match bundle.get(&name) {
            Some(entry) => entry,
            None => continue,
        };
        if !entry.certificate.is_empty() {
            env.push(format!("{}={}", entry.env_name, entry.certificate));
            env.push(format!("{}={}", entry.env_file_name, entry.path));
        }
        let is_authority = name == CA_CERT_NAME || name == REQUEST_HEADER_CA_CERT_NAME;
        if let Some(key) = entry.key.as_ref().filter(|_| !is_authority) {
            env.push(format!("{}={}", entry.key_env_name, key));
        }
        if let Some(config) = &entry.config {
            env.push(format!("{}={}", entry.config_env_name, config));
        }
    }
    env
}
