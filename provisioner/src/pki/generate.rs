use super::authority::{self, AltNames, Authority, LeafSpec};
use super::bundle::{self, etcd_cert_name, kubelet_cert_name, new_entry};
use super::kubeconfig;
use super::validate;
use crate::error::{self, Result};
use log::{debug, info};
use rcgen::KeyPair;
use rke_model::config::{ClusterConfig, RotateCertificates};
use rke_model::constants::*;
use rke_model::validation::kubernetes_service_ip;
use rke_model::{CertificateBundle, CertificateEntry, Role};
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;

/// The apiserver SAN set: every controlplane address, loopback, the kubernetes service IP, the
/// user's extra SANs and the in-cluster DNS names.
pub fn apiserver_alt_names(config: &ClusterConfig) -> Result<AltNames> {
    let mut names = AltNames::default();
    for node in config.nodes_with_role(Role::Controlplane) {
        names.add(&node.address);
        names.add(node.internal());
    }
    names.add("127.0.0.1");
    let service_ip = kubernetes_service_ip(&config.services.kube_api.service_cluster_ip_range)
        .context(error::ModelSnafu)?;
    names.ips.insert(service_ip);
    for san in &config.authentication.sans {
        names.add(san);
    }
    for dns in [
        "localhost",
        "kubernetes",
        "kubernetes.default",
        "kubernetes.default.svc",
    ] {
        names.add(dns);
    }
    names.add(&format!(
        "kubernetes.default.svc.{}",
        config.services.kubelet.cluster_domain
    ));
    Ok(names)
}

fn spec(name: &str, common_name: &str, organization: &str) -> LeafSpec {
    LeafSpec {
        name: name.to_string(),
        common_name: common_name.to_string(),
        organization: organization.to_string(),
        alt_names: AltNames::default(),
        server: false,
        signer: validate::signer_of(name),
    }
}

/// Every leaf the cluster needs, in generation order. The service account token key is handled
/// separately.
pub fn leaf_specs(config: &ClusterConfig) -> Result<Vec<LeafSpec>> {
    let api_names = apiserver_alt_names(config)?;
    let mut specs = Vec::new();

    let mut api = spec(KUBE_APISERVER_CERT_NAME, KUBE_APISERVER_CERT_NAME, "");
    api.alt_names = api_names.clone();
    api.server = true;
    specs.push(api);

    specs.push(spec(
        KUBE_CONTROLLER_CERT_NAME,
        KUBE_CONTROLLER_COMMON_NAME,
        "",
    ));
    specs.push(spec(KUBE_SCHEDULER_CERT_NAME, KUBE_SCHEDULER_COMMON_NAME, ""));
    specs.push(spec(KUBE_PROXY_CERT_NAME, KUBE_PROXY_COMMON_NAME, ""));
    specs.push(spec(
        KUBE_NODE_CERT_NAME,
        KUBE_NODE_COMMON_NAME,
        KUBE_NODE_ORGANIZATION,
    ));
    specs.push(spec(
        KUBE_ADMIN_CERT_NAME,
        KUBE_ADMIN_CERT_NAME,
        KUBE_ADMIN_ORGANIZATION,
    ));
    specs.push(spec(
        API_PROXY_CLIENT_CERT_NAME,
        API_PROXY_CLIENT_CERT_NAME,
        "",
    ));

    if !config.services.etcd.is_external() {
        let mut etcd_names = api_names;
        for node in config.nodes_with_role(Role::Etcd) {
            etcd_names.add(&node.address);
            etcd_names.add(node.internal());
            etcd_names.add(node.hostname());
        }
        for node in config.nodes_with_role(Role::Etcd) {
            let name = etcd_cert_name(&node.address);
            let mut etcd = spec(&name, &name, "");
            etcd.alt_names = etcd_names.clone();
            etcd.server = true;
            specs.push(etcd);
        }
    }

    if config.services.kubelet.generate_serving_certificate {
        for node in &config.nodes {
            let name = kubelet_cert_name(&node.address);
            let common_name = format!("{}:{}", KUBE_NODE_COMMON_NAME, node.hostname());
            let mut kubelet = spec(&name, &common_name, KUBE_NODE_ORGANIZATION);
            kubelet.alt_names.add(&node.address);
            kubelet.alt_names.add(node.internal());
            kubelet.alt_names.add(node.hostname());
            kubelet.server = true;
            specs.push(kubelet);
        }
    }
    Ok(specs)
}

fn service_account_spec() -> LeafSpec {
    spec(
        SERVICE_ACCOUNT_TOKEN_KEY_NAME,
        SERVICE_ACCOUNT_TOKEN_KEY_NAME,
        "",
    )
}

/// The service a leaf belongs to for selective rotation.
fn owning_service(name: &str) -> Option<&'static str> {
    match name {
        KUBE_APISERVER_CERT_NAME | API_PROXY_CLIENT_CERT_NAME => Some("kube-apiserver"),
        KUBE_CONTROLLER_CERT_NAME => Some("kube-controller-manager"),
        KUBE_SCHEDULER_CERT_NAME => Some("kube-scheduler"),
        KUBE_PROXY_CERT_NAME => Some("kube-proxy"),
        KUBE_NODE_CERT_NAME => Some("kubelet"),
        other if other.starts_with(&format!("{}-", KUBELET_CERT_NAME)) => Some("kubelet"),
        other if bundle::is_per_host(other) => Some("etcd"),
        _ => None,
    }
}

fn rotates(rotate: Option<&RotateCertificates>, name: &str) -> bool {
    match rotate {
        None => false,
        Some(rotate) if rotate.services.is_empty() => true,
        Some(rotate) => owning_service(name)
            .map(|service| rotate.services.iter().any(|s| s == service))
            .unwrap_or(false),
    }
}

/// Authorities are loaded on first use so an unchanged bundle never needs a CA key.
#[derive(Default)]
struct Signers {
    entries: HashMap<&'static str, (String, Option<String>)>,
    loaded: HashMap<&'static str, Authority>,
}

impl Signers {
    fn add(&mut self, name: &'static str, entry: &CertificateEntry) {
        self.entries
            .insert(name, (entry.certificate.clone(), entry.key.clone()));
    }

    fn certificate(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|(cert, _)| cert.as_str())
    }

    fn get(&mut self, name: &'static str) -> Result<&Authority> {
        if !self.loaded.contains_key(name) {
            let (cert, key) = self
                .entries
                .get(name)
                .context(error::MissingCaSnafu { name })?;
            let authority = Authority::load(name, cert, key.as_deref())?;
            self.loaded.insert(name, authority);
        }
        self.loaded
            .get(name)
            .context(error::MissingCaSnafu { name })
    }
}

fn sign_into(
    mut entry: CertificateEntry,
    spec: &LeafSpec,
    key: &KeyPair,
    signers: &mut Signers,
) -> Result<CertificateEntry> {
    let authority = signers.get(spec.signer)?;
    let certificate = authority.sign(spec, key)?;
    entry.chain = vec![certificate.clone(), authority.certificate.clone()];
    entry.certificate = certificate;
    entry.key = Some(key.serialize_pem());
    Ok(entry)
}

fn issue(
    spec: &LeafSpec,
    previous: Option<&CertificateEntry>,
    signers: &mut Signers,
    force_new: bool,
    now: i64,
) -> Result<CertificateEntry> {
    let mut entry = new_entry(&spec.name, &spec.common_name, &spec.organization);
    let reusable = previous
        .filter(|_| !force_new)
        .filter(|prev| !prev.certificate.is_empty());
    if let Some((prev, key_pem)) = reusable.and_then(|p| p.key.as_ref().map(|k| (p, k))) {
        let current = validate::inspect(&spec.name, &prev.certificate)?;
        if current.alt_names == spec.alt_names {
            validate::check_expiry(&spec.name, &current, now)?;
            entry.certificate = prev.certificate.clone();
            entry.key = Some(key_pem.clone());
            entry.chain = if prev.chain.is_empty() {
                let signer = signers.certificate(spec.signer).unwrap_or_default();
                vec![prev.certificate.clone(), signer.to_string()]
            } else {
                prev.chain.clone()
            };
            return Ok(entry);
        }
        info!(
            "[pki] Alternative names of '{}' changed, re-signing with the existing key",
            spec.name
        );
        debug!("[pki] '{}' alternative names: {}", spec.name, spec.alt_names);
        let key = authority::parse_key(&spec.name, key_pem)?;
        return sign_into(entry, spec, &key, signers);
    }
    info!("[pki] Generating certificate '{}'", spec.name);
    let key = authority::generate_key()?;
    sign_into(entry, spec, &key, signers)
}

fn authority_entry(
    name: &'static str,
    previous: Option<&CertificateEntry>,
    regenerate: bool,
) -> Result<CertificateEntry> {
    let mut entry = new_entry(name, name, "");
    match previous.filter(|prev| !regenerate && !prev.certificate.is_empty()) {
        Some(prev) => {
            entry.certificate = prev.certificate.clone();
            entry.key = prev.key.clone();
        }
        None => {
            info!("[pki] Generating certificate authority '{}'", name);
            let (certificate, key) = authority::new_ca(name)?;
            entry.certificate = certificate;
            entry.key = Some(key);
        }
    }
    entry.chain = vec![entry.certificate.clone()];
    Ok(entry)
}

/// The service account token key signs every token the cluster issued, so it survives rotation.
/// A cluster that predates it keeps validating old tokens by adopting the apiserver key.
fn service_account_token(
    previous: &CertificateBundle,
    signers: &mut Signers,
    resign: bool,
) -> Result<CertificateEntry> {
    let spec = service_account_spec();
    let entry = new_entry(&spec.name, &spec.common_name, &spec.organization);
    if let Some(prev) = previous.get(SERVICE_ACCOUNT_TOKEN_KEY_NAME) {
        if let Some(key_pem) = &prev.key {
            if !resign && !prev.certificate.is_empty() {
                return Ok(CertificateEntry {
                    certificate: prev.certificate.clone(),
                    chain: prev.chain.clone(),
                    key: Some(key_pem.clone()),
                    ..entry
                });
            }
            let key = authority::parse_key(&spec.name, key_pem)?;
            return sign_into(entry, &spec, &key, signers);
        }
    }
    if let Some(key_pem) = previous
        .get(KUBE_APISERVER_CERT_NAME)
        .and_then(|api| api.key.as_ref())
    {
        info!("[pki] Using the kube-apiserver key as the service account token key");
        let key = authority::parse_key(&spec.name, key_pem)?;
        return sign_into(entry, &spec, &key, signers);
    }
    info!("[pki] Generating service account token key");
    let key = authority::generate_key()?;
    sign_into(entry, &spec, &key, signers)
}

/// Entries for an external etcd, taken verbatim from the config.
fn external_etcd_entries(config: &ClusterConfig, bundle: &mut CertificateBundle) {
    let etcd = &config.services.etcd;
    if !etcd.is_external() {
        return;
    }
    if !etcd.ca_cert.is_empty() {
        let mut ca = new_entry(ETCD_CLIENT_CA_CERT_NAME, ETCD_CLIENT_CA_CERT_NAME, "");
        ca.certificate = etcd.ca_cert.clone();
        bundle.insert(ETCD_CLIENT_CA_CERT_NAME.to_string(), ca);
    }
    if !etcd.cert.is_empty() {
        let mut client = new_entry(ETCD_CLIENT_CERT_NAME, ETCD_CLIENT_CERT_NAME, "");
        client.certificate = etcd.cert.clone();
        client.key = Some(etcd.key.clone()).filter(|k| !k.is_empty());
        bundle.insert(ETCD_CLIENT_CERT_NAME.to_string(), client);
    }
}

/// Fills in component kubeconfigs and the admin kubeconfig.
pub fn attach_kubeconfigs(config: &ClusterConfig, bundle: &mut CertificateBundle) {
    for name in [
        KUBE_CONTROLLER_CERT_NAME,
        KUBE_SCHEDULER_CERT_NAME,
        KUBE_PROXY_CERT_NAME,
        KUBE_NODE_CERT_NAME,
    ] {
        if let Some(entry) = bundle.get_mut(name) {
            entry.config = Some(kubeconfig::local(name));
            entry.config_path = Some(bundle::config_path(name));
        }
    }
    let ca = bundle
        .get(CA_CERT_NAME)
        .map(|ca| ca.certificate.clone())
        .filter(|ca| !ca.is_empty());
    let address = config
        .nodes_with_role(Role::Controlplane)
        .next()
        .map(|node| node.address.clone());
    if let (Some(ca), Some(address), Some(admin)) =
        (ca, address, bundle.get_mut(KUBE_ADMIN_CERT_NAME))
    {
        if let Some(key) = admin.key.clone().filter(|_| !admin.certificate.is_empty()) {
            admin.config = Some(kubeconfig::admin(
                &config.cluster_name,
                &address,
                &ca,
                &admin.certificate,
                &key,
            ));
        }
    }
}

/// Builds the certificate bundle for `config`, re-using what `previous` holds where possible.
///
/// Without rotation an existing leaf keeps its key and certificate; it is re-signed with the same
/// key only when its alternative names changed. With rotation the selected leaves get fresh keys.
/// Rotating the CA regenerates both authorities and every leaf.
pub fn generate(
    config: &ClusterConfig,
    previous: &CertificateBundle,
    rotate: Option<&RotateCertificates>,
) -> Result<CertificateBundle> {
    let now = chrono::Utc::now().timestamp();
    let rotate_ca = rotate.map(|r| r.ca_certificates).unwrap_or(false);
    let mut out = CertificateBundle::new();
    let mut signers = Signers::default();

    for name in [CA_CERT_NAME, REQUEST_HEADER_CA_CERT_NAME] {
        let entry = authority_entry(name, previous.get(name), rotate_ca)?;
        signers.add(name, &entry);
        out.insert(name.to_string(), entry);
    }

    for spec in leaf_specs(config)? {
        let force_new = rotate_ca || rotates(rotate, &spec.name);
        let entry = issue(
            &spec,
            previous.get(&spec.name),
            &mut signers,
            force_new,
            now,
        )?;
        out.insert(spec.name.clone(), entry);
    }

    let token = service_account_token(previous, &mut signers, rotate_ca)?;
    out.insert(SERVICE_ACCOUNT_TOKEN_KEY_NAME.to_string(), token);

    external_etcd_entries(config, &mut out);
    attach_kubeconfigs(config, &mut out);
    Ok(out)
}

/// Signing requests and keys for every leaf, for clusters whose leaves are signed by an
/// external authority. Existing keys are kept.
pub fn generate_csrs(
    config: &ClusterConfig,
    previous: &CertificateBundle,
) -> Result<CertificateBundle> {
    let mut out = CertificateBundle::new();
    let specs = leaf_specs(config)?
        .into_iter()
        .chain(std::iter::once(service_account_spec()));
    for spec in specs {
        let prev = previous.get(&spec.name);
        let key = match prev.and_then(|p| p.key.as_deref()) {
            Some(pem) => authority::parse_key(&spec.name, pem)?,
            None => authority::generate_key()?,
        };
        let mut entry = new_entry(&spec.name, &spec.common_name, &spec.organization);
        entry.csr = Some(authority::csr(&spec, &key)?);
        entry.key = Some(key.serialize_pem());
        if let Some(prev) = prev {
            entry.certificate = prev.certificate.clone();
            entry.chain = prev.chain.clone();
        }
        out.insert(spec.name.clone(), entry);
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use rke_model::Node;

    fn node(address: &str, roles: &[Role]) -> Node {
        Node {
            address: address.to_string(),
            internal_address: address.to_string(),
            hostname_override: address.to_string(),
            role: roles.to_vec(),
            ..Default::default()
        }
    }

    fn config() -> ClusterConfig {
        let all = [Role::Etcd, Role::Controlplane];
        let mut config = ClusterConfig {
            nodes: vec![
                node("10.0.0.1", &all),
                node("10.0.0.2", &all),
                node("10.0.0.3", &all),
                node("10.0.0.4", &[Role::Worker]),
            ],
            cluster_name: "local".to_string(),
            ..Default::default()
        };
        config.services.kube_api.service_cluster_ip_range = "10.43.0.0/16".to_string();
        config.services.kubelet.cluster_domain = "cluster.local".to_string();
        config.services.kubelet.generate_serving_certificate = true;
        config.authentication.sans = vec!["api.example.com".to_string()];
        config
    }

    #[test]
    fn apiserver_sans() {
        let names = apiserver_alt_names(&config()).unwrap();
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3", "127.0.0.1", "10.43.0.1"] {
            assert!(names.ips.contains(&ip.parse().unwrap()), "{}", ip);
        }
        assert!(!names.ips.contains(&"10.0.0.4".parse().unwrap()));
        for dns in [
            "localhost",
            "kubernetes",
            "kubernetes.default",
            "kubernetes.default.svc",
            "kubernetes.default.svc.cluster.local",
            "api.example.com",
        ] {
            assert!(names.dns.contains(dns), "{}", dns);
        }
    }

    #[test]
    fn full_bundle_chains_and_kubeconfigs() {
        let config = config();
        let bundle = generate(&config, &CertificateBundle::new(), None).unwrap();
        for name in [
            CA_CERT_NAME,
            REQUEST_HEADER_CA_CERT_NAME,
            KUBE_APISERVER_CERT_NAME,
            KUBE_ADMIN_CERT_NAME,
            SERVICE_ACCOUNT_TOKEN_KEY_NAME,
            "kube-etcd-10-0-0-1",
            "kube-etcd-10-0-0-3",
            "kube-kubelet-10-0-0-4",
        ] {
            assert!(bundle.contains_key(name), "{}", name);
        }
        assert!(!bundle.contains_key("kube-etcd-10-0-0-4"));
        validate::validate_bundle(&bundle).unwrap();
        assert!(bundle[KUBE_NODE_CERT_NAME].config.is_some());
        assert!(bundle[KUBE_ADMIN_CERT_NAME]
            .config
            .as_ref()
            .unwrap()
            .contains("https://10.0.0.1:6443"));
        let etcd = validate::inspect("kube-etcd-10-0-0-2", &bundle["kube-etcd-10-0-0-2"].certificate)
            .unwrap();
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.43.0.1"] {
            assert!(etcd.alt_names.ips.contains(&ip.parse().unwrap()));
        }
    }

    #[test]
    fn unchanged_config_reuses_everything() {
        let config = config();
        let first = generate(&config, &CertificateBundle::new(), None).unwrap();
        let second = generate(&config, &first, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn new_controlplane_host_resigns_apiserver_with_same_key() {
        let mut config = config();
        let first = generate(&config, &CertificateBundle::new(), None).unwrap();
        config.nodes.push(node("10.0.0.5", &[Role::Controlplane]));
        let second = generate(&config, &first, None).unwrap();
        let before = &first[KUBE_APISERVER_CERT_NAME];
        let after = &second[KUBE_APISERVER_CERT_NAME];
        assert_ne!(before.certificate, after.certificate);
        assert_eq!(before.key, after.key);
        assert_eq!(first[KUBE_PROXY_CERT_NAME], second[KUBE_PROXY_CERT_NAME]);
    }

    #[test]
    fn selective_rotation() {
        let config = config();
        let first = generate(&config, &CertificateBundle::new(), None).unwrap();
        let rotate = RotateCertificates {
            ca_certificates: false,
            services: vec!["kubelet".to_string(), "kube-apiserver".to_string()],
        };
        let second = generate(&config, &first, Some(&rotate)).unwrap();
        assert_eq!(first[CA_CERT_NAME], second[CA_CERT_NAME]);
        for rotated in [KUBE_APISERVER_CERT_NAME, "kube-kubelet-10-0-0-1", "kube-kubelet-10-0-0-4"] {
            assert_ne!(first[rotated].key, second[rotated].key, "{}", rotated);
        }
        for kept in [
            KUBE_CONTROLLER_CERT_NAME,
            KUBE_SCHEDULER_CERT_NAME,
            KUBE_ADMIN_CERT_NAME,
            SERVICE_ACCOUNT_TOKEN_KEY_NAME,
            "kube-etcd-10-0-0-1",
        ] {
            assert_eq!(first[kept], second[kept], "{}", kept);
        }
    }

    #[test]
    fn ca_rotation_regenerates_leaves_but_keeps_token_key() {
        let config = config();
        let first = generate(&config, &CertificateBundle::new(), None).unwrap();
        let rotate = RotateCertificates {
            ca_certificates: true,
            services: vec![],
        };
        let second = generate(&config, &first, Some(&rotate)).unwrap();
        assert_ne!(first[CA_CERT_NAME].certificate, second[CA_CERT_NAME].certificate);
        assert_ne!(first[KUBE_ADMIN_CERT_NAME].key, second[KUBE_ADMIN_CERT_NAME].key);
        assert_eq!(
            first[SERVICE_ACCOUNT_TOKEN_KEY_NAME].key,
            second[SERVICE_ACCOUNT_TOKEN_KEY_NAME].key
        );
        validate::validate_bundle(&second).unwrap();
    }

    #[test]
    fn legacy_bundle_adopts_apiserver_key_for_tokens() {
        let config = config();
        let mut first = generate(&config, &CertificateBundle::new(), None).unwrap();
        first.remove(SERVICE_ACCOUNT_TOKEN_KEY_NAME);
        let second = generate(&config, &first, None).unwrap();
        assert_eq!(
            second[SERVICE_ACCOUNT_TOKEN_KEY_NAME].key,
            first[KUBE_APISERVER_CERT_NAME].key
        );
    }

    #[test]
    fn removed_host_loses_its_certificates() {
        let mut config = config();
        let first = generate(&config, &CertificateBundle::new(), None).unwrap();
        config.nodes.retain(|n| n.address != "10.0.0.4");
        let second = generate(&config, &first, None).unwrap();
        assert!(!second.contains_key("kube-kubelet-10-0-0-4"));
    }

    #[test]
    fn csr_mode_produces_requests() {
        let bundle = generate_csrs(&config(), &CertificateBundle::new()).unwrap();
        let api = &bundle[KUBE_APISERVER_CERT_NAME];
        assert!(api.csr.as_ref().unwrap().contains("CERTIFICATE REQUEST"));
        assert!(api.key.is_some());
        assert!(api.certificate.is_empty());
        assert!(!bundle.contains_key(CA_CERT_NAME));
    }

    #[test]
    fn rotation_selection() {
        let rotate = RotateCertificates {
            ca_certificates: false,
            services: vec!["etcd".to_string()],
        };
        assert!(rotates(Some(&rotate), "kube-etcd-10-0-0-1"));
        assert!(!rotates(Some(&rotate), KUBE_APISERVER_CERT_NAME));
        assert!(!rotates(None, KUBE_APISERVER_CERT_NAME));
        assert!(rotates(Some(&RotateCertificates::default()), KUBE_ADMIN_CERT_NAME));
    }
}
