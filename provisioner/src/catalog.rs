/*!

The version catalog: for every supported kubernetes version, the system images the planner emits,
the per-service option flags merged onto the planner's own defaults, and the templates the core
renders itself.

Option values follow two conventions. An empty value removes the flag from the command line, and
`''` sets it to the empty string. A value starting with `[PREFIX_PATH]` has that token replaced by
the host's prefix path.

!*/

use crate::error::{self, Result};
use lazy_static::lazy_static;
use rke_model::config::SystemImages;
use rke_model::version::{base_version, major_minor};
use snafu::OptionExt;
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_K8S_VERSION: &str = "v1.24.10-rancher4-1";
pub const PREFIX_PATH_TOKEN: &str = "[PREFIX_PATH]";
pub const ENCRYPTION_TEMPLATE: &str = "encryption-config";

pub type OptionMap = BTreeMap<String, String>;

/// Option overrides for each kubernetes service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceOptions {
    pub etcd: OptionMap,
    pub kube_api: OptionMap,
    pub kube_controller: OptionMap,
    pub scheduler: OptionMap,
    pub kubelet: OptionMap,
    pub kubeproxy: OptionMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub version: String,
    pub system_images: SystemImages,
    pub linux_options: ServiceOptions,
    pub windows_options: ServiceOptions,
    /// Keyed by template name. The text is opaque to the catalog.
    pub templates: BTreeMap<String, String>,
}

/// Exact lookup.
pub fn resolve(version: &str) -> Result<&'static Catalog> {
    CATALOG
        .get(version)
        .context(error::UnsupportedVersionSnafu { version })
}

/// Exact lookup, falling back to the newest entry sharing `vMAJOR.MINOR`.
pub fn resolve_major(version: &str) -> Result<&'static Catalog> {
    if let Ok(catalog) = resolve(version) {
        return Ok(catalog);
    }
    let wanted = major_minor(version)
        .ok()
        .context(error::UnsupportedVersionSnafu { version })?;
    CATALOG
        .values()
        .filter(|c| major_minor(&c.version).ok().as_deref() == Some(wanted.as_str()))
        .max_by(|a, b| {
            let a_base = base_version(&a.version).ok();
            let b_base = base_version(&b.version).ok();
            a_base.cmp(&b_base).then_with(|| a.version.cmp(&b.version))
        })
        .context(error::UnsupportedVersionSnafu { version })
}

/// Every version in the catalog, oldest first.
pub fn versions() -> Vec<&'static str> {
    let mut versions: Vec<&'static str> = CATALOG.keys().map(String::as_str).collect();
    versions.sort_by_key(|v| base_version(v).ok());
    versions
}

fn opts(pairs: &[(&str, &str)]) -> OptionMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

const TLS_CIPHER_SUITES: &str = "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305,TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305,TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384";

const ADMISSION_PLUGINS: &str = "NamespaceLifecycle,LimitRanger,ServiceAccount,DefaultStorageClass,DefaultTolerationSeconds,MutatingAdmissionWebhook,ValidatingAdmissionWebhook,ResourceQuota,NodeRestriction,Priority,TaintNodesByCondition,PersistentVolumeClaimResize";

const ENCRYPTION_CONFIG_V1: &str = r#"apiVersion: apiserver.config.k8s.io/v1
kind: EncryptionConfiguration
resources:
  - resources:
    - secrets
    providers:
    - aescbc:
        keys:
        - name: {{ .Name }}
          secret: {{ .Secret }}
    - identity: {}
"#;

const ENCRYPTION_CONFIG_LEGACY: &str = r#"apiVersion: v1
kind: EncryptionConfig
resources:
  - resources:
    - secrets
    providers:
    - aescbc:
        keys:
        - name: {{ .Name }}
          secret: {{ .Secret }}
    - identity: {}
"#;

/// Images shared by one release train, differing only in a handful of tags.
struct Train<'a> {
    hyperkube: &'a str,
    etcd: &'a str,
    tools: &'a str,
    coredns: &'a str,
    dns: &'a str,
    autoscaler: &'a str,
    flannel: &'a str,
    calico: &'a str,
    pause: &'a str,
    ingress: &'a str,
    metrics: &'a str,
}

fn images(train: Train<'_>) -> SystemImages {
    let tools = format!("rancher/rke-tools:{}", train.tools);
    let calico = train.calico;
    SystemImages {
        etcd: format!("rancher/mirrored-coreos-etcd:{}", train.etcd),
        alpine: tools.clone(),
        nginx_proxy: tools.clone(),
        cert_downloader: tools.clone(),
        kubernetes_services_sidecar: tools,
        kubedns: format!("rancher/mirrored-k8s-dns-kube-dns:{}", train.dns),
        dnsmasq: format!("rancher/mirrored-k8s-dns-dnsmasq-nanny:{}", train.dns),
        kubedns_sidecar: format!("rancher/mirrored-k8s-dns-sidecar:{}", train.dns),
        kubedns_autoscaler: format!(
            "rancher/mirrored-cluster-proportional-autoscaler:{}",
            train.autoscaler
        ),
        coredns: format!("rancher/mirrored-coredns-coredns:{}", train.coredns),
        coredns_autoscaler: format!(
            "rancher/mirrored-cluster-proportional-autoscaler:{}",
            train.autoscaler
        ),
        nodelocal: format!("rancher/mirrored-k8s-dns-node-cache:{}", train.dns),
        kubernetes: format!("rancher/hyperkube:{}", train.hyperkube),
        flannel: format!("rancher/mirrored-flannelcni-flannel:{}", train.flannel),
        flannel_cni: "rancher/flannel-cni:v0.3.0-rancher6".to_string(),
        calico_node: format!("rancher/mirrored-calico-node:{}", calico),
        calico_cni: format!("rancher/calico-cni:{}-rancher1", calico),
        calico_controllers: format!("rancher/mirrored-calico-kube-controllers:{}", calico),
        calico_ctl: format!("rancher/mirrored-calico-ctl:{}", calico),
        calico_flexvol: format!("rancher/mirrored-calico-pod2daemon-flexvol:{}", calico),
        canal_node: format!("rancher/mirrored-calico-node:{}", calico),
        canal_cni: format!("rancher/calico-cni:{}-rancher1", calico),
        canal_controllers: format!("rancher/mirrored-calico-kube-controllers:{}", calico),
        canal_flannel: format!("rancher/mirrored-flannelcni-flannel:{}", train.flannel),
        canal_flexvol: format!("rancher/mirrored-calico-pod2daemon-flexvol:{}", calico),
        weave_node: "weaveworks/weave-kube:2.8.1".to_string(),
        weave_cni: "weaveworks/weave-npc:2.8.1".to_string(),
        pod_infra_container: format!("rancher/mirrored-pause:{}", train.pause),
        ingress: format!("rancher/nginx-ingress-controller:{}", train.ingress),
        ingress_backend: "rancher/mirrored-nginx-ingress-controller-defaultbackend:1.5-rancher1"
            .to_string(),
        ingress_webhook: "rancher/mirrored-ingress-nginx-kube-webhook-certgen:v1.1.1".to_string(),
        metrics_server: format!("rancher/mirrored-metrics-server:{}", train.metrics),
        windows_pod_infra_container: format!("rancher/mirrored-pause:{}", train.pause),
        aci_cni_deploy_container: "noiro/cnideploy:5.2.3.4.1d150da".to_string(),
        aci_host_container: "noiro/aci-containers-host:5.2.3.4.1d150da".to_string(),
        aci_opflex_container: "noiro/opflex:5.2.3.4.1d150da".to_string(),
        aci_mcast_container: "noiro/opflex:5.2.3.4.1d150da".to_string(),
        aci_ovs_container: "noiro/openvswitch:5.2.3.4.1d150da".to_string(),
        aci_controller_container: "noiro/aci-containers-controller:5.2.3.4.1d150da".to_string(),
    }
}

/// Options for the 1.22 and newer releases, where the insecure ports are gone.
fn modern_linux_options() -> ServiceOptions {
    ServiceOptions {
        etcd: opts(&[
            ("client-cert-auth", "true"),
            ("peer-client-cert-auth", "true"),
            ("enable-v2", "true"),
        ]),
        kube_api: opts(&[
            ("allow-privileged", "true"),
            ("anonymous-auth", "false"),
            ("api-audiences", "unknown"),
            ("bind-address", "0.0.0.0"),
            ("enable-admission-plugins", ADMISSION_PLUGINS),
            ("insecure-port", ""),
            ("kubelet-preferred-address-types", "InternalIP,ExternalIP,Hostname"),
            ("profiling", "false"),
            ("requestheader-extra-headers-prefix", "X-Remote-Extra-"),
            ("requestheader-group-headers", "X-Remote-Group"),
            ("requestheader-username-headers", "X-Remote-User"),
            ("runtime-config", "authorization.k8s.io/v1beta1=true"),
            ("secure-port", "6443"),
            ("service-account-issuer", "rke"),
            ("service-account-lookup", "true"),
            (
                "service-account-signing-key-file",
                "/etc/kubernetes/ssl/kube-service-account-token-key.pem",
            ),
            ("storage-backend", "etcd3"),
            ("tls-cipher-suites", TLS_CIPHER_SUITES),
        ]),
        kube_controller: opts(&[
            ("address", ""),
            ("allocate-node-cidrs", "true"),
            ("allow-untagged-cloud", "true"),
            ("bind-address", "127.0.0.1"),
            ("configure-cloud-routes", "false"),
            ("enable-hostpath-provisioner", "false"),
            ("feature-gates", "RotateKubeletServerCertificate=true"),
            ("leader-elect", "true"),
            ("node-monitor-grace-period", "40s"),
            ("pod-eviction-timeout", "5m0s"),
            ("profiling", "false"),
            ("terminated-pod-gc-threshold", "1000"),
            ("v", "2"),
        ]),
        scheduler: opts(&[
            ("address", ""),
            ("bind-address", "127.0.0.1"),
            ("leader-elect", "true"),
            ("profiling", "false"),
            ("v", "2"),
        ]),
        kubelet: opts(&[
            ("address", "0.0.0.0"),
            ("anonymous-auth", "false"),
            ("authentication-token-webhook", "true"),
            ("cgroups-per-qos", "True"),
            ("cni-bin-dir", "/opt/cni/bin"),
            ("cni-conf-dir", "/etc/cni/net.d"),
            ("enforce-node-allocatable", "''"),
            ("event-qps", "0"),
            ("make-iptables-util-chains", "true"),
            ("network-plugin", ""),
            ("read-only-port", "0"),
            ("resolv-conf", "/etc/resolv.conf"),
            ("root-dir", "[PREFIX_PATH]/var/lib/kubelet"),
            ("streaming-connection-idle-timeout", "30m"),
            ("tls-cipher-suites", TLS_CIPHER_SUITES),
            ("volume-plugin-dir", "/var/lib/kubelet/volumeplugins"),
            ("v", "2"),
        ]),
        kubeproxy: opts(&[("healthz-bind-address", "127.0.0.1"), ("v", "2")]),
    }
}

fn modern_windows_options() -> ServiceOptions {
    ServiceOptions {
        kubelet: opts(&[
            ("anonymous-auth", "false"),
            ("authentication-token-webhook", "true"),
            ("cert-dir", "[PREFIX_PATH]/var/lib/kubelet/pki"),
            ("cgroups-per-qos", "false"),
            ("cni-bin-dir", "[PREFIX_PATH]/opt/cni/bin"),
            ("cni-conf-dir", "[PREFIX_PATH]/etc/cni/net.d"),
            ("enforce-node-allocatable", "''"),
            ("event-qps", "0"),
            ("image-pull-progress-deadline", "30m"),
            ("kube-reserved", "cpu=500m,memory=500Mi,ephemeral-storage=1Gi"),
            ("make-iptables-util-chains", "true"),
            ("read-only-port", "0"),
            ("resolv-conf", "''"),
            ("root-dir", "[PREFIX_PATH]/var/lib/kubelet"),
            ("streaming-connection-idle-timeout", "30m"),
            ("system-reserved", "cpu=1000m,memory=2Gi,ephemeral-storage=2Gi"),
            ("v", "2"),
            ("volume-plugin-dir", "[PREFIX_PATH]/var/lib/kubelet/volumeplugins"),
        ]),
        kubeproxy: opts(&[
            ("enable-dsr", "false"),
            ("feature-gates", "WinOverlay=true"),
            ("healthz-bind-address", "127.0.0.1"),
            ("proxy-mode", "kernelspace"),
            ("v", "2"),
        ]),
        ..Default::default()
    }
}

/// Options for releases that still ship the insecure ports and the dockershim flags.
fn legacy_linux_options() -> ServiceOptions {
    let mut options = modern_linux_options();
    options
        .kube_api
        .insert("insecure-port".to_string(), "0".to_string());
    options.kube_api.remove("api-audiences");
    options.kube_api.remove("service-account-issuer");
    options.kube_api.remove("service-account-signing-key-file");
    options
        .kube_controller
        .insert("address".to_string(), "0.0.0.0".to_string());
    options
        .scheduler
        .insert("address".to_string(), "0.0.0.0".to_string());
    options
        .kubelet
        .insert("network-plugin".to_string(), "cni".to_string());
    options.etcd.remove("enable-v2");
    options
}

fn templates(major: &str) -> BTreeMap<String, String> {
    let encryption = if major == "v1.11" || major == "v1.12" {
        ENCRYPTION_CONFIG_LEGACY
    } else {
        ENCRYPTION_CONFIG_V1
    };
    let mut map = BTreeMap::new();
    map.insert(ENCRYPTION_TEMPLATE.to_string(), encryption.to_string());
    map
}

fn entry(
    version: &str,
    train: Train<'_>,
    linux: ServiceOptions,
    windows: ServiceOptions,
) -> (String, Catalog) {
    let major = major_minor(version).unwrap_or_default();
    (
        version.to_string(),
        Catalog {
            version: version.to_string(),
            system_images: images(train),
            linux_options: linux,
            windows_options: windows,
            templates: templates(&major),
        },
    )
}

lazy_static! {
    static ref CATALOG: HashMap<String, Catalog> = {
        let mut map = HashMap::new();
        let (k, v) = entry(
            "v1.13.12-rancher1-2",
            Train {
                hyperkube: "v1.13.12-rancher1",
                etcd: "v3.2.24-rancher1",
                tools: "v0.1.52",
                coredns: "1.2.6",
                dns: "1.15.0",
                autoscaler: "1.0.0",
                flannel: "v0.10.0",
                calico: "v3.4.0",
                pause: "3.1",
                ingress: "0.21.0-rancher3",
                metrics: "v0.3.1",
            },
            legacy_linux_options(),
            ServiceOptions::default(),
        );
        map.insert(k, v);
        let (k, v) = entry(
            "v1.20.15-rancher2-2",
            Train {
                hyperkube: "v1.20.15-rancher2",
                etcd: "v3.4.15-rancher1",
                tools: "v0.1.80",
                coredns: "1.8.0",
                dns: "1.17.0",
                autoscaler: "1.8.1",
                flannel: "v0.15.1",
                calico: "v3.17.2",
                pause: "3.2",
                ingress: "nginx-0.49.3-rancher1",
                metrics: "v0.4.1",
            },
            legacy_linux_options(),
            modern_windows_options(),
        );
        map.insert(k, v);
        let (k, v) = entry(
            "v1.23.16-rancher2-1",
            Train {
                hyperkube: "v1.23.16-rancher2",
                etcd: "v3.5.6",
                tools: "v0.1.88",
                coredns: "1.9.3",
                dns: "1.21.1",
                autoscaler: "1.8.5",
                flannel: "v0.19.2",
                calico: "v3.22.5",
                pause: "3.6",
                ingress: "nginx-1.5.1-rancher2",
                metrics: "v0.6.2",
            },
            modern_linux_options(),
            modern_windows_options(),
        );
        map.insert(k, v);
        let (k, v) = entry(
            "v1.24.7-rancher1-1",
            Train {
                hyperkube: "v1.24.7-rancher1",
                etcd: "v3.5.4",
                tools: "v0.1.87",
                coredns: "1.9.3",
                dns: "1.21.1",
                autoscaler: "1.8.5",
                flannel: "v0.19.2",
                calico: "v3.22.5",
                pause: "3.6",
                ingress: "nginx-1.2.1-rancher1",
                metrics: "v0.6.1",
            },
            modern_linux_options(),
            modern_windows_options(),
        );
        map.insert(k, v);
        let (k, v) = entry(
            DEFAULT_K8S_VERSION,
            Train {
                hyperkube: "v1.24.10-rancher4",
                etcd: "v3.5.6",
                tools: "v0.1.88",
                coredns: "1.9.3",
                dns: "1.22.13",
                autoscaler: "1.8.6",
                flannel: "v0.19.2",
                calico: "v3.22.5",
                pause: "3.6",
                ingress: "nginx-1.5.1-rancher2",
                metrics: "v0.6.2",
            },
            modern_linux_options(),
            modern_windows_options(),
        );
        map.insert(k, v);
        map
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exact_resolution() {
        let catalog = resolve("v1.24.7-rancher1-1").unwrap();
        assert_eq!(catalog.system_images.etcd, "rancher/mirrored-coreos-etcd:v3.5.4");
        assert_eq!(
            catalog.system_images.kubernetes,
            "rancher/hyperkube:v1.24.7-rancher1"
        );
    }

    #[test]
    fn unknown_version_is_unsupported() {
        let err = resolve("v1.99.0-rancher1-1").unwrap_err();
        assert!(err.to_string().contains("not supported"));
        assert!(resolve_major("v1.99.0-rancher1-1").is_err());
        assert!(resolve_major("garbage").is_err());
    }

    #[test]
    fn major_falls_back_to_newest_patch() {
        let catalog = resolve_major("v1.24.99-rancher1-1").unwrap();
        assert_eq!(catalog.version, DEFAULT_K8S_VERSION);
        let catalog = resolve_major("v1.24.7-rancher1-1").unwrap();
        assert_eq!(catalog.version, "v1.24.7-rancher1-1");
    }

    #[test]
    fn default_version_is_in_catalog() {
        assert!(resolve(DEFAULT_K8S_VERSION).is_ok());
        assert_eq!(versions().first().copied(), Some("v1.13.12-rancher1-2"));
    }

    #[test]
    fn encryption_template_tracks_api_version() {
        let legacy = resolve("v1.13.12-rancher1-2").unwrap();
        assert!(legacy.templates[ENCRYPTION_TEMPLATE].contains("apiserver.config.k8s.io/v1"));
    }
}
