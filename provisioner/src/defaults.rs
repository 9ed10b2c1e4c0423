/*!

The defaults engine fills every unset field of a cluster description. It is a pure transform and
idempotent: running it on its own output changes nothing. A value the user set is never replaced;
empty strings and missing optionals count as unset.

!*/

use crate::catalog::{self, DEFAULT_K8S_VERSION};
use crate::error::{self, Result};
use crate::plugins::{
    NetworkProvider, ACI_PREFIX, CALICO_CLOUD_PROVIDER, CANAL_IFACE, FLANNEL_IFACE, WEAVE_PASSWORD,
};
use k8s_openapi::api::apps::v1::{
    DaemonSetUpdateStrategy, DeploymentStrategy, RollingUpdateDaemonSet, RollingUpdateDeployment,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use log::{debug, warn};
use rke_model::config::{
    AuditLog, AuditLogConfig, AuthWebhookConfig, ClusterConfig, DnsConfig, LinearAutoscalerParams,
    NodeDrainInput, NodeUpgradeStrategy, AUTHN_STRATEGY_WEBHOOK, AUTHN_STRATEGY_X509,
    AUTHORIZATION_MODE_RBAC,
};
use rke_model::version::base_version;
use semver::Version;
use snafu::ResultExt;

pub const DEFAULT_SERVICE_CLUSTER_IP_RANGE: &str = "10.43.0.0/16";
pub const DEFAULT_NODE_PORT_RANGE: &str = "30000-32767";
pub const DEFAULT_CLUSTER_CIDR: &str = "10.42.0.0/16";
pub const DEFAULT_CLUSTER_DNS_SERVICE: &str = "10.43.0.10";
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
pub const DEFAULT_CLUSTER_NAME: &str = "local";
pub const DEFAULT_SSH_KEY_PATH: &str = "~/.ssh/id_rsa";
pub const DEFAULT_SSH_PORT: &str = "22";
pub const DEFAULT_PREFIX_PATH: &str = "/";
pub const DEFAULT_INGRESS_PROVIDER: &str = "nginx";
pub const DEFAULT_MONITORING_PROVIDER: &str = "metrics-server";
pub const DEFAULT_AUTHN_CACHE_TIMEOUT: &str = "5s";
pub const DEFAULT_AUTHN_WEBHOOK_FILE: &str = "/etc/kubernetes/kube-api-authn-webhook.yaml";
pub const COREDNS_PROVIDER: &str = "coredns";
pub const KUBEDNS_PROVIDER: &str = "kube-dns";
pub const DEFAULT_ETCD_BACKUP_CREATION: &str = "12h";
pub const DEFAULT_ETCD_BACKUP_RETENTION: &str = "72h";
pub const DEFAULT_ETCD_BACKUP_INTERVAL_HOURS: u32 = 12;
pub const DEFAULT_ETCD_BACKUP_RETENTION_COUNT: u32 = 6;
pub const DEFAULT_ETCD_BACKUP_TIMEOUT: u64 = 300;
pub const ETCD_ELECTION_TIMEOUT: (&str, &str) = ("election-timeout", "5000");
pub const ETCD_HEARTBEAT_INTERVAL: (&str, &str) = ("heartbeat-interval", "500");
pub const DEFAULT_MAX_UNAVAILABLE_WORKER: &str = "10%";
pub const DEFAULT_MAX_UNAVAILABLE_CONTROLPLANE: &str = "1";
pub const DEFAULT_DRAIN_TIMEOUT: u64 = 120;
pub const DEFAULT_DRAIN_GRACE_PERIOD: i64 = -1;
pub const DEFAULT_ADDON_JOB_TIMEOUT: u64 = 45;
pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_HTTPS_PORT: u16 = 443;
pub const DEFAULT_INGRESS_NETWORK_MODE: &str = "hostNetwork";
pub const ADMISSION_CONFIG_FILE_ARG: &str = "admission-control-config-file";
pub const DEFAULT_AUDIT_LOG_PATH: &str = "/var/log/kube-audit/audit-log.json";

const DEFAULT_EVENT_RATE_LIMIT: &str = r#"apiVersion: eventratelimit.admission.k8s.io/v1alpha1
kind: Configuration
limits:
- type: Server
  qps: 5000
  burst: 20000
"#;

const DEFAULT_AUDIT_POLICY: &str = r#"apiVersion: audit.k8s.io/v1
kind: Policy
rules:
- level: Metadata
"#;

pub fn default_audit_policy() -> Result<serde_yaml::Value> {
    serde_yaml::from_str(DEFAULT_AUDIT_POLICY).context(error::YamlSnafu {
        component: error::Component::Config,
        what: "default audit policy",
    })
}

pub fn default_event_rate_limit() -> Result<serde_yaml::Value> {
    serde_yaml::from_str(DEFAULT_EVENT_RATE_LIMIT).context(error::YamlSnafu {
        component: error::Component::Config,
        what: "default event rate limit",
    })
}

fn set_if_empty(field: &mut String, value: &str) {
    if field.is_empty() {
        *field = value.to_string();
    }
}

fn with_registry(image: &str, registry: Option<&str>) -> String {
    match registry {
        Some(url) if !url.is_empty() && !image.is_empty() => format!("{}/{}", url, image),
        _ => image.to_string(),
    }
}

/// `>=1.15.11 <1.16 || >=1.16.8 <1.17 || >=1.17.4`.
pub fn needs_audit_log(version: &Version) -> bool {
    let v = |major, minor, patch| Version::new(major, minor, patch);
    (version >= &v(1, 15, 11) && version < &v(1, 16, 0))
        || (version >= &v(1, 16, 8) && version < &v(1, 17, 0))
        || version >= &v(1, 17, 4)
}

/// Returns a fully defaulted copy of `input`.
pub fn apply(input: &ClusterConfig) -> Result<ClusterConfig> {
    let mut c = input.clone();

    set_if_empty(&mut c.version, DEFAULT_K8S_VERSION);
    let k8s = base_version(&c.version).context(error::ModelSnafu)?;
    let catalog = catalog::resolve_major(&c.version)?;

    set_if_empty(&mut c.ssh_key_path, DEFAULT_SSH_KEY_PATH);
    set_if_empty(&mut c.prefix_path, DEFAULT_PREFIX_PATH);
    set_if_empty(&mut c.cluster_name, DEFAULT_CLUSTER_NAME);
    if c.addon_job_timeout == 0 {
        c.addon_job_timeout = DEFAULT_ADDON_JOB_TIMEOUT;
    }
    if let Some(bastion) = c.bastion_host.as_mut() {
        if !bastion.address.is_empty() {
            set_if_empty(&mut bastion.port, DEFAULT_SSH_PORT);
            set_if_empty(&mut bastion.ssh_key_path, &c.ssh_key_path);
            bastion.ssh_agent_auth = c.ssh_agent_auth;
        }
    }
    node_defaults(&mut c);

    if c.authorization.mode.is_empty() {
        c.authorization.mode = AUTHORIZATION_MODE_RBAC.to_string();
    }
    if c.services.kube_api.pod_security_policy && !c.is_rbac() {
        warn!("[config] PodSecurityPolicy can't be enabled with RBAC support disabled");
        c.services.kube_api.pod_security_policy = false;
    }
    set_if_empty(&mut c.ingress.provider, DEFAULT_INGRESS_PROVIDER);
    set_if_empty(&mut c.monitoring.provider, DEFAULT_MONITORING_PROVIDER);

    image_defaults(&mut c, &catalog.system_images);
    dns_defaults(&mut c, &k8s);
    services_defaults(&mut c, &k8s)?;
    network_defaults(&mut c);
    authn_defaults(&mut c);
    upgrade_strategy_defaults(&mut c);
    addon_defaults(&mut c, &k8s);
    Ok(c)
}

fn node_defaults(c: &mut ClusterConfig) {
    let ssh_key_path = c.ssh_key_path.clone();
    let ssh_cert_path = c.ssh_cert_path.clone();
    let prefix_path = c.prefix_path.clone();
    let agent_auth = c.ssh_agent_auth;
    for node in c.nodes.iter_mut() {
        if node.internal_address.is_empty() {
            node.internal_address = node.address.clone();
        }
        if node.hostname_override.is_empty() {
            node.hostname_override = node.address.clone();
        }
        node.hostname_override = node.hostname_override.to_lowercase();
        set_if_empty(&mut node.ssh_key_path, &ssh_key_path);
        set_if_empty(&mut node.ssh_cert_path, &ssh_cert_path);
        set_if_empty(&mut node.port, DEFAULT_SSH_PORT);
        set_if_empty(&mut node.docker_socket, rke_model::constants::DEFAULT_DOCKER_SOCKET);
        set_if_empty(&mut node.prefix_path, &prefix_path);
        node.ssh_agent_auth = agent_auth;
    }
}

fn image_defaults(c: &mut ClusterConfig, defaults: &rke_model::config::SystemImages) {
    let registry = c.default_registry().map(|r| r.url.clone());
    for (field, default) in c.system_images.pairs_mut(defaults) {
        if field.is_empty() {
            *field = with_registry(default, registry.as_deref());
        }
    }
}

fn dns_defaults(c: &mut ClusterConfig, k8s: &Version) {
    let dns = c.dns.get_or_insert_with(DnsConfig::default);
    if dns.provider.is_empty() {
        dns.provider = if k8s < &Version::new(1, 14, 0) {
            KUBEDNS_PROVIDER
        } else {
            COREDNS_PROVIDER
        }
        .to_string();
        debug!("[config] DNS provider set to [{}]", dns.provider);
    }
}

fn services_defaults(c: &mut ClusterConfig, k8s: &Version) -> Result<()> {
    let kubernetes = c.system_images.kubernetes.clone();
    let etcd_image = c.system_images.etcd.clone();
    let pause = c.system_images.pod_infra_container.clone();
    let services = &mut c.services;

    set_if_empty(&mut services.kube_api.image, &kubernetes);
    set_if_empty(&mut services.scheduler.image, &kubernetes);
    set_if_empty(&mut services.kube_controller.image, &kubernetes);
    set_if_empty(&mut services.kubelet.image, &kubernetes);
    set_if_empty(&mut services.kubeproxy.image, &kubernetes);
    set_if_empty(&mut services.etcd.image, &etcd_image);

    if services.etcd.snapshot.is_none() {
        services.etcd.snapshot = Some(true);
    }

    set_if_empty(
        &mut services.kube_api.service_cluster_ip_range,
        DEFAULT_SERVICE_CLUSTER_IP_RANGE,
    );
    set_if_empty(
        &mut services.kube_api.service_node_port_range,
        DEFAULT_NODE_PORT_RANGE,
    );
    let service_range = services.kube_api.service_cluster_ip_range.clone();
    set_if_empty(
        &mut services.kube_controller.service_cluster_ip_range,
        &service_range,
    );
    set_if_empty(&mut services.kube_controller.cluster_cidr, DEFAULT_CLUSTER_CIDR);
    set_if_empty(
        &mut services.kubelet.cluster_dns_server,
        DEFAULT_CLUSTER_DNS_SERVICE,
    );
    set_if_empty(&mut services.kubelet.cluster_domain, DEFAULT_CLUSTER_DOMAIN);
    set_if_empty(&mut services.kubelet.infra_container_image, &pause);
    set_if_empty(&mut services.etcd.creation, DEFAULT_ETCD_BACKUP_CREATION);
    set_if_empty(&mut services.etcd.retention, DEFAULT_ETCD_BACKUP_RETENTION);

    for (name, value) in [ETCD_ELECTION_TIMEOUT, ETCD_HEARTBEAT_INTERVAL] {
        services
            .etcd
            .extra_args
            .entry(name.to_string())
            .or_insert_with(|| value.to_string());
    }

    if let Some(backup) = services.etcd.backup_config.as_mut() {
        if backup.enabled.unwrap_or(true) {
            if backup.interval_hours == 0 {
                backup.interval_hours = DEFAULT_ETCD_BACKUP_INTERVAL_HOURS;
            }
            if backup.retention == 0 {
                backup.retention = DEFAULT_ETCD_BACKUP_RETENTION_COUNT;
            }
            if backup.timeout == 0 {
                backup.timeout = DEFAULT_ETCD_BACKUP_TIMEOUT;
            }
        }
    }

    let kube_api = &mut services.kube_api;
    if !kube_api.extra_args.contains_key(ADMISSION_CONFIG_FILE_ARG) {
        if let Some(limit) = kube_api.event_rate_limit.as_mut() {
            if limit.enabled && limit.configuration.is_none() {
                limit.configuration = Some(default_event_rate_limit()?);
            }
        }
    }

    if needs_audit_log(k8s) && kube_api.audit_log.is_none() {
        debug!("[config] Enabling kube-api audit log for cluster version [{}]", k8s);
        kube_api.audit_log = Some(AuditLog {
            enabled: true,
            configuration: None,
        });
    }
    if let Some(audit) = kube_api.audit_log.as_mut() {
        if audit.enabled {
            match audit.configuration.as_mut() {
                None => {
                    audit.configuration = Some(AuditLogConfig {
                        max_age: 30,
                        max_backup: 10,
                        max_size: 100,
                        path: DEFAULT_AUDIT_LOG_PATH.to_string(),
                        format: "json".to_string(),
                        policy: Some(default_audit_policy()?),
                    })
                }
                Some(config) => {
                    if config.policy.is_none() {
                        config.policy = Some(default_audit_policy()?);
                    }
                }
            }
        }
    }
    Ok(())
}

fn network_defaults(c: &mut ClusterConfig) {
    let network = &mut c.network;
    let plugin = network.plugin();
    network.plugin = Some(plugin);

    let mut seeded = plugin.default_options();
    if let Some(calico) = network.calico_network_provider.as_mut() {
        set_if_empty(&mut calico.cloud_provider, "none");
        seeded.insert(CALICO_CLOUD_PROVIDER.to_string(), calico.cloud_provider.clone());
    }
    if let Some(flannel) = &network.flannel_network_provider {
        seeded.insert(FLANNEL_IFACE.to_string(), flannel.iface.clone());
    }
    if let Some(canal) = &network.canal_network_provider {
        seeded.insert(CANAL_IFACE.to_string(), canal.iface.clone());
    }
    if let Some(weave) = &network.weave_network_provider {
        seeded.insert(WEAVE_PASSWORD.to_string(), weave.password.clone());
    }
    if let Some(aci) = &network.aci_network_provider {
        for (key, value) in aci {
            if value.is_empty() {
                continue;
            }
            let key = if key.starts_with(ACI_PREFIX) {
                key.clone()
            } else {
                format!("{}{}", ACI_PREFIX, key)
            };
            seeded.insert(key, value.clone());
        }
    }
    for (key, value) in seeded {
        if value.is_empty() {
            continue;
        }
        network.options.entry(key).or_insert(value);
    }
}

fn authn_defaults(c: &mut ClusterConfig) {
    set_if_empty(&mut c.authentication.strategy, AUTHN_STRATEGY_X509);
    if c.authentication.has_strategy(AUTHN_STRATEGY_WEBHOOK) && c.authentication.webhook.is_none()
    {
        c.authentication.webhook = Some(AuthWebhookConfig::default());
    }
    if let Some(webhook) = c.authentication.webhook.as_mut() {
        set_if_empty(&mut webhook.config_file, DEFAULT_AUTHN_WEBHOOK_FILE);
        set_if_empty(&mut webhook.cache_timeout, DEFAULT_AUTHN_CACHE_TIMEOUT);
    }
}

fn upgrade_strategy_defaults(c: &mut ClusterConfig) {
    let strategy = c
        .upgrade_strategy
        .get_or_insert_with(NodeUpgradeStrategy::default);
    set_if_empty(
        &mut strategy.max_unavailable_worker,
        DEFAULT_MAX_UNAVAILABLE_WORKER,
    );
    set_if_empty(
        &mut strategy.max_unavailable_controlplane,
        DEFAULT_MAX_UNAVAILABLE_CONTROLPLANE,
    );
    let input = strategy
        .node_drain_input
        .get_or_insert_with(|| NodeDrainInput {
            ignore_daemonsets: Some(true),
            timeout: DEFAULT_DRAIN_TIMEOUT,
            grace_period: DEFAULT_DRAIN_GRACE_PERIOD,
            ..Default::default()
        });
    if input.ignore_daemonsets.is_none() {
        input.ignore_daemonsets = Some(true);
    }
    if input.timeout == 0 {
        input.timeout = DEFAULT_DRAIN_TIMEOUT;
    }
    if input.grace_period == 0 {
        input.grace_period = DEFAULT_DRAIN_GRACE_PERIOD;
    }
}

const ROLLING_UPDATE: &str = "RollingUpdate";

fn daemonset_strategy(current: Option<DaemonSetUpdateStrategy>) -> DaemonSetUpdateStrategy {
    match current {
        Some(strategy) if strategy.type_.as_deref() != Some(ROLLING_UPDATE) && strategy.type_.is_some() => {
            strategy
        }
        Some(strategy)
            if strategy
                .rolling_update
                .as_ref()
                .and_then(|r| r.max_unavailable.as_ref())
                .is_some() =>
        {
            strategy
        }
        _ => DaemonSetUpdateStrategy {
            type_: Some(ROLLING_UPDATE.to_string()),
            rolling_update: Some(RollingUpdateDaemonSet {
                max_unavailable: Some(IntOrString::Int(1)),
                ..Default::default()
            }),
        },
    }
}

fn deployment_strategy(
    current: Option<DeploymentStrategy>,
    max_unavailable: IntOrString,
    max_surge: IntOrString,
) -> DeploymentStrategy {
    match current {
        Some(strategy) if strategy.type_.is_some() && strategy.type_.as_deref() != Some(ROLLING_UPDATE) => {
            strategy
        }
        Some(DeploymentStrategy {
            type_,
            rolling_update: Some(mut rolling),
        }) => {
            if rolling.max_unavailable.is_none() {
                rolling.max_unavailable = Some(max_unavailable);
            }
            if rolling.max_surge.is_none() {
                rolling.max_surge = Some(max_surge);
            }
            DeploymentStrategy {
                type_: type_.or_else(|| Some(ROLLING_UPDATE.to_string())),
                rolling_update: Some(rolling),
            }
        }
        _ => DeploymentStrategy {
            type_: Some(ROLLING_UPDATE.to_string()),
            rolling_update: Some(RollingUpdateDeployment {
                max_unavailable: Some(max_unavailable),
                max_surge: Some(max_surge),
            }),
        },
    }
}

fn addon_defaults(c: &mut ClusterConfig, k8s: &Version) {
    c.ingress.update_strategy = Some(daemonset_strategy(c.ingress.update_strategy.take()));
    c.network.update_strategy = Some(daemonset_strategy(c.network.update_strategy.take()));

    if let Some(dns) = c.dns.as_mut() {
        let (unavailable, surge) = if dns.provider == KUBEDNS_PROVIDER {
            (IntOrString::Int(0), IntOrString::String("10%".to_string()))
        } else {
            (IntOrString::Int(1), IntOrString::Int(0))
        };
        dns.update_strategy = Some(deployment_strategy(
            dns.update_strategy.take(),
            unavailable,
            surge,
        ));
        if dns.linear_autoscaler_params.is_none() {
            dns.linear_autoscaler_params = Some(LinearAutoscalerParams {
                cores_per_replica: 128.0,
                nodes_per_replica: 4.0,
                min: 1,
                max: 0,
                prevent_single_point_failure: Some(true),
            });
        }
    }

    let quarter = IntOrString::String("25%".to_string());
    c.monitoring.update_strategy = Some(deployment_strategy(
        c.monitoring.update_strategy.take(),
        quarter.clone(),
        quarter,
    ));
    if c.monitoring.replicas.is_none() {
        c.monitoring.replicas = Some(1);
    }

    set_if_empty(&mut c.ingress.network_mode, DEFAULT_INGRESS_NETWORK_MODE);
    if c.ingress.http_port == 0 {
        c.ingress.http_port = DEFAULT_HTTP_PORT;
    }
    if c.ingress.https_port == 0 {
        c.ingress.https_port = DEFAULT_HTTPS_PORT;
    }
    if c.ingress.default_backend.is_none() {
        c.ingress.default_backend = Some(k8s < &Version::new(1, 21, 0));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rke_model::config::{NetworkPlugin, PrivateRegistry};
    use rke_model::{Node, Role};

    fn single_node() -> ClusterConfig {
        ClusterConfig {
            nodes: vec![Node {
                address: "10.0.0.1".to_string(),
                role: vec![Role::Etcd, Role::Controlplane, Role::Worker],
                ..Default::default()
            }],
            version: "v1.24.7-rancher1-1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn single_node_defaults() {
        let c = apply(&single_node()).unwrap();
        assert_eq!(c.network.plugin(), NetworkPlugin::Canal);
        assert_eq!(c.dns.as_ref().unwrap().provider, COREDNS_PROVIDER);
        assert_eq!(c.services.kube_api.service_cluster_ip_range, "10.43.0.0/16");
        assert_eq!(c.services.kube_controller.cluster_cidr, "10.42.0.0/16");
        assert_eq!(c.services.kubelet.cluster_dns_server, "10.43.0.10");
        assert_eq!(c.nodes[0].internal_address, "10.0.0.1");
        assert_eq!(c.nodes[0].hostname_override, "10.0.0.1");
        assert_eq!(c.nodes[0].port, "22");
        assert_eq!(c.authorization.mode, "rbac");
        assert_eq!(c.addon_job_timeout, 45);
        assert_eq!(c.services.etcd.snapshot, Some(true));
        assert_eq!(c.services.etcd.extra_args["election-timeout"], "5000");
        assert_eq!(c.services.etcd.extra_args["heartbeat-interval"], "500");
        assert_eq!(c.network.options["canal_flannel_backend_type"], "vxlan");
        assert_eq!(c.ingress.default_backend, Some(false));
        let strategy = c.upgrade_strategy.as_ref().unwrap();
        assert_eq!(strategy.max_unavailable_worker, "10%");
        assert_eq!(strategy.max_unavailable_controlplane, "1");
        let drain = strategy.node_drain_input.as_ref().unwrap();
        assert_eq!(drain.timeout, 120);
        assert_eq!(drain.grace_period, -1);
        assert_eq!(drain.ignore_daemonsets, Some(true));
        assert!(c.services.kube_api.audit_enabled());
    }

    #[test]
    fn defaults_are_idempotent() {
        let mut input = single_node();
        input.private_registries = vec![PrivateRegistry {
            url: "registry.local".to_string(),
            is_default: true,
            ..Default::default()
        }];
        input.nodes[0].hostname_override = "Node-One".to_string();
        let once = apply(&input).unwrap();
        let twice = apply(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.nodes[0].hostname_override, "node-one");
        assert!(once.system_images.etcd.starts_with("registry.local/rancher/"));
    }

    #[test]
    fn user_values_win() {
        let mut input = single_node();
        input.services.kube_api.service_cluster_ip_range = "10.96.0.0/12".to_string();
        input.system_images.etcd = "custom/etcd:v3.5.9".to_string();
        input.network.options.insert(
            "canal_flannel_backend_type".to_string(),
            "host-gw".to_string(),
        );
        let c = apply(&input).unwrap();
        assert_eq!(c.services.kube_api.service_cluster_ip_range, "10.96.0.0/12");
        assert_eq!(c.services.kube_controller.service_cluster_ip_range, "10.96.0.0/12");
        assert_eq!(c.services.etcd.image, "custom/etcd:v3.5.9");
        assert_eq!(c.network.options["canal_flannel_backend_type"], "host-gw");
    }

    #[test]
    fn psp_forced_off_without_rbac() {
        let mut input = single_node();
        input.authorization.mode = "none".to_string();
        input.services.kube_api.pod_security_policy = true;
        let c = apply(&input).unwrap();
        assert!(!c.services.kube_api.pod_security_policy);
    }

    #[test]
    fn old_versions_use_kube_dns_and_default_backend() {
        let mut input = single_node();
        input.version = "v1.13.12-rancher1-2".to_string();
        let c = apply(&input).unwrap();
        assert_eq!(c.dns.as_ref().unwrap().provider, KUBEDNS_PROVIDER);
        assert_eq!(c.ingress.default_backend, Some(true));
        assert!(!c.services.kube_api.audit_enabled());
    }

    #[test]
    fn audit_ranges() {
        assert!(needs_audit_log(&Version::new(1, 15, 11)));
        assert!(!needs_audit_log(&Version::new(1, 15, 10)));
        assert!(!needs_audit_log(&Version::new(1, 16, 7)));
        assert!(needs_audit_log(&Version::new(1, 16, 8)));
        assert!(!needs_audit_log(&Version::new(1, 17, 3)));
        assert!(needs_audit_log(&Version::new(1, 24, 7)));
    }

    #[test]
    fn backup_defaults_when_enabled() {
        let mut input = single_node();
        input.services.etcd.backup_config = Some(rke_model::config::BackupConfig {
            enabled: Some(true),
            ..Default::default()
        });
        let c = apply(&input).unwrap();
        let backup = c.services.etcd.backup_config.unwrap();
        assert_eq!(backup.interval_hours, 12);
        assert_eq!(backup.retention, 6);
    }

    #[test]
    fn unsupported_version_fails() {
        let mut input = single_node();
        input.version = "v1.99.1-rancher1-1".to_string();
        assert!(apply(&input).is_err());
    }
}
