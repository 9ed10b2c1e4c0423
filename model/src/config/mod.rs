//! The declarative cluster description. Field names match the `cluster.yml` schema and unknown
//! fields are rejected.

mod addons;
mod network;
mod services;

pub use addons::{
    DeploymentStrategy, DnsConfig, IngressConfig, LinearAutoscalerParams, MonitoringConfig,
    NodeLocalDns,
};
pub use network::{NetworkConfig, NetworkPlugin};
pub use services::{
    AuditLog, AuditLogConfig, BackupConfig, EtcdService, EventRateLimit, KubeApiService,
    KubeControllerService, KubeletService, KubeproxyService, S3BackupConfig, SchedulerService,
    SecretsEncryptionConfig, ServiceOverrides, Services,
};

use crate::error::{self, Result};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// The root of a cluster description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub services: Services,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub authentication: AuthnConfig,
    #[serde(default)]
    pub authorization: AuthzConfig,
    /// Compiled addon manifests, applied verbatim after the rollout.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub addons: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addons_include: Vec<String>,
    #[serde(default)]
    pub system_images: SystemImages,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_key_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_cert_path: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ssh_agent_auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_docker_version: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_cri_dockerd: Option<bool>,
    #[serde(
        default,
        rename = "kubernetes_version",
        skip_serializing_if = "String::is_empty"
    )]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_registries: Vec<PrivateRegistry>,
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
    #[serde(default)]
    pub cloud_provider: CloudProvider,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub win_prefix_path: String,
    /// Seconds to wait for an addon job or a health check to complete.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub addon_job_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bastion_host: Option<BastionHost>,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotate_certificates: Option<RotateCertificates>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rotate_encryption_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_strategy: Option<NodeUpgradeStrategy>,
}

pub(crate) fn is_zero<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

impl ClusterConfig {
    /// Parse a cluster description from YAML or JSON text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text).context(error::ParseConfigSnafu)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self).context(error::SerializeConfigSnafu)?)
    }

    /// Nodes carrying `role`, in config order.
    pub fn nodes_with_role(&self, role: Role) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |node| node.has_role(role))
    }

    /// Whether the kubelet should be configured to talk to cri-dockerd.
    pub fn cri_dockerd_enabled(&self) -> bool {
        self.enable_cri_dockerd.unwrap_or(false)
    }

    /// The registry flagged as default, if any.
    pub fn default_registry(&self) -> Option<&PrivateRegistry> {
        self.private_registries.iter().find(|r| r.is_default)
    }

    pub fn is_rbac(&self) -> bool {
        self.authorization.mode == AUTHORIZATION_MODE_RBAC
    }
}

pub const AUTHORIZATION_MODE_RBAC: &str = "rbac";
pub const AUTHORIZATION_MODE_NONE: &str = "none";
pub const AUTHN_STRATEGY_X509: &str = "x509";
pub const AUTHN_STRATEGY_WEBHOOK: &str = "webhook";

/// The roles a node may hold. Roles are not exclusive.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Etcd,
    Controlplane,
    Worker,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Etcd => write!(f, "etcd"),
            Role::Controlplane => write!(f, "controlplane"),
            Role::Worker => write!(f, "worker"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    #[default]
    Linux,
    Windows,
}

/// A host in the cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Node {
    pub address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub port: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub internal_address: String,
    #[serde(default)]
    pub role: Vec<Role>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname_override: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docker_socket: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ssh_agent_auth: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_key_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_cert: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_cert_path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix_path: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub os_type: OsType,
}

impl Node {
    pub fn has_role(&self, role: Role) -> bool {
        self.role.contains(&role)
    }

    pub fn is_etcd(&self) -> bool {
        self.has_role(Role::Etcd)
    }

    pub fn is_control(&self) -> bool {
        self.has_role(Role::Controlplane)
    }

    pub fn is_worker(&self) -> bool {
        self.has_role(Role::Worker)
    }

    pub fn is_windows(&self) -> bool {
        self.os_type == OsType::Windows
    }

    /// The address other nodes use to reach this one. Falls back to `address` when unset.
    pub fn internal(&self) -> &str {
        if self.internal_address.is_empty() {
            &self.address
        } else {
            &self.internal_address
        }
    }

    /// The node name kubernetes knows this host by.
    pub fn hostname(&self) -> &str {
        if self.hostname_override.is_empty() {
            &self.address
        } else {
            &self.hostname_override
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

impl Display for TaintEffect {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TaintEffect::NoSchedule => write!(f, "NoSchedule"),
            TaintEffect::PreferNoSchedule => write!(f, "PreferNoSchedule"),
            TaintEffect::NoExecute => write!(f, "NoExecute"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    pub effect: TaintEffect,
}

impl Display for Taint {
    /// Renders in the `key=value:Effect` form the kubelet accepts for `--register-with-taints`.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}:{}", self.key, self.value, self.effect)
    }
}

/// A jump host used to reach the nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BastionHost {
    pub address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub port: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ssh_agent_auth: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_key_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_cert: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_cert_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrivateRegistry {
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_default: bool,
}

impl PrivateRegistry {
    /// The base64 JSON `auth` document the container engine accepts for a pull, or `None` for
    /// anonymous registries.
    pub fn auth_config(&self) -> Option<String> {
        if self.user.is_empty() {
            return None;
        }
        let auth = base64::encode(format!("{}:{}", self.user, self.password));
        let doc = serde_json::json!({
            "username": self.user,
            "password": self.password,
            "auth": auth,
            "serveraddress": self.url,
        });
        Some(base64::encode(doc.to_string()))
    }
}

/// Every image the planner may emit. Empty fields are filled from the version catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemImages {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etcd: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alpine: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nginx_proxy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cert_downloader: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubernetes_services_sidecar: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubedns: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dnsmasq: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubedns_sidecar: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubedns_autoscaler: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub coredns: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub coredns_autoscaler: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nodelocal: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubernetes: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub flannel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub flannel_cni: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub calico_node: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub calico_cni: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub calico_controllers: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub calico_ctl: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub calico_flexvol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub canal_node: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub canal_cni: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub canal_controllers: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub canal_flannel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub canal_flexvol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub weave_node: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub weave_cni: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pod_infra_container: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ingress: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ingress_backend: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ingress_webhook: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metrics_server: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub windows_pod_infra_container: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aci_cni_deploy_container: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aci_host_container: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aci_opflex_container: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aci_mcast_container: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aci_ovs_container: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aci_controller_container: String,
}

impl SystemImages {
    /// Mutable references to every image field paired with the matching field of `other`, used
    /// to fill unset images from a catalog entry.
    pub fn pairs_mut<'a>(&'a mut self, other: &'a SystemImages) -> Vec<(&'a mut String, &'a str)> {
        vec![
            (&mut self.etcd, other.etcd.as_str()),
            (&mut self.alpine, other.alpine.as_str()),
            (&mut self.nginx_proxy, other.nginx_proxy.as_str()),
            (&mut self.cert_downloader, other.cert_downloader.as_str()),
            (
                &mut self.kubernetes_services_sidecar,
                other.kubernetes_services_sidecar.as_str(),
            ),
            (&mut self.kubedns, other.kubedns.as_str()),
            (&mut self.dnsmasq, other.dnsmasq.as_str()),
            (&mut self.kubedns_sidecar, other.kubedns_sidecar.as_str()),
            (&mut self.kubedns_autoscaler, other.kubedns_autoscaler.as_str()),
            (&mut self.coredns, other.coredns.as_str()),
            (&mut self.coredns_autoscaler, other.coredns_autoscaler.as_str()),
            (&mut self.nodelocal, other.nodelocal.as_str()),
            (&mut self.kubernetes, other.kubernetes.as_str()),
            (&mut self.flannel, other.flannel.as_str()),
            (&mut self.flannel_cni, other.flannel_cni.as_str()),
            (&mut self.calico_node, other.calico_node.as_str()),
            (&mut self.calico_cni, other.calico_cni.as_str()),
            (&mut self.calico_controllers, other.calico_controllers.as_str()),
            (&mut self.calico_ctl, other.calico_ctl.as_str()),
            (&mut self.calico_flexvol, other.calico_flexvol.as_str()),
            (&mut self.canal_node, other.canal_node.as_str()),
            (&mut self.canal_cni, other.canal_cni.as_str()),
            (&mut self.canal_controllers, other.canal_controllers.as_str()),
            (&mut self.canal_flannel, other.canal_flannel.as_str()),
            (&mut self.canal_flexvol, other.canal_flexvol.as_str()),
            (&mut self.weave_node, other.weave_node.as_str()),
            (&mut self.weave_cni, other.weave_cni.as_str()),
            (&mut self.pod_infra_container, other.pod_infra_container.as_str()),
            (&mut self.ingress, other.ingress.as_str()),
            (&mut self.ingress_backend, other.ingress_backend.as_str()),
            (&mut self.ingress_webhook, other.ingress_webhook.as_str()),
            (&mut self.metrics_server, other.metrics_server.as_str()),
            (
                &mut self.windows_pod_infra_container,
                other.windows_pod_infra_container.as_str(),
            ),
            (
                &mut self.aci_cni_deploy_container,
                other.aci_cni_deploy_container.as_str(),
            ),
            (&mut self.aci_host_container, other.aci_host_container.as_str()),
            (&mut self.aci_opflex_container, other.aci_opflex_container.as_str()),
            (&mut self.aci_mcast_container, other.aci_mcast_container.as_str()),
            (&mut self.aci_ovs_container, other.aci_ovs_container.as_str()),
            (
                &mut self.aci_controller_container,
                other.aci_controller_container.as_str(),
            ),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthWebhookConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config_file: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cache_timeout: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthnConfig {
    /// One or more strategies joined with `|`, e.g. `x509|webhook`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sans: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<AuthWebhookConfig>,
}

impl AuthnConfig {
    pub fn strategies(&self) -> impl Iterator<Item = &str> {
        self.strategy
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn has_strategy(&self, strategy: &str) -> bool {
        self.strategies().any(|s| s.eq_ignore_ascii_case(strategy))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthzConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

/// Cloud provider integration. `cloud_config` is a flat key/value set; `sections` holds named INI
/// sections for providers that need more than `[Global]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudProvider {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cloud_config: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sections: BTreeMap<String, BTreeMap<String, String>>,
    /// Raw cloud config used verbatim when set.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_cloud_provider: String,
}

impl CloudProvider {
    pub fn is_configured(&self) -> bool {
        !self.name.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestoreConfig {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub restore: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snapshot_name: String,
}

/// Names of the services whose leaf certificates may be rotated individually.
pub const ROTATABLE_SERVICES: &[&str] = &[
    "etcd",
    "kubelet",
    "kube-apiserver",
    "kube-proxy",
    "kube-scheduler",
    "kube-controller-manager",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RotateCertificates {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ca_certificates: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeUpgradeStrategy {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_unavailable_worker: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_unavailable_controlplane: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_drain_input: Option<NodeDrainInput>,
}

impl NodeUpgradeStrategy {
    pub fn drain_enabled(&self) -> bool {
        self.drain.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDrainInput {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_daemonsets: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub delete_local_data: bool,
    /// Seconds; `-1` uses each pod's own termination grace period.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub grace_period: i64,
    /// Seconds before a drain is abandoned.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timeout: u64,
}
