/*!

The planner. Given the defaulted cluster config and the version catalog it derives, for each host,
the containers it must run, the files they read and the ports its peers must reach. Planning is
pure: the same inputs always produce the same plan, down to the order of every command line.

!*/

mod args;
mod controlplane;
mod etcd;
mod files;
mod worker;

pub use etcd::initial_cluster;

use crate::catalog::{self, Catalog, OptionMap, ServiceOptions};
use crate::cloud_config;
use crate::error::{self, Component, Result};
use crate::hosts::unique_nodes;
use args::{join_prefix, Args};
use rke_model::config::{ClusterConfig, ServiceOverrides};
use rke_model::constants::*;
use rke_model::{Node, NodePlan, PortCheck, Process, Taint, TaintEffect};
use serde::Serialize;
use snafu::ResultExt;
use std::collections::{BTreeMap, BTreeSet};

const LINUX_ENTRYPOINT: &str = "/opt/rke-tools/entrypoint.sh";
const WINDOWS_ENTRYPOINT: &[&str] = &[
    "pwsh",
    "-NoLogo",
    "-NonInteractive",
    "-File",
    "c:/usr/bin/entrypoint.ps1",
];
const DEFAULT_WINDOWS_PREFIX: &str = "c:/";
const DEFAULT_REGISTRY: &str = "docker.io";

/// Inputs shared by every host's plan. The rendered side files are computed once here so that the
/// checksum env entries and the emitted files always agree.
#[derive(Debug, Clone)]
pub struct PlanContext<'a> {
    config: &'a ClusterConfig,
    catalog: &'static Catalog,
    cloud_config: String,
    encryption_config: String,
    audit_policy: String,
    admission_config: String,
    /// Addresses of the members of an etcd cluster that is already running.
    etcd_members: BTreeSet<String>,
    /// Container engine data roots by host address.
    docker_root_dirs: BTreeMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdmissionConfiguration {
    api_version: &'static str,
    kind: &'static str,
    plugins: Vec<AdmissionPlugin>,
}

#[derive(Serialize)]
struct AdmissionPlugin {
    name: &'static str,
    configuration: serde_yaml::Value,
}

fn yaml_text(value: &impl Serialize, what: &'static str) -> Result<String> {
    serde_yaml::to_string(value).context(error::YamlSnafu {
        component: Component::Controlplane,
        what,
    })
}

impl<'a> PlanContext<'a> {
    /// `config` must already be defaulted. `encryption_config` is the provider file text, empty
    /// when encryption at rest is off.
    pub fn new(config: &'a ClusterConfig, encryption_config: &str) -> Result<Self> {
        let catalog = catalog::resolve_major(&config.version)?;
        let kube_api = &config.services.kube_api;

        let audit_policy = match kube_api
            .audit_log
            .as_ref()
            .filter(|a| a.enabled)
            .and_then(|a| a.configuration.as_ref())
            .and_then(|c| c.policy.as_ref())
        {
            Some(policy) => yaml_text(policy, "audit policy")?,
            None => String::new(),
        };

        let admission_config = match &kube_api.admission_configuration {
            Some(custom) => yaml_text(custom, "admission configuration")?,
            None => match kube_api
                .event_rate_limit
                .as_ref()
                .filter(|e| e.enabled)
                .and_then(|e| e.configuration.clone())
            {
                Some(configuration) => yaml_text(
                    &AdmissionConfiguration {
                        api_version: "apiserver.config.k8s.io/v1",
                        kind: "AdmissionConfiguration",
                        plugins: vec![AdmissionPlugin {
                            name: "EventRateLimit",
                            configuration,
                        }],
                    },
                    "admission configuration",
                )?,
                None => String::new(),
            },
        };

        Ok(Self {
            config,
            catalog,
            cloud_config: cloud_config::generate(&config.cloud_provider)?,
            encryption_config: encryption_config.to_string(),
            audit_policy,
            admission_config,
            etcd_members: BTreeSet::new(),
            docker_root_dirs: BTreeMap::new(),
        })
    }

    /// Sets each host's container engine data root. Hosts missing from `dirs` use the default.
    pub fn with_docker_root_dirs(mut self, dirs: BTreeMap<String, String>) -> Self {
        self.docker_root_dirs = dirs;
        self
    }

    fn docker_root_dir(&self, node: &Node) -> &str {
        self.docker_root_dirs
            .get(&node.address)
            .map(String::as_str)
            .unwrap_or(DEFAULT_DOCKER_ROOT_DIR)
    }

    /// Marks the etcd cluster as running with the given member addresses. Etcd hosts that are not
    /// among them are planned to join it.
    pub fn with_etcd_members<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.etcd_members = members.into_iter().map(Into::into).collect();
        self
    }

    pub fn config(&self) -> &ClusterConfig {
        self.config
    }

    pub fn cloud_config(&self) -> &str {
        &self.cloud_config
    }

    /// Plans for every distinct host in the config, keyed by address.
    pub fn build_cluster_plan(&self) -> Result<BTreeMap<String, NodePlan>> {
        unique_nodes(&self.config.nodes)
            .iter()
            .map(|node| Ok((node.address.clone(), self.build_plan(node)?)))
            .collect()
    }

    pub fn build_plan(&self, node: &Node) -> Result<NodePlan> {
        let mut processes = BTreeMap::new();
        let mut add = |process: Process| {
            processes.insert(process.name.clone(), process);
        };

        add(self.sidekick(node)?);
        add(self.kubelet(node)?);
        add(self.kube_proxy(node));
        if node.is_control() {
            add(self.kube_apiserver(node)?);
            add(self.kube_controller(node));
            add(self.scheduler(node));
        } else {
            add(self.nginx_proxy(node));
        }
        if node.is_etcd() && !self.config.services.etcd.is_external() {
            add(self.etcd(node)?);
        }

        Ok(NodePlan {
            address: node.address.clone(),
            processes,
            port_checks: port_checks(node),
            files: self.files(node),
            annotations: BTreeMap::from([
                (EXTERNAL_ADDRESS_ANNOTATION.to_string(), node.address.clone()),
                (INTERNAL_ADDRESS_ANNOTATION.to_string(), node.internal().to_string()),
            ]),
            labels: labels(node),
            taints: taints(node),
        })
    }

    fn options(&self, node: &Node) -> &ServiceOptions {
        if node.is_windows() {
            &self.catalog.windows_options
        } else {
            &self.catalog.linux_options
        }
    }

    /// The host directory everything the cluster writes lives under.
    fn prefix(&self, node: &Node) -> String {
        node_prefix(self.config, node)
    }

    fn host_path(&self, node: &Node, path: &str) -> String {
        join_prefix(&self.prefix(node), path)
    }

    /// A path as the component sees it. Linux components get the host prefix through a bind, the
    /// Windows ones read the host path directly.
    fn component_path(&self, node: &Node, path: &str) -> String {
        if node.is_windows() {
            self.host_path(node, path)
        } else {
            path.to_string()
        }
    }

    fn entrypoint(&self, node: &Node, binary: &str) -> Vec<String> {
        let base: Vec<&str> = if node.is_windows() {
            WINDOWS_ENTRYPOINT.to_vec()
        } else {
            vec![LINUX_ENTRYPOINT]
        };
        base.into_iter()
            .chain(std::iter::once(binary))
            .map(String::from)
            .collect()
    }

    /// `--cloud-provider` and `--cloud-config` plus the checksum env entry, when configured.
    fn cloud_provider_args(&self, node: &Node, args: &mut Args, env: &mut Vec<String>) {
        let provider = &self.config.cloud_provider;
        if !provider.is_configured() {
            return;
        }
        args.set("cloud-provider", provider.name.as_str());
        if !self.cloud_config.is_empty() {
            args.set("cloud-config", self.component_path(node, CLOUD_CONFIG_PATH));
            env.push(format!(
                "{}={}",
                ENV_CLOUD_CONFIG_CHECKSUM,
                cloud_config::checksum(&self.cloud_config)
            ));
        }
    }

    /// Finishes a kubernetes component: user extras are applied last, binds are de-duplicated and
    /// the process shares the sidekick's volumes.
    #[allow(clippy::too_many_arguments)]
    fn component(
        &self,
        node: &Node,
        name: &str,
        binary: &str,
        service: &dyn ServiceOverrides,
        mut args: Args,
        mut binds: Vec<String>,
        mut env: Vec<String>,
    ) -> Process {
        if node.is_windows() {
            args.merge_extra(service.win_extra_args());
            binds.extend(service.win_extra_binds().iter().cloned());
            env.extend(service.win_extra_env().iter().cloned());
        } else {
            args.merge_extra(service.extra_args());
            binds.extend(service.extra_binds().iter().cloned());
            env.extend(service.extra_env().iter().cloned());
        }
        let image = service.image().to_string();
        Process {
            name: name.to_string(),
            command: self.entrypoint(node, binary),
            args: args.render(),
            env,
            image_registry_auth_config: registry_auth(self.config, &image),
            image,
            volumes_from: vec![SIDEKICK_CONTAINER.to_string()],
            binds: dedup(binds),
            network_mode: "host".to_string(),
            restart_policy: "always".to_string(),
            ..Default::default()
        }
    }

    fn merged(&self, args: &mut Args, node: &Node, options: &OptionMap) {
        args.merge_catalog(options, &self.prefix(node));
    }
}

/// The directory every host path of `node` is placed under.
fn node_prefix(config: &ClusterConfig, node: &Node) -> String {
    if node.is_windows() {
        if config.win_prefix_path.is_empty() {
            DEFAULT_WINDOWS_PREFIX.to_string()
        } else {
            config.win_prefix_path.clone()
        }
    } else if node.prefix_path.is_empty() {
        config.prefix_path.clone()
    } else {
        node.prefix_path.clone()
    }
}

/// Where `path` lives on the node's filesystem once its prefix path is applied.
pub fn host_path(config: &ClusterConfig, node: &Node, path: &str) -> String {
    join_prefix(&node_prefix(config, node), path)
}

/// The registry part of an image reference, `docker.io` when it names none.
fn image_registry(image: &str) -> &str {
    match image.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            first
        }
        _ => DEFAULT_REGISTRY,
    }
}

/// The pull credentials for `image`, when one of the configured registries serves it.
pub fn registry_auth(config: &ClusterConfig, image: &str) -> Option<String> {
    let registry = image_registry(image);
    config
        .private_registries
        .iter()
        .find(|r| r.url == registry)
        .and_then(|r| r.auth_config())
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Ports this host must expose to its peers.
pub fn port_checks(node: &Node) -> Vec<PortCheck> {
    let address = node.internal();
    let mut ports = vec![KUBELET_PORT];
    if node.is_control() {
        ports.extend([KUBE_APISERVER_PORT, CONTROLLER_SECURE_PORT, SCHEDULER_SECURE_PORT]);
    }
    if node.is_etcd() {
        ports.extend([ETCD_CLIENT_PORT, ETCD_PEER_PORT]);
    }
    ports
        .into_iter()
        .map(|port| PortCheck::tcp(address, port))
        .collect()
}

fn labels(node: &Node) -> BTreeMap<String, String> {
    let mut labels = node.labels.clone();
    for (enabled, label) in [
        (node.is_control(), CONTROLPLANE_ROLE_LABEL),
        (node.is_etcd(), ETCD_ROLE_LABEL),
        (node.is_worker(), WORKER_ROLE_LABEL),
    ] {
        if enabled {
            labels.insert(label.to_string(), "true".to_string());
        }
    }
    labels
}

/// The user's taints plus the role taints that keep workloads off non-worker hosts.
fn taints(node: &Node) -> Vec<Taint> {
    let mut taints = node.taints.clone();
    if !node.is_worker() {
        if node.is_control() {
            taints.push(Taint {
                key: CONTROLPLANE_TAINT_KEY.to_string(),
                value: "true".to_string(),
                effect: TaintEffect::NoSchedule,
            });
        } else if node.is_etcd() {
            taints.push(Taint {
                key: ETCD_TAINT_KEY.to_string(),
                value: "true".to_string(),
                effect: TaintEffect::NoExecute,
            });
        }
    }
    taints
}
