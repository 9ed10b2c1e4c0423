//! Tearing down hosts, or single roles of hosts, that left the config.

use super::{etcd, Rollout};
use crate::error::{Component, Result};
use crate::hosts::{remove_container, run_once, Host};
use crate::plan::{host_path, registry_auth};
use log::{info, warn};
use rke_model::config::ClusterConfig;
use rke_model::constants::*;
use rke_model::{Node, NodePlan, Process, Role};
use std::time::Duration;

/// Directories a cleaned host is emptied of.
const CLEANED_DIRS: &[&str] = &[
    KUBERNETES_DIR,
    ETCD_HOST_DATA_DIR,
    "/opt/cni",
    "/etc/cni",
    "/var/run/calico",
    "/var/lib/kubelet",
];

/// A node that lost roles, or all of them. `host` is `None` when the node could not be dialed;
/// its cluster membership is still cleaned up.
#[derive(Debug, Clone)]
pub struct Departure {
    pub node: Node,
    pub host: Option<Host>,
    pub roles: Vec<Role>,
    /// The node is gone from the config entirely.
    pub whole: bool,
}

/// The containers a role runs on a host.
pub fn role_containers(role: Role) -> &'static [&'static str] {
    match role {
        Role::Etcd => &[ETCD_CONTAINER],
        Role::Controlplane => &[
            KUBE_APISERVER_CONTAINER,
            KUBE_CONTROLLER_CONTAINER,
            SCHEDULER_CONTAINER,
        ],
        Role::Worker => &[
            KUBELET_CONTAINER,
            KUBEPROXY_CONTAINER,
            NGINX_PROXY_CONTAINER,
            SIDEKICK_CONTAINER,
        ],
    }
}

pub async fn remove_role_containers(host: &Host, role: Role) -> Result<()> {
    let component = Component::from(role);
    for name in role_containers(role) {
        if remove_container(host, name, component).await? {
            info!(
                "{} Removed '{}' from host '{}'",
                component,
                name,
                host.address()
            );
        }
    }
    Ok(())
}

/// The containers of a lost role that the host's current plan no longer runs. Every host keeps
/// its worker components, so a kept host only loses what its plan dropped.
fn unplanned_containers(role: Role, plan: Option<&NodePlan>) -> Vec<&'static str> {
    role_containers(role)
        .iter()
        .copied()
        .filter(|name| plan.map_or(true, |plan| plan.process(name).is_none()))
        .collect()
}

fn cleaner(config: &ClusterConfig, node: &Node) -> Process {
    let dirs: Vec<String> = CLEANED_DIRS
        .iter()
        .map(|dir| host_path(config, node, dir))
        .collect();
    let script = dirs
        .iter()
        .map(|dir| format!("rm -rf {}/*", dir))
        .collect::<Vec<_>>()
        .join(" && ");
    let image = config.system_images.alpine.clone();
    Process {
        name: CLEANER_CONTAINER.to_string(),
        command: vec!["sh".to_string(), "-c".to_string(), script],
        binds: dirs.iter().map(|dir| format!("{0}:{0}:z", dir)).collect(),
        image_registry_auth_config: registry_auth(config, &image),
        image,
        privileged: true,
        restart_policy: "no".to_string(),
        ..Default::default()
    }
}

/// Removes every component container from the host and empties the directories they used.
pub async fn clean_host(host: &Host, config: &ClusterConfig, wait_timeout: Duration) -> Result<()> {
    info!("[worker] Cleaning host '{}'", host.address());
    for role in [Role::Worker, Role::Controlplane, Role::Etcd] {
        remove_role_containers(host, role).await?;
    }
    if host.node.is_windows() {
        return Ok(());
    }
    run_once(host, &cleaner(config, &host.node), wait_timeout, Component::Worker).await?;
    Ok(())
}

pub(super) async fn remove_departure(rollout: &Rollout, departure: &Departure) -> Result<()> {
    let node = &departure.node;
    if departure.roles.contains(&Role::Etcd) {
        let remaining = rollout
            .hosts
            .values()
            .filter(|h| h.node.is_etcd() && h.address() != node.address);
        match etcd::running_member(remaining).await? {
            Some(member) => etcd::remove_member(member, node).await?,
            None => warn!(
                "[etcd] No running etcd member left to remove '{}' through",
                node.address
            ),
        }
    }

    match &departure.host {
        Some(host) if departure.whole => {
            clean_host(host, &rollout.config, rollout.wait_timeout).await?
        }
        Some(host) => {
            let plan = rollout.plans.get(host.address());
            for role in &departure.roles {
                let component = Component::from(*role);
                for name in unplanned_containers(*role, plan) {
                    if remove_container(host, name, component).await? {
                        info!(
                            "{} Removed '{}' from host '{}'",
                            component,
                            name,
                            host.address()
                        );
                    }
                }
            }
        }
        None => warn!(
            "[worker] Host '{}' is unreachable, its containers are left in place",
            node.address
        ),
    }

    if departure.whole {
        if let Some(api) = &rollout.cluster {
            info!("[worker] Deleting node '{}'", node.hostname());
            api.delete_node(node.hostname()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cleaner_follows_the_prefix() {
        let config = ClusterConfig::default();
        let node = Node {
            address: "10.0.0.1".to_string(),
            prefix_path: "/opt/rke".to_string(),
            ..Default::default()
        };
        let process = cleaner(&config, &node);
        assert!(process
            .binds
            .contains(&"/opt/rke/etc/kubernetes:/opt/rke/etc/kubernetes:z".to_string()));
        assert!(process.command[2].starts_with("rm -rf /opt/rke/etc/kubernetes/* && "));
        assert!(process.command[2].ends_with("rm -rf /opt/rke/var/lib/kubelet/*"));
    }

    #[test]
    fn workers_lose_their_proxy_too() {
        assert!(role_containers(Role::Worker).contains(&NGINX_PROXY_CONTAINER));
        assert_eq!(role_containers(Role::Controlplane).len(), 3);
    }

    #[test]
    fn demoted_worker_keeps_its_planned_containers() {
        let mut plan = NodePlan {
            address: "10.0.0.1".to_string(),
            ..Default::default()
        };
        for name in [KUBELET_CONTAINER, KUBEPROXY_CONTAINER, SIDEKICK_CONTAINER] {
            plan.processes.insert(
                name.to_string(),
                Process {
                    name: name.to_string(),
                    ..Default::default()
                },
            );
        }
        assert_eq!(
            unplanned_containers(Role::Worker, Some(&plan)),
            [NGINX_PROXY_CONTAINER]
        );
        assert_eq!(unplanned_containers(Role::Worker, None).len(), 4);
        assert_eq!(
            unplanned_containers(Role::Controlplane, Some(&plan)),
            role_containers(Role::Controlplane)
        );
    }
}
