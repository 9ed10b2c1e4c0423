/*!

Pre-flight reachability checks between the pools. Hosts that do not run their real services yet
get a throwaway listener on each role port so a fresh fleet can be checked too; the listeners are
removed again once every host has checked its peers.

!*/

use crate::error::{self, Component, HostError, HostErrors, Result};
use crate::hosts::{remove_container, run_once, Host};
use crate::plan::registry_auth;
use log::{debug, info, warn};
use rke_model::config::ClusterConfig;
use rke_model::constants::*;
use rke_model::{Node, PortCheck, Process, Role};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

const ATTEMPTS: usize = 3;
const RETRY_PAUSE: Duration = Duration::from_secs(5);
const LISTENER_PORT: u16 = 1337;

/// The role ports a host must accept, with the container that serves each once deployed.
fn role_ports(node: &Node) -> Vec<(Role, u16, &'static str)> {
    let mut ports = Vec::new();
    if node.is_etcd() {
        ports.push((Role::Etcd, ETCD_CLIENT_PORT, ETCD_CONTAINER));
        ports.push((Role::Etcd, ETCD_PEER_PORT, ETCD_CONTAINER));
    }
    if node.is_control() {
        ports.push((Role::Controlplane, KUBE_APISERVER_PORT, KUBE_APISERVER_CONTAINER));
    }
    ports.push((Role::Worker, KUBELET_PORT, KUBELET_CONTAINER));
    ports
}

fn listener_name(role: Role) -> String {
    format!("rke-{}-port-listener", role)
}

/// What each host must reach, keyed by the probing host's address. Etcd members reach each
/// other's client and peer ports, controlplane hosts reach etcd clients, workers reach the API
/// server and every host reaches each kubelet.
pub fn check_plan(nodes: &[Node]) -> BTreeMap<String, Vec<PortCheck>> {
    let mut plan = BTreeMap::new();
    for source in nodes {
        let mut checks = BTreeSet::new();
        for target in nodes.iter().filter(|n| n.address != source.address) {
            let address = target.internal();
            if source.is_etcd() && target.is_etcd() {
                checks.insert((address, ETCD_CLIENT_PORT));
                checks.insert((address, ETCD_PEER_PORT));
            }
            if source.is_control() && target.is_etcd() {
                checks.insert((address, ETCD_CLIENT_PORT));
            }
            if source.is_worker() && target.is_control() {
                checks.insert((address, KUBE_APISERVER_PORT));
            }
            if target.is_worker() {
                checks.insert((address, KUBELET_PORT));
            }
        }
        if !checks.is_empty() {
            plan.insert(
                source.address.clone(),
                checks
                    .into_iter()
                    .map(|(address, port)| PortCheck::tcp(address, port))
                    .collect(),
            );
        }
    }
    plan
}

/// One `nc` per target; the unreachable ones are echoed back as `address:port`.
fn checker(config: &ClusterConfig, checks: &[PortCheck]) -> Process {
    let script = checks
        .iter()
        .map(|c| {
            format!(
                "nc -w 5 -z {0} {1} >/dev/null 2>&1 || echo {0}:{1};",
                c.address, c.port
            )
        })
        .collect::<Vec<_>>()
        .join(" ");
    let image = config.system_images.alpine.clone();
    Process {
        name: PORT_CHECK_CONTAINER.to_string(),
        command: vec!["sh".to_string(), "-c".to_string(), script],
        image_registry_auth_config: registry_auth(config, &image),
        image,
        network_mode: "host".to_string(),
        restart_policy: "no".to_string(),
        ..Default::default()
    }
}

fn listener(config: &ClusterConfig, role: Role, ports: &[u16]) -> Process {
    let image = config.system_images.alpine.clone();
    Process {
        name: listener_name(role),
        command: vec![
            "nc".to_string(),
            "-kl".to_string(),
            "-p".to_string(),
            LISTENER_PORT.to_string(),
            "-e".to_string(),
            "echo".to_string(),
        ],
        image_registry_auth_config: registry_auth(config, &image),
        image,
        publish: ports
            .iter()
            .map(|port| format!("0.0.0.0:{}:{}/tcp", port, LISTENER_PORT))
            .collect(),
        ..Default::default()
    }
}

fn unreachable(output: &[u8]) -> Vec<(String, u16)> {
    String::from_utf8_lossy(output)
        .lines()
        .filter_map(|line| {
            let (address, port) = line.trim().rsplit_once(':')?;
            Some((address.to_string(), port.parse().ok()?))
        })
        .collect()
}

/// Starts a listener for every role port whose real service is not running yet. Returns the
/// names of the listeners started.
async fn start_listeners(host: &Host, config: &ClusterConfig) -> Result<Vec<String>> {
    let mut by_role: BTreeMap<Role, Vec<u16>> = BTreeMap::new();
    for (role, port, container) in role_ports(&host.node) {
        let serving = host
            .docker
            .inspect(container)
            .await?
            .map(|info| info.running)
            .unwrap_or(false);
        if !serving {
            by_role.entry(role).or_default().push(port);
        }
    }
    let mut started = Vec::new();
    for (role, ports) in by_role {
        let process = listener(config, role, &ports);
        remove_container(host, &process.name, Component::Network).await?;
        host.docker
            .pull(&process.image, process.image_registry_auth_config.as_deref())
            .await?;
        let id = host.docker.create(&process).await?;
        host.docker.start(&id).await?;
        debug!(
            "[network] Started '{}' on host '{}' for ports {:?}",
            process.name,
            host.address(),
            ports
        );
        started.push(process.name);
    }
    Ok(started)
}

async fn check_host(
    host: &Host,
    config: &ClusterConfig,
    checks: &[PortCheck],
    wait_timeout: Duration,
) -> Result<()> {
    let mut pending = checks.to_vec();
    for attempt in 1..=ATTEMPTS {
        let output = run_once(host, &checker(config, &pending), wait_timeout, Component::Network).await?;
        let failed = unreachable(&output);
        pending.retain(|c| failed.iter().any(|(a, p)| a == &c.address && *p == c.port));
        if pending.is_empty() {
            return Ok(());
        }
        if attempt < ATTEMPTS {
            debug!(
                "[network] Host '{}' can not reach {} port(s) yet, retrying",
                host.address(),
                pending.len()
            );
            tokio::time::sleep(RETRY_PAUSE).await;
        }
    }
    match pending.first() {
        Some(first) => error::PortCheckSnafu {
            host: host.address(),
            address: first.address.as_str(),
            port: first.port,
        }
        .fail(),
        None => Ok(()),
    }
}

/// Runs the pre-flight checks across the fleet. Windows hosts neither dial nor listen.
pub async fn check_ports(hosts: &[Host], config: &ClusterConfig, wait_timeout: Duration) -> Result<()> {
    let linux: Vec<&Host> = hosts.iter().filter(|h| !h.node.is_windows()).collect();
    let nodes: Vec<Node> = linux.iter().map(|h| h.node.clone()).collect();
    let plan = check_plan(&nodes);
    info!("[network] Checking ports between {} host(s)", linux.len());

    let mut listeners: Vec<(&Host, Vec<String>)> = Vec::new();
    let mut failures = Vec::new();
    for (host, result) in futures::future::join_all(
        linux
            .iter()
            .map(|host| async move { (*host, start_listeners(host, config).await) }),
    )
    .await
    {
        match result {
            Ok(names) => listeners.push((host, names)),
            Err(error) => failures.push(HostError {
                host: host.address().to_string(),
                error,
            }),
        }
    }

    if failures.is_empty() {
        let checks = linux.iter().filter_map(|host| {
            plan.get(host.address()).map(|checks| async move {
                (*host, check_host(host, config, checks, wait_timeout).await)
            })
        });
        for (host, result) in futures::future::join_all(checks).await {
            if let Err(error) = result {
                failures.push(HostError {
                    host: host.address().to_string(),
                    error,
                });
            }
        }
    }

    for (host, names) in listeners {
        for name in names {
            if let Err(e) = remove_container(host, &name, Component::Network).await {
                warn!(
                    "[network] Failed to remove '{}' on host '{}': {}",
                    name,
                    host.address(),
                    e
                );
            }
        }
    }

    if !failures.is_empty() {
        return error::PartialFailureSnafu {
            component: Component::Network,
            failures: HostErrors(failures),
        }
        .fail();
    }
    Ok(())
}
