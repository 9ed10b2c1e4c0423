//! Etcd membership changes, made with `etcdctl` inside a running member's container. The etcd
//! container carries the `ETCDCTL_*` environment, so no endpoints or certificates are passed.

use crate::error::{self, Component, Result};
use crate::hosts::Host;
use log::{debug, info};
use rke_model::constants::{ETCD_CONTAINER, ETCD_PEER_PORT};
use rke_model::Node;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdMember {
    pub id: String,
    pub name: String,
    pub peer_url: String,
}

impl EtcdMember {
    /// The host part of the peer URL.
    pub fn peer_host(&self) -> &str {
        let rest = self
            .peer_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.peer_url);
        rest.rsplit_once(':').map(|(host, _)| host).unwrap_or(rest)
    }

    pub fn is_node(&self, node: &Node) -> bool {
        self.peer_host() == node.internal() || self.name == member_name(node)
    }
}

fn member_name(node: &Node) -> String {
    format!("etcd-{}", node.hostname())
}

/// Parses the default `etcdctl member list` output:
/// `id, status, name, peer urls, client urls[, is learner]`.
pub fn parse_member_list(text: &str) -> Vec<EtcdMember> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 4 || fields[0].is_empty() {
                return None;
            }
            Some(EtcdMember {
                id: fields[0].to_string(),
                name: fields[2].to_string(),
                peer_url: fields[3].to_string(),
            })
        })
        .collect()
}

async fn etcdctl(host: &Host, args: &[String]) -> Result<String> {
    let info = host
        .docker
        .inspect(ETCD_CONTAINER)
        .await?
        .filter(|info| info.running);
    let info = match info {
        Some(info) => info,
        None => {
            return error::ContainerEngineSnafu {
                component: Component::Etcd,
                host: host.address(),
                operation: "etcdctl",
                message: "etcd is not running",
            }
            .fail()
        }
    };
    let mut cmd = vec!["etcdctl".to_string()];
    cmd.extend(args.iter().cloned());
    let output = host.docker.exec(&info.id, &cmd).await?;
    if !output.success() {
        return error::ContainerEngineSnafu {
            component: Component::Etcd,
            host: host.address(),
            operation: cmd.join(" "),
            message: output.stderr_str(),
        }
        .fail();
    }
    Ok(output.stdout_str())
}

/// The first host whose etcd container is running.
pub(super) async fn running_member<'h, I>(hosts: I) -> Result<Option<&'h Host>>
where
    I: IntoIterator<Item = &'h Host>,
{
    for host in hosts {
        let running = host
            .docker
            .inspect(ETCD_CONTAINER)
            .await?
            .map(|info| info.running)
            .unwrap_or(false);
        if running {
            return Ok(Some(host));
        }
    }
    Ok(None)
}

pub(super) async fn member_list(host: &Host) -> Result<Vec<EtcdMember>> {
    let output = etcdctl(host, &["member".to_string(), "list".to_string()]).await?;
    Ok(parse_member_list(&output))
}

/// Addresses of the configured etcd nodes that are members of the running cluster. Empty when no
/// member is running, as before a first bring-up.
pub async fn current_members(hosts: &BTreeMap<String, Host>) -> Result<Vec<String>> {
    let pool: Vec<&Host> = hosts.values().filter(|h| h.node.is_etcd()).collect();
    let member = match running_member(pool.iter().copied()).await? {
        Some(member) => member,
        None => return Ok(Vec::new()),
    };
    let members = member_list(member).await?;
    let addresses: Vec<String> = pool
        .iter()
        .filter(|host| members.iter().any(|m| m.is_node(&host.node)))
        .map(|host| host.address().to_string())
        .collect();
    debug!("[etcd] Running members: {:?}", addresses);
    Ok(addresses)
}

pub(super) async fn add_member(via: &Host, node: &Node) -> Result<()> {
    info!(
        "[etcd] Adding member '{}' through host '{}'",
        member_name(node),
        via.address()
    );
    etcdctl(
        via,
        &[
            "member".to_string(),
            "add".to_string(),
            member_name(node),
            format!("--peer-urls=https://{}:{}", node.internal(), ETCD_PEER_PORT),
        ],
    )
    .await?;
    Ok(())
}

/// Removes `node` from the cluster. A node that is not a member is left alone.
pub(super) async fn remove_member(via: &Host, node: &Node) -> Result<()> {
    let members = member_list(via).await?;
    let member = match members.iter().find(|m| m.is_node(node)) {
        Some(member) => member,
        None => {
            debug!("[etcd] '{}' is not an etcd member", node.address);
            return Ok(());
        }
    };
    info!(
        "[etcd] Removing member '{}' through host '{}'",
        member.name,
        via.address()
    );
    etcdctl(
        via,
        &["member".to_string(), "remove".to_string(), member.id.clone()],
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn member_list_output() {
        let members = parse_member_list(
            "8e9e05c52164694d, started, etcd-e1, https://10.0.0.1:2380, https://10.0.0.1:2379, false\n\
             91bc3c398fb3c146, unstarted, , https://10.0.0.2:2380, , false\n",
        );
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].id, "8e9e05c52164694d");
        assert_eq!(members[0].name, "etcd-e1");
        assert_eq!(members[1].peer_host(), "10.0.0.2");
    }

    #[test]
    fn members_match_by_internal_address_or_name() {
        let node = Node {
            address: "203.0.113.1".to_string(),
            internal_address: "10.0.0.1".to_string(),
            hostname_override: "e1".to_string(),
            ..Default::default()
        };
        let by_address = EtcdMember {
            id: "1".to_string(),
            name: String::new(),
            peer_url: "https://10.0.0.1:2380".to_string(),
        };
        let by_name = EtcdMember {
            id: "2".to_string(),
            name: "etcd-e1".to_string(),
            peer_url: "https://192.168.0.9:2380".to_string(),
        };
        let other = EtcdMember {
            id: "3".to_string(),
            name: "etcd-e2".to_string(),
            peer_url: "https://10.0.0.2:2380".to_string(),
        };
        assert!(by_address.is_node(&node));
        assert!(by_name.is_node(&node));
        assert!(!other.is_node(&node));
    }
}
