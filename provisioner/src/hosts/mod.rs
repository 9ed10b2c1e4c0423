/*!

The seams between the provisioner and the machines it manages. A `HostDialer` opens a
`Connection` to a node and hands out a `ContainerClient` bound to that node's container engine.
The SSH dialer and the docker CLI client are the production implementations; tests substitute
in-memory ones.

!*/

mod containers;
mod docker;
mod ssh;

pub use containers::{ensure_process, remove_container, run_once, stop_container};
pub(crate) use docker::registries_config;
pub use docker::DockerCliClient;
pub use ssh::SshDialer;

use crate::error::{self, Component, HostError, HostErrors, Result};
use async_trait::async_trait;
use log::{debug, warn};
use rke_model::constants::DEFAULT_DOCKER_ROOT_DIR;
use rke_model::{Node, Process};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// The result of a command run on a host or inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// What the container engine reports about an existing container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub running: bool,
    pub exit_code: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
    Both,
}

#[async_trait]
pub trait Connection: Send + Sync {
    fn address(&self) -> &str;

    /// Runs `program` with `args` on the host.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    async fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<()>;
}

#[async_trait]
pub trait ContainerClient: Send + Sync {
    async fn pull(&self, image: &str, registry_auth: Option<&str>) -> Result<()>;

    /// Creates a container named after `spec.name` and returns its id.
    async fn create(&self, spec: &Process) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    async fn stop(&self, id: &str) -> Result<()>;

    async fn restart(&self, id: &str) -> Result<()>;

    /// Blocks until the container exits and returns its exit status.
    async fn wait(&self, id: &str) -> Result<i64>;

    async fn remove(&self, id: &str, force: bool, remove_volumes: bool) -> Result<()>;

    /// `None` when no container has that name.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>>;

    /// Log output since the given unix time, or all of it.
    async fn logs(&self, id: &str, stream: LogStream, since: Option<i64>) -> Result<Vec<u8>>;

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<CommandOutput>;

    /// The engine's data directory on the host.
    async fn root_dir(&self) -> Result<String> {
        Ok(DEFAULT_DOCKER_ROOT_DIR.to_string())
    }
}

#[async_trait]
pub trait HostDialer: Send + Sync {
    async fn dial(&self, node: &Node) -> Result<Arc<dyn Connection>>;

    fn container_client(&self, node: &Node, conn: Arc<dyn Connection>) -> Arc<dyn ContainerClient>;
}

/// A dialed node. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct Host {
    pub node: Node,
    pub conn: Arc<dyn Connection>,
    pub docker: Arc<dyn ContainerClient>,
}

impl Host {
    pub fn address(&self) -> &str {
        &self.node.address
    }
}

impl Debug for Host {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("address", &self.node.address)
            .field("role", &self.node.role)
            .finish_non_exhaustive()
    }
}

/// Collapses entries that share an address into one node holding the union of their roles.
pub fn unique_nodes(nodes: &[Node]) -> Vec<Node> {
    let mut unique: Vec<Node> = Vec::new();
    for node in nodes {
        match unique.iter_mut().find(|n| n.address == node.address) {
            Some(existing) => {
                for role in &node.role {
                    if !existing.role.contains(role) {
                        existing.role.push(*role);
                    }
                }
            }
            None => unique.push(node.clone()),
        }
    }
    unique
}

/// Each Linux host's container engine data directory. A host whose engine cannot say keeps the
/// default.
pub async fn docker_root_dirs(hosts: &BTreeMap<String, Host>) -> BTreeMap<String, String> {
    let queries = hosts
        .values()
        .filter(|host| !host.node.is_windows())
        .map(|host| async move { (host, host.docker.root_dir().await) });
    futures::future::join_all(queries)
        .await
        .into_iter()
        .map(|(host, result)| {
            let dir = result.unwrap_or_else(|e| {
                warn!(
                    "[docker] Unable to read the docker root dir of host '{}', assuming '{}': {}",
                    host.address(),
                    DEFAULT_DOCKER_ROOT_DIR,
                    e
                );
                DEFAULT_DOCKER_ROOT_DIR.to_string()
            });
            (host.address().to_string(), dir)
        })
        .collect()
}

/// Dials every node concurrently. Every failure is reported, not just the first.
pub async fn dial_all(dialer: &dyn HostDialer, nodes: &[Node]) -> Result<BTreeMap<String, Host>> {
    let nodes = unique_nodes(nodes);
    let dials = nodes.iter().map(|node| async move {
        debug!("[dialer] Connecting to host '{}'", node.address);
        (node, dialer.dial(node).await)
    });
    let mut hosts = BTreeMap::new();
    let mut failures = Vec::new();
    for (node, result) in futures::future::join_all(dials).await {
        match result {
            Ok(conn) => {
                let docker = dialer.container_client(node, Arc::clone(&conn));
                hosts.insert(
                    node.address.clone(),
                    Host {
                        node: node.clone(),
                        conn,
                        docker,
                    },
                );
            }
            Err(error) => failures.push(HostError {
                host: node.address.clone(),
                error,
            }),
        }
    }
    if !failures.is_empty() {
        return error::PartialFailureSnafu {
            component: Component::Dialer,
            failures: HostErrors(failures),
        }
        .fail();
    }
    Ok(hosts)
}
