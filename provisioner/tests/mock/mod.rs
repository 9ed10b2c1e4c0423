/*!

In-memory stand-ins for the machines and services the provisioner talks to, so whole operations
can be driven without SSH, docker or a Kubernetes cluster.

A [`Fleet`] holds one [`MockHost`] per address. The dialer, connections and container clients all
share it and record every container operation, which tests then assert on.

!*/

use async_trait::async_trait;
use rke_model::constants::*;
use rke_model::{FullState, Node, NodePlan, Process};
use rke_provisioner::health::{CheckCredentials, HealthChecker};
use rke_provisioner::hosts::{
    CommandOutput, Connection, ContainerClient, ContainerInfo, Host, HostDialer, LogStream,
};
use rke_provisioner::k8s::ClusterApi;
use rke_provisioner::snapshot::SnapshotStore;
use rke_provisioner::state::StateStore;
use rke_provisioner::{Component, Error, Result};
use rke_model::config::NodeDrainInput;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// What one host looks like from the outside.
#[derive(Debug, Default)]
pub struct MockHost {
    pub node: Node,
    pub containers: BTreeMap<String, ContainerInfo>,
    pub files: BTreeMap<String, Vec<u8>>,
    /// `"<op> <container>"` for every container operation, in order.
    pub ops: Vec<String>,
    /// Containers whose creation fails.
    pub failing: BTreeSet<String>,
    /// What the engine reports as its data directory, the default when unset.
    pub docker_root: Option<String>,
}

impl MockHost {
    /// Names of the containers this host created, in order.
    pub fn created(&self) -> Vec<String> {
        self.ops
            .iter()
            .filter_map(|op| op.strip_prefix("create "))
            .map(str::to_string)
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct Fleet {
    hosts: Arc<Mutex<BTreeMap<String, MockHost>>>,
    /// `"<address> <op> <container>"` across every host, in order.
    history: Arc<Mutex<Vec<String>>>,
}

fn engine_error(host: &str, operation: &str, message: &str) -> Error {
    Error::ContainerEngine {
        component: Component::Docker,
        host: host.to_string(),
        operation: operation.to_string(),
        message: message.to_string(),
    }
}

/// The path a one-shot container writes to: the last word of its shell script.
fn script_target(process: &Process, marker: &str) -> Option<String> {
    let script = process.command.get(2)?;
    let rest = &script[script.find(marker)? + marker.len()..];
    rest.split_whitespace().next().map(str::to_string)
}

impl Fleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the host at `address`, creating an empty one if needed.
    pub fn with_host<T>(&self, address: &str, f: impl FnOnce(&mut MockHost) -> T) -> T {
        let mut hosts = self.hosts.lock().unwrap();
        f(hosts.entry(address.to_string()).or_default())
    }

    /// Makes creating `container` on `address` fail.
    pub fn fail_create(&self, address: &str, container: &str) {
        self.with_host(address, |host| {
            host.failing.insert(container.to_string());
        });
    }

    pub fn created(&self, address: &str) -> Vec<String> {
        self.with_host(address, |host| host.created())
    }

    pub fn container(&self, address: &str, name: &str) -> Option<ContainerInfo> {
        self.with_host(address, |host| host.containers.get(name).cloned())
    }

    pub fn clear_ops(&self) {
        for host in self.hosts.lock().unwrap().values_mut() {
            host.ops.clear();
        }
        self.history.lock().unwrap().clear();
    }

    /// Every container operation on every host, in the order they happened.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().unwrap().clone()
    }

    /// Whether `address` ran an operation containing `needle`.
    pub fn ran(&self, address: &str, needle: &str) -> bool {
        self.with_host(address, |host| host.ops.iter().any(|op| op.contains(needle)))
    }

    /// `etcdctl member list` output for every host running etcd.
    fn member_list(&self) -> String {
        let hosts = self.hosts.lock().unwrap();
        hosts
            .values()
            .filter(|host| {
                host.containers
                    .get(ETCD_CONTAINER)
                    .map(|c| c.running)
                    .unwrap_or(false)
            })
            .enumerate()
            .map(|(i, host)| {
                format!(
                    "{:016x}, started, etcd-{}, https://{}:2380, https://{}:2379, false\n",
                    i + 1,
                    host.node.hostname(),
                    host.node.internal(),
                    host.node.internal()
                )
            })
            .collect()
    }
}

pub struct MockDialer {
    pub fleet: Fleet,
    /// Addresses that refuse connections.
    pub unreachable: BTreeSet<String>,
}

impl MockDialer {
    pub fn new(fleet: &Fleet) -> Self {
        Self {
            fleet: fleet.clone(),
            unreachable: BTreeSet::new(),
        }
    }
}

#[async_trait]
impl HostDialer for MockDialer {
    async fn dial(&self, node: &Node) -> Result<Arc<dyn Connection>> {
        if self.unreachable.contains(&node.address) {
            return Err(Error::HostUnreachableMessage {
                host: node.address.clone(),
                message: "connection refused".to_string(),
            });
        }
        self.fleet.with_host(&node.address, |host| host.node = node.clone());
        Ok(Arc::new(MockConnection {
            fleet: self.fleet.clone(),
            address: node.address.clone(),
        }))
    }

    fn container_client(&self, node: &Node, _conn: Arc<dyn Connection>) -> Arc<dyn ContainerClient> {
        Arc::new(MockDocker {
            fleet: self.fleet.clone(),
            address: node.address.clone(),
        })
    }
}

pub struct MockConnection {
    fleet: Fleet,
    address: String,
}

#[async_trait]
impl Connection for MockConnection {
    fn address(&self) -> &str {
        &self.address
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        self.fleet.with_host(&self.address, |host| {
            host.ops.push(format!("run {} {}", program, args.join(" ")));
            if program == "rm" {
                for path in args.iter().filter(|a| !a.starts_with('-')) {
                    host.files.remove(path);
                }
            }
        });
        Ok(CommandOutput::default())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.fleet
            .with_host(&self.address, |host| host.files.get(path).cloned())
            .ok_or_else(|| engine_error(&self.address, "read", "no such file"))
    }

    async fn write_file(&self, path: &str, contents: &[u8], _mode: u32) -> Result<()> {
        self.fleet.with_host(&self.address, |host| {
            host.files.insert(path.to_string(), contents.to_vec());
        });
        Ok(())
    }
}

pub struct MockDocker {
    fleet: Fleet,
    address: String,
}

impl MockDocker {
    fn record(&self, op: &str, name: &str) {
        self.fleet.with_host(&self.address, |host| {
            host.ops.push(format!("{} {}", op, name));
        });
        self.fleet
            .history
            .lock()
            .unwrap()
            .push(format!("{} {} {}", self.address, op, name));
    }

    fn set_running(&self, id: &str, running: bool) -> Result<()> {
        self.fleet.with_host(&self.address, |host| {
            match host.containers.get_mut(id) {
                Some(container) => {
                    container.running = running;
                    Ok(())
                }
                None => Err(engine_error(&self.address, "start", "no such container")),
            }
        })
    }

    /// The side effects of one-shot containers that the provisioner reads back.
    fn run_side_effects(&self, spec: &Process) {
        self.fleet.with_host(&self.address, |host| {
            if spec.name == FILE_DEPLOYER_CONTAINER {
                let contents = spec
                    .env
                    .iter()
                    .find_map(|e| e.strip_prefix("FILE_CONTENTS="))
                    .and_then(|b64| base64::decode(b64).ok());
                if let (Some(path), Some(contents)) = (script_target(spec, "base64 -d > "), contents)
                {
                    host.files.insert(path, contents);
                }
            }
            if spec.name == ETCD_SNAPSHOT_ONCE_CONTAINER {
                if let Some(path) = script_target(spec, "etcdctl snapshot save ") {
                    host.files.insert(path, b"etcd database".to_vec());
                }
            }
        });
    }
}

#[async_trait]
impl ContainerClient for MockDocker {
    async fn pull(&self, image: &str, _registry_auth: Option<&str>) -> Result<()> {
        self.record("pull", image);
        Ok(())
    }

    async fn create(&self, spec: &Process) -> Result<String> {
        let failing = self
            .fleet
            .with_host(&self.address, |host| host.failing.contains(&spec.name));
        if failing {
            return Err(engine_error(&self.address, "create", "injected failure"));
        }
        self.record("create", &spec.name);
        let mut labels = spec.labels.clone();
        if !spec.health_check.url.is_empty() {
            labels.insert(
                HEALTHCHECK_URL_LABEL.to_string(),
                spec.health_check.url.clone(),
            );
        }
        let (entrypoint, cmd) = match spec.command.split_first() {
            Some((entry, rest)) => (
                vec![entry.clone()],
                rest.iter().chain(&spec.args).cloned().collect(),
            ),
            None => (Vec::new(), spec.args.clone()),
        };
        let info = ContainerInfo {
            id: spec.name.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            entrypoint,
            cmd,
            env: spec.env.clone(),
            binds: spec.binds.clone(),
            labels,
            running: false,
            exit_code: 0,
        };
        self.fleet.with_host(&self.address, |host| {
            host.containers.insert(spec.name.clone(), info);
        });
        self.run_side_effects(spec);
        Ok(spec.name.clone())
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.record("start", id);
        self.set_running(id, true)
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.record("stop", id);
        self.set_running(id, false)
    }

    async fn restart(&self, id: &str) -> Result<()> {
        self.record("restart", id);
        self.set_running(id, true)
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        self.set_running(id, false)?;
        Ok(0)
    }

    async fn remove(&self, id: &str, _force: bool, _remove_volumes: bool) -> Result<()> {
        self.record("remove", id);
        self.fleet.with_host(&self.address, |host| {
            host.containers.remove(id);
        });
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>> {
        Ok(self.fleet.container(&self.address, name))
    }

    async fn logs(&self, id: &str, stream: LogStream, _since: Option<i64>) -> Result<Vec<u8>> {
        if id == TIME_CHECK_CONTAINER && stream == LogStream::Stdout {
            return Ok(chrono::Utc::now().timestamp().to_string().into_bytes());
        }
        Ok(Vec::new())
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<CommandOutput> {
        self.record("exec", &format!("{} {}", id, cmd.join(" ")));
        let stdout = if cmd.iter().any(|c| c == "list") {
            self.fleet.member_list().into_bytes()
        } else {
            Vec::new()
        };
        Ok(CommandOutput {
            status: 0,
            stdout,
            stderr: Vec::new(),
        })
    }

    async fn root_dir(&self) -> Result<String> {
        Ok(self
            .fleet
            .with_host(&self.address, |host| host.docker_root.clone())
            .unwrap_or_else(|| DEFAULT_DOCKER_ROOT_DIR.to_string()))
    }
}

/// Every endpoint answers 200.
pub struct HealthyChecker;

#[async_trait]
impl HealthChecker for HealthyChecker {
    async fn status(&self, _host: &Host, _url: &str, _credentials: &CheckCredentials) -> Result<u16> {
        Ok(200)
    }
}

/// Records the API calls made against the cluster.
#[derive(Default)]
pub struct RecordingApi {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingApi {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ClusterApi for RecordingApi {
    async fn set_unschedulable(&self, node: &str, unschedulable: bool) -> Result<()> {
        self.record(format!("cordon {} {}", node, unschedulable));
        Ok(())
    }

    async fn evict_pods(&self, node: &str, _input: &NodeDrainInput) -> Result<()> {
        self.record(format!("evict {}", node));
        Ok(())
    }

    async fn delete_node(&self, node: &str) -> Result<()> {
        self.record(format!("delete {}", node));
        Ok(())
    }

    async fn sync_node_metadata(&self, node: &str, _plan: &NodePlan) -> Result<()> {
        self.record(format!("metadata {}", node));
        Ok(())
    }

    async fn rewrite_secrets(&self) -> Result<usize> {
        self.record("rewrite-secrets".to_string());
        Ok(3)
    }

    async fn restart_system_deployments(&self) -> Result<()> {
        self.record("restart-system".to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    pub state: Mutex<Option<FullState>>,
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<FullState>> {
        Ok(self.state.lock().unwrap().clone())
    }

    async fn save(&self, state: &FullState) -> Result<()> {
        *self.state.lock().unwrap() = Some(state.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySnapshotStore {
    pub objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn upload(&self, name: &str, archive: Vec<u8>) -> Result<()> {
        self.objects.lock().unwrap().insert(name.to_string(), archive);
        Ok(())
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| engine_error("s3", "download", "no such object"))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(name);
        Ok(())
    }
}
