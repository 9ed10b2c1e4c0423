/*!

The rollout executor. It drives the per-host plans onto the fleet in three phases (etcd, then the
control plane, then every host's worker components). Within a phase the hosts that need an update
are split into batches; a batch runs one task per host and must finish completely before the next
one starts. Any failure in a batch aborts the rollout after the batch has settled, reporting every
failed host.

!*/

pub mod diff;
mod etcd;
mod files;
mod remove;

pub use etcd::{current_members, parse_member_list, EtcdMember};
pub use files::file_deployer;
pub use remove::{clean_host, remove_role_containers, role_containers, Departure};

use crate::error::{self, Component, HostError, HostErrors, Result};
use crate::health::{self, HealthChecker};
use crate::hosts::{ensure_process, remove_container, Host};
use crate::k8s::{drain_node, ClusterApi};
use log::{debug, info, warn};
use rke_model::config::{ClusterConfig, NodeDrainInput};
use rke_model::constants::*;
use rke_model::validation;
use rke_model::{NodePlan, Process, Role};
use sha2::{Digest, Sha256};
use snafu::ensure;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(45);

/// The containers each phase owns, in the order they start.
pub fn phase_processes(role: Role) -> &'static [&'static str] {
    match role {
        Role::Etcd => &[ETCD_CONTAINER],
        Role::Controlplane => &[
            KUBE_APISERVER_CONTAINER,
            KUBE_CONTROLLER_CONTAINER,
            SCHEDULER_CONTAINER,
        ],
        Role::Worker => &[
            SIDEKICK_CONTAINER,
            NGINX_PROXY_CONTAINER,
            KUBELET_CONTAINER,
            KUBEPROXY_CONTAINER,
        ],
    }
}

/// Resolves `max_unavailable_*` against a pool: a count, or a percentage of `pool` rounded up.
/// Never below one.
pub fn parse_max_unavailable(value: &str, pool: usize) -> Result<usize> {
    let size = match validation::parse_max_unavailable(value) {
        Some((percent, true)) => (pool * percent as usize + 99) / 100,
        Some((count, false)) => count as usize,
        _ => {
            return error::ConfigInvalidSnafu {
                message: format!(
                    "max unavailable '{}' is neither a count nor a percentage",
                    value.trim()
                ),
            }
            .fail()
        }
    };
    Ok(size.max(1))
}

/// How long a restarted component may take to report healthy.
pub fn health_timeout(config: &ClusterConfig) -> Duration {
    if config.addon_job_timeout == 0 {
        DEFAULT_HEALTH_TIMEOUT
    } else {
        Duration::from_secs(config.addon_job_timeout)
    }
}

/// A short digest of `plan`, logged so two runs can be compared without dumping the plan.
pub fn fingerprint(plan: &NodePlan) -> String {
    let bytes = serde_json::to_vec(plan).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

/// Which hosts each phase changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloutReport {
    pub updated: BTreeMap<Role, Vec<String>>,
}

impl RolloutReport {
    pub fn updated(&self, role: Role) -> &[String] {
        self.updated.get(&role).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_noop(&self) -> bool {
        self.updated.values().all(Vec::is_empty)
    }
}

/// Everything a host task needs, cloned out of the rollout when the task is dispatched.
struct HostTask {
    host: Host,
    plan: NodePlan,
    role: Role,
    config: Arc<ClusterConfig>,
    cluster: Option<Arc<dyn ClusterApi>>,
    checker: Arc<dyn HealthChecker>,
    health_timeout: Duration,
    restart_apiserver: bool,
    /// Restart the phase's long-running containers in place instead of reconciling them.
    restart_only: bool,
    /// A running etcd member through which this host must first be added to the cluster.
    join_via: Option<Host>,
    cancel: CancellationToken,
}

impl HostTask {
    fn component(&self) -> Component {
        Component::from(self.role)
    }

    fn check_canceled(&self) -> Result<()> {
        ensure!(
            !self.cancel.is_cancelled(),
            error::CanceledSnafu {
                component: self.component()
            }
        );
        Ok(())
    }

    fn drain_input(&self) -> Option<NodeDrainInput> {
        if self.role == Role::Etcd {
            return None;
        }
        let strategy = self.config.upgrade_strategy.as_ref()?;
        if !strategy.drain_enabled() {
            return None;
        }
        Some(strategy.node_drain_input.clone().unwrap_or_default())
    }

    async fn run(self) -> Result<()> {
        if self.restart_only {
            return self.restart().await;
        }
        let component = self.component();
        let node_name = self.host.node.hostname().to_string();
        self.check_canceled()?;

        let mut drained = false;
        if let (Some(input), Some(api)) = (self.drain_input(), &self.cluster) {
            let registered = self
                .host
                .docker
                .inspect(KUBELET_CONTAINER)
                .await?
                .map(|info| info.running)
                .unwrap_or(false);
            if registered {
                drain_node(api.as_ref(), &node_name, &input, component).await?;
                drained = true;
            }
        }

        if let Some(member) = &self.join_via {
            self.check_canceled()?;
            etcd::add_member(member, &self.host.node).await?;
        }

        if self.role == Role::Worker && self.plan.process(NGINX_PROXY_CONTAINER).is_none() {
            remove_container(&self.host, NGINX_PROXY_CONTAINER, component).await?;
        }

        for name in phase_processes(self.role) {
            let process = match self.plan.process(name) {
                Some(process) => process,
                None => continue,
            };
            self.check_canceled()?;
            let mut changed = ensure_process(&self.host, process, component).await?;
            if !changed && self.restart_apiserver && *name == KUBE_APISERVER_CONTAINER {
                if let Some(info) = self.host.docker.inspect(name).await? {
                    info!(
                        "{} Restarting '{}' on host '{}' to pick up new files",
                        component,
                        name,
                        self.host.address()
                    );
                    self.host.docker.restart(&info.id).await?;
                    changed = true;
                }
            }
            if changed {
                self.wait_healthy(process).await?;
            }
        }

        if drained {
            if let Some(api) = &self.cluster {
                info!("{} Uncordoning node '{}'", component, node_name);
                api.set_unschedulable(&node_name, false).await?;
            }
        }
        Ok(())
    }

    async fn wait_healthy(&self, process: &Process) -> Result<()> {
        health::wait_healthy(
            self.checker.as_ref(),
            &self.host,
            process,
            &health::credentials(&self.config, &self.host, process),
            self.health_timeout,
            self.component(),
            &self.cancel,
        )
        .await
    }

    /// Restarts the running containers of the phase one by one, each followed by its health check.
    async fn restart(self) -> Result<()> {
        let component = self.component();
        for name in phase_processes(self.role) {
            let process = match self.plan.process(name) {
                Some(process) if is_long_running(process) => process,
                _ => continue,
            };
            self.check_canceled()?;
            let info = match self.host.docker.inspect(name).await? {
                Some(info) => info,
                None => continue,
            };
            info!(
                "{} Restarting '{}' on host '{}'",
                component,
                name,
                self.host.address()
            );
            self.host.docker.restart(&info.id).await?;
            self.wait_healthy(process).await?;
        }
        Ok(())
    }
}

fn is_long_running(process: &Process) -> bool {
    matches!(process.restart_policy.as_str(), "always" | "unless-stopped")
}

/// Whether any container the phase owns on `host` differs from the plan, is missing or stopped.
async fn needs_update(host: &Host, plan: &NodePlan, role: Role, restart: bool) -> Result<bool> {
    if restart && role == Role::Controlplane {
        return Ok(true);
    }
    if role == Role::Worker && plan.process(NGINX_PROXY_CONTAINER).is_none() {
        if host.docker.inspect(NGINX_PROXY_CONTAINER).await?.is_some() {
            return Ok(true);
        }
    }
    for name in phase_processes(role) {
        let process = match plan.process(name) {
            Some(process) => process,
            None => continue,
        };
        let current = match host.docker.inspect(name).await? {
            Some(info) => info,
            None => return Ok(true),
        };
        if let Some(reason) = diff::process_change(&current, process) {
            debug!(
                "{} Host '{}' needs an update: '{}' {}",
                Component::from(role),
                host.address(),
                name,
                reason
            );
            return Ok(true);
        }
        if is_long_running(process) && !current.running {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Drives plans onto dialed hosts.
#[derive(Clone)]
pub struct Rollout {
    config: Arc<ClusterConfig>,
    plans: Arc<BTreeMap<String, NodePlan>>,
    hosts: BTreeMap<String, Host>,
    cluster: Option<Arc<dyn ClusterApi>>,
    checker: Arc<dyn HealthChecker>,
    wait_timeout: Duration,
    cancel: CancellationToken,
}

impl Rollout {
    pub fn new(
        config: ClusterConfig,
        plans: BTreeMap<String, NodePlan>,
        hosts: BTreeMap<String, Host>,
        checker: Arc<dyn HealthChecker>,
        wait_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            plans: Arc::new(plans),
            hosts,
            cluster: None,
            checker,
            wait_timeout,
            cancel,
        }
    }

    /// Enables draining and node metadata updates. Without it a rollout never talks to the API
    /// server, as on a first bring-up.
    pub fn with_cluster_api(mut self, api: Arc<dyn ClusterApi>) -> Self {
        self.cluster = Some(api);
        self
    }

    pub fn hosts(&self) -> &BTreeMap<String, Host> {
        &self.hosts
    }

    fn health_timeout(&self) -> Duration {
        health_timeout(&self.config)
    }

    fn check_canceled(&self, component: Component) -> Result<()> {
        ensure!(
            !self.cancel.is_cancelled(),
            error::CanceledSnafu { component }
        );
        Ok(())
    }

    /// Hosts holding `role`, paired with their plans, in address order.
    fn pool(&self, role: Role) -> Vec<(&Host, &NodePlan)> {
        self.hosts
            .values()
            .filter(|host| role == Role::Worker || host.node.has_role(role))
            .filter_map(|host| self.plans.get(host.address()).map(|plan| (host, plan)))
            .collect()
    }

    fn task(&self, host: &Host, plan: &NodePlan, role: Role, cancel: &CancellationToken) -> HostTask {
        debug!(
            "{} Plan for '{}' has fingerprint {}",
            Component::from(role),
            host.address(),
            fingerprint(plan)
        );
        HostTask {
            host: host.clone(),
            plan: plan.clone(),
            role,
            config: Arc::clone(&self.config),
            cluster: self.cluster.clone(),
            checker: Arc::clone(&self.checker),
            health_timeout: self.health_timeout(),
            restart_apiserver: false,
            restart_only: false,
            join_via: None,
            cancel: cancel.child_token(),
        }
    }

    /// Runs every phase in order.
    pub async fn run(&self) -> Result<RolloutReport> {
        let mut report = RolloutReport::default();
        let restart = files::sync_files(self, self.wait_timeout).await?;

        self.check_canceled(Component::Etcd)?;
        report.updated.insert(Role::Etcd, self.etcd_phase().await?);
        self.check_canceled(Component::Controlplane)?;
        report
            .updated
            .insert(Role::Controlplane, self.phase(Role::Controlplane, &restart).await?);
        self.check_canceled(Component::Worker)?;
        report
            .updated
            .insert(Role::Worker, self.phase(Role::Worker, &restart).await?);

        if let Some(api) = &self.cluster {
            for (host, plan) in self.pool(Role::Worker) {
                if let Err(e) = api.sync_node_metadata(host.node.hostname(), plan).await {
                    warn!(
                        "[worker] Failed to update labels and taints of node '{}': {}",
                        host.node.hostname(),
                        e
                    );
                }
            }
        }
        Ok(report)
    }

    /// Hosts of the pool that need an update, checked concurrently.
    async fn stale_hosts(
        &self,
        role: Role,
        restart: &BTreeSet<String>,
    ) -> Result<Vec<(&Host, &NodePlan)>> {
        let checks = self.pool(role).into_iter().map(|(host, plan)| async move {
            let restart = restart.contains(host.address());
            (host, plan, needs_update(host, plan, role, restart).await)
        });
        let mut stale = Vec::new();
        let mut failures = Vec::new();
        for (host, plan, result) in futures::future::join_all(checks).await {
            match result {
                Ok(true) => stale.push((host, plan)),
                Ok(false) => {}
                Err(error) => failures.push(HostError {
                    host: host.address().to_string(),
                    error,
                }),
            }
        }
        if !failures.is_empty() {
            return error::PartialFailureSnafu {
                component: Component::from(role),
                failures: HostErrors(failures),
            }
            .fail();
        }
        Ok(stale)
    }

    /// How many hosts of a pool of `pool_size` may be down at once.
    fn batch_size(&self, role: Role, pool_size: usize) -> Result<usize> {
        let strategy = self.config.upgrade_strategy.clone().unwrap_or_default();
        let setting = match role {
            Role::Etcd => return Ok(1),
            Role::Controlplane => strategy.max_unavailable_controlplane,
            Role::Worker => strategy.max_unavailable_worker,
        };
        if setting.is_empty() {
            Ok(1)
        } else {
            parse_max_unavailable(&setting, pool_size)
        }
    }

    /// Restarts every long-running container so it reads freshly deployed certificates. Etcd
    /// restarts one member at a time, then the control plane and the workers follow the upgrade
    /// strategy, every restart waiting for its health check.
    pub async fn restart_all(&self) -> Result<()> {
        for role in [Role::Etcd, Role::Controlplane, Role::Worker] {
            let component = Component::from(role);
            self.check_canceled(component)?;
            if role == Role::Etcd && self.config.services.etcd.is_external() {
                continue;
            }
            let pool = self.pool(role);
            let batch_size = self.batch_size(role, pool.len())?;
            info!(
                "{} Restarting {} host(s), {} at a time",
                component,
                pool.len(),
                batch_size
            );
            let phase_token = self.cancel.child_token();
            let tasks = pool
                .into_iter()
                .map(|(host, plan)| {
                    let mut task = self.task(host, plan, role, &phase_token);
                    task.restart_only = true;
                    task
                })
                .collect();
            self.run_batches(role, tasks, batch_size).await?;
        }
        Ok(())
    }

    async fn phase(&self, role: Role, restart: &BTreeSet<String>) -> Result<Vec<String>> {
        let component = Component::from(role);
        let pool_size = self.pool(role).len();
        let stale = self.stale_hosts(role, restart).await?;
        if stale.is_empty() {
            info!("{} All {} host(s) are up to date", component, pool_size);
            return Ok(Vec::new());
        }
        let batch_size = self.batch_size(role, pool_size)?;
        info!(
            "{} Updating {} of {} host(s), {} at a time",
            component,
            stale.len(),
            pool_size,
            batch_size
        );
        let phase_token = self.cancel.child_token();
        let tasks = stale
            .into_iter()
            .map(|(host, plan)| {
                let mut task = self.task(host, plan, role, &phase_token);
                task.restart_apiserver = restart.contains(host.address());
                task
            })
            .collect();
        self.run_batches(role, tasks, batch_size).await
    }

    async fn etcd_phase(&self) -> Result<Vec<String>> {
        if self.config.services.etcd.is_external() {
            info!("[etcd] Using external etcd, skipping etcd plane");
            return Ok(Vec::new());
        }
        let stale = self.stale_hosts(Role::Etcd, &BTreeSet::new()).await?;
        if stale.is_empty() {
            info!("[etcd] All etcd hosts are up to date");
            return Ok(Vec::new());
        }
        info!("[etcd] Building up etcd plane..");
        let pool: Vec<&Host> = self.pool(Role::Etcd).into_iter().map(|(h, _)| h).collect();
        let running = etcd::running_member(pool.iter().copied()).await?;
        let members = match running {
            Some(member) => etcd::member_list(member).await?,
            None => Vec::new(),
        };
        let phase_token = self.cancel.child_token();
        let tasks: Vec<HostTask> = stale
            .into_iter()
            .map(|(host, plan)| {
                let mut task = self.task(host, plan, Role::Etcd, &phase_token);
                let is_member = members.iter().any(|m| m.is_node(&host.node));
                if !is_member {
                    task.join_via = running.filter(|m| m.address() != host.address()).cloned();
                }
                task
            })
            .collect();
        // A new cluster needs all members up before any of them reports healthy. A running
        // cluster changes one member at a time so it keeps quorum and membership changes are
        // serialized.
        let batch_size = if running.is_some() { 1 } else { tasks.len() };
        self.run_batches(Role::Etcd, tasks, batch_size).await
    }

    async fn run_batches(
        &self,
        role: Role,
        mut tasks: Vec<HostTask>,
        batch_size: usize,
    ) -> Result<Vec<String>> {
        let component = Component::from(role);
        let batch_size = batch_size.max(1);
        let mut updated = Vec::new();
        let mut batch_number = 0;
        while !tasks.is_empty() {
            self.check_canceled(component)?;
            let rest = tasks.split_off(batch_size.min(tasks.len()));
            let batch = std::mem::replace(&mut tasks, rest);
            batch_number += 1;
            let addresses: Vec<String> = batch.iter().map(|t| t.host.address().to_string()).collect();
            info!(
                "{} Starting batch {}: {}",
                component,
                batch_number,
                addresses.join(", ")
            );

            let mut set = JoinSet::new();
            for task in batch {
                let address = task.host.address().to_string();
                set.spawn(async move { (address, task.run().await) });
            }
            let mut failures = Vec::new();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((address, Ok(()))) => updated.push(address),
                    Ok((address, Err(error))) => failures.push(HostError {
                        host: address,
                        error,
                    }),
                    Err(source) => failures.push(HostError {
                        host: "unknown".to_string(),
                        error: error::Error::Join { component, source },
                    }),
                }
            }
            if !failures.is_empty() {
                if failures.iter().all(|f| f.error.is_canceled()) {
                    return error::CanceledSnafu { component }.fail();
                }
                failures.sort_by(|a, b| a.host.cmp(&b.host));
                return error::PartialFailureSnafu {
                    component,
                    failures: HostErrors(failures),
                }
                .fail();
            }
        }
        updated.sort();
        Ok(updated)
    }

    /// Removes hosts, or roles of hosts, that left the config. Etcd members are removed from the
    /// cluster one at a time through a member that stays.
    pub async fn remove_departed(&self, departures: Vec<Departure>) -> Result<()> {
        for departure in departures {
            self.check_canceled(Component::Worker)?;
            remove::remove_departure(self, &departure).await?;
        }
        Ok(())
    }
}
