/*!

The cluster driver. Each operation composes the planner, the PKI authority, the rollout executor
and the state store into one of the things a user asks for: bring the cluster up, tear it down,
rotate certificates or encryption keys, or save, restore and remove etcd snapshots.

Every operation runs under a child of the driver's cancel token.

!*/

use crate::error::{self, Component, HostError, HostErrors, Result};
use crate::health::{CurlChecker, HealthChecker};
use crate::hosts::{dial_all, docker_root_dirs, unique_nodes, Host, HostDialer};
use crate::k8s::{client_from_path, client_from_yaml, ClusterApi, KubeClusterApi};
use crate::options::Options;
use crate::plan::PlanContext;
use crate::rollout::{self, clean_host, current_members, Departure, Rollout, RolloutReport};
use crate::snapshot::{self, S3Store, SnapshotStore};
use crate::state::{
    load_from_hosts, read_state_file, rebuild_state, remove_state_file, save_to_hosts,
    write_state_file, KubeStateStore, StateStore,
};
use crate::{defaults, encryption, pki, portcheck, timecheck};
use log::{debug, info, warn};
use rke_model::config::{ClusterConfig, RotateCertificates};
use rke_model::constants::KUBE_ADMIN_CERT_NAME;
use rke_model::{validation, FullState, Node, NodePlan, Role, State};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Validates `input` and fills in every default.
pub fn prepare_config(input: &ClusterConfig) -> Result<ClusterConfig> {
    validation::validate(input).context(error::ModelSnafu)?;
    let config = defaults::apply(input)?;
    validation::validate_defaulted(&config).context(error::ModelSnafu)?;
    Ok(config)
}

/// Nodes of `previous` that lost roles in `current`. A node missing from `current` departs whole.
pub fn departures(previous: &ClusterConfig, current: &ClusterConfig) -> Vec<Departure> {
    let current_nodes = unique_nodes(&current.nodes);
    unique_nodes(&previous.nodes)
        .into_iter()
        .filter_map(|node| {
            let kept = current_nodes.iter().find(|n| n.address == node.address);
            let roles: Vec<Role> = match kept {
                Some(kept) => node
                    .role
                    .iter()
                    .filter(|role| !kept.role.contains(role))
                    .copied()
                    .collect(),
                None => node.role.clone(),
            };
            if roles.is_empty() {
                return None;
            }
            Some(Departure {
                whole: kept.is_none(),
                host: None,
                roles,
                node,
            })
        })
        .collect()
}

fn admin_kubeconfig(state: &State) -> Option<&str> {
    state
        .certificates_bundle
        .get(KUBE_ADMIN_CERT_NAME)
        .and_then(|entry| entry.config.as_deref())
}

/// Writes `contents` readable by the owner only.
fn write_private(path: &Path, contents: &[u8], what: &str) -> Result<()> {
    let io_context = || error::IoSnafu {
        component: Component::State,
        what: format!("write {} '{}'", what, path.display()),
    };
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).with_context(|_| io_context())?;
    file.write_all(contents).with_context(|_| io_context())
}

fn remove_file(path: &Path, what: &str) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(error::IoSnafu {
            component: Component::State,
            what: format!("remove {} '{}'", what, path.display()),
        }),
    }
}

fn host_list(hosts: &BTreeMap<String, Host>) -> Vec<Host> {
    hosts.values().cloned().collect()
}

/// Drives operations against one cluster.
pub struct Cluster {
    dialer: Arc<dyn HostDialer>,
    checker: Arc<dyn HealthChecker>,
    options: Options,
    cancel: CancellationToken,
    api: Option<Arc<dyn ClusterApi>>,
    state_store: Option<Arc<dyn StateStore>>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
}

impl Cluster {
    pub fn new(dialer: Arc<dyn HostDialer>, options: Options) -> Self {
        Self {
            dialer,
            checker: Arc::new(CurlChecker),
            options,
            cancel: CancellationToken::new(),
            api: None,
            state_store: None,
            snapshot_store: None,
        }
    }

    pub fn with_checker(mut self, checker: Arc<dyn HealthChecker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Uses `api` instead of a client built from the admin kubeconfig.
    pub fn with_cluster_api(mut self, api: Arc<dyn ClusterApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Uses `store` instead of the state secret in the cluster.
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Uses `store` instead of the S3 bucket from the etcd backup config.
    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Canceling the returned token stops any running operation at its next suspension point.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn check_canceled(&self, cancel: &CancellationToken, component: Component) -> Result<()> {
        ensure!(!cancel.is_cancelled(), error::CanceledSnafu { component });
        Ok(())
    }

    async fn cluster_api(&self, state: &State) -> Result<Option<Arc<dyn ClusterApi>>> {
        if let Some(api) = &self.api {
            return Ok(Some(Arc::clone(api)));
        }
        match admin_kubeconfig(state) {
            Some(kubeconfig) => {
                let client = client_from_yaml(kubeconfig).await?;
                Ok(Some(Arc::new(KubeClusterApi::new(client))))
            }
            None => Ok(None),
        }
    }

    async fn state_store(&self, state: &State) -> Result<Option<Arc<dyn StateStore>>> {
        if let Some(store) = &self.state_store {
            return Ok(Some(Arc::clone(store)));
        }
        match admin_kubeconfig(state) {
            Some(kubeconfig) => {
                let client = client_from_yaml(kubeconfig).await?;
                Ok(Some(Arc::new(KubeStateStore::new(
                    client,
                    self.options.update_state_timeout,
                ))))
            }
            None => Ok(None),
        }
    }

    async fn snapshot_store(&self, config: &ClusterConfig) -> Result<Option<Arc<dyn SnapshotStore>>> {
        if let Some(store) = &self.snapshot_store {
            return Ok(Some(Arc::clone(store)));
        }
        match config.services.etcd.s3() {
            Some(s3) => Ok(Some(Arc::new(S3Store::new(s3).await?))),
            None => Ok(None),
        }
    }

    /// The local state file, or the state saved in the cluster when there is none on disk, or
    /// the copy left on the hosts when the cluster has none either.
    async fn previous_state(&self, config: &ClusterConfig) -> Result<FullState> {
        if let Some(state) = read_state_file(&self.options.state_file_path())? {
            return Ok(state);
        }
        if self.options.use_local_state {
            return Ok(FullState::default());
        }
        let store: Option<Arc<dyn StateStore>> = match &self.state_store {
            Some(store) => Some(Arc::clone(store)),
            None => {
                let kubeconfig = self.options.kubeconfig_path();
                if kubeconfig.exists() {
                    let client = client_from_path(&kubeconfig).await?;
                    Some(Arc::new(KubeStateStore::new(
                        client,
                        self.options.update_state_timeout,
                    )))
                } else {
                    debug!("[state] No local state and no kubeconfig");
                    None
                }
            }
        };
        if let Some(store) = store {
            info!("[state] Reading cluster state from the cluster");
            if let Some(state) = store.load().await? {
                return Ok(state);
            }
        }
        Ok(self.state_from_hosts(config).await.unwrap_or_default())
    }

    /// Looks for a state copy on whichever configured hosts answer.
    async fn state_from_hosts(&self, config: &ClusterConfig) -> Option<FullState> {
        let mut hosts = Vec::new();
        for node in unique_nodes(&config.nodes) {
            match self.dialer.dial(&node).await {
                Ok(conn) => {
                    let docker = self.dialer.container_client(&node, Arc::clone(&conn));
                    hosts.push(Host { node, conn, docker });
                }
                Err(e) => debug!("[state] Skipping host '{}': {}", node.address, e),
            }
        }
        let state = load_from_hosts(&hosts, config).await;
        if state.is_none() {
            debug!("[state] No saved state anywhere, starting fresh");
        }
        state
    }

    /// Writes the state locally, then to the cluster, then onto every host.
    async fn save_state(
        &self,
        state: &FullState,
        config: &ClusterConfig,
        hosts: &BTreeMap<String, Host>,
    ) -> Result<()> {
        write_state_file(&self.options.state_file_path(), state)?;
        if let Some(store) = self.state_store(&state.current_state).await? {
            store.save(state).await?;
        }
        save_to_hosts(&host_list(hosts), config, state).await?;
        info!("[state] Saved cluster state");
        Ok(())
    }

    async fn dial(&self, nodes: &[Node]) -> Result<BTreeMap<String, Host>> {
        info!("[dialer] Connecting to {} host(s)", unique_nodes(nodes).len());
        dial_all(self.dialer.as_ref(), nodes).await
    }

    /// Dials each departed node that is not among `hosts`. A node that cannot be reached is kept
    /// without a host so its membership is still cleaned up.
    async fn attach_hosts(&self, departures: &mut [Departure], hosts: &BTreeMap<String, Host>) {
        for departure in departures.iter_mut() {
            if let Some(host) = hosts.get(&departure.node.address) {
                departure.host = Some(Host {
                    node: departure.node.clone(),
                    conn: Arc::clone(&host.conn),
                    docker: Arc::clone(&host.docker),
                });
                continue;
            }
            match self.dialer.dial(&departure.node).await {
                Ok(conn) => {
                    let docker = self
                        .dialer
                        .container_client(&departure.node, Arc::clone(&conn));
                    departure.host = Some(Host {
                        node: departure.node.clone(),
                        conn,
                        docker,
                    });
                }
                Err(e) => warn!(
                    "[dialer] Unable to reach departing host '{}': {}",
                    departure.node.address, e
                ),
            }
        }
    }

    async fn build_plans(
        &self,
        config: &ClusterConfig,
        encryption_config: &str,
        hosts: &BTreeMap<String, Host>,
    ) -> Result<BTreeMap<String, NodePlan>> {
        let members = current_members(hosts).await?;
        let root_dirs = docker_root_dirs(hosts).await;
        PlanContext::new(config, encryption_config)?
            .with_etcd_members(members)
            .with_docker_root_dirs(root_dirs)
            .build_cluster_plan()
    }

    fn rollout(
        &self,
        config: &ClusterConfig,
        plans: BTreeMap<String, NodePlan>,
        hosts: &BTreeMap<String, Host>,
        api: Option<Arc<dyn ClusterApi>>,
        cancel: &CancellationToken,
    ) -> Rollout {
        let rollout = Rollout::new(
            config.clone(),
            plans,
            hosts.clone(),
            Arc::clone(&self.checker),
            self.options.docker_wait_timeout,
            cancel.clone(),
        );
        match api {
            Some(api) => rollout.with_cluster_api(api),
            None => rollout,
        }
    }

    /// Brings the cluster to `input`.
    pub async fn up(&self, input: &ClusterConfig) -> Result<RolloutReport> {
        let config = prepare_config(input)?;
        self.deploy(config, false).await
    }

    /// Runs `up` with fresh leaves for `services` (every service when empty) and, with `ca`, a
    /// fresh authority. Every component restarts to pick them up.
    pub async fn rotate_certificates(
        &self,
        input: &ClusterConfig,
        services: Vec<String>,
        ca: bool,
    ) -> Result<RolloutReport> {
        let mut config = prepare_config(input)?;
        info!(
            "[pki] Rotating certificates for {}{}",
            if services.is_empty() {
                "all services".to_string()
            } else {
                services.join(", ")
            },
            if ca { " and the CA" } else { "" }
        );
        config.rotate_certificates = Some(RotateCertificates {
            ca_certificates: ca,
            services,
        });
        self.deploy(config, true).await
    }

    async fn deploy(&self, config: ClusterConfig, restart_all: bool) -> Result<RolloutReport> {
        let cancel = self.cancel.child_token();
        let mut state = self.previous_state(&config).await?;

        info!("[pki] Building the desired state");
        let desired = {
            let config = config.clone();
            let previous = state.clone();
            let options = self.options.clone();
            tokio::task::spawn_blocking(move || rebuild_state(&config, &previous, &options))
                .await
                .context(error::JoinSnafu {
                    component: Component::Pki,
                })??
        };

        if self.options.generate_csr {
            let dir = self
                .options
                .cert_dir
                .as_deref()
                .context(error::ConfigInvalidSnafu {
                    message: "generating signing requests needs a certificate directory",
                })?;
            pki::write_csrs(dir, &desired.certificates_bundle)?;
            info!("[pki] Wrote signing requests to '{}'", dir.display());
            return Ok(RolloutReport::default());
        }
        if self.options.custom_certs {
            pki::validate_bundle(&desired.certificates_bundle)?;
        }
        state.desired_state = desired;
        write_state_file(&self.options.state_file_path(), &state)?;

        let hosts = self.dial(&config.nodes).await?;
        let all = host_list(&hosts);
        self.check_canceled(&cancel, Component::Time)?;
        timecheck::check_time(&all, &config, self.options.docker_wait_timeout).await?;
        if self.options.disable_port_check {
            info!("[network] Port checks disabled");
        } else {
            portcheck::check_ports(&all, &config, self.options.docker_wait_timeout).await?;
        }

        self.check_canceled(&cancel, Component::Pki)?;
        pki::deploy_certificates(
            &all,
            &config,
            &state.desired_state.certificates_bundle,
            self.options.docker_wait_timeout,
            &cancel,
        )
        .await?;

        let plans = self
            .build_plans(&config, &state.desired_state.encryption_config, &hosts)
            .await?;
        let api = self.cluster_api(&state.desired_state).await?;
        let rollout = self.rollout(&config, plans, &hosts, api.clone(), &cancel);
        let report = rollout.run().await?;
        if restart_all {
            rollout.restart_all().await?;
        }

        if self.options.update_only {
            info!("[worker] Update only, hosts that left the config are kept");
        } else if let Some(previous) = &state.current_state.rke_config {
            let mut departures = departures(previous, &config);
            if !departures.is_empty() {
                self.attach_hosts(&mut departures, &hosts).await;
                rollout.remove_departed(departures).await?;
            }
        }

        state.current_state = state.desired_state.clone();
        self.save_state(&state, &config, &hosts).await?;
        if let Some(kubeconfig) = admin_kubeconfig(&state.current_state) {
            let path = self.options.kubeconfig_path();
            write_private(&path, kubeconfig.as_bytes(), "kubeconfig")?;
            info!("[state] Wrote admin kubeconfig '{}'", path.display());
        }
        info!("Finished building the cluster");
        Ok(report)
    }

    /// Tears every component off every host and forgets the cluster.
    pub async fn remove(&self, input: &ClusterConfig) -> Result<()> {
        let config = prepare_config(input)?;
        let cancel = self.cancel.child_token();
        let hosts = self.dial(&config.nodes).await?;
        self.check_canceled(&cancel, Component::Worker)?;
        let wait_timeout = self.options.docker_wait_timeout;
        let config_ref = &config;
        let cleans = hosts.values().map(|host| async move {
            (host, clean_host(host, config_ref, wait_timeout).await)
        });
        let failures: Vec<HostError> = futures::future::join_all(cleans)
            .await
            .into_iter()
            .filter_map(|(host, result)| {
                result.err().map(|error| HostError {
                    host: host.address().to_string(),
                    error,
                })
            })
            .collect();
        if !failures.is_empty() {
            return error::PartialFailureSnafu {
                component: Component::Worker,
                failures: HostErrors(failures),
            }
            .fail();
        }
        remove_state_file(&self.options.state_file_path())?;
        remove_file(&self.options.kubeconfig_path(), "kubeconfig")?;
        info!("Removed the cluster from {} host(s)", hosts.len());
        Ok(())
    }

    /// Adds a fresh primary key, makes every secret use it, then drops the old keys.
    pub async fn rotate_encryption_key(&self, input: &ClusterConfig) -> Result<()> {
        let config = prepare_config(input)?;
        let kube_api = &config.services.kube_api;
        ensure!(
            kube_api.encryption_enabled(),
            error::ConfigInvalidSnafu {
                message: "encryption at rest is not enabled",
            }
        );
        ensure!(
            kube_api
                .secrets_encryption_config
                .as_ref()
                .map(|c| c.custom_config.is_none())
                .unwrap_or(true),
            error::ConfigInvalidSnafu {
                message: "a custom encryption config is rotated by editing it",
            }
        );
        let cancel = self.cancel.child_token();
        let mut state = self.previous_state(&config).await?;
        ensure!(
            !state.current_state.encryption_config.is_empty(),
            error::ConfigInvalidSnafu {
                message: "the cluster has no encryption config yet, run up first",
            }
        );
        let api = self
            .cluster_api(&state.current_state)
            .await?
            .context(error::ConfigInvalidSnafu {
                message: "the cluster state holds no admin kubeconfig",
            })?;
        let hosts = self.dial(&config.nodes).await?;

        let rotated = encryption::with_new_key(
            &state.current_state.encryption_config,
            chrono::Utc::now().timestamp(),
        )?;
        info!(
            "[controlplane] Rotating to encryption key '{}'",
            encryption::primary_key_name(&rotated)?
        );
        self.apply_encryption(&config, &rotated, &hosts, &api, &cancel)
            .await?;

        self.check_canceled(&cancel, Component::Controlplane)?;
        let rewritten = api.rewrite_secrets().await?;
        info!("[controlplane] Rewrote {} secret(s) with the new key", rewritten);

        let pruned = encryption::without_old_keys(&rotated)?;
        self.apply_encryption(&config, &pruned, &hosts, &api, &cancel)
            .await?;

        state.desired_state.encryption_config = pruned.clone();
        state.current_state.encryption_config = pruned;
        self.save_state(&state, &config, &hosts).await
    }

    async fn apply_encryption(
        &self,
        config: &ClusterConfig,
        encryption_config: &str,
        hosts: &BTreeMap<String, Host>,
        api: &Arc<dyn ClusterApi>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let plans = self.build_plans(config, encryption_config, hosts).await?;
        self.rollout(config, plans, hosts, Some(Arc::clone(api)), cancel)
            .run()
            .await?;
        Ok(())
    }

    /// Saves a snapshot on every etcd host and returns its name.
    pub async fn snapshot_save(&self, input: &ClusterConfig, name: Option<&str>) -> Result<String> {
        let config = prepare_config(input)?;
        let name = name
            .map(snapshot::normalize_name)
            .unwrap_or_else(snapshot::default_name);
        let state = read_state_file(&self.options.state_file_path())?.unwrap_or_default();
        let etcd_nodes: Vec<Node> = unique_nodes(&config.nodes)
            .into_iter()
            .filter(Node::is_etcd)
            .collect();
        let hosts = self.dial(&etcd_nodes).await?;
        let context = PlanContext::new(&config, &state.desired_state.encryption_config)?;
        let plans = etcd_nodes
            .iter()
            .map(|node| Ok((node.address.clone(), context.build_plan(node)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let store = self.snapshot_store(&config).await?;
        snapshot::save(
            &host_list(&hosts),
            &config,
            &plans,
            &name,
            &state,
            store.as_deref(),
            self.options.docker_wait_timeout,
        )
        .await?;
        Ok(name)
    }

    /// Restores etcd from `name`, brings the rest of the cluster back up around it and drops the
    /// node objects of hosts that are no longer configured.
    pub async fn snapshot_restore(&self, input: &ClusterConfig, name: &str) -> Result<RolloutReport> {
        let name = snapshot::normalize_name(name);
        let config = prepare_config(input)?;
        let cancel = self.cancel.child_token();
        let hosts = self.dial(&config.nodes).await?;
        let all = host_list(&hosts);
        let store = self.snapshot_store(&config).await?;

        let archived = if self.options.use_local_state {
            None
        } else {
            match snapshot::state_from_snapshot(&all, &config, &name, store.as_deref()).await {
                Ok(state) => state,
                Err(e) => {
                    warn!("[snapshot] No state in snapshot '{}', using local state: {}", name, e);
                    None
                }
            }
        };
        let mut state = match archived {
            Some(state) => state,
            None => read_state_file(&self.options.state_file_path())?.context(
                error::RestoreFailedSnafu {
                    name: name.as_str(),
                    message: "neither the snapshot nor the local state file holds a cluster state",
                },
            )?,
        };
        pki::validate_bundle(&state.desired_state.certificates_bundle)?;

        let mut stale: Vec<Departure> = state
            .current_state
            .rke_config
            .as_ref()
            .map(|previous| {
                departures(previous, &config)
                    .into_iter()
                    .filter(|d| d.whole)
                    .collect()
            })
            .unwrap_or_default();
        state.current_state = State::default();
        write_state_file(&self.options.state_file_path(), &state)?;

        pki::deploy_certificates(
            &all,
            &config,
            &state.desired_state.certificates_bundle,
            self.options.docker_wait_timeout,
            &cancel,
        )
        .await?;
        let archive = snapshot::fetch(&all, &config, &name, store.as_deref()).await?;
        let plans = PlanContext::new(&config, &state.desired_state.encryption_config)?
            .build_cluster_plan()?;
        snapshot::restore(
            &all,
            &config,
            &plans,
            &name,
            &archive,
            self.checker.as_ref(),
            rollout::health_timeout(&config),
            self.options.docker_wait_timeout,
            &cancel,
        )
        .await?;

        let report = self.deploy(config.clone(), false).await?;
        let api = self.cluster_api(&state.desired_state).await?;
        if !stale.is_empty() {
            // The restored state has no record of these hosts, so the nested bring-up kept them.
            info!(
                "[snapshot] Cleaning {} host(s) that left the config",
                stale.len()
            );
            self.attach_hosts(&mut stale, &hosts).await;
            self.rollout(&config, plans, &hosts, api.clone(), &cancel)
                .remove_departed(stale)
                .await?;
        }
        if let Some(api) = api {
            api.restart_system_deployments().await?;
        }
        info!("[snapshot] Restored snapshot '{}'", name);
        Ok(report)
    }

    /// Deletes `name` from every etcd host and from the snapshot store.
    pub async fn snapshot_remove(&self, input: &ClusterConfig, name: &str) -> Result<()> {
        let name = snapshot::normalize_name(name);
        let config = prepare_config(input)?;
        let etcd_nodes: Vec<Node> = unique_nodes(&config.nodes)
            .into_iter()
            .filter(Node::is_etcd)
            .collect();
        let hosts = self.dial(&etcd_nodes).await?;
        let store = self.snapshot_store(&config).await?;
        snapshot::remove(&host_list(&hosts), &config, &name, store.as_deref()).await?;
        info!("[snapshot] Removed snapshot '{}'", name);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn node(address: &str, roles: &[Role]) -> Node {
        Node {
            address: address.to_string(),
            role: roles.to_vec(),
            ..Default::default()
        }
    }

    fn config(nodes: Vec<Node>) -> ClusterConfig {
        ClusterConfig {
            nodes,
            ..Default::default()
        }
    }

    #[test]
    fn departed_nodes_and_roles() {
        let previous = config(vec![
            node("10.0.0.1", &[Role::Etcd, Role::Controlplane]),
            node("10.0.0.2", &[Role::Worker]),
            node("10.0.0.3", &[Role::Worker]),
        ]);
        let current = config(vec![
            node("10.0.0.1", &[Role::Controlplane]),
            node("10.0.0.3", &[Role::Worker]),
        ]);
        let departed = departures(&previous, &current);
        assert_eq!(departed.len(), 2);
        assert_eq!(departed[0].node.address, "10.0.0.1");
        assert_eq!(departed[0].roles, vec![Role::Etcd]);
        assert!(!departed[0].whole);
        assert_eq!(departed[1].node.address, "10.0.0.2");
        assert!(departed[1].whole);
    }

    #[test]
    fn unchanged_config_departs_nothing() {
        let nodes = config(vec![node("10.0.0.1", &[Role::Etcd, Role::Worker])]);
        assert!(departures(&nodes, &nodes).is_empty());
    }

    #[test]
    fn kubeconfig_is_private() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kube_config_cluster.yml");
        write_private(&path, b"apiVersion: v1\n", "kubeconfig").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"apiVersion: v1\n");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        remove_file(&path, "kubeconfig").unwrap();
        remove_file(&path, "kubeconfig").unwrap();
    }

    #[test]
    fn config_without_hosts_is_refused() {
        assert!(prepare_config(&ClusterConfig::default()).is_err());
    }
}
