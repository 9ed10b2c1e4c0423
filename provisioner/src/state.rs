/*!

Where the cluster state lives between runs. The authoritative copy is the `full-cluster-state`
secret in the target cluster; a copy is kept next to the config file so a cluster whose API is
down can still be restored or removed.

!*/

use crate::error::{self, Component, HostError, HostErrors, Result};
use crate::hosts::Host;
use crate::k8s::{create_or_update, delete_if_present, HttpStatusCode};
use crate::options::Options;
use crate::plan::host_path;
use crate::{encryption, pki};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{Api, Client};
use log::{debug, info, warn};
use maplit::btreemap;
use rke_model::config::ClusterConfig;
use rke_model::constants::{FULL_STATE_NAME, NODE_STATE_PATH, SYSTEM_NAMESPACE};
use rke_model::{FullState, State};
use snafu::{OptionExt, ResultExt};
use std::fs;
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

pub const STATE_SAVE_BACKOFF: Duration = Duration::from_secs(5);

/// Loads and saves the cluster state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// `None` when the cluster has no state yet.
    async fn load(&self) -> Result<Option<FullState>>;

    async fn save(&self, state: &FullState) -> Result<()>;
}

/// The state secret in the system namespace, falling back to the legacy configmap on read.
pub struct KubeStateStore {
    client: Client,
    update_timeout: Duration,
}

impl KubeStateStore {
    pub fn new(client: Client, update_timeout: Duration) -> Self {
        Self {
            client,
            update_timeout,
        }
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), SYSTEM_NAMESPACE)
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), SYSTEM_NAMESPACE)
    }

    async fn load_legacy(&self) -> Result<Option<FullState>> {
        let config_map = match self.config_maps().get(FULL_STATE_NAME).await {
            Ok(config_map) => config_map,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => {
                return Err(e).context(error::KubeSnafu {
                    component: Component::State,
                    what: "read legacy state configmap",
                })
            }
        };
        let text = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(FULL_STATE_NAME))
            .context(error::StateMissingKeySnafu {
                location: "configmap",
            })?;
        info!("[state] Read cluster state from the legacy configmap");
        let state = State::parse(text).context(error::StateCorruptSnafu)?;
        Ok(Some(FullState::from_legacy(state)))
    }

    async fn save_once(&self, text: &str) -> Result<()> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(FULL_STATE_NAME.to_string()),
                namespace: Some(SYSTEM_NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(btreemap! {
                FULL_STATE_NAME.to_string() => ByteString(text.as_bytes().to_vec())
            }),
            ..Default::default()
        };
        create_or_update(&self.secrets(), secret, "cluster state secret", Component::State).await?;
        delete_if_present(
            &self.config_maps(),
            FULL_STATE_NAME,
            "legacy state configmap",
            Component::State,
        )
        .await
    }
}

#[async_trait]
impl StateStore for KubeStateStore {
    async fn load(&self) -> Result<Option<FullState>> {
        let secret = match self.secrets().get(FULL_STATE_NAME).await {
            Ok(secret) => secret,
            Err(e) if e.is_not_found() => return self.load_legacy().await,
            Err(e) => {
                return Err(e).context(error::KubeSnafu {
                    component: Component::State,
                    what: "read state secret",
                })
            }
        };
        let bytes = secret
            .data
            .as_ref()
            .and_then(|data| data.get(FULL_STATE_NAME))
            .context(error::StateMissingKeySnafu { location: "secret" })?;
        let text = String::from_utf8_lossy(&bytes.0);
        FullState::parse(&text)
            .context(error::StateCorruptSnafu)
            .map(Some)
    }

    async fn save(&self, state: &FullState) -> Result<()> {
        let text = state.render().context(error::StateCorruptSnafu)?;
        retry_until(self.update_timeout, STATE_SAVE_BACKOFF, || self.save_once(&text)).await?;
        info!("[state] Saved cluster state to secret '{}'", FULL_STATE_NAME);
        Ok(())
    }
}

/// Runs `attempt` until it succeeds, pausing `backoff` between tries. A failure that is not worth
/// retrying is returned at once. Once `timeout` has elapsed the last failure is returned wrapped in
/// `StateTimeout`.
pub(crate) async fn retry_until<F, Fut>(timeout: Duration, backoff: Duration, mut attempt: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let start = Instant::now();
    loop {
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if start.elapsed() + backoff > timeout => {
                return Err(e).context(error::StateTimeoutSnafu {
                    seconds: timeout.as_secs(),
                })
            }
            Err(e) => {
                warn!("[state] Failed to save cluster state, retrying: {}", e);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Reads the local state file. A missing file is not an error.
pub fn read_state_file(path: &Path) -> Result<Option<FullState>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("[state] No local state file at '{}'", path.display());
            return Ok(None);
        }
        Err(e) => {
            return Err(e).context(error::StateFileSnafu {
                action: "read",
                path: path.display().to_string(),
            })
        }
    };
    FullState::parse(&text)
        .context(error::StateCorruptSnafu)
        .map(Some)
}

/// Writes the local state file, readable by the owner only.
pub fn write_state_file(path: &Path, state: &FullState) -> Result<()> {
    let text = state.render().context(error::StateCorruptSnafu)?;
    let file_context = || error::StateFileSnafu {
        action: "write",
        path: path.display().to_string(),
    };
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        // `mode` only applies to new files.
        if path.exists() {
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .with_context(|_| file_context())?;
        }
    }
    let mut file = options.open(path).with_context(|_| file_context())?;
    file.write_all(text.as_bytes())
        .with_context(|_| file_context())?;
    debug!("[state] Wrote local state file '{}'", path.display());
    Ok(())
}

/// Copies the state onto every host, owner-readable, as a last-resort backup for when both the
/// local file and the secret are lost.
pub async fn save_to_hosts(hosts: &[Host], config: &ClusterConfig, state: &FullState) -> Result<()> {
    let text = state.render().context(error::StateCorruptSnafu)?;
    info!("[state] Saving cluster state to {} host(s)", hosts.len());
    let text = &text;
    let writes = hosts.iter().map(|host| async move {
        let path = host_path(config, &host.node, NODE_STATE_PATH);
        (host, host.conn.write_file(&path, text.as_bytes(), 0o600).await)
    });
    let failures: Vec<HostError> = futures::future::join_all(writes)
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
            component: Component::State,
            failures: HostErrors(failures),
        }
        .fail();
    }
    Ok(())
}

/// The first readable copy of the state saved by [`save_to_hosts`].
pub async fn load_from_hosts(hosts: &[Host], config: &ClusterConfig) -> Option<FullState> {
    for host in hosts {
        let path = host_path(config, &host.node, NODE_STATE_PATH);
        let bytes = match host.conn.read_file(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("[state] No state on host '{}': {}", host.address(), e);
                continue;
            }
        };
        match FullState::parse(&String::from_utf8_lossy(&bytes)) {
            Ok(state) => {
                info!("[state] Recovered cluster state from host '{}'", host.address());
                return Some(state);
            }
            Err(e) => warn!(
                "[state] Ignoring unreadable state on host '{}': {}",
                host.address(),
                e
            ),
        }
    }
    None
}

pub fn remove_state_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(error::StateFileSnafu {
            action: "remove",
            path: path.display().to_string(),
        }),
    }
}

/// Computes the desired state for `config`: the certificate bundle (generated, refreshed,
/// loaded from a directory or turned into signing requests) and the encryption provider config.
/// Whatever the previous desired state holds is re-used.
pub fn rebuild_state(config: &ClusterConfig, previous: &FullState, options: &Options) -> Result<State> {
    let prior = if previous.desired_state.certificates_bundle.is_empty() {
        &previous.current_state
    } else {
        &previous.desired_state
    };
    let bundle = if options.custom_certs {
        let dir = options
            .cert_dir
            .as_deref()
            .context(error::ConfigInvalidSnafu {
                message: "custom certificates need a certificate directory",
            })?;
        pki::load_dir(dir, config)?
    } else if options.generate_csr {
        pki::generate_csrs(config, &prior.certificates_bundle)?
    } else {
        pki::generate(
            config,
            &prior.certificates_bundle,
            config.rotate_certificates.as_ref(),
        )?
    };
    let encryption_config = encryption::resolve(config, &prior.encryption_config)?;
    Ok(State {
        rke_config: Some(config.clone()),
        certificates_bundle: bundle,
        encryption_config,
    })
}
