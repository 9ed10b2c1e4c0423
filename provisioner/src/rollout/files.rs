//! Places each host's side files before any phase starts. A file whose current contents already
//! match is not rewritten.

use super::Rollout;
use crate::error::{self, Component, HostError, HostErrors, Result};
use crate::hosts::{run_once, Host};
use crate::plan::registry_auth;
use log::{debug, info};
use rke_model::config::ClusterConfig;
use rke_model::constants::{
    ADMISSION_CONFIG_FILE_PATH, ENCRYPTION_PROVIDER_FILE_PATH, FILE_DEPLOYER_CONTAINER,
};
use rke_model::{File, Process};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

const FILE_MODE: u32 = 0o600;

/// The apiserver reads these only at startup and has no checksum in its environment.
fn needs_apiserver_restart(file: &File) -> bool {
    file.name.ends_with(ENCRYPTION_PROVIDER_FILE_PATH) || file.name.ends_with(ADMISSION_CONFIG_FILE_PATH)
}

/// A one-shot container that decodes `file` into place. The file's directory is bound at the same
/// path, so the name is used as is.
pub fn file_deployer(config: &ClusterConfig, file: &File) -> Process {
    let dir = Path::new(&file.name)
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "/".to_string());
    let image = config.system_images.alpine.clone();
    Process {
        name: FILE_DEPLOYER_CONTAINER.to_string(),
        command: vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "echo \"$FILE_CONTENTS\" | base64 -d > {0} && chmod {1:o} {0}",
                file.name, FILE_MODE
            ),
        ],
        env: vec![format!("FILE_CONTENTS={}", file.contents)],
        binds: vec![format!("{0}:{0}:z", dir)],
        image_registry_auth_config: registry_auth(config, &image),
        image,
        restart_policy: "no".to_string(),
        ..Default::default()
    }
}

/// Whether the host already holds `file`. Unreadable files count as different.
async fn is_current(host: &Host, file: &File) -> bool {
    let wanted = match base64::decode(&file.contents) {
        Ok(wanted) => wanted,
        Err(_) => return false,
    };
    matches!(host.conn.read_file(&file.name).await, Ok(current) if current == wanted)
}

async fn deploy(host: &Host, config: &ClusterConfig, file: &File, wait_timeout: Duration) -> Result<()> {
    info!("[worker] Writing '{}' on host '{}'", file.name, host.address());
    if host.node.is_windows() {
        let contents = base64::decode(&file.contents).map_err(|e| error::Error::ConfigInvalid {
            message: format!("file '{}' is not base64: {}", file.name, e),
        })?;
        return host.conn.write_file(&file.name, &contents, FILE_MODE).await;
    }
    run_once(host, &file_deployer(config, file), wait_timeout, Component::Worker).await?;
    Ok(())
}

/// Writes the files of one host. Returns whether the apiserver must restart to read them.
async fn sync_host(host: &Host, config: &ClusterConfig, files: &[File], wait_timeout: Duration) -> Result<bool> {
    let mut restart = false;
    for file in files {
        if is_current(host, file).await {
            debug!("[worker] '{}' is current on host '{}'", file.name, host.address());
            continue;
        }
        deploy(host, config, file, wait_timeout).await?;
        restart |= needs_apiserver_restart(file);
    }
    Ok(restart)
}

/// Syncs every host's files concurrently. Returns the addresses whose apiserver must restart.
pub(super) async fn sync_files(rollout: &Rollout, wait_timeout: Duration) -> Result<BTreeSet<String>> {
    let syncs = rollout.hosts.values().filter_map(|host| {
        let plan = rollout.plans.get(host.address())?;
        let config = rollout.config.as_ref();
        Some(async move { (host, sync_host(host, config, &plan.files, wait_timeout).await) })
    });
    let mut restart = BTreeSet::new();
    let mut failures = Vec::new();
    for (host, result) in futures::future::join_all(syncs).await {
        match result {
            Ok(true) => {
                restart.insert(host.address().to_string());
            }
            Ok(false) => {}
            Err(error) => failures.push(HostError {
                host: host.address().to_string(),
                error,
            }),
        }
    }
    if !failures.is_empty() {
        return error::PartialFailureSnafu {
            component: Component::Worker,
            failures: HostErrors(failures),
        }
        .fail();
    }
    Ok(restart)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deployer_decodes_into_the_bound_directory() {
        let file = File::new("/opt/rke/etc/kubernetes/encryption.yaml", "kind: x\n");
        let process = file_deployer(&ClusterConfig::default(), &file);
        assert_eq!(process.binds, vec!["/opt/rke/etc/kubernetes:/opt/rke/etc/kubernetes:z"]);
        assert_eq!(
            process.command[2],
            "echo \"$FILE_CONTENTS\" | base64 -d > /opt/rke/etc/kubernetes/encryption.yaml \
             && chmod 600 /opt/rke/etc/kubernetes/encryption.yaml"
        );
        assert_eq!(process.env, vec![format!("FILE_CONTENTS={}", file.contents)]);
        assert_eq!(process.restart_policy, "no");
    }

    #[test]
    fn only_startup_files_restart_the_apiserver() {
        assert!(needs_apiserver_restart(&File::new(
            "/etc/kubernetes/encryption.yaml",
            ""
        )));
        assert!(needs_apiserver_restart(&File::new(
            "/etc/kubernetes/admission.yaml",
            ""
        )));
        assert!(!needs_apiserver_restart(&File::new(
            "/etc/kubernetes/cloud-config",
            ""
        )));
    }
}
