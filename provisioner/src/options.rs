use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ADDON_JOB_TIMEOUT: Duration = Duration::from_secs(45);
pub const DEFAULT_DOCKER_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_UPDATE_STATE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_SSH_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime knobs that are not part of the cluster description.
#[derive(Debug, Clone)]
pub struct Options {
    /// Path of the cluster config file; the state file and admin kubeconfig live next to it.
    pub config_path: PathBuf,
    pub docker_wait_timeout: Duration,
    pub update_state_timeout: Duration,
    pub ssh_dial_timeout: Duration,
    pub disable_port_check: bool,
    /// Only deploy to hosts whose plans changed or are new; skip removal of absent hosts.
    pub update_only: bool,
    /// Load certificates from `cert_dir` instead of generating them.
    pub custom_certs: bool,
    pub cert_dir: Option<PathBuf>,
    /// Produce CSRs and keys instead of signed leaves.
    pub generate_csr: bool,
    pub use_local_state: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(rke_model::constants::DEFAULT_CLUSTER_CONFIG),
            docker_wait_timeout: DEFAULT_DOCKER_WAIT_TIMEOUT,
            update_state_timeout: DEFAULT_UPDATE_STATE_TIMEOUT,
            ssh_dial_timeout: DEFAULT_SSH_DIAL_TIMEOUT,
            disable_port_check: false,
            update_only: false,
            custom_certs: false,
            cert_dir: None,
            generate_csr: false,
            use_local_state: false,
        }
    }
}

impl Options {
    /// `cluster.rkestate` for `cluster.yml`.
    pub fn state_file_path(&self) -> PathBuf {
        state_file_path(&self.config_path)
    }

    /// `kube_config_cluster.yml` for `cluster.yml`.
    pub fn kubeconfig_path(&self) -> PathBuf {
        kubeconfig_path(&self.config_path)
    }
}

pub fn state_file_path(config_path: &Path) -> PathBuf {
    let stem = config_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cluster".to_string());
    config_path.with_file_name(format!(
        "{}.{}",
        stem,
        rke_model::constants::STATE_FILE_EXTENSION
    ))
}

pub fn kubeconfig_path(config_path: &Path) -> PathBuf {
    let name = config_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| rke_model::constants::DEFAULT_CLUSTER_CONFIG.to_string());
    config_path.with_file_name(format!(
        "{}{}",
        rke_model::constants::KUBE_ADMIN_CONFIG_PREFIX,
        name
    ))
}

#[test]
fn derived_paths() {
    let path = Path::new("/work/prod.yml");
    assert_eq!(state_file_path(path), PathBuf::from("/work/prod.rkestate"));
    assert_eq!(kubeconfig_path(path), PathBuf::from("/work/kube_config_prod.yml"));
    let options = Options::default();
    assert_eq!(options.state_file_path(), PathBuf::from("cluster.rkestate"));
}
