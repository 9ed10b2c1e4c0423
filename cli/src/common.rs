use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use rke_model::config::{BackupConfig, S3BackupConfig};
use rke_model::ClusterConfig;
use rke_provisioner::hosts::SshDialer;
use rke_provisioner::options::{DEFAULT_DOCKER_WAIT_TIMEOUT, DEFAULT_SSH_DIAL_TIMEOUT};
use rke_provisioner::{Cluster, Options};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Flags every subcommand that talks to the cluster shares.
#[derive(Debug, Parser)]
pub(crate) struct ClusterArgs {
    /// Path to the cluster config file.
    #[clap(long = "config", env = "RKE_CONFIG", default_value = "cluster.yml")]
    pub(crate) config: PathBuf,

    /// Seconds to wait for an SSH connection.
    #[clap(long = "ssh-timeout-seconds")]
    ssh_timeout_seconds: Option<u64>,

    /// Seconds to wait for a one-shot container to exit.
    #[clap(long = "docker-timeout-seconds")]
    docker_timeout_seconds: Option<u64>,
}

impl ClusterArgs {
    pub(crate) fn load_config(&self) -> Result<ClusterConfig> {
        read_config(&self.config)
    }

    pub(crate) fn options(&self) -> Options {
        Options {
            config_path: self.config.clone(),
            ssh_dial_timeout: self
                .ssh_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SSH_DIAL_TIMEOUT),
            docker_wait_timeout: self
                .docker_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_DOCKER_WAIT_TIMEOUT),
            ..Default::default()
        }
    }
}

pub(crate) fn read_config(path: &Path) -> Result<ClusterConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Unable to read cluster config '{}'", path.display()))?;
    ClusterConfig::from_yaml(&text)
        .with_context(|| format!("Unable to parse cluster config '{}'", path.display()))
}

/// A driver for `config` that cancels its running operation on Ctrl-C.
pub(crate) fn cluster(config: &ClusterConfig, options: Options) -> Cluster {
    let dialer = SshDialer::new(options.ssh_dial_timeout, config.bastion_host.clone());
    let cluster = Cluster::new(Arc::new(dialer), options);
    let cancel = cluster.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current step");
            cancel.cancel();
        }
    });
    cluster
}

/// S3 flags of the snapshot subcommands. They override the backup config in the cluster file.
#[derive(Debug, Parser)]
pub(crate) struct S3Args {
    /// Mirror snapshots to an S3 compatible store.
    #[clap(long = "s3")]
    s3: bool,

    #[clap(long = "s3-endpoint", requires = "s3")]
    endpoint: Option<String>,

    #[clap(long = "bucket-name", requires = "s3")]
    bucket_name: Option<String>,

    #[clap(long = "access-key", requires = "s3")]
    access_key: Option<String>,

    #[clap(long = "secret-key", requires = "s3")]
    secret_key: Option<String>,

    #[clap(long = "region", requires = "s3")]
    region: Option<String>,

    #[clap(long = "folder", requires = "s3")]
    folder: Option<String>,

    /// A PEM file with the CA that signed the endpoint's certificate.
    #[clap(long = "s3-endpoint-ca", requires = "s3")]
    endpoint_ca: Option<PathBuf>,
}

impl S3Args {
    pub(crate) fn apply(&self, config: &mut ClusterConfig) -> Result<()> {
        if !self.s3 {
            return Ok(());
        }
        let backup = config
            .services
            .etcd
            .backup_config
            .get_or_insert_with(BackupConfig::default);
        let s3 = backup
            .s3backupconfig
            .get_or_insert_with(S3BackupConfig::default);
        let overrides = [
            (&self.endpoint, &mut s3.endpoint),
            (&self.bucket_name, &mut s3.bucket_name),
            (&self.access_key, &mut s3.access_key),
            (&self.secret_key, &mut s3.secret_key),
            (&self.region, &mut s3.region),
            (&self.folder, &mut s3.folder),
        ];
        for (flag, field) in overrides {
            if let Some(value) = flag {
                *field = value.clone();
            }
        }
        if let Some(path) = &self.endpoint_ca {
            s3.custom_ca = std::fs::read_to_string(path)
                .with_context(|| format!("Unable to read S3 CA file '{}'", path.display()))?;
        }
        info!("Using S3 bucket '{}'", s3.bucket_name);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn s3_flags_override_the_config() {
        let args = S3Args::parse_from([
            "s3",
            "--s3",
            "--bucket-name",
            "backups",
            "--region",
            "eu-west-1",
        ]);
        let mut config = ClusterConfig::default();
        args.apply(&mut config).unwrap();
        let s3 = config.services.etcd.s3().unwrap();
        assert_eq!(s3.bucket_name, "backups");
        assert_eq!(s3.region, "eu-west-1");
        assert!(s3.endpoint.is_empty());
    }

    #[test]
    fn without_s3_the_config_is_untouched() {
        let args = S3Args::parse_from(["s3"]);
        let mut config = ClusterConfig::default();
        args.apply(&mut config).unwrap();
        assert!(config.services.etcd.backup_config.is_none());
    }
}
