use crate::common::{self, ClusterArgs};
use anyhow::{Context, Result};
use clap::Parser;
use rke_model::Role;
use std::path::PathBuf;

/// Brings the cluster in line with the config file.
#[derive(Debug, Parser)]
pub(crate) struct Up {
    #[clap(flatten)]
    cluster: ClusterArgs,

    /// Skip the pre-flight port checks between hosts.
    #[clap(long = "disable-port-check")]
    disable_port_check: bool,

    /// Only deploy to new or changed hosts; hosts that left the config are kept.
    #[clap(long = "update-only")]
    update_only: bool,

    /// Directory holding custom certificates, or receiving signing requests.
    #[clap(long = "cert-dir")]
    cert_dir: Option<PathBuf>,

    /// Use the certificates in `--cert-dir` instead of generating them.
    #[clap(long = "custom-certs", requires = "cert_dir")]
    custom_certs: bool,

    /// Write signing requests and keys to `--cert-dir` and stop.
    #[clap(long = "generate-csr", conflicts_with = "custom_certs")]
    generate_csr: bool,
}

impl Up {
    pub(crate) async fn run(self) -> Result<()> {
        let config = self.cluster.load_config()?;
        let mut options = self.cluster.options();
        options.disable_port_check = self.disable_port_check;
        options.update_only = self.update_only;
        options.custom_certs = self.custom_certs;
        options.generate_csr = self.generate_csr;
        options.cert_dir = self.cert_dir;
        let cluster = common::cluster(&config, options);
        let report = cluster
            .up(&config)
            .await
            .context("Unable to bring the cluster up")?;
        for role in [Role::Etcd, Role::Controlplane, Role::Worker] {
            let updated = report.updated(role);
            if !updated.is_empty() {
                println!("Updated {} host(s): {}", role, updated.join(", "));
            }
        }
        println!(
            "Cluster is up. Kubeconfig: {}",
            cluster.options().kubeconfig_path().display()
        );
        Ok(())
    }
}
