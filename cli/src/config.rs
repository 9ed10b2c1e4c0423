use crate::common::read_config;
use anyhow::{Context, Result};
use clap::Parser;
use rke_model::ClusterConfig;
use std::path::PathBuf;

/// Prints the cluster config.
#[derive(Debug, Parser)]
pub(crate) struct Config {
    #[clap(long = "config", env = "RKE_CONFIG", default_value = "cluster.yml")]
    config: PathBuf,

    /// Print the config with every default filled in. Without a config file, the defaults of an
    /// empty config are printed.
    #[clap(long = "print-defaults")]
    print_defaults: bool,
}

impl Config {
    pub(crate) fn run(self) -> Result<()> {
        let config = if self.config.exists() {
            read_config(&self.config)?
        } else {
            ClusterConfig::default()
        };
        let config = if self.print_defaults {
            rke_provisioner::defaults::apply(&config).context("Unable to apply defaults")?
        } else {
            config
        };
        print!("{}", config.to_yaml().context("Unable to render the config")?);
        Ok(())
    }
}
