use crate::common::{self, ClusterArgs};
use anyhow::{Context, Result};
use clap::Parser;
use rke_model::config::ROTATABLE_SERVICES;

#[derive(Debug, Parser)]
pub(crate) struct Cert {
    #[clap(subcommand)]
    command: CertCommand,
}

#[derive(Debug, Parser)]
enum CertCommand {
    /// Issue fresh certificates and restart the components that use them.
    Rotate(Rotate),
}

#[derive(Debug, Parser)]
pub(crate) struct Rotate {
    #[clap(flatten)]
    cluster: ClusterArgs,

    /// Rotate only this service's certificates. May be repeated; all services when absent.
    #[clap(
        long = "service",
        possible_values = ROTATABLE_SERVICES.iter().copied()
    )]
    services: Vec<String>,

    /// Also replace the certificate authority, which reissues every certificate.
    #[clap(long = "rotate-ca")]
    rotate_ca: bool,
}

impl Cert {
    pub(crate) async fn run(self) -> Result<()> {
        match self.command {
            CertCommand::Rotate(rotate) => rotate.run().await,
        }
    }
}

impl Rotate {
    async fn run(self) -> Result<()> {
        let config = self.cluster.load_config()?;
        common::cluster(&config, self.cluster.options())
            .rotate_certificates(&config, self.services, self.rotate_ca)
            .await
            .context("Unable to rotate certificates")?;
        println!("Certificates rotated.");
        Ok(())
    }
}
