use crate::common::{self, ClusterArgs};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufRead, Write};

/// Removes every cluster component from every host and deletes the local state.
#[derive(Debug, Parser)]
pub(crate) struct Remove {
    #[clap(flatten)]
    cluster: ClusterArgs,

    /// Do not ask for confirmation.
    #[clap(long = "force")]
    force: bool,
}

fn confirmed() -> Result<bool> {
    print!("Are you sure you want to remove the Kubernetes cluster [y/n]: ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

impl Remove {
    pub(crate) async fn run(self) -> Result<()> {
        let config = self.cluster.load_config()?;
        if !self.force && !confirmed()? {
            println!("Aborted.");
            return Ok(());
        }
        common::cluster(&config, self.cluster.options())
            .remove(&config)
            .await
            .context("Unable to remove the cluster")?;
        println!("Cluster removed.");
        Ok(())
    }
}
