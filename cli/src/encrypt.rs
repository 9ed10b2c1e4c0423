use crate::common::{self, ClusterArgs};
use anyhow::{Context, Result};
use clap::Parser;

#[derive(Debug, Parser)]
pub(crate) struct Encrypt {
    #[clap(subcommand)]
    command: EncryptCommand,
}

#[derive(Debug, Parser)]
enum EncryptCommand {
    /// Replace the key secrets are encrypted with and re-encrypt every secret.
    RotateKey(ClusterArgs),
}

impl Encrypt {
    pub(crate) async fn run(self) -> Result<()> {
        match self.command {
            EncryptCommand::RotateKey(args) => {
                let config = args.load_config()?;
                common::cluster(&config, args.options())
                    .rotate_encryption_key(&config)
                    .await
                    .context("Unable to rotate the encryption key")?;
                println!("Encryption key rotated.");
                Ok(())
            }
        }
    }
}
