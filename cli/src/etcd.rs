use crate::common::{self, ClusterArgs, S3Args};
use anyhow::{Context, Result};
use clap::Parser;

#[derive(Debug, Parser)]
pub(crate) struct Etcd {
    #[clap(subcommand)]
    command: EtcdCommand,
}

#[derive(Debug, Parser)]
enum EtcdCommand {
    /// Save a snapshot on every etcd host.
    SnapshotSave(SnapshotSave),
    /// Restore the cluster from a snapshot.
    SnapshotRestore(SnapshotRestore),
    /// Delete a snapshot from every etcd host and the S3 store.
    SnapshotRemove(SnapshotRemove),
}

#[derive(Debug, Parser)]
pub(crate) struct SnapshotSave {
    #[clap(flatten)]
    cluster: ClusterArgs,

    /// Snapshot name; a timestamped name is chosen when absent.
    #[clap(long = "name")]
    name: Option<String>,

    #[clap(flatten)]
    s3: S3Args,
}

#[derive(Debug, Parser)]
pub(crate) struct SnapshotRestore {
    #[clap(flatten)]
    cluster: ClusterArgs,

    #[clap(long = "name")]
    name: String,

    /// Use the local state file instead of the state stored in the snapshot.
    #[clap(long = "use-local-state")]
    use_local_state: bool,

    #[clap(flatten)]
    s3: S3Args,
}

#[derive(Debug, Parser)]
pub(crate) struct SnapshotRemove {
    #[clap(flatten)]
    cluster: ClusterArgs,

    #[clap(long = "name")]
    name: String,

    #[clap(flatten)]
    s3: S3Args,
}

impl Etcd {
    pub(crate) async fn run(self) -> Result<()> {
        match self.command {
            EtcdCommand::SnapshotSave(save) => {
                let mut config = save.cluster.load_config()?;
                save.s3.apply(&mut config)?;
                let name = common::cluster(&config, save.cluster.options())
                    .snapshot_save(&config, save.name.as_deref())
                    .await
                    .context("Unable to save the snapshot")?;
                println!("Saved snapshot '{}'.", name);
            }
            EtcdCommand::SnapshotRestore(restore) => {
                let mut config = restore.cluster.load_config()?;
                restore.s3.apply(&mut config)?;
                let mut options = restore.cluster.options();
                options.use_local_state = restore.use_local_state;
                common::cluster(&config, options)
                    .snapshot_restore(&config, &restore.name)
                    .await
                    .with_context(|| format!("Unable to restore snapshot '{}'", restore.name))?;
                println!("Restored snapshot '{}'.", restore.name);
            }
            EtcdCommand::SnapshotRemove(remove) => {
                let mut config = remove.cluster.load_config()?;
                remove.s3.apply(&mut config)?;
                common::cluster(&config, remove.cluster.options())
                    .snapshot_remove(&config, &remove.name)
                    .await
                    .with_context(|| format!("Unable to remove snapshot '{}'", remove.name))?;
                println!("Removed snapshot '{}'.", remove.name);
            }
        }
        Ok(())
    }
}
