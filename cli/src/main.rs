/*!

`rke` brings up, changes and tears down Kubernetes clusters described by a `cluster.yml`, driving
every host over SSH.

!*/

mod cert;
mod common;
mod config;
mod encrypt;
mod etcd;
mod remove;
mod up;

use anyhow::Result;
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;

/// Provision and manage Kubernetes clusters over SSH.
#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    /// Set logging verbosity [trace|debug|info|warn|error]. If the environment variable `RUST_LOG`
    /// is present, it overrides the default logging behavior. See https://docs.rs/env_logger/latest
    #[clap(long = "log-level", default_value = "info")]
    log_level: LevelFilter,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Bring the cluster up, or bring it in line with the config.
    Up(up::Up),
    /// Tear the cluster down and clean every host.
    Remove(remove::Remove),
    /// Manage cluster certificates.
    Cert(cert::Cert),
    /// Manage encryption at rest.
    Encrypt(encrypt::Encrypt),
    /// Save, restore and remove etcd snapshots.
    Etcd(etcd::Etcd),
    /// Show the cluster config.
    Config(config::Config),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(args.log_level);
    if let Err(e) = run(args).await {
        log::error!("{:#}", e);
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Up(up) => up.run().await,
        Command::Remove(remove) => remove.run().await,
        Command::Cert(cert) => cert.run().await,
        Command::Encrypt(encrypt) => encrypt.run().await,
        Command::Etcd(etcd) => etcd.run().await,
        Command::Config(config) => config.run(),
    }
}

/// Initialize the logger with the value passed by `--log-level` (or its default) when the
/// `RUST_LOG` environment variable is not present. If present, the `RUST_LOG` environment variable
/// overrides `--log-level`/`level`.
fn init_logger(level: LevelFilter) {
    match std::env::var(env_logger::DEFAULT_FILTER_ENV).ok() {
        Some(_) => {
            // RUST_LOG exists; env_logger will use it.
            Builder::from_default_env().init();
        }
        None => {
            // Only the workspace crates log at `level`; everything else is held at error.
            Builder::new()
                .filter_level(LevelFilter::Error)
                .filter(Some(env!("CARGO_CRATE_NAME")), level)
                .filter(Some("rke_provisioner"), level)
                .filter(Some("rke_model"), level)
                .init();
        }
    }
}
