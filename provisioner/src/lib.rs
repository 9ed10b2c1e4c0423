/*!

An agentless Kubernetes cluster provisioner. A declarative [`ClusterConfig`] is turned into a
per-host plan of containers and files, a PKI is generated for it, and the plan is rolled out over
SSH in role order (etcd, control plane, workers) with bounded parallelism. The resulting state is
persisted in the cluster it built and next to the config file.

The [`Cluster`] driver is the entry point; the modules below it can be used on their own, e.g. to
compute plans without touching any host.

[`ClusterConfig`]: rke_model::ClusterConfig

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub use cluster::{departures, prepare_config, Cluster};
pub use error::{Component, Error, Result};
pub use options::Options;

pub mod catalog;
pub mod cloud_config;
pub mod cluster;
pub mod defaults;
pub mod encryption;
pub mod error;
pub mod health;
pub mod hosts;
pub mod k8s;
pub mod options;
pub mod pki;
pub mod plan;
pub mod plugins;
pub mod portcheck;
pub mod rollout;
pub mod snapshot;
pub mod state;
pub mod timecheck;
