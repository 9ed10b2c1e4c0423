/*!

The data model for the provisioner: the declarative cluster description, the per-host plan the
planner derives from it, the state persisted between runs, and the well-known names shared by
every crate in the workspace. This crate performs no I/O.

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

pub use config::{ClusterConfig, Node, OsType, Role, Taint, TaintEffect};
pub use error::{Error, Result};
pub use plan::{File, HealthCheck, NodePlan, PortCheck, Process, Protocol};
pub use state::{CertificateBundle, CertificateEntry, FullState, State};

pub mod config;
pub mod constants;
mod error;
pub mod plan;
pub mod state;
pub mod validation;
pub mod version;
