/*!

The certificate authority. It creates or loads the cluster CAs, signs a leaf for every component
and every etcd or kubelet host, builds the kubeconfigs that reference them, and works out which
subset each host receives.

Certificates are stored as PEM text in the cluster state. A bundle generated from unchanged inputs
is byte-identical to the previous one, so re-running against a healthy cluster deploys nothing new.

!*/

mod authority;
pub mod bundle;
mod custom;
mod deploy;
mod generate;
pub mod kubeconfig;
mod validate;

pub use authority::{AltNames, LeafSpec};
pub use custom::{load_dir, write_csrs};
pub use deploy::deploy_certificates;
pub use generate::{apiserver_alt_names, generate, generate_csrs, leaf_specs};
pub use validate::{inspect, validate_bundle, CertInfo};
