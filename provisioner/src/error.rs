use snafu::Snafu;
use std::fmt::{Display, Formatter};

pub type Result<T> = std::result::Result<T, Error>;

/// The pool or subsystem an error belongs to, printed as the `[tag]` prefix of every message.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Component {
    Etcd,
    Controlplane,
    Worker,
    Pki,
    State,
    Network,
    Time,
    Snapshot,
    Dialer,
    Docker,
    Config,
}

impl Display for Component {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Component::Etcd => "etcd",
            Component::Controlplane => "controlplane",
            Component::Worker => "worker",
            Component::Pki => "pki",
            Component::State => "state",
            Component::Network => "network",
            Component::Time => "time",
            Component::Snapshot => "snapshot",
            Component::Dialer => "dialer",
            Component::Docker => "docker",
            Component::Config => "config",
        };
        write!(f, "[{}]", tag)
    }
}

impl From<rke_model::Role> for Component {
    fn from(role: rke_model::Role) -> Self {
        match role {
            rke_model::Role::Etcd => Component::Etcd,
            rke_model::Role::Controlplane => Component::Controlplane,
            rke_model::Role::Worker => Component::Worker,
        }
    }
}

/// A per-host failure collected while a batch runs.
#[derive(Debug)]
pub struct HostError {
    pub host: String,
    pub error: Error,
}

/// Renders the per-host failures of a `PartialFailure`, one per line.
#[derive(Debug)]
pub struct HostErrors(pub Vec<HostError>);

impl Display for HostErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  host '{}': {}", failure.host, failure.error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("[config] Invalid cluster config: {}", source))]
    Model { source: rke_model::Error },

    #[snafu(display("[config] {}", message))]
    ConfigInvalid { message: String },

    #[snafu(display("[config] Kubernetes version '{}' is not supported", version))]
    UnsupportedVersion { version: String },

    #[snafu(display("[dialer] Unable to reach host '{}': {}", host, source))]
    HostUnreachable {
        host: String,
        source: openssh::Error,
    },

    #[snafu(display("[dialer] Unable to reach host '{}': {}", host, message))]
    HostUnreachableMessage { host: String, message: String },

    #[snafu(display("[dialer] Failed to run '{}' on host '{}': {}", command, host, source))]
    Ssh {
        host: String,
        command: String,
        source: openssh::Error,
    },

    #[snafu(display(
        "[dialer] Command '{}' on host '{}' exited with {}: {}",
        command,
        host,
        status,
        stderr
    ))]
    RemoteCommand {
        host: String,
        command: String,
        status: i32,
        stderr: String,
    },

    #[snafu(display(
        "{} Container engine failed on host '{}' during '{}': {}",
        component,
        host,
        operation,
        message
    ))]
    ContainerEngine {
        component: Component,
        host: String,
        operation: String,
        message: String,
    },

    #[snafu(display("[pki] {}", message))]
    Pki { message: String },

    #[snafu(display("[pki] Failed to {}: {}", what, source))]
    PkiGenerate { what: String, source: rcgen::Error },

    #[snafu(display("[pki] Failed to parse certificate '{}': {}", name, message))]
    PkiParse { name: String, message: String },

    #[snafu(display("[pki] Certificate authority '{}' is missing", name))]
    MissingCa { name: String },

    #[snafu(display("[pki] Private key for '{}' can not be used: {}", name, message))]
    InvalidUpstreamKey { name: String, message: String },

    #[snafu(display(
        "[pki] Certificate '{}' expired at {}, rotate certificates to continue",
        name,
        not_after
    ))]
    CertExpired { name: String, not_after: String },

    #[snafu(display(
        "[pki] Alternative names of certificate '{}' changed and rotation is not allowed",
        name
    ))]
    AltNameMismatch { name: String },

    #[snafu(display(
        "{} Process '{}' on host '{}' did not become healthy: {}",
        component,
        process,
        host,
        message
    ))]
    Healthcheck {
        component: Component,
        host: String,
        process: String,
        message: String,
    },

    #[snafu(display(
        "[time] Clock on host '{}' is off: local {}..{}, remote {}",
        host,
        local_start,
        local_end,
        remote
    ))]
    ClockSkew {
        host: String,
        local_start: i64,
        local_end: i64,
        remote: i64,
    },

    #[snafu(display("{} Timed out draining node '{}' after {}s", component, node, seconds))]
    DrainTimeout {
        component: Component,
        node: String,
        seconds: u64,
    },

    #[snafu(display("{} Unable to drain node '{}': {}", component, node, message))]
    DrainRefused {
        component: Component,
        node: String,
        message: String,
    },

    #[snafu(display("[state] Failed to save cluster state within {}s: {}", seconds, source))]
    StateTimeout {
        seconds: u64,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("[state] The state {} holds no cluster state entry", location))]
    StateMissingKey {
        #[snafu(implicit(false))]
        location: String,
    },

    #[snafu(display("[state] Cluster state is corrupt: {}", source))]
    StateCorrupt { source: rke_model::Error },

    #[snafu(display("[state] Unable to {} local state file '{}': {}", action, path, source))]
    StateFile {
        action: String,
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("[snapshot] Snapshot '{}' failed on host '{}': {}", name, host, message))]
    SnapshotFailed {
        name: String,
        host: String,
        message: String,
    },

    #[snafu(display("[snapshot] Restore of snapshot '{}' failed: {}", name, message))]
    RestoreFailed { name: String, message: String },

    #[snafu(display("[snapshot] S3 {} of '{}' failed: {}", operation, key, message))]
    S3 {
        operation: String,
        key: String,
        message: String,
    },

    #[snafu(display("[snapshot] Snapshot archive error: {}", source))]
    Zip { source: zip::result::ZipError },

    #[snafu(display("{} Operation canceled", component))]
    Canceled { component: Component },

    #[snafu(display("{} {} host(s) failed:\n{}", component, failures.0.len(), failures))]
    PartialFailure {
        component: Component,
        failures: HostErrors,
    },

    #[snafu(display(
        "[network] Port {} on '{}' is not reachable from host '{}'",
        port,
        address,
        host
    ))]
    PortCheck {
        host: String,
        address: String,
        port: u16,
    },

    #[snafu(display("{} Kubernetes API call '{}' failed: {}", component, what, source))]
    Kube {
        component: Component,
        what: String,
        source: kube::Error,
    },

    #[snafu(display("[state] Unable to load kubeconfig: {}", source))]
    Kubeconfig { source: kube::config::KubeconfigError },

    #[snafu(display("[state] Unable to build kubernetes client: {}", source))]
    KubeClient { source: kube::Error },

    #[snafu(display("{} I/O error while trying to {}: {}", component, what, source))]
    Io {
        component: Component,
        what: String,
        source: std::io::Error,
    },

    #[snafu(display("{} Unable to serialize {}: {}", component, what, source))]
    Serde {
        component: Component,
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("{} Unable to serialize {}: {}", component, what, source))]
    Yaml {
        component: Component,
        what: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("{} Task failed to complete: {}", component, source))]
    Join {
        component: Component,
        source: tokio::task::JoinError,
    },
}

impl Error {
    /// Transient failures that are worth another attempt. Everything else is fatal on first sight.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::HostUnreachable { .. } | Error::HostUnreachableMessage { .. } => true,
            Error::Ssh { source, .. } => matches!(
                source,
                openssh::Error::Disconnected | openssh::Error::Connect(_) | openssh::Error::Master(_)
            ),
            Error::Healthcheck { .. } => true,
            Error::Kube { source, .. } => match source {
                kube::Error::Api(response) => {
                    response.code >= 500 || matches!(response.code, 409 | 429)
                }
                kube::Error::HyperError(_) | kube::Error::Service(_) => true,
                _ => false,
            },
            Error::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled { .. })
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Error::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn pki<S: Into<String>>(message: S) -> Self {
        Error::Pki {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_failure_lists_every_host() {
        let error = Error::PartialFailure {
            component: Component::Worker,
            failures: HostErrors(vec![
                HostError {
                    host: "10.0.0.4".to_string(),
                    error: Error::config("bad"),
                },
                HostError {
                    host: "10.0.0.5".to_string(),
                    error: Error::Canceled {
                        component: Component::Worker,
                    },
                },
            ]),
        };
        let message = error.to_string();
        assert!(message.starts_with("[worker] 2 host(s) failed"));
        assert!(message.contains("10.0.0.4"));
        assert!(message.contains("10.0.0.5"));
    }

    #[test]
    fn retry_classification() {
        assert!(Error::Healthcheck {
            component: Component::Controlplane,
            host: "h".to_string(),
            process: "kube-apiserver".to_string(),
            message: "503".to_string(),
        }
        .is_retryable());
        assert!(!Error::config("unknown flag").is_retryable());
        assert!(Error::Io {
            component: Component::Dialer,
            what: "read".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionReset),
        }
        .is_retryable());
    }
}
