//! Waits for a freshly started process to answer its health URL.

use crate::error::{self, Component, Result};
use crate::hosts::Host;
use crate::pki::bundle::{cert_path, etcd_cert_name, key_path};
use crate::plan::host_path;
use async_trait::async_trait;
use log::{debug, info, warn};
use rke_model::config::ClusterConfig;
use rke_model::constants::{ETCD_CONTAINER, KUBE_NODE_CERT_NAME};
use rke_model::Process;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Client credentials a health check presents, as paths on the checked host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCredentials {
    pub cert: String,
    pub key: String,
}

#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// The HTTP status `url` answers with when requested from `host` itself.
    async fn status(&self, host: &Host, url: &str, credentials: &CheckCredentials) -> Result<u16>;
}

/// Requests the URL with `curl` over the host's connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurlChecker;

#[async_trait]
impl HealthChecker for CurlChecker {
    async fn status(&self, host: &Host, url: &str, credentials: &CheckCredentials) -> Result<u16> {
        let mut args: Vec<String> = ["-s", "-o", "/dev/null", "-w", "%{http_code}", "--max-time", "10"]
            .iter()
            .map(|a| a.to_string())
            .collect();
        if url.starts_with("https://") {
            args.extend([
                "--insecure".to_string(),
                "--cert".to_string(),
                credentials.cert.clone(),
                "--key".to_string(),
                credentials.key.clone(),
            ]);
        }
        args.push(url.to_string());
        let output = host.conn.run("curl", &args).await?;
        let status = output.stdout_str();
        // curl prints `000` and exits non-zero when it never got a response.
        match status.parse::<u16>() {
            Ok(code) if code > 0 => Ok(code),
            _ => error::HealthcheckSnafu {
                component: Component::Worker,
                host: host.address(),
                process: url,
                message: format!("no response (curl exit {})", output.status),
            }
            .fail(),
        }
    }
}

/// The certificate a health check of `process` presents: etcd wants the host's etcd peer cert, every
/// other component accepts the node cert.
pub fn credentials(config: &ClusterConfig, host: &Host, process: &Process) -> CheckCredentials {
    let name = if process.name == ETCD_CONTAINER {
        etcd_cert_name(host.address())
    } else {
        KUBE_NODE_CERT_NAME.to_string()
    };
    CheckCredentials {
        cert: host_path(config, &host.node, &cert_path(&name)),
        key: host_path(config, &host.node, &key_path(&name)),
    }
}

/// Polls the process's health URL until it answers below 400. Failed attempts back off from one
/// second, doubling up to thirty, until `timeout` is spent.
pub async fn wait_healthy(
    checker: &dyn HealthChecker,
    host: &Host,
    process: &Process,
    credentials: &CheckCredentials,
    timeout: Duration,
    component: Component,
    cancel: &CancellationToken,
) -> Result<()> {
    let url = &process.health_check.url;
    if url.is_empty() {
        return Ok(());
    }
    let deadline = Instant::now() + timeout;
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let message = match checker.status(host, url, credentials).await {
            Ok(status) if status < 400 => {
                info!(
                    "{} Process '{}' on host '{}' is healthy",
                    component,
                    process.name,
                    host.address()
                );
                return Ok(());
            }
            Ok(status) => format!("'{}' answered {}", url, status),
            Err(e) if !e.is_retryable() => {
                warn!(
                    "{} Giving up on the health check of '{}' on host '{}': {}",
                    component,
                    process.name,
                    host.address(),
                    e
                );
                return Err(e);
            }
            Err(e) => e.to_string(),
        };
        if Instant::now() + backoff > deadline {
            return error::HealthcheckSnafu {
                component,
                host: host.address(),
                process: process.name.as_str(),
                message,
            }
            .fail();
        }
        debug!(
            "{} Process '{}' on host '{}' is not healthy yet: {}",
            component,
            process.name,
            host.address(),
            message
        );
        tokio::select! {
            _ = cancel.cancelled() => {
                warn!("{} Health check of '{}' on host '{}' canceled", component, process.name, host.address());
                return error::CanceledSnafu { component }.fail();
            }
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hosts::{CommandOutput, Connection, ContainerClient, ContainerInfo, LogStream};
    use rke_model::{HealthCheck, Node};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct Unused;

    #[async_trait]
    impl Connection for Unused {
        fn address(&self) -> &str {
            "10.0.0.1"
        }
        async fn run(&self, _: &str, _: &[String]) -> Result<CommandOutput> {
            unimplemented!()
        }
        async fn read_file(&self, _: &str) -> Result<Vec<u8>> {
            unimplemented!()
        }
        async fn write_file(&self, _: &str, _: &[u8], _: u32) -> Result<()> {
            unimplemented!()
        }
    }

    #[async_trait]
    impl ContainerClient for Unused {
        async fn pull(&self, _: &str, _: Option<&str>) -> Result<()> {
            unimplemented!()
        }
        async fn create(&self, _: &Process) -> Result<String> {
            unimplemented!()
        }
        async fn start(&self, _: &str) -> Result<()> {
            unimplemented!()
        }
        async fn stop(&self, _: &str) -> Result<()> {
            unimplemented!()
        }
        async fn restart(&self, _: &str) -> Result<()> {
            unimplemented!()
        }
        async fn wait(&self, _: &str) -> Result<i64> {
            unimplemented!()
        }
        async fn remove(&self, _: &str, _: bool, _: bool) -> Result<()> {
            unimplemented!()
        }
        async fn inspect(&self, _: &str) -> Result<Option<ContainerInfo>> {
            unimplemented!()
        }
        async fn logs(&self, _: &str, _: LogStream, _: Option<i64>) -> Result<Vec<u8>> {
            unimplemented!()
        }
        async fn exec(&self, _: &str, _: &[String]) -> Result<CommandOutput> {
            unimplemented!()
        }
    }

    fn host() -> Host {
        Host {
            node: Node {
                address: "10.0.0.1".to_string(),
                ..Default::default()
            },
            conn: Arc::new(Unused),
            docker: Arc::new(Unused),
        }
    }

    /// Answers with the queued statuses, then keeps repeating the last one.
    struct Scripted {
        statuses: Mutex<Vec<u16>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HealthChecker for Scripted {
        async fn status(&self, _: &Host, _: &str, _: &CheckCredentials) -> Result<u16> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                Ok(statuses.remove(0))
            } else {
                Ok(statuses[0])
            }
        }
    }

    fn apiserver() -> Process {
        Process {
            name: "kube-apiserver".to_string(),
            health_check: HealthCheck {
                url: "https://localhost:6443/healthz".to_string(),
            },
            ..Default::default()
        }
    }

    fn creds() -> CheckCredentials {
        CheckCredentials {
            cert: "c".to_string(),
            key: "k".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn becomes_healthy_after_retries() {
        let checker = Scripted {
            statuses: Mutex::new(vec![503, 503, 200]),
            calls: AtomicUsize::new(0),
        };
        wait_healthy(
            &checker,
            &host(),
            &apiserver(),
            &creds(),
            Duration::from_secs(45),
            Component::Controlplane,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(checker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_the_deadline() {
        let checker = Scripted {
            statuses: Mutex::new(vec![500]),
            calls: AtomicUsize::new(0),
        };
        let error = wait_healthy(
            &checker,
            &host(),
            &apiserver(),
            &creds(),
            Duration::from_secs(45),
            Component::Controlplane,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, error::Error::Healthcheck { .. }));
        // Attempts at 0, 1, 3, 7, 15 and 31 seconds; the next pause would pass the deadline.
        assert_eq!(checker.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn processes_without_a_url_are_healthy() {
        let checker = Scripted {
            statuses: Mutex::new(vec![500]),
            calls: AtomicUsize::new(0),
        };
        let process = Process {
            name: "service-sidekick".to_string(),
            ..Default::default()
        };
        wait_healthy(
            &checker,
            &host(),
            &process,
            &creds(),
            Duration::from_secs(1),
            Component::Worker,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(checker.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn etcd_presents_its_own_cert() {
        let config = ClusterConfig::default();
        let etcd = Process {
            name: ETCD_CONTAINER.to_string(),
            ..Default::default()
        };
        let creds = credentials(&config, &host(), &etcd);
        assert!(creds.cert.ends_with("kube-etcd-10-0-0-1.pem"));
        let creds = credentials(&config, &host(), &apiserver());
        assert_eq!(creds.key, "/etc/kubernetes/ssl/kube-node-key.pem");
    }

    /// Fails the way a health check does when it cannot run at all.
    struct Broken {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HealthChecker for Broken {
        async fn status(&self, _: &Host, _: &str, _: &CheckCredentials) -> Result<u16> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(error::Error::config("curl is not installed"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failure_ends_the_wait() {
        let checker = Broken {
            calls: AtomicUsize::new(0),
        };
        let err = wait_healthy(
            &checker,
            &host(),
            &apiserver(),
            &creds(),
            Duration::from_secs(45),
            Component::Controlplane,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, error::Error::ConfigInvalid { .. }), "{}", err);
        assert_eq!(checker.calls.load(Ordering::SeqCst), 1);
    }
}
