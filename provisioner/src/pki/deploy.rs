use super::bundle::host_env;
use crate::error::{self, Component, HostError, HostErrors, Result};
use crate::hosts::{run_once, Host};
use crate::plan::{host_path, registry_auth};
use log::{debug, info};
use rke_model::config::ClusterConfig;
use rke_model::constants::{CERT_DEPLOYER_CONTAINER, KUBERNETES_DIR};
use rke_model::{CertificateBundle, Node, Process};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn deployer(config: &ClusterConfig, node: &Node, env: Vec<String>) -> Process {
    let image = config.system_images.cert_downloader.clone();
    Process {
        name: CERT_DEPLOYER_CONTAINER.to_string(),
        command: vec!["cert-deployer".to_string()],
        env,
        image_registry_auth_config: registry_auth(config, &image),
        image,
        binds: vec![format!(
            "{}:{}:z",
            host_path(config, node, KUBERNETES_DIR),
            KUBERNETES_DIR
        )],
        privileged: true,
        restart_policy: "no".to_string(),
        ..Default::default()
    }
}

/// Writes each host's share of the bundle under `/etc/kubernetes/ssl` by running a short-lived
/// deployer container on every host at once.
pub async fn deploy_certificates(
    hosts: &[Host],
    config: &ClusterConfig,
    bundle: &CertificateBundle,
    wait_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    info!("[pki] Deploying certificates to {} host(s)", hosts.len());
    let deploys = hosts.iter().map(|host| {
        // Each task gets only the certificates its host is entitled to.
        let process = deployer(config, &host.node, host_env(config, &host.node, bundle));
        async move {
            if cancel.is_cancelled() {
                return (host, error::CanceledSnafu { component: Component::Pki }.fail());
            }
            debug!("[pki] Deploying certificates on host '{}'", host.address());
            let result = run_once(host, &process, wait_timeout, Component::Pki)
                .await
                .map(|_| ());
            (host, result)
        }
    });
    let failures: Vec<HostError> = futures::future::join_all(deploys)
        .await
        .into_iter()
        .filter_map(|(host, result)| {
            result.err().map(|error| HostError {
                host: host.address().to_string(),
                error,
            })
        })
        .collect();
    if !failures.is_empty() {
        return error::PartialFailureSnafu {
            component: Component::Pki,
            failures: HostErrors(failures),
        }
        .fail();
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use rke_model::config::PrivateRegistry;

    #[test]
    fn deployer_spec() {
        let mut config = ClusterConfig::default();
        config.system_images.cert_downloader = "registry.example.com/rancher/rke-tools:v0.1.88".to_string();
        config.private_registries = vec![PrivateRegistry {
            url: "registry.example.com".to_string(),
            user: "ops".to_string(),
            password: "secret".to_string(),
            is_default: true,
        }];
        let process = deployer(&config, &Node::default(), vec!["KUBE_CA=pem".to_string()]);
        assert_eq!(process.binds, vec!["/etc/kubernetes:/etc/kubernetes:z"]);
        assert!(process.privileged);
        assert_eq!(process.restart_policy, "no");
        assert!(process.image_registry_auth_config.is_some());
    }
}
