use super::args::Args;
use super::{registry_auth, taints, PlanContext};
use crate::error::{self, Component, Result};
use crate::hosts::registries_config;
use crate::pki::bundle::{cert_path, config_path, key_path, kubelet_cert_name};
use rke_model::constants::*;
use rke_model::{HealthCheck, Node, Process, Role};
use snafu::ResultExt;

const KUBELET_DOCKER_CONFIG_PATH: &str = "/var/lib/kubelet/config.json";

impl PlanContext<'_> {
    fn ssl(&self, node: &Node, path: String) -> String {
        self.component_path(node, &path)
    }

    fn linux_kubelet_binds(&self, node: &Node) -> Vec<String> {
        let prefixed = |path: &str, options: &str| {
            format!("{}:{}:{}", self.host_path(node, path), path, options)
        };
        vec![
            prefixed(KUBERNETES_DIR, "z"),
            prefixed("/etc/cni", "rw,z"),
            prefixed("/opt/cni", "rw,z"),
            prefixed("/var/lib/cni", "z"),
            "/var/lib/calico:/var/lib/calico:z".to_string(),
            "/etc/resolv.conf:/etc/resolv.conf".to_string(),
            "/sys:/sys:ro".to_string(),
            format!("{0}:{0}:rw,rslave,z", self.docker_root_dir(node)),
            prefixed("/var/lib/kubelet", "shared,z"),
            prefixed("/var/lib/rancher", "shared,z"),
            "/var/run:/var/run:rw,rprivate".to_string(),
            "/run:/run:rprivate".to_string(),
            "/dev:/host/dev:rprivate".to_string(),
            prefixed("/var/log/containers", "z"),
            prefixed("/var/log/pods", "z"),
        ]
    }

    fn windows_binds(&self, node: &Node) -> Vec<String> {
        ["/etc/kubernetes", "/run", "/opt", "/var/lib", "/var/log"]
            .iter()
            .map(|path| format!("{}:c:/host{}", self.host_path(node, path), path))
            .chain([
                "//./pipe/docker_engine://./pipe/docker_engine".to_string(),
                "c:/ProgramData:c:/ProgramData".to_string(),
                "c:/Program Files:c:/host/Program Files".to_string(),
            ])
            .collect()
    }

    /// Env entries the Windows entrypoint reads to configure the host network.
    fn windows_env(&self, node: &Node) -> Result<Vec<String>> {
        let network = serde_json::to_string(&self.config.network).context(error::SerdeSnafu {
            component: Component::Worker,
            what: "network configuration",
        })?;
        Ok(vec![
            format!("{}={}", ENV_NODE_NAME_OVERRIDE, node.hostname()),
            format!("{}={}", ENV_NETWORK_CONFIGURATION, network),
        ])
    }

    pub(super) fn kubelet(&self, node: &Node) -> Result<Process> {
        let config = self.config;
        let kubelet = &config.services.kubelet;
        let mut env = Vec::new();

        let cluster_dns = config
            .dns
            .as_ref()
            .and_then(|dns| dns.nodelocal_ip())
            .unwrap_or(kubelet.cluster_dns_server.as_str());
        let infra_image = if node.is_windows() {
            &config.system_images.windows_pod_infra_container
        } else {
            &kubelet.infra_container_image
        };

        let mut args = Args::new();
        args.set("client-ca-file", self.ssl(node, cert_path(CA_CERT_NAME)))
            .set("cluster-dns", cluster_dns)
            .set("cluster-domain", kubelet.cluster_domain.as_str())
            .set("fail-swap-on", kubelet.fail_swap_on.to_string())
            .set("hostname-override", node.hostname())
            .set(
                "kubeconfig",
                self.ssl(node, config_path(KUBE_NODE_CERT_NAME)),
            )
            .set("pod-infra-container-image", infra_image.as_str())
            .set("root-dir", "/var/lib/kubelet");
        if node.is_control() && !node.is_worker() {
            let register: Vec<String> = taints(node)
                .iter()
                .filter(|t| t.key == CONTROLPLANE_TAINT_KEY)
                .map(ToString::to_string)
                .collect();
            args.set("register-with-taints", register.join(","));
        }
        if node.address != node.internal() {
            args.set("node-ip", node.internal());
        }
        if kubelet.generate_serving_certificate {
            let own = kubelet_cert_name(&node.address);
            args.set("tls-cert-file", self.ssl(node, cert_path(&own)))
                .set("tls-private-key-file", self.ssl(node, key_path(&own)));
        }
        if config.cri_dockerd_enabled() {
            args.set("container-runtime", "remote").set(
                "container-runtime-endpoint",
                format!("unix://{}", DOCKERSHIM_SOCKET),
            );
            env.push(format!("{}=true", ENV_KUBELET_CRI_DOCKERD));
        }
        self.cloud_provider_args(node, &mut args, &mut env);
        self.merged(&mut args, node, &self.options(node).kubelet);

        if let Some(docker_config) = registries_config(&config.private_registries)? {
            env.push(format!(
                "{}={}",
                ENV_KUBELET_DOCKER_CONFIG,
                base64::encode(docker_config)
            ));
            env.push(format!(
                "{}={}",
                ENV_KUBELET_DOCKER_FILE,
                self.host_path(node, KUBELET_DOCKER_CONFIG_PATH)
            ));
        }

        let binds = if node.is_windows() {
            env.extend(self.windows_env(node)?);
            self.windows_binds(node)
        } else {
            self.linux_kubelet_binds(node)
        };
        let mut process = self.component(
            node,
            KUBELET_CONTAINER,
            "kubelet",
            kubelet,
            args,
            binds,
            env,
        );
        process.health_check = HealthCheck {
            url: format!("http://localhost:{}/healthz", KUBELET_HEALTHZ_PORT),
        };
        process.pid_mode = "host".to_string();
        process.privileged = true;
        Ok(process)
    }

    pub(super) fn kube_proxy(&self, node: &Node) -> Process {
        let config = self.config;
        let proxy = &config.services.kubeproxy;

        let mut args = Args::new();
        args.set(
            "cluster-cidr",
            config.services.kube_controller.cluster_cidr.as_str(),
        )
        .set("hostname-override", node.hostname())
        .set(
            "kubeconfig",
            self.ssl(node, config_path(KUBE_PROXY_CERT_NAME)),
        );
        if config.cloud_provider.is_configured() {
            args.set("bind-address", node.address.as_str());
        }
        self.merged(&mut args, node, &self.options(node).kubeproxy);

        let binds = if node.is_windows() {
            self.windows_binds(node)
        } else {
            vec![
                format!(
                    "{}:{}:z",
                    self.host_path(node, KUBERNETES_DIR),
                    KUBERNETES_DIR
                ),
                "/run:/run".to_string(),
                "/lib/modules:/lib/modules:ro".to_string(),
            ]
        };
        let mut process = self.component(
            node,
            KUBEPROXY_CONTAINER,
            "kube-proxy",
            proxy,
            args,
            binds,
            Vec::new(),
        );
        process.health_check = HealthCheck {
            url: format!("http://localhost:{}/healthz", KUBEPROXY_HEALTHZ_PORT),
        };
        process.pid_mode = "host".to_string();
        process.privileged = true;
        process
    }

    /// A local load balancer in front of the apiservers for hosts that run none.
    pub(super) fn nginx_proxy(&self, node: &Node) -> Process {
        let hosts: Vec<&str> = self
            .config
            .nodes_with_role(Role::Controlplane)
            .map(Node::internal)
            .collect();
        let env = vec![format!("{}={}", ENV_CP_HOSTS, hosts.join(","))];
        let image = self.config.system_images.nginx_proxy.clone();
        let command = if node.is_windows() {
            vec![
                "pwsh".to_string(),
                "-NoLogo".to_string(),
                "-NonInteractive".to_string(),
                "-File".to_string(),
                "c:/usr/bin/nginx-proxy.ps1".to_string(),
            ]
        } else {
            vec!["nginx-proxy".to_string()]
        };
        Process {
            name: NGINX_PROXY_CONTAINER.to_string(),
            command,
            // The env doubles as args so that a changed controlplane set recreates the container.
            args: env.clone(),
            env,
            image_registry_auth_config: registry_auth(self.config, &image),
            image,
            network_mode: "host".to_string(),
            restart_policy: "always".to_string(),
            ..Default::default()
        }
    }

    /// Carries the helper binaries and entrypoint scripts the other components mount.
    pub(super) fn sidekick(&self, node: &Node) -> Result<Process> {
        let image = self.config.system_images.kubernetes_services_sidecar.clone();
        let mut process = Process {
            name: SIDEKICK_CONTAINER.to_string(),
            image_registry_auth_config: registry_auth(self.config, &image),
            image,
            ..Default::default()
        };
        if node.is_windows() {
            process.command = vec![
                "pwsh".to_string(),
                "-NoLogo".to_string(),
                "-NonInteractive".to_string(),
                "-File".to_string(),
                "c:/usr/bin/sidecar.ps1".to_string(),
            ];
            process.env = self.windows_env(node)?;
            process.binds = self.windows_binds(node);
            process.restart_policy = "always".to_string();
        } else {
            process.command = vec!["/bin/bash".to_string()];
            process.network_mode = "none".to_string();
        }
        Ok(process)
    }
}
