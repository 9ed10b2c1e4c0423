use super::args::Args;
use super::PlanContext;
use crate::cloud_config;
use crate::error::Result;
use crate::pki::bundle::{cert_path, config_path, key_path};
use rke_model::config::AUTHN_STRATEGY_WEBHOOK;
use rke_model::constants::*;
use rke_model::{HealthCheck, Node, Process, Role};
use std::net::IpAddr;

const ETCD_PREFIX: &str = "/registry";
const PROXY_CLIENT_NAME: &str = "kube-apiserver-proxy-client";
const ADMISSION_PLUGINS_ARG: &str = "enable-admission-plugins";

impl PlanContext<'_> {
    fn etcd_servers(&self) -> String {
        let etcd = &self.config.services.etcd;
        if etcd.is_external() {
            return etcd.external_urls.join(",");
        }
        self.config
            .nodes_with_role(Role::Etcd)
            .map(|n| format!("https://{}:{}", n.internal(), ETCD_CLIENT_PORT))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub(super) fn kube_apiserver(&self, node: &Node) -> Result<Process> {
        let config = self.config;
        let kube_api = &config.services.kube_api;
        let mut env = Vec::new();
        let mut binds = vec![format!(
            "{}:{}:z",
            self.host_path(node, KUBERNETES_DIR),
            KUBERNETES_DIR
        )];

        let (etcd_ca, etcd_cert) = if config.services.etcd.is_external() {
            (ETCD_CLIENT_CA_CERT_NAME, ETCD_CLIENT_CERT_NAME)
        } else {
            (CA_CERT_NAME, KUBE_NODE_CERT_NAME)
        };
        let etcd_prefix = if config.services.etcd.path.is_empty() {
            ETCD_PREFIX
        } else {
            config.services.etcd.path.as_str()
        };

        let mut args = Args::new();
        args.set("client-ca-file", cert_path(CA_CERT_NAME))
            .set("etcd-cafile", cert_path(etcd_ca))
            .set("etcd-certfile", cert_path(etcd_cert))
            .set("etcd-keyfile", key_path(etcd_cert))
            .set("etcd-prefix", etcd_prefix)
            .set("etcd-servers", self.etcd_servers())
            .set(
                "kubelet-client-certificate",
                cert_path(KUBE_APISERVER_CERT_NAME),
            )
            .set("kubelet-client-key", key_path(KUBE_APISERVER_CERT_NAME))
            .set("proxy-client-cert-file", cert_path(API_PROXY_CLIENT_CERT_NAME))
            .set("proxy-client-key-file", key_path(API_PROXY_CLIENT_CERT_NAME))
            .set("requestheader-allowed-names", PROXY_CLIENT_NAME)
            .set(
                "requestheader-client-ca-file",
                cert_path(REQUEST_HEADER_CA_CERT_NAME),
            )
            .set(
                "service-account-key-file",
                key_path(SERVICE_ACCOUNT_TOKEN_KEY_NAME),
            )
            .set(
                "service-cluster-ip-range",
                kube_api.service_cluster_ip_range.as_str(),
            )
            .set(
                "service-node-port-range",
                kube_api.service_node_port_range.as_str(),
            )
            .set("tls-cert-file", cert_path(KUBE_APISERVER_CERT_NAME))
            .set("tls-private-key-file", key_path(KUBE_APISERVER_CERT_NAME));

        self.cloud_provider_args(node, &mut args, &mut env);
        if config.authentication.has_strategy(AUTHN_STRATEGY_WEBHOOK) {
            if let Some(webhook) = &config.authentication.webhook {
                args.set(
                    "authentication-token-webhook-config-file",
                    webhook.config_file.as_str(),
                )
                .set(
                    "authentication-token-webhook-cache-ttl",
                    webhook.cache_timeout.as_str(),
                );
            }
        }
        if !self.encryption_config.is_empty() {
            args.set("encryption-provider-config", ENCRYPTION_PROVIDER_FILE_PATH);
        }
        if config.services.kubelet.generate_serving_certificate {
            args.set("kubelet-certificate-authority", cert_path(CA_CERT_NAME));
        }

        self.merged(&mut args, node, &self.options(node).kube_api);

        if config.is_rbac() {
            args.set("authorization-mode", "Node,RBAC");
        }
        if node.internal().parse::<IpAddr>().is_ok() {
            args.set("advertise-address", node.internal());
        }
        if kube_api.pod_security_policy {
            args.set("runtime-config", "policy/v1beta1/podsecuritypolicy=true");
            args.append(ADMISSION_PLUGINS_ARG, "PodSecurityPolicy");
        }
        if kube_api.always_pull_images {
            args.append(ADMISSION_PLUGINS_ARG, "AlwaysPullImages");
        }
        if kube_api.event_rate_limit_enabled() {
            args.append(ADMISSION_PLUGINS_ARG, "EventRateLimit");
        }
        if !self.admission_config.is_empty() {
            args.set("admission-control-config-file", ADMISSION_CONFIG_FILE_PATH);
        }

        if let Some(audit) = kube_api
            .audit_log
            .as_ref()
            .filter(|a| a.enabled)
            .and_then(|a| a.configuration.as_ref())
        {
            args.set("audit-log-path", audit.path.as_str())
                .set("audit-log-maxage", audit.max_age.to_string())
                .set("audit-log-maxbackup", audit.max_backup.to_string())
                .set("audit-log-maxsize", audit.max_size.to_string())
                .set("audit-log-format", audit.format.as_str())
                .set("audit-policy-file", AUDIT_POLICY_FILE_PATH);
            binds.push(format!(
                "{}:{}:z",
                self.host_path(node, AUDIT_LOG_DIR),
                AUDIT_LOG_DIR
            ));
            env.push(format!(
                "{}={}",
                ENV_AUDIT_LOG_CHECKSUM,
                cloud_config::checksum(&self.audit_policy)
            ));
        }

        let mut process = self.component(
            node,
            KUBE_APISERVER_CONTAINER,
            "kube-apiserver",
            kube_api,
            args,
            binds,
            env,
        );
        process.health_check = HealthCheck {
            url: format!("https://localhost:{}/healthz", KUBE_APISERVER_PORT),
        };
        Ok(process)
    }

    pub(super) fn kube_controller(&self, node: &Node) -> Process {
        let config = self.config;
        let controller = &config.services.kube_controller;
        let mut env = Vec::new();

        let mut args = Args::new();
        args.set("cluster-cidr", controller.cluster_cidr.as_str())
            .set("kubeconfig", config_path(KUBE_CONTROLLER_CERT_NAME))
            .set("root-ca-file", cert_path(CA_CERT_NAME))
            .set(
                "service-account-private-key-file",
                key_path(SERVICE_ACCOUNT_TOKEN_KEY_NAME),
            )
            .set(
                "service-cluster-ip-range",
                controller.service_cluster_ip_range.as_str(),
            );
        self.cloud_provider_args(node, &mut args, &mut env);
        self.merged(&mut args, node, &self.options(node).kube_controller);
        if config.is_rbac() {
            args.set("use-service-account-credentials", "true");
        }

        let binds = vec![format!(
            "{}:{}:z",
            self.host_path(node, KUBERNETES_DIR),
            KUBERNETES_DIR
        )];
        let mut process = self.component(
            node,
            KUBE_CONTROLLER_CONTAINER,
            "kube-controller-manager",
            controller,
            args,
            binds,
            env,
        );
        process.health_check = HealthCheck {
            url: format!("https://localhost:{}/healthz", CONTROLLER_SECURE_PORT),
        };
        process
    }

    pub(super) fn scheduler(&self, node: &Node) -> Process {
        let scheduler = &self.config.services.scheduler;
        let mut args = Args::new();
        args.set("kubeconfig", config_path(KUBE_SCHEDULER_CERT_NAME));
        self.merged(&mut args, node, &self.options(node).scheduler);

        let binds = vec![format!(
            "{}:{}:z",
            self.host_path(node, KUBERNETES_DIR),
            KUBERNETES_DIR
        )];
        let mut process = self.component(
            node,
            SCHEDULER_CONTAINER,
            "kube-scheduler",
            scheduler,
            args,
            binds,
            Vec::new(),
        );
        process.health_check = HealthCheck {
            url: format!("https://localhost:{}/healthz", SCHEDULER_SECURE_PORT),
        };
        process
    }
}

#[cfg(test)]
mod test {
    use super::super::test::{cluster, node};
    use super::*;
    use rke_model::config::{AuditLog, CloudProvider, EventRateLimit, SecretsEncryptionConfig};

    fn arg<'p>(process: &'p Process, name: &str) -> Option<&'p str> {
        let prefix = format!("--{}=", name);
        process.args.iter().find_map(|a| a.strip_prefix(prefix.as_str()))
    }

    fn controlplane() -> rke_model::ClusterConfig {
        cluster(vec![node(
            "10.0.0.1",
            &[Role::Etcd, Role::Controlplane, Role::Worker],
        )])
    }

    #[test]
    fn cloud_provider_adds_checksum() {
        let mut config = controlplane();
        config.cloud_provider = CloudProvider {
            name: "openstack".to_string(),
            cloud_config: [("region".to_string(), "RegionOne".to_string())].into(),
            ..Default::default()
        };
        let context = PlanContext::new(&config, "").unwrap();
        let apiserver = context.kube_apiserver(&config.nodes[0]).unwrap();
        assert_eq!(arg(&apiserver, "cloud-config"), Some(CLOUD_CONFIG_PATH));
        let expected = format!(
            "{}={}",
            ENV_CLOUD_CONFIG_CHECKSUM,
            cloud_config::checksum(context.cloud_config())
        );
        assert!(apiserver.env.contains(&expected));
        let controller = context.kube_controller(&config.nodes[0]);
        assert!(controller.env.contains(&expected));
    }

    #[test]
    fn admission_audit_and_encryption() {
        let mut config = controlplane();
        let api = &mut config.services.kube_api;
        api.always_pull_images = true;
        api.event_rate_limit = Some(EventRateLimit {
            enabled: true,
            configuration: Some(crate::defaults::default_event_rate_limit().unwrap()),
        });
        api.secrets_encryption_config = Some(SecretsEncryptionConfig {
            enabled: true,
            custom_config: None,
        });
        assert!(api.audit_enabled());

        let context = PlanContext::new(&config, "kind: EncryptionConfiguration\n").unwrap();
        let apiserver = context.kube_apiserver(&config.nodes[0]).unwrap();
        let plugins = arg(&apiserver, "enable-admission-plugins").unwrap();
        assert!(plugins.ends_with(",AlwaysPullImages,EventRateLimit"));
        assert_eq!(
            arg(&apiserver, "admission-control-config-file"),
            Some(ADMISSION_CONFIG_FILE_PATH)
        );
        assert_eq!(
            arg(&apiserver, "encryption-provider-config"),
            Some(ENCRYPTION_PROVIDER_FILE_PATH)
        );
        assert_eq!(arg(&apiserver, "audit-policy-file"), Some(AUDIT_POLICY_FILE_PATH));
        assert!(apiserver
            .binds
            .contains(&"/var/log/kube-audit:/var/log/kube-audit:z".to_string()));
        assert!(apiserver
            .env
            .iter()
            .any(|e| e.starts_with(ENV_AUDIT_LOG_CHECKSUM)));
    }

    #[test]
    fn extras_override_everything() {
        let mut config = controlplane();
        config.services.kube_api.audit_log = Some(AuditLog {
            enabled: false,
            configuration: None,
        });
        config
            .services
            .kube_api
            .extra_args
            .insert("authorization-mode".to_string(), "Node,RBAC,Webhook".to_string());
        config
            .services
            .kube_api
            .extra_binds
            .push("/etc/kubernetes:/etc/kubernetes:z".to_string());
        let apiserver = PlanContext::new(&config, "")
            .unwrap()
            .kube_apiserver(&config.nodes[0])
            .unwrap();
        assert_eq!(arg(&apiserver, "authorization-mode"), Some("Node,RBAC,Webhook"));
        assert!(arg(&apiserver, "audit-log-path").is_none());
        // The duplicate bind collapses.
        assert_eq!(apiserver.binds, vec!["/etc/kubernetes:/etc/kubernetes:z"]);
        assert_eq!(
            apiserver.command,
            vec!["/opt/rke-tools/entrypoint.sh", "kube-apiserver"]
        );
        assert_eq!(apiserver.volumes_from, vec![SIDEKICK_CONTAINER]);
    }

    #[test]
    fn catalog_layer_removes_flags() {
        let config = controlplane();
        let controller = PlanContext::new(&config, "")
            .unwrap()
            .kube_controller(&config.nodes[0]);
        // The modern catalog drops the insecure address flag.
        assert!(arg(&controller, "address").is_none());
        assert_eq!(arg(&controller, "use-service-account-credentials"), Some("true"));
        assert_eq!(
            arg(&controller, "kubeconfig"),
            Some("/etc/kubernetes/ssl/kubecfg-kube-controller-manager.yaml")
        );
    }
}
