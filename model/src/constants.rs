/// Helper macro to avoid retyping the base domain-like name used for container labels. When given
/// no parameters, this returns the base name. When given a string literal parameter it adds
/// `.parameter` to the end.
macro_rules! rke {
    () => {
        "io.rancher.rke"
    };
    ($s:literal) => {
        concat!(rke!(), ".", $s)
    };
}

// Labels
pub const CONTAINER_NAME_LABEL: &str = rke!("container.name");
pub const HEALTHCHECK_URL_LABEL: &str = rke!("healthcheck.url");
pub const EXTERNAL_ADDRESS_ANNOTATION: &str = "rke.cattle.io/external-ip";
pub const INTERNAL_ADDRESS_ANNOTATION: &str = "rke.cattle.io/internal-ip";
pub const CONTROLPLANE_ROLE_LABEL: &str = "node-role.kubernetes.io/controlplane";
pub const ETCD_ROLE_LABEL: &str = "node-role.kubernetes.io/etcd";
pub const WORKER_ROLE_LABEL: &str = "node-role.kubernetes.io/worker";
pub const CONTROLPLANE_TAINT_KEY: &str = "node-role.kubernetes.io/controlplane";
pub const ETCD_TAINT_KEY: &str = "node-role.kubernetes.io/etcd";

// System identifiers
pub const SYSTEM_NAMESPACE: &str = "kube-system";
pub const FULL_STATE_NAME: &str = "full-cluster-state";
pub const DEFAULT_CLUSTER_CONFIG: &str = "cluster.yml";
pub const STATE_FILE_EXTENSION: &str = "rkestate";
pub const KUBE_ADMIN_CONFIG_PREFIX: &str = "kube_config_";

// Process and container names
pub const ETCD_CONTAINER: &str = "etcd";
pub const KUBE_APISERVER_CONTAINER: &str = "kube-apiserver";
pub const KUBE_CONTROLLER_CONTAINER: &str = "kube-controller-manager";
pub const SCHEDULER_CONTAINER: &str = "kube-scheduler";
pub const KUBELET_CONTAINER: &str = "kubelet";
pub const KUBEPROXY_CONTAINER: &str = "kube-proxy";
pub const NGINX_PROXY_CONTAINER: &str = "nginx-proxy";
pub const SIDEKICK_CONTAINER: &str = "service-sidekick";
pub const CERT_DEPLOYER_CONTAINER: &str = "cert-deployer";
pub const FILE_DEPLOYER_CONTAINER: &str = "file-deployer";
pub const PORT_CHECK_CONTAINER: &str = "rke-port-checker";
pub const TIME_CHECK_CONTAINER: &str = "rke-time-checker";
pub const CLEANER_CONTAINER: &str = "kube-cleaner";
pub const ETCD_SNAPSHOT_ONCE_CONTAINER: &str = "etcd-snapshot-once";
pub const ETCD_RESTORE_CONTAINER: &str = "etcd-restore";

// Ports
pub const ETCD_CLIENT_PORT: u16 = 2379;
pub const ETCD_PEER_PORT: u16 = 2380;
pub const ETCD_LEGACY_CLIENT_PORT: u16 = 4001;
pub const KUBE_APISERVER_PORT: u16 = 6443;
pub const KUBELET_PORT: u16 = 10250;
pub const KUBELET_HEALTHZ_PORT: u16 = 10248;
pub const KUBEPROXY_HEALTHZ_PORT: u16 = 10256;
pub const SCHEDULER_SECURE_PORT: u16 = 10259;
pub const CONTROLLER_SECURE_PORT: u16 = 10257;

// Host paths
pub const KUBERNETES_DIR: &str = "/etc/kubernetes";
pub const NODE_STATE_PATH: &str = "/etc/kubernetes/.tmp/cluster.rkestate";
pub const CERT_PATH_PREFIX: &str = "/etc/kubernetes/ssl/";
pub const CLOUD_CONFIG_PATH: &str = "/etc/kubernetes/cloud-config";
pub const ENCRYPTION_PROVIDER_FILE_PATH: &str = "/etc/kubernetes/encryption.yaml";
pub const AUDIT_POLICY_FILE_PATH: &str = "/etc/kubernetes/audit-policy.yaml";
pub const ADMISSION_CONFIG_FILE_PATH: &str = "/etc/kubernetes/admission.yaml";
pub const ETCD_DATA_DIR: &str = "/var/lib/rancher/etcd/";
pub const ETCD_HOST_DATA_DIR: &str = "/var/lib/etcd";
pub const ETCD_SNAPSHOT_PATH: &str = "/opt/rke/etcd-snapshots/";
pub const AUDIT_LOG_DIR: &str = "/var/log/kube-audit";
pub const DOCKERSHIM_SOCKET: &str = "/var/run/dockershim.sock";
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";
pub const DEFAULT_DOCKER_ROOT_DIR: &str = "/var/lib/docker";

// Snapshot archive members
pub const SNAPSHOT_DB_FILE: &str = "snapshot.db";
pub const SNAPSHOT_STATE_FILE: &str = "state.json";
pub const SNAPSHOT_EXTENSION: &str = "zip";

// Environment variables
pub const ENV_CLOUD_CONFIG_CHECKSUM: &str = "RKE_CLOUD_CONFIG_CHECKSUM";
pub const ENV_AUDIT_LOG_CHECKSUM: &str = "RKE_AUDITLOG_CONFIG_CHECKSUM";
pub const ENV_KUBELET_DOCKER_CONFIG: &str = "RKE_KUBELET_DOCKER_CONFIG";
pub const ENV_KUBELET_DOCKER_FILE: &str = "RKE_KUBELET_DOCKER_FILE";
pub const ENV_KUBELET_CRI_DOCKERD: &str = "RKE_KUBELET_CRIDOCKERD";
pub const ENV_NODE_NAME_OVERRIDE: &str = "RKE_NODE_NAME_OVERRIDE";
pub const ENV_NETWORK_CONFIGURATION: &str = "RKE_NETWORK_CONFIGURATION";
pub const ENV_CP_HOSTS: &str = "CP_HOSTS";
pub const ENV_FORCE_DEPLOY: &str = "FORCE_DEPLOY";

/// Env var names whose values change between runs without requiring a container restart.
pub const VOLATILE_ENV_NAMES: &[&str] = &[ENV_FORCE_DEPLOY];

// Certificate names
pub const CA_CERT_NAME: &str = "kube-ca";
pub const REQUEST_HEADER_CA_CERT_NAME: &str = "kube-apiserver-requestheader-ca";
pub const KUBE_APISERVER_CERT_NAME: &str = "kube-apiserver";
pub const KUBE_CONTROLLER_CERT_NAME: &str = "kube-controller-manager";
pub const KUBE_SCHEDULER_CERT_NAME: &str = "kube-scheduler";
pub const KUBE_PROXY_CERT_NAME: &str = "kube-proxy";
pub const KUBE_NODE_CERT_NAME: &str = "kube-node";
pub const KUBE_ADMIN_CERT_NAME: &str = "kube-admin";
pub const SERVICE_ACCOUNT_TOKEN_KEY_NAME: &str = "kube-service-account-token";
pub const API_PROXY_CLIENT_CERT_NAME: &str = "kube-apiserver-proxy-client";
pub const ETCD_CERT_NAME: &str = "kube-etcd";
pub const KUBELET_CERT_NAME: &str = "kube-kubelet";
pub const ETCD_CLIENT_CERT_NAME: &str = "kube-etcd-client";
pub const ETCD_CLIENT_CA_CERT_NAME: &str = "kube-etcd-client-ca";

// Common names and organizations
pub const KUBE_NODE_COMMON_NAME: &str = "system:node";
pub const KUBE_NODE_ORGANIZATION: &str = "system:nodes";
pub const KUBE_ADMIN_ORGANIZATION: &str = "system:masters";
pub const KUBE_CONTROLLER_COMMON_NAME: &str = "system:kube-controller-manager";
pub const KUBE_SCHEDULER_COMMON_NAME: &str = "system:kube-scheduler";
pub const KUBE_PROXY_COMMON_NAME: &str = "system:kube-proxy";

#[test]
fn rke_constants_macro_test() {
    assert_eq!("io.rancher.rke", rke!());
    assert_eq!("io.rancher.rke.container.name", CONTAINER_NAME_LABEL);
    assert_eq!("io.rancher.rke.foo", rke!("foo"));
}
