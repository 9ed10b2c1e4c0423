use super::bundle;
use rke_model::constants::{CA_CERT_NAME, KUBE_APISERVER_PORT};

pub const LOCAL_CLUSTER_NAME: &str = "local";

/// A kubeconfig for a component running on a cluster host. It reaches the apiserver through the
/// local endpoint and references the certificate files the deployer writes.
pub fn local(component: &str) -> String {
    format!(
        r#"apiVersion: v1
kind: Config
clusters:
- cluster:
    api-version: v1
    certificate-authority: {ca}
    server: "https://127.0.0.1:{port}"
  name: "{cluster}"
contexts:
- context:
    cluster: "{cluster}"
    user: "{user}"
  name: "{cluster}"
current-context: "{cluster}"
users:
- name: "{user}"
  user:
    client-certificate: {cert}
    client-key: {key}
"#,
        ca = bundle::cert_path(CA_CERT_NAME),
        port = KUBE_APISERVER_PORT,
        cluster = LOCAL_CLUSTER_NAME,
        user = component,
        cert = bundle::cert_path(component),
        key = bundle::key_path(component),
    )
}

/// The operator's kubeconfig. Certificate material is embedded so the file stands alone.
pub fn admin(cluster_name: &str, address: &str, ca_pem: &str, cert_pem: &str, key_pem: &str) -> String {
    format!(
        r#"apiVersion: v1
kind: Config
clusters:
- cluster:
    api-version: v1
    certificate-authority-data: {ca}
    server: "https://{address}:{port}"
  name: "{cluster}"
contexts:
- context:
    cluster: "{cluster}"
    user: "kube-admin-{cluster}"
  name: "{cluster}"
current-context: "{cluster}"
users:
- name: "kube-admin-{cluster}"
  user:
    client-certificate-data: {cert}
    client-key-data: {key}
"#,
        ca = base64::encode(ca_pem),
        address = address,
        port = KUBE_APISERVER_PORT,
        cluster = cluster_name,
        cert = base64::encode(cert_pem),
        key = base64::encode(key_pem),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn local_config_points_at_loopback() {
        let config = local("kube-node");
        assert!(config.contains("server: \"https://127.0.0.1:6443\""));
        assert!(config.contains("client-key: /etc/kubernetes/ssl/kube-node-key.pem"));
        assert!(config.contains("certificate-authority: /etc/kubernetes/ssl/kube-ca.pem"));
    }

    #[test]
    fn admin_config_parses_as_kubeconfig() {
        let config = admin("local", "10.0.0.1", "CA", "CERT", "KEY");
        let parsed = kube::config::Kubeconfig::from_yaml(&config).unwrap();
        assert_eq!(parsed.clusters.len(), 1);
        assert_eq!(parsed.current_context.as_deref(), Some("local"));
        assert!(config.contains("server: \"https://10.0.0.1:6443\""));
    }
}
