use super::args::Args;
use super::{dedup, registry_auth, PlanContext};
use crate::error::Result;
use crate::pki::bundle::{cert_path, etcd_cert_name, key_path};
use log::debug;
use rke_model::config::ServiceOverrides;
use rke_model::constants::*;
use rke_model::version::{base_version, image_tag};
use rke_model::{HealthCheck, Node, Process, Role};
use semver::Version;

const ETCD_BINARY: &str = "/usr/local/bin/etcd";
const CLUSTER_TOKEN: &str = "etcd-cluster-1";
const CIPHER_SUITES: &str =
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384";

/// `etcd-<hostname>=https://<internal>:2380` for every node, sorted.
pub fn initial_cluster<'n, I>(nodes: I) -> String
where
    I: IntoIterator<Item = &'n Node>,
{
    let mut members: Vec<String> = nodes
        .into_iter()
        .map(|node| {
            format!(
                "etcd-{}=https://{}:{}",
                node.hostname(),
                node.internal(),
                ETCD_PEER_PORT
            )
        })
        .collect();
    members.sort();
    members.join(",")
}

/// The etcd release an image runs. Tags that are not versions are taken to be current releases.
fn etcd_version(image: &str) -> Option<Version> {
    image_tag(image).and_then(|tag| base_version(tag).ok())
}

impl PlanContext<'_> {
    /// Whether `node` joins a running cluster rather than bootstrapping one.
    fn joins_existing(&self, node: &Node) -> bool {
        !self.etcd_members.is_empty() && !self.etcd_members.contains(&node.address)
    }

    pub(super) fn etcd(&self, node: &Node) -> Result<Process> {
        let etcd = &self.config.services.etcd;
        let options = &self.options(node).etcd;
        let internal = node.internal();
        let listen = if node.address == internal {
            "0.0.0.0"
        } else {
            internal
        };
        let version = etcd_version(&etcd.image);
        let older_than = |major, minor, patch| {
            version
                .as_ref()
                .map(|v| v < &Version::new(major, minor, patch))
                .unwrap_or(false)
        };

        let (state, members) = if self.joins_existing(node) {
            debug!("[etcd] Host '{}' joins the running etcd cluster", node.address);
            let members = self
                .config
                .nodes_with_role(Role::Etcd)
                .filter(|n| self.etcd_members.contains(&n.address) || n.address == node.address);
            ("existing", initial_cluster(members))
        } else {
            ("new", initial_cluster(self.config.nodes_with_role(Role::Etcd)))
        };

        let own_cert = etcd_cert_name(&node.address);
        let mut advertise = format!("https://{}:{}", internal, ETCD_CLIENT_PORT);
        if older_than(3, 4, 3) {
            advertise.push_str(&format!(",https://{}:{}", internal, ETCD_LEGACY_CLIENT_PORT));
        }

        let mut args = Args::new();
        args.set("name", format!("etcd-{}", node.hostname()))
            .set("data-dir", ETCD_DATA_DIR)
            .set("advertise-client-urls", advertise)
            .set(
                "listen-client-urls",
                format!("https://{}:{}", listen, ETCD_CLIENT_PORT),
            )
            .set(
                "initial-advertise-peer-urls",
                format!("https://{}:{}", internal, ETCD_PEER_PORT),
            )
            .set(
                "listen-peer-urls",
                format!("https://{}:{}", listen, ETCD_PEER_PORT),
            )
            .set("initial-cluster-token", CLUSTER_TOKEN)
            .set("initial-cluster", members)
            .set("initial-cluster-state", state)
            .set("trusted-ca-file", cert_path(CA_CERT_NAME))
            .set("peer-trusted-ca-file", cert_path(CA_CERT_NAME))
            .set("cert-file", cert_path(&own_cert))
            .set("key-file", key_path(&own_cert))
            .set("peer-cert-file", cert_path(&own_cert))
            .set("peer-key-file", key_path(&own_cert));
        for flag in ["client-cert-auth", "peer-client-cert-auth"] {
            if !options.contains_key(flag) {
                args.set(flag, "true");
            }
        }
        if !older_than(3, 4, 15) {
            args.set("cipher-suites", CIPHER_SUITES);
        }
        args.merge_catalog(options, &self.prefix(node));
        args.merge_extra(etcd.extra_args());

        let endpoint = if listen == "0.0.0.0" {
            format!("https://127.0.0.1:{}", ETCD_CLIENT_PORT)
        } else {
            format!("https://{}:{}", listen, ETCD_CLIENT_PORT)
        };
        let endpoint_var = if older_than(3, 2, 99) {
            "ETCDCTL_ENDPOINT"
        } else {
            "ETCDCTL_ENDPOINTS"
        };
        let mut env = vec![
            "ETCDCTL_API=3".to_string(),
            format!("ETCDCTL_CACERT={}", cert_path(CA_CERT_NAME)),
            format!("ETCDCTL_CERT={}", cert_path(&own_cert)),
            format!("ETCDCTL_KEY={}", key_path(&own_cert)),
            format!("{}={}", endpoint_var, endpoint),
        ];
        env.extend(etcd.extra_env().iter().cloned());

        let mut binds = vec![
            format!(
                "{}:{}:z",
                self.host_path(node, ETCD_HOST_DATA_DIR),
                ETCD_DATA_DIR
            ),
            format!(
                "{}:{}:z",
                self.host_path(node, KUBERNETES_DIR),
                KUBERNETES_DIR
            ),
        ];
        binds.extend(etcd.extra_binds().iter().cloned());

        let user = (etcd.uid != 0 && etcd.gid != 0).then(|| format!("{}:{}", etcd.uid, etcd.gid));

        Ok(Process {
            name: ETCD_CONTAINER.to_string(),
            command: vec![ETCD_BINARY.to_string()],
            args: args.render(),
            env,
            image: etcd.image.clone(),
            image_registry_auth_config: registry_auth(self.config, &etcd.image),
            binds: dedup(binds),
            network_mode: "host".to_string(),
            restart_policy: "always".to_string(),
            health_check: HealthCheck {
                url: format!("https://{}:{}/health", internal, ETCD_CLIENT_PORT),
            },
            user,
            ..Default::default()
        })
    }
}
