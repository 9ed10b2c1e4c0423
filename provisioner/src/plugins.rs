//! Per-plugin behaviour for the closed set of CNI plugins.

use rke_model::config::{NetworkPlugin, SystemImages};
use std::collections::BTreeMap;

pub const FLANNEL_BACKEND_TYPE: &str = "flannel_backend_type";
pub const FLANNEL_BACKEND_PORT: &str = "flannel_backend_port";
pub const FLANNEL_BACKEND_VNI: &str = "flannel_backend_vni";
pub const FLANNEL_IFACE: &str = "flannel_iface";
pub const CALICO_CLOUD_PROVIDER: &str = "calico_cloud_provider";
pub const CALICO_FLEX_VOLUME_PLUGIN_DIR: &str = "calico_flex_volume_plugin_dir";
pub const CANAL_FLANNEL_BACKEND_TYPE: &str = "canal_flannel_backend_type";
pub const CANAL_FLANNEL_BACKEND_PORT: &str = "canal_flannel_backend_port";
pub const CANAL_FLANNEL_BACKEND_VNI: &str = "canal_flannel_backend_vni";
pub const CANAL_FLEX_VOLUME_PLUGIN_DIR: &str = "canal_flex_volume_plugin_dir";
pub const CANAL_IFACE: &str = "canal_iface";
pub const WEAVE_PASSWORD: &str = "weave_password";
pub const ACI_PREFIX: &str = "aci_";

const DEFAULT_FLANNEL_BACKEND: &str = "vxlan";
const DEFAULT_FLANNEL_PORT: &str = "8472";
const DEFAULT_FLANNEL_VNI: &str = "1";
const DEFAULT_CLOUD_PROVIDER: &str = "none";
const DEFAULT_FLEX_VOLUME_DIR: &str =
    "/usr/libexec/kubernetes/kubelet-plugins/volume/exec/nodeagent~uds";

const ACI_DEFAULTS: &[(&str, &str)] = &[
    ("aci_apic_refresh_time", "1200"),
    ("aci_capic", "false"),
    ("aci_controller_log_level", "info"),
    ("aci_drop_log_enable", "true"),
    ("aci_enable_endpoint_slice", "false"),
    ("aci_host_agent_log_level", "info"),
    ("aci_image_pull_policy", "Always"),
    ("aci_install_istio", "false"),
    ("aci_istio_profile", "demo"),
    ("aci_max_nodes_svc_graph", "32"),
    ("aci_no_priority_class", "false"),
    ("aci_opflex_agent_log_level", "info"),
    ("aci_opflex_client_ssl", "true"),
    ("aci_ovs_memory_limit", "1Gi"),
    ("aci_pbr_tracking_non_snat", "false"),
    ("aci_pod_subnet_chunk_size", "32"),
    ("aci_run_gbp_container", "false"),
    ("aci_run_opflex_server_container", "false"),
    ("aci_server_monitor_interval", "5"),
    ("aci_snat_contract_scope", "global"),
    ("aci_snat_namespace", "aci-containers-system"),
    ("aci_snat_port_range_end", "65000"),
    ("aci_snat_port_range_start", "5000"),
    ("aci_snat_ports_per_node", "3000"),
    ("aci_use_aci_anywhere_crd", "false"),
    ("aci_use_aci_cni_priority_class", "false"),
    ("aci_use_host_netns_volume", "false"),
    ("aci_use_opflex_server_volume", "false"),
    ("aci_use_privileged_container", "false"),
];

pub trait NetworkProvider {
    /// Option defaults seeded into `network.options` for this plugin.
    fn default_options(&self) -> BTreeMap<String, String>;

    /// The images this plugin's daemonsets run.
    fn system_images(&self, images: &SystemImages) -> Vec<String>;
}

fn to_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl NetworkProvider for NetworkPlugin {
    fn default_options(&self) -> BTreeMap<String, String> {
        match self {
            NetworkPlugin::Canal => to_map(&[
                (CANAL_FLANNEL_BACKEND_TYPE, DEFAULT_FLANNEL_BACKEND),
                (CANAL_FLANNEL_BACKEND_PORT, DEFAULT_FLANNEL_PORT),
                (CANAL_FLANNEL_BACKEND_VNI, DEFAULT_FLANNEL_VNI),
                (CANAL_FLEX_VOLUME_PLUGIN_DIR, DEFAULT_FLEX_VOLUME_DIR),
            ]),
            NetworkPlugin::Calico => to_map(&[
                (CALICO_CLOUD_PROVIDER, DEFAULT_CLOUD_PROVIDER),
                (CALICO_FLEX_VOLUME_PLUGIN_DIR, DEFAULT_FLEX_VOLUME_DIR),
            ]),
            NetworkPlugin::Flannel => to_map(&[
                (FLANNEL_BACKEND_TYPE, DEFAULT_FLANNEL_BACKEND),
                (FLANNEL_BACKEND_PORT, DEFAULT_FLANNEL_PORT),
                (FLANNEL_BACKEND_VNI, DEFAULT_FLANNEL_VNI),
            ]),
            NetworkPlugin::Aci => to_map(ACI_DEFAULTS),
            NetworkPlugin::Weave | NetworkPlugin::None => BTreeMap::new(),
        }
    }

    fn system_images(&self, images: &SystemImages) -> Vec<String> {
        let list: Vec<&String> = match self {
            NetworkPlugin::Canal => vec![
                &images.canal_node,
                &images.canal_cni,
                &images.canal_controllers,
                &images.canal_flannel,
                &images.canal_flexvol,
            ],
            NetworkPlugin::Calico => vec![
                &images.calico_node,
                &images.calico_cni,
                &images.calico_controllers,
                &images.calico_ctl,
                &images.calico_flexvol,
            ],
            NetworkPlugin::Flannel => vec![&images.flannel, &images.flannel_cni],
            NetworkPlugin::Weave => vec![&images.weave_node, &images.weave_cni],
            NetworkPlugin::Aci => vec![
                &images.aci_cni_deploy_container,
                &images.aci_host_container,
                &images.aci_opflex_container,
                &images.aci_mcast_container,
                &images.aci_ovs_container,
                &images.aci_controller_container,
            ],
            NetworkPlugin::None => vec![],
        };
        list.into_iter()
            .filter(|image| !image.is_empty())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flannel_defaults() {
        let options = NetworkPlugin::Flannel.default_options();
        assert_eq!(options[FLANNEL_BACKEND_TYPE], "vxlan");
        assert_eq!(options[FLANNEL_BACKEND_PORT], "8472");
        assert_eq!(options[FLANNEL_BACKEND_VNI], "1");
    }

    #[test]
    fn aci_defaults_are_prefixed() {
        let options = NetworkPlugin::Aci.default_options();
        assert!(options.keys().all(|k| k.starts_with(ACI_PREFIX)));
        assert_eq!(options["aci_snat_ports_per_node"], "3000");
    }

    #[test]
    fn none_has_no_images() {
        let images = SystemImages {
            flannel: "rancher/flannel:v1".to_string(),
            ..Default::default()
        };
        assert!(NetworkPlugin::None.system_images(&images).is_empty());
        assert_eq!(
            NetworkPlugin::Flannel.system_images(&images),
            vec!["rancher/flannel:v1".to_string()]
        );
    }
}
