use super::is_zero;
use k8s_openapi::api::apps::v1::DaemonSetUpdateStrategy;
use k8s_openapi::api::core::v1::Toleration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// The supported CNI plugins.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPlugin {
    Canal,
    Calico,
    Flannel,
    Weave,
    Aci,
    None,
}

impl Default for NetworkPlugin {
    fn default() -> Self {
        NetworkPlugin::Canal
    }
}

impl Display for NetworkPlugin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // serde_plain renders the same lowercase names the config uses.
        let name = serde_plain::to_string(self).map_err(|_| std::fmt::Error)?;
        f.write_str(&name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<NetworkPlugin>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub mtu: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calico_network_provider: Option<CalicoNetworkProvider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canal_network_provider: Option<CanalNetworkProvider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flannel_network_provider: Option<FlannelNetworkProvider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weave_network_provider: Option<WeaveNetworkProvider>,
    /// Free-form ACI settings, merged into `options` under an `aci_` prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aci_network_provider: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<DaemonSetUpdateStrategy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

impl NetworkConfig {
    pub fn plugin(&self) -> NetworkPlugin {
        self.plugin.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalicoNetworkProvider {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cloud_provider: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CanalNetworkProvider {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iface: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlannelNetworkProvider {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iface: String,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeaveNetworkProvider {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
}

impl std::fmt::Debug for WeaveNetworkProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeaveNetworkProvider").finish_non_exhaustive()
    }
}

#[test]
fn plugin_names_round_trip() {
    assert_eq!(NetworkPlugin::Canal.to_string(), "canal");
    assert_eq!(NetworkPlugin::None.to_string(), "none");
    let parsed: NetworkPlugin = serde_plain::from_str("calico").unwrap();
    assert_eq!(parsed, NetworkPlugin::Calico);
    assert_eq!(NetworkConfig::default().plugin(), NetworkPlugin::Canal);
}
