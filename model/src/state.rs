/*!

The persisted cluster state. A `FullState` holds the desired state computed for the current run and
the state that was last applied successfully. It is stored as one JSON document in the target
cluster and next to the config file.

!*/

use crate::config::ClusterConfig;
use crate::error::{self, Result};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::collections::BTreeMap;

/// The certificate bundle, keyed by certificate name.
pub type CertificateBundle = BTreeMap<String, CertificateEntry>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullState {
    #[serde(default)]
    pub desired_state: State,
    #[serde(default)]
    pub current_state: State,
}

impl FullState {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text).context(error::ParseStateSnafu)?)
    }

    pub fn render(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self).context(error::SerializeStateSnafu)?)
    }

    /// A state read from the legacy location serves as both desired and current.
    pub fn from_legacy(state: State) -> Self {
        Self {
            desired_state: state.clone(),
            current_state: state,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rke_config: Option<ClusterConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub certificates_bundle: CertificateBundle,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encryption_config: String,
}

impl State {
    /// Parses a bare state, as stored by the legacy configmap.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text).context(error::ParseStateSnafu)?)
    }

    pub fn is_empty(&self) -> bool {
        self.rke_config.is_none() && self.certificates_bundle.is_empty()
    }
}

/// A certificate and its transport metadata, stored as PEM text.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub common_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organization: String,
    #[serde(default, rename = "certificatePEM", skip_serializing_if = "String::is_empty")]
    pub certificate: String,
    /// `[leaf, ...intermediates, root]`, PEM encoded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
    #[serde(default, rename = "keyPEM", skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, rename = "csrPEM", skip_serializing_if = "Option::is_none")]
    pub csr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub env_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub env_file_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_env_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config_env_name: String,
}

impl std::fmt::Debug for CertificateEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateEntry")
            .field("name", &self.name)
            .field("common_name", &self.common_name)
            .field("organization", &self.organization)
            .field("has_key", &self.key.is_some())
            .field("has_csr", &self.csr.is_some())
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
