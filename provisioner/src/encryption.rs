//! The secrets encryption-at-rest provider file and its key rotation.

use crate::catalog::{self, ENCRYPTION_TEMPLATE};
use crate::error::{self, Component, Result};
use rand::RngCore;
use rke_model::config::ClusterConfig;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;

const INITIAL_KEY_NAME: &str = "akey";
const KEY_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncryptionConfiguration {
    api_version: String,
    kind: String,
    resources: Vec<ResourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ResourceConfig {
    resources: Vec<String>,
    providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    aescbc: Option<KeyList>,
    #[serde(flatten)]
    other: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct KeyList {
    keys: Vec<Key>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Key {
    name: String,
    secret: String,
}

fn new_secret() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::encode(bytes)
}

/// A fresh provider file with one random `aescbc` key followed by `identity`.
pub fn initial_config(version: &str) -> Result<String> {
    let catalog = catalog::resolve_major(version)?;
    let template = catalog
        .templates
        .get(ENCRYPTION_TEMPLATE)
        .with_context(|| error::UnsupportedVersionSnafu { version })?;
    Ok(template
        .replace("{{ .Name }}", INITIAL_KEY_NAME)
        .replace("{{ .Secret }}", &new_secret()))
}

/// The provider file this run deploys: the user's custom config, else the one from the previous
/// state, else a newly generated one. Empty when encryption is off.
pub fn resolve(config: &ClusterConfig, previous: &str) -> Result<String> {
    if !config.services.kube_api.encryption_enabled() {
        return Ok(String::new());
    }
    let custom = config
        .services
        .kube_api
        .secrets_encryption_config
        .as_ref()
        .and_then(|c| c.custom_config.as_ref());
    if let Some(custom) = custom {
        return serde_yaml::to_string(custom).context(error::YamlSnafu {
            component: Component::Controlplane,
            what: "custom encryption config",
        });
    }
    if !previous.is_empty() {
        return Ok(previous.to_string());
    }
    initial_config(&config.version)
}

fn parse(text: &str) -> Result<EncryptionConfiguration> {
    serde_yaml::from_str(text).context(error::YamlSnafu {
        component: Component::Controlplane,
        what: "encryption config",
    })
}

fn render(config: &EncryptionConfiguration) -> Result<String> {
    serde_yaml::to_string(config).context(error::YamlSnafu {
        component: Component::Controlplane,
        what: "encryption config",
    })
}

fn aescbc_keys(config: &mut EncryptionConfiguration) -> Result<&mut Vec<Key>> {
    config
        .resources
        .iter_mut()
        .flat_map(|r| r.providers.iter_mut())
        .find_map(|p| p.aescbc.as_mut())
        .map(|list| &mut list.keys)
        .ok_or_else(|| error::Error::config("encryption config has no aescbc provider to rotate"))
}

/// Prepends a new key named `key-<now>`. Existing keys stay so secrets written with them remain
/// readable until they are rewritten.
pub fn with_new_key(current: &str, now: i64) -> Result<String> {
    let mut config = parse(current)?;
    aescbc_keys(&mut config)?.insert(
        0,
        Key {
            name: format!("key-{}", now),
            secret: new_secret(),
        },
    );
    render(&config)
}

/// Drops every key but the first, once all secrets are encrypted with it.
pub fn without_old_keys(current: &str) -> Result<String> {
    let mut config = parse(current)?;
    aescbc_keys(&mut config)?.truncate(1);
    render(&config)
}

/// Name of the key new writes are encrypted with.
pub fn primary_key_name(current: &str) -> Result<String> {
    let mut config = parse(current)?;
    aescbc_keys(&mut config)?
        .first()
        .map(|k| k.name.clone())
        .ok_or_else(|| error::Error::config("encryption config has no keys"))
}

#[cfg(test)]
mod test {
    use super::*;
    use rke_model::config::SecretsEncryptionConfig;

    const VERSION: &str = "v1.24.10-rancher4-1";

    #[test]
    fn generated_config_shape() {
        let text = initial_config(VERSION).unwrap();
        assert!(text.contains("apiVersion: apiserver.config.k8s.io/v1"));
        assert_eq!(primary_key_name(&text).unwrap(), "akey");
        let parsed = parse(&text).unwrap();
        let secret = &parsed.resources[0].providers[0].aescbc.as_ref().unwrap().keys[0].secret;
        assert_eq!(base64::decode(secret).unwrap().len(), KEY_BYTES);
        assert!(parsed.resources[0].providers[1].other.contains_key("identity"));
    }

    #[test]
    fn previous_config_is_reused() {
        let mut config = ClusterConfig {
            version: VERSION.to_string(),
            ..Default::default()
        };
        assert_eq!(resolve(&config, "").unwrap(), "");
        config.services.kube_api.secrets_encryption_config = Some(SecretsEncryptionConfig {
            enabled: true,
            custom_config: None,
        });
        let first = resolve(&config, "").unwrap();
        assert_eq!(resolve(&config, &first).unwrap(), first);
    }

    #[test]
    fn rotation_prepends_then_prunes() {
        let initial = initial_config(VERSION).unwrap();
        let rotated = with_new_key(&initial, 1_700_000_000).unwrap();
        assert_eq!(primary_key_name(&rotated).unwrap(), "key-1700000000");
        let mut parsed = parse(&rotated).unwrap();
        assert_eq!(aescbc_keys(&mut parsed).unwrap().len(), 2);
        let pruned = without_old_keys(&rotated).unwrap();
        let mut parsed = parse(&pruned).unwrap();
        let keys = aescbc_keys(&mut parsed).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name, "key-1700000000");
        assert!(pruned.contains("identity"));
    }
}
