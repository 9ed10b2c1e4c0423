use crate::config::Taint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything a single host must run, derived fresh on every invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePlan {
    pub address: String,
    pub processes: BTreeMap<String, Process>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_checks: Vec<PortCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
}

impl NodePlan {
    pub fn process(&self, name: &str) -> Option<&Process> {
        self.processes.get(name)
    }
}

/// A container specification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_registry_auth_config: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes_from: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub restart_policy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pid_mode: String,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub health_check: HealthCheck,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub publish: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl Process {
    /// The env entries that decide whether a running container is current, i.e. without the
    /// entries whose names are in `volatile`.
    pub fn stable_env<'a>(&'a self, volatile: &'a [&str]) -> impl Iterator<Item = &'a str> + 'a {
        self.env.iter().map(String::as_str).filter(move |entry| {
            let name = entry.split_once('=').map(|(n, _)| n).unwrap_or(entry);
            !volatile.contains(&name)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl HealthCheck {
    pub fn is_empty(&self) -> bool {
        self.url.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortCheck {
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortCheck {
    pub fn tcp<S: Into<String>>(address: S, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            protocol: Protocol::Tcp,
        }
    }
}

/// A file placed on the host before the processes start. Contents are base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub name: String,
    pub contents: String,
}

impl File {
    pub fn new<S: Into<String>>(name: S, plain: &str) -> Self {
        Self {
            name: name.into(),
            contents: base64::encode(plain),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stable_env_drops_volatile_entries() {
        let process = Process {
            env: vec!["A=1".to_string(), "FORCE_DEPLOY=123".to_string()],
            ..Default::default()
        };
        let env: Vec<&str> = process.stable_env(&["FORCE_DEPLOY"]).collect();
        assert_eq!(env, vec!["A=1"]);
    }

    #[test]
    fn process_json_uses_camel_case() {
        let process = Process {
            name: "kubelet".to_string(),
            image: "rancher/hyperkube:v1.24.7-rancher1".to_string(),
            network_mode: "host".to_string(),
            volumes_from: vec!["service-sidekick".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_value(&process).unwrap();
        assert_eq!(json["networkMode"], "host");
        assert_eq!(json["volumesFrom"][0], "service-sidekick");
    }
}
