//! Renders `/etc/kubernetes/cloud-config` from the cloud provider section of the cluster config.

use crate::error::{self, Component, Result};
use rke_model::config::CloudProvider;
use serde_json::{Map, Number, Value};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::fmt::Write;

pub const OPENSTACK_PROVIDER: &str = "openstack";
pub const VSPHERE_PROVIDER: &str = "vsphere";
pub const AWS_PROVIDER: &str = "aws";
const GLOBAL_SECTION: &str = "Global";

/// The cloud config file contents. Empty when no provider is configured.
pub fn generate(provider: &CloudProvider) -> Result<String> {
    if !provider.custom_cloud_provider.is_empty() {
        return Ok(provider.custom_cloud_provider.clone());
    }
    if !provider.is_configured() {
        return Ok(String::new());
    }
    match provider.name.as_str() {
        OPENSTACK_PROVIDER => Ok(openstack(provider)),
        VSPHERE_PROVIDER | AWS_PROVIDER if !provider.sections.is_empty() => {
            Ok(ini(&provider.sections))
        }
        _ => generic(&provider.cloud_config),
    }
}

/// The md5 hex digest the planner puts in the checksum env var.
pub fn checksum(text: &str) -> String {
    format!("{:x}", md5::compute(text.as_bytes()))
}

fn ini(sections: &BTreeMap<String, BTreeMap<String, String>>) -> String {
    let mut out = String::new();
    for (i, (name, values)) in sections.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "[{}]", name);
        for (key, value) in values {
            let _ = writeln!(out, "{}={}", key, value);
        }
    }
    out
}

/// `[Global]` holds the flat keys; any other named sections follow in name order.
fn openstack(provider: &CloudProvider) -> String {
    let mut sections = provider.sections.clone();
    sections
        .entry(GLOBAL_SECTION.to_string())
        .or_default()
        .extend(provider.cloud_config.clone());
    let mut out = ini(&BTreeMap::from([(
        GLOBAL_SECTION.to_string(),
        sections.remove(GLOBAL_SECTION).unwrap_or_default(),
    )]));
    if !sections.is_empty() {
        out.push('\n');
        out.push_str(&ini(&sections));
    }
    out
}

fn coerce(value: &str) -> Value {
    match value.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = value.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Some(float) = value.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(float);
    }
    Value::String(value.to_string())
}

fn generic(values: &BTreeMap<String, String>) -> Result<String> {
    let map: Map<String, Value> = values
        .iter()
        .map(|(key, value)| (key.clone(), coerce(value)))
        .collect();
    serde_json::to_string_pretty(&Value::Object(map)).context(error::SerdeSnafu {
        component: Component::Config,
        what: "cloud config",
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn openstack_keys_are_sorted() {
        let provider = CloudProvider {
            name: OPENSTACK_PROVIDER.to_string(),
            cloud_config: btreemap! {
                "username".to_string() => "admin".to_string(),
                "auth-url".to_string() => "https://localhost:5000/v3".to_string(),
                "tenant-name".to_string() => "admin".to_string(),
                "password".to_string() => "admin".to_string(),
                "domain-name".to_string() => "Default".to_string(),
            },
            ..Default::default()
        };
        let expected = "[Global]
auth-url=https://localhost:5000/v3
domain-name=Default
password=admin
tenant-name=admin
username=admin
";
        assert_eq!(generate(&provider).unwrap(), expected);
    }

    #[test]
    fn openstack_extra_sections_follow_global() {
        let provider = CloudProvider {
            name: OPENSTACK_PROVIDER.to_string(),
            cloud_config: btreemap! { "region".to_string() => "RegionOne".to_string() },
            sections: btreemap! {
                "LoadBalancer".to_string() => btreemap! {
                    "use-octavia".to_string() => "true".to_string(),
                },
            },
            ..Default::default()
        };
        assert_eq!(
            generate(&provider).unwrap(),
            "[Global]\nregion=RegionOne\n\n[LoadBalancer]\nuse-octavia=true\n"
        );
    }

    #[test]
    fn generic_values_are_coerced() {
        let provider = CloudProvider {
            name: "azure".to_string(),
            cloud_config: btreemap! {
                "useInstanceMetadata".to_string() => "true".to_string(),
                "vmCacheTTL".to_string() => "60".to_string(),
                "ratio".to_string() => "0.5".to_string(),
                "tenantId".to_string() => "abc".to_string(),
            },
            ..Default::default()
        };
        let text = generate(&provider).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["useInstanceMetadata"], Value::Bool(true));
        assert_eq!(value["vmCacheTTL"], 60);
        assert_eq!(value["ratio"], 0.5);
        assert_eq!(value["tenantId"], "abc");
        // Keys render in sorted order.
        assert!(text.find("ratio").unwrap() < text.find("tenantId").unwrap());
    }

    #[test]
    fn custom_and_unconfigured() {
        assert_eq!(generate(&CloudProvider::default()).unwrap(), "");
        let provider = CloudProvider {
            name: "external".to_string(),
            custom_cloud_provider: "[Global]\nzone=a\n".to_string(),
            ..Default::default()
        };
        assert_eq!(generate(&provider).unwrap(), "[Global]\nzone=a\n");
        assert_eq!(checksum(""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
