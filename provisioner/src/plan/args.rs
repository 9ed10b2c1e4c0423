//! Command line flags for a kubernetes component, layered as built-in defaults, then catalog
//! options, then user extras.

use crate::catalog::{OptionMap, PREFIX_PATH_TOKEN};
use std::collections::BTreeMap;

const EMPTY_VALUE: &str = "''";

/// Flags keyed by name, without the leading `--`. Rendering is sorted so a process's command line
/// is stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Args(BTreeMap<String, String>);

impl Args {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.0.insert(key.into(), value.into());
        self
    }

    #[cfg(test)]
    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Appends `item` to a comma separated list flag, creating it if needed.
    pub(crate) fn append(&mut self, key: &str, item: &str) {
        match self.0.get_mut(key) {
            Some(value) if !value.is_empty() => {
                if !value.split(',').any(|v| v == item) {
                    value.push(',');
                    value.push_str(item);
                }
            }
            _ => {
                self.0.insert(key.to_string(), item.to_string());
            }
        }
    }

    /// Applies catalog options: an empty value drops the flag, `''` keeps it with an empty value
    /// and a leading `[PREFIX_PATH]` is replaced by the host's prefix.
    pub(crate) fn merge_catalog(&mut self, options: &OptionMap, prefix: &str) {
        for (key, value) in options {
            if value.is_empty() {
                self.0.remove(key);
            } else if value == EMPTY_VALUE {
                self.0.insert(key.clone(), String::new());
            } else if let Some(rest) = value.strip_prefix(PREFIX_PATH_TOKEN) {
                self.0.insert(key.clone(), join_prefix(prefix, rest));
            } else {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    /// User supplied flags are taken as they are.
    pub(crate) fn merge_extra(&mut self, extras: &BTreeMap<String, String>) {
        for (key, value) in extras {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub(crate) fn render(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|(key, value)| format!("--{}={}", key, value))
            .collect()
    }
}

/// `path` under `prefix`. The root prefix leaves the path alone.
pub(crate) fn join_prefix(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path.to_string();
    }
    if path.is_empty() {
        return prefix.to_string();
    }
    format!("{}/{}", prefix, path.trim_start_matches('/'))
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn catalog_conventions() {
        let mut args = Args::new();
        args.set("insecure-port", "8080")
            .set("client-ca-file", "/etc/kubernetes/ssl/kube-ca.pem");
        let options: OptionMap = btreemap! {
            "insecure-port".to_string() => "".to_string(),
            "enforce-node-allocatable".to_string() => "''".to_string(),
            "root-dir".to_string() => "[PREFIX_PATH]/var/lib/kubelet".to_string(),
        };
        args.merge_catalog(&options, "/opt/rke");
        assert!(!args.contains("insecure-port"));
        assert_eq!(args.get("enforce-node-allocatable"), Some(""));
        assert_eq!(args.get("root-dir"), Some("/opt/rke/var/lib/kubelet"));

        let mut args = Args::new();
        args.merge_catalog(&options, "/");
        assert_eq!(args.get("root-dir"), Some("/var/lib/kubelet"));
    }

    #[test]
    fn extras_win_and_render_is_sorted() {
        let mut args = Args::new();
        args.set("v", "2").set("bind-address", "127.0.0.1");
        args.merge_extra(&btreemap! { "v".to_string() => "4".to_string() });
        assert_eq!(args.render(), vec!["--bind-address=127.0.0.1", "--v=4"]);
    }

    #[test]
    fn list_append() {
        let mut args = Args::new();
        args.append("enable-admission-plugins", "NodeRestriction");
        args.append("enable-admission-plugins", "PodSecurityPolicy");
        args.append("enable-admission-plugins", "PodSecurityPolicy");
        assert_eq!(
            args.get("enable-admission-plugins"),
            Some("NodeRestriction,PodSecurityPolicy")
        );
    }

    #[test]
    fn prefix_join() {
        assert_eq!(join_prefix("/", "/etc/kubernetes"), "/etc/kubernetes");
        assert_eq!(join_prefix("/opt/rke/", "/etc/kubernetes"), "/opt/rke/etc/kubernetes");
        assert_eq!(join_prefix("c:/", "/etc/kubernetes"), "c:/etc/kubernetes");
    }
}
