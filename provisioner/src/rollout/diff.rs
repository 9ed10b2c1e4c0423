//! Decides whether a running container still matches the process the plan asks for.

use crate::hosts::ContainerInfo;
use rke_model::constants::{HEALTHCHECK_URL_LABEL, VOLATILE_ENV_NAMES};
use rke_model::Process;
use std::collections::BTreeSet;

/// Why a container must be recreated, or `None` when it is current.
pub fn process_change(running: &ContainerInfo, desired: &Process) -> Option<String> {
    if running.image != desired.image {
        return Some(format!(
            "image changed from '{}' to '{}'",
            running.image, desired.image
        ));
    }

    let (running_cmd, desired_cmd): (Vec<&String>, Vec<&String>) = if desired.command.is_empty() {
        (running.cmd.iter().collect(), desired.args.iter().collect())
    } else {
        (
            running.entrypoint.iter().chain(&running.cmd).collect(),
            desired.command.iter().chain(&desired.args).collect(),
        )
    };
    if running_cmd != desired_cmd {
        return Some("command line changed".to_string());
    }

    let running_binds: BTreeSet<&str> = running.binds.iter().map(String::as_str).collect();
    let desired_binds: BTreeSet<&str> = desired.binds.iter().map(String::as_str).collect();
    if running_binds != desired_binds {
        return Some("binds changed".to_string());
    }

    // The image contributes its own env entries, so only the planned ones must be present.
    let running_env: BTreeSet<&str> = running.env.iter().map(String::as_str).collect();
    if let Some(missing) = desired
        .stable_env(VOLATILE_ENV_NAMES)
        .find(|entry| !running_env.contains(entry))
    {
        let name = missing.split_once('=').map(|(n, _)| n).unwrap_or(missing);
        return Some(format!("env '{}' changed", name));
    }

    let running_url = running
        .labels
        .get(HEALTHCHECK_URL_LABEL)
        .map(String::as_str)
        .unwrap_or_default();
    if running_url != desired.health_check.url {
        return Some("healthcheck url changed".to_string());
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use rke_model::HealthCheck;

    fn desired() -> Process {
        Process {
            name: "kube-proxy".to_string(),
            image: "rancher/hyperkube:v1.24.7-rancher1".to_string(),
            command: vec![
                "/opt/rke-tools/entrypoint.sh".to_string(),
                "kube-proxy".to_string(),
            ],
            args: vec!["--v=2".to_string()],
            env: vec!["A=1".to_string(), "FORCE_DEPLOY=1700000000".to_string()],
            binds: vec!["/etc/kubernetes:/etc/kubernetes:z".to_string()],
            health_check: HealthCheck {
                url: "http://localhost:10256/healthz".to_string(),
            },
            ..Default::default()
        }
    }

    fn running() -> ContainerInfo {
        let mut info = ContainerInfo {
            id: "abc".to_string(),
            name: "kube-proxy".to_string(),
            image: "rancher/hyperkube:v1.24.7-rancher1".to_string(),
            entrypoint: vec!["/opt/rke-tools/entrypoint.sh".to_string()],
            cmd: vec!["kube-proxy".to_string(), "--v=2".to_string()],
            env: vec![
                "PATH=/usr/bin".to_string(),
                "A=1".to_string(),
                "FORCE_DEPLOY=1600000000".to_string(),
            ],
            binds: vec!["/etc/kubernetes:/etc/kubernetes:z".to_string()],
            running: true,
            ..Default::default()
        };
        info.labels.insert(
            HEALTHCHECK_URL_LABEL.to_string(),
            "http://localhost:10256/healthz".to_string(),
        );
        info
    }

    #[test]
    fn volatile_env_and_image_env_are_ignored() {
        assert_eq!(process_change(&running(), &desired()), None);
    }

    #[test]
    fn changes_are_detected() {
        let mut process = desired();
        process.image = "rancher/hyperkube:v1.25.4-rancher1".to_string();
        assert!(process_change(&running(), &process).unwrap().contains("image"));

        let mut process = desired();
        process.args.push("--cluster-cidr=10.42.0.0/16".to_string());
        assert!(process_change(&running(), &process).is_some());

        let mut process = desired();
        process.env[0] = "A=2".to_string();
        assert_eq!(
            process_change(&running(), &process).unwrap(),
            "env 'A' changed"
        );

        let mut process = desired();
        process.binds.push("/var/log:/var/log".to_string());
        assert!(process_change(&running(), &process).is_some());

        let mut process = desired();
        process.health_check.url = "http://localhost:10257/healthz".to_string();
        assert!(process_change(&running(), &process).is_some());
    }

    #[test]
    fn args_only_process() {
        let process = Process {
            image: "rancher/rke-tools:v0.1.88".to_string(),
            args: vec!["nginx-proxy".to_string()],
            ..Default::default()
        };
        let info = ContainerInfo {
            image: "rancher/rke-tools:v0.1.88".to_string(),
            entrypoint: vec!["/opt/rke-tools/entrypoint.sh".to_string()],
            cmd: vec!["nginx-proxy".to_string()],
            ..Default::default()
        };
        assert_eq!(process_change(&info, &process), None);
    }
}
