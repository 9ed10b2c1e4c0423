use super::PlanContext;
use rke_model::constants::{
    ADMISSION_CONFIG_FILE_PATH, AUDIT_POLICY_FILE_PATH, CLOUD_CONFIG_PATH,
    ENCRYPTION_PROVIDER_FILE_PATH,
};
use rke_model::{File, Node};

impl PlanContext<'_> {
    /// Side files written to the host before its processes start. The cloud config is always
    /// written, even empty, so a removed provider also clears the file.
    pub(super) fn files(&self, node: &Node) -> Vec<File> {
        let mut files = vec![File::new(
            self.host_path(node, CLOUD_CONFIG_PATH),
            &self.cloud_config,
        )];
        if !node.is_control() {
            return files;
        }
        for (path, text) in [
            (ENCRYPTION_PROVIDER_FILE_PATH, &self.encryption_config),
            (AUDIT_POLICY_FILE_PATH, &self.audit_policy),
            (ADMISSION_CONFIG_FILE_PATH, &self.admission_config),
        ] {
            if !text.is_empty() {
                files.push(File::new(self.host_path(node, path), text));
            }
        }
        files
    }
}
