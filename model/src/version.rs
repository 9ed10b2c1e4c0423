use crate::error::{self, Result};
use semver::Version;
use snafu::ResultExt;

/// Parses a tag such as `v1.24.7-rancher1-1` or `v3.5.4` and keeps only `major.minor.patch`.
/// Build suffixes are vendor rebuilds of the same upstream release, so comparisons ignore them.
pub fn base_version(tag: &str) -> Result<Version> {
    let trimmed = tag.trim().trim_start_matches('v');
    let parsed = Version::parse(trimmed).context(error::ParseVersionSnafu { version: tag })?;
    Ok(Version::new(parsed.major, parsed.minor, parsed.patch))
}

/// The tag portion of an image reference, e.g. `v3.5.4` for `rancher/mirrored-coreos-etcd:v3.5.4`.
pub fn image_tag(image: &str) -> Option<&str> {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    last_segment.split_once(':').map(|(_, tag)| tag)
}

/// `vMAJOR.MINOR` for a kubernetes version tag.
pub fn major_minor(tag: &str) -> Result<String> {
    let version = base_version(tag)?;
    Ok(format!("v{}.{}", version.major, version.minor))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rancher_suffix_is_dropped() {
        assert_eq!(
            base_version("v1.24.7-rancher1-1").unwrap(),
            Version::new(1, 24, 7)
        );
        assert_eq!(base_version("v3.5.4").unwrap(), Version::new(3, 5, 4));
        assert!(base_version("latest").is_err());
    }

    #[test]
    fn tags_from_images() {
        assert_eq!(image_tag("rancher/mirrored-coreos-etcd:v3.5.4"), Some("v3.5.4"));
        assert_eq!(image_tag("registry.local:5000/rancher/etcd:v3.4.3"), Some("v3.4.3"));
        assert_eq!(image_tag("registry.local:5000/rancher/etcd"), None);
    }

    #[test]
    fn major_minor_form() {
        assert_eq!(major_minor("v1.24.7-rancher1-1").unwrap(), "v1.24");
    }
}
