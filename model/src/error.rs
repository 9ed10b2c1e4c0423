use snafu::Snafu;

/// The public error type for the model crate. The variants are kept private so they can change
/// without breaking callers; use the `Display` output for diagnostics.
#[derive(Debug, Snafu)]
pub struct Error(OpaqueError);
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum OpaqueError {
    #[snafu(display("[config] Unable to parse cluster config: {}", source))]
    ParseConfig { source: serde_yaml::Error },

    #[snafu(display("[config] Unable to serialize cluster config: {}", source))]
    SerializeConfig { source: serde_yaml::Error },

    #[snafu(display("[config] Invalid cluster config: {}", message))]
    Validation { message: String },

    #[snafu(display("[state] Unable to parse cluster state: {}", source))]
    ParseState { source: serde_json::Error },

    #[snafu(display("[state] Unable to serialize cluster state: {}", source))]
    SerializeState { source: serde_json::Error },

    #[snafu(display("[config] Unable to parse '{}' as a CIDR: {}", cidr, source))]
    ParseCidr {
        cidr: String,
        source: ipnet::AddrParseError,
    },

    #[snafu(display("[config] Service CIDR '{}' has no usable host address", cidr))]
    EmptyCidr { cidr: String },

    #[snafu(display("[config] Unable to parse version '{}': {}", version, source))]
    ParseVersion {
        version: String,
        source: semver::Error,
    },
}

impl Error {
    /// Whether this error came from cross-field validation rather than parsing.
    pub fn is_validation(&self) -> bool {
        matches!(self.0, OpaqueError::Validation { .. })
    }
}
