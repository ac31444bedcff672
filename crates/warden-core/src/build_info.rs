//! Build-time metadata embedded by the build script.

/// The git commit hash at build time (short form).
pub const GIT_HASH: &str = env!("WARDEN_GIT_HASH");

/// The build profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("WARDEN_BUILD_PROFILE");

/// The crate version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Return a version string including the control protocol revision.
///
/// Example: `"0.1.0 (abc1234, debug, protocol 1)"`
pub fn version_string() -> String {
    format!(
        "{VERSION} ({GIT_HASH}, {BUILD_PROFILE}, protocol {})",
        crate::protocol::PROTOCOL_VERSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_mentions_protocol() {
        let v = version_string();
        assert!(v.starts_with(VERSION));
        assert!(v.ends_with("protocol 1)"));
    }

    #[test]
    fn test_git_hash_not_empty() {
        assert!(!GIT_HASH.is_empty());
    }
}
