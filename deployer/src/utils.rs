//! Build metadata

use serde::{Deserialize, Serialize};

/// What `--version` prints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub name: String,
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
    pub target: String,
    pub profile: String,
}

pub fn version_info() -> VersionInfo {
    VersionInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("MULTIDEPLOY_GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("MULTIDEPLOY_BUILD_TIME").unwrap_or("unknown").to_string(),
        target: option_env!("MULTIDEPLOY_TARGET").unwrap_or("unknown").to_string(),
        profile: option_env!("MULTIDEPLOY_PROFILE").unwrap_or("unknown").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        let info = version_info();
        assert_eq!(info.name, "multideploy");
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(!info.git_hash.is_empty());
        assert!(!info.target.is_empty());
    }
}
