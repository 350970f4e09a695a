//! Run configuration loading for the CLI.

use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is absent.
pub const LOCAL_CONFIG_FILE: &str = "prefgen.toml";

/// Resolve which TOML file, if any, sits between defaults and CLI flags.
///
/// Precedence:
/// 1. CLI arguments (handled by clap)
/// 2. `--config <path>`, or `./prefgen.toml` when present
/// 3. Defaults
pub fn resolve_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    local.is_file().then_some(local)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let path = Path::new("/tmp/custom.toml");
        assert_eq!(resolve_config_file(Some(path)), Some(path.to_path_buf()));
    }
}
