//! `.orc-config`/`_orc-config` discovery and loading.
//!
//! `orc-core`'s [`orc_core::Settings`] covers the engine's own configuration surface; the three
//! ambient-only keys (`forward_to_linker`, `standalone_mode`, `show_progress`) only mean something at
//! this binary's boundary, so they live in [`CliSettings`] alongside a flattened `core`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use orc_core::Settings;

/// The full configuration surface this binary understands: the engine's own [`Settings`] plus the
/// three ambient-only keys documented in the configuration table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CliSettings {
    #[serde(flatten)]
    pub core: Settings,
    pub forward_to_linker: bool,
    pub standalone_mode: bool,
    pub show_progress: bool,
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            core: Settings::default(),
            forward_to_linker: true,
            standalone_mode: false,
            show_progress: false,
        }
    }
}

const CONFIG_NAMES: [&str; 2] = [".orc-config", "_orc-config"];

/// Walks up from `start_dir` (typically the running executable's directory) looking for either
/// config filename at each level, stopping at the first hit or the filesystem root.
pub fn discover_config_path(start_dir: &Path) -> Option<PathBuf> {
    let mut dir = Some(start_dir);
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let candidate = current.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        dir = current.parent();
    }
    None
}

/// Loads [`CliSettings`] by discovering and parsing a config file starting from `start_dir`.
///
/// A missing config file is not an error: it is logged at `info` and defaults are used. A config
/// file that exists but fails to parse is a hard startup error, chained with the offending path.
pub fn load_settings(start_dir: &Path) -> anyhow::Result<CliSettings> {
    let Some(path) = discover_config_path(start_dir) else {
        tracing::info!("no .orc-config/_orc-config found; using defaults");
        return Ok(CliSettings::default());
    };

    let contents = std::fs::read_to_string(&path).with_context(|| format!("reading config at {}", path.display()))?;
    let settings: CliSettings =
        toml::from_str(&contents).with_context(|| format!("parsing config at {}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded configuration");
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(dir.path()).unwrap();
        assert!(settings.forward_to_linker);
        assert!(settings.core.parallel_processing);
    }

    #[test]
    fn discovers_config_in_parent_directory() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join(".orc-config"), "log_level = \"verbose\"\n").unwrap();

        let found = discover_config_path(&nested).unwrap();
        assert_eq!(found, root.path().join(".orc-config"));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".orc-config"), "this is not valid toml =====").unwrap();
        assert!(load_settings(dir.path()).is_err());
    }

    #[test]
    fn unknown_key_does_not_fail_parsing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".orc-config"), "not_a_real_key = true\n").unwrap();
        assert!(load_settings(dir.path()).is_ok());
    }
}
