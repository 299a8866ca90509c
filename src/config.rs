// ABOUTME: Runtime settings - defaults, optional TOML config file, CLI overrides
// ABOUTME: Precedence is CLI flag, then config file, then built-in default

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_REGISTRY_PATH: &str = "data/processed/property_registry.json";
pub const DEFAULT_OUTPUT_DIR: &str = "data/processed/incremental";
pub const DEFAULT_WINDOW_DAYS: u32 = 7;

/// Contents of `config.toml`. Every key is optional.
///
/// ```toml
/// registry_path = "~/propdata/property_registry.json"
/// output_dir = "~/propdata/incremental"
/// default_window_days = 14
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub registry_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub default_window_days: Option<u32>,
}

/// Fully resolved settings used by the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub registry_path: PathBuf,
    pub output_dir: PathBuf,
    pub default_window_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from(DEFAULT_REGISTRY_PATH),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            default_window_days: DEFAULT_WINDOW_DAYS,
        }
    }
}

impl Settings {
    /// Merge defaults, the config file and CLI overrides.
    ///
    /// An explicit `config_path` must exist. Without one, the per-user config file is
    /// used when present and silently skipped otherwise.
    pub fn resolve(
        config_path: Option<&Path>,
        registry_path: Option<PathBuf>,
        output_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let file = match config_path {
            Some(path) => load_config_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => load_config_file(&path)?,
                _ => FileConfig::default(),
            },
        };
        Self::from_parts(file, registry_path, output_dir)
    }

    fn from_parts(
        file: FileConfig,
        registry_path: Option<PathBuf>,
        output_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let defaults = Settings::default();
        Ok(Self {
            registry_path: expand_home(
                registry_path
                    .or(file.registry_path)
                    .unwrap_or(defaults.registry_path),
            )?,
            output_dir: expand_home(output_dir.or(file.output_dir).unwrap_or(defaults.output_dir))?,
            default_window_days: file
                .default_window_days
                .unwrap_or(defaults.default_window_days),
        })
    }
}

/// Parse a TOML config file.
pub fn load_config_file(path: &Path) -> Result<FileConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// `<config dir>/property-registry/config.toml`, e.g. `~/.config/property-registry/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("property-registry").join("config.toml"))
}

fn expand_home(path: PathBuf) -> Result<PathBuf> {
    let as_str = path.to_string_lossy();
    if let Some(stripped) = as_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
        return Ok(home.join(stripped));
    }
    if as_str == "~" {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
        return Ok(home);
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_file_or_flags() {
        let settings = Settings::from_parts(FileConfig::default(), None, None).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.default_window_days, 7);
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = FileConfig {
            registry_path: Some(PathBuf::from("/srv/registry.json")),
            output_dir: Some(PathBuf::from("/srv/out")),
            default_window_days: Some(30),
        };
        let settings =
            Settings::from_parts(file, Some(PathBuf::from("/tmp/other.json")), None).unwrap();
        assert_eq!(settings.registry_path, PathBuf::from("/tmp/other.json"));
        assert_eq!(settings.output_dir, PathBuf::from("/srv/out"));
        assert_eq!(settings.default_window_days, 30);
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "registry_path = \"/data/registry.json\"\ndefault_window_days = 3\n",
        )
        .unwrap();

        let file = load_config_file(&path).unwrap();
        assert_eq!(file.registry_path, Some(PathBuf::from("/data/registry.json")));
        assert_eq!(file.output_dir, None);
        assert_eq!(file.default_window_days, Some(3));

        let settings = Settings::resolve(Some(&path), None, None).unwrap();
        assert_eq!(settings.registry_path, PathBuf::from("/data/registry.json"));
    }

    #[test]
    fn test_unknown_keys_and_missing_file_are_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "registry = \"typo\"\n").unwrap();
        assert!(load_config_file(&path).is_err());

        assert!(Settings::resolve(Some(&dir.path().join("nope.toml")), None, None).is_err());
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_home(PathBuf::from("~/registry.json")).unwrap(),
                home.join("registry.json")
            );
        }
        assert_eq!(
            expand_home(PathBuf::from("relative/registry.json")).unwrap(),
            PathBuf::from("relative/registry.json")
        );
    }
}
