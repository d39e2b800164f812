//! Settings file discovery, loading and merging

use super::schema::Settings;
use super::validator::SettingsValidator;
use crate::error::{Result, SettingsError};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const BUILTIN_TOML: &str = include_str!("../../builtin-settings.toml");

pub struct SettingsLoader;

impl SettingsLoader {
    /// Find user settings by checking environment and standard locations
    pub fn find_user_settings() -> Option<PathBuf> {
        // 1. $NETFENCE_CONFIG
        if let Ok(path) = env::var("NETFENCE_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        // 2. $XDG_CONFIG_HOME/netfence/settings.toml
        if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            let p = PathBuf::from(xdg).join("netfence/settings.toml");
            if p.exists() {
                return Some(p);
            }
        }

        // 3. ~/.config/netfence/settings.toml
        if let Ok(home) = env::var("HOME") {
            let p = PathBuf::from(home).join(".config/netfence/settings.toml");
            if p.exists() {
                return Some(p);
            }
        }

        None
    }

    /// Per-user location of the persisted configuration record
    pub fn default_record_path() -> PathBuf {
        if cfg!(windows) {
            if let Ok(local) = env::var("LOCALAPPDATA") {
                return PathBuf::from(local).join("NetFence").join("config.json");
            }
        }

        if let Ok(xdg) = env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("netfence/config.json");
        }

        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(".local/share/netfence/config.json");
        }

        PathBuf::from("config.json")
    }

    /// Resolve where the configuration record lives for these settings
    pub fn record_path(settings: &Settings) -> PathBuf {
        settings
            .store
            .path
            .clone()
            .unwrap_or_else(Self::default_record_path)
    }

    fn read_table(path: &Path) -> Result<toml::Table> {
        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let table = toml::from_str::<toml::Table>(&contents).map_err(SettingsError::from)?;
        Ok(table)
    }

    fn builtin_table() -> Result<toml::Table> {
        let table = toml::from_str::<toml::Table>(BUILTIN_TOML).map_err(SettingsError::from)?;
        Ok(table)
    }

    /// Load settings from a single file without the built-in layer
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Settings> {
        let table = Self::read_table(path.as_ref())?;
        Self::finish(toml::Value::Table(table))
    }

    /// Load built-in settings embedded in the binary
    pub fn load_builtin() -> Result<Settings> {
        Self::finish(toml::Value::Table(Self::builtin_table()?))
    }

    /// Load with full priority order
    /// Priority: built-in < user < explicit
    pub fn load_with_priority(explicit: Option<PathBuf>) -> Result<Settings> {
        let mut merged = toml::Value::Table(Self::builtin_table()?);

        if let Some(user_path) = Self::find_user_settings() {
            tracing::debug!("Loading user settings from {:?}", user_path);
            merge_values(&mut merged, toml::Value::Table(Self::read_table(&user_path)?));
        }

        if let Some(explicit_path) = explicit {
            tracing::debug!("Loading explicit settings from {:?}", explicit_path);
            merge_values(
                &mut merged,
                toml::Value::Table(Self::read_table(&explicit_path)?),
            );
        }

        Self::finish(merged)
    }

    fn finish(value: toml::Value) -> Result<Settings> {
        let settings: Settings = value.try_into().map_err(SettingsError::from)?;
        SettingsValidator::validate(&settings)?;
        Ok(settings)
    }
}

/// Deep-merge `overlay` into `base`: tables merge key by key, anything else replaces
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::FirewallBackend;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builtin_parses() {
        let settings = SettingsLoader::load_builtin().unwrap();
        assert_eq!(settings.common.config_version, "1.0");
        assert!(!settings.firewall.targets.is_empty());
        assert!(!settings.hosts.domains.is_empty());
        assert_eq!(settings.firewall.wildcard.as_deref(), Some("app-svc*.exe"));
    }

    #[test]
    fn test_merge_overrides_scalars_and_keeps_siblings() {
        let mut base: toml::Value = toml::Value::Table(
            toml::from_str(
                r#"
[firewall]
block_prefix = "A_"
targets = ["one.exe"]
"#,
            )
            .unwrap(),
        );
        let overlay = toml::Value::Table(
            toml::from_str(
                r#"
[firewall]
targets = ["two.exe", "three.exe"]
"#,
            )
            .unwrap(),
        );

        merge_values(&mut base, overlay);

        let firewall = base.get("firewall").unwrap();
        assert_eq!(firewall.get("block_prefix").unwrap().as_str(), Some("A_"));
        assert_eq!(firewall.get("targets").unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[firewall]
backend = "dry-run"
targets = ["tool.exe"]

[hosts]
domains = ["blocked.test"]
"#
        )
        .unwrap();

        let settings = SettingsLoader::load_from_file(file.path()).unwrap();
        assert_eq!(settings.firewall.backend, FirewallBackend::DryRun);
        assert_eq!(settings.hosts.domains.len(), 1);
        // Unspecified values fall back to schema defaults
        assert_eq!(settings.store.debounce_ms, 500);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[hosts]
sinkhole = "not-an-address"
"#
        )
        .unwrap();

        assert!(SettingsLoader::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_record_path_prefers_explicit() {
        let mut settings = Settings::default();
        settings.store.path = Some(PathBuf::from("/tmp/netfence-test/config.json"));
        assert_eq!(
            SettingsLoader::record_path(&settings),
            PathBuf::from("/tmp/netfence-test/config.json")
        );
    }
}
