//! Search root resolution

use crate::settings::FirewallSettings;
use std::env;
use std::path::{Path, PathBuf};

/// Supplies the optional secondary search root (e.g. a license server install)
pub trait PathResolver: Send + Sync {
    /// `None` means there is no secondary root; that is not an error
    fn secondary_root(&self) -> Option<PathBuf>;
}

/// Resolves the secondary root from an explicit setting, then an environment variable
#[derive(Debug, Clone, Default)]
pub struct SettingsPathResolver {
    explicit: Option<PathBuf>,
    env_var: Option<String>,
}

impl SettingsPathResolver {
    pub fn new(settings: &FirewallSettings) -> Self {
        Self {
            explicit: settings.secondary_root.clone(),
            env_var: settings.secondary_root_env.clone(),
        }
    }
}

impl PathResolver for SettingsPathResolver {
    fn secondary_root(&self) -> Option<PathBuf> {
        let candidate = self.explicit.clone().or_else(|| {
            let var = self.env_var.as_deref()?;
            env::var_os(var)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })?;

        if candidate.is_dir() {
            Some(candidate)
        } else {
            tracing::debug!("Secondary root {:?} does not exist; ignoring", candidate);
            None
        }
    }
}

/// A resolver with a fixed answer
#[derive(Debug, Clone, Default)]
pub struct FixedPathResolver(pub Option<PathBuf>);

impl PathResolver for FixedPathResolver {
    fn secondary_root(&self) -> Option<PathBuf> {
        self.0.clone()
    }
}

/// Nearest ancestor of `path` (including itself) whose directory name is `name`, ignoring case
pub fn find_ancestor(path: &Path, name: &str) -> Option<PathBuf> {
    path.ancestors()
        .find(|dir| {
            dir.file_name()
                .is_some_and(|n| n.to_string_lossy().eq_ignore_ascii_case(name))
        })
        .map(Path::to_path_buf)
}

/// Root the process watcher should monitor for an install path
pub fn monitoring_root(install_path: &Path, ancestor: Option<&str>) -> PathBuf {
    ancestor
        .and_then(|name| find_ancestor(install_path, name))
        .unwrap_or_else(|| install_path.to_path_buf())
}
