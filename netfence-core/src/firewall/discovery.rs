//! Executable discovery under the search roots

use std::collections::VecDeque;
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use wildmatch::WildMatch;

/// Case-insensitive executable-name glob
#[derive(Debug)]
pub struct NamePattern {
    source: String,
    matcher: WildMatch,
}

impl NamePattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            source: pattern.to_string(),
            matcher: WildMatch::new(&pattern.to_lowercase()),
        }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.matcher.matches(&file_name.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Primary root first, then the secondary root when it is a different directory
pub fn search_roots(primary: &Path, secondary: Option<PathBuf>) -> Vec<PathBuf> {
    let mut roots = vec![primary.to_path_buf()];
    if let Some(secondary) = secondary {
        if !same_path(primary, &secondary) {
            roots.push(secondary);
        }
    }
    roots
}

/// First file named `name` (ignoring case) across `roots`; the first root that has one wins
pub fn find_first(roots: &[PathBuf], name: &str) -> Option<PathBuf> {
    let wanted = name.to_lowercase();
    for root in roots {
        let mut found = None;
        let _ = walk(root, &mut |path: &Path, file_name: &str| {
            if file_name == wanted {
                found = Some(path.to_path_buf());
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Every file under every root whose name matches `pattern`
pub fn find_matching(roots: &[PathBuf], pattern: &NamePattern) -> Vec<PathBuf> {
    let mut matches = Vec::new();
    for root in roots {
        let _ = walk(root, &mut |path: &Path, file_name: &str| {
            if pattern.matches(file_name) {
                matches.push(path.to_path_buf());
            }
            ControlFlow::Continue(())
        });
    }
    matches
}

/// Breadth-first walk over regular files, shallowest first, siblings sorted by lowercase name
///
/// `visit` receives the path and the lowercased file name. Symlinked
/// directories are not followed; unreadable directories are skipped.
fn walk(
    root: &Path,
    visit: &mut dyn FnMut(&Path, &str) -> ControlFlow<()>,
) -> ControlFlow<()> {
    let mut queue = VecDeque::from([root.to_path_buf()]);

    while let Some(dir) = queue.pop_front() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Skipping {:?}: {}", dir, e);
                continue;
            }
        };

        let mut entries: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().to_lowercase();
                (name, entry)
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, entry) in entries {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                queue.push_back(path);
            } else if file_type.is_file() || (file_type.is_symlink() && path.is_file()) {
                visit(&path, &name)?;
            }
        }
    }

    ControlFlow::Continue(())
}

/// Path equality ignoring ASCII case, matching how executable paths are compared elsewhere
pub fn same_path(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().eq_ignore_ascii_case(&b.to_string_lossy())
}
