//! Exclusion policy shared by push and pull.
//!
//! A path is excluded when any component is a pruned directory name or when
//! an exclude glob matches either the relative path or the file name. Binary
//! content is recognised by extension or by null bytes.

use crate::config::SyncConfig;
use glob::Pattern;

#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    pruned_dirs: Vec<String>,
    globs: Vec<Pattern>,
    binary_extensions: Vec<String>,
}

/// Outcome of checking a file's content before it may enter the file map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentCheck {
    /// Clean text, possibly with stray null bytes removed.
    Text(String),
    /// More than half of the content was null bytes.
    Binary,
}

impl ExclusionPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        let globs = config
            .exclude_globs
            .iter()
            .filter_map(|g| match Pattern::new(g) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!("Ignoring invalid exclude glob {g}: {e}");
                    None
                }
            })
            .collect();

        Self {
            pruned_dirs: config.pruned_dirs.clone(),
            globs,
            binary_extensions: config
                .binary_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Directory names a provider should not descend into.
    pub fn pruned_dirs(&self) -> &[String] {
        &self.pruned_dirs
    }

    /// Whether a relative path is excluded from syncing altogether.
    pub fn is_excluded(&self, path: &str) -> bool {
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        let mut file_name = "";
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                file_name = component;
            } else if self.pruned_dirs.iter().any(|d| d == component) {
                return true;
            }
        }

        self.globs
            .iter()
            .any(|g| g.matches(path) || g.matches(file_name))
    }

    pub fn is_binary_path(&self, path: &str) -> bool {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_lowercase();
                self.binary_extensions.iter().any(|b| *b == ext)
            }
            _ => false,
        }
    }

    /// Strip null bytes; content that loses more than half its length is
    /// treated as binary.
    pub fn check_content(&self, content: &str) -> ContentCheck {
        if !content.contains('\0') {
            return ContentCheck::Text(content.to_string());
        }
        let stripped: String = content.chars().filter(|c| *c != '\0').collect();
        let removed = content.len() - stripped.len();
        if removed * 2 > content.len() {
            ContentCheck::Binary
        } else {
            ContentCheck::Text(stripped)
        }
    }
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_dependency_and_build_dirs() {
        let policy = ExclusionPolicy::default();
        assert!(policy.is_excluded("node_modules/react/index.js"));
        assert!(policy.is_excluded("packages/ui/node_modules/x.js"));
        assert!(policy.is_excluded(".next/server/page.js"));
        assert!(policy.is_excluded(".git/HEAD"));
        assert!(!policy.is_excluded("app/page.tsx"));
        // A file named like a pruned dir is not a directory.
        assert!(!policy.is_excluded("src/build"));
    }

    #[test]
    fn excludes_lockfiles_and_os_metadata_anywhere() {
        let policy = ExclusionPolicy::default();
        assert!(policy.is_excluded("package-lock.json"));
        assert!(policy.is_excluded("app/.DS_Store"));
        assert!(policy.is_excluded("logs/npm-debug.log"));
        assert!(!policy.is_excluded("package.json"));
    }

    #[test]
    fn binary_extension_is_case_insensitive() {
        let policy = ExclusionPolicy::default();
        assert!(policy.is_binary_path("public/logo.PNG"));
        assert!(policy.is_binary_path("fonts/inter.woff2"));
        assert!(!policy.is_binary_path("public/logo.svg"));
        assert!(!policy.is_binary_path(".png"));
    }

    #[test]
    fn null_bytes_are_stripped_or_rejected() {
        let policy = ExclusionPolicy::default();
        assert_eq!(
            policy.check_content("abc\0def"),
            ContentCheck::Text("abcdef".to_string())
        );
        assert_eq!(policy.check_content("\0\0\0a"), ContentCheck::Binary);
        assert_eq!(
            policy.check_content("plain"),
            ContentCheck::Text("plain".to_string())
        );
    }
}
