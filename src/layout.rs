use std::path::{Path, PathBuf};
use anyhow::{Result, anyhow};
use directories::BaseDirs;

/// Name of the tool this installer bootstraps.
pub const TOOL_NAME: &str = "ladle";

#[cfg(windows)]
const EXEC_EXT: &str = "exe";
#[cfg(not(windows))]
const EXEC_EXT: &str = "";

/// The fixed directory layout of one `ladle` installation.
///
/// Every path is absolute and derived once from the root directory (plus the
/// optional global/cache overrides) before any I/O happens. All later pipeline
/// steps read from this struct; none of them recomputes paths on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    /// Install root for program files, shims, buckets and configuration.
    pub root: PathBuf,
    /// Directory for apps installed machine-wide (`ladle install -g`).
    pub global_dir: PathBuf,
    /// Download cache shared between runs.
    pub cache_dir: PathBuf,
    /// Directory the launcher shims live in; this is what goes on `PATH`.
    pub shims_dir: PathBuf,
    /// Parent directory of all installed apps.
    pub apps_dir: PathBuf,
    /// The payload directory holding the current `ladle` program files.
    pub payload_dir: PathBuf,
    /// Parent directory of all buckets (package indexes).
    pub buckets_dir: PathBuf,
    /// The `main` bucket shipped with the bootstrap install.
    pub main_bucket_dir: PathBuf,
    /// Home of the persisted configuration document.
    pub config_home: PathBuf,
    /// The configuration document itself.
    pub config_file: PathBuf,
}

impl InstallLayout {
    /// Derives the full layout from a root directory. Pure, no I/O.
    ///
    /// `global_dir` and `cache_dir` keep their platform/root defaults unless
    /// overridden.
    pub fn from_root(
        root: PathBuf,
        global_dir: Option<PathBuf>,
        cache_dir: Option<PathBuf>,
    ) -> InstallLayout {
        let apps_dir = root.join("apps");
        let payload_dir = apps_dir.join(TOOL_NAME).join("current");
        let buckets_dir = root.join("buckets");
        let main_bucket_dir = buckets_dir.join("main");
        let config_home = root.join("config");
        let config_file = config_home.join("config.json");
        InstallLayout {
            global_dir: global_dir.unwrap_or_else(default_global_dir),
            cache_dir: cache_dir.unwrap_or_else(|| root.join("cache")),
            shims_dir: root.join("shims"),
            apps_dir,
            payload_dir,
            buckets_dir,
            main_bucket_dir,
            config_home,
            config_file,
            root,
        }
    }

    /// Like [`InstallLayout::from_root`], but falls back to `~/ladle` when no
    /// root override is given.
    pub fn resolve(
        root: Option<PathBuf>,
        global_dir: Option<PathBuf>,
        cache_dir: Option<PathBuf>,
    ) -> Result<InstallLayout> {
        let root = match root {
            Some(root) => root,
            None => default_root()?,
        };
        Ok(InstallLayout::from_root(root, global_dir, cache_dir))
    }

    /// The installed entry point every shim forwards to.
    pub fn entry_point(&self) -> PathBuf {
        self.payload_dir.join("bin").join(TOOL_NAME).with_extension(EXEC_EXT)
    }

    /// The sub-paths derived from the root, in a fixed order. This is what
    /// gets materialized on disk before the download starts.
    pub fn derived_paths(&self) -> [&Path; 6] {
        [
            &self.shims_dir,
            &self.apps_dir,
            &self.payload_dir,
            &self.buckets_dir,
            &self.main_bucket_dir,
            &self.config_home,
        ]
    }
}

/// Default install root: `ladle` under the user's home directory.
pub fn default_root() -> Result<PathBuf> {
    let base = BaseDirs::new().ok_or_else(|| anyhow!("could not determine the home directory"))?;
    Ok(base.home_dir().join(TOOL_NAME))
}

/// Default machine-wide apps directory.
#[cfg(windows)]
pub fn default_global_dir() -> PathBuf {
    let program_data =
        std::env::var_os("ProgramData").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"));
    program_data.join(TOOL_NAME)
}

/// Default machine-wide apps directory.
#[cfg(not(windows))]
pub fn default_global_dir() -> PathBuf {
    PathBuf::from("/usr/local").join(TOOL_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_derived_paths_are_distinct_and_under_root() {
        let root = PathBuf::from("/tmp/ladle-root");
        let layout = InstallLayout::from_root(root.clone(), None, None);

        let derived = layout.derived_paths();
        let unique: HashSet<_> = derived.iter().collect();
        assert_eq!(unique.len(), derived.len());
        for path in derived {
            assert!(path.starts_with(&root), "{} not under root", path.display());
        }
    }

    #[test]
    fn test_defaults_fill_in_global_and_cache() {
        let root = PathBuf::from("/tmp/ladle-root");
        let layout = InstallLayout::from_root(root.clone(), None, None);
        assert_eq!(layout.cache_dir, root.join("cache"));
        assert_eq!(layout.global_dir, default_global_dir());
    }

    #[test]
    fn test_overrides_win_over_defaults() {
        let root = PathBuf::from("/tmp/ladle-root");
        let layout = InstallLayout::from_root(
            root.clone(),
            Some(PathBuf::from("/srv/ladle-global")),
            Some(PathBuf::from("/var/cache/ladle")),
        );
        assert_eq!(layout.global_dir, PathBuf::from("/srv/ladle-global"));
        assert_eq!(layout.cache_dir, PathBuf::from("/var/cache/ladle"));
        // overrides never move the root-derived paths
        assert!(layout.shims_dir.starts_with(&root));
    }

    #[test]
    fn test_entry_point_is_under_the_payload() {
        let layout = InstallLayout::from_root(PathBuf::from("/tmp/ladle-root"), None, None);
        assert!(layout.entry_point().starts_with(&layout.payload_dir));
    }

    #[test]
    fn test_config_file_lives_in_config_home() {
        let layout = InstallLayout::from_root(PathBuf::from("/tmp/ladle-root"), None, None);
        assert_eq!(layout.config_file.parent(), Some(layout.config_home.as_path()));
    }
}
