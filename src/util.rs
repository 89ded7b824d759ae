use std::path::Path;
use crate::layout::InstallLayout;
use anyhow::{Context, Result, bail};
use walkdir::WalkDir;

/// Separator between entries of a command-search-path value.
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: &str = ";";

/// Separator between entries of a command-search-path value.
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: &str = ":";

/// Materializes the directory tree of an [`InstallLayout`].
///
/// Creates the root, every root-derived sub-directory and the cache directory
/// if they don't already exist. Re-running against an existing installation is
/// a no-op.
pub fn ensure_install_dirs(layout: &InstallLayout) -> Result<()> {
    std::fs::create_dir_all(&layout.root)
        .with_context(|| format!("could not create install root '{}'", layout.root.display()))?;
    for path in layout.derived_paths() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("could not create '{}'", path.display()))?;
    }
    std::fs::create_dir_all(&layout.cache_dir)
        .with_context(|| format!("could not create cache dir '{}'", layout.cache_dir.display()))?;
    Ok(())
}

/// Recursively copies `src` into `dest`, mirroring the tree and overwriting
/// files that already exist. Directories are created as needed.
pub fn mirror_copy(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("could not create '{}'", target.display()))?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target).with_context(|| {
                format!("could not copy '{}' to '{}'", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

/// Extracts the trailing file name of a download URL.
pub fn file_name_from_url(url: &str) -> Result<String> {
    let name = url.trim_end_matches('/').split('/').next_back().unwrap_or_default();
    if name.is_empty() {
        bail!("could not determine a file name from '{}'", url);
    }
    Ok(name.to_string())
}
