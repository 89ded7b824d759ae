use std::fs;
use std::path::{Component, Path, PathBuf};
use anyhow::{Context, Result};

use crate::layout::TOOL_NAME;

/// How the generated shims address the entry point.
///
/// Relative addressing keeps the installation relocatable; it is only safe
/// when the entry point and the shims directory live on the same volume. When
/// they don't (the relative form would have to start with a drive-letter
/// prefix), all three artifacts embed the absolute path instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShimTarget {
    Relative(PathBuf),
    Absolute(PathBuf),
}

impl ShimTarget {
    pub fn resolve(entry_point: &Path, shims_dir: &Path) -> ShimTarget {
        match relative_to(entry_point, shims_dir) {
            Some(rel) => ShimTarget::Relative(rel),
            None => ShimTarget::Absolute(entry_point.to_path_buf()),
        }
    }
}

/// Writes the three launcher artifacts into the shims directory and returns
/// their paths: a POSIX-shell shim without extension, a Windows batch `.cmd`
/// and a PowerShell `.ps1`. All three forward arguments and stdin unchanged
/// and exit with the entry point's exit status. Existing artifacts are
/// overwritten.
pub fn write_shims(entry_point: &Path, shims_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(shims_dir)
        .with_context(|| format!("could not create shims dir '{}'", shims_dir.display()))?;
    let target = ShimTarget::resolve(entry_point, shims_dir);

    let sh_path = shims_dir.join(TOOL_NAME);
    fs::write(&sh_path, posix_shim(&target))
        .with_context(|| format!("could not write '{}'", sh_path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&sh_path, fs::Permissions::from_mode(0o755))?;
    }

    let cmd_path = shims_dir.join(format!("{TOOL_NAME}.cmd"));
    fs::write(&cmd_path, batch_shim(&target))
        .with_context(|| format!("could not write '{}'", cmd_path.display()))?;

    let ps1_path = shims_dir.join(format!("{TOOL_NAME}.ps1"));
    fs::write(&ps1_path, powershell_shim(&target))
        .with_context(|| format!("could not write '{}'", ps1_path.display()))?;

    Ok(vec![sh_path, cmd_path, ps1_path])
}

/// `target` relative to `base` by component walk. `None` when the two don't
/// share a filesystem root (different drive/volume), in which case relative
/// addressing is unsafe.
pub fn relative_to(target: &Path, base: &Path) -> Option<PathBuf> {
    let target: Vec<Component> = target.components().collect();
    let base: Vec<Component> = base.components().collect();

    let mut shared = 0;
    while shared < target.len() && shared < base.len() && target[shared] == base[shared] {
        shared += 1;
    }
    if shared == 0 {
        return None;
    }
    let mut rel = PathBuf::new();
    for _ in shared..base.len() {
        rel.push("..");
    }
    for component in &target[shared..] {
        rel.push(component.as_os_str());
    }
    Some(rel)
}

fn join_components(path: &Path, separator: &str) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(separator)
}

fn posix_shim(target: &ShimTarget) -> String {
    // exec replaces the shell, so the entry point owns stdin and the exit
    // status without a second interpreter pass.
    match target {
        ShimTarget::Relative(rel) => {
            format!("#!/bin/sh\nexec \"$(dirname \"$0\")/{}\" \"$@\"\n", join_components(rel, "/"))
        }
        ShimTarget::Absolute(abs) => {
            format!("#!/bin/sh\nexec \"{}\" \"$@\"\n", abs.display())
        }
    }
}

fn batch_shim(target: &ShimTarget) -> String {
    match target {
        ShimTarget::Relative(rel) => {
            format!("@echo off\r\n\"%~dp0{}\" %*\r\n", join_components(rel, "\\"))
        }
        ShimTarget::Absolute(abs) => {
            format!("@echo off\r\n\"{}\" %*\r\n", abs.display())
        }
    }
}

fn powershell_shim(target: &ShimTarget) -> String {
    match target {
        ShimTarget::Relative(rel) => format!(
            "& \"$PSScriptRoot\\{}\" @args\r\nexit $LASTEXITCODE\r\n",
            join_components(rel, "\\")
        ),
        ShimTarget::Absolute(abs) => {
            format!("& \"{}\" @args\r\nexit $LASTEXITCODE\r\n", abs.display())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_relative_to_walks_up_and_down() {
        let rel = relative_to(
            Path::new("/root/apps/ladle/current/bin/ladle"),
            Path::new("/root/shims"),
        )
        .unwrap();
        assert_eq!(rel, PathBuf::from("../apps/ladle/current/bin/ladle"));
    }

    #[test]
    fn test_relative_to_rejects_disjoint_roots() {
        assert_eq!(relative_to(Path::new("rel/bin/ladle"), Path::new("/abs/shims")), None);
    }

    #[cfg(windows)]
    #[test]
    fn test_relative_to_rejects_a_different_drive() {
        assert_eq!(relative_to(Path::new(r"D:\ladle\bin\ladle.exe"), Path::new(r"C:\ladle\shims")), None);
    }

    #[test]
    fn test_same_volume_shims_embed_a_relative_path() {
        let dir = tempdir().unwrap();
        let entry = dir.path().join("apps").join("ladle").join("current").join("bin").join("ladle");
        let shims = dir.path().join("shims");

        let artifacts = write_shims(&entry, &shims).unwrap();
        assert_eq!(artifacts.len(), 3);

        let sh = std::fs::read_to_string(&artifacts[0]).unwrap();
        assert!(sh.contains("$(dirname \"$0\")/../apps/ladle/current/bin/ladle"));
        let cmd = std::fs::read_to_string(&artifacts[1]).unwrap();
        assert!(cmd.contains(r"%~dp0..\apps\ladle\current\bin\ladle"));
        let ps1 = std::fs::read_to_string(&artifacts[2]).unwrap();
        assert!(ps1.contains(r"$PSScriptRoot\..\apps\ladle\current\bin\ladle"));
        assert!(ps1.contains("exit $LASTEXITCODE"));
    }

    #[test]
    fn test_absolute_target_lands_in_all_three_forms() {
        let target = ShimTarget::Absolute(PathBuf::from("/opt/ladle/bin/ladle"));
        for body in [posix_shim(&target), batch_shim(&target), powershell_shim(&target)] {
            assert!(body.contains("/opt/ladle/bin/ladle"));
        }
        assert!(!posix_shim(&target).contains("dirname"));
    }

    #[test]
    fn test_existing_artifacts_are_overwritten() {
        let dir = tempdir().unwrap();
        let shims = dir.path().join("shims");
        std::fs::create_dir_all(&shims).unwrap();
        std::fs::write(shims.join(TOOL_NAME), "stale").unwrap();

        let entry = dir.path().join("apps").join("ladle").join("current").join("bin").join("ladle");
        write_shims(&entry, &shims).unwrap();
        let sh = std::fs::read_to_string(shims.join(TOOL_NAME)).unwrap();
        assert!(sh.starts_with("#!/bin/sh"));
    }
}
