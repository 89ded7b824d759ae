use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result, bail};
use fs2::FileExt;
use flate2::read::GzDecoder;

use crate::util::mirror_copy;

/// Bounded wait for an archive held open by another process (typically an
/// antivirus scan of the fresh download).
///
/// The check-then-extract sequence is not atomic; another process can grab the
/// file between the last probe and extraction. That window is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockWait {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for LockWait {
    fn default() -> Self {
        LockWait { interval: Duration::from_secs(2), max_attempts: 10 }
    }
}

/// Installs a downloaded archive into `destination`.
///
/// Extraction goes through a staging directory next to the destination, and
/// the staged tree is then mirrored (overwriting) into place, so a failure
/// mid-extraction never leaves the destination half-populated. The staging
/// directory and the archive are removed on success. Re-running after a
/// partial failure is safe: staging is recreated from scratch every time.
pub fn install_archive(archive: &Path, destination: &Path, wait: &LockWait) -> Result<()> {
    install_archive_with(archive, destination, wait, archive_is_lockable, |d| std::thread::sleep(d))
}

fn install_archive_with(
    archive: &Path,
    destination: &Path,
    wait: &LockWait,
    lockable: impl FnMut(&Path) -> bool,
    sleep: impl FnMut(Duration),
) -> Result<()> {
    if !archive.exists() {
        bail!("archive '{}' does not exist", archive.display());
    }
    wait_until_lockable(archive, wait, lockable, sleep)?;

    let staging = staging_dir(destination);
    if staging.exists() {
        fs::remove_dir_all(&staging)
            .with_context(|| format!("could not clear staging dir '{}'", staging.display()))?;
    }
    fs::create_dir_all(&staging)?;

    unpack(archive, &staging)?;
    let content_root = unwrap_single_dir(&staging)?;

    fs::create_dir_all(destination)?;
    mirror_copy(&content_root, destination)?;

    fs::remove_dir_all(&staging)?;
    fs::remove_file(archive)
        .with_context(|| format!("could not remove '{}'", archive.display()))?;
    Ok(())
}

/// Polls `lockable` until it succeeds, sleeping `wait.interval` between failed
/// checks, up to `wait.max_attempts` checks. Returns the attempt that
/// succeeded.
pub fn wait_until_lockable(
    archive: &Path,
    wait: &LockWait,
    mut lockable: impl FnMut(&Path) -> bool,
    mut sleep: impl FnMut(Duration),
) -> Result<u32> {
    for attempt in 1..=wait.max_attempts {
        if lockable(archive) {
            return Ok(attempt);
        }
        if attempt < wait.max_attempts {
            sleep(wait.interval);
        }
    }
    bail!(
        "'{}' is still locked by another process after {} checks; \
         close whatever is holding it open (often an antivirus scan) and re-run the installer",
        archive.display(),
        wait.max_attempts
    );
}

/// Whether the archive can be opened and locked for exclusive read/write
/// right now.
pub fn archive_is_lockable(path: &Path) -> bool {
    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                true
            }
            Err(_) => false,
        },
        Err(_) => false,
    }
}

/// Staging sibling of the destination, so a failed merge never leaves staged
/// files inside the destination itself.
fn staging_dir(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "payload".to_string());
    destination.with_file_name(format!("_{name}-extract"))
}

fn unpack(archive: &Path, staging: &Path) -> Result<()> {
    let name = archive.to_string_lossy().to_lowercase();
    if name.ends_with(".zip") {
        let file = File::open(archive)?;
        let mut zip = zip::ZipArchive::new(file)
            .with_context(|| format!("'{}' is not a readable zip archive", archive.display()))?;
        zip.extract(staging)
            .with_context(|| format!("could not extract '{}'", archive.display()))?;
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        let file = File::open(archive)?;
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        tar.unpack(staging)
            .with_context(|| format!("could not extract '{}'", archive.display()))?;
    } else {
        bail!("unsupported archive format: '{}'", archive.display());
    }
    Ok(())
}

/// Source archives wrap their content in a single `<repo>-<branch>/` top-level
/// directory; unwrap it so the destination gets the tree itself.
fn unwrap_single_dir(staging: &Path) -> Result<PathBuf> {
    let entries: Vec<_> = fs::read_dir(staging)?.collect::<std::io::Result<Vec<_>>>()?;
    if entries.len() == 1 && entries[0].file_type()?.is_dir() {
        Ok(entries[0].path())
    } else {
        Ok(staging.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_fixture_zip(path: &Path, top_level: &str) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.add_directory(format!("{top_level}/bin"), SimpleFileOptions::default()).unwrap();
        zip.start_file(format!("{top_level}/bin/ladle"), SimpleFileOptions::default()).unwrap();
        zip.write_all(b"#!/bin/sh\necho ladle\n").unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_lock_wait_succeeds_on_fourth_check_after_three_waits() {
        let wait = LockWait { interval: Duration::from_secs(2), max_attempts: 10 };
        let mut checks = 0u32;
        let mut sleeps = Vec::new();
        let attempt = wait_until_lockable(
            Path::new("archive.zip"),
            &wait,
            |_| {
                checks += 1;
                checks >= 4
            },
            |d| sleeps.push(d),
        )
        .unwrap();
        assert_eq!(attempt, 4);
        assert_eq!(sleeps, vec![Duration::from_secs(2); 3]);
    }

    #[test]
    fn test_lock_wait_gives_up_after_ten_checks() {
        let wait = LockWait::default();
        let mut checks = 0u32;
        let err = wait_until_lockable(Path::new("archive.zip"), &wait, |_| {
            checks += 1;
            false
        }, |_| {});
        assert!(err.is_err());
        assert_eq!(checks, 10);
    }

    #[test]
    fn test_permanently_locked_archive_is_never_extracted() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("payload.zip");
        write_fixture_zip(&archive, "ladle-main");
        let destination = dir.path().join("apps").join("ladle").join("current");

        let err = install_archive_with(
            &archive,
            &destination,
            &LockWait::default(),
            |_| false,
            |_| {},
        );
        assert!(err.is_err());
        assert!(!destination.exists());
        assert!(archive.exists());
    }

    #[test]
    fn test_missing_archive_is_fatal() {
        let dir = tempdir().unwrap();
        let err = install_archive(&dir.path().join("gone.zip"), &dir.path().join("dest"), &LockWait::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_stage_then_merge_unwraps_and_cleans_up() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("payload.zip");
        write_fixture_zip(&archive, "ladle-main");
        let destination = dir.path().join("apps").join("ladle").join("current");

        install_archive(&archive, &destination, &LockWait::default()).unwrap();

        assert!(destination.join("bin").join("ladle").exists());
        assert!(!staging_dir(&destination).exists());
        assert!(!archive.exists());
    }

    #[test]
    fn test_leftover_staging_from_a_failed_run_is_cleared() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("payload.zip");
        write_fixture_zip(&archive, "ladle-main");
        let destination = dir.path().join("apps").join("ladle").join("current");

        let staging = staging_dir(&destination);
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("junk"), "partial").unwrap();

        install_archive(&archive, &destination, &LockWait::default()).unwrap();
        assert!(destination.join("bin").join("ladle").exists());
        assert!(!destination.join("junk").exists());
    }

    #[test]
    fn test_unsupported_format_is_rejected() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("payload.rar");
        fs::write(&archive, "not an archive").unwrap();
        let err = install_archive(&archive, &dir.path().join("dest"), &LockWait::default());
        assert!(err.is_err());
    }
}
