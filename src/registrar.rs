use std::path::Path;
use anyhow::{Context, Result};
use colored::Colorize;

use crate::util::PATH_LIST_SEPARATOR;

/// Which persisted command-search-path the registrar targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    User,
    Machine,
}

/// Value type of the stored search-path: a plain string, or one that still
/// contains variable references to expand at lookup time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Literal,
    Expandable,
}

/// The persisted search-path value for one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPath {
    pub value: String,
    pub kind: ValueKind,
}

/// Durable per-user / per-machine storage of the command search path.
pub trait PathStore {
    fn load(&self, scope: Scope) -> Result<Option<StoredPath>>;
    fn store(&mut self, scope: Scope, value: &StoredPath) -> Result<()>;
}

/// Best-effort notification that the persisted environment changed, so
/// already-running shells and desktop components can pick it up without a
/// re-login. May fail; the registrar never treats that as fatal.
pub trait EnvNotifier {
    fn notify(&self) -> Result<()>;
}

/// Registers the shims directory on the command search path.
///
/// The durable store is only written when the directory is not already part
/// of the stored value (case-insensitive substring check); the new entry is
/// prepended and the value kind of the existing entry is kept. The in-process
/// `PATH` is updated unconditionally so the rest of this run (and any child
/// process it spawns) resolves shims immediately, independent of how long
/// the durable write takes to reach other processes.
pub fn register_path(
    store: &mut dyn PathStore,
    notifier: &dyn EnvNotifier,
    shims_dir: &Path,
    scope: Scope,
) -> Result<()> {
    let shims = shims_dir.to_string_lossy();
    let current = store.load(scope)?;
    let already_present =
        current.as_ref().is_some_and(|stored| contains_ignore_case(&stored.value, &shims));

    if !already_present {
        let updated = match current {
            Some(stored) => StoredPath {
                value: format!("{shims}{PATH_LIST_SEPARATOR}{}", stored.value),
                kind: stored.kind,
            },
            None => StoredPath { value: shims.to_string(), kind: ValueKind::Literal },
        };
        store
            .store(scope, &updated)
            .context("could not persist the shims directory on the command search path")?;
        println!("Added '{}' to your path", shims_dir.display());
    }

    prepend_process_path(shims_dir);

    if let Err(err) = notifier.notify() {
        eprintln!(
            "{} environment change notification failed: {err:#}",
            "warning:".yellow().bold()
        );
    }
    Ok(())
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Prepends `dir` to the in-process `PATH` unless it is already on it.
pub fn prepend_process_path(dir: &Path) {
    let dir = dir.to_string_lossy();
    let current = std::env::var("PATH").unwrap_or_default();
    if contains_ignore_case(&current, &dir) {
        return;
    }
    let updated = if current.is_empty() {
        dir.to_string()
    } else {
        format!("{dir}{PATH_LIST_SEPARATOR}{current}")
    };
    // SAFETY: the installer is single-threaded; nothing reads the environment
    // concurrently.
    unsafe { std::env::set_var("PATH", updated) };
}

#[cfg(not(windows))]
pub use profile::ProfilePathStore as HostPathStore;
#[cfg(not(windows))]
pub use profile::NullNotifier as HostEnvNotifier;
#[cfg(windows)]
pub use registry::RegistryPathStore as HostPathStore;
#[cfg(windows)]
pub use registry::SettingChangeNotifier as HostEnvNotifier;

/// Unix backend: the durable store is a managed `export PATH=...` line in a
/// per-scope profile script, sourced from the user's shell startup files.
#[cfg(not(windows))]
mod profile {
    use super::*;
    use std::path::PathBuf;
    use anyhow::anyhow;
    use directories::BaseDirs;
    use regex::Regex;

    const EXPORT_LINE: &str = r#"(?m)^export PATH="([^"]+):\$PATH"$"#;

    #[derive(Debug, Default)]
    pub struct ProfilePathStore;

    impl ProfilePathStore {
        fn script_path(scope: Scope) -> Result<PathBuf> {
            match scope {
                Scope::User => {
                    let base = BaseDirs::new()
                        .ok_or_else(|| anyhow!("could not determine the home directory"))?;
                    Ok(base.home_dir().join(".config").join("ladle").join("path.sh"))
                }
                Scope::Machine => Ok(PathBuf::from("/etc/profile.d/ladle.sh")),
            }
        }
    }

    impl PathStore for ProfilePathStore {
        fn load(&self, scope: Scope) -> Result<Option<StoredPath>> {
            let path = Self::script_path(scope)?;
            if !path.exists() {
                return Ok(None);
            }
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("could not read '{}'", path.display()))?;
            let re = Regex::new(EXPORT_LINE)?;
            Ok(re.captures(&text).map(|caps| {
                let value = caps[1].to_string();
                let kind = if value.contains('$') { ValueKind::Expandable } else { ValueKind::Literal };
                StoredPath { value, kind }
            }))
        }

        fn store(&mut self, scope: Scope, value: &StoredPath) -> Result<()> {
            let path = Self::script_path(scope)?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("could not create '{}'", parent.display()))?;
            }
            let script = format!("export PATH=\"{}:$PATH\"\n", value.value);
            std::fs::write(&path, script)
                .with_context(|| format!("could not write '{}'", path.display()))?;
            Ok(())
        }
    }

    /// There is no system-wide environment-change broadcast on unix; new
    /// shells pick the profile script up on their own.
    #[derive(Debug, Default)]
    pub struct NullNotifier;

    impl EnvNotifier for NullNotifier {
        fn notify(&self) -> Result<()> {
            Ok(())
        }
    }
}

/// Windows backend: the durable store is the per-scope `Environment` registry
/// key, driven through a PowerShell subprocess so `REG_SZ` vs `REG_EXPAND_SZ`
/// is preserved; the notifier broadcasts `WM_SETTINGCHANGE`.
#[cfg(windows)]
mod registry {
    use super::*;
    use std::process::Command;
    use anyhow::bail;

    #[derive(Debug, Default)]
    pub struct RegistryPathStore;

    impl RegistryPathStore {
        fn hive_and_key(scope: Scope) -> (&'static str, &'static str) {
            match scope {
                Scope::User => ("CurrentUser", "Environment"),
                Scope::Machine => (
                    "LocalMachine",
                    r"SYSTEM\CurrentControlSet\Control\Session Manager\Environment",
                ),
            }
        }

        fn run(script: &str) -> Result<std::process::Output> {
            Command::new("powershell")
                .args(["-NoProfile", "-NonInteractive", "-Command", script])
                .output()
                .context("could not run powershell against the environment registry key")
        }
    }

    impl PathStore for RegistryPathStore {
        fn load(&self, scope: Scope) -> Result<Option<StoredPath>> {
            let (hive, key) = Self::hive_and_key(scope);
            let script = format!(
                "$k = [Microsoft.Win32.Registry]::{hive}.OpenSubKey('{key}'); \
                 if ($null -eq $k -or $k.GetValueNames() -notcontains 'Path') {{ exit 2 }}; \
                 Write-Output $k.GetValueKind('Path'); \
                 Write-Output $k.GetValue('Path', '', [Microsoft.Win32.RegistryValueOptions]::DoNotExpandEnvironmentNames)"
            );
            let out = Self::run(&script)?;
            if out.status.code() == Some(2) {
                return Ok(None);
            }
            if !out.status.success() {
                bail!("reading the persisted path for {scope:?} failed: {}", String::from_utf8_lossy(&out.stderr));
            }
            let stdout = String::from_utf8_lossy(&out.stdout);
            let mut lines = stdout.lines();
            let kind = match lines.next().map(str::trim) {
                Some("ExpandString") => ValueKind::Expandable,
                _ => ValueKind::Literal,
            };
            let value = lines.next().unwrap_or("").trim_end_matches('\r').to_string();
            Ok(Some(StoredPath { value, kind }))
        }

        fn store(&mut self, scope: Scope, value: &StoredPath) -> Result<()> {
            let (hive, key) = Self::hive_and_key(scope);
            let reg_kind = match value.kind {
                ValueKind::Expandable => "ExpandString",
                ValueKind::Literal => "String",
            };
            let escaped = value.value.replace('\'', "''");
            let script = format!(
                "$k = [Microsoft.Win32.Registry]::{hive}.OpenSubKey('{key}', $true); \
                 $k.SetValue('Path', '{escaped}', [Microsoft.Win32.RegistryValueKind]::{reg_kind})"
            );
            let out = Self::run(&script)?;
            if !out.status.success() {
                bail!("writing the persisted path for {scope:?} failed: {}", String::from_utf8_lossy(&out.stderr));
            }
            Ok(())
        }
    }

    /// Broadcasts `WM_SETTINGCHANGE` for the `Environment` section so running
    /// shells and Explorer re-read the persisted variables.
    #[derive(Debug, Default)]
    pub struct SettingChangeNotifier;

    impl EnvNotifier for SettingChangeNotifier {
        fn notify(&self) -> Result<()> {
            let script = r#"$sig = '[DllImport("user32.dll", SetLastError = true, CharSet = CharSet.Auto)] public static extern System.IntPtr SendMessageTimeout(System.IntPtr hWnd, uint Msg, System.UIntPtr wParam, string lParam, uint fuFlags, uint uTimeout, out System.UIntPtr lpdwResult);'
$native = Add-Type -MemberDefinition $sig -Name Broadcast -Namespace LadleInit -PassThru
$result = [System.UIntPtr]::Zero
[void]$native::SendMessageTimeout([System.IntPtr]0xffff, 0x1A, [System.UIntPtr]::Zero, 'Environment', 2, 5000, [ref]$result)"#;
            let out = Command::new("powershell")
                .args(["-NoProfile", "-NonInteractive", "-Command", script])
                .output()
                .context("could not broadcast the environment change")?;
            if !out.status.success() {
                bail!("environment change broadcast failed: {}", String::from_utf8_lossy(&out.stderr));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[derive(Default)]
    struct MemoryPathStore {
        values: HashMap<Scope, StoredPath>,
        writes: u32,
    }

    impl PathStore for MemoryPathStore {
        fn load(&self, scope: Scope) -> Result<Option<StoredPath>> {
            Ok(self.values.get(&scope).cloned())
        }

        fn store(&mut self, scope: Scope, value: &StoredPath) -> Result<()> {
            self.values.insert(scope, value.clone());
            self.writes += 1;
            Ok(())
        }
    }

    struct OkNotifier;
    impl EnvNotifier for OkNotifier {
        fn notify(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FailingNotifier;
    impl EnvNotifier for FailingNotifier {
        fn notify(&self) -> Result<()> {
            anyhow::bail!("broadcast unavailable")
        }
    }

    #[test]
    fn test_fresh_store_gets_the_shims_dir() {
        let mut store = MemoryPathStore::default();
        register_path(&mut store, &OkNotifier, &PathBuf::from("/home/u/ladle/shims"), Scope::User).unwrap();
        let stored = store.values.get(&Scope::User).unwrap();
        assert_eq!(stored.value, "/home/u/ladle/shims");
        assert_eq!(stored.kind, ValueKind::Literal);
    }

    #[test]
    fn test_existing_value_is_prepended_and_kind_kept() {
        let mut store = MemoryPathStore::default();
        store.values.insert(
            Scope::User,
            StoredPath { value: "$HOME/bin".to_string(), kind: ValueKind::Expandable },
        );
        register_path(&mut store, &OkNotifier, &PathBuf::from("/home/u/ladle/shims"), Scope::User).unwrap();
        let stored = store.values.get(&Scope::User).unwrap();
        assert!(stored.value.starts_with("/home/u/ladle/shims"));
        assert!(stored.value.ends_with("$HOME/bin"));
        assert_eq!(stored.kind, ValueKind::Expandable);
    }

    #[test]
    fn test_present_value_skips_the_durable_write() {
        let mut store = MemoryPathStore::default();
        store.values.insert(
            Scope::User,
            StoredPath { value: "/Home/U/Ladle/Shims:/usr/bin".to_string(), kind: ValueKind::Literal },
        );
        register_path(&mut store, &OkNotifier, &PathBuf::from("/home/u/ladle/shims"), Scope::User).unwrap();
        assert_eq!(store.writes, 0);
    }

    #[test]
    fn test_registering_twice_writes_once() {
        let mut store = MemoryPathStore::default();
        let shims = PathBuf::from("/home/u/ladle/shims");
        register_path(&mut store, &OkNotifier, &shims, Scope::User).unwrap();
        register_path(&mut store, &OkNotifier, &shims, Scope::User).unwrap();
        assert_eq!(store.writes, 1);
    }

    #[test]
    fn test_notifier_failure_is_not_fatal() {
        let mut store = MemoryPathStore::default();
        register_path(&mut store, &FailingNotifier, &PathBuf::from("/home/u/ladle/shims"), Scope::User)
            .unwrap();
        assert_eq!(store.writes, 1);
    }

    #[test]
    fn test_process_path_is_mutated_even_when_store_is_untouched() {
        let dir = PathBuf::from("/tmp/ladle-proc-path-test/shims");
        let mut store = MemoryPathStore::default();
        store.values.insert(
            Scope::User,
            StoredPath { value: dir.to_string_lossy().to_string(), kind: ValueKind::Literal },
        );
        register_path(&mut store, &OkNotifier, &dir, Scope::User).unwrap();
        assert_eq!(store.writes, 0);
        let path = std::env::var("PATH").unwrap_or_default();
        assert!(path.to_lowercase().contains(&dir.to_string_lossy().to_lowercase()));
    }
}
