use std::fmt;
use std::path::PathBuf;
use anyhow::{Context, Result, bail};
use colored::Colorize;

use crate::config;
use crate::extract::{LockWait, install_archive};
use crate::layout::{InstallLayout, TOOL_NAME};
use crate::registrar::{EnvNotifier, HostEnvNotifier, HostPathStore, PathStore, Scope, register_path};
use crate::shims::write_shims;
use crate::transport::{Artifact, Gateway, HostGateway, ProxySettings, Resource, TransportDescriptor};
use crate::util::ensure_install_dirs;

/// Repository the tool itself is cloned from.
pub const TOOL_REPO_URL: &str = "https://github.com/ladle-sh/ladle";
/// Source archive of the tool for the direct-fetch transport.
pub const TOOL_ARCHIVE_URL: &str = "https://github.com/ladle-sh/ladle/archive/refs/heads/main.zip";
/// Repository of the main bucket (the package index).
pub const MAIN_BUCKET_REPO_URL: &str = "https://github.com/ladle-sh/bucket-main";
/// Source archive of the main bucket for the direct-fetch transport.
pub const MAIN_BUCKET_ARCHIVE_URL: &str =
    "https://github.com/ladle-sh/bucket-main/archive/refs/heads/main.zip";

/// Validated invocation parameters, supplied by the CLI (or an embedding
/// host).
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub root_dir: Option<PathBuf>,
    pub global_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub proxy: ProxySettings,
    pub run_as_admin: bool,
}

/// The pipeline stages, in execution order. Any stage error aborts the run;
/// the bundled binary maps that abort to a non-zero exit, while embedding
/// callers just receive the `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Validating,
    Prereqs,
    SecuringTransport,
    Downloading,
    Extracting,
    ShimCreation,
    PathRegistration,
    ConfigWrite,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Init => "Initializing",
            Stage::Validating => "Validating parameters",
            Stage::Prereqs => "Checking prerequisites",
            Stage::SecuringTransport => "Securing a download transport",
            Stage::Downloading => "Downloading",
            Stage::Extracting => "Extracting",
            Stage::ShimCreation => "Creating shims",
            Stage::PathRegistration => "Registering the shims directory on your path",
            Stage::ConfigWrite => "Writing the configuration",
            Stage::Done => "Done",
        };
        write!(f, "{label}")
    }
}

fn enter(stage: Stage) {
    println!("{} {}", "::".cyan().bold(), stage);
}

/// Runs the full installation against the host: probes the transport, wires
/// the platform path store and notifier, and drives the pipeline.
pub fn run(opts: &InstallOptions) -> Result<()> {
    enter(Stage::Validating);
    let layout = InstallLayout::resolve(
        opts.root_dir.clone(),
        opts.global_dir.clone(),
        opts.cache_dir.clone(),
    )?;
    refuse_unintended_admin(opts)?;

    enter(Stage::Prereqs);
    check_prerequisites(&layout);
    ensure_install_dirs(&layout)?;

    enter(Stage::SecuringTransport);
    let descriptor = TransportDescriptor::select(opts.proxy.clone());
    let gateway = HostGateway::new(descriptor);
    let mut store = HostPathStore::default();
    let notifier = HostEnvNotifier::default();

    install(opts, &layout, &gateway, &mut store, &notifier)
}

/// The `Downloading → Done` tail of the pipeline, with every host capability
/// injected. This is the seam the integration tests drive offline.
pub fn install(
    opts: &InstallOptions,
    layout: &InstallLayout,
    gateway: &dyn Gateway,
    store: &mut dyn PathStore,
    notifier: &dyn EnvNotifier,
) -> Result<()> {
    ensure_install_dirs(layout)?;

    enter(Stage::Downloading);
    let resources = [tool_resource(layout), main_bucket_resource(layout)];
    let mut fetched = Vec::new();
    for resource in resources {
        println!("Fetching {} ...", resource.name);
        let artifact = gateway.fetch(&resource, &layout.cache_dir)?;
        fetched.push((resource, artifact));
    }

    enter(Stage::Extracting);
    for (resource, artifact) in &fetched {
        match artifact {
            Artifact::Tree(path) => {
                println!("{} arrived as a working tree at '{}'", resource.name, path.display());
            }
            Artifact::Archive(archive) => {
                install_archive(archive, &resource.destination, &LockWait::default())
                    .with_context(|| format!("could not install '{}'", resource.name))?;
            }
        }
    }

    enter(Stage::ShimCreation);
    let entry_point = layout.entry_point();
    let artifacts = write_shims(&entry_point, &layout.shims_dir)?;
    println!("Created {} shims in '{}'", artifacts.len(), layout.shims_dir.display());

    enter(Stage::PathRegistration);
    let scope = if opts.run_as_admin { Scope::Machine } else { Scope::User };
    register_path(store, notifier, &layout.shims_dir, scope)?;

    enter(Stage::ConfigWrite);
    config::set_key(&layout.config_file, "root_path", Some(&layout.root.to_string_lossy()))?;
    config::set_key(&layout.config_file, "global_path", Some(&layout.global_dir.to_string_lossy()))?;
    config::set_key(&layout.config_file, "cache_path", Some(&layout.cache_dir.to_string_lossy()))?;
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    config::set_key(&layout.config_file, "last_update", Some(&now))?;

    enter(Stage::Done);
    println!("{} was installed successfully!", TOOL_NAME.green().bold());
    println!("Run '{TOOL_NAME} help' to get started.");
    Ok(())
}

fn tool_resource(layout: &InstallLayout) -> Resource {
    Resource {
        name: TOOL_NAME.to_string(),
        repo_url: TOOL_REPO_URL.to_string(),
        archive_url: TOOL_ARCHIVE_URL.to_string(),
        destination: layout.payload_dir.clone(),
    }
}

fn main_bucket_resource(layout: &InstallLayout) -> Resource {
    Resource {
        name: "main bucket".to_string(),
        repo_url: MAIN_BUCKET_REPO_URL.to_string(),
        archive_url: MAIN_BUCKET_ARCHIVE_URL.to_string(),
        destination: layout.main_bucket_dir.clone(),
    }
}

/// Installing with elevated privileges writes files a later unprivileged run
/// cannot touch, so it is refused unless explicitly requested.
fn refuse_unintended_admin(opts: &InstallOptions) -> Result<()> {
    if opts.run_as_admin || !running_elevated() {
        return Ok(());
    }
    bail!(
        "running the installer with administrator privileges is not allowed; \
         re-run as a regular user, or pass --run-as-admin for a machine-wide install"
    );
}

#[cfg(unix)]
fn running_elevated() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(windows)]
fn running_elevated() -> bool {
    // Detection failure counts as not elevated; the check exists to catch the
    // common accidental "run as administrator" case.
    let script = "([Security.Principal.WindowsPrincipal][Security.Principal.WindowsIdentity]::GetCurrent()).IsInRole([Security.Principal.WindowsBuiltInRole]::Administrator)";
    std::process::Command::new("powershell")
        .args(["-NoProfile", "-NonInteractive", "-Command", script])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Warnings for situations the install proceeds through: an existing payload
/// (this run becomes a reinstall/refresh) and a `ladle` already reachable
/// elsewhere on `PATH` (the fresh local install will shadow it).
fn check_prerequisites(layout: &InstallLayout) {
    if layout.entry_point().exists() {
        eprintln!(
            "{} '{}' is already installed under '{}'; refreshing it",
            "warning:".yellow().bold(),
            TOOL_NAME,
            layout.root.display()
        );
    }
    if let Ok(other) = which::which(TOOL_NAME) {
        if !other.starts_with(&layout.root) {
            eprintln!(
                "{} another '{}' installation was found at '{}'; the new one will take precedence on your path",
                "warning:".yellow().bold(),
                TOOL_NAME,
                other.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resources_point_into_the_layout() {
        let layout = InstallLayout::from_root(PathBuf::from("/tmp/ladle-root"), None, None);
        assert_eq!(tool_resource(&layout).destination, layout.payload_dir);
        assert_eq!(main_bucket_resource(&layout).destination, layout.main_bucket_dir);
    }

    #[test]
    fn test_stage_labels_are_human_readable() {
        assert_eq!(Stage::Downloading.to_string(), "Downloading");
        assert_eq!(Stage::Done.to_string(), "Done");
    }
}
