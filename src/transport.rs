use std::path::{Path, PathBuf};
use std::process::Command;
use anyhow::{Context, Result, bail};
use colored::Colorize;
use reqwest::blocking::Client;

use crate::util::file_name_from_url;

/// Environment variables the version-control transport honors for proxying.
const PROXY_ENV_VARS: &[&str] = &["http_proxy", "https_proxy", "HTTP_PROXY", "HTTPS_PROXY"];

/// How the transports authenticate against a proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CredentialMode {
    #[default]
    None,
    /// Explicit `user`/`password` pair supplied by the caller.
    Explicit { username: String, password: String },
    /// Rely on the ambient/system default credentials of the host.
    Default,
}

/// Validated proxy settings shared by both transports.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProxySettings {
    pub endpoint: Option<String>,
    pub bypass: bool,
    pub credentials: CredentialMode,
}

impl ProxySettings {
    /// Builds proxy settings from raw invocation parameters.
    ///
    /// `credential` is a `user:password` pair. An explicit credential and the
    /// default-credentials flag are mutually exclusive, and either one without
    /// a proxy endpoint is invalid.
    pub fn new(
        endpoint: Option<String>,
        credential: Option<String>,
        use_default_credentials: bool,
        bypass: bool,
    ) -> Result<ProxySettings> {
        if credential.is_some() && use_default_credentials {
            bail!("an explicit proxy credential and default proxy credentials are mutually exclusive");
        }
        if (credential.is_some() || use_default_credentials) && endpoint.is_none() {
            bail!("a proxy credential requires a proxy endpoint (--proxy)");
        }
        let credentials = match credential {
            Some(pair) => {
                let (username, password) = pair
                    .split_once(':')
                    .with_context(|| "proxy credential must be of the form user:password")?;
                CredentialMode::Explicit {
                    username: username.to_string(),
                    password: password.to_string(),
                }
            }
            None if use_default_credentials => CredentialMode::Default,
            None => CredentialMode::None,
        };
        Ok(ProxySettings { endpoint, bypass, credentials })
    }

    /// The proxy URL to export into the environment for subprocess transports.
    /// Explicit credentials are embedded in the authority.
    pub fn env_url(&self) -> Option<String> {
        if self.bypass {
            return None;
        }
        let endpoint = self.endpoint.as_deref()?;
        let (scheme, rest) = match endpoint.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => ("http", endpoint),
        };
        match &self.credentials {
            CredentialMode::Explicit { username, password } => {
                Some(format!("{scheme}://{username}:{password}@{rest}"))
            }
            _ => Some(format!("{scheme}://{rest}")),
        }
    }
}

/// The selected way of acquiring remote resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// A version-control client is available on the host; clone with it first.
    Git { program: PathBuf },
    /// No version-control client; go straight to archive downloads.
    Direct,
}

/// Transport plus the proxy settings applied to it. Computed once per run and
/// consumed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportDescriptor {
    pub transport: Transport,
    pub proxy: ProxySettings,
}

impl TransportDescriptor {
    /// Probes the host for a usable `git` and picks the transport.
    pub fn select(proxy: ProxySettings) -> TransportDescriptor {
        let transport = match which::which("git") {
            Ok(program) => Transport::Git { program },
            Err(_) => Transport::Direct,
        };
        TransportDescriptor { transport, proxy }
    }
}

/// One remote resource the installer needs: the tool itself or a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub repo_url: String,
    pub archive_url: String,
    /// Where the resource's working tree ends up.
    pub destination: PathBuf,
}

/// What a fetch produced locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// A full working tree already at the resource destination (cloned).
    Tree(PathBuf),
    /// An archive file that still needs extraction.
    Archive(PathBuf),
}

/// Capability interface for acquiring resources, so the pipeline can be driven
/// without network access in tests.
pub trait Gateway {
    fn fetch(&self, resource: &Resource, cache_dir: &Path) -> Result<Artifact>;
}

/// The production gateway: shallow git clone when available, direct archive
/// download as the fallback (or only) transport.
pub struct HostGateway {
    descriptor: TransportDescriptor,
}

impl HostGateway {
    pub fn new(descriptor: TransportDescriptor) -> HostGateway {
        HostGateway { descriptor }
    }
}

impl Gateway for HostGateway {
    fn fetch(&self, resource: &Resource, cache_dir: &Path) -> Result<Artifact> {
        if let Transport::Git { program } = &self.descriptor.transport {
            match clone_repository(program, &resource.repo_url, &resource.destination, &self.descriptor.proxy) {
                Ok(()) => return Ok(Artifact::Tree(resource.destination.clone())),
                Err(err) => {
                    eprintln!(
                        "{} clone of '{}' failed ({err:#}); falling back to archive download",
                        "warning:".yellow().bold(),
                        resource.name
                    );
                }
            }
        }
        let archive = download_archive(resource, cache_dir, &self.descriptor.proxy)
            .with_context(|| format!("could not acquire '{}' over any transport", resource.name))?;
        Ok(Artifact::Archive(archive))
    }
}

/// Shallow-clones `url` into `destination` with the probed git client.
///
/// Proxy variables are exported only for the duration of the clone; the guard
/// restores the previous environment on every exit path.
fn clone_repository(program: &Path, url: &str, destination: &Path, proxy: &ProxySettings) -> Result<()> {
    if destination.exists() {
        std::fs::remove_dir_all(destination)
            .with_context(|| format!("could not clear '{}'", destination.display()))?;
    }
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _env = ProxyEnvGuard::apply(proxy);
    let status = Command::new(program)
        .args(["clone", "--depth", "1", url])
        .arg(destination)
        .status()
        .with_context(|| format!("could not run '{}'", program.display()))?;
    if !status.success() {
        bail!("git clone of '{}' exited with {}", url, status);
    }
    Ok(())
}

/// Downloads the resource archive into the cache directory, re-using an
/// already-cached file from an earlier (possibly failed) run.
fn download_archive(resource: &Resource, cache_dir: &Path, proxy: &ProxySettings) -> Result<PathBuf> {
    let file_name = format!("{}-{}", resource.name, file_name_from_url(&resource.archive_url)?);
    let archive_path = cache_dir.join(file_name);
    if archive_path.exists() {
        println!("Using cached archive '{}'", archive_path.display());
        return Ok(archive_path);
    }
    let client = http_client(proxy)?;
    let response = client
        .get(&resource.archive_url)
        .send()
        .with_context(|| format!("download of '{}' failed", resource.archive_url))?;
    if !response.status().is_success() {
        bail!("download of '{}' failed with HTTP {}", resource.archive_url, response.status());
    }
    let bytes = response.bytes()?;
    std::fs::create_dir_all(cache_dir)
        .with_context(|| format!("could not create cache dir '{}'", cache_dir.display()))?;
    std::fs::write(&archive_path, &bytes)
        .with_context(|| format!("could not write '{}'", archive_path.display()))?;
    Ok(archive_path)
}

fn http_client(proxy: &ProxySettings) -> Result<Client> {
    let mut builder = Client::builder().user_agent("ladle-init");
    if proxy.bypass {
        builder = builder.no_proxy();
    } else if let Some(endpoint) = &proxy.endpoint {
        let url = proxy.env_url().unwrap_or_else(|| endpoint.clone());
        let mut p = reqwest::Proxy::all(url)?;
        if let CredentialMode::Explicit { username, password } = &proxy.credentials {
            p = p.basic_auth(username, password);
        }
        builder = builder.proxy(p);
    }
    builder.build().map_err(Into::into)
}

/// Scoped override of the process proxy environment. Prior values are
/// captured on construction and restored on drop, including the unwind path
/// out of a failed clone.
pub struct ProxyEnvGuard {
    saved: Vec<(&'static str, Option<String>)>,
}

impl ProxyEnvGuard {
    pub fn apply(proxy: &ProxySettings) -> ProxyEnvGuard {
        let saved = PROXY_ENV_VARS.iter().map(|var| (*var, std::env::var(var).ok())).collect();
        // SAFETY: the installer is single-threaded; nothing reads the
        // environment concurrently.
        if proxy.bypass {
            for var in PROXY_ENV_VARS {
                unsafe { std::env::remove_var(var) };
            }
        } else if let Some(url) = proxy.env_url() {
            for var in PROXY_ENV_VARS {
                unsafe { std::env::set_var(var, &url) };
            }
        }
        ProxyEnvGuard { saved }
    }
}

impl Drop for ProxyEnvGuard {
    fn drop(&mut self) {
        for (var, value) in &self.saved {
            // SAFETY: see `apply`.
            match value {
                Some(value) => unsafe { std::env::set_var(var, value) },
                None => unsafe { std::env::remove_var(var) },
            }
        }
    }
}
