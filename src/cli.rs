use std::path::PathBuf;
use clap::Parser;

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    /// Install root for program files, shims, buckets and config [default: ~/ladle]
    #[clap(long, value_name = "DIR")]
    pub root_dir: Option<PathBuf>,

    /// Directory for apps installed machine-wide [default: platform app dir]
    #[clap(long, value_name = "DIR")]
    pub global_dir: Option<PathBuf>,

    /// Download cache directory [default: <root>/cache]
    #[clap(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Proxy endpoint as host:port or a full URL
    #[clap(long, value_name = "URL")]
    pub proxy: Option<String>,

    /// Proxy credential as user:password (requires --proxy)
    #[clap(long, value_name = "USER:PASS", conflicts_with = "use_default_proxy_credentials")]
    pub proxy_credential: Option<String>,

    /// Authenticate against the proxy with the system default credentials (requires --proxy)
    #[clap(long)]
    pub use_default_proxy_credentials: bool,

    /// Ignore any proxy, including proxy environment variables
    #[clap(long)]
    pub no_proxy: bool,

    /// Allow running elevated; registers the shims machine-wide
    #[clap(long)]
    pub run_as_admin: bool,
}
