use anyhow::Result;
use ladle_init::installer::{InstallOptions, run};
use ladle_init::transport::ProxySettings;
use crate::cli::CLI;

pub fn execute(cli: CLI) -> Result<()> {
    let proxy = ProxySettings::new(
        cli.proxy,
        cli.proxy_credential,
        cli.use_default_proxy_credentials,
        cli.no_proxy,
    )?;
    let opts = InstallOptions {
        root_dir: cli.root_dir,
        global_dir: cli.global_dir,
        cache_dir: cli.cache_dir,
        proxy,
        run_as_admin: cli.run_as_admin,
    };
    run(&opts)
}
