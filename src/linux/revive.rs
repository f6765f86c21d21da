use crate::error::Result;
use crate::os::firewall::Backup;
use crate::utils::{
    config::OxideConfig,
    tools::{Shell, SystemHost},
};
use clap::ArgMatches;
use log::info;
use std::path::Path;

/// Put back the rules saved by an earlier run.
pub fn revive(shell: &Shell, config: &OxideConfig, backup: Option<&Path>) -> Result<Backup> {
    let backup = match backup {
        Some(dir) => Backup::load(dir, config)?,
        None => Backup::latest(config)?,
    };
    info!(
        "Reviving {} rule files from {}",
        backup.files.len(),
        backup.dir.display()
    );
    backup.restore(shell, config)?;
    Ok(backup)
}

pub fn main(cmd: &ArgMatches, config: &OxideConfig) -> Result<()> {
    let host = SystemHost;
    let shell = Shell::detect(&host);
    let dir = cmd.get_one::<String>("backup").map(Path::new);
    revive(&shell, config, dir)?;
    Ok(())
}
