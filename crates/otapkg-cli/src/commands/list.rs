//! `otapkg list`.

use anyhow::Result;

use otapkg_installer::store::{DirPackageStore, PackageStore};

use crate::config::CliConfig;

/// Print every installed suite.
///
/// # Errors
///
/// Returns an error when the store cannot be read.
pub fn run_list(cfg: &CliConfig) -> Result<()> {
    let store = DirPackageStore::open(cfg.storage_root.clone(), cfg.capacity_bytes)?;
    let mut suites = store.list()?;
    if suites.is_empty() {
        println!("no suites installed");
        return Ok(());
    }
    suites.sort_by_key(|s| s.identity.storage_id.0);
    for suite in suites {
        println!(
            "{}  [{}{}]  {}",
            suite.identity,
            suite.domain,
            if suite.trusted { ", trusted" } else { "" },
            suite.archive_url,
        );
    }
    Ok(())
}
