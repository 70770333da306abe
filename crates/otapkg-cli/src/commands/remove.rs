//! `otapkg remove`.

use std::sync::Arc;

use anyhow::Result;

use otapkg_core::types::{SuiteName, VendorName};
use otapkg_installer::listener::AcceptAllListener;

use crate::config::CliConfig;

/// Remove an installed suite by name and vendor.
///
/// # Errors
///
/// Returns an error when the suite is not installed or the store fails.
pub async fn run_remove(cfg: &CliConfig, name: &str, vendor: &str) -> Result<()> {
    let installer = super::build_installer(cfg, Arc::new(AcceptAllListener))?;
    let suite = installer
        .remove(&SuiteName::new(name)?, &VendorName::new(vendor)?)
        .await?;
    println!("removed {}", suite.identity);
    Ok(())
}
