//! Subcommand implementations.

pub mod install;
pub mod list;
pub mod notify;
pub mod remove;

use std::sync::Arc;

use anyhow::Result;

use otapkg_client::transfer::HttpResourceFetcher;
use otapkg_installer::installer::{Installer, InstallerConfig};
use otapkg_installer::listener::InstallListener;
use otapkg_installer::push::InMemoryPushRegistry;
use otapkg_installer::store::DirPackageStore;
use otapkg_notify::queue::{HttpStatusPoster, NotificationQueue};
use otapkg_x509::store::{load_dir, InMemoryTrustStore};

use crate::config::CliConfig;

/// Wire an [`Installer`] over the configured collaborators.
///
/// # Errors
///
/// Returns an error if the store, trust directory, or notification queue
/// cannot be opened.
pub fn build_installer(cfg: &CliConfig, listener: Arc<dyn InstallListener>) -> Result<Installer> {
    let fetcher = HttpResourceFetcher::new()?;
    let store = DirPackageStore::open(cfg.storage_root.clone(), cfg.capacity_bytes)?;
    let trust = if cfg.trust_dir.is_dir() {
        load_dir(&cfg.trust_dir)?
    } else {
        log::warn!(
            "trust directory {} does not exist; signed suites cannot authenticate",
            cfg.trust_dir.display()
        );
        InMemoryTrustStore::new()
    };
    let queue = NotificationQueue::open(cfg.notify_queue.clone(), cfg.notify_retries)?;
    let poster = HttpStatusPoster::new()?;

    Ok(Installer::new(
        Arc::new(fetcher),
        Arc::new(store),
        Arc::new(trust),
        queue,
        Arc::new(poster),
        InstallerConfig::default(),
    )
    .with_listener(listener)
    .with_push_registry(Arc::new(InMemoryPushRegistry::new())))
}
