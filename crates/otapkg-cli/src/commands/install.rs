//! `otapkg install` / `otapkg install-archive`.

use std::sync::Arc;

use anyhow::Result;

use otapkg_core::types::SuiteName;
use otapkg_installer::listener::InstallListener;
use otapkg_installer::request::{InstallRequest, InstallSource};
use otapkg_installer::state::CancelHandle;

use crate::config::CliConfig;
use crate::prompt::PromptListener;

/// Options shared by both install forms.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Overwrite an installed version without asking.
    pub force: bool,
    /// Discard the previous version's data without asking.
    pub discard_data: bool,
    /// Auto-confirm every question.
    pub assume_yes: bool,
    /// Display name for archive-only installs.
    pub name: Option<String>,
}

/// Run an installation from `source`.
///
/// # Errors
///
/// Returns an error when wiring fails or the installation aborts.
pub async fn run_install(cfg: &CliConfig, source: InstallSource, opts: InstallOptions) -> Result<()> {
    let listener: Arc<dyn InstallListener> = Arc::new(PromptListener::new(opts.assume_yes));
    let installer = super::build_installer(cfg, listener)?;

    let mut request = InstallRequest::new(source);
    request.force_overwrite = opts.force;
    request.remove_previous_data = opts.discard_data;
    if let Some(name) = opts.name {
        request.provided_name = Some(SuiteName::new(&name)?);
    }

    let cancel = CancelHandle::new();
    let ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("cancellation requested, stopping at the next safe point");
            ctrlc.cancel();
        }
    });

    let suite = installer.install(request, cancel.flag()).await?;
    println!("installed {}", suite.identity);
    println!("domain: {} (trusted: {})", suite.domain, suite.trusted);
    Ok(())
}
