//! `otapkg flush-notifications` — redeliver queued provider posts.

use anyhow::Result;

use otapkg_notify::queue::{HttpStatusPoster, NotificationQueue};

use crate::config::CliConfig;

/// Retry every queued notification once.
///
/// # Errors
///
/// Returns an error when the queue file cannot be opened.
pub async fn run_flush(cfg: &CliConfig) -> Result<()> {
    let mut queue = NotificationQueue::open(cfg.notify_queue.clone(), cfg.notify_retries)?;
    let poster = HttpStatusPoster::new()?;
    let delivered = queue.drain(&poster).await;
    println!(
        "delivered {delivered} notification(s), {} still queued",
        queue.pending().len()
    );
    Ok(())
}
