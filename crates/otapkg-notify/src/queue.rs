//! At-least-once status delivery with a bounded, persisted retry queue.
//!
//! The inline attempt happens exactly once and never blocks the install
//! result; a failed post is queued to disk and retried on later drains
//! until its retry budget runs out.

use std::path::PathBuf;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use otapkg_client::error::TransferError;
use otapkg_client::transfer::BoxFuture;

use crate::status::StatusCode;

/// Default retry budget for a queued notification.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Errors opening or persisting the queue file.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue file could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The queue file is not valid JSON.
    #[error("corrupt queue file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Posts a status body to a provider URL.
pub trait StatusPoster: Send + Sync {
    /// POST `body` to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] when the provider cannot be reached or
    /// rejects the post.
    fn post<'a>(&'a self, url: &'a str, body: &'a str) -> BoxFuture<'a, Result<(), TransferError>>;
}

/// `reqwest`-backed [`StatusPoster`].
#[derive(Debug, Clone)]
pub struct HttpStatusPoster {
    http: reqwest::Client,
}

impl HttpStatusPoster {
    /// Build a poster.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Transport`] if the HTTP client cannot be
    /// constructed.
    pub fn new() -> Result<Self, TransferError> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
        })
    }
}

impl StatusPoster for HttpStatusPoster {
    fn post<'a>(&'a self, url: &'a str, body: &'a str) -> BoxFuture<'a, Result<(), TransferError>> {
        Box::pin(async move {
            let response = self
                .http
                .post(url)
                .body(body.to_owned())
                .send()
                .await
                .map_err(|err| {
                    if err.is_connect() {
                        TransferError::ServerNotFound(url.to_owned())
                    } else {
                        TransferError::Transport(err)
                    }
                })?;
            response.error_for_status()?;
            Ok(())
        })
    }
}

/// One notification awaiting redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingNotification {
    /// Provider notify URL.
    pub url: String,
    /// Status being reported.
    pub status: StatusCode,
    /// Remaining delivery attempts.
    pub retries_left: u32,
}

/// The persisted retry queue.
#[derive(Debug)]
pub struct NotificationQueue {
    path: PathBuf,
    entries: Vec<PendingNotification>,
    max_retries: u32,
}

impl NotificationQueue {
    /// Open the queue at `path`, loading any entries left by an earlier
    /// process.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if an existing file cannot be read or parsed.
    pub fn open(path: PathBuf, max_retries: u32) -> Result<Self, QueueError> {
        let entries = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            entries,
            max_retries,
        })
    }

    /// Notifications currently awaiting redelivery.
    #[must_use]
    pub fn pending(&self) -> &[PendingNotification] {
        &self.entries
    }

    /// Attempt inline delivery of `status` to `url` exactly once, queuing
    /// it with a fresh retry budget on failure. Returns whether the inline
    /// attempt succeeded. Never fails: a notification problem must not
    /// mask the installation outcome it reports.
    pub async fn notify(&mut self, poster: &dyn StatusPoster, url: &str, status: StatusCode) -> bool {
        match poster.post(url, &status.to_string()).await {
            Ok(()) => {
                debug!("posted '{status}' to {url}");
                true
            }
            Err(err) => {
                warn!("failed to post '{status}' to {url}: {err}; queued for retry");
                self.entries.push(PendingNotification {
                    url: url.to_owned(),
                    status,
                    retries_left: self.max_retries,
                });
                self.save();
                false
            }
        }
    }

    /// Retry every queued notification once, dropping entries whose budget
    /// is exhausted. Returns the number delivered.
    pub async fn drain(&mut self, poster: &dyn StatusPoster) -> usize {
        let mut delivered = 0;
        let mut remaining = Vec::new();

        for mut entry in std::mem::take(&mut self.entries) {
            match poster.post(&entry.url, &entry.status.to_string()).await {
                Ok(()) => {
                    info!("delivered queued '{}' to {}", entry.status, entry.url);
                    delivered += 1;
                }
                Err(err) => {
                    entry.retries_left = entry.retries_left.saturating_sub(1);
                    if entry.retries_left == 0 {
                        warn!(
                            "giving up on '{}' to {} after repeated failures: {err}",
                            entry.status, entry.url
                        );
                    } else {
                        remaining.push(entry);
                    }
                }
            }
        }

        self.entries = remaining;
        self.save();
        delivered
    }

    fn save(&self) {
        let result = serde_json::to_string_pretty(&self.entries)
            .map_err(QueueError::from)
            .and_then(|json| std::fs::write(&self.path, json).map_err(QueueError::from));
        if let Err(err) = result {
            warn!("could not persist notification queue: {err}");
        }
    }
}
