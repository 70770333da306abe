//! The decision seam between an installation and whoever drives it.
//!
//! The worker task never shares mutable state with the driving side: each
//! question crosses as a typed event carrying a one-shot reply channel,
//! and the worker blocks on the answer. With no listener attached, every
//! advisory condition is fatal.

use std::fmt;

use tokio::sync::{mpsc, oneshot};

use otapkg_client::transfer::{BoxFuture, Credentials};
use otapkg_core::types::SuiteVersion;

use crate::state::InstallStep;

/// A recoverable condition the listener may wave through or reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// A newer version of an installed suite is being offered.
    NewerVersion {
        /// Installed version.
        installed: SuiteVersion,
        /// Offered version.
        offered: SuiteVersion,
    },
    /// The offered version is already installed.
    SameVersion {
        /// The version in question.
        version: SuiteVersion,
    },
    /// The offered version is older than the installed one.
    OlderVersion {
        /// Installed version.
        installed: SuiteVersion,
        /// Offered version.
        offered: SuiteVersion,
    },
    /// An unsigned update comes from a different origin than the
    /// installed version did.
    OriginMoved {
        /// Origin the installed version came from.
        previous: String,
        /// Origin offering the update.
        current: String,
    },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewerVersion { installed, offered } => {
                write!(f, "update installed version {installed} to {offered}")
            }
            Self::SameVersion { version } => {
                write!(f, "version {version} is already installed")
            }
            Self::OlderVersion { installed, offered } => {
                write!(f, "replace installed version {installed} with older {offered}")
            }
            Self::OriginMoved { previous, current } => {
                write!(f, "provider moved from {previous} to {current}")
            }
        }
    }
}

/// What the listener is shown before confirming the archive download.
#[derive(Debug, Clone)]
pub struct DownloadSummary {
    /// Suite display name.
    pub name: String,
    /// Vendor, when known.
    pub vendor: Option<String>,
    /// Version, when known.
    pub version: Option<SuiteVersion>,
    /// Declared archive size in bytes, when known.
    pub archive_size: Option<u64>,
    /// Archive URL about to be fetched.
    pub url: String,
}

/// Answers the installation's questions. All methods are dyn-compatible
/// futures so implementations can hop threads or prompt a human.
pub trait InstallListener: Send + Sync {
    /// An advisory condition: `true` continues, `false` aborts.
    fn warn<'a>(&'a self, advisory: &'a Advisory) -> BoxFuture<'a, bool>;

    /// Confirm fetching the archive described by `summary`.
    fn confirm_download<'a>(&'a self, summary: &'a DownloadSummary) -> BoxFuture<'a, bool>;

    /// Confirm trusting the verified authorization path.
    fn confirm_auth_path<'a>(&'a self, names: &'a [String]) -> BoxFuture<'a, bool>;

    /// Confirm following a redirect during a transfer.
    fn confirm_redirect<'a>(&'a self, from: &'a str, to: &'a str) -> BoxFuture<'a, bool>;

    /// Whether to keep the previous version's persistent data.
    fn keep_data<'a>(&'a self, suite: &'a str) -> BoxFuture<'a, bool>;

    /// Credentials for a resource (or proxy) that demanded them; `None`
    /// aborts.
    fn provide_credentials<'a>(
        &'a self,
        url: &'a str,
        proxy: bool,
    ) -> BoxFuture<'a, Option<Credentials>>;

    /// Transfer progress, roughly once per kilobyte.
    fn progress(&self, step: InstallStep, received: u64, total: Option<u64>) {
        let _ = (step, received, total);
    }
}

/// A listener that approves everything and has no credentials.
#[derive(Debug, Default)]
pub struct AcceptAllListener;

impl InstallListener for AcceptAllListener {
    fn warn<'a>(&'a self, _advisory: &'a Advisory) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }

    fn confirm_download<'a>(&'a self, _summary: &'a DownloadSummary) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }

    fn confirm_auth_path<'a>(&'a self, _names: &'a [String]) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }

    fn confirm_redirect<'a>(&'a self, _from: &'a str, _to: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }

    fn keep_data<'a>(&'a self, _suite: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }

    fn provide_credentials<'a>(
        &'a self,
        _url: &'a str,
        _proxy: bool,
    ) -> BoxFuture<'a, Option<Credentials>> {
        Box::pin(async { None })
    }
}

/// A question or report crossing from the worker task to the driving side.
#[derive(Debug)]
pub enum InstallEvent {
    /// An advisory needing approval.
    Warning {
        /// The condition.
        advisory: Advisory,
        /// Reply channel: `true` continues.
        reply: oneshot::Sender<bool>,
    },
    /// Confirmation gate before the archive download.
    ConfirmDownload {
        /// What is about to be downloaded.
        summary: DownloadSummary,
        /// Reply channel.
        reply: oneshot::Sender<bool>,
    },
    /// Confirmation of a verified authorization path.
    ConfirmAuthPath {
        /// Subject names, most-trusted first.
        names: Vec<String>,
        /// Reply channel.
        reply: oneshot::Sender<bool>,
    },
    /// Confirmation of a redirect.
    ConfirmRedirect {
        /// Original URL.
        from: String,
        /// Redirect target.
        to: String,
        /// Reply channel.
        reply: oneshot::Sender<bool>,
    },
    /// Whether to keep the previous version's data.
    KeepData {
        /// Suite display name.
        suite: String,
        /// Reply channel.
        reply: oneshot::Sender<bool>,
    },
    /// The resource or proxy demanded credentials.
    CredentialsNeeded {
        /// URL that demanded them.
        url: String,
        /// Whether the proxy, rather than the server, is asking.
        proxy: bool,
        /// Reply channel; `None` aborts.
        reply: oneshot::Sender<Option<Credentials>>,
    },
    /// Transfer progress report. No reply.
    Progress {
        /// Step the transfer belongs to.
        step: InstallStep,
        /// Bytes received so far.
        received: u64,
        /// Total bytes when the server declared them.
        total: Option<u64>,
    },
}

/// An [`InstallListener`] that forwards every question over a channel and
/// waits for the answer on a per-question one-shot.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    events: mpsc::UnboundedSender<InstallEvent>,
}

impl ChannelListener {
    /// Create a listener and the receiving end the driving side polls.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InstallEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (Self { events }, receiver)
    }

    async fn ask<T: Default>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> InstallEvent,
    ) -> T {
        let (reply, answer) = oneshot::channel();
        if self.events.send(build(reply)).is_err() {
            // the driving side is gone; deny by default
            return T::default();
        }
        answer.await.unwrap_or_default()
    }
}

impl InstallListener for ChannelListener {
    fn warn<'a>(&'a self, advisory: &'a Advisory) -> BoxFuture<'a, bool> {
        Box::pin(self.ask(|reply| InstallEvent::Warning {
            advisory: advisory.clone(),
            reply,
        }))
    }

    fn confirm_download<'a>(&'a self, summary: &'a DownloadSummary) -> BoxFuture<'a, bool> {
        Box::pin(self.ask(|reply| InstallEvent::ConfirmDownload {
            summary: summary.clone(),
            reply,
        }))
    }

    fn confirm_auth_path<'a>(&'a self, names: &'a [String]) -> BoxFuture<'a, bool> {
        Box::pin(self.ask(|reply| InstallEvent::ConfirmAuthPath {
            names: names.to_vec(),
            reply,
        }))
    }

    fn confirm_redirect<'a>(&'a self, from: &'a str, to: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(self.ask(|reply| InstallEvent::ConfirmRedirect {
            from: from.to_owned(),
            to: to.to_owned(),
            reply,
        }))
    }

    fn keep_data<'a>(&'a self, suite: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(self.ask(|reply| InstallEvent::KeepData {
            suite: suite.to_owned(),
            reply,
        }))
    }

    fn provide_credentials<'a>(
        &'a self,
        url: &'a str,
        proxy: bool,
    ) -> BoxFuture<'a, Option<Credentials>> {
        Box::pin(self.ask(move |reply| InstallEvent::CredentialsNeeded {
            url: url.to_owned(),
            proxy,
            reply,
        }))
    }

    fn progress(&self, step: InstallStep, received: u64, total: Option<u64>) {
        let _ = self.events.send(InstallEvent::Progress {
            step,
            received,
            total,
        });
    }
}
