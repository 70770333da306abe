//! The transfer helper trait and its `reqwest`-backed implementation.
//!
//! Policy, not mechanism, lives here: at most one listener-confirmed
//! redirect per request, a capped retry-after back-off for 503 responses,
//! per-call media-type acceptance, and cooperative cancellation observed at
//! chunk boundaries.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{debug, info};

use crate::error::TransferError;

/// Boxed future returned by dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Progress callbacks fire roughly this often, in received bytes.
const PROGRESS_GRANULARITY: u64 = 1024;
/// Upper bound on an advertised retry-after interval.
const RETRY_AFTER_CAP_SECS: u64 = 60;
/// Interval assumed when a 503 carries no parseable Retry-After.
const RETRY_AFTER_DEFAULT_SECS: u64 = 10;

/// Basic-auth credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

/// One resource to fetch, with per-call acceptance policy.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Absolute URL.
    pub url: String,
    /// Acceptable media types; empty accepts anything.
    pub accepted_media_types: Vec<String>,
    /// Whether a response without a media type is acceptable.
    pub allow_missing_media_type: bool,
    /// Server credentials, if the resource is protected.
    pub credentials: Option<Credentials>,
    /// Proxy credentials, if a proxy on the path demands them.
    pub proxy_credentials: Option<Credentials>,
}

impl TransferRequest {
    /// A request for `url` accepting the given media types.
    #[must_use]
    pub fn new(url: impl Into<String>, accepted_media_types: &[&str]) -> Self {
        Self {
            url: url.into(),
            accepted_media_types: accepted_media_types
                .iter()
                .map(|&t| t.to_owned())
                .collect(),
            allow_missing_media_type: false,
            credentials: None,
            proxy_credentials: None,
        }
    }
}

/// Observer of a single transfer.
pub trait TransferListener: Send + Sync {
    /// Called roughly every kilobyte with the byte count so far.
    fn progress(&self, received: u64, total: Option<u64>);

    /// Asked before following a redirect; returning `false` aborts the
    /// transfer with a cancellation.
    fn confirm_redirect<'a>(&'a self, from: &'a str, to: &'a str) -> BoxFuture<'a, bool>;
}

/// A listener that reports nothing and declines every redirect.
#[derive(Debug, Default)]
pub struct SilentListener;

impl TransferListener for SilentListener {
    fn progress(&self, _received: u64, _total: Option<u64>) {}

    fn confirm_redirect<'a>(&'a self, _from: &'a str, _to: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async { false })
    }
}

/// Fetches a resource as bytes.
pub trait ResourceFetcher: Send + Sync {
    /// Download the requested resource, observing `cancel` cooperatively at
    /// chunk boundaries.
    ///
    /// # Errors
    ///
    /// Returns a typed [`TransferError`] for every failure class.
    fn fetch<'a>(
        &'a self,
        request: &'a TransferRequest,
        listener: &'a dyn TransferListener,
        cancel: &'a AtomicBool,
    ) -> BoxFuture<'a, Result<Vec<u8>, TransferError>>;
}

/// `reqwest`-backed [`ResourceFetcher`] with redirects handled manually.
#[derive(Debug, Clone)]
pub struct HttpResourceFetcher {
    http: reqwest::Client,
}

impl HttpResourceFetcher {
    /// Build a fetcher. Automatic redirect following is disabled; the
    /// single-redirect policy is enforced here instead.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Transport`] if the HTTP client cannot be
    /// constructed.
    pub fn new() -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { http })
    }

    async fn fetch_inner(
        &self,
        request: &TransferRequest,
        listener: &dyn TransferListener,
        cancel: &AtomicBool,
    ) -> Result<Vec<u8>, TransferError> {
        let mut url = request.url.clone();
        let mut redirected = false;
        let mut waited = false;

        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(TransferError::Cancelled);
            }

            let response = self.send_once(&url, request).await?;
            let status = response.status();

            if status.is_redirection() {
                let target = location_header(&response)
                    .ok_or_else(|| TransferError::ResourceNotFound(url.clone()))?;
                if redirected {
                    return Err(TransferError::TooManyRedirects(url));
                }
                if !listener.confirm_redirect(&url, &target).await {
                    return Err(TransferError::Cancelled);
                }
                info!("following redirect {url} -> {target}");
                url = target;
                redirected = true;
                continue;
            }

            if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
                if waited {
                    return Err(TransferError::ServerNotFound(url));
                }
                let secs = retry_after_seconds(
                    response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok()),
                );
                debug!("{url} unavailable, retrying in {secs}s");
                tokio::time::sleep(Duration::from_secs(secs)).await;
                waited = true;
                continue;
            }

            return self.consume(response, &url, request, listener, cancel).await;
        }
    }

    async fn send_once(
        &self,
        url: &str,
        request: &TransferRequest,
    ) -> Result<reqwest::Response, TransferError> {
        let mut builder = self.http.get(url);
        if !request.accepted_media_types.is_empty() {
            builder = builder.header(
                reqwest::header::ACCEPT,
                request.accepted_media_types.join(", "),
            );
        }
        if let Some(creds) = &request.credentials {
            builder = builder.basic_auth(&creds.username, Some(&creds.password));
        }
        if let Some(creds) = &request.proxy_credentials {
            let token = STANDARD.encode(format!("{}:{}", creds.username, creds.password));
            builder = builder.header(reqwest::header::PROXY_AUTHORIZATION, format!("Basic {token}"));
        }
        builder.send().await.map_err(|err| {
            if err.is_connect() {
                TransferError::ServerNotFound(url.to_owned())
            } else {
                TransferError::Transport(err)
            }
        })
    }

    async fn consume(
        &self,
        mut response: reqwest::Response,
        url: &str,
        request: &TransferRequest,
        listener: &dyn TransferListener,
        cancel: &AtomicBool,
    ) -> Result<Vec<u8>, TransferError> {
        match response.status() {
            reqwest::StatusCode::UNAUTHORIZED => {
                return Err(TransferError::Unauthorized(url.to_owned()));
            }
            reqwest::StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
                return Err(TransferError::ProxyAuthRequired(url.to_owned()));
            }
            reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::GONE => {
                return Err(TransferError::ResourceNotFound(url.to_owned()));
            }
            status if !status.is_success() => {
                return match response.error_for_status() {
                    Err(err) => Err(TransferError::Transport(err)),
                    // informational or unhandled redirect-class leftovers
                    Ok(_) => Err(TransferError::ResourceNotFound(url.to_owned())),
                };
            }
            _ => {}
        }

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        if !media_type_acceptable(
            media_type.as_deref(),
            &request.accepted_media_types,
            request.allow_missing_media_type,
        ) {
            return Err(TransferError::InvalidMediaType {
                url: url.to_owned(),
                media_type: media_type.unwrap_or_default(),
            });
        }

        let total = response.content_length();
        let mut body = Vec::new();
        let mut received: u64 = 0;
        let mut last_report: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            if cancel.load(Ordering::SeqCst) {
                return Err(TransferError::Cancelled);
            }
            received += chunk.len() as u64;
            body.extend_from_slice(&chunk);
            if received - last_report >= PROGRESS_GRANULARITY {
                listener.progress(received, total);
                last_report = received;
            }
        }
        listener.progress(received, total);
        debug!("fetched {received} bytes from {url}");
        Ok(body)
    }
}

impl ResourceFetcher for HttpResourceFetcher {
    fn fetch<'a>(
        &'a self,
        request: &'a TransferRequest,
        listener: &'a dyn TransferListener,
        cancel: &'a AtomicBool,
    ) -> BoxFuture<'a, Result<Vec<u8>, TransferError>> {
        Box::pin(self.fetch_inner(request, listener, cancel))
    }
}

fn location_header(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
}

/// The media type without its parameters, lowercased.
fn media_type_essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn media_type_acceptable(media_type: Option<&str>, accepted: &[String], allow_missing: bool) -> bool {
    match media_type {
        None => allow_missing,
        Some(_) if accepted.is_empty() => true,
        Some(declared) => {
            let essence = media_type_essence(declared);
            accepted
                .iter()
                .any(|a| media_type_essence(a) == essence)
        }
    }
}

fn retry_after_seconds(header: Option<&str>) -> u64 {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(RETRY_AFTER_DEFAULT_SECS)
        .min(RETRY_AFTER_CAP_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_is_capped_at_sixty_seconds() {
        assert_eq!(retry_after_seconds(Some("5")), 5);
        assert_eq!(retry_after_seconds(Some("600")), 60);
        assert_eq!(retry_after_seconds(Some("soon")), RETRY_AFTER_DEFAULT_SECS);
        assert_eq!(retry_after_seconds(None), RETRY_AFTER_DEFAULT_SECS);
    }

    #[test]
    fn media_type_matching_is_permissive_where_declared() {
        let accepted = vec!["application/vnd.ota.archive".to_owned()];
        assert!(media_type_acceptable(
            Some("application/vnd.ota.archive; charset=binary"),
            &accepted,
            false,
        ));
        assert!(media_type_acceptable(
            Some("Application/VND.OTA.Archive"),
            &accepted,
            false,
        ));
        assert!(!media_type_acceptable(Some("text/html"), &accepted, false));
        assert!(media_type_acceptable(None, &accepted, true));
        assert!(!media_type_acceptable(None, &accepted, false));
        assert!(media_type_acceptable(Some("anything/else"), &[], false));
    }
}
