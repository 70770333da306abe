use std::sync::atomic::{AtomicUsize, Ordering};

use otapkg_client::error::TransferError;
use otapkg_client::transfer::BoxFuture;
use otapkg_notify::queue::{NotificationQueue, StatusPoster};
use otapkg_notify::status::StatusCode;

/// Succeeds after failing a configured number of times.
struct FlakyPoster {
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl FlakyPoster {
    fn new(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }
}

impl StatusPoster for FlakyPoster {
    fn post<'a>(&'a self, url: &'a str, _body: &'a str) -> BoxFuture<'a, Result<(), TransferError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Box::pin(async move {
            if fail {
                Err(TransferError::ServerNotFound(url.to_owned()))
            } else {
                Ok(())
            }
        })
    }
}

#[tokio::test]
async fn inline_success_does_not_queue() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = NotificationQueue::open(dir.path().join("queue.json"), 3).unwrap();
    let poster = FlakyPoster::new(0);

    assert!(queue.notify(&poster, "http://p.example/notify", StatusCode::Success).await);
    assert!(queue.pending().is_empty());
    assert_eq!(poster.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_post_queues_and_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");

    let mut queue = NotificationQueue::open(path.clone(), 3).unwrap();
    let poster = FlakyPoster::new(usize::MAX);
    assert!(!queue
        .notify(&poster, "http://p.example/notify", StatusCode::InvalidDescriptor)
        .await);
    assert_eq!(queue.pending().len(), 1);
    drop(queue);

    let reopened = NotificationQueue::open(path, 3).unwrap();
    assert_eq!(reopened.pending().len(), 1);
    assert_eq!(reopened.pending()[0].status, StatusCode::InvalidDescriptor);
    assert_eq!(reopened.pending()[0].retries_left, 3);
}

#[tokio::test]
async fn drain_delivers_after_transient_failures() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = NotificationQueue::open(dir.path().join("queue.json"), 3).unwrap();

    let poster = FlakyPoster::new(2);
    assert!(!queue.notify(&poster, "http://p.example/n", StatusCode::Success).await);

    // first drain still fails, second succeeds
    assert_eq!(queue.drain(&poster).await, 0);
    assert_eq!(queue.pending().len(), 1);
    assert_eq!(queue.drain(&poster).await, 1);
    assert!(queue.pending().is_empty());
}

#[tokio::test]
async fn retry_budget_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = NotificationQueue::open(dir.path().join("queue.json"), 2).unwrap();

    let poster = FlakyPoster::new(usize::MAX);
    queue.notify(&poster, "http://p.example/n", StatusCode::DeletionNotification).await;

    assert_eq!(queue.drain(&poster).await, 0);
    assert_eq!(queue.pending().len(), 1, "one retry left");
    assert_eq!(queue.drain(&poster).await, 0);
    assert!(queue.pending().is_empty(), "budget exhausted, entry dropped");
}
