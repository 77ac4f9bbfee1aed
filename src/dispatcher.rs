// ABOUTME: Command dispatcher: runs store operations one at a time on the blocking pool.
// ABOUTME: Preserves submission order, delivers results over oneshot channels, and cancels on shutdown.

use std::future::Future;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::store::{RecordId, SessionRecord, SessionStore, StoreHandle, is_valid_quality};

type JobFn = Box<dyn FnOnce(&SessionStore, &CancellationToken) + Send>;

/// A queued store operation.
struct Job {
    label: &'static str,
    run: JobFn,
}

/// Serializes store operations off the caller's task.
///
/// Every operation is queued when it is submitted, so operations execute in
/// call order no matter when their futures are awaited. The worker runs one
/// operation at a time and only starts the next after the previous one has
/// committed and delivered its result.
pub struct Dispatcher {
    queue_tx: mpsc::UnboundedSender<Job>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Spawn the dispatcher worker for `store`. Must be called inside a tokio runtime.
    pub fn new(store: StoreHandle) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run_worker(store, queue_rx, cancel.clone()));
        Self { queue_tx, cancel }
    }

    /// Schedule `op` on the background context.
    ///
    /// The returned future resolves in whichever task awaits it. It fails with
    /// `Disposed` if the dispatcher shut down before the operation started or
    /// while it was running.
    pub fn submit<T, F>(&self, label: &'static str, op: F) -> impl Future<Output = Result<T>> + Send + use<T, F>
    where
        T: Send + 'static,
        F: FnOnce(&SessionStore) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = Job {
            label,
            run: Box::new(move |store: &SessionStore, cancel: &CancellationToken| {
                let output = op(store);
                if cancel.is_cancelled() {
                    tracing::debug!(op = label, "discarding result of operation finished after shutdown");
                    return;
                }
                let _ = tx.send(output);
            }),
        };
        let queued = !self.cancel.is_cancelled() && self.queue_tx.send(job).is_ok();

        async move {
            if !queued {
                return Err(Error::Disposed);
            }
            rx.await.map_err(|_| Error::Disposed)?
        }
    }

    /// Insert a new record. Opening a session while another is open is rejected.
    pub fn insert(&self, record: SessionRecord) -> impl Future<Output = Result<RecordId>> + Send + use<> {
        self.submit("insert", move |store| {
            if record.is_open() {
                if let Some(latest) = store.get_latest()? {
                    if latest.is_open() {
                        return Err(Error::SessionAlreadyOpen(latest.id.unwrap_or(RecordId(0))));
                    }
                }
            }
            store.insert(&record)
        })
    }

    pub fn update(&self, record: SessionRecord) -> impl Future<Output = Result<()>> + Send + use<> {
        self.submit("update", move |store| store.update(&record))
    }

    pub fn get_by_id(&self, id: RecordId) -> impl Future<Output = Result<Option<SessionRecord>>> + Send + use<> {
        self.submit("get_by_id", move |store| store.get_by_id(id))
    }

    pub fn latest(&self) -> impl Future<Output = Result<Option<SessionRecord>>> + Send + use<> {
        self.submit("latest", |store| store.get_latest())
    }

    pub fn all_descending(&self) -> impl Future<Output = Result<Vec<SessionRecord>>> + Send + use<> {
        self.submit("all_descending", |store| store.get_all_descending())
    }

    pub fn clear(&self) -> impl Future<Output = Result<()>> + Send + use<> {
        self.submit("clear", |store| store.clear())
    }

    /// Rate an ended, unrated record. Validation and write run as one job.
    pub fn rate(&self, id: RecordId, quality: i32) -> impl Future<Output = Result<SessionRecord>> + Send + use<> {
        self.submit("rate", move |store| {
            if !is_valid_quality(quality) {
                return Err(Error::InvalidQuality(quality));
            }
            let mut record = store.get_by_id(id)?.ok_or(Error::NotFound(id))?;
            if record.is_open() {
                return Err(Error::NotRateable {
                    id,
                    reason: "session has not ended",
                });
            }
            if record.is_rated() {
                return Err(Error::NotRateable {
                    id,
                    reason: "session is already rated",
                });
            }
            record.quality = quality;
            store.update(&record)?;
            Ok(record)
        })
    }

    /// Cancel queued operations and stop accepting new ones.
    ///
    /// An operation already running completes, but its result is dropped.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!("dispatcher shutting down");
        }
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Worker loop: pull jobs in order and run each to completion on the blocking pool.
async fn run_worker(store: StoreHandle, mut queue_rx: mpsc::UnboundedReceiver<Job>, cancel: CancellationToken) {
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = queue_rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let label = job.label;
        tracing::trace!(op = label, "running store operation");
        let store = store.clone();
        let token = cancel.clone();
        let result = tokio::task::spawn_blocking(move || (job.run)(&*store, &token)).await;
        if let Err(e) = result {
            tracing::error!(op = label, error = %e, "store operation panicked");
        }
    }

    queue_rx.close();
    let mut dropped = 0usize;
    while queue_rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        tracing::debug!(dropped, "cancelled queued store operations");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn dispatcher() -> (Dispatcher, StoreHandle) {
        let store = StoreHandle::new(SessionStore::open_in_memory().unwrap());
        (Dispatcher::new(store.clone()), store)
    }

    fn ended(start: i64) -> SessionRecord {
        SessionRecord {
            end_time_ms: start + 1_000,
            ..SessionRecord::begin(start)
        }
    }

    #[tokio::test]
    async fn insert_then_latest_sees_the_insert() {
        let (dispatcher, _store) = dispatcher();
        for start in 0..20 {
            let inserted = dispatcher.insert(ended(start * 10_000));
            let latest = dispatcher.latest();
            let id = inserted.await.unwrap();
            let latest = latest.await.unwrap().unwrap();
            assert_eq!(latest.id, Some(id));
        }
    }

    #[tokio::test]
    async fn operations_run_in_submission_order() {
        let (dispatcher, _store) = dispatcher();
        let first = dispatcher.insert(ended(1_000));
        let second = dispatcher.insert(ended(2_000));
        let cleared = dispatcher.clear();
        let third = dispatcher.insert(ended(3_000));
        let listed = dispatcher.all_descending();

        // Await out of order; execution order is still submission order.
        let records = listed.await.unwrap();
        third.await.unwrap();
        cleared.await.unwrap();
        second.await.unwrap();
        first.await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].start_time_ms, 3_000);
    }

    #[tokio::test]
    async fn second_open_session_is_rejected() {
        let (dispatcher, store) = dispatcher();
        let id = dispatcher.insert(SessionRecord::begin(1_000)).await.unwrap();

        match dispatcher.insert(SessionRecord::begin(2_000)).await {
            Err(Error::SessionAlreadyOpen(open)) => assert_eq!(open, id),
            other => panic!("expected SessionAlreadyOpen, got {:?}", other),
        }
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn update_missing_record_fails_with_not_found() {
        let (dispatcher, _store) = dispatcher();
        let mut record = ended(0);
        record.id = Some(RecordId(12));
        assert!(matches!(dispatcher.update(record).await, Err(Error::NotFound(RecordId(12)))));
    }

    #[tokio::test]
    async fn rate_validates_state() {
        let (dispatcher, _store) = dispatcher();
        let open = dispatcher.insert(SessionRecord::begin(1_000)).await.unwrap();
        assert!(matches!(dispatcher.rate(open, 3).await, Err(Error::NotRateable { .. })));

        let mut record = dispatcher.get_by_id(open).await.unwrap().unwrap();
        record.end_time_ms = 5_000;
        dispatcher.update(record).await.unwrap();

        assert!(matches!(dispatcher.rate(open, 9).await, Err(Error::InvalidQuality(9))));
        let rated = dispatcher.rate(open, 3).await.unwrap();
        assert_eq!(rated.quality, 3);
        assert!(matches!(dispatcher.rate(open, 4).await, Err(Error::NotRateable { .. })));
        assert!(matches!(dispatcher.rate(RecordId(404), 1).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_disposed() {
        let (dispatcher, _store) = dispatcher();
        dispatcher.shutdown();
        assert!(dispatcher.is_shut_down());
        assert!(matches!(dispatcher.latest().await, Err(Error::Disposed)));
    }

    #[tokio::test]
    async fn shutdown_cancels_queued_and_discards_in_flight() {
        let (dispatcher, store) = dispatcher();
        let started = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));

        let in_flight = {
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            dispatcher.submit("slow", move |store| {
                started.store(true, Ordering::SeqCst);
                while !release.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                store.insert(&ended(1_000))
            })
        };
        let queued = dispatcher.insert(ended(2_000));

        let in_flight = tokio::spawn(in_flight);
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        dispatcher.shutdown();
        release.store(true, Ordering::SeqCst);

        assert!(matches!(in_flight.await.unwrap(), Err(Error::Disposed)));
        assert!(matches!(queued.await, Err(Error::Disposed)));
        // The in-flight insert still committed; the queued one never ran.
        assert_eq!(store.count().unwrap(), 1);
    }
}
