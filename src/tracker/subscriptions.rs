// ABOUTME: Subscription plumbing: state change notifications and the one-shot signal stream.
// ABOUTME: State uses a watch channel (latest value wins); signals use a single-consumer mpsc.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_stream::wrappers::{UnboundedReceiverStream, WatchStream};

use crate::error::{Error, Result};
use crate::tracker::state::{DerivedViewState, ViewSignal};

/// A subscriber's view of `DerivedViewState`.
///
/// Several field changes produced by one operation arrive as one
/// notification. A subscriber that falls behind only sees the newest state.
pub struct StateSubscription {
    rx: watch::Receiver<DerivedViewState>,
}

impl StateSubscription {
    pub(crate) fn new(rx: watch::Receiver<DerivedViewState>) -> Self {
        Self { rx }
    }

    /// The latest published state, marking it as seen.
    pub fn current(&mut self) -> DerivedViewState {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for the next published state. Fails with `Disposed` once the coordinator is gone.
    pub async fn changed(&mut self) -> Result<DerivedViewState> {
        self.rx.changed().await.map_err(|_| Error::Disposed)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Whether a state was published that this subscriber has not seen yet.
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Stream of states, starting with the current one.
    pub fn into_stream(self) -> BoxStream<'static, DerivedViewState> {
        Box::pin(WatchStream::new(self.rx))
    }
}

/// Single-consumer source of one-shot `ViewSignal`s.
///
/// The receiver lives in `Arc<Mutex<Option<...>>>` so the coordinator handle
/// can be shared while the signal stream is taken exactly once. Whoever takes
/// it owns every future signal; later takers get an empty stream, so a signal
/// is never delivered twice.
#[derive(Clone)]
pub struct SignalSource {
    pub(crate) rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ViewSignal>>>>,
}

impl SignalSource {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<ViewSignal>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(Some(rx))),
        }
    }

    /// Take the signal stream.
    pub fn stream(self) -> BoxStream<'static, ViewSignal> {
        Box::pin(
            futures::stream::once(async move { self.rx.lock().await.take() })
                .filter_map(|opt| async move { opt })
                .map(UnboundedReceiverStream::new)
                .flatten(),
        )
    }

    /// Drain signals that are already waiting, without blocking.
    ///
    /// Returns nothing once the stream has been taken.
    pub async fn drain_pending(&self) -> Vec<ViewSignal> {
        let mut guard = self.rx.lock().await;
        let Some(rx) = guard.as_mut() else {
            return Vec::new();
        };
        let mut signals = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            signals.push(signal);
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordId;

    #[tokio::test]
    async fn stream_delivers_signals_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = SignalSource::new(rx);
        let mut stream = source.stream();

        tx.send(ViewSignal::NavigateToRating(RecordId(1))).unwrap();
        tx.send(ViewSignal::Cleared).unwrap();

        assert_eq!(stream.next().await, Some(ViewSignal::NavigateToRating(RecordId(1))));
        assert_eq!(stream.next().await, Some(ViewSignal::Cleared));

        drop(tx);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn signals_are_consumed_once() {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = SignalSource::new(rx);
        tx.send(ViewSignal::Cleared).unwrap();

        assert_eq!(source.drain_pending().await, vec![ViewSignal::Cleared]);
        assert!(source.drain_pending().await.is_empty());
    }

    #[tokio::test]
    async fn second_stream_is_empty() {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = SignalSource::new(rx);
        let mut first = source.clone().stream();
        let mut second = source.stream();

        tx.send(ViewSignal::Cleared).unwrap();
        assert_eq!(first.next().await, Some(ViewSignal::Cleared));
        assert_eq!(second.next().await, None);
    }

    #[tokio::test]
    async fn watch_collapses_rapid_updates() {
        let (tx, rx) = watch::channel(DerivedViewState::default());
        let mut sub = StateSubscription::new(rx);

        for n in 1..=3 {
            tx.send_modify(|s| s.sessions_text = format!("update {n}"));
        }

        let state = sub.changed().await.unwrap();
        assert_eq!(state.sessions_text, "update 3");
        assert!(!sub.has_changed());

        drop(tx);
        assert!(matches!(sub.changed().await, Err(Error::Disposed)));
    }
}
