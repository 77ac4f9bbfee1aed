// ABOUTME: Reactive state coordinator: a serial task that owns the cached session state.
// ABOUTME: Turns start/stop/clear/rate intents into dispatcher calls, recomputes view state, and notifies subscribers.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::format::{PlainFormatter, SessionFormatter};
use crate::store::{RecordId, SessionRecord, StoreHandle};
use crate::tracker::clock::{Clock, SystemClock};
use crate::tracker::state::{DerivedViewState, Intent, IntentEnvelope, ViewSignal};
use crate::tracker::subscriptions::{SignalSource, StateSubscription};

const INTENT_QUEUE_CAPACITY: usize = 16;

/// Collaborators injected into a coordinator.
#[derive(Clone)]
pub struct CoordinatorOptions {
    pub clock: Arc<dyn Clock>,
    pub formatter: Arc<dyn SessionFormatter>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            formatter: Arc::new(PlainFormatter::default()),
        }
    }
}

impl CoordinatorOptions {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn SessionFormatter>) -> Self {
        self.formatter = formatter;
        self
    }
}

/// Handle to a running coordinator.
///
/// The coordinator task is the primary context: it processes one intent at a
/// time, awaits each store result, and is the only writer of the published
/// state. Each operation call resolves after its effects are published.
pub struct Coordinator {
    intent_tx: mpsc::Sender<IntentEnvelope>,
    state_rx: watch::Receiver<DerivedViewState>,
    signals: SignalSource,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Spawn a coordinator over `store`. Must be called inside a tokio runtime.
    ///
    /// The initial state is loaded before any intent is processed.
    pub fn spawn(store: StoreHandle, options: CoordinatorOptions) -> Self {
        let (intent_tx, intent_rx) = mpsc::channel(INTENT_QUEUE_CAPACITY);
        let (state_tx, state_rx) = watch::channel(DerivedViewState::default());
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = CoordinatorTask {
            dispatcher: Dispatcher::new(store),
            open_session: None,
            state_tx,
            signal_tx,
            clock: options.clock,
            formatter: options.formatter,
        };
        tokio::spawn(task.run(intent_rx, cancel.clone()));

        Self {
            intent_tx,
            state_rx,
            signals: SignalSource::new(signal_rx),
            cancel,
        }
    }

    /// Begin a new session. Ignored while a session is open.
    pub async fn start(&self) -> Result<()> {
        self.request(Intent::Start).await
    }

    /// End the open session. Ignored when no session is open.
    pub async fn stop(&self) -> Result<()> {
        self.request(Intent::Stop).await
    }

    /// Remove every session.
    pub async fn clear(&self) -> Result<()> {
        self.request(Intent::Clear).await
    }

    /// Rate an ended session with a quality between 0 and 5.
    pub async fn rate(&self, id: RecordId, quality: i32) -> Result<()> {
        self.request(Intent::Rate { id, quality }).await
    }

    /// Re-read the open session and the record list from the store.
    pub async fn refresh(&self) -> Result<()> {
        self.request(Intent::Refresh).await
    }

    /// Latest published state.
    pub fn state(&self) -> DerivedViewState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> StateSubscription {
        StateSubscription::new(self.state_rx.clone())
    }

    /// The one-shot signal source. Signals go to whichever consumer takes them first.
    pub fn signals(&self) -> SignalSource {
        self.signals.clone()
    }

    /// Tear down: cancel outstanding operations and refuse new ones.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled() || self.intent_tx.is_closed()
    }

    async fn request(&self, intent: Intent) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Disposed);
        }
        let (done, rx) = oneshot::channel();
        self.intent_tx
            .send(IntentEnvelope { intent, done })
            .await
            .map_err(|_| Error::Disposed)?;
        rx.await.map_err(|_| Error::Disposed)?
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the coordinator task.
struct CoordinatorTask {
    dispatcher: Dispatcher,
    open_session: Option<SessionRecord>,
    state_tx: watch::Sender<DerivedViewState>,
    signal_tx: mpsc::UnboundedSender<ViewSignal>,
    clock: Arc<dyn Clock>,
    formatter: Arc<dyn SessionFormatter>,
}

impl CoordinatorTask {
    async fn run(mut self, mut intent_rx: mpsc::Receiver<IntentEnvelope>, cancel: CancellationToken) {
        let loaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Disposed),
            result = self.reload() => result,
        };
        if let Err(e) = loaded {
            self.report_failure("load", &e);
        }

        while !cancel.is_cancelled() {
            let envelope = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                envelope = intent_rx.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            let label = envelope.intent.label();
            tracing::debug!(intent = label, "handling intent");
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Disposed),
                result = self.handle(envelope.intent) => result,
            };
            if let Err(e) = &result {
                self.report_failure(label, e);
            }
            let _ = envelope.done.send(result);
        }

        self.dispatcher.shutdown();
        intent_rx.close();
        while intent_rx.try_recv().is_ok() {}
        tracing::debug!("coordinator stopped");
    }

    async fn handle(&mut self, intent: Intent) -> Result<()> {
        match intent {
            Intent::Start => self.start().await,
            Intent::Stop => self.stop().await,
            Intent::Clear => self.clear().await,
            Intent::Rate { id, quality } => self.rate(id, quality).await,
            Intent::Refresh => self.reload().await,
        }
    }

    async fn start(&mut self) -> Result<()> {
        if let Some(open) = &self.open_session {
            tracing::debug!(id = ?open.id, "start ignored, a session is already open");
            return Ok(());
        }

        // Queued back to back: the reads run only after the insert has committed.
        let inserted = self.dispatcher.insert(SessionRecord::begin(self.clock.now_ms()));
        let latest = self.dispatcher.latest();
        let all = self.dispatcher.all_descending();

        let id = match inserted.await {
            Ok(id) => id,
            Err(e @ Error::SessionAlreadyOpen(_)) => {
                // The cache missed an open record; adopt it so stop is offered.
                self.adopt(latest.await?, all.await?);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let latest = latest.await?;
        let all = all.await?;

        if latest.as_ref().and_then(|r| r.id) != Some(id) {
            tracing::warn!(%id, "latest session after insert is not the inserted one");
        }
        self.adopt(latest, all);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(mut ended) = self.open_session.clone() else {
            tracing::debug!("stop ignored, no open session");
            return Ok(());
        };
        ended.end_time_ms = self.clock.now_ms();
        let id = ended.id;

        let updated = self.dispatcher.update(ended);
        let latest = self.dispatcher.latest();
        let all = self.dispatcher.all_descending();

        match updated.await {
            Ok(()) => {}
            Err(e @ Error::NotFound(_)) => {
                self.adopt(latest.await?, all.await?);
                return Err(e);
            }
            Err(e) => return Err(e),
        }
        self.adopt(latest.await?, all.await?);

        match (id, &self.open_session) {
            (Some(id), Some(open)) if open.id == Some(id) => {
                tracing::debug!(%id, "session ended in the millisecond it started and still reads as open");
            }
            (Some(id), _) => self.emit(ViewSignal::NavigateToRating(id)),
            (None, _) => {}
        }
        Ok(())
    }

    async fn clear(&mut self) -> Result<()> {
        let cleared = self.dispatcher.clear();
        let all = self.dispatcher.all_descending();
        cleared.await?;
        let all = all.await?;

        self.open_session = None;
        self.publish(all);
        self.emit(ViewSignal::Cleared);
        Ok(())
    }

    async fn rate(&mut self, id: RecordId, quality: i32) -> Result<()> {
        let rated = self.dispatcher.rate(id, quality);
        let all = self.dispatcher.all_descending();
        rated.await?;
        let all = all.await?;

        self.publish(all);
        self.emit(ViewSignal::RatingSaved(id));
        Ok(())
    }

    /// Re-derive the open session from the latest record and re-read the list.
    async fn reload(&mut self) -> Result<()> {
        let latest = self.dispatcher.latest();
        let all = self.dispatcher.all_descending();
        let latest = latest.await?;
        let all = all.await?;

        self.adopt(latest, all);
        Ok(())
    }

    /// Take the open session from a fresh read of the latest record and publish.
    fn adopt(&mut self, latest: Option<SessionRecord>, all_sessions: Vec<SessionRecord>) {
        self.open_session = latest.filter(SessionRecord::is_open);
        self.publish(all_sessions);
    }

    /// Recompute the whole view state and notify subscribers once if anything changed.
    fn publish(&self, all_sessions: Vec<SessionRecord>) {
        let next = DerivedViewState::compute(self.open_session.clone(), all_sessions, &*self.formatter);
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    fn emit(&self, signal: ViewSignal) {
        let _ = self.signal_tx.send(signal);
    }

    fn report_failure(&self, label: &'static str, error: &Error) {
        match error {
            Error::Disposed => {}
            Error::NotFound(id) if is_invariant_violation(label, error) => {
                tracing::error!(intent = label, %id, "session missing from store, dropping operation");
            }
            e if e.is_storage_failure() => {
                tracing::warn!(intent = label, error = %e, "store operation failed");
                self.emit(ViewSignal::StorageFailure(e.to_string()));
            }
            other => {
                tracing::info!(intent = label, error = %other, "intent rejected");
            }
        }
    }
}

/// A missing record is only an invariant violation when the coordinator itself
/// chose the id. Rating takes an id from the user.
fn is_invariant_violation(label: &str, error: &Error) -> bool {
    matches!(error, Error::NotFound(_)) && label != "rate"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionStore;
    use crate::tracker::clock::ManualClock;

    const T0: i64 = 1_700_000_000_000;

    struct Fixture {
        coordinator: Coordinator,
        store: StoreHandle,
        clock: ManualClock,
    }

    async fn fixture() -> Fixture {
        let store = StoreHandle::new(SessionStore::open_in_memory().unwrap());
        let clock = ManualClock::new(T0);
        let coordinator = Coordinator::spawn(
            store.clone(),
            CoordinatorOptions::default().with_clock(Arc::new(clock.clone())),
        );
        coordinator.refresh().await.unwrap();
        Fixture {
            coordinator,
            store,
            clock,
        }
    }

    #[tokio::test]
    async fn fresh_coordinator_can_only_start() {
        let f = fixture().await;
        let state = f.coordinator.state();
        assert!(state.can_start);
        assert!(!state.can_stop);
        assert!(!state.can_clear);
        assert!(state.open_session.is_none());
    }

    #[tokio::test]
    async fn start_opens_a_session() {
        let f = fixture().await;
        f.coordinator.start().await.unwrap();

        let state = f.coordinator.state();
        assert_eq!(state.all_sessions.len(), 1);
        assert!(!state.can_start);
        assert!(state.can_stop);
        assert!(state.can_clear);
        let open = state.open_session.unwrap();
        assert_eq!(open.start_time_ms, T0);
        assert!(open.is_open());
    }

    #[tokio::test]
    async fn stop_ends_the_session_and_requests_rating() {
        let f = fixture().await;
        let signals = f.coordinator.signals();
        f.coordinator.start().await.unwrap();
        f.clock.advance(8 * 3_600_000);
        f.coordinator.stop().await.unwrap();

        let state = f.coordinator.state();
        assert!(state.can_start);
        assert!(!state.can_stop);
        let ended = &state.all_sessions[0];
        assert!(ended.end_time_ms > ended.start_time_ms);
        assert_eq!(
            signals.drain_pending().await,
            vec![ViewSignal::NavigateToRating(ended.id.unwrap())]
        );
    }

    #[tokio::test]
    async fn stop_without_open_session_changes_nothing() {
        let f = fixture().await;
        let signals = f.coordinator.signals();
        let mut sub = f.coordinator.subscribe();
        let before = sub.current();

        f.coordinator.stop().await.unwrap();

        assert!(!sub.has_changed());
        assert_eq!(f.coordinator.state(), before);
        assert!(signals.drain_pending().await.is_empty());
    }

    #[tokio::test]
    async fn start_while_open_is_ignored() {
        let f = fixture().await;
        f.coordinator.start().await.unwrap();
        f.clock.advance(1_000);
        f.coordinator.start().await.unwrap();
        assert_eq!(f.store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_empties_everything() {
        let f = fixture().await;
        let signals = f.coordinator.signals();
        for _ in 0..3 {
            f.coordinator.start().await.unwrap();
            f.clock.advance(60_000);
            f.coordinator.stop().await.unwrap();
            f.clock.advance(60_000);
        }
        assert_eq!(f.coordinator.state().all_sessions.len(), 3);
        let _ = signals.drain_pending().await;

        f.coordinator.clear().await.unwrap();

        let state = f.coordinator.state();
        assert!(state.all_sessions.is_empty());
        assert!(!state.can_clear);
        assert!(state.can_start);
        assert_eq!(signals.drain_pending().await, vec![ViewSignal::Cleared]);
    }

    #[tokio::test]
    async fn one_notification_per_operation() {
        let f = fixture().await;
        let mut sub = f.coordinator.subscribe();
        let _ = sub.current();

        f.coordinator.start().await.unwrap();
        assert!(sub.has_changed());
        let state = sub.current();
        assert!(state.can_stop && state.can_clear && !state.can_start);
        assert!(!sub.has_changed());
    }

    #[tokio::test]
    async fn rate_stores_quality_once() {
        let f = fixture().await;
        let signals = f.coordinator.signals();
        f.coordinator.start().await.unwrap();
        f.clock.advance(60_000);
        f.coordinator.stop().await.unwrap();
        let id = f.coordinator.state().all_sessions[0].id.unwrap();
        let _ = signals.drain_pending().await;

        f.coordinator.rate(id, 4).await.unwrap();
        assert_eq!(f.coordinator.state().all_sessions[0].quality, 4);
        assert_eq!(signals.drain_pending().await, vec![ViewSignal::RatingSaved(id)]);

        assert!(matches!(f.coordinator.rate(id, 2).await, Err(Error::NotRateable { .. })));
        assert_eq!(f.coordinator.state().all_sessions[0].quality, 4);
    }

    #[tokio::test]
    async fn rate_rejects_open_session() {
        let f = fixture().await;
        f.coordinator.start().await.unwrap();
        let id = f.coordinator.state().open_session.unwrap().id.unwrap();
        assert!(matches!(f.coordinator.rate(id, 3).await, Err(Error::NotRateable { .. })));
    }

    #[tokio::test]
    async fn storage_failure_keeps_prior_state_and_signals() {
        let f = fixture().await;
        let signals = f.coordinator.signals();
        f.coordinator.start().await.unwrap();
        let before = f.coordinator.state();

        f.store
            .with_conn_for_test(|conn| conn.execute_batch("DROP TABLE sleep_sessions"))
            .unwrap();
        f.clock.advance(1_000);

        let result = f.coordinator.stop().await;
        assert!(result.unwrap_err().is_storage_failure());
        assert_eq!(f.coordinator.state(), before);
        let pending = signals.drain_pending().await;
        assert_eq!(pending.len(), 1);
        assert!(matches!(pending[0], ViewSignal::StorageFailure(_)));
    }

    #[tokio::test]
    async fn missing_record_on_stop_resyncs_quietly() {
        let f = fixture().await;
        let signals = f.coordinator.signals();
        f.coordinator.start().await.unwrap();
        let before = f.coordinator.state();

        f.store
            .with_conn_for_test(|conn| conn.execute_batch("DELETE FROM sleep_sessions"))
            .unwrap();
        f.clock.advance(1_000);

        assert!(matches!(f.coordinator.stop().await, Err(Error::NotFound(_))));
        assert!(signals.drain_pending().await.is_empty());

        // The cache follows the store again instead of the vanished record.
        let state = f.coordinator.state();
        assert_ne!(state, before);
        assert!(state.open_session.is_none());
        assert!(state.all_sessions.is_empty());
        assert!(state.can_start);
        f.coordinator.start().await.unwrap();
        assert!(f.coordinator.state().can_stop);
    }

    #[tokio::test]
    async fn start_rejected_by_unseen_open_session_offers_stop() {
        let f = fixture().await;
        let signals = f.coordinator.signals();
        // Written behind the coordinator's back, so its cache still says nothing is open.
        let id = f.store.insert(&SessionRecord::begin(T0)).unwrap();
        assert!(f.coordinator.state().can_start);

        f.clock.advance(1_000);
        assert!(matches!(
            f.coordinator.start().await,
            Err(Error::SessionAlreadyOpen(open)) if open == id
        ));
        let state = f.coordinator.state();
        assert!(state.can_stop);
        assert!(!state.can_start);
        assert_eq!(state.open_session.and_then(|r| r.id), Some(id));
        assert_eq!(f.store.count().unwrap(), 1);

        f.clock.advance(1_000);
        f.coordinator.stop().await.unwrap();
        assert!(f.coordinator.state().can_start);
        assert!(!f.store.get_by_id(id).unwrap().unwrap().is_open());
        assert_eq!(signals.drain_pending().await, vec![ViewSignal::NavigateToRating(id)]);
    }

    #[tokio::test]
    async fn stop_in_the_same_millisecond_keeps_session_open() {
        let f = fixture().await;
        let signals = f.coordinator.signals();
        f.coordinator.start().await.unwrap();
        let id = f.coordinator.state().open_session.unwrap().id.unwrap();

        f.coordinator.stop().await.unwrap();

        let stored = f.store.get_by_id(id).unwrap().unwrap();
        assert!(stored.is_open());
        let open: Vec<_> = f
            .store
            .get_all_descending()
            .unwrap()
            .into_iter()
            .filter(SessionRecord::is_open)
            .collect();
        assert_eq!(open.len(), 1);

        let state = f.coordinator.state();
        assert!(state.can_stop);
        assert!(!state.can_start);
        assert!(signals.drain_pending().await.is_empty());

        // A later stop ends it for real.
        f.clock.advance(5_000);
        f.coordinator.stop().await.unwrap();
        assert!(f.coordinator.state().can_start);
        assert_eq!(signals.drain_pending().await, vec![ViewSignal::NavigateToRating(id)]);
    }

    #[test]
    fn unknown_rating_id_is_not_an_invariant_violation() {
        let missing = Error::NotFound(RecordId(9));
        assert!(!is_invariant_violation("rate", &missing));
        assert!(is_invariant_violation("stop", &missing));
        assert!(!is_invariant_violation("stop", &Error::Disposed));
    }

    #[tokio::test]
    async fn existing_open_session_is_picked_up_on_load() {
        let store = StoreHandle::new(SessionStore::open_in_memory().unwrap());
        let id = store.insert(&SessionRecord::begin(T0)).unwrap();

        let coordinator = Coordinator::spawn(store, CoordinatorOptions::default());
        coordinator.refresh().await.unwrap();

        let state = coordinator.state();
        assert_eq!(state.open_session.and_then(|r| r.id), Some(id));
        assert!(state.can_stop);
    }

    #[tokio::test]
    async fn operations_after_shutdown_are_disposed() {
        let f = fixture().await;
        f.coordinator.shutdown();
        assert!(f.coordinator.is_disposed());
        assert!(matches!(f.coordinator.start().await, Err(Error::Disposed)));
        assert!(matches!(f.coordinator.stop().await, Err(Error::Disposed)));
        assert!(matches!(f.coordinator.clear().await, Err(Error::Disposed)));
        assert_eq!(f.store.count().unwrap(), 0);
    }
}
