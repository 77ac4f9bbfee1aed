// ABOUTME: Tracker state types: derived view state, one-shot view signals, and coordinator intents.
// ABOUTME: DerivedViewState is always recomputed from a fresh record snapshot, never patched.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::Result;
use crate::format::SessionFormatter;
use crate::store::{RecordId, SessionRecord};

/// UI-facing values derived from the stored records and the cached open session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedViewState {
    pub open_session: Option<SessionRecord>,
    /// Newest first.
    pub all_sessions: Arc<[SessionRecord]>,
    pub sessions_text: String,
    pub can_start: bool,
    pub can_stop: bool,
    pub can_clear: bool,
}

impl DerivedViewState {
    /// Recompute every field from the open session and a full record snapshot.
    pub fn compute(
        open_session: Option<SessionRecord>,
        all_sessions: Vec<SessionRecord>,
        formatter: &dyn SessionFormatter,
    ) -> Self {
        let sessions_text = formatter.format(&all_sessions);
        Self {
            can_start: open_session.is_none(),
            can_stop: open_session.is_some(),
            can_clear: !all_sessions.is_empty(),
            open_session,
            all_sessions: all_sessions.into(),
            sessions_text,
        }
    }
}

/// One-shot messages for the presentation layer. Each is delivered once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewSignal {
    /// A session just ended; show the rating screen for it.
    NavigateToRating(RecordId),
    /// All records were removed.
    Cleared,
    /// A rating was stored for the session.
    RatingSaved(RecordId),
    /// The store failed; show a transient notification.
    StorageFailure(String),
}

/// Requests sent from coordinator handles to the coordinator task.
pub(crate) enum Intent {
    Start,
    Stop,
    Clear,
    Rate { id: RecordId, quality: i32 },
    Refresh,
}

impl Intent {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Intent::Start => "start",
            Intent::Stop => "stop",
            Intent::Clear => "clear",
            Intent::Rate { .. } => "rate",
            Intent::Refresh => "refresh",
        }
    }
}

/// An intent paired with the channel that reports its completion.
pub(crate) struct IntentEnvelope {
    pub intent: Intent,
    pub done: oneshot::Sender<Result<()>>,
}
