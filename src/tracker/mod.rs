// ABOUTME: Tracker module: the reactive coordinator between user intents and the session store.
// ABOUTME: Publishes derived view state and one-shot view signals to the presentation layer.

pub mod clock;
pub mod coordinator;
pub mod state;
pub mod subscriptions;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{Coordinator, CoordinatorOptions};
pub use state::{DerivedViewState, ViewSignal};
pub use subscriptions::{SignalSource, StateSubscription};
