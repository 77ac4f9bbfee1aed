// ABOUTME: Session store module: durable sleep session records and the shared store handle.
// ABOUTME: Owns the only persisted state in the application.

pub mod handle;
pub mod record;
pub mod sqlite;

pub use handle::{DATABASE_FILE, Singleton, StoreContext, StoreHandle, acquire, construction_count};
pub use record::{MAX_QUALITY, RecordId, SessionRecord, UNRATED, is_valid_quality};
pub use sqlite::SessionStore;
