pub mod guard;
pub mod staleness;
pub mod storage;
pub mod store;

pub use guard::{is_greeting, DuplicateGuard};
pub use staleness::{Freshness, StalenessPolicy};
pub use storage::{FileStorage, MemoryStorage, StorageBackend};
pub use store::{ConversationStore, StoreSettings};
