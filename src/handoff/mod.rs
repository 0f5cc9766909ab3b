//! Cross-process handoff
//!
//! Shared storage, the chunk handoff queue, and outbound notifications.

pub mod keys;
pub mod notify;
pub mod queue;
pub mod store;

pub use notify::{BroadcastNotifier, Notifier};
pub use queue::{ChunkHandoffQueue, ChunkRecord, ChunkStatus, HandoffError};
pub use store::{FileStore, MemoryStore, SharedStore, StoreError};
