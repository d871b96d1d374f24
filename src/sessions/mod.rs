//! Session management: per-agent conversation memory keyed by thread.

pub mod in_memory;
pub mod traits;

pub use in_memory::InMemorySessionStore;
pub use traits::{Session, SessionFilter, SessionKey, SessionStore, TranscriptEntry};

use std::sync::Arc;

/// Create the in-memory session store, keeping at most `max_history` entries
/// per agent transcript.
pub fn create_session_store(max_history: usize) -> Arc<dyn SessionStore> {
    Arc::new(InMemorySessionStore::with_transcript_cap(max_history))
}
