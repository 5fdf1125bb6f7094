pub mod archive;
pub mod wal;

pub use archive::{save_session, ArchiveMetadata, ArchivedSession};
pub use wal::{EntryLog, JsonlEntryLog, NullEntryLog};
