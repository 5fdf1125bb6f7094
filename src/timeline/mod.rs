pub mod aggregate;
pub mod entry;
pub mod store;

pub use aggregate::RollingAggregate;
pub use entry::FusedEntry;
pub use store::{TimelineError, TimelineStore};
