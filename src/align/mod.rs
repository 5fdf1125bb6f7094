pub mod clock;
pub mod reorder;

pub use clock::{AnchorMode, ClockAligner, TimeUnit};
pub use reorder::ReorderBuffer;
