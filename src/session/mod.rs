pub mod controller;
pub mod diagnostics;
pub mod runtime;
pub mod state;

pub use controller::{SessionClock, SessionController};
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticLog};
pub use runtime::{start_session, EngineMessage, SessionHandle};
pub use state::{SessionError, SessionState};
