pub mod events;
pub mod manager;

pub use events::{EndReason, SessionEvent};
pub use manager::{AuthOutcome, SessionManager};
