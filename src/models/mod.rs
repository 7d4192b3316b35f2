pub mod credentials;
pub mod envelope;
pub mod session;
pub mod user;

pub use credentials::{LoginCredentials, RegisterRequest};
pub use envelope::{ApiEnvelope, AuthPayload, ProfilePayload, RefreshPayload};
pub use session::Session;
pub use user::User;
