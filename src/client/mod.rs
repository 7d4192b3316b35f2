//! Outbound HTTP: token attachment, auth endpoints, refresh coordination.

pub mod api_client;
pub mod coordinator;
pub mod endpoints;
pub mod interceptor;
pub mod request;
mod transport;

pub use api_client::ApiClient;
pub use coordinator::{RefreshCoordinator, Refresher};
pub use endpoints::AuthEndpoints;
pub use interceptor::RequestInterceptor;
pub use request::ApiRequest;
