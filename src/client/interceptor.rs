use std::sync::Arc;

use reqwest::RequestBuilder;
use tracing::trace;

use crate::store::TokenStore;

/// Attaches the current access token to outbound requests.
///
/// Only reads the token store; never touches the network. A missing token is
/// not an error here: the request goes out unauthenticated and the server decides.
#[derive(Clone)]
pub struct RequestInterceptor {
    store: Arc<TokenStore>,
}

impl RequestInterceptor {
    pub fn new(store: Arc<TokenStore>) -> Self {
        Self { store }
    }

    /// Returns the decorated builder and the token it carries, if any.
    pub async fn intercept(&self, builder: RequestBuilder) -> (RequestBuilder, Option<String>) {
        match self.store.access_token().await {
            Some(token) => (builder.bearer_auth(&token), Some(token)),
            None => {
                trace!(key = %self.store.key(), "No access token; sending unauthenticated");
                (builder, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Session;
    use crate::store::MemoryStorage;

    #[tokio::test]
    async fn test_bearer_header_attached_when_token_present() {
        let store = Arc::new(TokenStore::new("k", Arc::new(MemoryStorage::new())));
        store.set(Session::new("abc", None)).await.unwrap();
        let interceptor = RequestInterceptor::new(store);

        let client = reqwest::Client::new();
        let (builder, token) = interceptor
            .intercept(client.get("http://localhost/auth/profile"))
            .await;
        let request = builder.build().unwrap();

        assert_eq!(token.as_deref(), Some("abc"));
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "Bearer abc"
        );
    }

    #[tokio::test]
    async fn test_no_header_without_token() {
        let store = Arc::new(TokenStore::new("k", Arc::new(MemoryStorage::new())));
        let interceptor = RequestInterceptor::new(store);

        let client = reqwest::Client::new();
        let (builder, token) = interceptor
            .intercept(client.get("http://localhost/health"))
            .await;

        assert!(token.is_none());
        assert!(builder.build().unwrap().headers().get("authorization").is_none());
    }
}
