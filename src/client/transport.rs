use std::time::Duration;

use http::StatusCode;
use reqwest::RequestBuilder;
use tokio::time::timeout;

use crate::errors::{SessionError, SessionResult};

/// Sends the request and reads the whole body, bounded by `limit`.
pub(crate) async fn exchange(
    builder: RequestBuilder,
    limit: Duration,
) -> SessionResult<(StatusCode, String)> {
    let call = async {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok::<_, reqwest::Error>((status, body))
    };

    match timeout(limit, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SessionError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/slow")
            .with_chunked_body(|w| {
                std::thread::sleep(std::time::Duration::from_millis(300));
                w.write_all(b"{}")
            })
            .create_async()
            .await;

        let builder = reqwest::Client::new().get(format!("{}/slow", server.url()));
        let err = exchange(builder, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout));
    }
}
