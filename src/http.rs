//! Bounded reads over HTTP: a per-request timeout and at most one retry.

use reqwest::{RequestBuilder, StatusCode};
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Delay before the single retry.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Build an HTTP client with the given request timeout.
pub(crate) fn client(timeout_secs: u64) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("hamip-sync/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Send a read request built by `request`, returning status and body.
///
/// Connect errors, timeouts and 5xx responses are retried once when `retry`
/// is set. Writes must not go through here.
pub(crate) async fn read<F>(
    what: &str,
    retry: bool,
    request: F,
) -> Result<(StatusCode, String), reqwest::Error>
where
    F: Fn() -> RequestBuilder,
{
    let attempts = if retry { 2 } else { 1 };
    let mut attempt = 1;

    loop {
        match request().send().await {
            Ok(response) if response.status().is_server_error() && attempt < attempts => {
                warn!(what, status = %response.status(), "read failed, retrying once");
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await?;
                return Ok((status, body));
            }
            Err(e) if is_transient(&e) && attempt < attempts => {
                warn!(what, error = %e, "read failed, retrying once");
            }
            Err(e) => return Err(e),
        }

        attempt += 1;
        sleep(RETRY_DELAY).await;
    }
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}


#[cfg(test)]
mod tests {
    use super::stub::{Reply, StubServer};
    use super::*;

    #[tokio::test]
    async fn test_server_error_retried_once() {
        let server = StubServer::start(vec![Reply::Status(503, ""), Reply::Status(200, "[]")]).await;
        let http = client(5).unwrap();

        let (status, body) = read("test", true, || http.get(&server.url)).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[]");
        assert_eq!(server.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_second_server_error_is_returned() {
        let server = StubServer::start(vec![Reply::Status(503, ""), Reply::Status(503, "")]).await;
        let http = client(5).unwrap();

        let (status, _) = read("test", true, || http.get(&server.url)).await.unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(server.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_no_retry_when_disabled() {
        let server = StubServer::start(vec![Reply::Status(503, ""), Reply::Status(200, "[]")]).await;
        let http = client(5).unwrap();

        let (status, _) = read("test", false, || http.get(&server.url)).await.unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = StubServer::start(vec![Reply::Status(404, ""), Reply::Status(200, "[]")]).await;
        let http = client(5).unwrap();

        let (status, _) = read("test", true, || http.get(&server.url)).await.unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_retried_then_reported() {
        let server = StubServer::start(vec![Reply::Hang, Reply::Hang]).await;
        let http = client(1).unwrap();

        let err = read("test", true, || http.get(&server.url)).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(server.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_connect_error_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let http = client(1).unwrap();

        let err = read("test", false, || http.get(&url)).await.unwrap_err();
        assert!(err.is_connect());
    }
}
