//! Shared HTTP plumbing for the external collaborators.

use crate::error::RecapError;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

const USER_AGENT: &str = concat!("workrecap/", env!("CARGO_PKG_VERSION"));

/// Build a client with the per-call timeout applied.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, RecapError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| RecapError::upstream("http", format!("failed to create HTTP client: {}", e)))
}

/// Classify a transport error. Timeouts and connection failures are transient.
pub fn transport_error(service: &str, err: reqwest::Error) -> RecapError {
    if err.is_timeout() {
        RecapError::transient(service, "request timed out")
    } else if err.is_connect() {
        RecapError::transient(service, format!("cannot connect: {}", err))
    } else {
        RecapError::transient(service, format!("request failed: {}", err))
    }
}

/// Whether a status is worth retrying.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Turn a non-success response of a read call into an `UpstreamUnavailable`.
pub async fn check_status(service: &str, response: Response) -> Result<Response, RecapError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let reason = format!("HTTP {}: {}", status, truncate(&body, 200));
    if is_transient_status(status) {
        Err(RecapError::transient(service, reason))
    } else {
        Err(RecapError::upstream(service, reason))
    }
}

/// Turn a non-success response of a write call into the matching error.
///
/// Client errors are rejections; rate limits and server errors stay
/// transient so the retry policy can take another attempt.
pub async fn check_write_status(
    destination: &str,
    response: Response,
) -> Result<Response, RecapError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let reason = format!("HTTP {}: {}", status, truncate(&body, 200));
    if is_transient_status(status) {
        Err(RecapError::transient(destination, reason))
    } else {
        Err(RecapError::rejected(destination, reason))
    }
}

/// Decode a JSON body, mapping failures to `MalformedResponse`.
pub async fn decode<T: DeserializeOwned>(service: &str, response: Response) -> Result<T, RecapError> {
    response
        .json::<T>()
        .await
        .map_err(|e| RecapError::malformed(service, format!("unexpected payload: {}", e)))
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Local HTTP servers standing in for the external APIs.
#[cfg(test)]
pub mod stub {
    use axum::Router;

    /// Serve `router` on an ephemeral port and return its base URL.
    pub async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }
}
