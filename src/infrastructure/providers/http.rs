//! Shared HTTP plumbing for the API providers.

use reqwest::Response;

use crate::domain::error::{AidfError, ProviderCode};
use crate::services::retry::{parse_retry_after, RETRY_AFTER_CONTEXT_KEY};

/// Map a non-success HTTP response to a categorized error.
///
/// 429 becomes a RATE_LIMIT with any `Retry-After` carried in the context;
/// everything else is an API_ERROR whose retryability follows its status
/// (5xx retries, 4xx does not).
pub async fn error_from_response(response: Response) -> AidfError {
    let status = response.status().as_u16();
    let retry_after_ms = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();

    let mut err = if status == 429 {
        AidfError::Provider {
            code: ProviderCode::RateLimit,
            message: format!("rate limited: {snippet}"),
            status: Some(status),
            context: Default::default(),
        }
    } else {
        AidfError::api_error(Some(status), format!("API returned {status}: {snippet}"))
    };

    if let Some(ms) = retry_after_ms {
        err = err.with_context(RETRY_AFTER_CONTEXT_KEY, ms.to_string());
    }
    err.with_context("status", status.to_string())
}

/// Map a transport-level failure (refused, reset, timed out) to a
/// retryable API_ERROR with no status.
pub fn error_from_transport(err: &reqwest::Error) -> AidfError {
    AidfError::api_error(None, format!("transport error: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_429_maps_to_rate_limit_with_retry_after() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_status(429)
            .with_header("retry-after", "3")
            .with_body("slow down")
            .create_async()
            .await;

        let response = reqwest::get(server.url()).await.unwrap();
        let err = error_from_response(response).await;
        assert_eq!(err.code_str(), "RATE_LIMIT");
        assert!(err.is_retryable());
        assert_eq!(
            err.context().get(RETRY_AFTER_CONTEXT_KEY).map(String::as_str),
            Some("3000")
        );
    }

    #[tokio::test]
    async fn test_5xx_is_retryable_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let response = reqwest::get(server.url()).await.unwrap();
        let err = error_from_response(response).await;
        assert_eq!(err.code_str(), "API_ERROR");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_4xx_is_not_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;

        let response = reqwest::get(server.url()).await.unwrap();
        let err = error_from_response(response).await;
        assert_eq!(err.code_str(), "API_ERROR");
        assert!(!err.is_retryable());
    }
}
