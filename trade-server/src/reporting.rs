//! Error reporting seam for consumers and handlers.

use std::convert::Infallible;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

/// What is known about the HTTP request an error happened in
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    pub request_id: Option<String>,
}

impl<S> FromRequestParts<S> for RequestInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            request_id: parts
                .headers
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        })
    }
}

/// Sink for errors that should reach whoever operates the service
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn report(&self, message: &str, context: Value, request: Option<&RequestInfo>);
}

/// Reports through the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

#[async_trait]
impl ErrorReporter for TracingReporter {
    async fn report(&self, message: &str, context: Value, request: Option<&RequestInfo>) {
        match request {
            Some(req) => error!(
                method = %req.method,
                path = %req.path,
                request_id = req.request_id.as_deref().unwrap_or("-"),
                %context,
                "{message}"
            ),
            None => error!(%context, "{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use serde_json::json;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn request_info_reads_method_path_and_id() {
        let (mut parts, _) = Request::post("/messenger/trade/abc/announce")
            .header("x-request-id", "req-1")
            .body(())
            .unwrap()
            .into_parts();

        let info = RequestInfo::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(info.method, "POST");
        assert_eq!(info.path, "/messenger/trade/abc/announce");
        assert_eq!(info.request_id.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    #[traced_test]
    async fn tracing_reporter_logs_message() {
        TracingReporter.report("slack queue failed", json!({ "queue": "test_slack_queue" }), None).await;
        assert!(logs_contain("slack queue failed"));
    }
}
