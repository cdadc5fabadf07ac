//! HTTP plumbing shared by every route: the JSON error body, the access log
//! and the server loop.

use std::{
    borrow::Cow,
    future::Future,
    net::SocketAddr,
    time::Instant,
};

use axum::{
    extract::Request,
    middleware::Next,
    response::{
        IntoResponse,
        Response,
    },
    Router,
};
use errors::ErrorMetadataAnyhowExt;
use http::StatusCode;
use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::report_error;

pub mod extract;

/// Body of every non-2xx response.
#[derive(Serialize, Deserialize)]
struct ErrorBody {
    code: Cow<'static, str>,
    message: Cow<'static, str>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct HttpError {
    status_code: StatusCode,
    error_code: Cow<'static, str>,
    message: Cow<'static, str>,
}

impl HttpError {
    pub fn new(
        status_code: StatusCode,
        error_code: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            status_code,
            error_code: error_code.into(),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn error_code(&self) -> &str {
        &self.error_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Parse a response produced by [`HttpResponseError`] back into its parts.
    #[cfg(any(test, feature = "testing"))]
    pub async fn from_response(response: Response) -> anyhow::Result<Self> {
        use http_body_util::BodyExt;

        let status_code = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        let ErrorBody { code, message } = serde_json::from_slice(&bytes)?;
        Ok(Self::new(status_code, code, message))
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.error_code,
            message: self.message,
        };
        (self.status_code, extract::Json(body)).into_response()
    }
}

/// Error type for handlers. Built from an `anyhow::Error`, whose
/// `ErrorMetadata` decides the status and body; untagged errors become a
/// generic 500. The error is reported when the response is produced.
#[derive(Debug)]
pub struct HttpResponseError {
    trace: anyhow::Error,
    http_error: HttpError,
}

impl From<anyhow::Error> for HttpResponseError {
    fn from(err: anyhow::Error) -> Self {
        let http_error = HttpError::new(
            err.http_status(),
            err.short_msg().to_owned(),
            err.msg().to_owned(),
        );
        Self {
            trace: err,
            http_error,
        }
    }
}

impl IntoResponse for HttpResponseError {
    fn into_response(self) -> Response {
        report_error(&self.trace);
        self.http_error.into_response()
    }
}

pub async fn log_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let response = next.run(req).await;
    tracing::info!(
        target: "telemetry-http",
        "\"{method} {uri}\" {} {:?}",
        response.status().as_u16(),
        start.elapsed(),
    );
    response
}

/// `GET /metrics` in the Prometheus text format. A metric shows up once it
/// has been recorded at least once.
pub async fn metrics() -> Result<impl IntoResponse, HttpResponseError> {
    Ok(::metrics::encode_registry()?)
}

/// Bind `addr` and serve `router` until `shutdown` resolves, then let
/// in-flight requests finish.
pub async fn serve_http(
    router: Router,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", listener.local_addr()?);
    let router = router.layer(axum::middleware::from_fn(log_middleware));
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;
    use errors::{
        ErrorMetadata,
        INTERNAL_SERVER_ERROR,
        INTERNAL_SERVER_ERROR_MSG,
    };
    use http::StatusCode;

    use super::{
        HttpError,
        HttpResponseError,
    };

    #[tokio::test]
    async fn test_untagged_error_is_internal() -> anyhow::Result<()> {
        let err: HttpResponseError = anyhow::anyhow!("sqlite: disk I/O error").into();
        assert_eq!(
            err.http_error,
            HttpError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                INTERNAL_SERVER_ERROR,
                INTERNAL_SERVER_ERROR_MSG,
            )
        );
        let error = HttpError::from_response(err.into_response()).await?;
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        // Internal details never reach the client.
        assert!(!error.message().contains("sqlite"));
        Ok(())
    }

    #[tokio::test]
    async fn test_bad_request_round_trips() -> anyhow::Result<()> {
        let err = anyhow::anyhow!("from > to")
            .context(ErrorMetadata::bad_request(
                "InvalidTimeRange",
                "`from` must not be after `to`",
            ))
            .context("executing query");
        let err: HttpResponseError = err.into();
        let error = HttpError::from_response(err.into_response()).await?;
        assert_eq!(
            error,
            HttpError::new(
                StatusCode::BAD_REQUEST,
                "InvalidTimeRange",
                "`from` must not be after `to`",
            )
        );
        Ok(())
    }
}
