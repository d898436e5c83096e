//! Request tracking middleware.
//!
//! Every request gets a correlation ID: taken from the `X-Correlation-ID`
//! header when it carries a valid UUID, generated otherwise. The ID is stored
//! in request extensions, recorded on the request span and echoed back on the
//! response.
//!
//! ```ignore
//! use axum::{middleware::from_fn, Router};
//! use passgate_web::middleware::correlation_id;
//!
//! let app = Router::new()
//!     .route("/api/qr/validate", post(validate))
//!     .layer(from_fn(correlation_id));
//! ```

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Correlation ID middleware, for use with `axum::middleware::from_fn`.
pub async fn correlation_id(mut req: Request, next: Next) -> Response {
    let correlation_id = req
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    req.extensions_mut().insert(correlation_id);

    let span = tracing::info_span!(
        "http_request",
        correlation_id = %correlation_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }

    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::extractors::CorrelationId;
    use axum::{body::Body, middleware::from_fn, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .route(
                "/echo",
                get(|CorrelationId(id): CorrelationId| async move { id.to_string() }),
            )
            .layer(from_fn(correlation_id))
    }

    fn header(response: &Response) -> String {
        response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .expect("correlation header present")
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn generates_id_when_missing() {
        let request = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert!(Uuid::parse_str(&header(&response)).is_ok());
    }

    #[tokio::test]
    async fn preserves_incoming_id() {
        let id = Uuid::new_v4();
        let request = Request::builder()
            .uri("/ping")
            .header(CORRELATION_ID_HEADER, id.to_string())
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert_eq!(header(&response), id.to_string());
    }

    #[tokio::test]
    async fn replaces_malformed_id() {
        let request = Request::builder()
            .uri("/ping")
            .header(CORRELATION_ID_HEADER, "door-scanner-7")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert_ne!(header(&response), "door-scanner-7");
    }

    #[tokio::test]
    async fn handlers_see_the_same_id() {
        let request = Request::builder().uri("/echo").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();
        let sent = header(&response);

        let body = axum::body::to_bytes(response.into_body(), 256).await.unwrap();
        assert_eq!(String::from_utf8(body.to_vec()).unwrap(), sent);
    }
}
