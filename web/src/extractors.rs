//! Request extractors.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;
use uuid::Uuid;

/// Correlation ID assigned to the current request.
///
/// Set by [`crate::middleware::correlation_id`]. When the middleware is not
/// installed a fresh ID is generated, so extraction never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .extensions
            .get::<Uuid>()
            .copied()
            .unwrap_or_else(Uuid::new_v4);
        Ok(Self(id))
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn reads_id_from_extensions() {
        let id = Uuid::new_v4();
        let (mut parts, ()) = Request::builder()
            .extension(id)
            .body(())
            .unwrap()
            .into_parts();

        let extracted = CorrelationId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(extracted, CorrelationId(id));
    }

    #[tokio::test]
    async fn falls_back_to_fresh_id() {
        let (mut parts, ()) = Request::builder().body(()).unwrap().into_parts();
        let a = CorrelationId::from_request_parts(&mut parts, &()).await.unwrap();
        let b = CorrelationId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_ne!(a, b);
    }
}
