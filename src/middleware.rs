//! Tower middleware enforcing rate limits over HTTP
//!
//! [`RateLimitLayer`] wraps a service with one algorithm + identifier
//! policy. Admitted requests pass through untouched; denied requests are
//! answered with `429 Too Many Requests` carrying the standard
//! `X-RateLimit-*` headers and a JSON body. The middleware never sees
//! storage failures (the limiter already converted them into admitted
//! fail-open decisions), so the only error paths here are configuration
//! validation (400, message is safe) and the catch-all 500 with a fixed,
//! non-revealing message.

use crate::{Algorithm, RateLimitDecision, RateLimiter};
use http::{header, Request, Response, StatusCode};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;
use tracing::warn;

/// Identifier reported when extraction finds nothing usable.
const UNKNOWN_IDENTIFIER: &str = "unknown";

/// Body of the denied response.
const DENIED_MESSAGE: &str = "Too many requests. Please try again later.";

/// Body of the catch-all 500. Deliberately content-free.
const INTERNAL_MESSAGE: &str = "Internal server error";

/// Resolves the rate-limited identifier from an incoming request.
pub trait IdentifierExtractor: Send + Sync {
    /// `None` falls back to the `"unknown"` bucket.
    fn identify<B>(&self, request: &Request<B>) -> Option<String>;
}

/// Extracts the first value of a header, taking the first comma-separated
/// element (the client address in an `X-Forwarded-For` chain).
#[derive(Debug, Clone)]
pub struct HeaderIdentifier {
    header: header::HeaderName,
}

impl HeaderIdentifier {
    pub fn new(header: header::HeaderName) -> Self {
        Self { header }
    }
}

impl Default for HeaderIdentifier {
    fn default() -> Self {
        Self::new(header::HeaderName::from_static("x-forwarded-for"))
    }
}

impl IdentifierExtractor for HeaderIdentifier {
    fn identify<B>(&self, request: &Request<B>) -> Option<String> {
        let value = request.headers().get(&self.header)?.to_str().ok()?;
        let first = value.split(',').next().unwrap_or(value).trim();
        if first.is_empty() {
            None
        } else {
            Some(first.to_owned())
        }
    }
}

/// A layer that enforces one `(algorithm, extractor)` policy via a shared
/// [`RateLimiter`].
pub struct RateLimitLayer<E = HeaderIdentifier> {
    limiter: Arc<RateLimiter>,
    algorithm: Algorithm,
    extractor: Arc<E>,
}

impl RateLimitLayer<HeaderIdentifier> {
    /// A layer identifying clients by `X-Forwarded-For`.
    pub fn new(limiter: Arc<RateLimiter>, algorithm: Algorithm) -> Self {
        Self { limiter, algorithm, extractor: Arc::new(HeaderIdentifier::default()) }
    }
}

impl<E> RateLimitLayer<E> {
    /// Swap in a different identifier policy.
    pub fn with_extractor<E2: IdentifierExtractor>(self, extractor: E2) -> RateLimitLayer<E2> {
        RateLimitLayer {
            limiter: self.limiter,
            algorithm: self.algorithm,
            extractor: Arc::new(extractor),
        }
    }
}

impl<E> Clone for RateLimitLayer<E> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            algorithm: self.algorithm,
            extractor: Arc::clone(&self.extractor),
        }
    }
}

impl<S, E> Layer<S> for RateLimitLayer<E> {
    type Service = RateLimitService<S, E>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
            algorithm: self.algorithm,
            extractor: Arc::clone(&self.extractor),
        }
    }
}

/// Middleware service produced by [`RateLimitLayer`].
pub struct RateLimitService<S, E = HeaderIdentifier> {
    inner: S,
    limiter: Arc<RateLimiter>,
    algorithm: Algorithm,
    extractor: Arc<E>,
}

impl<S: Clone, E> Clone for RateLimitService<S, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            algorithm: self.algorithm,
            extractor: Arc::clone(&self.extractor),
        }
    }
}

impl<S, E, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<S, E>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    E: IdentifierExtractor + 'static,
    ReqBody: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // Take the ready service and leave the clone behind, so the future
        // uses the instance poll_ready vouched for.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let limiter = Arc::clone(&self.limiter);
        let algorithm = self.algorithm;
        let identifier = self
            .extractor
            .identify(&request)
            .unwrap_or_else(|| UNKNOWN_IDENTIFIER.to_owned());

        Box::pin(async move {
            match limiter.check(algorithm, &identifier).await {
                Ok(decision) if decision.is_allowed() => inner.call(request).await,
                Ok(decision) => {
                    warn!(%algorithm, %identifier, "rate limit exceeded");
                    Ok(denied_response(&decision))
                }
                Err(cause) if cause.is_validation() => {
                    Ok(plain_response(StatusCode::BAD_REQUEST, "Bad Request", &cause.to_string()))
                }
                Err(_) => Ok(plain_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    INTERNAL_MESSAGE,
                )),
            }
        })
    }
}

/// The bit-exact 429 contract: the three unconditional headers, plus
/// `X-RateLimit-Reset` only when a reset hint exists; an absent hint must
/// not produce an empty-value header.
fn denied_response<B: From<String>>(decision: &RateLimitDecision) -> Response<B> {
    let body = serde_json::json!({
        "status": StatusCode::TOO_MANY_REQUESTS.as_u16(),
        "error": "Too Many Requests",
        "message": DENIED_MESSAGE,
        "rateLimitInfo": {
            "algorithm": decision.algorithm().as_str(),
            "limit": decision.limit(),
            "remaining": decision.remaining(),
            "resetAt": decision.reset_at_epoch_secs(),
        },
    });

    let mut builder = Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-RateLimit-Limit", decision.limit().to_string())
        .header("X-RateLimit-Remaining", decision.remaining().to_string())
        .header("X-RateLimit-Algorithm", decision.algorithm().as_str());
    if let Some(reset) = decision.reset_at_epoch_secs() {
        builder = builder.header("X-RateLimit-Reset", reset.to_string());
    }
    builder
        .body(B::from(body.to_string()))
        .expect("statically valid response parts")
}

fn plain_response<B: From<String>>(
    status: StatusCode,
    error: &str,
    message: &str,
) -> Response<B> {
    let body = serde_json::json!({
        "status": status.as_u16(),
        "error": error,
        "message": message,
    });
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(B::from(body.to_string()))
        .expect("statically valid response parts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::{int, text, Call, StubExecutor};
    use crate::RateLimitError;
    use std::convert::Infallible;
    use std::sync::Arc;
    use tower::{service_fn, ServiceExt};

    async fn ok_handler(_request: Request<String>) -> Result<Response<String>, Infallible> {
        Ok(Response::new("hello".to_owned()))
    }

    fn layer(executor: Arc<StubExecutor>, algorithm: Algorithm) -> RateLimitLayer {
        RateLimitLayer::new(Arc::new(RateLimiter::new(executor)), algorithm)
    }

    fn request(forwarded_for: Option<&str>) -> Request<String> {
        let mut builder = Request::builder().uri("/api/things");
        if let Some(value) = forwarded_for {
            builder = builder.header("x-forwarded-for", value);
        }
        builder.body(String::new()).unwrap()
    }

    #[tokio::test]
    async fn admitted_requests_pass_through() {
        let executor = StubExecutor::new();
        executor.push_reply(vec![int(1), text("9"), int(10)]);

        let service = layer(executor.clone(), Algorithm::TokenBucket).layer(service_fn(ok_handler));
        let response = service.oneshot(request(Some("203.0.113.9"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), "hello");
        match &executor.script_calls()[0] {
            Call::Script { keys, .. } => {
                assert_eq!(keys, &["rate_limit:token_bucket:203.0.113.9".to_owned()]);
            }
            other => panic!("unexpected call: {:?}", other),
        }
    }

    #[tokio::test]
    async fn denied_requests_get_the_429_contract() {
        let executor = StubExecutor::new();
        executor.push_reply(vec![int(0), int(10), int(10), int(1_750_000_020)]);

        let service = layer(executor, Algorithm::FixedWindow).layer(service_fn(ok_handler));
        let response = service.oneshot(request(Some("203.0.113.9"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers["X-RateLimit-Limit"], "10");
        assert_eq!(headers["X-RateLimit-Remaining"], "0");
        assert_eq!(headers["X-RateLimit-Algorithm"], "FIXED_WINDOW");
        assert_eq!(headers["X-RateLimit-Reset"], "1750000020");

        let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();
        assert_eq!(body["status"], 429);
        assert_eq!(body["error"], "Too Many Requests");
        assert_eq!(body["rateLimitInfo"]["algorithm"], "FIXED_WINDOW");
    }

    #[test]
    fn absent_reset_hint_omits_the_header_entirely() {
        let decision = RateLimitDecision::denied(Algorithm::SlidingWindowLog, 10, 10, None);
        let response: Response<String> = denied_response(&decision);
        assert!(!response.headers().contains_key("X-RateLimit-Reset"));
        assert!(response.headers().contains_key("X-RateLimit-Algorithm"));
    }

    #[tokio::test]
    async fn missing_header_falls_back_to_the_unknown_bucket() {
        let executor = StubExecutor::new();
        executor.push_reply(vec![int(1), text("9"), int(10)]);

        let service = layer(executor.clone(), Algorithm::TokenBucket).layer(service_fn(ok_handler));
        service.oneshot(request(None)).await.unwrap();

        match &executor.script_calls()[0] {
            Call::Script { keys, .. } => {
                assert_eq!(keys, &["rate_limit:token_bucket:unknown".to_owned()]);
            }
            other => panic!("unexpected call: {:?}", other),
        }
    }

    #[tokio::test]
    async fn forwarded_chain_uses_the_client_address() {
        let executor = StubExecutor::new();
        executor.push_reply(vec![int(1), text("9"), int(10)]);

        let service = layer(executor.clone(), Algorithm::TokenBucket).layer(service_fn(ok_handler));
        service
            .oneshot(request(Some("198.51.100.7, 10.0.0.2, 10.0.0.1")))
            .await
            .unwrap();

        match &executor.script_calls()[0] {
            Call::Script { keys, .. } => {
                assert_eq!(keys, &["rate_limit:token_bucket:198.51.100.7".to_owned()]);
            }
            other => panic!("unexpected call: {:?}", other),
        }
    }

    #[tokio::test]
    async fn storage_failure_lets_the_request_through() {
        let executor = StubExecutor::new();
        executor.push_error(RateLimitError::storage("connection refused"));

        let service = layer(executor, Algorithm::SlidingWindowCounter).layer(service_fn(ok_handler));
        let response = service.oneshot(request(Some("203.0.113.9"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), "hello");
    }

    #[test]
    fn internal_error_body_reveals_nothing() {
        let response: Response<String> = plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error",
            INTERNAL_MESSAGE,
        );
        let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();
        assert_eq!(body["message"], "Internal server error");
        assert_eq!(body["status"], 500);
    }
}
