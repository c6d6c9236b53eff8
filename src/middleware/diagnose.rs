//! Diagnosis middleware for Axum
//!
//! Catches handler panics and error responses that carry a [`Fault`] in
//! their extensions. Eligible failures are diagnosed with the route's
//! declared schemas and the request body, and answered with
//! `500 {"error": ..., "diagnosis": ...}`. Ineligible failures pass through
//! untouched: the original response is returned, the original panic is
//! resumed.
//!
//! A failure already diagnosed by a wrapper inside the handler is answered
//! with that wrapper's diagnosis; the backend is not called twice.
//!
//! The request body is captured only when its size is known and within the
//! limit. The handler always sees the same bytes, and the same read error,
//! it would have seen without the layer.
//!
//! Schemas are keyed by route template (`/users/:id`) when the layer is
//! added with `Router::route_layer`, and by request path otherwise.

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::MatchedPath,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use catcher_core::{scope, DiagnosisFormat, Diagnoser, Fault, SchemaContext};
use futures::future::{self, FutureExt};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, error, warn};

/// Default cap on captured request bodies
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

// ============================================================================
// Route schemas
// ============================================================================

/// Declared request/response shapes of one route
#[derive(Debug, Clone, Default)]
pub struct RouteSchema {
    /// Request body schema
    pub request: Option<Value>,
    /// Response body schema
    pub response: Option<Value>,
}

impl RouteSchema {
    /// Empty schema
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request body schema
    #[must_use]
    pub fn with_request(mut self, schema: Value) -> Self {
        self.request = Some(schema);
        self
    }

    /// Set the response body schema
    #[must_use]
    pub fn with_response(mut self, schema: Value) -> Self {
        self.response = Some(schema);
        self
    }
}

// ============================================================================
// Error Response
// ============================================================================

#[derive(Debug, Serialize)]
struct DiagnosisResponse {
    error: String,
    diagnosis: String,
}

// ============================================================================
// State (shared across requests)
// ============================================================================

#[derive(Clone)]
struct DiagnoseState {
    diagnoser: Arc<Diagnoser>,
    schemas: HashMap<String, RouteSchema>,
    max_body_bytes: usize,
}

impl DiagnoseState {
    async fn respond(
        &self,
        fault: &Fault,
        route: &str,
        body: Option<Value>,
        prior: Option<String>,
    ) -> Response {
        error!(route, kind = %fault.kind(), "Request failed: {}", fault.message());

        let diagnosis = match prior {
            Some(diagnosis) => {
                debug!(route, "Reusing diagnosis from the handler's wrapper");
                diagnosis
            }
            None => {
                let schema = self.schemas.get(route);
                let context = SchemaContext {
                    request_schema: schema.and_then(|s| s.request.clone()),
                    response_schema: schema.and_then(|s| s.response.clone()),
                    request_body: body,
                };
                let request = self.diagnoser.prepare_request(fault).with_context(context);
                self.diagnoser
                    .async_diagnose_request(request, DiagnosisFormat::Plain)
                    .await
            }
        };

        let body = DiagnosisResponse {
            error: fault.summary(),
            diagnosis,
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

// ============================================================================
// Axum Layer
// ============================================================================

/// Diagnosis layer for Axum
#[derive(Clone)]
pub struct DiagnoseLayer {
    state: Arc<DiagnoseState>,
}

impl DiagnoseLayer {
    /// Create a new diagnosis layer
    pub fn new(diagnoser: Arc<Diagnoser>) -> Self {
        Self {
            state: Arc::new(DiagnoseState {
                diagnoser,
                schemas: HashMap::new(),
                max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            }),
        }
    }

    /// Declare the schemas of a route
    #[must_use]
    pub fn with_route_schema(mut self, route: impl Into<String>, schema: RouteSchema) -> Self {
        Arc::make_mut(&mut self.state)
            .schemas
            .insert(route.into(), schema);
        self
    }

    /// Largest request body captured for diagnosis
    #[must_use]
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        Arc::make_mut(&mut self.state).max_body_bytes = limit;
        self
    }
}

impl<S> Layer<S> for DiagnoseLayer {
    type Service = DiagnoseService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DiagnoseService {
            inner,
            state: Arc::clone(&self.state),
        }
    }
}

// ============================================================================
// Axum Service
// ============================================================================

/// Diagnosis service wrapper
#[derive(Clone)]
pub struct DiagnoseService<S> {
    inner: S,
    state: Arc<DiagnoseState>,
}

type BoxFuture<T, E> =
    std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<T, E>> + Send>>;

impl<S> Service<Request<Body>> for DiagnoseService<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<Response, S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> BoxFuture<Response, S::Error> {
        let state = Arc::clone(&self.state);
        // The clone may not be ready; keep the instance poll_ready was called on.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let route = route_key(&req);
            let (req, body) = capture_body(req, state.max_body_bytes).await;

            let outcome = AssertUnwindSafe(scope::scoped(async move { inner.call(req).await }))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(response)) => {
                    let Some(fault) = response.extensions().get::<Fault>().cloned() else {
                        return Ok(response);
                    };
                    let prior = scope::take_diagnosed(&fault);
                    if !state.diagnoser.should_handle(&fault) {
                        debug!(kind = %fault.kind(), "Passing error response through");
                        return Ok(response);
                    }
                    Ok(state.respond(&fault, &route, body, prior).await)
                }
                Ok(Err(e)) => Err(e),
                Err(payload) => {
                    let fault = scope::recover(payload.as_ref());
                    let prior = scope::take_diagnosed(&fault);
                    if !state.diagnoser.should_handle(&fault) {
                        debug!(kind = %fault.kind(), "Re-raising ignored panic");
                        panic::resume_unwind(payload);
                    }
                    Ok(state.respond(&fault, &route, body, prior).await)
                }
            }
        })
    }
}

fn route_key<B>(req: &Request<B>) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string())
}

/// Buffer the body when its size is known and small enough
///
/// Returns the rebuilt request and the captured body. When the body fails
/// mid-read, or turns out larger than its hint, the handler gets the chunks
/// read so far followed by the rest of the original body (or its error), and
/// nothing is captured.
async fn capture_body(req: Request<Body>, limit: usize) -> (Request<Body>, Option<Value>) {
    let within_limit = req
        .body()
        .size_hint()
        .upper()
        .is_some_and(|upper| upper <= limit as u64);
    if !within_limit {
        return (req, None);
    }

    let (parts, body) = req.into_parts();
    let mut rest = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut read = 0;

    while let Some(next) = rest.next().await {
        match next {
            Ok(chunk) => {
                read += chunk.len();
                chunks.push(chunk);
                if read > limit {
                    debug!("Request body outgrew its size hint, not captured");
                    return (Request::from_parts(parts, replay(chunks, rest)), None);
                }
            }
            Err(e) => {
                warn!("Failed to read request body for diagnosis: {e}");
                let failed = stream::once(future::ready(Err(e)));
                return (Request::from_parts(parts, replay(chunks, failed)), None);
            }
        }
    }

    let bytes = Bytes::from(chunks.concat());
    let captured = parse_body(&bytes);
    (Request::from_parts(parts, Body::from(bytes)), captured)
}

/// Body yielding `read` again, then everything `rest` yields
fn replay<S>(read: Vec<Bytes>, rest: S) -> Body
where
    S: Stream<Item = Result<Bytes, axum::Error>> + Send + 'static,
{
    Body::from_stream(stream::iter(read.into_iter().map(Ok)).chain(rest))
}

fn parse_body(bytes: &Bytes) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    Some(
        serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(&Bytes::new()), None);
        assert_eq!(
            parse_body(&Bytes::from_static(br#"{"name": ""}"#)),
            Some(json!({"name": ""}))
        );
        assert_eq!(
            parse_body(&Bytes::from_static(b"name=")),
            Some(Value::String("name=".to_string()))
        );
    }

    #[tokio::test]
    async fn test_capture_keeps_body_readable() {
        let req = Request::builder()
            .uri("/echo")
            .body(Body::from(r#"{"a": 1}"#))
            .unwrap();

        let (req, captured) = capture_body(req, 1024).await;
        assert_eq!(captured, Some(json!({"a": 1})));

        let bytes = axum::body::to_bytes(req.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], br#"{"a": 1}"#);
    }

    #[tokio::test]
    async fn test_capture_skips_large_bodies() {
        let req = Request::builder()
            .uri("/echo")
            .body(Body::from("x".repeat(100)))
            .unwrap();

        let (req, captured) = capture_body(req, 10).await;
        assert_eq!(captured, None);

        let bytes = axum::body::to_bytes(req.into_body(), 1024).await.unwrap();
        assert_eq!(bytes.len(), 100);
    }

    /// Exact-size body that sends one chunk and then fails
    struct ResetBody {
        first: Option<Bytes>,
        failed: bool,
    }

    impl http_body::Body for ResetBody {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<std::result::Result<http_body::Frame<Bytes>, Self::Error>>> {
            if let Some(chunk) = self.first.take() {
                return Poll::Ready(Some(Ok(http_body::Frame::data(chunk))));
            }
            if !self.failed {
                self.failed = true;
                return Poll::Ready(Some(Err(std::io::Error::other("connection reset by peer"))));
            }
            Poll::Ready(None)
        }

        fn size_hint(&self) -> http_body::SizeHint {
            http_body::SizeHint::with_exact(10)
        }
    }

    #[tokio::test]
    async fn test_read_error_reaches_the_handler() {
        let body = Body::new(ResetBody {
            first: Some(Bytes::from_static(b"{\"a\"")),
            failed: false,
        });
        let req = Request::builder().uri("/upload").body(body).unwrap();

        let (req, captured) = capture_body(req, 1024).await;
        assert_eq!(captured, None);

        let mut frames = req.into_body().into_data_stream();
        assert_eq!(&frames.next().await.unwrap().unwrap()[..], b"{\"a\"");
        let err = frames.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("connection reset by peer"));
    }

    #[test]
    fn test_route_key_falls_back_to_path() {
        let req = Request::builder()
            .uri("/divide/1/0?x=1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(route_key(&req), "/divide/1/0");
    }
}
