//! Request tracing middleware.
//!
//! Assigns (or propagates) a request id, wraps the request in an
//! `http_request` span, logs completion at a level chosen by status class and
//! records the request duration histogram under the matched route.

use axum::{
    body::Body,
    extract::{MatchedPath, Request},
    http::{HeaderName, HeaderValue},
    response::Response,
};
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::telemetry::RequestDurationHistogram;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id attached to the request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

#[derive(Clone, Default)]
pub struct TracingLayer {
    excluded_paths: Vec<String>,
}

impl TracingLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip spans and metrics for paths starting with `prefix`.
    pub fn exclude(mut self, prefix: impl Into<String>) -> Self {
        self.excluded_paths.push(prefix.into());
        self
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService {
            inner,
            excluded_paths: self.excluded_paths.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TracingService<S> {
    inner: S,
    excluded_paths: Vec<String>,
}

impl<S> Service<Request<Body>> for TracingService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let excluded = self
            .excluded_paths
            .iter()
            .any(|p| request.uri().path().starts_with(p.as_str()));
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if excluded {
                return inner.call(request).await;
            }

            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let method = request.method().to_string();
            let route = request
                .extensions()
                .get::<MatchedPath>()
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| request.uri().path().to_string());

            let span = info_span!(
                "http_request",
                request_id = %request_id,
                method = %method,
                route = %route,
                status = tracing::field::Empty,
            );
            request.extensions_mut().insert(RequestId(request_id.clone()));

            let timer = RequestDurationHistogram::start(&method, &route);
            let result = inner.call(request).instrument(span.clone()).await;

            match result {
                Ok(mut response) => {
                    let status = response.status().as_u16();
                    span.record("status", status);
                    if let Ok(value) = HeaderValue::from_str(&request_id) {
                        response
                            .headers_mut()
                            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
                    }
                    if status >= 500 {
                        error!(parent: &span, status, "Server error");
                    } else if status >= 400 {
                        warn!(parent: &span, status, "Client error");
                    } else {
                        info!(parent: &span, status, "Request completed");
                    }
                    timer.finish(status);
                    Ok(response)
                }
                Err(e) => {
                    error!(parent: &span, "Request failed with internal error");
                    timer.finish(500);
                    Err(e)
                }
            }
        })
    }
}
