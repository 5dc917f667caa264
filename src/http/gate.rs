//! Request gate middleware.
//!
//! The gate runs before every route: it resolves the client, looks up the
//! rule for the request and, when one matches, asks the rate limiter for a
//! decision. Denied requests are answered with the rule's quota-exceeded
//! response and never reach the route.

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, RETRY_AFTER};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request};
use axum::response::Response;
use chrono::SecondsFormat;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::config::RateLimitSettings;
use crate::ratelimit::{Decision, Evaluation, Quota, QuotaExceededResponse, RateLimiter};

/// Rate limit header names.
pub mod headers {
    use super::HeaderName;

    /// Requests allowed per window.
    pub const LIMIT: HeaderName = HeaderName::from_static("x-rate-limit-limit");
    /// Requests left in the current window.
    pub const REMAINING: HeaderName = HeaderName::from_static("x-rate-limit-remaining");
    /// RFC 3339 UTC time at which the window resets.
    pub const RESET: HeaderName = HeaderName::from_static("x-rate-limit-reset");
}

/// Orchestrates identity resolution, rule matching and evaluation.
pub struct RequestGate {
    settings: Arc<RateLimitSettings>,
    limiter: Arc<RateLimiter>,
}

impl RequestGate {
    pub fn new(settings: Arc<RateLimitSettings>, limiter: Arc<RateLimiter>) -> Self {
        Self { settings, limiter }
    }

    /// Decide on a request. Returns `None` when no rule applies.
    pub async fn admit(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
    ) -> Option<Evaluation> {
        let rule = self.settings.matcher().find(method, path)?;
        let client = self.settings.resolver().resolve(headers);

        let evaluation = self.limiter.evaluate(&client, rule).await;
        if evaluation.degraded {
            debug!(client = %client, rule = %rule.endpoint(), "Rate limit decided in degraded mode");
        }
        Some(evaluation)
    }

    pub fn emit_headers(&self) -> bool {
        self.settings.emit_headers()
    }
}

/// Rate limiting layer for Tower.
#[derive(Clone)]
pub struct RateLimitLayer {
    gate: Arc<RequestGate>,
}

impl RateLimitLayer {
    pub fn new(gate: Arc<RequestGate>) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            gate: self.gate.clone(),
        }
    }
}

/// Rate limiting service.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    gate: Arc<RequestGate>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let gate = self.gate.clone();
        // Keep the service that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let evaluation = gate
                .admit(request.method(), request.uri().path(), request.headers())
                .await;

            let Some(evaluation) = evaluation else {
                return inner.call(request).await;
            };

            match evaluation.decision {
                Decision::Allow { quota } => {
                    let mut response = inner.call(request).await?;
                    if let (true, Some(quota)) = (gate.emit_headers(), quota) {
                        insert_quota_headers(response.headers_mut(), &quota);
                    }
                    Ok(response)
                }
                Decision::Deny { response, quota } => Ok(quota_exceeded(&response, quota.as_ref())),
            }
        })
    }
}

fn insert_quota_headers(headers: &mut HeaderMap, quota: &Quota) {
    headers.insert(headers::LIMIT, HeaderValue::from(quota.limit));
    headers.insert(headers::REMAINING, HeaderValue::from(quota.remaining));

    // First whole second at or after the window end
    let reset = quota
        .window_end
        .ceil_secs()
        .to_datetime()
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    match HeaderValue::from_str(&reset) {
        Ok(value) => {
            headers.insert(headers::RESET, value);
        }
        Err(e) => warn!(error = %e, "Failed to encode rate limit reset header"),
    }
}

/// Render a quota-exceeded response exactly as configured.
fn quota_exceeded(config: &QuotaExceededResponse, quota: Option<&Quota>) -> Response {
    let mut response = Response::new(Body::from(config.body.clone()));
    *response.status_mut() = config.status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, config.content_type.clone());

    if let Some(quota) = quota {
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(quota.reset_after)));
    }
    response
}

/// Whole seconds until the window resets, rounded up, at least one.
fn retry_after_secs(reset_after: Duration) -> u64 {
    let secs = reset_after.as_secs() + u64::from(reset_after.subsec_nanos() > 0);
    secs.max(1)
}
