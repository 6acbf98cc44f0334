//! Request plumbing shared by every route: request ids, bearer auth for the
//! robot and dashboard clients, and a global fixed-window rate limit.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, RETRY_AFTER},
        HeaderValue,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::ApiError;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Caller-supplied ids longer than this are replaced with a fresh one.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Request id, stored as a request extension by [`request_id`].
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Bearer tokens accepted on the protected routes.
#[derive(Debug, Clone)]
pub struct AuthState {
    api_keys: Arc<Vec<String>>,
    pub enabled: bool,
}

impl AuthState {
    /// An empty key list is only tolerated in development, where auth is
    /// switched off.
    ///
    /// # Errors
    ///
    /// Fails when no keys are configured outside development.
    pub fn from_config(api_keys: &[String], is_development: bool) -> anyhow::Result<Self> {
        if !api_keys.is_empty() {
            return Ok(Self {
                api_keys: Arc::new(api_keys.to_vec()),
                enabled: true,
            });
        }
        if !is_development {
            anyhow::bail!(
                "TRASHMAP_API_KEYS must list at least one bearer token outside development"
            );
        }
        tracing::warn!("auth: TRASHMAP_API_KEYS empty; protected routes are open");
        Ok(Self::disabled())
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            api_keys: Arc::new(Vec::new()),
            enabled: false,
        }
    }

    /// Checks every configured key so timing does not reveal which one matched.
    fn allows(&self, token: &str) -> bool {
        self.api_keys
            .iter()
            .fold(subtle::Choice::from(0), |acc, key| {
                acc | key.as_bytes().ct_eq(token.as_bytes())
            })
            .into()
    }
}

#[derive(Debug)]
struct Window {
    opened_at: Instant,
    served: usize,
}

/// One window shared by all protected routes. The producer and the dashboard
/// poller are the only expected clients, so there is no per-caller bucket.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    max_requests: usize,
    period: Duration,
    window: Arc<Mutex<Window>>,
}

impl RateLimitState {
    #[must_use]
    pub fn new(max_requests: usize, period: Duration) -> Self {
        Self {
            max_requests,
            period,
            window: Arc::new(Mutex::new(Window {
                opened_at: Instant::now(),
                served: 0,
            })),
        }
    }

    /// Counts one request; `Err` carries the seconds until the window resets.
    async fn admit(&self) -> Result<(), u64> {
        let mut window = self.window.lock().await;
        let elapsed = window.opened_at.elapsed();
        if elapsed >= self.period {
            window.opened_at = Instant::now();
            window.served = 0;
        } else if window.served >= self.max_requests {
            let remaining = self.period.saturating_sub(elapsed);
            return Err(remaining.as_secs().max(1));
        }
        window.served += 1;
        Ok(())
    }
}

fn current_request_id(req: &Request) -> String {
    req.extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default()
}

/// Reuses a sane caller `x-request-id` or mints a `UUIDv4`, then exposes it
/// to handlers as [`RequestId`] and echoes it on the response.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    req.extensions_mut().insert(RequestId(id.clone()));
    let mut res = next.run(req).await;

    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    res
}

pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    req: Request,
    next: Next,
) -> Response {
    if !auth.enabled {
        return next.run(req).await;
    }

    match extract_bearer_token(req.headers().get(AUTHORIZATION)) {
        Some(token) if auth.allows(token) => next.run(req).await,
        _ => {
            tracing::debug!(path = %req.uri().path(), "auth: rejected request");
            ApiError::new(
                current_request_id(&req),
                "unauthorized",
                "missing or invalid bearer token",
            )
            .into_response()
        }
    }
}

pub async fn enforce_rate_limit(
    State(rate_limit): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    match rate_limit.admit().await {
        Ok(()) => next.run(req).await,
        Err(retry_after_secs) => {
            tracing::warn!(path = %req.uri().path(), "rate limit: request refused");
            let mut res =
                ApiError::new(current_request_id(&req), "rate_limited", "rate limit exceeded")
                    .into_response();
            res.headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
            res
        }
    }
}

fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
