//! Request routing for the admission gateway.

use std::borrow::Cow;
use std::sync::Arc;

use hyper::header::{HeaderMap, HeaderName};
use hyper::{Method, Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::admission::admit;
use super::{empty_response, json_response, ResponseBody};
use crate::error::{Result, ThrottleError};
use crate::ratelimit::{apply_headers, Identifier, LimiterSet, Scope};

/// Routes requests through the limiters.
///
/// - `GET /healthz` is never limited.
/// - `/portal/...` and `/api/...` are admitted against the portal and API
///   limiters, keyed by the customer id header.
/// - `GET /admin/limits/{scope}/{subject}` reports a window without
///   consuming it; `DELETE` on the same path clears it.
pub struct AdmissionService {
    limiters: Arc<LimiterSet>,
    customer_header: HeaderName,
}

impl AdmissionService {
    /// Create a service reading customer ids from `customer_header`.
    pub fn new(limiters: Arc<LimiterSet>, customer_header: &str) -> Result<Self> {
        let customer_header = HeaderName::from_bytes(customer_header.as_bytes()).map_err(|e| {
            ThrottleError::Config(format!("invalid customer header {:?}: {}", customer_header, e))
        })?;

        Ok(Self {
            limiters,
            customer_header,
        })
    }

    /// Handle one request.
    #[instrument(
        skip_all,
        fields(
            request_id = %Uuid::new_v4(),
            method = %req.method(),
            path = %req.uri().path()
        )
    )]
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ResponseBody> {
        let path = req.uri().path().to_string();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match (req.method(), segments.as_slice()) {
            (&Method::GET, ["healthz"]) => {
                json_response(StatusCode::OK, &json!({"status": "ok"}))
            }
            (_, ["portal", ..]) => self.guarded(Scope::Portal, req.headers()).await,
            (_, ["api", ..]) => self.guarded(Scope::Api, req.headers()).await,
            (&Method::GET, ["admin", "limits", scope, subject]) => {
                self.inspect(scope, subject).await
            }
            (&Method::DELETE, ["admin", "limits", scope, subject]) => {
                self.reset(scope, subject).await
            }
            _ => json_response(StatusCode::NOT_FOUND, &json!({"error": "not found"})),
        }
    }

    /// Admit a customer request against the limiter for `scope`.
    async fn guarded(&self, scope: Scope, headers: &HeaderMap) -> Response<ResponseBody> {
        let Some(customer) = self.customer_id(headers) else {
            warn!(scope = %scope, "Request without customer identity");
            return json_response(
                StatusCode::UNAUTHORIZED,
                &json!({"error": "missing customer identity"}),
            );
        };

        let identifier = Identifier::new(scope, customer);
        let admission = admit(self.limiters.get(scope), &identifier).await;

        if let Some(rejection) = admission.rejection() {
            info!(identifier = %identifier, "Request rejected by rate limit");
            return rejection;
        }

        debug!(
            identifier = %identifier,
            remaining = admission.decision().remaining(),
            "Request admitted"
        );

        admission.finish(json_response(
            StatusCode::OK,
            &json!({
                "status": "accepted",
                "scope": scope,
                "remaining": admission.decision().remaining(),
            }),
        ))
    }

    async fn inspect(&self, scope: &str, subject: &str) -> Response<ResponseBody> {
        let Ok(scope) = scope.parse::<Scope>() else {
            return unknown_scope(scope);
        };
        let Some(subject) = decode_segment(subject) else {
            return invalid_subject(subject);
        };

        let identifier = Identifier::new(scope, &subject);
        let decision = self.limiters.get(scope).check(identifier.as_str()).await;

        let mut response = json_response(StatusCode::OK, &decision);
        apply_headers(&decision, response.headers_mut());
        response
    }

    async fn reset(&self, scope: &str, subject: &str) -> Response<ResponseBody> {
        let Ok(scope) = scope.parse::<Scope>() else {
            return unknown_scope(scope);
        };
        let Some(subject) = decode_segment(subject) else {
            return invalid_subject(subject);
        };

        let identifier = Identifier::new(scope, &subject);
        self.limiters.get(scope).reset(identifier.as_str()).await;
        info!(identifier = %identifier, "Rate limit window cleared by administrator");

        empty_response(StatusCode::NO_CONTENT)
    }

    fn customer_id<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get(&self.customer_header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Percent-decode a path segment; `None` when it is not UTF-8 once decoded.
fn decode_segment(segment: &str) -> Option<Cow<'_, str>> {
    percent_decode_str(segment).decode_utf8().ok()
}

fn invalid_subject(subject: &str) -> Response<ResponseBody> {
    json_response(
        StatusCode::BAD_REQUEST,
        &json!({"error": format!("subject is not valid UTF-8: {}", subject)}),
    )
}

fn unknown_scope(scope: &str) -> Response<ResponseBody> {
    json_response(
        StatusCode::NOT_FOUND,
        &json!({"error": format!("unknown scope: {}", scope)}),
    )
}
