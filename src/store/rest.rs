//! Window store on a Redis-compatible REST endpoint (Upstash style).
//!
//! Every call is one `POST` of a JSON command array to the endpoint,
//! authorized with a bearer token. Replies are `{"result": ...}` or
//! `{"error": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;
use uuid::Uuid;

use super::{StoreError, WindowRequest, WindowState, WindowStore};

/// Sliding-window log kept in a sorted set scored by admission time.
///
/// KEYS[1] = log key
/// ARGV = now_ms, window_ms, limit, member, consume ("1" or "0")
/// Returns {admitted, count, oldest_ms or -1}.
const SLIDING_LOG_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local consume = ARGV[5] == "1"

redis.call("ZREMRANGEBYSCORE", key, "-inf", now - window)
local count = redis.call("ZCARD", key)
local admitted = 0
if count < limit then
  admitted = 1
  if consume then
    redis.call("ZADD", key, now, ARGV[4])
    redis.call("PEXPIRE", key, window)
    count = count + 1
  end
end

local oldest = -1
local head = redis.call("ZRANGE", key, 0, 0, "WITHSCORES")
if head[2] then
  oldest = tonumber(head[2])
end
return {admitted, count, oldest}
"#;

#[derive(Debug, Deserialize)]
struct RestReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Window store backed by a shared REST endpoint.
pub struct RestStore {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl std::fmt::Debug for RestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestStore")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl RestStore {
    /// Create a store client for `endpoint` authorized by `token`.
    ///
    /// `timeout` bounds each HTTP exchange. The limiter applies its own
    /// deadline on top of this.
    pub fn new(endpoint: &str, token: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Run a single command and return its `result`.
    async fn command(&self, args: &[String]) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(args)
            .send()
            .await?;

        let status = response.status();
        let reply: RestReply = match response.json().await {
            Ok(reply) => reply,
            Err(_) if !status.is_success() => {
                return Err(StoreError::Remote(format!("HTTP {}", status)));
            }
            Err(e) => return Err(StoreError::Transport(e)),
        };

        if let Some(error) = reply.error {
            return Err(StoreError::Remote(error));
        }
        if !status.is_success() {
            return Err(StoreError::Remote(format!("HTTP {}", status)));
        }

        reply.result.ok_or_else(|| {
            StoreError::Protocol("reply carries neither result nor error".to_string())
        })
    }

    async fn run_window(
        &self,
        key: &str,
        request: WindowRequest,
        consume: bool,
    ) -> Result<WindowState, StoreError> {
        let member = format!("{}-{}", request.now_ms, Uuid::new_v4());
        let args = vec![
            "EVAL".to_string(),
            SLIDING_LOG_SCRIPT.to_string(),
            "1".to_string(),
            key.to_string(),
            request.now_ms.to_string(),
            request.window_ms.to_string(),
            request.limit.to_string(),
            member,
            if consume { "1" } else { "0" }.to_string(),
        ];

        trace!(key = %key, consume, "Evaluating sliding log script");

        let result = self.command(&args).await?;
        parse_window_state(&result)
    }
}

/// Decode the script's `{admitted, count, oldest_ms}` reply.
fn parse_window_state(value: &Value) -> Result<WindowState, StoreError> {
    let malformed = || StoreError::Protocol(format!("malformed window reply: {}", value));

    let fields = value.as_array().ok_or_else(malformed)?;
    let [admitted, count, oldest] = fields.as_slice() else {
        return Err(malformed());
    };

    let admitted = admitted.as_i64().ok_or_else(malformed)?;
    let count = count.as_u64().ok_or_else(malformed)?;
    let oldest = oldest.as_i64().ok_or_else(malformed)?;

    Ok(WindowState {
        admitted: admitted == 1,
        count,
        oldest_ms: u64::try_from(oldest).ok(),
    })
}

#[async_trait]
impl WindowStore for RestStore {
    async fn record(&self, key: &str, request: WindowRequest) -> Result<WindowState, StoreError> {
        self.run_window(key, request, true).await
    }

    async fn inspect(
        &self,
        key: &str,
        request: WindowRequest,
    ) -> Result<WindowState, StoreError> {
        self.run_window(key, request, false).await
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.command(&["DEL".to_string(), key.to_string()]).await?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "rest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::body::Incoming;
    use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use serde_json::json;
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    const START: u64 = 1_700_000_000_000;

    /// Requests seen by the stub: (authorization header, JSON body)
    type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    /// Serve a fixed reply to every request and remember what was sent.
    async fn spawn_stub(status: StatusCode, reply: &'static str) -> (String, Seen) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen: Seen = Arc::default();
        let recorded = seen.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let recorded = recorded.clone();
                        async move {
                            let auth = req
                                .headers()
                                .get(AUTHORIZATION)
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string);
                            let body = req.into_body().collect().await.unwrap().to_bytes();
                            let body: Value = serde_json::from_slice(&body).unwrap();
                            recorded.lock().unwrap().push((auth, body));

                            Ok::<_, Infallible>(
                                Response::builder()
                                    .status(status)
                                    .header(CONTENT_TYPE, "application/json")
                                    .body(Full::new(Bytes::from_static(reply.as_bytes())))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        (format!("http://{}", addr), seen)
    }

    fn request(limit: u64) -> WindowRequest {
        WindowRequest {
            now_ms: START,
            window_ms: 10_000,
            limit,
        }
    }

    #[tokio::test]
    async fn test_record_sends_script_with_bearer_token() {
        let (endpoint, seen) =
            spawn_stub(StatusCode::OK, r#"{"result":[1,1,1700000000000]}"#).await;
        let store = RestStore::new(&endpoint, "secret", Duration::from_secs(2)).unwrap();

        let state = store.record("ratelimit:portal:cust-1", request(3)).await.unwrap();

        assert_eq!(
            state,
            WindowState {
                admitted: true,
                count: 1,
                oldest_ms: Some(START),
            }
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (auth, body) = &seen[0];
        assert_eq!(auth.as_deref(), Some("Bearer secret"));
        assert_eq!(body[0], json!("EVAL"));
        assert_eq!(body[2], json!("1"));
        assert_eq!(body[3], json!("ratelimit:portal:cust-1"));
        assert_eq!(body[4], json!(START.to_string()));
        assert_eq!(body[5], json!("10000"));
        assert_eq!(body[6], json!("3"));
        assert!(body[7].as_str().unwrap().starts_with("1700000000000-"));
        assert_eq!(body[8], json!("1"));
    }

    #[tokio::test]
    async fn test_inspect_does_not_consume() {
        let (endpoint, seen) = spawn_stub(StatusCode::OK, r#"{"result":[1,0,-1]}"#).await;
        let store = RestStore::new(&endpoint, "secret", Duration::from_secs(2)).unwrap();

        let state = store.inspect("k", request(3)).await.unwrap();

        assert!(state.admitted);
        assert_eq!(state.count, 0);
        assert_eq!(state.oldest_ms, None);
        assert_eq!(seen.lock().unwrap()[0].1[8], json!("0"));
    }

    #[tokio::test]
    async fn test_clear_sends_del() {
        let (endpoint, seen) = spawn_stub(StatusCode::OK, r#"{"result":1}"#).await;
        let store = RestStore::new(&endpoint, "secret", Duration::from_secs(2)).unwrap();

        store.clear("ratelimit:api:cust-9").await.unwrap();

        assert_eq!(seen.lock().unwrap()[0].1, json!(["DEL", "ratelimit:api:cust-9"]));
    }

    #[tokio::test]
    async fn test_error_reply_is_remote_error() {
        let (endpoint, _) =
            spawn_stub(StatusCode::BAD_REQUEST, r#"{"error":"ERR unknown command"}"#).await;
        let store = RestStore::new(&endpoint, "secret", Duration::from_secs(2)).unwrap();

        let err = store.record("k", request(3)).await.unwrap_err();
        assert!(matches!(err, StoreError::Remote(ref msg) if msg == "ERR unknown command"));
    }

    #[tokio::test]
    async fn test_non_json_failure_is_remote_error() {
        let (endpoint, _) = spawn_stub(StatusCode::UNAUTHORIZED, "Unauthorized").await;
        let store = RestStore::new(&endpoint, "wrong", Duration::from_secs(2)).unwrap();

        let err = store.clear("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Remote(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let store = RestStore::new("http://127.0.0.1:1", "secret", Duration::from_secs(2)).unwrap();

        let err = store.record("k", request(3)).await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
    }

    #[test]
    fn test_parse_window_state_rejects_malformed_replies() {
        assert!(parse_window_state(&json!([0, 3, 1700000000000u64])).is_ok());
        assert!(matches!(parse_window_state(&json!("OK")), Err(StoreError::Protocol(_))));
        assert!(matches!(parse_window_state(&json!([1, 2])), Err(StoreError::Protocol(_))));
        assert!(matches!(parse_window_state(&json!([1, -2, 0])), Err(StoreError::Protocol(_))));
    }

    #[test]
    fn test_debug_hides_token() {
        let store =
            RestStore::new("https://example-store.upstash.io/", "secret", Duration::from_secs(1))
                .unwrap();
        let debug = format!("{:?}", store);

        assert!(debug.contains("https://example-store.upstash.io"));
        assert!(!debug.contains("secret"));
    }

    #[tokio::test]
    #[ignore = "needs a live store in UPSTASH_REDIS_REST_URL and UPSTASH_REDIS_REST_TOKEN"]
    async fn test_sliding_log_script_on_live_store() {
        use crate::config::{STORE_TOKEN_ENV, STORE_URL_ENV};

        let (Ok(url), Ok(token)) = (std::env::var(STORE_URL_ENV), std::env::var(STORE_TOKEN_ENV))
        else {
            return;
        };
        let store = RestStore::new(&url, &token, Duration::from_secs(5)).unwrap();
        let key = format!("portal-limiter-test:{}", Uuid::new_v4());
        let at = |offset_ms: u64| WindowRequest {
            now_ms: START + offset_ms,
            window_ms: 10_000,
            limit: 3,
        };

        for expected in 1..=3 {
            let state = store.record(&key, at(0)).await.unwrap();
            assert!(state.admitted);
            assert_eq!(state.count, expected);
            assert_eq!(state.oldest_ms, Some(START));
        }

        let rejected = store.record(&key, at(5_000)).await.unwrap();
        assert!(!rejected.admitted);
        assert_eq!(rejected.count, 3);

        let peeked = store.inspect(&key, at(5_000)).await.unwrap();
        assert!(!peeked.admitted);
        assert_eq!(peeked.count, 3);

        let slid = store.record(&key, at(10_000)).await.unwrap();
        assert!(slid.admitted);
        assert_eq!(slid.count, 1);
        assert_eq!(slid.oldest_ms, Some(START + 10_000));

        store.clear(&key).await.unwrap();
        let cleared = store.inspect(&key, at(10_000)).await.unwrap();
        assert_eq!(cleared.count, 0);
        assert_eq!(cleared.oldest_ms, None);
    }
}
