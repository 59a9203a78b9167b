//! The HTTP client for the tax engine.
//!
//! Every call sends JSON, runs under the retry policy, and parses the
//! engine's response envelope: `{ success|ok: bool, data|items: ...,
//! message?: string }`. Older engine endpoints answer with flat objects
//! next to the `ok` flag, which callers can read with [Envelope::decode_extra].

use reqwest::{Method, StatusCode, header::CONTENT_TYPE};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{Error, backend::RetryPolicy};

/// The JSON envelope the tax engine wraps its responses in.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Envelope {
    /// The success flag used by the newer engine endpoints.
    #[serde(default)]
    pub success: Option<bool>,
    /// The success flag used by the older engine endpoints.
    #[serde(default)]
    pub ok: Option<bool>,
    /// The payload of object-shaped responses.
    #[serde(default)]
    pub data: Option<Value>,
    /// The payload of list-shaped responses.
    #[serde(default)]
    pub items: Option<Value>,
    /// A human-readable message, set on failures and some successes.
    #[serde(default)]
    pub message: Option<String>,
    /// Any remaining top-level fields. Older endpoints put their whole
    /// payload here, flat next to the `ok` flag.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Envelope {
    /// Whether the engine reported success. A missing flag counts as failure.
    pub fn is_success(&self) -> bool {
        self.success.or(self.ok).unwrap_or(false)
    }

    /// Deserialize the `data` (or `items`) payload into a concrete type.
    ///
    /// # Errors
    /// Returns [Error::InvalidEnvelope] if the payload is missing or has
    /// the wrong shape.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let payload = self
            .data
            .as_ref()
            .or(self.items.as_ref())
            .ok_or_else(|| Error::InvalidEnvelope("response has no data or items field".to_owned()))?;

        serde_json::from_value(payload.clone())
            .map_err(|error| Error::InvalidEnvelope(error.to_string()))
    }

    /// Deserialize the flat top-level fields into a concrete type, for
    /// the older endpoints that answer `{ ok: true, sales_vat: ..., ... }`.
    ///
    /// # Errors
    /// Returns [Error::InvalidEnvelope] if the fields have the wrong shape.
    pub fn decode_extra<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_value(Value::Object(self.extra.clone()))
            .map_err(|error| Error::InvalidEnvelope(error.to_string()))
    }
}

/// A raw response snapshot for the cache layer: the exact bytes the
/// engine sent, plus the content type needed to serve them again.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// The response body, byte for byte.
    pub body: Vec<u8>,
    /// The value of the `Content-Type` header.
    pub content_type: String,
}

/// The resilient client for the tax engine REST API.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl BackendClient {
    /// Create a client for the engine at `base_url`.
    ///
    /// `timeout` applies per attempt, not per logical call: each retry
    /// gets the full timeout again.
    ///
    /// # Errors
    /// Returns [Error::HttpClientError] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(
        base_url: &str,
        timeout: std::time::Duration,
        retry: RetryPolicy,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::HttpClientError(error.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            retry,
        })
    }

    /// A copy of this client with a different retry policy, e.g. a
    /// no-retry policy for health probes.
    pub fn with_retry(&self, retry: RetryPolicy) -> Self {
        Self {
            retry,
            ..self.clone()
        }
    }

    /// Perform a GET request and parse the response envelope.
    pub async fn get(&self, path: &str) -> Result<Envelope, Error> {
        self.request_envelope(Method::GET, path, None).await
    }

    /// Perform a POST request with a JSON body and parse the response envelope.
    pub async fn post<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<Envelope, Error> {
        let json = serde_json::to_string(body)?;
        self.request_envelope(Method::POST, path, Some(json)).await
    }

    /// Perform a PUT request with a JSON body and parse the response envelope.
    pub async fn put<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<Envelope, Error> {
        let json = serde_json::to_string(body)?;
        self.request_envelope(Method::PUT, path, Some(json)).await
    }

    /// Perform a DELETE request and parse the response envelope.
    pub async fn delete(&self, path: &str) -> Result<Envelope, Error> {
        self.request_envelope(Method::DELETE, path, None).await
    }

    /// Perform a GET request and return the raw response bytes for the
    /// cache layer. The envelope is not inspected; any 2xx answer is a
    /// snapshot worth keeping.
    pub async fn get_raw(&self, path: &str) -> Result<RawResponse, Error> {
        let url = self.url_for(path);

        self.retry
            .run(|attempt| {
                let request = self.http.get(&url);
                let url = url.clone();
                async move {
                    tracing::debug!("GET {url} (attempt {attempt})");
                    let response = request.send().await?;
                    let status = response.status();

                    if let Some(error) = classify_failure(status) {
                        return Err(error);
                    }

                    let content_type = response
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("application/octet-stream")
                        .to_owned();
                    let body = response.bytes().await?.to_vec();

                    Ok(RawResponse { body, content_type })
                }
            })
            .await
    }

    async fn request_envelope(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> Result<Envelope, Error> {
        let url = self.url_for(path);

        self.retry
            .run(|attempt| {
                let mut request = self.http.request(method.clone(), &url);

                if let Some(json) = &body {
                    request = request
                        .header(CONTENT_TYPE, "application/json")
                        .body(json.clone());
                }

                let method = method.clone();
                let url = url.clone();
                async move {
                    tracing::debug!("{method} {url} (attempt {attempt})");
                    let response = request.send().await?;
                    parse_envelope(response).await
                }
            })
            .await
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Map a failure status onto the error taxonomy: 5xx and 429 are
/// transient, any other non-2xx is terminal. Returns `None` for 2xx.
fn classify_failure(status: StatusCode) -> Option<Error> {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Some(Error::BackendUnavailable(format!("HTTP {status}")))
    } else if !status.is_success() {
        Some(Error::BackendRejected {
            status: status.as_u16(),
            message: status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_owned(),
        })
    } else {
        None
    }
}

async fn parse_envelope(response: reqwest::Response) -> Result<Envelope, Error> {
    let status = response.status();

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(Error::BackendUnavailable(format!("HTTP {status}")));
    }

    let bytes = response.bytes().await?;

    if !status.is_success() {
        // Failure envelopes still carry a useful message when the engine
        // produced them itself.
        let message = serde_json::from_slice::<Envelope>(&bytes)
            .ok()
            .and_then(|envelope| envelope.message)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_owned()
            });

        return Err(Error::BackendRejected {
            status: status.as_u16(),
            message,
        });
    }

    let envelope: Envelope = serde_json::from_slice(&bytes)
        .map_err(|error| Error::InvalidEnvelope(error.to_string()))?;

    if !envelope.is_success() {
        return Err(Error::BackendRejected {
            status: status.as_u16(),
            message: envelope
                .message
                .clone()
                .unwrap_or_else(|| "the tax engine reported a failure".to_owned()),
        });
    }

    Ok(envelope)
}

#[cfg(test)]
mod client_tests {
    use std::{
        net::SocketAddr,
        sync::{
            Arc,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };

    use axum::{
        Json, Router,
        extract::State,
        http::StatusCode,
        response::IntoResponse,
        routing::{get, post},
    };
    use serde_json::json;

    use crate::Error;

    use super::{BackendClient, Envelope, RetryPolicy};

    /// Serve `router` on a loopback port and return its address.
    async fn spawn_backend(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Could not bind test listener");
        let address = listener.local_addr().expect("Could not get local address");

        tokio::spawn(async move {
            axum::serve(listener, router)
                .await
                .expect("Test backend stopped unexpectedly");
        });

        address
    }

    fn fast_client(address: SocketAddr, max_attempts: u32) -> BackendClient {
        BackendClient::new(
            &format!("http://{address}"),
            Duration::from_secs(2),
            RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(8),
            },
        )
        .expect("Could not build client")
    }

    #[tokio::test]
    async fn parses_success_envelope() {
        let router = Router::new().route(
            "/health",
            get(|| async { Json(json!({"ok": true, "version": "v8"})) }),
        );
        let address = spawn_backend(router).await;
        let client = fast_client(address, 1);

        let envelope = client.get("/health").await.expect("Expected success");

        assert!(envelope.is_success());
        assert_eq!(envelope.extra.get("version"), Some(&json!("v8")));
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let hits = Arc::new(AtomicU32::new(0));
        let hits_in_handler = hits.clone();
        let router = Router::new().route(
            "/entries/direct",
            post(
                |State(hits): State<Arc<AtomicU32>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    } else {
                        Json(json!({"success": true, "data": {"id": 42}})).into_response()
                    }
                },
            ),
        )
        .with_state(hits_in_handler);
        let address = spawn_backend(router).await;
        let client = fast_client(address, 3);

        let envelope = client
            .post("/entries/direct", &json!({"vendor": "Acme"}))
            .await
            .expect("Expected success on the third attempt");

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(
            envelope.decode_payload::<serde_json::Value>().unwrap()["id"],
            json!(42)
        );
    }

    #[tokio::test]
    async fn client_errors_are_terminal() {
        let hits = Arc::new(AtomicU32::new(0));
        let hits_in_handler = hits.clone();
        let router = Router::new().route(
            "/entries/direct",
            post(|State(hits): State<Arc<AtomicU32>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"success": false, "message": "amount must be positive"})),
                )
            }),
        )
        .with_state(hits_in_handler);
        let address = spawn_backend(router).await;
        let client = fast_client(address, 3);

        let result = client
            .post("/entries/direct", &json!({"amount": -1}))
            .await;

        assert_eq!(
            result,
            Err(Error::BackendRejected {
                status: 400,
                message: "amount must be positive".to_owned()
            })
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1, "client errors must not retry");
    }

    #[tokio::test]
    async fn false_envelope_flag_is_terminal() {
        let router = Router::new().route(
            "/prep/refresh",
            get(|| async { Json(json!({"ok": false, "message": "no template"})) }),
        );
        let address = spawn_backend(router).await;
        let client = fast_client(address, 3);

        let result = client.get("/prep/refresh").await;

        assert_eq!(
            result,
            Err(Error::BackendRejected {
                status: 200,
                message: "no template".to_owned()
            })
        );
    }

    #[tokio::test]
    async fn unreachable_backend_surfaces_transient_error() {
        // Bind a listener to reserve a port, then drop it so nothing is
        // listening when the client connects.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let client = fast_client(address, 2);

        let result = client.get("/health").await;

        match result {
            Err(error) => assert!(error.is_transient(), "want transient error, got {error}"),
            Ok(_) => panic!("expected the call to fail"),
        }
    }

    #[test]
    fn decode_extra_reads_flat_payload() {
        #[derive(serde::Deserialize)]
        struct Estimate {
            sales_vat: f64,
        }

        let envelope: Envelope = serde_json::from_value(json!({
            "ok": true,
            "period": "2025-09",
            "sales_vat": 40000.0,
        }))
        .unwrap();

        let estimate: Estimate = envelope.decode_extra().unwrap();

        assert_eq!(estimate.sales_vat, 40000.0);
    }
}
