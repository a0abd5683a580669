//! REST client that replays queued writes against the school records backend.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use tokio::time::sleep;

use marksync_core::sync::HttpMethod;
use marksync_core::transport::{ResponseBody, Transport, TransportError, TransportResponse};

use crate::error::{HttpTransportError, Result, RetryClass};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
const MAX_LOG_BODY_CHARS: usize = 512;
const BASE_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_MS: u64 = 5_000;

/// The server did not take the request; safe to send it again.
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 503)
}

fn backoff_with_jitter(attempt: usize) -> Duration {
    let exp = (attempt.saturating_sub(1) as u32).min(8);
    let backoff = BASE_BACKOFF_MS
        .saturating_mul(1_u64 << exp)
        .min(MAX_BACKOFF_MS);
    let jitter = rand::thread_rng().gen_range(0..=(backoff / 5).max(1));
    Duration::from_millis(backoff.saturating_add(jitter))
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

/// [`Transport`] over HTTP with a per-request timeout. Failed connects and
/// 429/503 responses are retried with backoff; timeouts are not.
#[derive(Debug, Clone)]
pub struct RestTransport {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    max_attempts: usize,
}

impl RestTransport {
    /// `base_url` is the backend root, e.g. `http://localhost:8000`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Absolute endpoints are used as-is; anything else is joined to the base URL.
    pub fn resolve_url(&self, endpoint: &str) -> String {
        let endpoint = endpoint.trim();
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = &self.token {
            let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| HttpTransportError::invalid_request("Invalid API token format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }
        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[OfflineSync] Backend response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[OfflineSync] Backend response error ({}): {}", status, preview);
    }

    /// Any body that is not a JSON object leaves `json` empty.
    fn parse_response(status: reqwest::StatusCode, body: &str) -> TransportResponse {
        TransportResponse {
            ok: status.is_success(),
            status_code: status.as_u16(),
            json: serde_json::from_str::<ResponseBody>(body).ok(),
        }
    }

    async fn send_once(
        &self,
        url: &str,
        method: HttpMethod,
        body: &[u8],
    ) -> Result<TransportResponse> {
        let response = self
            .client
            .request(to_reqwest_method(method), url)
            .headers(self.headers()?)
            .body(body.to_vec())
            .send()
            .await?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| HttpTransportError::InvalidResponse(e.to_string()))?;
        Self::log_response(status, &text);
        Ok(Self::parse_response(status, &text))
    }

    async fn send_with_retry(
        &self,
        endpoint: &str,
        method: HttpMethod,
        payload: &serde_json::Value,
    ) -> Result<TransportResponse> {
        let url = self.resolve_url(endpoint);
        let body = serde_json::to_vec(payload)?;
        let mut attempt = 0usize;

        loop {
            attempt = attempt.saturating_add(1);
            match self.send_once(&url, method, &body).await {
                Ok(response)
                    if is_retryable_status(response.status_code)
                        && attempt < self.max_attempts =>
                {
                    let backoff = backoff_with_jitter(attempt);
                    debug!(
                        "[OfflineSync] {} {} retry attempt {}/{} after HTTP {}",
                        method,
                        url,
                        attempt + 1,
                        self.max_attempts,
                        response.status_code
                    );
                    sleep(backoff).await;
                }
                Ok(response) => return Ok(response),
                Err(err)
                    if err.retry_class() == RetryClass::Retryable
                        && attempt < self.max_attempts =>
                {
                    let backoff = backoff_with_jitter(attempt);
                    debug!(
                        "[OfflineSync] {} {} retry attempt {}/{} after transport error: {}",
                        method,
                        url,
                        attempt + 1,
                        self.max_attempts,
                        err
                    );
                    sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl Transport for RestTransport {
    async fn send(
        &self,
        endpoint: &str,
        method: HttpMethod,
        body: &serde_json::Value,
    ) -> std::result::Result<TransportResponse, TransportError> {
        self.send_with_retry(endpoint, method, body)
            .await
            .map_err(TransportError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        request_line: String,
        authorization: Option<String>,
        body: String,
    }

    #[derive(Debug, Clone)]
    enum MockOutcome {
        DropConnection,
        /// Reads the request, then holds the connection without answering.
        Stall(Duration),
        Respond { status: u16, body: String },
    }

    fn respond(status: u16, body: &str) -> MockOutcome {
        MockOutcome::Respond {
            status,
            body: body.to_string(),
        }
    }

    async fn read_request(stream: &mut TcpStream) -> Option<CapturedRequest> {
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 2048];
        let header_end = loop {
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if let Some(end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                break end;
            }
        };

        let head = String::from_utf8_lossy(&buffer[..header_end]).into_owned();
        let mut lines = head.lines();
        let request_line = lines.next()?.to_string();
        let mut authorization = None;
        let mut content_length = 0usize;
        for (name, value) in lines.filter_map(|line| line.split_once(':')) {
            match name.trim().to_ascii_lowercase().as_str() {
                "authorization" => authorization = Some(value.trim().to_string()),
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                _ => {}
            }
        }

        let mut body = buffer.split_off(header_end + 4);
        while body.len() < content_length {
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }

        Some(CapturedRequest {
            request_line,
            authorization,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    async fn start_mock_server(
        outcomes: Vec<MockOutcome>,
    ) -> (
        String,
        Arc<TokioMutex<Vec<CapturedRequest>>>,
        tokio::task::JoinHandle<()>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let captured = Arc::new(TokioMutex::new(Vec::<CapturedRequest>::new()));
        let scripted = Arc::new(TokioMutex::new(VecDeque::from(outcomes)));
        let captured_clone = Arc::clone(&captured);

        let handle = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let captured = Arc::clone(&captured_clone);
                let scripted = Arc::clone(&scripted);
                tokio::spawn(async move {
                    let Some(request) = read_request(&mut stream).await else {
                        return;
                    };
                    captured.lock().await.push(request);

                    let outcome = scripted.lock().await.pop_front().unwrap_or_else(|| {
                        respond(500, r#"{"status":"error","message":"unexpected request"}"#)
                    });
                    match outcome {
                        MockOutcome::DropConnection => {}
                        MockOutcome::Stall(hold) => sleep(hold).await,
                        MockOutcome::Respond { status, body } => {
                            let response = format!(
                                "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                                status,
                                body.len(),
                                body
                            );
                            let _ = stream.write_all(response.as_bytes()).await;
                        }
                    }
                });
            }
        });

        (format!("http://{}", addr), captured, handle)
    }

    fn transport(base_url: &str) -> RestTransport {
        RestTransport::new(base_url, Duration::from_secs(5)).expect("build transport")
    }

    #[tokio::test]
    async fn confirmed_write_is_a_success() {
        let (base_url, captured, server) =
            start_mock_server(vec![respond(200, r#"{"status":"success","message":"saved"}"#)]).await;

        let client = transport(&base_url).with_token(Some("secret".to_string()));
        let response = client
            .send(
                "/api/marks/update",
                HttpMethod::Put,
                &serde_json::json!({ "studentId": 9, "score": 88 }),
            )
            .await
            .expect("send");

        assert!(response.is_success());
        let requests = captured.lock().await.clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].request_line, "PUT /api/marks/update HTTP/1.1");
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer secret"));
        let body: serde_json::Value = serde_json::from_str(&requests[0].body).expect("json body");
        assert_eq!(body["score"], 88);

        server.abort();
    }

    #[tokio::test]
    async fn server_errors_come_back_as_responses_without_retry() {
        let (base_url, captured, server) = start_mock_server(vec![respond(
            500,
            r#"{"status":"error","message":"Term is locked"}"#,
        )])
        .await;

        let response = transport(&base_url)
            .send("marks", HttpMethod::Post, &serde_json::json!({}))
            .await
            .expect("a response, not an error");

        assert!(!response.ok);
        assert_eq!(response.failure_message(), "HTTP 500: Term is locked");
        assert_eq!(captured.lock().await.len(), 1);

        server.abort();
    }

    #[tokio::test]
    async fn unavailable_backend_is_retried() {
        let (base_url, captured, server) = start_mock_server(vec![
            respond(503, "maintenance"),
            respond(200, r#"{"status":"success"}"#),
        ])
        .await;

        let response = transport(&base_url)
            .send("/remarks", HttpMethod::Post, &serde_json::json!({ "remark": "ok" }))
            .await
            .expect("send");

        assert!(response.is_success());
        assert_eq!(captured.lock().await.len(), 2);

        server.abort();
    }

    #[tokio::test]
    async fn non_json_success_is_not_a_confirmation() {
        let (base_url, _captured, server) =
            start_mock_server(vec![respond(200, "<html>proxy login</html>")]).await;

        let response = transport(&base_url)
            .send("/attendance", HttpMethod::Patch, &serde_json::json!({}))
            .await
            .expect("send");

        assert!(response.ok);
        assert!(response.json.is_none());
        assert!(!response.is_success());
        assert_eq!(response.failure_message(), "Server did not confirm the change");

        server.abort();
    }

    #[tokio::test]
    async fn dropped_connection_without_response_is_not_retried() {
        let (base_url, captured, server) = start_mock_server(vec![
            MockOutcome::DropConnection,
            respond(200, r#"{"status":"success"}"#),
        ])
        .await;

        let err = transport(&base_url)
            .send("/marks", HttpMethod::Post, &serde_json::json!({}))
            .await
            .expect_err("connection closed before a response");

        assert!(matches!(err, TransportError::Network(_)));
        assert_eq!(captured.lock().await.len(), 1);

        server.abort();
    }

    #[tokio::test]
    async fn timed_out_write_is_sent_only_once() {
        let hold = Duration::from_secs(2);
        let (base_url, captured, server) = start_mock_server(vec![
            MockOutcome::Stall(hold),
            MockOutcome::Stall(hold),
            MockOutcome::Stall(hold),
        ])
        .await;

        let err = RestTransport::new(&base_url, Duration::from_millis(150))
            .expect("build transport")
            .with_max_attempts(3)
            .send("/marks", HttpMethod::Post, &serde_json::json!({ "score": 71 }))
            .await
            .expect_err("backend never answers");

        assert!(matches!(err, TransportError::Timeout));
        assert_eq!(captured.lock().await.len(), 1);

        server.abort();
    }

    #[tokio::test]
    async fn refused_connections_exhaust_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let err = transport(&format!("http://{}", addr))
            .with_max_attempts(2)
            .send("/marks", HttpMethod::Post, &serde_json::json!({}))
            .await
            .expect_err("nothing is listening");

        assert!(matches!(err, TransportError::Network(_)));
    }

    #[test]
    fn endpoints_resolve_against_the_base_url() {
        let client = transport("http://school.local/");
        assert_eq!(client.resolve_url("/api/marks"), "http://school.local/api/marks");
        assert_eq!(client.resolve_url("api/marks"), "http://school.local/api/marks");
        assert_eq!(
            client.resolve_url("https://other.host/x"),
            "https://other.host/x"
        );
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let first = backoff_with_jitter(1);
        assert!(first >= Duration::from_millis(BASE_BACKOFF_MS));
        assert!(first <= Duration::from_millis(BASE_BACKOFF_MS + BASE_BACKOFF_MS / 5));

        let late = backoff_with_jitter(20);
        assert!(late >= Duration::from_millis(MAX_BACKOFF_MS));
        assert!(late <= Duration::from_millis(MAX_BACKOFF_MS + MAX_BACKOFF_MS / 5));
    }
}
