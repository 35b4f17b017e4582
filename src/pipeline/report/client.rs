use std::time::{Duration, Instant};

use super::chat_types::{ChatMessage, ChatRequest, ChatResponse};
use crate::config::{ConfigError, ReportClientConfig};
use crate::pipeline::extraction::truncate_chars;
use crate::pipeline::types::{ErrorKind, ReportOutcome, ReportRequest, TokenUsage};

/// Longest error body kept in `UnexpectedStatus`.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Report generation abstraction (allows mocking the remote service).
pub trait ReportGenerator: Send + Sync {
    /// Exactly one attempt. Never retries.
    fn generate(&self, request: &ReportRequest) -> ReportOutcome;
}

// ═══════════════════════════════════════════════════════════
// ReportClient
// ═══════════════════════════════════════════════════════════

/// HTTP client for the remote chat completions endpoint.
pub struct ReportClient {
    config: ReportClientConfig,
    client: reqwest::blocking::Client,
}

impl ReportClient {
    pub fn new(config: ReportClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ReportClientConfig {
        &self.config
    }

    /// One chat completion call with arbitrary messages. Shared by report
    /// generation and the vision adapter.
    pub fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
        top_p: f32,
    ) -> ReportOutcome {
        let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
            tracing::warn!("No API key configured, skipping report service call");
            return ReportOutcome::failed(ErrorKind::MissingCredential);
        };

        let body = ChatRequest {
            model,
            messages,
            temperature,
            max_tokens,
            top_p,
        };

        let start = Instant::now();
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.app_title)
            .json(&body)
            .send();

        let response = match response {
            Ok(r) => r,
            Err(e) => return ReportOutcome::failed(self.transport_error(&e)),
        };

        let status = response.status().as_u16();
        let text = match response.text() {
            Ok(t) => t,
            Err(e) => return ReportOutcome::failed(self.transport_error(&e)),
        };

        let outcome = interpret_response(status, &text);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome.error {
            None => tracing::info!(
                status,
                elapsed_ms,
                prompt_tokens = outcome.usage.map(|u| u.prompt_tokens),
                completion_tokens = outcome.usage.map(|u| u.completion_tokens),
                "Report service responded"
            ),
            Some(error) => tracing::warn!(status, elapsed_ms, error = %error, "Report service call failed"),
        }
        outcome
    }

    fn transport_error(&self, e: &reqwest::Error) -> ErrorKind {
        if e.is_timeout() {
            tracing::warn!(timeout_secs = self.config.timeout_secs, "Report service timed out");
            ErrorKind::Timeout {
                seconds: self.config.timeout_secs,
            }
        } else {
            tracing::warn!(connect = e.is_connect(), error = %e, "Report service unreachable");
            ErrorKind::Transport {
                message: e.to_string(),
            }
        }
    }
}

impl ReportGenerator for ReportClient {
    fn generate(&self, request: &ReportRequest) -> ReportOutcome {
        let span = tracing::info_span!("report_generate", model = %self.config.model);
        let _guard = span.enter();

        let messages = [
            ChatMessage::system(request.system_prompt.clone()),
            ChatMessage::user(request.user_prompt.clone()),
        ];
        self.chat(
            &self.config.model,
            &messages,
            request.max_tokens,
            request.temperature,
            request.top_p,
        )
    }
}

/// Map an HTTP status and body onto an outcome.
///
/// 401 is always `AuthFailure`, 429 `RateLimited`, 500 `UpstreamError`,
/// whatever the body says.
pub fn interpret_response(status: u16, body: &str) -> ReportOutcome {
    match status {
        200 => match serde_json::from_str::<ChatResponse>(body) {
            Ok(parsed) => {
                let usage: Option<TokenUsage> = parsed.usage;
                match parsed.choices.into_iter().next() {
                    Some(choice) => {
                        ReportOutcome::succeeded(choice.message.content.unwrap_or_default(), usage)
                    }
                    None => ReportOutcome::failed(ErrorKind::UnexpectedStatus {
                        code: 200,
                        body: "response contained no choices".into(),
                    }),
                }
            }
            Err(e) => ReportOutcome::failed(ErrorKind::UnexpectedStatus {
                code: 200,
                body: format!("unreadable response body: {e}"),
            }),
        },
        401 => ReportOutcome::failed(ErrorKind::AuthFailure),
        429 => ReportOutcome::failed(ErrorKind::RateLimited),
        500 => ReportOutcome::failed(ErrorKind::UpstreamError),
        code => ReportOutcome::failed(ErrorKind::UnexpectedStatus {
            code,
            body: truncate_chars(body.trim(), MAX_ERROR_BODY_CHARS).to_string(),
        }),
    }
}

// ──────────────────────────────────────────────
// MockReportGenerator (testing)
// ──────────────────────────────────────────────

/// Mock generator returning a fixed outcome and recording what it was asked.
pub struct MockReportGenerator {
    outcome: ReportOutcome,
    calls: std::sync::Mutex<Vec<ReportRequest>>,
}

impl MockReportGenerator {
    pub fn new(content: &str) -> Self {
        Self::with_outcome(ReportOutcome::succeeded(
            content.to_string(),
            Some(TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            }),
        ))
    }

    pub fn failing(error: ErrorKind) -> Self {
        Self::with_outcome(ReportOutcome::failed(error))
    }

    pub fn with_outcome(outcome: ReportOutcome) -> Self {
        Self {
            outcome,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ReportRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl ReportGenerator for MockReportGenerator {
    fn generate(&self, request: &ReportRequest) -> ReportOutcome {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        self.outcome.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    const OK_BODY: &str = r###"{
        "id": "gen-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "## Находки\nСинусовый ритм."}}],
        "usage": {"prompt_tokens": 812, "completion_tokens": 240, "total_tokens": 1052}
    }"###;

    /// What the stub server saw.
    pub(crate) struct Captured {
        pub headers: Vec<String>,
        pub body: String,
    }

    /// Serve one request on a loopback port with a canned reply.
    /// `None` accepts the connection and never answers.
    pub(crate) fn stub_server(reply: Option<(u16, &'static str)>) -> (String, thread::JoinHandle<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/api/v1/chat/completions", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut headers = Vec::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                if line.is_empty() {
                    break;
                }
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
                headers.push(line);
            }
            let mut body = vec![0u8; content_length];
            let _ = reader.read_exact(&mut body);

            let mut stream = stream;
            match reply {
                Some((status, payload)) => {
                    let response = format!(
                        "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                        payload.len()
                    );
                    let _ = stream.write_all(response.as_bytes());
                    let _ = stream.flush();
                }
                None => thread::sleep(Duration::from_secs(3)),
            }
            Captured {
                headers,
                body: String::from_utf8_lossy(&body).into_owned(),
            }
        });
        (url, handle)
    }

    fn client_for(url: &str, api_key: Option<&str>, timeout_secs: u64) -> ReportClient {
        ReportClient::new(ReportClientConfig {
            api_key: api_key.map(str::to_string),
            endpoint: url.to_string(),
            timeout_secs,
            ..Default::default()
        })
        .unwrap()
    }

    fn request() -> ReportRequest {
        ReportRequest {
            system_prompt: "persona".into(),
            user_prompt: "task".into(),
            max_tokens: 1400,
            temperature: 0.1,
            top_p: 1.0,
        }
    }

    // ── interpret_response ──

    #[test]
    fn ok_response_yields_first_choice_exactly() {
        let outcome = interpret_response(200, OK_BODY);
        assert!(outcome.success);
        assert_eq!(outcome.content.as_deref(), Some("## Находки\nСинусовый ритм."));
        assert_eq!(outcome.usage.unwrap().total_tokens, 1052);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn unauthorized_is_auth_failure_regardless_of_body() {
        for body in ["", "{}", OK_BODY, "<html>nope</html>"] {
            let outcome = interpret_response(401, body);
            assert!(!outcome.success);
            assert_eq!(outcome.error, Some(ErrorKind::AuthFailure));
            assert!(outcome.content.is_none());
        }
    }

    #[test]
    fn rate_limit_and_server_error() {
        assert_eq!(interpret_response(429, "slow down").error, Some(ErrorKind::RateLimited));
        assert_eq!(interpret_response(500, "boom").error, Some(ErrorKind::UpstreamError));
    }

    #[test]
    fn other_status_keeps_code_and_body() {
        let outcome = interpret_response(503, " maintenance ");
        assert_eq!(
            outcome.error,
            Some(ErrorKind::UnexpectedStatus {
                code: 503,
                body: "maintenance".into()
            })
        );
    }

    #[test]
    fn long_error_body_is_capped() {
        let body = "x".repeat(10_000);
        match interpret_response(400, &body).error {
            Some(ErrorKind::UnexpectedStatus { body, .. }) => assert_eq!(body.len(), MAX_ERROR_BODY_CHARS),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn malformed_ok_body_is_not_success() {
        let outcome = interpret_response(200, "not json");
        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(ErrorKind::UnexpectedStatus { code: 200, .. })));

        let outcome = interpret_response(200, r#"{"choices": []}"#);
        assert!(!outcome.success);
    }

    // ── ReportClient over loopback ──

    #[test]
    fn missing_credential_fails_before_network() {
        // Port 9 (discard) on loopback is never contacted.
        let client = client_for("http://127.0.0.1:9/v1/chat/completions", None, 60);
        let outcome = client.generate(&request());
        assert_eq!(outcome.error, Some(ErrorKind::MissingCredential));

        let client = client_for("http://127.0.0.1:9/v1/chat/completions", Some("  "), 60);
        assert_eq!(client.generate(&request()).error, Some(ErrorKind::MissingCredential));
    }

    #[test]
    fn successful_call_sends_headers_and_body() {
        let (url, handle) = stub_server(Some((200, OK_BODY)));
        let outcome = client_for(&url, Some("sk-test"), 10).generate(&request());
        let captured = handle.join().unwrap();

        assert!(outcome.success, "{outcome:?}");
        assert_eq!(outcome.content.as_deref(), Some("## Находки\nСинусовый ритм."));

        let headers = captured.headers.join("\n").to_ascii_lowercase();
        assert!(headers.contains("authorization: bearer sk-test"));
        assert!(headers.contains("http-referer: https://medassistant-cld.local"));
        assert!(headers.contains("x-title: medassistant"));

        let body: serde_json::Value = serde_json::from_str(&captured.body).unwrap();
        assert_eq!(body["model"], "anthropic/claude-3-sonnet-20240229");
        assert_eq!(body["max_tokens"], 1400);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "task");
    }

    #[test]
    fn status_codes_over_the_wire() {
        for (status, expected) in [
            (401, ErrorKind::AuthFailure),
            (429, ErrorKind::RateLimited),
            (500, ErrorKind::UpstreamError),
        ] {
            let (url, handle) = stub_server(Some((status, "{\"error\":\"x\"}")));
            let outcome = client_for(&url, Some("sk-test"), 10).generate(&request());
            handle.join().unwrap();
            assert!(!outcome.success);
            assert_eq!(outcome.error, Some(expected));
        }
    }

    #[test]
    fn stalled_server_times_out() {
        let (url, handle) = stub_server(None);
        let outcome = client_for(&url, Some("sk-test"), 1).generate(&request());
        assert_eq!(outcome.error, Some(ErrorKind::Timeout { seconds: 1 }));
        handle.join().unwrap();
    }

    #[test]
    fn refused_connection_is_transport_error() {
        // Bind then drop to get a port nothing listens on.
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}/v1/chat/completions");
        let outcome = client_for(&url, Some("sk-test"), 5).generate(&request());
        assert!(matches!(outcome.error, Some(ErrorKind::Transport { .. })));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = ReportClient::new(ReportClientConfig {
            endpoint: "not-a-url".into(),
            ..Default::default()
        });
        assert!(matches!(result, Err(ConfigError::InvalidEndpoint(_))));
    }

    // ── Mock ──

    #[test]
    fn mock_records_requests() {
        let mock = MockReportGenerator::new("ok");
        let outcome = mock.generate(&request());
        assert!(outcome.success);
        assert_eq!(mock.calls().len(), 1);
        assert_eq!(mock.calls()[0].user_prompt, "task");
    }
}
