//! OpenAI-compatible chat/completions client.
//! Connection pooling via reqwest, manual SSE decoding, API key read from the
//! storage collaborator on every call. No retries: a failed request surfaces
//! to the caller, who renders a failure message.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::sse::{SseDecoder, SseEvent};
use super::{sentinel_stream, Completion, CompletionError, CompletionStream};
use crate::config::Config;
use crate::storage::{self, KeyValueStore};

pub struct ChatCompletionClient {
    http: reqwest::Client,
    base_url: String,
    default_model: String,
    store: Arc<dyn KeyValueStore>,
    missing_key_message: String,
    invalid_key_message: String,
}

/// Outcome of sending a request once the key and status are checked.
enum Sent {
    Response(reqwest::Response),
    Sentinel(String),
}

impl ChatCompletionClient {
    pub fn new(config: &Config, store: Arc<dyn KeyValueStore>) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        info!(base_url = %config.api_base, model = %config.default_model, "completion client ready");

        Ok(Self {
            http,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            default_model: config.default_model.clone(),
            store,
            missing_key_message: config.messages.missing_key.clone(),
            invalid_key_message: config.messages.invalid_key.clone(),
        })
    }

    fn api_key(&self) -> Option<String> {
        match storage::api_key(self.store.as_ref()) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "API key lookup failed");
                None
            }
        }
    }

    async fn send(&self, prompt: &str, model: Option<&str>, stream: bool) -> Result<Sent, CompletionError> {
        let Some(api_key) = self.api_key() else {
            debug!("no API key configured, skipping request");
            return Ok(Sent::Sentinel(self.missing_key_message.clone()));
        };

        let body = ChatRequest {
            model: model.unwrap_or(&self.default_model),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream,
        };

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!("backend rejected the API key");
            return Ok(Sent::Sentinel(self.invalid_key_message.clone()));
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CompletionError::Http {
                status: status.as_u16(),
                body: body_text.chars().take(200).collect(),
            });
        }
        Ok(Sent::Response(response))
    }
}

#[async_trait]
impl Completion for ChatCompletionClient {
    async fn complete(&self, prompt: &str, model: Option<&str>) -> Result<String, CompletionError> {
        let response = match self.send(prompt, model, false).await? {
            Sent::Response(response) => response,
            Sent::Sentinel(text) => return Ok(text),
        };
        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CompletionError::Decode("response has no choices[0].message.content".into()))
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<CompletionStream, CompletionError> {
        let response = match self.send(prompt, model, true).await? {
            Sent::Response(response) => response,
            Sent::Sentinel(text) => return Ok(sentinel_stream(text)),
        };
        Ok(decode_body(response.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed()))
    }
}

struct DecodeState {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

/// Turn the raw body into a fragment stream. Ends on `[DONE]`, on transport
/// close, or on a transport error (logged).
fn decode_body(body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>) -> CompletionStream {
    let state = DecodeState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.pending.pop_front() {
                return Some((fragment, st));
            }
            if st.finished {
                return None;
            }
            let events = match st.body.next().await {
                Some(Ok(bytes)) => st.decoder.push(&bytes),
                Some(Err(e)) => {
                    warn!(error = %e, "completion stream interrupted");
                    st.finished = true;
                    Vec::new()
                }
                None => {
                    st.finished = true;
                    st.decoder.finish()
                }
            };
            for event in events {
                match event {
                    SseEvent::Delta(text) => st.pending.push_back(text),
                    SseEvent::Done => {
                        st.finished = true;
                        break;
                    }
                }
            }
        }
    })
    .boxed()
}

// --- Wire types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, API_KEY};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP/1.1 server answering every request with the same canned response.
    struct CannedServer {
        base_url: String,
        hits: Arc<AtomicUsize>,
        last_request: Arc<Mutex<String>>,
    }

    async fn serve(status: &'static str, content_type: &'static str, body: String) -> CannedServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let last_request = Arc::new(Mutex::new(String::new()));
        let (hits_c, last_c) = (Arc::clone(&hits), Arc::clone(&last_request));

        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { return };
                hits_c.fetch_add(1, Ordering::SeqCst);
                let request = read_request(&mut sock).await;
                *last_c.lock() = request;
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });

        CannedServer {
            base_url: format!("http://{addr}"),
            hits,
            last_request,
        }
    }

    async fn read_request(sock: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = sock.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn client(base_url: &str, key: Option<&str>) -> ChatCompletionClient {
        let store = Arc::new(MemoryStore::new());
        if let Some(key) = key {
            store.set(API_KEY, serde_json::json!(key)).unwrap();
        }
        let config = Config {
            api_base: base_url.to_string(),
            ..Config::default()
        };
        ChatCompletionClient::new(&config, store).unwrap()
    }

    #[tokio::test]
    async fn complete_returns_message_content() {
        let server = serve(
            "200 OK",
            "application/json",
            r#"{"choices":[{"message":{"role":"assistant","content":"你好"}}]}"#.into(),
        )
        .await;
        let client = client(&server.base_url, Some("sk-test"));

        let text = client.complete("hello", None).await.unwrap();
        assert_eq!(text, "你好");

        let request = server.last_request.lock().clone();
        assert!(request.starts_with("POST /v1/chat/completions"));
        assert!(request.to_lowercase().contains("authorization: bearer sk-test"));
        assert!(request.contains(r#""stream":false"#));
        assert!(request.contains(r#""model":"gpt-4-turbo""#));
    }

    #[tokio::test]
    async fn missing_key_returns_sentinel_without_request() {
        let server = serve("200 OK", "application/json", "{}".into()).await;
        let client = client(&server.base_url, None);

        let text = client.complete("hello", None).await.unwrap();
        assert_eq!(text, "please configure API key");

        let fragments: Vec<String> = client
            .complete_stream("hello", None)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(fragments, vec!["please configure API key".to_string()]);
        assert_eq!(server.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unauthorized_yields_invalid_key_sentinel() {
        let server = serve("401 Unauthorized", "application/json", "{}".into()).await;
        let client = client(&server.base_url, Some("bad-key"));

        assert_eq!(
            client.complete("hello", None).await.unwrap(),
            "API key format is invalid"
        );
        let fragments: Vec<String> = client
            .complete_stream("hello", None)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(fragments, vec!["API key format is invalid".to_string()]);
    }

    #[tokio::test]
    async fn other_failures_are_http_errors() {
        let server = serve("500 Internal Server Error", "text/plain", "overloaded".into()).await;
        let client = client(&server.base_url, Some("sk-test"));

        match client.complete("hello", None).await {
            Err(CompletionError::Http { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "overloaded");
            }
            other => panic!("expected HTTP error, got {other:?}"),
        }
        assert!(matches!(
            client.complete_stream("hello", None).await,
            Err(CompletionError::Http { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn stream_yields_fragments_in_order() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"B\"}}]}\n\n\
                    data: [DONE]\n\n";
        let server = serve("200 OK", "text/event-stream", body.into()).await;
        let client = client(&server.base_url, Some("sk-test"));

        let fragments: Vec<String> = client
            .complete_stream("hello", Some("gpt-4o"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(fragments, vec!["A".to_string(), "B".to_string()]);

        let request = server.last_request.lock().clone();
        assert!(request.contains(r#""stream":true"#));
        assert!(request.contains(r#""model":"gpt-4o""#));
    }

    #[tokio::test]
    async fn stream_survives_malformed_event_and_missing_done() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\
                    data: oops\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"y\"}}]}\n";
        let server = serve("200 OK", "text/event-stream", body.into()).await;
        let client = client(&server.base_url, Some("sk-test"));

        let fragments: Vec<String> = client
            .complete_stream("hello", None)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(fragments, vec!["x".to_string(), "y".to_string()]);
    }
}
