//! Completion client: single-shot and streamed chat completions.
//! The backend is an external collaborator; `Completion` is the seam the
//! render pipeline talks to.

pub mod openai;
pub mod sse;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};

pub use openai::ChatCompletionClient;

/// Lazy, finite, non-restartable sequence of text fragments.
pub type CompletionStream = BoxStream<'static, String>;

#[async_trait]
pub trait Completion: Send + Sync {
    /// Full response text. Missing or rejected API keys come back as
    /// user-facing sentinel text, not as errors.
    async fn complete(&self, prompt: &str, model: Option<&str>) -> Result<String, CompletionError>;

    /// Incremental response. Missing or rejected API keys yield a single
    /// sentinel fragment.
    async fn complete_stream(
        &self,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<CompletionStream, CompletionError>;
}

#[derive(Debug)]
pub enum CompletionError {
    /// Non-success status other than 401.
    Http { status: u16, body: String },
    Transport(String),
    Decode(String),
}

impl std::fmt::Display for CompletionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionError::Http { status, body } => {
                write!(f, "HTTP error {status}: {body}")
            }
            CompletionError::Transport(msg) => write!(f, "transport error: {msg}"),
            CompletionError::Decode(msg) => write!(f, "response decode error: {msg}"),
        }
    }
}

impl std::error::Error for CompletionError {}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CompletionError::Decode(e.to_string())
        } else {
            CompletionError::Transport(e.to_string())
        }
    }
}

/// A stream that yields one fragment and ends.
pub fn sentinel_stream(text: impl Into<String>) -> CompletionStream {
    stream::iter([text.into()]).boxed()
}

/// Drain a streamed completion into one string.
pub async fn complete_collected(
    client: &dyn Completion,
    prompt: &str,
    model: Option<&str>,
) -> Result<String, CompletionError> {
    let stream = client.complete_stream(prompt, model).await?;
    Ok(stream.collect::<Vec<_>>().await.concat())
}
