//! Text-to-speech for the play buttons.
//! Calls closer together than the minimum interval are ignored; a new
//! utterance interrupts the one still playing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::classify;
use crate::config::Config;

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceOptions {
    pub voice: String,
    pub lang: String,
    pub rate: f32,
}

#[derive(Debug)]
pub enum SpeechError {
    Unavailable(String),
    Synthesis(String),
}

impl std::fmt::Display for SpeechError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeechError::Unavailable(msg) => write!(f, "speech unavailable: {msg}"),
            SpeechError::Synthesis(msg) => write!(f, "speech synthesis failed: {msg}"),
        }
    }
}

impl std::error::Error for SpeechError {}

/// Host speech engine. `speak` resolves when playback ends.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn speak(&self, text: &str, options: &VoiceOptions) -> Result<(), SpeechError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    Finished,
    /// A newer utterance took over.
    Interrupted,
    /// Too soon after the previous call, or nothing to say.
    Ignored,
}

#[derive(Default)]
struct SpeakerState {
    last_started: Option<Instant>,
    playing: Option<CancellationToken>,
}

pub struct Speaker {
    synth: Arc<dyn SpeechSynthesizer>,
    rate: f32,
    min_interval: Duration,
    state: Mutex<SpeakerState>,
}

impl Speaker {
    pub fn new(config: &Config, synth: Arc<dyn SpeechSynthesizer>) -> Self {
        Self {
            synth,
            rate: config.speech_rate,
            min_interval: config.speech_min_interval(),
            state: Mutex::new(SpeakerState::default()),
        }
    }

    pub fn options_for(&self, text: &str) -> VoiceOptions {
        let voice = classify::voice_for(text);
        VoiceOptions {
            voice: voice.name.to_string(),
            lang: voice.lang.to_string(),
            rate: self.rate,
        }
    }

    pub async fn speak(&self, text: &str) -> Result<SpeechOutcome, SpeechError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SpeechOutcome::Ignored);
        }

        let token = {
            let mut state = self.state.lock();
            let now = Instant::now();
            if state
                .last_started
                .is_some_and(|last| now.duration_since(last) < self.min_interval)
            {
                debug!("speech request ignored, too soon after the previous one");
                return Ok(SpeechOutcome::Ignored);
            }
            state.last_started = Some(now);
            let token = CancellationToken::new();
            if let Some(previous) = state.playing.replace(token.clone()) {
                previous.cancel();
            }
            token
        };

        let options = self.options_for(text);
        info!(voice = %options.voice, chars = text.chars().count(), "speaking");

        tokio::select! {
            _ = token.cancelled() => Ok(SpeechOutcome::Interrupted),
            result = self.synth.speak(text, &options) => {
                result?;
                Ok(SpeechOutcome::Finished)
            }
        }
    }

    /// Interrupt whatever is playing.
    pub fn stop(&self) {
        if let Some(token) = self.state.lock().playing.take() {
            token.cancel();
        }
    }
}
