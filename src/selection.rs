//! Selection capture: debounced, last-write-wins.
//! Each trigger cancels the pending timer; only the final selection of a
//! burst reaches the pipeline, and only if it is still there when the
//! timer fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dom::{NodeId, Rect, TextRange};
use crate::settings;
use crate::storage::KeyValueStore;

/// A non-empty text selection as the host reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionEvent {
    pub text: String,
    pub range: TextRange,
    /// Bounding box of the range; the overlay anchors at its bottom-left.
    pub rect: Rect,
}

impl SelectionEvent {
    pub fn start_container(&self) -> NodeId {
        self.range.container
    }
}

/// Host access to the live page selection.
pub trait SelectionSource: Send + Sync {
    fn current(&self) -> Option<SelectionEvent>;
    /// Whether the range still points at live text (not removed or rewritten).
    fn is_range_valid(&self, range: &TextRange) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    MouseUp,
    Shortcut,
}

pub struct SelectionCapture {
    source: Arc<dyn SelectionSource>,
    tx: mpsc::Sender<SelectionEvent>,
    mouseup_delay: Duration,
    shortcut_delay: Duration,
    shortcut_key: String,
    pending: Mutex<Option<CancellationToken>>,
    enabled: AtomicBool,
}

impl SelectionCapture {
    pub fn new(config: &Config, source: Arc<dyn SelectionSource>, tx: mpsc::Sender<SelectionEvent>) -> Self {
        Self {
            source,
            tx,
            mouseup_delay: config.mouseup_delay(),
            shortcut_delay: config.shortcut_delay(),
            shortcut_key: config.shortcut_key.clone(),
            pending: Mutex::new(None),
            enabled: AtomicBool::new(true),
        }
    }

    fn delay(&self, trigger: Trigger) -> Duration {
        match trigger {
            Trigger::MouseUp => self.mouseup_delay,
            Trigger::Shortcut => self.shortcut_delay,
        }
    }

    /// Arm the debounce timer for the current selection.
    /// Returns false when there is nothing selected or capture is disabled.
    pub fn trigger(self: &Arc<Self>, trigger: Trigger) -> bool {
        if !self.enabled.load(Ordering::Relaxed) {
            return false;
        }
        match self.source.current() {
            Some(selection) if !selection.text.trim().is_empty() => {}
            _ => return false,
        }

        let token = CancellationToken::new();
        if let Some(previous) = self.pending.lock().replace(token.clone()) {
            previous.cancel();
        }

        let delay = self.delay(trigger);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(?trigger, "selection superseded");
                }
                _ = tokio::time::sleep(delay) => {
                    this.fire(trigger).await;
                }
            }
        });
        true
    }

    async fn fire(&self, trigger: Trigger) {
        let Some(selection) = self.source.current() else {
            debug!(?trigger, "selection cleared before debounce fired");
            return;
        };
        if selection.text.trim().is_empty() || !self.source.is_range_valid(&selection.range) {
            debug!(?trigger, "selection no longer valid, dropped");
            return;
        }
        debug!(?trigger, chars = selection.text.chars().count(), "selection emitted");
        if self.tx.send(selection).await.is_err() {
            warn!("selection channel closed");
        }
    }

    pub fn should_handle_key(&self, key: &str) -> bool {
        key.eq_ignore_ascii_case(&self.shortcut_key)
    }

    /// Keyboard entry point: arms the shortcut debounce for the configured key.
    pub fn handle_key(self: &Arc<Self>, key: &str) -> bool {
        self.should_handle_key(key) && self.trigger(Trigger::Shortcut)
    }

    pub fn cancel_pending(&self) {
        if let Some(token) = self.pending.lock().take() {
            token.cancel();
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.cancel_pending();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enable or disable capture for the page according to the stored blacklist.
    /// A storage failure leaves capture enabled.
    pub fn enabled_for(&self, store: &dyn KeyValueStore, page_url: &str) -> bool {
        let blocked = match settings::is_blocked(store, page_url) {
            Ok(blocked) => blocked,
            Err(e) => {
                warn!(error = %e, "blacklist check failed, capture stays enabled");
                false
            }
        };
        if blocked {
            info!(page_url, "host is blacklisted, selection capture disabled");
        }
        self.set_enabled(!blocked);
        !blocked
    }
}
