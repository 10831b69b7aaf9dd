//! comfy-trans: selection-to-popup translation for web pages.
//! Debounced selection capture, a classifier gate, a per-node translation
//! cache, streamed chat completions, and an overlay manager rendering into
//! the host page DOM.

pub mod cancellation;
pub mod classify;
pub mod completion;
pub mod config;
pub mod dom;
pub mod logging;
pub mod metrics;
pub mod overlay;
pub mod pipeline;
pub mod selection;
pub mod settings;
pub mod speech;
pub mod storage;
pub mod translate;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use completion::{ChatCompletionClient, Completion, CompletionError};
use config::Config;
use dom::{Dom, NodeId};
use metrics::{MetricSummary, MetricsRegistry};
use overlay::{ClickOutcome, OverlayManager};
use pipeline::RenderPipeline;
use selection::{SelectionCapture, SelectionSource, Trigger};
use settings::{BlockOutcome, SettingsError};
use speech::{Speaker, SpeechSynthesizer};
use storage::KeyValueStore;

const SELECTION_QUEUE: usize = 16;

/// Collaborators the host page provides.
#[derive(Clone)]
pub struct Host {
    pub dom: Arc<dyn Dom>,
    pub selection: Arc<dyn SelectionSource>,
    pub store: Arc<dyn KeyValueStore>,
    pub speech: Option<Arc<dyn SpeechSynthesizer>>,
}

/// One page's worth of wiring; dropped on navigation.
pub struct ContentScript {
    /// Host of the page this script was started on, when the URL has one.
    page_host: Option<String>,
    store: Arc<dyn KeyValueStore>,
    capture: Arc<SelectionCapture>,
    pipeline: Arc<RenderPipeline>,
    metrics: Arc<MetricsRegistry>,
}

impl ContentScript {
    /// Wire everything against the configured chat-completion endpoint.
    /// Must be called inside a tokio runtime.
    pub fn start(config: Config, host: Host, page_url: &str) -> Result<Self, CompletionError> {
        let client = ChatCompletionClient::new(&config, Arc::clone(&host.store))?;
        Ok(Self::start_with(config, host, Arc::new(client), page_url))
    }

    pub fn start_with(config: Config, host: Host, completion: Arc<dyn Completion>, page_url: &str) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let overlays = Arc::new(OverlayManager::new(Arc::clone(&host.dom)));
        let speaker = host
            .speech
            .map(|synth| Arc::new(Speaker::new(&config, synth)));

        let warm_page_context = config.page_context.enabled;
        let (tx, rx) = mpsc::channel(SELECTION_QUEUE);
        let capture = Arc::new(SelectionCapture::new(&config, host.selection, tx));
        capture.enabled_for(host.store.as_ref(), page_url);

        let pipeline = Arc::new(RenderPipeline::new(
            config,
            host.dom,
            completion,
            overlays,
            speaker,
            Arc::clone(&metrics),
        ));
        tokio::spawn(pipeline::run_selection_loop(rx, Arc::clone(&pipeline)));
        if warm_page_context {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.page_context().await });
        }

        info!(page_url, enabled = capture.is_enabled(), "content script started");
        Self {
            page_host: settings::host_of(page_url).ok(),
            store: host.store,
            capture,
            pipeline,
            metrics,
        }
    }

    pub fn on_mouse_up(&self) -> bool {
        self.capture.trigger(Trigger::MouseUp)
    }

    pub fn on_key_down(&self, key: &str) -> bool {
        self.capture.handle_key(key)
    }

    pub fn on_click(&self, target: NodeId) -> ClickOutcome {
        self.pipeline.handle_click(target)
    }

    pub async fn on_hover(&self, target: NodeId) -> bool {
        self.pipeline.on_underline_hover(target).await
    }

    pub async fn play(&self, text: &str) {
        self.pipeline.play(text).await;
    }

    pub fn save_api_key(&self, key: &str) -> Result<(), SettingsError> {
        settings::save_api_key(self.store.as_ref(), key)
    }

    /// Blacklist the host of `page_url`. Capture stops only when that is
    /// the host this script runs on.
    pub fn block_host(&self, page_url: &str) -> Result<BlockOutcome, SettingsError> {
        let outcome = settings::block_host(self.store.as_ref(), page_url)?;
        if self.page_host.as_deref() == Some(outcome.host()) {
            self.capture.set_enabled(false);
        }
        Ok(outcome)
    }

    pub fn overlays(&self) -> &Arc<OverlayManager> {
        self.pipeline.overlays()
    }

    pub fn metrics_summary(&self) -> HashMap<String, MetricSummary> {
        self.metrics.summary()
    }

    /// Wait for spawned enrichment work to settle.
    pub async fn idle(&self) {
        self.pipeline.idle().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::stream::{self, StreamExt};
    use parking_lot::Mutex;

    use super::*;
    use crate::completion::CompletionStream;
    use crate::dom::{MemoryDom, Rect, TextRange, TreeView, Viewport};
    use crate::selection::SelectionEvent;
    use crate::storage::MemoryStore;

    struct Echo;

    #[async_trait]
    impl Completion for Echo {
        async fn complete(&self, _: &str, _: Option<&str>) -> Result<String, CompletionError> {
            Ok("译文".into())
        }

        async fn complete_stream(&self, _: &str, _: Option<&str>) -> Result<CompletionStream, CompletionError> {
            Ok(stream::iter(vec!["说明".to_string()]).boxed())
        }
    }

    struct PageSelection {
        current: Mutex<Option<SelectionEvent>>,
    }

    impl SelectionSource for PageSelection {
        fn current(&self) -> Option<SelectionEvent> {
            self.current.lock().clone()
        }

        fn is_range_valid(&self, _: &TextRange) -> bool {
            true
        }
    }

    fn page(store: Arc<MemoryStore>) -> (Arc<MemoryDom>, ContentScript) {
        let dom = Arc::new(MemoryDom::from_body_html(
            "<p>The weather is lovely today.</p>",
            Viewport {
                width: 1024.0,
                height: 768.0,
            },
        ));
        let paragraph = dom.children(dom.body())[0];
        let text = dom.first_child(paragraph).unwrap();
        let selection = Arc::new(PageSelection {
            current: Mutex::new(Some(SelectionEvent {
                text: "weather".into(),
                range: TextRange {
                    container: text,
                    start: 4,
                    end: 11,
                },
                rect: Rect {
                    x: 10.0,
                    y: 10.0,
                    width: 60.0,
                    height: 16.0,
                },
            })),
        });
        let host = Host {
            dom: dom.clone(),
            selection,
            store,
            speech: None,
        };
        let script = ContentScript::start_with(Config::default(), host, Arc::new(Echo), "https://example.com/post");
        (dom, script)
    }

    #[tokio::test(start_paused = true)]
    async fn mouse_up_ends_in_a_rendered_popup() {
        let (dom, script) = page(Arc::new(MemoryStore::new()));
        let mut visible = script.overlays().subscribe();

        assert!(script.on_mouse_up());
        tokio::time::timeout(Duration::from_secs(5), visible.changed())
            .await
            .expect("popup shown")
            .unwrap();
        script.idle().await;

        let id = script.overlays().visible_overlay().unwrap();
        let handle = script.overlays().handle(&id).unwrap();
        assert!(dom.text_content(handle.content).contains("译文"));
        assert!(script.metrics_summary().contains_key(metrics::metric_names::TRANSLATE_DONE));
    }

    #[tokio::test]
    async fn blacklisted_page_ignores_selections() {
        let store = Arc::new(MemoryStore::new());
        settings::block_host(store.as_ref(), "https://example.com/other").unwrap();
        let (_dom, script) = page(store);
        assert!(!script.on_mouse_up());
        assert!(!script.on_key_down("t"));
    }

    #[tokio::test]
    async fn blocking_the_host_disables_capture() {
        let (_dom, script) = page(Arc::new(MemoryStore::new()));
        assert_eq!(
            script.block_host("https://example.com/post").unwrap(),
            BlockOutcome::Added("example.com".into())
        );
        assert!(!script.on_mouse_up());
    }

    #[tokio::test]
    async fn blocking_another_host_keeps_capture() {
        let (_dom, script) = page(Arc::new(MemoryStore::new()));
        assert_eq!(
            script.block_host("https://elsewhere.org/page").unwrap(),
            BlockOutcome::Added("elsewhere.org".into())
        );
        assert!(script.on_mouse_up());
    }
}
