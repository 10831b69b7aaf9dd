//! Render pipeline: one selection in, DOM updates out.
//! Gate on the classifier, resolve the owning element, consult the cache,
//! then run the partial, full-paragraph or lexical flow. Every slot write
//! is checked against a `SequenceGuard`; errors end as a failure message in
//! the slot and never escape.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, OnceCell};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::cancellation::{SequenceGuard, SlotSequencer};
use crate::classify;
use crate::completion::{self, Completion};
use crate::config::Config;
use crate::dom::{self, markup, Dom, NodeId, NodeType, Point};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::overlay::{self, ClickOutcome, OverlayHandle, OverlayId, OverlayKind, OverlayManager};
use crate::selection::SelectionEvent;
use crate::speech::Speaker;
use crate::translate::cache::{ReusePlan, TranslationCache};
use crate::translate::{prompts, RecordBlock, TranslationRecord};

pub const UNDERLINE_CLASS: &str = "comfy-trans-underlined";
pub const BLOCK_CLASS: &str = "comfy-trans-block";
pub const OVERLAY_ID_ATTR: &str = "data-overlay-id";
pub const SPEAK_ATTR: &str = "data-speak";
pub const HIGHLIGHT_CLASS: &str = "comfy-trans-highlighted";

const ORIGINAL_CLASS: &str = "comfy-trans-original";
const ORIGINAL_TEXT_CLASS: &str = "comfy-trans-original-text";
const PHONETIC_CLASS: &str = "comfy-trans-phonetic";
const TRANSLATION_CLASS: &str = "comfy-trans-translation";
const EXPLANATION_CLASS: &str = "comfy-trans-explanation";
const PLAY_CLASS: &str = "comfy-trans-play";
const LEXICAL_CLASS: &str = "selected-text";
const LEXICAL_WORD_CLASS: &str = "selected-text-word";
const LEXICAL_MEANING_CLASS: &str = "selected-text-meaning";
const PLAY_LABEL: &str = "\u{1F50A}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Already Chinese; nothing to do.
    SkippedChinese,
    /// Target lookup failed or a newer request took over.
    Aborted,
    Partial(OverlayId),
    /// Translated block element inserted after the source paragraph.
    FullParagraph(NodeId),
    /// Lexical unit appended to an existing translation block.
    Lexical(NodeId),
    /// Identical reselection; the existing record was shown again.
    Reused(NodeId),
}

#[derive(Debug)]
pub enum PipelineError {
    DomLookup(NodeId),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::DomLookup(node) => write!(f, "no element owns selection node {}", node.0),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Slots of one partial-flow popup.
struct PopupSlots {
    original_text: NodeId,
    phonetic: NodeId,
    translation: NodeId,
    explanation: NodeId,
}

pub struct RenderPipeline {
    config: Config,
    dom: Arc<dyn Dom>,
    completion: Arc<dyn Completion>,
    cache: TranslationCache,
    overlays: Arc<OverlayManager>,
    sequencer: SlotSequencer,
    speaker: Option<Arc<Speaker>>,
    metrics: Arc<MetricsRegistry>,
    tasks: TaskTracker,
    page_context: OnceCell<String>,
    /// Paragraph blocks left showing a key notice, reused on the next attempt.
    notice_blocks: Mutex<HashMap<NodeId, NodeId>>,
}

impl RenderPipeline {
    pub fn new(
        config: Config,
        dom: Arc<dyn Dom>,
        completion: Arc<dyn Completion>,
        overlays: Arc<OverlayManager>,
        speaker: Option<Arc<Speaker>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let cache = TranslationCache::new(config.cache_capacity);
        Self {
            config,
            dom,
            completion,
            cache,
            overlays,
            sequencer: SlotSequencer::new(),
            speaker,
            metrics,
            tasks: TaskTracker::new(),
            page_context: OnceCell::new(),
            notice_blocks: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub fn overlays(&self) -> &Arc<OverlayManager> {
        &self.overlays
    }

    /// Handle one debounced selection end to end.
    pub async fn process(self: &Arc<Self>, event: SelectionEvent) -> Outcome {
        let selected = event.text.trim().to_string();
        if selected.is_empty() {
            return Outcome::Aborted;
        }
        if classify::is_chinese(&selected) {
            debug!("selection is already Chinese, skipped");
            return Outcome::SkippedChinese;
        }

        let owner = match self.owning_element(event.start_container()) {
            Ok(owner) => owner,
            Err(e) => {
                error!(error = %e, "selection target lookup failed");
                return Outcome::Aborted;
            }
        };

        let mut replace_block = self.notice_blocks.lock().remove(&owner);
        if let Some(record) = self.cache.lookup(owner) {
            match ReusePlan::plan(&record, &selected) {
                ReusePlan::Identical => {
                    self.metrics.increment(metric_names::CACHE_REUSED);
                    return self.reuse(&event, owner, &record).await;
                }
                ReusePlan::SubSelection => {
                    self.metrics.increment(metric_names::CACHE_REUSED);
                    return self.lexical_flow(&event, &selected, owner, record).await;
                }
                ReusePlan::Stale => {
                    debug!(?owner, "cached record no longer covers the selection");
                    self.cache.invalidate(owner);
                    if let RecordBlock::Paragraph(block) = record.block {
                        replace_block = Some(block);
                    }
                }
            }
        }

        if dom::is_entire_paragraph(&self.dom.text_content(owner), &selected) {
            self.full_paragraph_flow(owner, replace_block).await
        } else {
            self.partial_flow(&event, &selected, owner).await
        }
    }

    /// Element whose text the selection belongs to, skipping our own underline spans.
    fn owning_element(&self, container: NodeId) -> Result<NodeId, PipelineError> {
        let mut node = dom::target_element(self.dom.as_ref(), container)
            .ok_or(PipelineError::DomLookup(container))?;
        while self.has_class(node, UNDERLINE_CLASS) {
            match self.dom.parent(node) {
                Some(parent) => node = parent,
                None => break,
            }
        }
        Ok(node)
    }

    /// Missing or rejected key text the completion client returns in place of a reply.
    fn is_notice(&self, text: &str) -> bool {
        let text = text.trim();
        let messages = &self.config.messages;
        text == messages.missing_key || text == messages.invalid_key
    }

    /// Page summary for translation prompts; `None` when disabled or unavailable.
    /// Computed once per page; a failed attempt is retried on the next call.
    pub async fn page_context(&self) -> Option<String> {
        let settings = &self.config.page_context;
        if !settings.enabled {
            return None;
        }
        let context = self
            .page_context
            .get_or_try_init(|| async {
                let excerpt: String = self.page_text().chars().take(settings.max_chars).collect();
                let prompt = prompts::page_context(excerpt.trim());
                match self.completion.complete(&prompt, Some(&settings.model)).await {
                    Ok(text) if !self.is_notice(&text) => {
                        info!(model = %settings.model, "page context ready");
                        Ok(text.trim().to_string())
                    }
                    Ok(notice) => Err(notice),
                    Err(e) => Err(e.to_string()),
                }
            })
            .await;
        match context {
            Ok(context) => Some(context.clone()),
            Err(reason) => {
                warn!(%reason, "page context unavailable");
                None
            }
        }
    }

    /// Body text without our own overlays.
    fn page_text(&self) -> String {
        let mut text = String::new();
        let mut child = self.dom.first_child(self.dom.body());
        while let Some(node) = child {
            if !self.has_class(node, overlay::ROOT_CLASS) {
                text.push_str(&self.dom.text_content(node));
            }
            child = self.dom.next_sibling(node);
        }
        text
    }

    fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.dom
            .attribute(node, "class")
            .is_some_and(|c| c.split_whitespace().any(|x| x == class))
    }

    fn anchor(event: &SelectionEvent) -> Point {
        Point {
            x: event.rect.x,
            y: event.rect.bottom(),
        }
    }

    fn underline(&self, event: &SelectionEvent, overlay: Option<&OverlayId>) -> Option<NodeId> {
        let span = self.dom.wrap_range(&event.range);
        match span {
            Some(span) => {
                self.dom.set_attribute(span, "class", UNDERLINE_CLASS);
                if let Some(id) = overlay {
                    self.dom.set_attribute(span, OVERLAY_ID_ATTR, id.as_str());
                }
            }
            None => warn!(range = ?event.range, "selection range could not be underlined"),
        }
        span
    }

    fn element(&self, tag: &str, class: &str, text: Option<&str>) -> NodeId {
        let node = self.dom.create_element(tag);
        self.dom.set_attribute(node, "class", class);
        if let Some(text) = text {
            self.dom.set_text(node, text);
        }
        node
    }

    fn play_button(&self, text: &str) -> NodeId {
        let button = self.element("button", PLAY_CLASS, Some(PLAY_LABEL));
        self.dom.set_attribute(button, SPEAK_ATTR, text);
        button
    }

    fn build_popup(&self, handle: &OverlayHandle, selected: &str) -> PopupSlots {
        let original = self.element("div", ORIGINAL_CLASS, None);
        let original_text = self.element("span", ORIGINAL_TEXT_CLASS, Some(selected));
        let phonetic = self.element("span", PHONETIC_CLASS, None);
        self.dom.append_child(original, original_text);
        self.dom.append_child(original, phonetic);
        self.dom.append_child(original, self.play_button(selected));

        let translation = self.element("div", TRANSLATION_CLASS, Some(&self.config.messages.loading));
        let explanation = self.element("div", EXPLANATION_CLASS, None);

        self.dom.set_text(handle.content, "");
        self.dom.append_child(handle.content, original);
        self.dom.append_child(handle.content, translation);
        self.dom.append_child(handle.content, explanation);

        PopupSlots {
            original_text,
            phonetic,
            translation,
            explanation,
        }
    }

    fn write_failure(&self, guard: &SequenceGuard, slot: NodeId) {
        self.metrics.increment(metric_names::REQUEST_FAILED);
        if guard.should_continue() {
            self.dom.set_text(slot, &self.config.messages.translation_failed);
        }
    }

    async fn partial_flow(self: &Arc<Self>, event: &SelectionEvent, selected: &str, owner: NodeId) -> Outcome {
        let guard = self.sequencer.begin(owner);
        let id = OverlayId::generate();
        self.underline(event, Some(&id));

        let handle = self.overlays.create_overlay(&id, OverlayKind::Popup);
        let slots = self.build_popup(&handle, selected);
        self.overlays
            .show(&handle, Self::anchor(event), selected.chars().count())
            .await;

        let paragraph = dom::closest(self.dom.as_ref(), owner, "p").unwrap_or(owner);
        let context = self.dom.text_content(paragraph);
        let page = self.page_context().await;
        let prompt = prompts::translation(&context, selected, &self.config.target_language, page.as_deref());

        let span = self.metrics.span(metric_names::TRANSLATE_DONE);
        let translation = match self.completion.complete(&prompt, None).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(overlay = %id, error = %e, "translation request failed");
                self.write_failure(&guard, slots.translation);
                return Outcome::Partial(id);
            }
        };
        if !guard.should_continue() {
            self.metrics.increment(metric_names::STALE_DROPPED);
            debug!(overlay = %id, "stale translation discarded");
            return Outcome::Aborted;
        }
        self.dom.set_text(slots.translation, &translation);
        if self.is_notice(&translation) {
            info!(overlay = %id, "completion backend needs an API key");
            return Outcome::Partial(id);
        }
        span.finish();

        let record = TranslationRecord::new(selected, translation.clone(), RecordBlock::Overlay(id.clone()));
        self.cache.store(owner, &self.dom.text_content(owner), record);

        if classify::has_kanji(selected) {
            self.spawn_furigana(guard.clone(), selected.to_string(), slots.original_text);
        }
        if !classify::is_kana_only(selected) {
            self.spawn_phonetic(guard.clone(), selected.to_string(), slots.phonetic, Some(owner));
        }

        let explanation = self
            .stream_explanation(&guard, &handle, selected, &translation, slots.explanation)
            .await;
        if let Some(explanation) = explanation.filter(|e| !self.is_notice(e)) {
            self.cache
                .update(owner, |record| record.explanation_text = Some(explanation));
        }

        info!(overlay = %id, "partial translation rendered");
        Outcome::Partial(id)
    }

    /// Append streamed explanation fragments, growing the overlay as text arrives.
    async fn stream_explanation(
        &self,
        guard: &SequenceGuard,
        handle: &OverlayHandle,
        selected: &str,
        translation: &str,
        slot: NodeId,
    ) -> Option<String> {
        let span = self.metrics.span(metric_names::EXPLANATION_DONE);
        let prompt = prompts::explanation(selected, translation, &self.config.target_language);
        let mut stream = match self.completion.complete_stream(&prompt, None).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(overlay = %handle.id, error = %e, "explanation request failed");
                self.write_failure(guard, slot);
                return None;
            }
        };

        let base_chars = selected.chars().count() + translation.chars().count();
        let refresh_every = self.config.width_refresh_every.max(1);
        let mut explanation = String::new();
        let mut fragments = 0usize;

        loop {
            let fragment = tokio::select! {
                _ = guard.token().cancelled() => None,
                fragment = stream.next() => fragment,
            };
            let Some(fragment) = fragment else { break };
            if !guard.should_continue() {
                break;
            }
            if fragments == 0 {
                self.metrics
                    .record(metric_names::EXPLANATION_FIRST_CHUNK, span.elapsed_ms());
            }
            self.dom.append_text(slot, &fragment);
            explanation.push_str(&fragment);
            fragments += 1;
            if fragments % refresh_every == 0 {
                self.overlays
                    .resize(handle, base_chars + explanation.chars().count());
            }
        }

        if !guard.should_continue() {
            self.metrics.increment(metric_names::STALE_DROPPED);
            debug!(overlay = %handle.id, fragments, "explanation stream superseded");
            return None;
        }
        self.overlays
            .resize(handle, base_chars + explanation.chars().count());
        span.finish();
        Some(explanation)
    }

    fn spawn_furigana(self: &Arc<Self>, guard: SequenceGuard, text: String, slot: NodeId) {
        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            match this.completion.complete(&prompts::furigana(&text), None).await {
                Ok(raw) if guard.should_continue() => {
                    if this.is_notice(&raw) {
                        return;
                    }
                    let markup = markup::parse_fragment(&markup::strip_code_fence(&raw));
                    if markup::text_of(&markup).trim().is_empty() {
                        debug!("empty furigana markup ignored");
                        return;
                    }
                    this.dom.set_markup(slot, &markup);
                }
                Ok(_) => debug!("stale furigana discarded"),
                Err(e) => warn!(error = %e, "furigana request failed"),
            }
        });
    }

    /// `owner` is set when the reading belongs to the node's record.
    fn spawn_phonetic(self: &Arc<Self>, guard: SequenceGuard, text: String, slot: NodeId, owner: Option<NodeId>) {
        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            match this.completion.complete(&prompts::phonetic(&text), None).await {
                Ok(phonetic) if guard.should_continue() => {
                    let phonetic = phonetic.trim().to_string();
                    if phonetic.is_empty() || this.is_notice(&phonetic) {
                        return;
                    }
                    this.dom.set_text(slot, &format!("({phonetic})"));
                    if let Some(owner) = owner {
                        this.cache
                            .update(owner, |record| record.phonetic_text = Some(phonetic));
                    }
                }
                Ok(_) => debug!("stale phonetic discarded"),
                Err(e) => warn!(error = %e, "phonetic request failed"),
            }
        });
    }

    async fn full_paragraph_flow(self: &Arc<Self>, owner: NodeId, replace_block: Option<NodeId>) -> Outcome {
        let guard = self.sequencer.begin(owner);
        let loading = &self.config.messages.loading;

        let placeholder = match replace_block.filter(|b| self.dom.parent(*b).is_some()) {
            Some(block) => {
                self.dom.set_text(block, loading);
                block
            }
            None => {
                let Some(position) = dom::find_insert_position(self.dom.as_ref(), owner) else {
                    error!(?owner, "no insertion point after paragraph");
                    return Outcome::Aborted;
                };
                let placeholder = self.element("div", BLOCK_CLASS, Some(loading));
                self.dom
                    .insert_before(position.parent, placeholder, position.before);
                placeholder
            }
        };

        let original = self.dom.text_content(owner);
        let prompt = prompts::full_paragraph(&self.dom.outer_html(owner), &self.config.target_language);
        let span = self.metrics.span(metric_names::FULL_PARAGRAPH_DONE);

        let raw = match completion::complete_collected(self.completion.as_ref(), &prompt, None).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(?owner, error = %e, "paragraph translation failed");
                self.write_failure(&guard, placeholder);
                return Outcome::FullParagraph(placeholder);
            }
        };
        if !guard.should_continue() {
            self.metrics.increment(metric_names::STALE_DROPPED);
            return Outcome::Aborted;
        }
        if self.is_notice(&raw) {
            self.dom.set_text(placeholder, raw.trim());
            self.notice_blocks.lock().insert(owner, placeholder);
            info!(?owner, "completion backend needs an API key");
            return Outcome::FullParagraph(placeholder);
        }

        let markup = markup::parse_fragment(&markup::strip_code_fence(&raw));
        let translated = markup::text_of(&markup);
        if translated.trim().is_empty() {
            self.write_failure(&guard, placeholder);
            return Outcome::FullParagraph(placeholder);
        }

        let has_element = markup
            .iter()
            .any(|n| matches!(n, markup::MarkupNode::Element { .. }));
        let block = if has_element {
            let nodes = self.dom.replace_with_markup(placeholder, &markup);
            let block = nodes
                .into_iter()
                .find(|n| self.dom.node_type(*n) == Some(NodeType::Element))
                .unwrap_or(placeholder);
            let class = match self.dom.attribute(block, "class") {
                Some(existing) if !existing.is_empty() => format!("{existing} {BLOCK_CLASS}"),
                _ => BLOCK_CLASS.to_string(),
            };
            self.dom.set_attribute(block, "class", &class);
            block
        } else {
            // plain-text reply
            self.dom.set_markup(placeholder, &markup);
            placeholder
        };
        span.finish();

        let record = TranslationRecord::new(original.trim(), translated, RecordBlock::Paragraph(block));
        self.cache.store(owner, &original, record);
        info!(?owner, ?block, "paragraph translated in place");
        Outcome::FullParagraph(block)
    }

    async fn lexical_flow(
        self: &Arc<Self>,
        event: &SelectionEvent,
        selected: &str,
        owner: NodeId,
        record: TranslationRecord,
    ) -> Outcome {
        let container = match &record.block {
            RecordBlock::Paragraph(block) => {
                self.underline(event, None);
                self.clear_highlights(*block);
                self.spawn_highlight(*block, selected.to_string(), record.translation_text.clone());
                *block
            }
            RecordBlock::Overlay(id) => {
                self.underline(event, Some(id));
                let Some(handle) = self.overlays.handle(id) else {
                    warn!(overlay = %id, "record points at a missing overlay");
                    self.cache.invalidate(owner);
                    return Outcome::Aborted;
                };
                self.overlays.show(&handle, Self::anchor(event), 0).await;
                handle.content
            }
        };

        let unit = self.element("div", LEXICAL_CLASS, None);
        let word = self.element("span", LEXICAL_WORD_CLASS, Some(selected));
        let phonetic = self.element("span", PHONETIC_CLASS, None);
        let meaning = self.element("div", LEXICAL_MEANING_CLASS, Some(&self.config.messages.loading));
        self.dom.append_child(unit, word);
        self.dom.append_child(unit, phonetic);
        self.dom.append_child(unit, self.play_button(selected));
        self.dom.append_child(unit, meaning);
        self.dom.append_child(container, unit);

        let guard = self.sequencer.begin(meaning);
        if !classify::is_kana_only(selected) {
            self.spawn_phonetic(guard.clone(), selected.to_string(), phonetic, None);
        }

        let span = self.metrics.span(metric_names::LEXICAL_DONE);
        let prompt = prompts::lexical(selected, &record.original_text, &self.config.target_language);
        match self.completion.complete(&prompt, None).await {
            Ok(text) if guard.should_continue() => {
                self.dom.set_text(meaning, text.trim());
                span.finish();
            }
            Ok(_) => {
                self.metrics.increment(metric_names::STALE_DROPPED);
                return Outcome::Aborted;
            }
            Err(e) => {
                warn!(error = %e, "lexical lookup failed");
                self.write_failure(&guard, meaning);
            }
        }
        if let RecordBlock::Overlay(id) = &record.block {
            if let Some(handle) = self.overlays.handle(id) {
                self.overlays.fit_to_viewport(&handle);
            }
        }
        Outcome::Lexical(unit)
    }

    /// Undo earlier highlights inside a translation block.
    fn clear_highlights(&self, block: NodeId) {
        for span in self.descendants(block, |node| self.has_class(node, HIGHLIGHT_CLASS)) {
            let text = self.dom.text_content(span);
            self.dom.replace_with_markup(span, &[markup::MarkupNode::Text(text)]);
        }
    }

    /// Nodes under `root` in document order that satisfy `pred`.
    /// Lexical units are not descended into.
    fn descendants(&self, root: NodeId, pred: impl Fn(NodeId) -> bool) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node != root {
                if pred(node) {
                    found.push(node);
                }
                if self.has_class(node, LEXICAL_CLASS) {
                    continue;
                }
            }
            let mut children = Vec::new();
            let mut child = self.dom.first_child(node);
            while let Some(c) = child {
                children.push(c);
                child = self.dom.next_sibling(c);
            }
            stack.extend(children.into_iter().rev());
        }
        found
    }

    /// Ask which word of the translation matches `selected` and highlight it in the block.
    fn spawn_highlight(self: &Arc<Self>, block: NodeId, selected: String, translation: String) {
        let guard = self.sequencer.begin(block);
        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            let prompt = prompts::matching_word(&translation, &selected);
            let matched = match this.completion.complete(&prompt, None).await {
                Ok(text) if guard.should_continue() => text.trim().to_string(),
                Ok(_) => {
                    debug!("stale highlight discarded");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "matching word lookup failed");
                    return;
                }
            };
            if matched.is_empty() || this.is_notice(&matched) {
                return;
            }
            if this.highlight(block, &matched).is_none() {
                debug!(%matched, "matching word not found in translation block");
            }
        });
    }

    /// Wrap the first occurrence of `word` inside one text node of `block`.
    fn highlight(&self, block: NodeId, word: &str) -> Option<NodeId> {
        let texts = self.descendants(block, |node| self.dom.node_type(node) == Some(NodeType::Text));
        let (container, start) = texts.into_iter().find_map(|node| {
            let text = self.dom.text_content(node);
            text.find(word).map(|byte| (node, text[..byte].chars().count()))
        })?;
        let span = self.dom.wrap_range(&dom::TextRange {
            container,
            start,
            end: start + word.chars().count(),
        })?;
        self.dom.set_attribute(span, "class", HIGHLIGHT_CLASS);
        Some(span)
    }

    async fn reuse(&self, event: &SelectionEvent, owner: NodeId, record: &TranslationRecord) -> Outcome {
        if let RecordBlock::Overlay(id) = &record.block {
            if let Some(handle) = self.overlays.handle(id) {
                let chars = record.original_text.chars().count()
                    + record.translation_text.chars().count()
                    + record.explanation_text.as_deref().map_or(0, |e| e.chars().count());
                self.overlays.show(&handle, Self::anchor(event), chars).await;
            }
        }
        debug!(?owner, "identical selection, record reused");
        Outcome::Reused(owner)
    }

    /// Document click: play buttons speak, then the overlay dismissal check runs.
    pub fn handle_click(self: &Arc<Self>, target: NodeId) -> ClickOutcome {
        if let Some(text) = self.speak_text(target) {
            let this = Arc::clone(self);
            self.tasks.spawn(async move { this.play(&text).await });
        }
        self.overlays.handle_document_click(target)
    }

    fn speak_text(&self, target: NodeId) -> Option<String> {
        let mut current = Some(target);
        while let Some(node) = current {
            if let Some(text) = self.dom.attribute(node, SPEAK_ATTR) {
                return Some(text);
            }
            current = self.dom.parent(node);
        }
        None
    }

    /// Hovering an underlined span shows its overlay again.
    pub async fn on_underline_hover(&self, target: NodeId) -> bool {
        let mut current = Some(target);
        while let Some(node) = current {
            if self.has_class(node, UNDERLINE_CLASS) {
                if let Some(id) = self.dom.attribute(node, OVERLAY_ID_ATTR) {
                    let id = OverlayId::new(id);
                    self.overlays.reveal(&id).await;
                    return self.overlays.is_visible(&id);
                }
            }
            current = self.dom.parent(node);
        }
        false
    }

    pub async fn play(&self, text: &str) {
        let Some(speaker) = &self.speaker else {
            debug!("no speech engine attached");
            return;
        };
        if let Err(e) = speaker.speak(text).await {
            warn!(error = %e, "playback failed");
        }
    }

    /// Wait until every spawned enrichment task has finished.
    pub async fn idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

/// Drain debounced selections into the pipeline, one task per selection.
pub async fn run_selection_loop(mut rx: mpsc::Receiver<SelectionEvent>, pipeline: Arc<RenderPipeline>) {
    info!("selection loop started");
    while let Some(event) = rx.recv().await {
        let pipeline_for_task = Arc::clone(&pipeline);
        pipeline.tasks.spawn(async move {
            let outcome = pipeline_for_task.process(event).await;
            debug!(?outcome, "selection processed");
        });
    }
    info!("selection loop stopped");
}
