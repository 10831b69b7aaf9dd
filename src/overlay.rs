//! Overlay manager: popup/tooltip lifecycle Hidden → Visible → Hidden.
//! One visible-overlay slot for the whole page; showing overlay B hides A.
//! Sizing from content length, viewport-fit after layout, outside-click dismissal.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::dom::{Dom, NodeId, Point, Size, Viewport};

pub const ROOT_CLASS: &str = "comfy-trans-popup";
pub const CONTENT_CLASS: &str = "comfy-trans-content";

const MIN_WIDTH_PX: f64 = 250.0;
const MAX_WIDTH_PX: f64 = 400.0;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverlayId(String);

impl OverlayId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh page-unique id.
    pub fn generate() -> Self {
        Self(format!("{ROOT_CLASS}-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OverlayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Popup: click-triggered, stays until dismissed. Tooltip: hover-triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    Popup,
    Tooltip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Hidden,
    Visible,
}

impl std::fmt::Display for OverlayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlayState::Hidden => write!(f, "Hidden"),
            OverlayState::Visible => write!(f, "Visible"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayHandle {
    pub id: OverlayId,
    pub kind: OverlayKind,
    /// Outer element; clicks inside its subtree never dismiss.
    pub root: NodeId,
    /// Element holding the rendered slots.
    pub content: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Click landed inside the visible overlay; swallowed.
    Inside,
    /// Click landed outside; the overlay was hidden.
    Dismissed,
    NoOverlay,
}

struct Entry {
    handle: OverlayHandle,
    state: OverlayState,
    anchor: Point,
    width: f64,
}

/// Step function from content length to box width, clamped to [250, 400] px.
pub fn width_for_char_count(chars: usize) -> f64 {
    let width = match chars {
        0..=100 => MIN_WIDTH_PX,
        101..=200 => 280.0,
        201..=300 => 320.0,
        301..=400 => 368.0,
        _ => MAX_WIDTH_PX,
    };
    width.clamp(MIN_WIDTH_PX, MAX_WIDTH_PX)
}

/// Top-left corner for a box of `size` anchored at `anchor`, flipped to the
/// other side of the anchor on any axis where it would leave the viewport.
pub fn fit_within(anchor: Point, size: Size, viewport: Viewport) -> Point {
    let x = if anchor.x + size.width > viewport.width {
        anchor.x - size.width
    } else {
        anchor.x
    };
    let y = if anchor.y + size.height > viewport.height {
        anchor.y - size.height
    } else {
        anchor.y
    };
    Point {
        x: x.max(0.0),
        y: y.max(0.0),
    }
}

pub struct OverlayManager {
    dom: Arc<dyn Dom>,
    overlays: RwLock<HashMap<OverlayId, Entry>>,
    /// The single visible-overlay slot. Lock order: `visible`, then `overlays`.
    visible: RwLock<Option<OverlayId>>,
    visible_tx: watch::Sender<Option<OverlayId>>,
}

impl OverlayManager {
    pub fn new(dom: Arc<dyn Dom>) -> Self {
        let (visible_tx, _) = watch::channel(None);
        Self {
            dom,
            overlays: RwLock::new(HashMap::new()),
            visible: RwLock::new(None),
            visible_tx,
        }
    }

    /// Create the overlay element, or return the existing one with this id.
    pub fn create_overlay(&self, id: &OverlayId, kind: OverlayKind) -> OverlayHandle {
        let mut overlays = self.overlays.write();
        if let Some(entry) = overlays.get(id) {
            return entry.handle.clone();
        }

        let handle = match self.dom.element_by_id(id.as_str()) {
            Some(root) => {
                // adopt an element already in the page
                let content = self
                    .first_child_with_class(root, CONTENT_CLASS)
                    .unwrap_or(root);
                OverlayHandle {
                    id: id.clone(),
                    kind,
                    root,
                    content,
                }
            }
            None => self.build_element(id, kind),
        };

        overlays.insert(
            id.clone(),
            Entry {
                handle: handle.clone(),
                state: OverlayState::Hidden,
                anchor: Point::default(),
                width: MIN_WIDTH_PX,
            },
        );
        debug!(overlay = %id, ?kind, "overlay created");
        handle
    }

    fn build_element(&self, id: &OverlayId, kind: OverlayKind) -> OverlayHandle {
        let root = self.dom.create_element("div");
        self.dom.set_attribute(root, "id", id.as_str());
        self.dom.set_attribute(root, "class", ROOT_CLASS);
        self.dom.set_attribute(
            root,
            "data-kind",
            match kind {
                OverlayKind::Popup => "popup",
                OverlayKind::Tooltip => "tooltip",
            },
        );
        self.dom.set_style(root, "position", "fixed");
        self.dom.set_style(root, "z-index", "2147483647");
        self.dom.set_style(root, "display", "none");

        let content = self.dom.create_element("div");
        self.dom.set_attribute(content, "class", CONTENT_CLASS);
        self.dom.append_child(root, content);
        self.dom.append_child(self.dom.body(), root);

        OverlayHandle {
            id: id.clone(),
            kind,
            root,
            content,
        }
    }

    fn first_child_with_class(&self, root: NodeId, class: &str) -> Option<NodeId> {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node != root
                && self
                    .dom
                    .attribute(node, "class")
                    .is_some_and(|c| c.split_whitespace().any(|x| x == class))
            {
                return Some(node);
            }
            let mut child = self.dom.first_child(node);
            while let Some(c) = child {
                stack.push(c);
                child = self.dom.next_sibling(c);
            }
        }
        None
    }

    pub fn handle(&self, id: &OverlayId) -> Option<OverlayHandle> {
        self.overlays.read().get(id).map(|e| e.handle.clone())
    }

    pub fn state(&self, id: &OverlayId) -> Option<OverlayState> {
        self.overlays.read().get(id).map(|e| e.state)
    }

    pub fn is_visible(&self, id: &OverlayId) -> bool {
        self.state(id) == Some(OverlayState::Visible)
    }

    pub fn visible_overlay(&self) -> Option<OverlayId> {
        self.visible.read().clone()
    }

    /// Receive the visible overlay id whenever it changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<OverlayId>> {
        self.visible_tx.subscribe()
    }

    /// Show at `anchor` with a width estimated from `estimated_chars`, then
    /// re-measure after layout and keep the box inside the viewport.
    pub async fn show(&self, handle: &OverlayHandle, anchor: Point, estimated_chars: usize) -> Option<Point> {
        self.present(handle, anchor, width_for_char_count(estimated_chars));
        tokio::task::yield_now().await;
        self.fit_to_viewport(handle)
    }

    /// Show again at the last anchor and width (hover over an underlined span).
    pub async fn reveal(&self, id: &OverlayId) -> Option<Point> {
        let (handle, anchor, width) = {
            let overlays = self.overlays.read();
            let entry = overlays.get(id)?;
            (entry.handle.clone(), entry.anchor, entry.width)
        };
        self.present(&handle, anchor, width);
        tokio::task::yield_now().await;
        self.fit_to_viewport(&handle)
    }

    fn present(&self, handle: &OverlayHandle, anchor: Point, width: f64) {
        let mut visible = self.visible.write();
        let mut overlays = self.overlays.write();

        if let Some(previous) = visible.take() {
            if previous != handle.id {
                if let Some(entry) = overlays.get_mut(&previous) {
                    self.apply_hidden(entry);
                }
            }
        }

        let entry = overlays.entry(handle.id.clone()).or_insert_with(|| Entry {
            handle: handle.clone(),
            state: OverlayState::Hidden,
            anchor,
            width,
        });
        let from = entry.state;
        entry.state = OverlayState::Visible;
        entry.anchor = anchor;
        entry.width = width;

        self.dom.set_style(handle.root, "display", "block");
        self.dom.set_style(handle.root, "width", &px(width));
        self.dom.set_style(handle.root, "left", &px(anchor.x));
        self.dom.set_style(handle.root, "top", &px(anchor.y));

        *visible = Some(handle.id.clone());
        self.visible_tx.send_replace(Some(handle.id.clone()));
        info!(overlay = %handle.id, from = %from, width, "overlay shown");
    }

    /// Re-measure and reposition so the box stays inside the viewport.
    pub fn fit_to_viewport(&self, handle: &OverlayHandle) -> Option<Point> {
        let anchor = {
            let overlays = self.overlays.read();
            let entry = overlays.get(&handle.id)?;
            if entry.state != OverlayState::Visible {
                return None;
            }
            entry.anchor
        };
        let size = self.dom.measure(handle.root)?;
        let at = fit_within(anchor, size, self.dom.viewport());
        self.dom.set_style(handle.root, "left", &px(at.x));
        self.dom.set_style(handle.root, "top", &px(at.y));
        Some(at)
    }

    /// Recompute width from the running character count while content streams in.
    pub fn resize(&self, handle: &OverlayHandle, chars: usize) {
        let width = width_for_char_count(chars);
        let changed = {
            let mut overlays = self.overlays.write();
            match overlays.get_mut(&handle.id) {
                Some(entry) if entry.width != width => {
                    entry.width = width;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.dom.set_style(handle.root, "width", &px(width));
            debug!(overlay = %handle.id, chars, width, "overlay resized");
        }
        self.fit_to_viewport(handle);
    }

    pub fn hide(&self, id: &OverlayId) {
        let mut visible = self.visible.write();
        let mut overlays = self.overlays.write();
        if let Some(entry) = overlays.get_mut(id) {
            self.apply_hidden(entry);
        }
        if visible.as_ref() == Some(id) {
            *visible = None;
            self.visible_tx.send_replace(None);
        }
    }

    fn apply_hidden(&self, entry: &mut Entry) {
        if entry.state == OverlayState::Hidden {
            return;
        }
        entry.state = OverlayState::Hidden;
        self.dom.set_style(entry.handle.root, "display", "none");
        debug!(overlay = %entry.handle.id, "overlay hidden");
    }

    /// Document-wide click: outside the visible overlay closes it, inside is swallowed.
    pub fn handle_document_click(&self, target: NodeId) -> ClickOutcome {
        let Some(id) = self.visible_overlay() else {
            return ClickOutcome::NoOverlay;
        };
        let Some(root) = self.overlays.read().get(&id).map(|e| e.handle.root) else {
            return ClickOutcome::NoOverlay;
        };
        if self.dom.contains(root, target) {
            return ClickOutcome::Inside;
        }
        self.hide(&id);
        ClickOutcome::Dismissed
    }

    /// Drop an overlay entirely (element removed from the page).
    pub fn destroy(&self, id: &OverlayId) {
        self.hide(id);
        if let Some(entry) = self.overlays.write().remove(id) {
            self.dom.remove(entry.handle.root);
        }
    }
}

fn px(value: f64) -> String {
    format!("{}px", value.round())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::MemoryDom;

    const VIEWPORT: Viewport = Viewport {
        width: 800.0,
        height: 600.0,
    };

    fn manager() -> (Arc<MemoryDom>, OverlayManager) {
        let dom = Arc::new(MemoryDom::from_body_html("<p>page text</p>", VIEWPORT));
        let manager = OverlayManager::new(dom.clone());
        (dom, manager)
    }

    #[test]
    fn width_is_a_clamped_step_function() {
        assert_eq!(width_for_char_count(0), 250.0);
        assert_eq!(width_for_char_count(100), 250.0);
        assert_eq!(width_for_char_count(150), 280.0);
        assert_eq!(width_for_char_count(250), 320.0);
        assert_eq!(width_for_char_count(361), 368.0);
        assert_eq!(width_for_char_count(10_000), 400.0);
        let widths: Vec<f64> = (0..600).step_by(25).map(width_for_char_count).collect();
        assert!(widths.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn fit_flips_on_overflow() {
        let size = Size { width: 300.0, height: 200.0 };
        assert_eq!(
            fit_within(Point { x: 100.0, y: 100.0 }, size, VIEWPORT),
            Point { x: 100.0, y: 100.0 }
        );
        assert_eq!(
            fit_within(Point { x: 700.0, y: 500.0 }, size, VIEWPORT),
            Point { x: 400.0, y: 300.0 }
        );
        assert_eq!(
            fit_within(Point { x: 200.0, y: 500.0 }, Size { width: 900.0, height: 700.0 }, VIEWPORT),
            Point { x: 0.0, y: 0.0 }
        );
    }

    #[test]
    fn create_is_idempotent_by_id() {
        let (dom, manager) = manager();
        let id = OverlayId::new("popup-1");
        let a = manager.create_overlay(&id, OverlayKind::Popup);
        let b = manager.create_overlay(&id, OverlayKind::Popup);
        assert_eq!(a, b);
        assert_eq!(dom.elements_with_class(ROOT_CLASS).len(), 1);
    }

    #[test]
    fn adopts_existing_element_with_same_id() {
        let dom = Arc::new(MemoryDom::from_body_html(
            r#"<div id="popup-9" class="comfy-trans-popup"><div class="comfy-trans-content">x</div></div>"#,
            VIEWPORT,
        ));
        let manager = OverlayManager::new(dom.clone());
        let handle = manager.create_overlay(&OverlayId::new("popup-9"), OverlayKind::Popup);
        assert_eq!(Some(handle.root), dom.element_by_id("popup-9"));
        assert_eq!(dom.text_content(handle.content), "x");
        assert_ne!(handle.content, handle.root);
        assert_eq!(dom.elements_with_class(ROOT_CLASS).len(), 1);
    }

    #[tokio::test]
    async fn showing_b_hides_a() {
        let (dom, manager) = manager();
        let a = manager.create_overlay(&OverlayId::new("a"), OverlayKind::Popup);
        let b = manager.create_overlay(&OverlayId::new("b"), OverlayKind::Tooltip);

        manager.show(&a, Point { x: 10.0, y: 10.0 }, 20).await;
        assert!(manager.is_visible(&a.id));

        manager.show(&b, Point { x: 30.0, y: 30.0 }, 20).await;
        assert!(!manager.is_visible(&a.id));
        assert!(manager.is_visible(&b.id));
        assert_eq!(manager.visible_overlay(), Some(b.id.clone()));
        assert_eq!(dom.style(a.root, "display").as_deref(), Some("none"));
        assert_eq!(dom.style(b.root, "display").as_deref(), Some("block"));
    }

    #[tokio::test]
    async fn show_repositions_after_measuring() {
        let (dom, manager) = manager();
        let handle = manager.create_overlay(&OverlayId::new("edge"), OverlayKind::Popup);
        dom.pin_size(handle.root, Size { width: 250.0, height: 100.0 });

        let at = manager.show(&handle, Point { x: 700.0, y: 560.0 }, 10).await.unwrap();
        assert_eq!(at, Point { x: 450.0, y: 460.0 });
        assert_eq!(dom.style(handle.root, "left").as_deref(), Some("450px"));
        assert_eq!(dom.style(handle.root, "width").as_deref(), Some("250px"));
    }

    #[tokio::test]
    async fn outside_click_dismisses_inside_click_does_not() {
        let (dom, manager) = manager();
        let handle = manager.create_overlay(&OverlayId::new("p"), OverlayKind::Popup);
        let button = dom.create_element("button");
        dom.append_child(handle.content, button);
        manager.show(&handle, Point { x: 5.0, y: 5.0 }, 5).await;

        assert_eq!(manager.handle_document_click(button), ClickOutcome::Inside);
        assert!(manager.is_visible(&handle.id));

        let paragraph = dom.children(dom.body())[0];
        assert_eq!(manager.handle_document_click(paragraph), ClickOutcome::Dismissed);
        assert!(!manager.is_visible(&handle.id));
        assert_eq!(manager.visible_overlay(), None);
        assert_eq!(manager.handle_document_click(paragraph), ClickOutcome::NoOverlay);
    }

    #[tokio::test]
    async fn subscribers_see_visibility_changes() {
        let (_dom, manager) = manager();
        let mut rx = manager.subscribe();
        let handle = manager.create_overlay(&OverlayId::new("w"), OverlayKind::Popup);

        manager.show(&handle, Point::default(), 1).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Some(handle.id.clone()));

        manager.hide(&handle.id);
        assert_eq!(*rx.borrow_and_update(), None);
    }

    #[tokio::test]
    async fn resize_grows_width_with_content() {
        let (dom, manager) = manager();
        let handle = manager.create_overlay(&OverlayId::new("grow"), OverlayKind::Popup);
        manager.show(&handle, Point { x: 10.0, y: 10.0 }, 10).await;
        manager.resize(&handle, 350);
        assert_eq!(dom.style(handle.root, "width").as_deref(), Some("368px"));
    }

    #[tokio::test]
    async fn reveal_restores_last_placement() {
        let (_dom, manager) = manager();
        let a = manager.create_overlay(&OverlayId::new("a"), OverlayKind::Popup);
        let b = manager.create_overlay(&OverlayId::new("b"), OverlayKind::Popup);
        manager.show(&a, Point { x: 10.0, y: 10.0 }, 10).await;
        manager.show(&b, Point { x: 20.0, y: 20.0 }, 10).await;
        manager.reveal(&a.id).await;
        assert!(manager.is_visible(&a.id));
        assert!(!manager.is_visible(&b.id));
    }
}
