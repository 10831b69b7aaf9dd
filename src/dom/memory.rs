//! Arena-backed in-memory document.
//! Layout is approximated from text length and the `width` style, unless a
//! fixed size was pinned with `pin_size`.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use super::markup::{self, MarkupNode};
use super::{Dom, NodeId, NodeType, Size, TextRange, TreeView, Viewport};

const CHAR_WIDTH_PX: f64 = 14.0;
const LINE_HEIGHT_PX: f64 = 22.0;
const BOX_PADDING_PX: f64 = 24.0;

enum NodeKind {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
        style: BTreeMap<String, String>,
    },
    Text(String),
}

struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

struct Arena {
    nodes: Vec<NodeData>,
}

impl Arena {
    fn get(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0)
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    fn element(&mut self, tag: &str) -> NodeId {
        self.push(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            style: BTreeMap::new(),
        })
    }

    fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.nodes.get(id.0).and_then(|n| n.parent) else { return };
        if let Some(p) = self.nodes.get_mut(parent.0) {
            p.children.retain(|c| *c != id);
        }
        self.nodes[id.0].parent = None;
    }

    fn insert(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) {
        if parent.0 >= self.nodes.len() || child.0 >= self.nodes.len() || parent == child {
            return;
        }
        self.detach(child);
        let children = &mut self.nodes[parent.0].children;
        let index = before
            .and_then(|b| children.iter().position(|c| *c == b))
            .unwrap_or(children.len());
        children.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
    }

    fn clear_children(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.nodes[id.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
    }

    fn build(&mut self, node: &MarkupNode) -> NodeId {
        match node {
            MarkupNode::Text(text) => self.push(NodeKind::Text(text.clone())),
            MarkupNode::Element { tag, attrs, children } => {
                let id = self.element(tag);
                if let NodeKind::Element { attrs: map, style, .. } = &mut self.nodes[id.0].kind {
                    for (k, v) in attrs {
                        if k == "style" {
                            *style = parse_style(v);
                        } else {
                            map.insert(k.clone(), v.clone());
                        }
                    }
                }
                for child in children {
                    let child_id = self.build(child);
                    self.insert(id, child_id, None);
                }
                id
            }
        }
    }

    fn text_into(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.get(id) else { return };
        match &node.kind {
            NodeKind::Text(t) => out.push_str(t),
            NodeKind::Element { .. } => {
                for child in &node.children {
                    self.text_into(*child, out);
                }
            }
        }
    }

    fn html_into(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.get(id) else { return };
        match &node.kind {
            NodeKind::Text(t) => out.push_str(&escape(t, false)),
            NodeKind::Element { tag, attrs, style } => {
                out.push('<');
                out.push_str(tag);
                for (k, v) in attrs {
                    out.push_str(&format!(" {k}=\"{}\"", escape(v, true)));
                }
                if !style.is_empty() {
                    out.push_str(&format!(" style=\"{}\"", escape(&format_style(style), true)));
                }
                out.push('>');
                if is_void(tag) {
                    return;
                }
                for child in &node.children {
                    self.html_into(*child, out);
                }
                out.push_str(&format!("</{tag}>"));
            }
        }
    }

    fn is_attached(&self, root: NodeId, mut id: NodeId) -> bool {
        loop {
            if id == root {
                return true;
            }
            match self.get(id).and_then(|n| n.parent) {
                Some(p) => id = p,
                None => return false,
            }
        }
    }
}

pub struct MemoryDom {
    arena: RwLock<Arena>,
    body: NodeId,
    viewport: Viewport,
    pinned: RwLock<HashMap<NodeId, Size>>,
}

impl MemoryDom {
    pub fn new(viewport: Viewport) -> Self {
        let mut arena = Arena { nodes: Vec::new() };
        let body = arena.element("body");
        Self {
            arena: RwLock::new(arena),
            body,
            viewport,
            pinned: RwLock::new(HashMap::new()),
        }
    }

    /// Document whose body holds the given markup.
    pub fn from_body_html(html: &str, viewport: Viewport) -> Self {
        let dom = Self::new(viewport);
        let nodes = markup::parse_fragment(html);
        dom.set_markup(dom.body, &nodes);
        dom
    }

    /// Force `measure` to report a fixed size for a node.
    pub fn pin_size(&self, node: NodeId, size: Size) {
        self.pinned.write().insert(node, size);
    }

    /// Children of a node, in document order.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.arena
            .read()
            .get(node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Attached elements carrying the given class.
    pub fn elements_with_class(&self, class: &str) -> Vec<NodeId> {
        let arena = self.arena.read();
        arena
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| match &n.kind {
                NodeKind::Element { attrs, .. } => attrs
                    .get("class")
                    .is_some_and(|c| c.split_whitespace().any(|x| x == class)),
                NodeKind::Text(_) => false,
            })
            .map(|(i, _)| NodeId(i))
            .filter(|id| arena.is_attached(self.body, *id))
            .collect()
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        self.arena.read().is_attached(self.body, node)
    }
}

impl TreeView for MemoryDom {
    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.arena.read().get(node)?.parent
    }

    fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.arena.read().get(node)?.children.first().copied()
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let arena = self.arena.read();
        let parent = arena.get(node)?.parent?;
        let siblings = &arena.get(parent)?.children;
        let index = siblings.iter().position(|c| *c == node)?;
        siblings.get(index + 1).copied()
    }

    fn node_type(&self, node: NodeId) -> Option<NodeType> {
        match self.arena.read().get(node)?.kind {
            NodeKind::Element { .. } => Some(NodeType::Element),
            NodeKind::Text(_) => Some(NodeType::Text),
        }
    }

    fn node_name(&self, node: NodeId) -> Option<String> {
        match &self.arena.read().get(node)?.kind {
            NodeKind::Element { tag, .. } => Some(tag.to_ascii_uppercase()),
            NodeKind::Text(_) => Some("#text".into()),
        }
    }
}

impl Dom for MemoryDom {
    fn body(&self) -> NodeId {
        self.body
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.arena.read().text_into(node, &mut out);
        out
    }

    fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.arena.read().html_into(node, &mut out);
        out
    }

    fn element_by_id(&self, id: &str) -> Option<NodeId> {
        let arena = self.arena.read();
        arena
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| match &n.kind {
                NodeKind::Element { attrs, .. } => attrs.get("id").is_some_and(|v| v == id),
                NodeKind::Text(_) => false,
            })
            .map(|(i, _)| NodeId(i))
            .find(|n| arena.is_attached(self.body, *n))
    }

    fn create_element(&self, tag: &str) -> NodeId {
        self.arena.write().element(tag)
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        match &self.arena.read().get(node)?.kind {
            NodeKind::Element { attrs, .. } => attrs.get(name).cloned(),
            NodeKind::Text(_) => None,
        }
    }

    fn set_attribute(&self, node: NodeId, name: &str, value: &str) {
        if let Some(NodeData {
            kind: NodeKind::Element { attrs, .. },
            ..
        }) = self.arena.write().nodes.get_mut(node.0)
        {
            attrs.insert(name.to_string(), value.to_string());
        }
    }

    fn style(&self, node: NodeId, property: &str) -> Option<String> {
        match &self.arena.read().get(node)?.kind {
            NodeKind::Element { style, .. } => style.get(property).cloned(),
            NodeKind::Text(_) => None,
        }
    }

    fn set_style(&self, node: NodeId, property: &str, value: &str) {
        if let Some(NodeData {
            kind: NodeKind::Element { style, .. },
            ..
        }) = self.arena.write().nodes.get_mut(node.0)
        {
            style.insert(property.to_string(), value.to_string());
        }
    }

    fn append_child(&self, parent: NodeId, child: NodeId) {
        self.arena.write().insert(parent, child, None);
    }

    fn insert_before(&self, parent: NodeId, child: NodeId, before: Option<NodeId>) {
        self.arena.write().insert(parent, child, before);
    }

    fn remove(&self, node: NodeId) {
        self.arena.write().detach(node);
    }

    fn set_text(&self, node: NodeId, text: &str) {
        let mut arena = self.arena.write();
        if arena.get(node).is_none() {
            return;
        }
        arena.clear_children(node);
        if !text.is_empty() {
            let text_id = arena.push(NodeKind::Text(text.to_string()));
            arena.insert(node, text_id, None);
        }
    }

    fn append_text(&self, node: NodeId, text: &str) {
        let mut arena = self.arena.write();
        let Some(data) = arena.get(node) else { return };
        // merge into a trailing text node so streaming does not fragment the tree
        if let Some(last) = data.children.last().copied() {
            if let NodeKind::Text(existing) = &mut arena.nodes[last.0].kind {
                existing.push_str(text);
                return;
            }
        }
        let text_id = arena.push(NodeKind::Text(text.to_string()));
        arena.insert(node, text_id, None);
    }

    fn set_markup(&self, node: NodeId, markup: &[MarkupNode]) {
        let mut arena = self.arena.write();
        if arena.get(node).is_none() {
            return;
        }
        arena.clear_children(node);
        for item in markup {
            let child = arena.build(item);
            arena.insert(node, child, None);
        }
    }

    fn replace_with_markup(&self, node: NodeId, markup: &[MarkupNode]) -> Vec<NodeId> {
        let mut arena = self.arena.write();
        let Some(parent) = arena.get(node).and_then(|n| n.parent) else {
            return Vec::new();
        };
        let inserted: Vec<NodeId> = markup
            .iter()
            .map(|item| {
                let id = arena.build(item);
                arena.insert(parent, id, Some(node));
                id
            })
            .collect();
        arena.detach(node);
        inserted
    }

    fn wrap_range(&self, range: &TextRange) -> Option<NodeId> {
        let mut arena = self.arena.write();
        let container = arena.get(range.container)?;
        let parent = container.parent?;
        let NodeKind::Text(text) = &container.kind else {
            return None;
        };
        let chars: Vec<char> = text.chars().collect();
        if range.start >= range.end || range.end > chars.len() {
            return None;
        }
        let before: String = chars[..range.start].iter().collect();
        let selected: String = chars[range.start..range.end].iter().collect();
        let after: String = chars[range.end..].iter().collect();

        let next = {
            let siblings = &arena.nodes[parent.0].children;
            let index = siblings.iter().position(|c| *c == range.container)?;
            siblings.get(index + 1).copied()
        };
        arena.detach(range.container);

        if !before.is_empty() {
            let id = arena.push(NodeKind::Text(before));
            arena.insert(parent, id, next);
        }
        let span = arena.element("span");
        let inner = arena.push(NodeKind::Text(selected));
        arena.insert(span, inner, None);
        arena.insert(parent, span, next);
        if !after.is_empty() {
            let id = arena.push(NodeKind::Text(after));
            arena.insert(parent, id, next);
        }
        Some(span)
    }

    fn measure(&self, node: NodeId) -> Option<Size> {
        if let Some(size) = self.pinned.read().get(&node) {
            return Some(*size);
        }
        if !self.is_attached(node) || self.style(node, "display").as_deref() == Some("none") {
            return None;
        }
        let chars = self.text_content(node).chars().count() as f64;
        let width = self
            .style(node, "width")
            .and_then(|w| w.trim_end_matches("px").parse::<f64>().ok())
            .unwrap_or_else(|| (chars * CHAR_WIDTH_PX).min(self.viewport.width));
        let per_line = ((width - BOX_PADDING_PX) / CHAR_WIDTH_PX).max(1.0);
        let lines = (chars / per_line).ceil().max(1.0);
        Some(Size {
            width,
            height: lines * LINE_HEIGHT_PX + BOX_PADDING_PX,
        })
    }
}

fn parse_style(raw: &str) -> BTreeMap<String, String> {
    raw.split(';')
        .filter_map(|decl| decl.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

fn format_style(style: &BTreeMap<String, String>) -> String {
    style
        .iter()
        .map(|(k, v)| format!("{k}: {v};"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape(s: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

fn is_void(tag: &str) -> bool {
    matches!(tag, "br" | "hr" | "img" | "input" | "meta" | "link" | "wbr")
}
