//! Host page DOM collaborator.
//! `TreeView` is the read-only capability set (parent, next sibling, node
//! type) the tree-walking helpers need; `Dom` adds the narrow write surface
//! the pipeline and overlay manager use. `MemoryDom` implements both for
//! headless hosts and tests.

pub mod markup;
pub mod memory;

pub use markup::MarkupNode;
pub use memory::MemoryDom;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Element,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

/// Character offsets `[start, end)` inside a text node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRange {
    pub container: NodeId,
    pub start: usize,
    pub end: usize,
}

/// Where a new sibling goes: under `parent`, before `before` (append if None).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertPosition {
    pub parent: NodeId,
    pub before: Option<NodeId>,
}

pub trait TreeView {
    fn parent(&self, node: NodeId) -> Option<NodeId>;
    fn first_child(&self, node: NodeId) -> Option<NodeId>;
    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;
    fn node_type(&self, node: NodeId) -> Option<NodeType>;
    /// Upper-case tag name for elements, `#text` for text nodes.
    fn node_name(&self, node: NodeId) -> Option<String>;
}

pub trait Dom: TreeView + Send + Sync {
    fn body(&self) -> NodeId;
    fn viewport(&self) -> Viewport;

    fn text_content(&self, node: NodeId) -> String;
    fn outer_html(&self, node: NodeId) -> String;
    /// Element with the given `id` attribute that is attached to the document.
    fn element_by_id(&self, id: &str) -> Option<NodeId>;

    /// Detached element.
    fn create_element(&self, tag: &str) -> NodeId;
    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;
    fn set_attribute(&self, node: NodeId, name: &str, value: &str);
    fn style(&self, node: NodeId, property: &str) -> Option<String>;
    fn set_style(&self, node: NodeId, property: &str, value: &str);

    fn append_child(&self, parent: NodeId, child: NodeId);
    fn insert_before(&self, parent: NodeId, child: NodeId, before: Option<NodeId>);
    fn remove(&self, node: NodeId);

    /// Replace all children with one text node.
    fn set_text(&self, node: NodeId, text: &str);
    fn append_text(&self, node: NodeId, text: &str);
    /// Replace all children with the given markup.
    fn set_markup(&self, node: NodeId, markup: &[MarkupNode]);
    /// Replace `node` itself with the given markup; returns the new top-level nodes.
    fn replace_with_markup(&self, node: NodeId, markup: &[MarkupNode]) -> Vec<NodeId>;
    /// Split the range's text node and wrap the selected part in a `<span>`.
    fn wrap_range(&self, range: &TextRange) -> Option<NodeId>;

    /// Laid-out size of an element, if it is rendered.
    fn measure(&self, node: NodeId) -> Option<Size>;

    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }
}

/// The element owning a selection's start container.
pub fn target_element<T: TreeView + ?Sized>(tree: &T, container: NodeId) -> Option<NodeId> {
    match tree.node_type(container)? {
        NodeType::Element => Some(container),
        NodeType::Text => tree
            .parent(container)
            .filter(|p| tree.node_type(*p) == Some(NodeType::Element)),
    }
}

/// Nearest inclusive ancestor whose tag matches `tag` (case-insensitive).
pub fn closest<T: TreeView + ?Sized>(tree: &T, node: NodeId, tag: &str) -> Option<NodeId> {
    let mut current = Some(node);
    while let Some(n) = current {
        if tree.node_type(n) == Some(NodeType::Element)
            && tree
                .node_name(n)
                .is_some_and(|name| name.eq_ignore_ascii_case(tag))
        {
            return Some(n);
        }
        current = tree.parent(n);
    }
    None
}

/// Insertion point for a translation block following `start`.
/// For a text node, the block goes after the next `<br>` sibling when one
/// precedes the next text node; otherwise right after `start`.
pub fn find_insert_position<T: TreeView + ?Sized>(tree: &T, start: NodeId) -> Option<InsertPosition> {
    let mut anchor = start;

    if tree.node_type(start) == Some(NodeType::Text) {
        let mut sibling = tree.next_sibling(start);
        while let Some(s) = sibling {
            if tree.node_name(s).as_deref() == Some("BR") {
                anchor = s;
                break;
            }
            if tree.node_type(s) == Some(NodeType::Text) {
                break;
            }
            sibling = tree.next_sibling(s);
        }
    }

    let parent = tree.parent(anchor)?;
    Some(InsertPosition {
        parent,
        before: tree.next_sibling(anchor),
    })
}

/// Whether the selection covers the whole element text (whitespace-insensitive).
pub fn is_entire_paragraph(paragraph_text: &str, selected: &str) -> bool {
    let collapse = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    let paragraph = collapse(paragraph_text);
    !paragraph.is_empty() && paragraph == collapse(selected)
}
