//! Markup returned by the model: code-fence stripping and fragment parsing.

use scraper::{ElementRef, Html, Node};

/// Tags whose content is never swapped into the page.
const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "iframe"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupNode {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<MarkupNode>,
    },
    Text(String),
}

impl MarkupNode {
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn is_blank(&self) -> bool {
        matches!(self, MarkupNode::Text(t) if t.trim().is_empty())
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            MarkupNode::Text(t) => out.push_str(t),
            MarkupNode::Element { children, .. } => {
                for child in children {
                    child.collect_text(out);
                }
            }
        }
    }
}

pub fn text_of(nodes: &[MarkupNode]) -> String {
    nodes.iter().map(MarkupNode::text).collect()
}

/// Models like to wrap markup in ```html fences; keep only the fenced body.
pub fn strip_code_fence(raw: &str) -> String {
    let raw = raw.trim();
    let body = if let Some((_, rest)) = raw.split_once("```html") {
        rest.split("```").next().unwrap_or(rest)
    } else if let Some((_, rest)) = raw.split_once("```") {
        rest.split("```").next().unwrap_or(rest)
    } else {
        raw
    };
    body.trim().to_string()
}

/// Parse an HTML fragment into owned nodes. Whitespace between inline
/// elements is kept; blank text at either end of the fragment is not.
pub fn parse_fragment(html: &str) -> Vec<MarkupNode> {
    let fragment = Html::parse_fragment(html);
    let mut nodes = convert_children(fragment.root_element());
    while nodes.first().is_some_and(MarkupNode::is_blank) {
        nodes.remove(0);
    }
    while nodes.last().is_some_and(MarkupNode::is_blank) {
        nodes.pop();
    }
    nodes
}

fn convert_children(el: ElementRef<'_>) -> Vec<MarkupNode> {
    let mut children = Vec::new();
    for child in el.children() {
        match child.value() {
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    if let Some(node) = convert_element(child_el) {
                        children.push(node);
                    }
                }
            }
            Node::Text(t) => children.push(MarkupNode::Text(t.text.to_string())),
            _ => {}
        }
    }
    children
}

fn convert_element(el: ElementRef<'_>) -> Option<MarkupNode> {
    let tag = el.value().name.local.as_ref().to_string();
    if SKIP_TAGS.contains(&tag.as_str()) {
        return None;
    }
    let attrs = el
        .value()
        .attrs()
        .filter(|(k, _)| !k.starts_with("on"))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Some(MarkupNode::Element {
        tag,
        attrs,
        children: convert_children(el),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_html_fence() {
        let raw = "Here you go:\n```html\n<p>你好</p>\n```\nDone.";
        assert_eq!(strip_code_fence(raw), "<p>你好</p>");
    }

    #[test]
    fn strips_bare_fence() {
        assert_eq!(strip_code_fence("```\n<p>x</p>\n```"), "<p>x</p>");
        assert_eq!(strip_code_fence("  <p>x</p> "), "<p>x</p>");
    }

    #[test]
    fn parses_nested_fragment_and_keeps_attributes() {
        let nodes = parse_fragment(r#"<p class="lead">你好<b>世界</b></p>"#);
        assert_eq!(nodes.len(), 1);
        match &nodes[0] {
            MarkupNode::Element { tag, attrs, children } => {
                assert_eq!(tag, "p");
                assert_eq!(attrs, &vec![("class".to_string(), "lead".to_string())]);
                assert_eq!(children.len(), 2);
            }
            other => panic!("expected element, got {other:?}"),
        }
        assert_eq!(text_of(&nodes), "你好世界");
    }

    #[test]
    fn drops_scripts_and_event_handlers() {
        let nodes = parse_fragment(r#"<p onclick="x()">ok<script>alert(1)</script></p>"#);
        match &nodes[0] {
            MarkupNode::Element { attrs, children, .. } => {
                assert!(attrs.is_empty());
                assert_eq!(children, &vec![MarkupNode::Text("ok".into())]);
            }
            other => panic!("expected element, got {other:?}"),
        }
    }

    #[test]
    fn spaces_between_inline_elements_survive() {
        let nodes = parse_fragment("\n  <p><b>Bonjour</b> <i>monde</i></p>\n");
        assert_eq!(nodes.len(), 1);
        assert_eq!(text_of(&nodes), "Bonjour monde");
    }

    #[test]
    fn ruby_markup_survives_parsing() {
        let nodes = parse_fragment("<ruby>漢<rt>かん</rt></ruby><ruby>字<rt>じ</rt></ruby>");
        assert_eq!(nodes.len(), 2);
        assert_eq!(text_of(&nodes), "漢かん字じ");
    }
}
