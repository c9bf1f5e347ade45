//! Passage markup in and out of the arena.
//!
//! Parsing goes through `scraper` (html5ever), so entities, comments and
//! malformed nesting behave as they do in a browser. Serialization is the
//! minimal form the highlight marks need.

use scraper::{Html, Node};

use super::{Document, NodeId};

const VOID_ELEMENTS: &[&str] = &["br", "hr", "img", "input", "source", "wbr"];

impl Document {
    pub fn from_html(markup: &str) -> Self {
        let mut doc = Document::new();
        let root = doc.root();
        doc.append_html(root, markup);
        doc
    }

    /// Parses `markup` as a body fragment and appends the resulting nodes to
    /// `parent`. Comments, doctypes and processing instructions are dropped.
    pub fn append_html(&mut self, parent: NodeId, markup: &str) {
        let fragment = Html::parse_fragment(markup);
        let mut pending: Vec<(NodeId, _)> = fragment
            .root_element()
            .children()
            .rev()
            .map(|child| (parent, child))
            .collect();

        while let Some((target, source)) = pending.pop() {
            match source.value() {
                Node::Text(text) => self.append_text(target, text),
                Node::Element(element) => {
                    let id = self.create_element(element.name());
                    for (key, value) in element.attrs() {
                        let _ = self.set_attribute(id, key, value);
                    }
                    if self.append_child(target, id).is_err() {
                        let _ = self.remove(id);
                        continue;
                    }
                    pending.extend(source.children().rev().map(|child| (id, child)));
                }
                _ => {}
            }
        }
    }

    fn append_text(&mut self, parent: NodeId, text: &str) {
        if text.is_empty() {
            return;
        }
        let node = self.create_text(text);
        if self.append_child(parent, node).is_err() {
            let _ = self.remove(node);
        }
    }

    /// Serialized children of `node`.
    pub fn inner_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(node) {
            self.write_node(*child, &mut out);
        }
        out
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_node(node, &mut out);
        out
    }

    fn write_node(&self, node: NodeId, out: &mut String) {
        if let Some(text) = self.text(node) {
            out.push_str(&encode_entities(text));
            return;
        }
        let Some(tag) = self.tag(node) else {
            return;
        };
        out.push('<');
        out.push_str(tag);
        if let Some(super::NodeData::Element { attributes, .. }) =
            self.nodes.get(node.0).map(|n| &n.data)
        {
            for (key, value) in attributes {
                out.push_str(&format!(" {}=\"{}\"", key, encode_entities(value)));
            }
        }
        out.push('>');
        if VOID_ELEMENTS.contains(&tag) {
            return;
        }
        for child in self.children(node) {
            self.write_node(*child, out);
        }
        out.push_str(&format!("</{}>", tag));
    }
}

fn encode_entities(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
