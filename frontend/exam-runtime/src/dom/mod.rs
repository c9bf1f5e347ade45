//! Arena document tree the highlight engine manipulates.
//!
//! Node ids stay valid after a node is detached; detached subtrees are simply
//! unreachable from the root. [`Document::remove`] is the exception: it hands
//! the subtree's slots back for reuse. Text offsets are byte offsets and must
//! fall on char boundaries.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::DomError;

mod html;
mod range;

pub use range::{Boundary, Range, Rect, Selection};

pub type DomResult<T> = Result<T, DomError>;

/// Handle shared between the host and the runtime's timer callbacks.
pub type SharedDocument = Arc<Mutex<Document>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeData {
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    selection: Option<Selection>,
    free: Vec<usize>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            data: NodeData::Element {
                tag: "body".to_string(),
                attributes: BTreeMap::new(),
            },
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            selection: None,
            free: Vec::new(),
        }
    }

    pub fn into_shared(self) -> SharedDocument {
        Arc::new(Mutex::new(self))
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> DomResult<&Node> {
        self.nodes.get(id.0).ok_or(DomError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> DomResult<&mut Node> {
        self.nodes.get_mut(id.0).ok_or(DomError::NodeNotFound(id))
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_node(NodeData::Element {
            tag: tag.to_string(),
            attributes: BTreeMap::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(NodeData::Text(text.to_string()))
    }

    fn push_node(&mut self, data: NodeData) -> NodeId {
        let node = Node {
            parent: None,
            children: Vec::new(),
            data,
        };
        if let Some(slot) = self.free.pop() {
            self.nodes[slot] = node;
            return NodeId(slot);
        }
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Nodes currently allocated, attached or not.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.nodes.get(id.0)?.data {
            NodeData::Element { tag, .. } => Some(tag.as_str()),
            NodeData::Text(_) => None,
        }
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(
            self.nodes.get(id.0).map(|n| &n.data),
            Some(NodeData::Text(_))
        )
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes.get(id.0)?.data {
            NodeData::Text(text) => Some(text.as_str()),
            NodeData::Element { .. } => None,
        }
    }

    pub fn set_text(&mut self, id: NodeId, value: &str) -> DomResult<()> {
        match &mut self.node_mut(id)?.data {
            NodeData::Text(text) => {
                *text = value.to_string();
                Ok(())
            }
            NodeData::Element { .. } => Err(DomError::NotText(id)),
        }
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.nodes.get(id.0)?.data {
            NodeData::Element { attributes, .. } => attributes.get(name).map(String::as_str),
            NodeData::Text(_) => None,
        }
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> DomResult<()> {
        match &mut self.node_mut(id)?.data {
            NodeData::Element { attributes, .. } => {
                attributes.insert(name.to_string(), value.to_string());
                Ok(())
            }
            NodeData::Text(_) => Err(DomError::NotElement(id)),
        }
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> DomResult<()> {
        if let NodeData::Element { attributes, .. } = &mut self.node_mut(id)?.data {
            attributes.remove(name);
        }
        Ok(())
    }

    /// Concatenated text of `id` and its descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        for node in self.descendants(id) {
            if let Some(text) = self.text(node) {
                out.push_str(text);
            }
        }
        out
    }

    /// Pre-order walk of `id` and everything below it.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if current.0 >= self.nodes.len() {
                continue;
            }
            out.push(current);
            for child in self.children(current).iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Text nodes below `id` in document order, the tree-walker equivalent.
    pub fn text_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|n| self.is_text(*n))
            .collect()
    }

    /// Inclusive: a node contains itself.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Nearest inclusive ancestor matching `predicate`.
    pub fn closest<F>(&self, node: NodeId, predicate: F) -> Option<NodeId>
    where
        F: Fn(&Document, NodeId) -> bool,
    {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if predicate(self, current) {
                return Some(current);
            }
            cursor = self.parent(current);
        }
        None
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        self.contains(self.root, node)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<()> {
        let len = self.children(parent).len();
        self.insert_child_at(parent, child, len)
    }

    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: NodeId,
    ) -> DomResult<()> {
        let index = self
            .index_in_parent(reference)
            .filter(|_| self.parent(reference) == Some(parent))
            .ok_or(DomError::Detached(reference))?;
        self.insert_child_at(parent, child, index)
    }

    fn insert_child_at(&mut self, parent: NodeId, child: NodeId, index: usize) -> DomResult<()> {
        if self.is_text(parent) {
            return Err(DomError::NotElement(parent));
        }
        self.node(child)?;
        if self.contains(child, parent) {
            return Err(DomError::HierarchyRequest(child));
        }
        let mut index = index;
        if let Some(old_parent) = self.parent(child) {
            if old_parent == parent {
                if let Some(old_index) = self.index_in_parent(child) {
                    if old_index < index {
                        index -= 1;
                    }
                }
            }
            self.detach(child)?;
        }
        let siblings = &mut self.node_mut(parent)?.children;
        let index = index.min(siblings.len());
        siblings.insert(index, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    pub fn detach(&mut self, node: NodeId) -> DomResult<()> {
        if let Some(parent) = self.parent(node) {
            self.node_mut(parent)?.children.retain(|c| *c != node);
            self.node_mut(node)?.parent = None;
        }
        Ok(())
    }

    /// Detaches `node` and releases every id in its subtree for reuse. A
    /// selection touching the subtree is cleared. Ids below `node` must not
    /// be used afterwards.
    pub fn remove(&mut self, node: NodeId) -> DomResult<()> {
        if node == self.root {
            return Err(DomError::HierarchyRequest(node));
        }
        if self.free.contains(&node.0) {
            return Err(DomError::NodeNotFound(node));
        }
        self.node(node)?;
        self.detach(node)?;

        let released = self.descendants(node);
        let selection_released = self.selection.as_ref().is_some_and(|selection| {
            released.contains(&selection.range.start.node)
                || released.contains(&selection.range.end.node)
        });
        if selection_released {
            self.selection = None;
        }
        for id in released {
            if let Some(slot) = self.nodes.get_mut(id.0) {
                slot.parent = None;
                slot.children.clear();
                slot.data = NodeData::Text(String::new());
            }
            self.free.push(id.0);
        }
        Ok(())
    }

    pub fn index_in_parent(&self, node: NodeId) -> Option<usize> {
        let parent = self.parent(node)?;
        self.children(parent).iter().position(|c| *c == node)
    }

    /// Splits a text node at `offset`; the original keeps the head, the
    /// returned node holds the tail and is inserted right after it.
    pub fn split_text(&mut self, node: NodeId, offset: usize) -> DomResult<NodeId> {
        let text = self.text(node).ok_or(DomError::NotText(node))?.to_string();
        if offset > text.len() || !text.is_char_boundary(offset) {
            return Err(DomError::InvalidOffset { node, offset });
        }
        let (head, tail) = text.split_at(offset);
        let tail_node = self.create_text(tail);
        self.set_text(node, head)?;
        if let Some(parent) = self.parent(node) {
            let index = self.index_in_parent(node).unwrap_or(0);
            self.insert_child_at(parent, tail_node, index + 1)?;
        }
        Ok(tail_node)
    }

    /// Wraps the part of a single text node covered by `range` in `wrapper`.
    ///
    /// Like the browser's `surroundContents`, this fails when the range
    /// starts and ends in different nodes.
    pub fn surround_contents(&mut self, range: &Range, wrapper: NodeId) -> DomResult<()> {
        if range.is_collapsed() {
            return Err(DomError::EmptyRange);
        }
        if range.start.node != range.end.node {
            return Err(DomError::PartiallySelected);
        }
        self.wrap_text_slice(range.start.node, range.start.offset, range.end.offset, wrapper)
    }

    /// Wraps `[start, end)` of one text node in `wrapper`.
    pub fn wrap_text_slice(
        &mut self,
        node: NodeId,
        start: usize,
        end: usize,
        wrapper: NodeId,
    ) -> DomResult<()> {
        let len = self.text(node).ok_or(DomError::NotText(node))?.len();
        if start >= end || end > len {
            return Err(DomError::InvalidOffset { node, offset: end });
        }
        let parent = self.parent(node).ok_or(DomError::Detached(node))?;

        let target = if start > 0 {
            self.split_text(node, start)?
        } else {
            node
        };
        if end - start < self.text(target).map(str::len).unwrap_or(0) {
            self.split_text(target, end - start)?;
        }

        self.insert_before(parent, wrapper, target)?;
        self.append_child(wrapper, target)?;
        Ok(())
    }

    /// Replaces an element by its children, then re-joins the text around it.
    pub fn unwrap(&mut self, element: NodeId) -> DomResult<()> {
        let parent = self.parent(element).ok_or(DomError::Detached(element))?;
        let children: Vec<NodeId> = self.children(element).to_vec();
        for child in children {
            self.insert_before(parent, child, element)?;
        }
        self.remove(element)?;
        self.normalize(parent);
        Ok(())
    }

    /// Merges adjacent text nodes and drops empty ones below `id`.
    pub fn normalize(&mut self, id: NodeId) {
        let children: Vec<NodeId> = self.children(id).to_vec();
        let mut previous_text: Option<NodeId> = None;
        for child in children {
            if let Some(text) = self.text(child).map(str::to_string) {
                if text.is_empty() {
                    let _ = self.remove(child);
                    continue;
                }
                if let Some(prev) = previous_text {
                    let merged = format!("{}{}", self.text(prev).unwrap_or_default(), text);
                    let _ = self.set_text(prev, &merged);
                    let _ = self.remove(child);
                    continue;
                }
                previous_text = Some(child);
            } else {
                previous_text = None;
                self.normalize(child);
            }
        }
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection;
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Selects `[start, end)` of a text node. The bounding rectangle is
    /// supplied by the host, which owns layout.
    pub fn select_text(
        &mut self,
        node: NodeId,
        start: usize,
        end: usize,
        rect: Rect,
    ) -> DomResult<()> {
        let len = self.text(node).ok_or(DomError::NotText(node))?.len();
        if start > end || end > len {
            return Err(DomError::InvalidOffset { node, offset: end });
        }
        self.selection = Some(Selection {
            range: Range::new(Boundary::new(node, start), Boundary::new(node, end)),
            rect,
        });
        Ok(())
    }

    /// Finds the first element carrying `name="value"` below `root`.
    pub fn find_by_attribute(&self, root: NodeId, name: &str, value: &str) -> Option<NodeId> {
        self.descendants(root)
            .into_iter()
            .find(|n| self.attribute(*n, name) == Some(value))
    }

    /// Elements with the given tag below `root`, in document order.
    pub fn elements_by_tag(&self, root: NodeId, tag: &str) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|n| self.tag(*n) == Some(tag))
            .collect()
    }
}
