use serde::{Deserialize, Serialize};

use super::{Document, DomResult, NodeId};
use crate::error::DomError;

/// A position inside a text node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub node: NodeId,
    pub offset: usize,
}

impl Boundary {
    pub fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: Boundary,
    pub end: Boundary,
}

impl Range {
    pub fn new(start: Boundary, end: Boundary) -> Self {
        Self { start, end }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }

    /// Deepest node containing both boundaries.
    pub fn common_ancestor(&self, doc: &Document) -> Option<NodeId> {
        doc.closest(self.start.node, |d, candidate| {
            d.contains(candidate, self.end.node)
        })
    }

    /// Every text node the range touches, with the byte span covered in each,
    /// in document order. Empty spans are dropped.
    pub fn text_slices(&self, doc: &Document) -> DomResult<Vec<(NodeId, usize, usize)>> {
        for boundary in [self.start, self.end] {
            let len = doc
                .text(boundary.node)
                .ok_or(DomError::NotText(boundary.node))?
                .len();
            if boundary.offset > len {
                return Err(DomError::InvalidOffset {
                    node: boundary.node,
                    offset: boundary.offset,
                });
            }
        }

        let ancestor = self
            .common_ancestor(doc)
            .ok_or(DomError::Detached(self.start.node))?;
        let nodes = doc.text_nodes(ancestor);
        let first = nodes.iter().position(|n| *n == self.start.node);
        let last = nodes.iter().position(|n| *n == self.end.node);
        let (first, last) = match (first, last) {
            (Some(f), Some(l)) if f <= l => (f, l),
            _ => return Err(DomError::PartiallySelected),
        };

        let mut slices = Vec::new();
        for (index, node) in nodes[first..=last].iter().enumerate() {
            let len = doc.text(*node).map(str::len).unwrap_or(0);
            let start = if index == 0 { self.start.offset } else { 0 };
            let end = if first + index == last {
                self.end.offset
            } else {
                len
            };
            if start < end {
                slices.push((*node, start, end));
            }
        }
        Ok(slices)
    }

    /// The text the user sees as selected.
    pub fn to_text(&self, doc: &Document) -> String {
        match self.text_slices(doc) {
            Ok(slices) => slices
                .into_iter()
                .filter_map(|(node, start, end)| doc.text(node).and_then(|t| t.get(start..end)))
                .collect(),
            Err(_) => String::new(),
        }
    }
}

/// Axis-aligned rectangle in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// The active selection plus its bounding rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub range: Range,
    pub rect: Rect,
}
