//! Text surface: the mutable tree of text-bearing nodes being annotated
//!
//! The surface is the host-side structure highlights are overlaid onto. The
//! renderer's only side effect on it is inserting and dissolving wrapper
//! elements; text mutation belongs to the editor that owns the surface.
//!
//! Nodes live in an append-only arena: removal detaches a node without
//! reclaiming its slot, so a [`NodeId`] held across passes can never silently
//! come to point at a different node. Attachment checks stay unambiguous.

pub mod index;
pub mod mapper;
pub mod renderer;

use crate::error::{ChromaError, Result};

/// Handle to a node in a [`TextSurface`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// What a node carries
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Container node; wrappers are elements with a renderer-chosen label
    Element { label: String },

    /// Leaf carrying text content
    Text { content: String },
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

/// A tree of text-bearing nodes with a single root element
#[derive(Debug, Clone)]
pub struct TextSurface {
    nodes: Vec<Node>,
    root: NodeId,
}

impl TextSurface {
    /// Create an empty surface (a bare root element)
    pub fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            kind: NodeKind::Element {
                label: "root".to_string(),
            },
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    /// Create a surface holding a single text node
    pub fn with_text(text: impl Into<String>) -> Self {
        let mut surface = Self::new();
        let root = surface.root;
        // Root always exists; this cannot fail.
        let _ = surface.append_text(root, text);
        surface
    }

    /// The root element
    pub fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| ChromaError::Surface(format!("unknown node {}", id.0)))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .ok_or_else(|| ChromaError::Surface(format!("unknown node {}", id.0)))
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Append a text node under `parent`
    pub fn append_text(&mut self, parent: NodeId, content: impl Into<String>) -> Result<NodeId> {
        self.ensure_element(parent)?;
        let id = self.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            kind: NodeKind::Text {
                content: content.into(),
            },
        });
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Append an element node under `parent`
    pub fn append_element(&mut self, parent: NodeId, label: impl Into<String>) -> Result<NodeId> {
        self.ensure_element(parent)?;
        let id = self.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            kind: NodeKind::Element {
                label: label.into(),
            },
        });
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    fn ensure_element(&self, id: NodeId) -> Result<()> {
        match &self.node(id)?.kind {
            NodeKind::Element { .. } => Ok(()),
            NodeKind::Text { .. } => Err(ChromaError::Surface(
                "text nodes cannot have children".to_string(),
            )),
        }
    }

    /// The node's kind, if the id is known
    pub fn node_kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(id.0).map(|node| &node.kind)
    }

    /// An element node's label
    pub fn node_label(&self, id: NodeId) -> Option<&str> {
        match self.node_kind(id)? {
            NodeKind::Element { label } => Some(label),
            NodeKind::Text { .. } => None,
        }
    }

    /// A text node's content
    pub fn node_text(&self, id: NodeId) -> Option<&str> {
        match self.node_kind(id)? {
            NodeKind::Text { content } => Some(content),
            NodeKind::Element { .. } => None,
        }
    }

    /// Replace a text node's content (editing helper for the surface owner)
    pub fn set_node_text(&mut self, id: NodeId, content: impl Into<String>) -> Result<()> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Text { content: current } => {
                *current = content.into();
                Ok(())
            }
            NodeKind::Element { .. } => Err(ChromaError::Surface(
                "cannot set text on an element node".to_string(),
            )),
        }
    }

    /// Whether the node is still reachable from the root
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.root {
                return true;
            }
            match self.nodes.get(current.0).and_then(|node| node.parent) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Concatenated text of the whole surface, in document order
    pub fn text_content(&self) -> String {
        self.text_content_under(self.root)
    }

    /// Concatenated text under `id`, in document order
    pub fn text_content_under(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let Ok(node) = self.node(id) else { return };
        match &node.kind {
            NodeKind::Text { content } => out.push_str(content),
            NodeKind::Element { .. } => {
                for child in &node.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// All text nodes under the root, in document order (including empty ones)
    pub fn text_nodes(&self) -> Vec<NodeId> {
        self.text_nodes_under(self.root)
    }

    /// All text nodes under `id`, in document order
    pub fn text_nodes_under(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_text_nodes(id, &mut out);
        out
    }

    fn collect_text_nodes(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let Ok(node) = self.node(id) else { return };
        match &node.kind {
            NodeKind::Text { .. } => out.push(id),
            NodeKind::Element { .. } => {
                for child in &node.children {
                    self.collect_text_nodes(*child, out);
                }
            }
        }
    }

    /// Split a text node at `offset` (characters, exclusive of the ends);
    /// returns the new tail node inserted as the next sibling
    pub fn split_text(&mut self, id: NodeId, offset: usize) -> Result<NodeId> {
        let (content, parent) = match self.node(id)? {
            Node {
                kind: NodeKind::Text { content },
                parent: Some(parent),
                ..
            } => (content.clone(), *parent),
            Node {
                kind: NodeKind::Text { .. },
                parent: None,
                ..
            } => {
                return Err(ChromaError::Surface(
                    "cannot split a detached text node".to_string(),
                ))
            }
            _ => {
                return Err(ChromaError::Surface(
                    "cannot split an element node".to_string(),
                ))
            }
        };

        let char_len = content.chars().count();
        if offset == 0 || offset >= char_len {
            return Err(ChromaError::Surface(format!(
                "split offset {offset} outside (0, {char_len})"
            )));
        }
        let byte_offset = content
            .char_indices()
            .nth(offset)
            .map(|(byte, _)| byte)
            .unwrap_or(content.len());
        let head = content[..byte_offset].to_string();
        let tail = content[byte_offset..].to_string();

        self.set_node_text(id, head)?;
        let tail_id = self.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            kind: NodeKind::Text { content: tail },
        });
        let parent_node = self.node_mut(parent)?;
        let position = parent_node
            .children
            .iter()
            .position(|child| *child == id)
            .ok_or_else(|| ChromaError::Surface("text node missing from parent".to_string()))?;
        parent_node.children.insert(position + 1, tail_id);
        Ok(tail_id)
    }

    /// Wrap the character range `[start, end)` of a text node in a new
    /// element, splitting the node as needed; returns the wrapper
    pub fn wrap_text_range(
        &mut self,
        text_node: NodeId,
        start: usize,
        end: usize,
        label: &str,
    ) -> Result<NodeId> {
        let char_len = self
            .node_text(text_node)
            .ok_or_else(|| ChromaError::Surface("wrap target is not a text node".to_string()))?
            .chars()
            .count();
        if start >= end || end > char_len {
            return Err(ChromaError::Surface(format!(
                "wrap range {start}..{end} outside text of length {char_len}"
            )));
        }

        // Split the tail first so the head offsets stay valid.
        if end < char_len {
            self.split_text(text_node, end)?;
        }
        let target = if start > 0 {
            self.split_text(text_node, start)?
        } else {
            text_node
        };

        let parent = self
            .node(target)?
            .parent
            .ok_or_else(|| ChromaError::Surface("wrap target has no parent".to_string()))?;
        let wrapper = self.push(Node {
            parent: Some(parent),
            children: vec![target],
            kind: NodeKind::Element {
                label: label.to_string(),
            },
        });
        let parent_node = self.node_mut(parent)?;
        let position = parent_node
            .children
            .iter()
            .position(|child| *child == target)
            .ok_or_else(|| ChromaError::Surface("wrap target missing from parent".to_string()))?;
        parent_node.children[position] = wrapper;
        self.node_mut(target)?.parent = Some(wrapper);
        Ok(wrapper)
    }

    /// Dissolve a wrapper element, hoisting its children into its place;
    /// the wrapped text is preserved
    pub fn unwrap(&mut self, wrapper: NodeId) -> Result<()> {
        if wrapper == self.root {
            return Err(ChromaError::Surface("cannot unwrap the root".to_string()));
        }
        let (parent, children) = match self.node(wrapper)? {
            Node {
                kind: NodeKind::Element { .. },
                parent: Some(parent),
                children,
                ..
            } => (*parent, children.clone()),
            Node {
                kind: NodeKind::Element { .. },
                parent: None,
                ..
            } => {
                return Err(ChromaError::Surface(
                    "wrapper is already detached".to_string(),
                ))
            }
            _ => {
                return Err(ChromaError::Surface(
                    "cannot unwrap a text node".to_string(),
                ))
            }
        };

        let parent_node = self.node_mut(parent)?;
        let position = parent_node
            .children
            .iter()
            .position(|child| *child == wrapper)
            .ok_or_else(|| ChromaError::Surface("wrapper missing from parent".to_string()))?;
        parent_node
            .children
            .splice(position..=position, children.iter().copied());
        for child in &children {
            self.node_mut(*child)?.parent = Some(parent);
        }
        let wrapper_node = self.node_mut(wrapper)?;
        wrapper_node.parent = None;
        wrapper_node.children.clear();
        Ok(())
    }
}

impl Default for TextSurface {
    fn default() -> Self {
        Self::new()
    }
}

/// Character-index slice of `text`, clamped to its length
pub fn char_slice(text: &str, start: usize, end: usize) -> String {
    if end <= start {
        return String::new();
    }
    text.chars().skip(start).take(end - start).collect()
}
