//! Text-node indexing: global character-offset windows over the surface
//!
//! Flattens the surface tree into an ordered list of `{node, start, end}`
//! windows with cumulative offsets. The index is rebuilt per render pass and
//! discarded afterwards; it never outlives a structural mutation.

use super::{NodeId, TextSurface};

/// One text node's window in global character offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextNodeIndexEntry {
    /// The text node
    pub node: NodeId,

    /// Global start offset, inclusive
    pub start: usize,

    /// Global end offset, exclusive
    pub end: usize,
}

/// Ordered offset index of the text nodes under a root
#[derive(Debug, Clone, Default)]
pub struct TextNodeIndex {
    entries: Vec<TextNodeIndexEntry>,
    total_len: usize,
}

impl TextNodeIndex {
    /// Build an index of the text windows under `root`
    ///
    /// Zero-length text nodes are skipped. A missing root yields an empty
    /// index rather than an error. The indexed total always equals the
    /// concatenated length of the included node contents.
    pub fn build(surface: &TextSurface, root: Option<NodeId>) -> Self {
        let Some(root) = root else {
            return Self::default();
        };

        let mut entries = Vec::new();
        let mut cursor = 0usize;
        for node in surface.text_nodes_under(root) {
            let len = surface
                .node_text(node)
                .map(|text| text.chars().count())
                .unwrap_or(0);
            if len == 0 {
                continue;
            }
            entries.push(TextNodeIndexEntry {
                node,
                start: cursor,
                end: cursor + len,
            });
            cursor += len;
        }

        let index = Self {
            entries,
            total_len: cursor,
        };
        debug_assert_eq!(
            index.total_len,
            surface.text_content_under(root).chars().count(),
            "indexed length must equal concatenated text length"
        );
        index
    }

    /// The indexed windows in document order
    pub fn entries(&self) -> &[TextNodeIndexEntry] {
        &self.entries
    }

    /// Total indexed length in characters
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// Whether no text was indexed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry whose window contains the global `offset`
    pub fn entry_at(&self, offset: usize) -> Option<&TextNodeIndexEntry> {
        let position = self.entries.partition_point(|entry| entry.end <= offset);
        self.entries
            .get(position)
            .filter(|entry| entry.start <= offset)
    }
}
