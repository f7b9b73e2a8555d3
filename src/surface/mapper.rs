//! Range mapping: global character offsets to concrete surface segments
//!
//! A requested range can straddle several text nodes; since one wrapper
//! cannot span two existing nodes without restructuring them, the mapper
//! yields one segment per underlying node so each can be wrapped on its own.

use super::index::TextNodeIndex;
use super::{char_slice, NodeId, TextSurface};

/// One end of a mapped range: a node plus a local character offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeEndpoint {
    pub node: NodeId,
    pub offset: usize,
}

/// A sub-range local to a single text node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSegment {
    pub node: NodeId,

    /// Local start offset, inclusive
    pub start: usize,

    /// Local end offset, exclusive
    pub end: usize,
}

/// A concrete, traversable mapping of a global range onto the surface
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRange {
    pub start: RangeEndpoint,
    pub end: RangeEndpoint,
    pub segments: Vec<RangeSegment>,
}

/// Map the global range `[start, end)` onto indexed surface nodes
///
/// Out-of-bounds offsets are clamped into `[0, total_len]`; a range that is
/// empty after clamping maps to `None`. Never panics.
pub fn map_range(index: &TextNodeIndex, start: usize, end: usize) -> Option<MappedRange> {
    let total = index.total_len();
    let start = start.min(total);
    let end = end.min(total);
    if end <= start {
        return None;
    }

    let mut segments = Vec::new();
    for entry in index.entries() {
        if entry.end <= start {
            continue;
        }
        if entry.start >= end {
            break;
        }
        segments.push(RangeSegment {
            node: entry.node,
            start: start.max(entry.start) - entry.start,
            end: end.min(entry.end) - entry.start,
        });
    }

    let first = segments.first()?;
    let last = segments.last()?;
    Some(MappedRange {
        start: RangeEndpoint {
            node: first.node,
            offset: first.start,
        },
        end: RangeEndpoint {
            node: last.node,
            offset: last.end,
        },
        segments,
    })
}

/// Read the text a mapped range covers, in segment order
pub fn read_range(surface: &TextSurface, range: &MappedRange) -> String {
    range
        .segments
        .iter()
        .map(|segment| {
            surface
                .node_text(segment.node)
                .map(|text| char_slice(text, segment.start, segment.end))
                .unwrap_or_default()
        })
        .collect()
}
