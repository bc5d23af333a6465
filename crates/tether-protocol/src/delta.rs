//! Field-level updates for shared objects.

use serde::{Deserialize, Serialize};

use crate::FieldTag;

/// One pending change: a field's order tag and its newly serialized value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSegment {
    /// Order tag of the changed field.
    pub tag: FieldTag,
    /// The field's new value, already serialized.
    pub value: Vec<u8>,
}

impl DeltaSegment {
    /// Creates a segment.
    pub fn new(tag: FieldTag, value: Vec<u8>) -> Self {
        Self { tag, value }
    }
}

/// Collapses segments so each tag appears once, keeping the last value
/// written for it.
///
/// A tag keeps the position of its first occurrence.
pub fn coalesce(segments: Vec<DeltaSegment>) -> Vec<DeltaSegment> {
    let mut out: Vec<DeltaSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        match out.iter_mut().find(|s| s.tag == segment.tag) {
            Some(existing) => existing.value = segment.value,
            None => out.push(segment),
        }
    }
    out
}
