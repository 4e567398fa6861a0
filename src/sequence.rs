//! An ordered collection of (note, beat) events on a fixed-resolution grid.
//! Kept sorted by beat; ties keep insertion order so simultaneous events
//! replay in the order they were recorded.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceNote {
    pub note: String,
    pub beat: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sequence {
    items: Vec<SequenceNote>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping beat order; equal beats go after existing ones.
    pub fn push(&mut self, item: SequenceNote) {
        let idx = self.items.partition_point(|n| n.beat <= item.beat);
        self.items.insert(idx, item);
    }

    pub fn remove_all(&mut self, mut predicate: impl FnMut(&SequenceNote) -> bool) {
        self.items.retain(|n| !predicate(n));
    }

    pub fn contains(&self, item: &SequenceNote) -> bool {
        self.items.iter().any(|n| n == item)
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SequenceNote> {
        self.items.iter()
    }

    /// Distinct note names in first-appearance order.
    pub fn unique_notes(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for item in &self.items {
            if !seen.contains(&item.note.as_str()) {
                seen.push(item.note.as_str());
            }
        }
        seen
    }

    /// Plain records for the persistence collaborator.
    pub fn serialize(&self) -> &[SequenceNote] {
        &self.items
    }

    pub fn deserialize(mut items: Vec<SequenceNote>) -> Self {
        // stable sort keeps same-beat order from the stored records
        items.sort_by_key(|n| n.beat);
        Self { items }
    }
}
