//! Completion tags of cloud multipart parts.

use std::sync::Mutex;

use crate::error::UploadError;
use crate::Result;

const INITIAL_SLOTS: usize = 16;

/// Part number to completion tag, filled out of order by part tasks.
///
/// Slot `n - 1` holds the tag of part `n`. The slot vector starts pre-sized
/// and doubles whenever a part number lands past its end.
#[derive(Debug)]
pub struct PartTagTable {
    inner: Mutex<TagSlots>,
}

#[derive(Debug)]
struct TagSlots {
    slots: Vec<Option<String>>,
    filled: usize,
}

impl Default for PartTagTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PartTagTable {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_SLOTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(TagSlots {
                slots: vec![None; capacity.max(1)],
                filled: 0,
            }),
        }
    }

    /// Record the tag of `part_number` (1-based).
    pub fn record(&self, part_number: u32, tag: impl Into<String>) -> Result<()> {
        if part_number == 0 {
            return Err(UploadError::Protocol("part numbers start at 1".to_string()));
        }
        let index = (part_number - 1) as usize;
        let mut table = self.lock()?;

        if index >= table.slots.len() {
            let mut capacity = table.slots.len();
            while index >= capacity {
                capacity *= 2;
            }
            table.slots.resize(capacity, None);
        }

        if table.slots[index].replace(tag.into()).is_none() {
            table.filled += 1;
        }
        Ok(())
    }

    /// Number of parts with a recorded tag.
    pub fn filled(&self) -> usize {
        self.lock().map(|table| table.filled).unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.lock().map(|table| table.slots.len()).unwrap_or(0)
    }

    /// Tags of parts `1..=expected` in ascending order.
    ///
    /// Fails if any of those parts has no tag.
    pub fn ordered_parts(&self, expected: u32) -> Result<Vec<(u32, String)>> {
        let table = self.lock()?;
        let mut parts = Vec::with_capacity(expected as usize);

        for part_number in 1..=expected {
            let tag = table
                .slots
                .get((part_number - 1) as usize)
                .and_then(|slot| slot.clone())
                .ok_or_else(|| {
                    UploadError::Protocol(format!("part {} has no completion tag", part_number))
                })?;
            parts.push((part_number, tag));
        }

        if table.filled != expected as usize {
            return Err(UploadError::Protocol(format!(
                "expected {} tagged parts, found {}",
                expected, table.filled
            )));
        }
        Ok(parts)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, TagSlots>> {
        self.inner
            .lock()
            .map_err(|_| UploadError::Protocol("part tag table poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_out_of_order_completion_is_sorted() {
        let table = PartTagTable::new();
        table.record(3, "\"c\"").unwrap();
        table.record(1, "\"a\"").unwrap();
        table.record(2, "\"b\"").unwrap();

        let parts = table.ordered_parts(3).unwrap();
        assert_eq!(
            parts,
            vec![
                (1, "\"a\"".to_string()),
                (2, "\"b\"".to_string()),
                (3, "\"c\"".to_string())
            ]
        );
    }

    #[test]
    fn test_grows_by_doubling() {
        let table = PartTagTable::with_capacity(2);
        table.record(5, "e").unwrap();
        assert_eq!(table.capacity(), 8);
        assert_eq!(table.filled(), 1);
    }

    #[test]
    fn test_gap_is_rejected() {
        let table = PartTagTable::new();
        table.record(1, "a").unwrap();
        table.record(3, "c").unwrap();
        assert!(matches!(table.ordered_parts(3), Err(UploadError::Protocol(_))));
    }

    #[test]
    fn test_extra_part_is_rejected() {
        let table = PartTagTable::new();
        table.record(1, "a").unwrap();
        table.record(2, "b").unwrap();
        assert!(table.ordered_parts(1).is_err());
    }

    #[test]
    fn test_rerecord_does_not_double_count() {
        let table = PartTagTable::new();
        table.record(1, "first").unwrap();
        table.record(1, "second").unwrap();
        assert_eq!(table.filled(), 1);
        assert_eq!(table.ordered_parts(1).unwrap()[0].1, "second");
    }

    #[test]
    fn test_part_zero_is_invalid() {
        assert!(PartTagTable::new().record(0, "x").is_err());
    }

    proptest! {
        #[test]
        fn prop_any_completion_order_finalizes_ascending(
            order in Just((1..=40u32).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let table = PartTagTable::with_capacity(1);
            for part in &order {
                table.record(*part, format!("tag-{}", part)).unwrap();
            }
            let parts = table.ordered_parts(40).unwrap();
            for (i, (number, tag)) in parts.iter().enumerate() {
                prop_assert_eq!(*number, i as u32 + 1);
                prop_assert_eq!(tag, &format!("tag-{}", i + 1));
            }
        }
    }
}
