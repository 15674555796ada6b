//! Page partitioning across active instances.

use std::ops::RangeInclusive;

use serde::Serialize;

use super::RegistryError;
use crate::models::InstanceRecord;

/// Inclusive 1-based page range. Empty when `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn len(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn pages(&self) -> RangeInclusive<u32> {
        self.start..=self.end
    }
}

impl std::fmt::Display for PageRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Split `total` pages into `ceil(total / count)`-sized contiguous chunks and
/// return chunk `index`. Instances past the last chunk get an empty range.
///
/// Returns `None` when `index` is not below `count`.
pub fn partition_pages(total: u32, count: usize, index: usize) -> Option<PageRange> {
    if index >= count {
        return None;
    }
    let count = u32::try_from(count).unwrap_or(u32::MAX);
    let index = u32::try_from(index).unwrap_or(u32::MAX);
    let chunk = total.div_ceil(count).max(1);
    let start = index.saturating_mul(chunk).saturating_add(1);
    let end = index.saturating_add(1).saturating_mul(chunk).min(total);
    Some(PageRange { start, end })
}

/// Range owned by `self_id` among `active` (already in canonical order).
///
/// Fails closed when `self_id` is absent: an instance that cannot see itself
/// must not guess.
pub fn partition(
    total: u32,
    active: &[InstanceRecord],
    self_id: &str,
) -> Result<PageRange, RegistryError> {
    let index = active
        .iter()
        .position(|r| r.id == self_id)
        .ok_or_else(|| RegistryError::NotActive(self_id.to_string()))?;
    partition_pages(total, active.len(), index)
        .ok_or_else(|| RegistryError::NotActive(self_id.to_string()))
}
