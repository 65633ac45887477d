use std::{collections::BTreeMap, ops::Range, prelude::v1::*, ptr::NonNull};

use crate::{HeapSource, GRANULARITY};

/// Tracks the state of every byte handed out by a memory source and panics
/// on an inconsistent transition, such as two live payloads overlapping.
#[derive(Debug)]
pub struct ShadowAllocator {
    regions: BTreeMap<usize, SaRegion>,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum SaRegion {
    Free,
    Used,
    Invalid,
}

impl Default for ShadowAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowAllocator {
    pub fn new() -> Self {
        Self {
            regions: Some((0, SaRegion::Invalid)).into_iter().collect(),
        }
    }

    pub fn convert_range(
        &mut self,
        range: Range<usize>,
        old_region: SaRegion,
        new_region: SaRegion,
    ) {
        if range.len() == 0 {
            return;
        }

        assert_ne!(old_region, new_region);
        log::trace!(
            "sa: converting {:?} from {:?} to {:?}",
            range,
            old_region,
            new_region
        );

        let (&addr, &region) = self.regions.range(0..range.end).rev().next().unwrap();
        if addr > range.start {
            panic!("there's a discontinuity in range {:?}", range);
        } else if region != old_region {
            panic!(
                "range {:?} is {:?} (expected {:?})",
                range, region, old_region
            );
        }

        // Insert an element at `range.start`
        if addr == range.start {
            *self.regions.get_mut(&addr).unwrap() = new_region;
        } else {
            self.regions.insert(range.start, new_region);
        }

        // Each element must represent a discontinuity. If it doesnt't represent
        // a discontinuity, it must be removed.
        if let Some((_, &region)) = self.regions.range(0..range.start).rev().next() {
            if region == new_region {
                self.regions.remove(&range.start);
            }
        }

        if let Some(&end_region) = self.regions.get(&range.end) {
            // Each element must represent a discontinuity. If it doesnt't
            // represent a discontinuity, it must be removed.
            if end_region == new_region {
                self.regions.remove(&range.end);
            }
        } else {
            // Insert an element at `range.end`
            self.regions.insert(range.end, old_region);
        }
    }

    /// Register memory newly obtained from a memory source.
    pub fn insert_heap_range(&mut self, start: NonNull<u8>, len: usize) {
        let start = start.as_ptr() as usize;
        self.convert_range(start..start + len, SaRegion::Invalid, SaRegion::Free);
    }

    pub fn allocate(&mut self, start: NonNull<u8>, len: usize) {
        let start = start.as_ptr() as usize;
        assert!(
            start % GRANULARITY == 0,
            "0x{:x} is not properly aligned (0x{:x} bytes alignment required)",
            start,
            GRANULARITY
        );
        self.convert_range(start..start + len, SaRegion::Free, SaRegion::Used);
    }

    pub fn deallocate(&mut self, start: NonNull<u8>, len: usize) {
        let start = start.as_ptr() as usize;
        self.convert_range(start..start + len, SaRegion::Used, SaRegion::Free);
    }
}

/// A [`HeapSource`] wrapper recording every growth request.
#[derive(Debug)]
pub struct TrackingSource<T> {
    pub sa: ShadowAllocator,
    /// The sizes of the successful `grow` calls.
    pub grows: Vec<usize>,
    pub inner: T,
}

impl<T> TrackingSource<T> {
    pub fn new(inner: T) -> Self {
        Self {
            sa: ShadowAllocator::new(),
            grows: Vec::new(),
            inner,
        }
    }
}

unsafe impl<T: HeapSource> HeapSource for TrackingSource<T> {
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
        log::trace!("HeapSource::grow({:?})", len);
        let start = self.inner.grow(len)?;
        log::trace!(" HeapSource::grow(...) = {:?}", start);
        self.sa.insert_heap_range(start, len);
        self.grows.push(len);
        Some(start)
    }
}
