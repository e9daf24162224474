//! Bounded most-recently-used render cache for pipeline stages.
//!
//! Each stage keeps the last [`STAGE_CACHE_CAPACITY`] rasters it
//! rendered, keyed by the requested region and output size, so preview
//! and sampling passes over overlapping areas do not recompute the
//! whole chain.

use std::collections::HashMap;

use crate::types::{Dimensions, GrayImage, Rect};

/// Number of rendered rasters each stage retains.
pub const STAGE_CACHE_CAPACITY: usize = 10;

/// Cache key: requested level-0 region and output raster size.
pub type RenderKey = (Rect, Dimensions);

/// LRU cache of rendered rasters.
#[derive(Debug)]
pub struct RenderCache {
    entries: HashMap<RenderKey, GrayImage>,
    /// Recency order: front = least recently used, back = most recent.
    order: Vec<RenderKey>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new(STAGE_CACHE_CAPACITY)
    }
}

impl RenderCache {
    /// Create an empty cache holding at most `capacity` entries.
    ///
    /// A capacity of zero disables caching.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            order: Vec::with_capacity(capacity),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a raster, marking it most recently used.
    pub fn get(&mut self, key: &RenderKey) -> Option<&GrayImage> {
        if self.entries.contains_key(key) {
            self.hits += 1;
            self.touch(key);
            self.entries.get(key)
        } else {
            self.misses += 1;
            None
        }
    }

    /// Insert a raster, evicting the least recently used entry when full.
    pub fn insert(&mut self, key: RenderKey, raster: GrayImage) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key, raster).is_some() {
            self.touch(&key);
            return;
        }
        while self.order.len() >= self.capacity {
            let oldest = self.order.remove(0);
            self.entries.remove(&oldest);
        }
        self.order.push(key);
    }

    /// Number of cached rasters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation.
    #[must_use]
    pub const fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    fn touch(&mut self, key: &RenderKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }
}
