//! Eviction engine: two-phase least-recently-used purge of image entries
//!
//! Only loaded images without a shared cache key are candidates. Volume-owned
//! images are never evicted, and in-flight reservations hold no bytes.
//!
//! When the caller is making room for a volume it passes the volume's slice
//! ids. Phase 1 evicts everything else first; phase 2 falls back to the slices
//! themselves, which then have to be fetched again.

use std::collections::HashSet;

use tracing::debug;

use crate::cache::State;
use crate::entity::{GeometryPayload, ImagePayload, VolumePayload};
use crate::error::{CacheError, Result};

impl<I: ImagePayload, V: VolumePayload, G: GeometryPayload> State<I, V, G> {
    /// Evict images until `target_bytes` are available
    ///
    /// # Arguments
    /// * `target_bytes` - Bytes the upcoming payload needs
    /// * `protected_image_ids` - Slices of a volume being admitted, evicted last
    ///
    /// # Returns
    /// * `Result<i64>` - Bytes available once the target is met
    pub(crate) fn reclaim(
        &mut self,
        target_bytes: u64,
        protected_image_ids: Option<&[String]>,
    ) -> Result<i64> {
        if self.budget.covers(target_bytes) {
            return Ok(self.budget.bytes_available());
        }

        let candidates = self
            .ledger
            .images
            .lru_order(|image| image.loaded && image.shared_cache_key.is_none());

        if let Some(protected) = protected_image_ids {
            let protected: HashSet<&str> = protected.iter().map(String::as_str).collect();
            let unprotected = candidates
                .iter()
                .filter(|image_id| !protected.contains(image_id.as_str()));

            for image_id in unprotected {
                if let Some(available) = self.evict(image_id, target_bytes)? {
                    return Ok(available);
                }
            }
        }

        for image_id in &candidates {
            if !self.ledger.images.contains(image_id) {
                continue; // gone in phase 1
            }
            if let Some(available) = self.evict(image_id, target_bytes)? {
                return Ok(available);
            }
        }

        Err(CacheError::Exhausted {
            target: target_bytes,
            available: self.budget.bytes_available(),
        })
    }

    /// Evict one image; returns the new availability once `target` is met
    fn evict(&mut self, image_id: &str, target: u64) -> Result<Option<i64>> {
        self.remove_image(image_id)?;
        self.stats.record_eviction();

        let available = self.budget.bytes_available();
        debug!(image_id, available, "evicted image");
        Ok(self.budget.covers(target).then_some(available))
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::Cache;
    use crate::entity::{DecodedImage, ImageVolume};
    use crate::error::CacheError;
    use bytes::Bytes;

    fn image(id: &str, size: usize) -> DecodedImage {
        DecodedImage::new(id, 1, size as u32, Bytes::from(vec![0u8; size]))
    }

    fn filled(budget: u64, images: &[(&str, usize)]) -> Cache {
        let cache: Cache = Cache::with_max_cache_size(budget).unwrap();
        for (id, size) in images {
            cache.put_image_sync(id, image(id, *size)).unwrap();
        }
        cache
    }

    #[test]
    fn test_noop_when_enough_space() {
        let cache = filled(10, &[("a", 4)]);
        assert_eq!(cache.reclaim(6, None).unwrap(), 6);
        assert!(cache.is_loaded("a"));
    }

    #[test]
    fn test_evicts_oldest_first() {
        let cache = filled(10, &[("a", 3), ("b", 3), ("c", 3)]);

        assert_eq!(cache.reclaim(3, None).unwrap(), 4);
        assert!(!cache.is_loaded("a"));
        assert!(cache.is_loaded("b"));
        assert!(cache.is_loaded("c"));

        assert_eq!(cache.reclaim(7, None).unwrap(), 7);
        assert!(!cache.is_loaded("b"));
        assert!(cache.is_loaded("c"));
        assert_eq!(cache.stats().evictions(), 2);
    }

    #[test]
    fn test_read_refreshes_recency() {
        let cache = filled(10, &[("a", 3), ("b", 3), ("c", 3)]);

        assert!(cache.image("a").is_some());
        cache.reclaim(2, None).unwrap();

        assert!(cache.is_loaded("a"));
        assert!(!cache.is_loaded("b"));
    }

    #[test]
    fn test_protected_images_go_last() {
        let cache = filled(10, &[("slice", 4), ("other", 4)]);
        let protected = vec!["slice".to_string()];

        cache.reclaim(5, Some(&protected)).unwrap();
        assert!(cache.is_loaded("slice"));
        assert!(!cache.is_loaded("other"));

        // Phase 2: nothing unprotected left
        cache.reclaim(9, Some(&protected)).unwrap();
        assert!(!cache.is_loaded("slice"));
        assert_eq!(cache.cache_size(), 0);
    }

    #[test]
    fn test_unreachable_target_evicts_everything() {
        let cache = filled(10, &[("a", 4), ("b", 4)]);

        let result = cache.reclaim(u64::MAX, None);
        assert!(matches!(
            result,
            Err(CacheError::Exhausted { target: u64::MAX, available: 10 })
        ));
        assert!(!cache.is_loaded("a"));
        assert!(!cache.is_loaded("b"));
    }

    #[test]
    fn test_huge_budget_reclaim_is_noop() {
        let cache = filled(u64::MAX, &[("a", 4)]);
        assert_eq!(cache.reclaim(1, None).unwrap(), i64::MAX);
        assert!(cache.is_loaded("a"));
    }

    #[test]
    fn test_shared_images_never_evicted() {
        let cache = filled(10, &[("a", 4), ("b", 4)]);
        cache
            .put_volume_sync("v", ImageVolume::new("v", vec!["a".to_string()], Bytes::new()))
            .unwrap();

        let result = cache.reclaim(8, None);
        assert!(matches!(result, Err(CacheError::Exhausted { target: 8, available: 6 })));
        assert!(cache.is_loaded("a"));
        assert!(!cache.is_loaded("b"));
    }
}
