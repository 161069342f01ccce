//! Admission control: byte budget and the cacheability check

use crate::error::{CacheError, Result};
use crate::ledger::Ledger;

const ONE_GB: u64 = 1024 * 1024 * 1024;

/// Default budget: 3 GB
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 3 * ONE_GB;

/// Budget and occupancy counters
///
/// Occupancy only ever counts loaded images. Volumes reach the budget through
/// the images that share their buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Budget {
    max_cache_size: u64,
    image_cache_size: u64,
}

impl Budget {
    pub fn new(max_cache_size: u64) -> Result<Self> {
        let mut budget = Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            image_cache_size: 0,
        };
        budget.set_max_cache_size(max_cache_size)?;
        Ok(budget)
    }

    /// Shrinking below current occupancy is allowed; later admissions evict
    pub fn set_max_cache_size(&mut self, bytes: u64) -> Result<()> {
        if bytes == 0 {
            return Err(CacheError::InvalidBudget(bytes));
        }
        self.max_cache_size = bytes;
        Ok(())
    }

    pub fn max_cache_size(&self) -> u64 {
        self.max_cache_size
    }

    pub fn image_cache_size(&self) -> u64 {
        self.image_cache_size
    }

    /// May be negative after the budget was shrunk
    pub fn bytes_available(&self) -> i64 {
        saturate(self.headroom())
    }

    /// Exact headroom; budgets above `i64::MAX` do not wrap
    fn headroom(&self) -> i128 {
        i128::from(self.max_cache_size) - i128::from(self.image_cache_size)
    }

    /// Whether `target` bytes are already free
    pub fn covers(&self, target: u64) -> bool {
        self.headroom() >= i128::from(target)
    }

    pub fn increment(&mut self, bytes: u64) {
        self.image_cache_size = self.image_cache_size.saturating_add(bytes);
    }

    pub fn decrement(&mut self, bytes: u64) {
        self.image_cache_size = self.image_cache_size.saturating_sub(bytes);
    }

    /// Bytes a new image may claim: unallocated space minus volume-shared bytes
    pub fn available_for_new<I, V, G>(&self, ledger: &Ledger<I, V, G>) -> i64 {
        saturate(self.headroom_for_new(ledger))
    }

    fn headroom_for_new<I, V, G>(&self, ledger: &Ledger<I, V, G>) -> i128 {
        self.headroom() - i128::from(ledger.shared_bytes())
    }

    /// Strict: a payload exactly filling the remaining space is rejected
    pub fn is_cacheable<I, V, G>(&self, ledger: &Ledger<I, V, G>, byte_length: u64) -> bool {
        self.headroom_for_new(ledger) > i128::from(byte_length)
    }
}

fn saturate(bytes: i128) -> i64 {
    i64::try_from(bytes).unwrap_or(if bytes < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{DecodedImage, Geometry, ImageVolume};
    use crate::load::LoadObject;
    use std::sync::Arc;

    type TestLedger = Ledger<DecodedImage, ImageVolume, Geometry>;

    fn loaded(ledger: &mut TestLedger, budget: &mut Budget, key: &str, size: u64) {
        let (_, handle) = LoadObject::ready(()).into_parts();
        ledger.reserve_image(key, Arc::new(handle)).unwrap();
        let entry = ledger.images.get_mut(key).unwrap();
        entry.loaded = true;
        entry.size_in_bytes = size;
        budget.increment(size);
    }

    #[test]
    fn test_invalid_budget() {
        assert!(matches!(Budget::new(0), Err(CacheError::InvalidBudget(0))));

        let mut budget = Budget::new(10).unwrap();
        assert!(budget.set_max_cache_size(0).is_err());
        assert_eq!(budget.max_cache_size(), 10);
    }

    #[test]
    fn test_strict_inequality() {
        let ledger = TestLedger::new();
        let budget = Budget::new(10).unwrap();

        assert!(budget.is_cacheable(&ledger, 9));
        assert!(!budget.is_cacheable(&ledger, 10));
    }

    #[test]
    fn test_shared_bytes_reduce_availability() {
        let mut ledger = TestLedger::new();
        let mut budget = Budget::new(10).unwrap();

        loaded(&mut ledger, &mut budget, "a", 4);
        assert_eq!(budget.bytes_available(), 6);
        assert!(budget.is_cacheable(&ledger, 5));

        ledger.link_volume("v", &["a".to_string()]);
        assert_eq!(budget.bytes_available(), 6);
        assert_eq!(budget.available_for_new(&ledger), 2);
        assert!(!budget.is_cacheable(&ledger, 5));
    }

    #[test]
    fn test_shrink_below_occupancy() {
        let mut ledger = TestLedger::new();
        let mut budget = Budget::new(10).unwrap();

        loaded(&mut ledger, &mut budget, "a", 8);
        budget.set_max_cache_size(4).unwrap();

        assert_eq!(budget.bytes_available(), -4);
        assert!(!budget.is_cacheable(&ledger, 1));
    }

    #[test]
    fn test_huge_budget_does_not_wrap() {
        let ledger = TestLedger::new();
        let mut budget = Budget::new(u64::MAX).unwrap();

        assert_eq!(budget.bytes_available(), i64::MAX);
        assert!(budget.is_cacheable(&ledger, 1));
        assert!(budget.is_cacheable(&ledger, u64::MAX - 1));
        assert!(!budget.is_cacheable(&ledger, u64::MAX));
        assert!(budget.covers(u64::MAX));

        budget.increment(u64::MAX);
        assert_eq!(budget.bytes_available(), 0);
        assert!(!budget.is_cacheable(&ledger, 1));
    }

    #[test]
    fn test_huge_request_against_small_budget() {
        let ledger = TestLedger::new();
        let budget = Budget::new(10).unwrap();

        assert!(!budget.is_cacheable(&ledger, u64::MAX));
        assert!(!budget.is_cacheable(&ledger, i64::MAX as u64 + 11));
        assert!(!budget.covers(u64::MAX));
        assert!(budget.covers(10));
    }

    #[test]
    fn test_decrement_saturates() {
        let mut budget = Budget::new(10).unwrap();
        budget.increment(3);
        budget.decrement(5);
        assert_eq!(budget.image_cache_size(), 0);
    }
}
