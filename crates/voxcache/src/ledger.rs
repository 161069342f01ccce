//! Entry ledger: the three key->entry stores
//!
//! Nothing outside this module and the cache orchestrator mutates entries.
//! Readers get clones; the payloads inside are reference counted.
//!
//! Recency is a logical clock that ticks on every reservation and touch, so
//! LRU order never depends on wall-clock resolution. Ties fall back to
//! insertion order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ahash::RandomState;

use crate::error::{CacheError, Result};
use crate::load::LoadHandle;

/// Which store an entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// 2-D decoded images
    Image,
    /// 3-D volumes
    Volume,
    /// Contours and surfaces
    Geometry,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Image => write!(f, "image"),
            EntryKind::Volume => write!(f, "volume"),
            EntryKind::Geometry => write!(f, "geometry"),
        }
    }
}

/// Ledger record for one image
pub struct CachedImage<I> {
    /// Cache key
    pub image_id: String,
    /// Whether the payload has been admitted
    pub loaded: bool,
    /// Bytes counted against the budget (0 until loaded)
    pub size_in_bytes: u64,
    /// Logical time of the last reservation or read
    pub time_stamp: u64,
    /// Volume currently depending on this image's buffer
    pub shared_cache_key: Option<String>,
    /// Handle of the load that populated this entry
    pub load: Arc<LoadHandle>,
    /// Resolved payload
    pub image: Option<Arc<I>>,
    pub(crate) seq: u64,
}

/// Ledger record for one volume
pub struct CachedVolume<V> {
    /// Cache key
    pub volume_id: String,
    /// Whether the payload has been attached
    pub loaded: bool,
    /// Recorded size; volumes never count against the budget
    pub size_in_bytes: u64,
    /// Logical time of the last reservation or read
    pub time_stamp: u64,
    /// Handle of the load that populated this entry
    pub load: Arc<LoadHandle>,
    /// Resolved payload
    pub volume: Option<Arc<V>>,
    pub(crate) seq: u64,
}

/// Ledger record for one geometry
pub struct CachedGeometry<G> {
    /// Cache key
    pub geometry_id: String,
    /// Whether the payload has been attached
    pub loaded: bool,
    /// Recorded size; not subtracted from the budget
    pub size_in_bytes: u64,
    /// Logical time of the last reservation or read
    pub time_stamp: u64,
    /// Handle of the load that populated this entry
    pub load: Arc<LoadHandle>,
    /// Resolved payload
    pub geometry: Option<Arc<G>>,
    pub(crate) seq: u64,
}

// Manual impls: deriving would demand `I: Clone`.
impl<I> Clone for CachedImage<I> {
    fn clone(&self) -> Self {
        Self {
            image_id: self.image_id.clone(),
            loaded: self.loaded,
            size_in_bytes: self.size_in_bytes,
            time_stamp: self.time_stamp,
            shared_cache_key: self.shared_cache_key.clone(),
            load: Arc::clone(&self.load),
            image: self.image.clone(),
            seq: self.seq,
        }
    }
}

impl<V> Clone for CachedVolume<V> {
    fn clone(&self) -> Self {
        Self {
            volume_id: self.volume_id.clone(),
            loaded: self.loaded,
            size_in_bytes: self.size_in_bytes,
            time_stamp: self.time_stamp,
            load: Arc::clone(&self.load),
            volume: self.volume.clone(),
            seq: self.seq,
        }
    }
}

impl<G> Clone for CachedGeometry<G> {
    fn clone(&self) -> Self {
        Self {
            geometry_id: self.geometry_id.clone(),
            loaded: self.loaded,
            size_in_bytes: self.size_in_bytes,
            time_stamp: self.time_stamp,
            load: Arc::clone(&self.load),
            geometry: self.geometry.clone(),
            seq: self.seq,
        }
    }
}

impl<I> fmt::Debug for CachedImage<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedImage")
            .field("image_id", &self.image_id)
            .field("loaded", &self.loaded)
            .field("size_in_bytes", &self.size_in_bytes)
            .field("time_stamp", &self.time_stamp)
            .field("shared_cache_key", &self.shared_cache_key)
            .finish_non_exhaustive()
    }
}

impl<V> fmt::Debug for CachedVolume<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedVolume")
            .field("volume_id", &self.volume_id)
            .field("loaded", &self.loaded)
            .field("time_stamp", &self.time_stamp)
            .finish_non_exhaustive()
    }
}

impl<G> fmt::Debug for CachedGeometry<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedGeometry")
            .field("geometry_id", &self.geometry_id)
            .field("loaded", &self.loaded)
            .field("size_in_bytes", &self.size_in_bytes)
            .field("time_stamp", &self.time_stamp)
            .finish_non_exhaustive()
    }
}

/// Identity and recency assigned to a fresh reservation
#[derive(Debug, Clone, Copy)]
pub(crate) struct Stamp {
    pub seq: u64,
    pub tick: u64,
}

/// Common view over the three entry types
pub(crate) trait Entry {
    fn seq(&self) -> u64;
    fn time_stamp(&self) -> u64;
    fn set_time_stamp(&mut self, tick: u64);
}

macro_rules! impl_entry {
    ($ty:ident) => {
        impl<T> Entry for $ty<T> {
            fn seq(&self) -> u64 {
                self.seq
            }

            fn time_stamp(&self) -> u64 {
                self.time_stamp
            }

            fn set_time_stamp(&mut self, tick: u64) {
                self.time_stamp = tick;
            }
        }
    };
}

impl_entry!(CachedImage);
impl_entry!(CachedVolume);
impl_entry!(CachedGeometry);

/// One key->entry store
pub(crate) struct Store<E> {
    kind: EntryKind,
    entries: HashMap<String, E, RandomState>,
}

impl<E: Entry> Store<E> {
    fn new(kind: EntryKind) -> Self {
        Self {
            kind,
            entries: HashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&E> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut E> {
        self.entries.get_mut(key)
    }

    /// Entry at `key`, only if it is still the reservation numbered `seq`
    pub fn get_generation_mut(&mut self, key: &str, seq: u64) -> Option<&mut E> {
        self.entries.get_mut(key).filter(|entry| entry.seq() == seq)
    }

    pub fn values(&self) -> impl Iterator<Item = &E> {
        self.entries.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut E> {
        self.entries.values_mut()
    }

    /// Insert a new entry; fails if the key is already present
    fn reserve(&mut self, key: &str, entry: E) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument(format!(
                "{} id must not be empty",
                self.kind
            )));
        }
        if self.entries.contains_key(key) {
            return Err(CacheError::duplicate(self.kind, key));
        }
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    fn touch(&mut self, key: &str, tick: u64) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.set_time_stamp(tick);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &str) -> Result<E> {
        self.entries
            .remove(key)
            .ok_or_else(|| CacheError::not_found(self.kind, key))
    }

    /// Remove only if the entry is still the reservation numbered `seq`
    pub fn remove_generation(&mut self, key: &str, seq: u64) -> Option<E> {
        if self.entries.get(key)?.seq() == seq {
            self.entries.remove(key)
        } else {
            None
        }
    }

    /// Keys of entries matching `predicate`, least recently used first
    pub fn lru_order<P>(&self, predicate: P) -> Vec<String>
    where
        P: Fn(&E) -> bool,
    {
        let mut matching: Vec<(&String, &E)> =
            self.entries.iter().filter(|(_, e)| predicate(e)).collect();
        matching.sort_by_key(|(_, e)| (e.time_stamp(), e.seq()));
        matching.into_iter().map(|(k, _)| k.clone()).collect()
    }

    /// All keys in the order they were reserved
    pub fn keys_by_insertion(&self) -> Vec<String> {
        let mut keys: Vec<(&String, u64)> =
            self.entries.iter().map(|(k, e)| (k, e.seq())).collect();
        keys.sort_by_key(|(_, seq)| *seq);
        keys.into_iter().map(|(k, _)| k.clone()).collect()
    }
}

/// The three stores plus the recency clock
pub(crate) struct Ledger<I, V, G> {
    pub images: Store<CachedImage<I>>,
    pub volumes: Store<CachedVolume<V>>,
    pub geometries: Store<CachedGeometry<G>>,
    clock: u64,
    next_seq: u64,
}

impl<I, V, G> Ledger<I, V, G> {
    pub fn new() -> Self {
        Self {
            images: Store::new(EntryKind::Image),
            volumes: Store::new(EntryKind::Volume),
            geometries: Store::new(EntryKind::Geometry),
            clock: 0,
            next_seq: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn stamp(&mut self) -> Stamp {
        self.next_seq += 1;
        Stamp {
            seq: self.next_seq,
            tick: self.tick(),
        }
    }

    /// Reserve an unloaded image entry; returns its sequence number
    pub fn reserve_image(&mut self, key: &str, load: Arc<LoadHandle>) -> Result<u64> {
        let Stamp { seq, tick } = self.stamp();
        self.images.reserve(
            key,
            CachedImage {
                image_id: key.to_string(),
                loaded: false,
                size_in_bytes: 0,
                time_stamp: tick,
                shared_cache_key: None,
                load,
                image: None,
                seq,
            },
        )?;
        Ok(seq)
    }

    /// Reserve an unloaded volume entry; returns its sequence number
    pub fn reserve_volume(&mut self, key: &str, load: Arc<LoadHandle>) -> Result<u64> {
        let Stamp { seq, tick } = self.stamp();
        self.volumes.reserve(
            key,
            CachedVolume {
                volume_id: key.to_string(),
                loaded: false,
                size_in_bytes: 0,
                time_stamp: tick,
                load,
                volume: None,
                seq,
            },
        )?;
        Ok(seq)
    }

    /// Reserve an unloaded geometry entry; returns its sequence number
    pub fn reserve_geometry(&mut self, key: &str, load: Arc<LoadHandle>) -> Result<u64> {
        let Stamp { seq, tick } = self.stamp();
        self.geometries.reserve(
            key,
            CachedGeometry {
                geometry_id: key.to_string(),
                loaded: false,
                size_in_bytes: 0,
                time_stamp: tick,
                load,
                geometry: None,
                seq,
            },
        )?;
        Ok(seq)
    }

    /// Bump recency of an entry; returns false if absent
    pub fn touch(&mut self, kind: EntryKind, key: &str) -> bool {
        let tick = self.tick();
        match kind {
            EntryKind::Image => self.images.touch(key, tick),
            EntryKind::Volume => self.volumes.touch(key, tick),
            EntryKind::Geometry => self.geometries.touch(key, tick),
        }
    }

    /// Bytes of images already spoken for by volumes
    pub fn shared_bytes(&self) -> u64 {
        self.images
            .values()
            .filter(|image| image.shared_cache_key.is_some())
            .map(|image| image.size_in_bytes)
            .sum()
    }

    /// Point every present image in `image_ids` at `volume_id`
    pub fn link_volume(&mut self, volume_id: &str, image_ids: &[String]) -> usize {
        let mut linked = 0;
        for image_id in image_ids {
            if let Some(image) = self.images.get_mut(image_id) {
                image.shared_cache_key = Some(volume_id.to_string());
                linked += 1;
            }
        }
        linked
    }

    /// Clear the shared key on every image pointing at `volume_id`
    pub fn unlink_volume(&mut self, volume_id: &str) -> usize {
        let mut unlinked = 0;
        for image in self.images.values_mut() {
            if image.shared_cache_key.as_deref() == Some(volume_id) {
                image.shared_cache_key = None;
                unlinked += 1;
            }
        }
        unlinked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{DecodedImage, Geometry, ImageVolume};
    use crate::load::LoadObject;

    type TestLedger = Ledger<DecodedImage, ImageVolume, Geometry>;

    fn handle() -> Arc<LoadHandle> {
        let (_, handle) = LoadObject::ready(()).into_parts();
        Arc::new(handle)
    }

    #[test]
    fn test_reserve_duplicate() {
        let mut ledger = TestLedger::new();

        ledger.reserve_image("a", handle()).unwrap();
        let result = ledger.reserve_image("a", handle());

        assert!(matches!(
            result,
            Err(CacheError::DuplicateKey { kind: EntryKind::Image, .. })
        ));
        assert_eq!(ledger.images.len(), 1);
    }

    #[test]
    fn test_reserve_empty_key() {
        let mut ledger = TestLedger::new();
        let result = ledger.reserve_volume("", handle());
        assert!(matches!(result, Err(CacheError::InvalidArgument(_))));
    }

    #[test]
    fn test_stores_are_independent() {
        let mut ledger = TestLedger::new();

        ledger.reserve_image("x", handle()).unwrap();
        ledger.reserve_volume("x", handle()).unwrap();
        ledger.reserve_geometry("x", handle()).unwrap();

        assert!(ledger.images.contains("x"));
        assert!(ledger.volumes.contains("x"));
        assert!(ledger.geometries.contains("x"));
    }

    #[test]
    fn test_lru_order_follows_touch() {
        let mut ledger = TestLedger::new();

        ledger.reserve_image("a", handle()).unwrap();
        ledger.reserve_image("b", handle()).unwrap();
        ledger.reserve_image("c", handle()).unwrap();
        assert_eq!(ledger.images.lru_order(|_| true), vec!["a", "b", "c"]);

        assert!(ledger.touch(EntryKind::Image, "a"));
        assert_eq!(ledger.images.lru_order(|_| true), vec!["b", "c", "a"]);

        assert!(!ledger.touch(EntryKind::Image, "missing"));
    }

    #[test]
    fn test_lru_order_predicate() {
        let mut ledger = TestLedger::new();

        ledger.reserve_image("a", handle()).unwrap();
        ledger.reserve_image("b", handle()).unwrap();
        ledger.link_volume("v", &["a".to_string()]);

        let unshared = ledger.images.lru_order(|e| e.shared_cache_key.is_none());
        assert_eq!(unshared, vec!["b"]);
    }

    #[test]
    fn test_remove_not_found() {
        let mut ledger = TestLedger::new();
        let result = ledger.geometries.remove("nope");
        assert!(matches!(
            result,
            Err(CacheError::NotFound { kind: EntryKind::Geometry, .. })
        ));
    }

    #[test]
    fn test_remove_generation() {
        let mut ledger = TestLedger::new();

        let first = ledger.reserve_image("a", handle()).unwrap();
        ledger.images.remove("a").unwrap();
        let second = ledger.reserve_image("a", handle()).unwrap();

        assert!(ledger.images.remove_generation("a", first).is_none());
        assert!(ledger.images.get_generation_mut("a", second).is_some());
        assert!(ledger.images.remove_generation("a", second).is_some());
    }

    #[test]
    fn test_link_and_unlink() {
        let mut ledger = TestLedger::new();

        ledger.reserve_image("a", handle()).unwrap();
        ledger.reserve_image("b", handle()).unwrap();
        ledger.images.get_mut("a").unwrap().size_in_bytes = 3;
        ledger.images.get_mut("b").unwrap().size_in_bytes = 5;

        let ids = vec!["a".to_string(), "b".to_string(), "absent".to_string()];
        assert_eq!(ledger.link_volume("v", &ids), 2);
        assert_eq!(ledger.shared_bytes(), 8);

        assert_eq!(ledger.unlink_volume("v"), 2);
        assert_eq!(ledger.shared_bytes(), 0);
    }

    #[test]
    fn test_keys_by_insertion() {
        let mut ledger = TestLedger::new();

        for key in ["c", "a", "b"] {
            ledger.reserve_volume(key, handle()).unwrap();
        }
        ledger.touch(EntryKind::Volume, "c");

        assert_eq!(ledger.volumes.keys_by_insertion(), vec!["c", "a", "b"]);
    }
}
