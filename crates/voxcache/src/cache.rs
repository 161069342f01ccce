//! Cache: lifecycle orchestration over the ledger, budget and eviction engine
//!
//! Every public operation takes the state lock exactly once, so no caller ever
//! observes a half-applied put, removal or purge. Loads are the only
//! suspension points: a put reserves its key synchronously and returns a future
//! that admits the payload once the loader resolves.
//!
//! Collaborator callbacks (cancel, decache, volume disposal) are queued while
//! the lock is held and run after it is released.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::admission::Budget;
use crate::config::CacheConfig;
use crate::entity::{DecodedImage, Geometry, GeometryPayload, ImagePayload, ImageVolume, VolumePayload};
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, EventBus};
use crate::ledger::{CachedGeometry, CachedImage, CachedVolume, EntryKind, Ledger};
use crate::load::{BoxFuture, LoadHandle, LoadObject, LoadStatus};
use crate::stats::{CacheSnapshot, CacheStats};
use crate::uri::image_id_to_uri;

/// How a put future settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Payload admitted and attached to its entry
    Loaded,
    /// Entry was removed (or replaced) before the load resolved; payload dropped
    Abandoned,
}

/// Future returned by the `put_*_load_object` operations
pub type PutFuture = BoxFuture<Result<PutOutcome>>;

/// Byte-budgeted cache for images, volumes and geometry
///
/// Cloning is cheap and yields another handle to the same cache.
pub struct Cache<I = DecodedImage, V = ImageVolume, G = Geometry> {
    shared: Arc<Shared<I, V, G>>,
}

struct Shared<I, V, G> {
    state: Mutex<State<I, V, G>>,
    events: EventBus<I, V, G>,
    stats: Arc<CacheStats>,
}

/// Everything guarded by the cache lock
pub(crate) struct State<I, V, G> {
    pub ledger: Ledger<I, V, G>,
    pub budget: Budget,
    pub events: EventBus<I, V, G>,
    pub stats: Arc<CacheStats>,
    pub teardown: Vec<Teardown<V>>,
}

/// Collaborator callbacks owed by a removed entry
pub(crate) enum Teardown<V> {
    /// Image or geometry: cancel, then decache
    Load { key: String, load: Arc<LoadHandle> },
    /// Volume: stop streaming, dispose the buffer, cancel the load
    Volume {
        volume_id: String,
        load: Arc<LoadHandle>,
        volume: Option<Arc<V>>,
    },
}

impl<V: VolumePayload> Teardown<V> {
    fn run(self) {
        match self {
            Teardown::Load { key, load } => load.teardown(&key),
            Teardown::Volume {
                volume_id,
                load,
                volume,
            } => {
                if let Some(volume) = volume {
                    volume.cancel_loading();
                    volume.dispose();
                }
                load.cancel(&volume_id);
            }
        }
    }
}

impl<I, V, G> Clone for Cache<I, V, G> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

fn settle(handle: &LoadHandle, result: &Result<PutOutcome>) {
    handle.settle(match result {
        Ok(PutOutcome::Loaded) => LoadStatus::Loaded,
        Ok(PutOutcome::Abandoned) => LoadStatus::Cancelled,
        Err(e) => LoadStatus::Failed(e.to_string()),
    });
}

/// Reservation held by an in-flight put future
///
/// Dropping the future before it settles cancels the put: the reservation is
/// rolled back and waiters see `Cancelled`.
struct Reservation<I: ImagePayload, V: VolumePayload, G: GeometryPayload> {
    cache: Cache<I, V, G>,
    kind: EntryKind,
    key: String,
    seq: u64,
    handle: Arc<LoadHandle>,
    settled: bool,
}

impl<I: ImagePayload, V: VolumePayload, G: GeometryPayload> Drop for Reservation<I, V, G> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        debug!(kind = %self.kind, key = %self.key, "put dropped before its load resolved");
        self.cache
            .with_state(|s| s.rollback(self.kind, &self.key, self.seq));
        self.handle.settle(LoadStatus::Cancelled);
    }
}

type Admit<I, V, G, T> = fn(&mut State<I, V, G>, &str, u64, T) -> Result<PutOutcome>;

impl<I: ImagePayload, V: VolumePayload, G: GeometryPayload> Cache<I, V, G> {
    /// Create a cache from `config`
    ///
    /// # Errors
    /// Returns `InvalidBudget` if the configured budget is zero.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let budget = Budget::new(config.max_cache_size)?;
        let events = EventBus::new(config.event_capacity);
        let stats = Arc::new(CacheStats::new());

        let state = State {
            ledger: Ledger::new(),
            budget,
            events: events.clone(),
            stats: Arc::clone(&stats),
            teardown: Vec::new(),
        };

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                events,
                stats,
            }),
        })
    }

    /// Create a cache with default settings and the given budget
    pub fn with_max_cache_size(bytes: u64) -> Result<Self> {
        Self::new(CacheConfig::default().with_max_cache_size(bytes))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State<I, V, G>) -> R) -> R {
        let (result, teardown) = {
            let mut state = self.shared.state.lock();
            let result = f(&mut state);
            (result, std::mem::take(&mut state.teardown))
        };
        for item in teardown {
            item.run();
        }
        result
    }

    /// Set the byte budget
    ///
    /// Should be set before large admissions. Shrinking below the current
    /// occupancy is allowed and makes later admissions evict aggressively.
    pub fn set_max_cache_size(&self, bytes: u64) -> Result<()> {
        self.with_state(|s| s.budget.set_max_cache_size(bytes))
    }

    /// Configured byte budget
    pub fn max_cache_size(&self) -> u64 {
        self.with_state(|s| s.budget.max_cache_size())
    }

    /// Bytes held by loaded images
    pub fn cache_size(&self) -> u64 {
        self.with_state(|s| s.budget.image_cache_size())
    }

    /// Budget minus occupancy; negative after the budget was shrunk
    pub fn bytes_available(&self) -> i64 {
        self.with_state(|s| s.budget.bytes_available())
    }

    /// Whether a new image of `byte_length` bytes would be admitted
    ///
    /// Bytes of images shared with volumes are not available to new images.
    pub fn is_cacheable(&self, byte_length: u64) -> bool {
        self.with_state(|s| s.budget.is_cacheable(&s.ledger, byte_length))
    }

    /// Evict least-recently-used images until `target_bytes` are available
    ///
    /// # Arguments
    /// * `target_bytes` - Bytes the upcoming payload needs
    /// * `protected_image_ids` - Slices of a volume about to be admitted;
    ///   evicted only after every other candidate
    ///
    /// # Returns
    /// * `Result<i64>` - Bytes available, or `Exhausted` if candidates ran out
    pub fn reclaim(&self, target_bytes: u64, protected_image_ids: Option<&[String]>) -> Result<i64> {
        self.with_state(|s| s.reclaim(target_bytes, protected_image_ids))
    }

    /// Adjust occupancy for a payload that grew after admission
    pub fn increment_image_cache_size(&self, bytes: u64) {
        self.with_state(|s| s.budget.increment(bytes))
    }

    /// Adjust occupancy for a payload that shrank after admission
    pub fn decrement_image_cache_size(&self, bytes: u64) {
        self.with_state(|s| s.budget.decrement(bytes))
    }

    fn put_load_object<T: Send + 'static>(
        &self,
        kind: EntryKind,
        key: &str,
        load: LoadObject<T>,
        admit: Admit<I, V, G, T>,
    ) -> Result<PutFuture> {
        let (future, handle) = load.into_parts();
        let handle = Arc::new(handle);

        let seq = self.with_state(|s| s.reserve(kind, key, Arc::clone(&handle)))?;
        debug!(%kind, key, "reserved");

        // Created outside the async block so an unpolled future still rolls back
        let mut reservation = Reservation {
            cache: self.clone(),
            kind,
            key: key.to_string(),
            seq,
            handle,
            settled: false,
        };
        Ok(Box::pin(async move {
            let result = match future.await {
                Ok(payload) => reservation
                    .cache
                    .with_state(|s| admit(s, &reservation.key, seq, payload)),
                Err(source) => {
                    error!(%kind, key = %reservation.key, error = %source, "load failed");
                    reservation
                        .cache
                        .with_state(|s| s.rollback(kind, &reservation.key, seq));
                    Err(CacheError::Load {
                        kind,
                        key: reservation.key.clone(),
                        source,
                    })
                }
            };
            settle(&reservation.handle, &result);
            reservation.settled = true;
            result
        }))
    }

    fn put_sync<T>(&self, kind: EntryKind, key: &str, payload: T, admit: Admit<I, V, G, T>) -> Result<()> {
        let handle = Arc::new(LoadHandle::detached());
        let result = self.with_state(|s| {
            let seq = s.reserve(kind, key, Arc::clone(&handle))?;
            admit(s, key, seq, payload)
        });
        settle(&handle, &result);
        result.map(|_| ())
    }

    /// Reserve `image_id` and admit the image once `load` resolves
    ///
    /// The reservation happens before this returns, so a second put for the
    /// same key fails with `DuplicateKey` while the first is in flight.
    ///
    /// # Returns
    /// * `Result<PutFuture>` - Future driving the load; rejects with the
    ///   loader's error, `InvalidSize` or `CacheSizeExceeded`, rolling the
    ///   reservation back in each case
    pub fn put_image_load_object(&self, image_id: &str, load: LoadObject<I>) -> Result<PutFuture> {
        self.put_load_object(EntryKind::Image, image_id, load, State::admit_image)
    }

    /// Admit an already-decoded image
    pub fn put_image_sync(&self, image_id: &str, image: I) -> Result<()> {
        self.put_sync(EntryKind::Image, image_id, image, State::admit_image)
    }

    /// Reserve `volume_id` and attach the volume once `load` resolves
    ///
    /// Cached images the volume references become shared with it. Volumes do
    /// not count against the budget; call [`reclaim`](Self::reclaim) with the
    /// volume's image ids beforehand to make room for its slices.
    pub fn put_volume_load_object(&self, volume_id: &str, load: LoadObject<V>) -> Result<PutFuture> {
        self.put_load_object(EntryKind::Volume, volume_id, load, State::admit_volume)
    }

    /// Attach an already-built volume
    pub fn put_volume_sync(&self, volume_id: &str, volume: V) -> Result<()> {
        self.put_sync(EntryKind::Volume, volume_id, volume, State::admit_volume)
    }

    /// Reserve `geometry_id` and attach the geometry once `load` resolves
    ///
    /// Geometry sizes are recorded but not counted against the budget.
    pub fn put_geometry_load_object(&self, geometry_id: &str, load: LoadObject<G>) -> Result<PutFuture> {
        self.put_load_object(EntryKind::Geometry, geometry_id, load, State::admit_geometry)
    }

    /// Handle of the load behind `image_id`; bumps recency
    pub fn image_load_object(&self, image_id: &str) -> Option<Arc<LoadHandle>> {
        self.with_state(|s| {
            s.ledger.touch(EntryKind::Image, image_id);
            s.ledger.images.get(image_id).map(|e| Arc::clone(&e.load))
        })
    }

    /// Loaded image for `image_id`; bumps recency
    pub fn image(&self, image_id: &str) -> Option<Arc<I>> {
        self.with_state(|s| {
            s.ledger.touch(EntryKind::Image, image_id);
            let image = s.ledger.images.get(image_id).and_then(|e| e.image.clone());
            s.record_read(image.is_some());
            image
        })
    }

    /// Ledger entry for `image_id`, without touching recency
    pub fn image_entry(&self, image_id: &str) -> Option<CachedImage<I>> {
        self.with_state(|s| s.ledger.images.get(image_id).cloned())
    }

    /// True only if `image_id` is in the image store and loaded
    pub fn is_loaded(&self, image_id: &str) -> bool {
        self.with_state(|s| s.ledger.images.get(image_id).is_some_and(|e| e.loaded))
    }

    /// Handle of the load behind `volume_id`; bumps recency
    pub fn volume_load_object(&self, volume_id: &str) -> Option<Arc<LoadHandle>> {
        self.with_state(|s| {
            s.ledger.touch(EntryKind::Volume, volume_id);
            s.ledger.volumes.get(volume_id).map(|e| Arc::clone(&e.load))
        })
    }

    /// Loaded volume for `volume_id`; bumps recency
    pub fn volume(&self, volume_id: &str) -> Option<Arc<V>> {
        self.with_state(|s| {
            s.ledger.touch(EntryKind::Volume, volume_id);
            let volume = s.ledger.volumes.get(volume_id).and_then(|e| e.volume.clone());
            s.record_read(volume.is_some());
            volume
        })
    }

    /// Ledger entry for `volume_id`, without touching recency
    pub fn volume_entry(&self, volume_id: &str) -> Option<CachedVolume<V>> {
        self.with_state(|s| s.ledger.volumes.get(volume_id).cloned())
    }

    /// Loaded geometry for `geometry_id`; bumps recency
    pub fn geometry(&self, geometry_id: &str) -> Option<Arc<G>> {
        self.with_state(|s| {
            s.ledger.touch(EntryKind::Geometry, geometry_id);
            let geometry = s.ledger.geometries.get(geometry_id).and_then(|e| e.geometry.clone());
            s.record_read(geometry.is_some());
            geometry
        })
    }

    /// Ledger entry for `geometry_id`, without touching recency
    pub fn geometry_entry(&self, geometry_id: &str) -> Option<CachedGeometry<G>> {
        self.with_state(|s| s.ledger.geometries.get(geometry_id).cloned())
    }

    /// All loaded volumes, in the order they were put
    pub fn volumes(&self) -> Vec<Arc<V>> {
        self.with_state(|s| s.loaded_volumes())
    }

    /// Loaded volumes derived from `volume_id`
    pub fn filter_volumes_by_reference_id(&self, volume_id: &str) -> Vec<Arc<V>> {
        self.with_state(|s| {
            s.loaded_volumes()
                .into_iter()
                .filter(|volume| volume.referenced_volume_id() == Some(volume_id))
                .collect()
        })
    }

    /// First loaded volume with a slice matching `image_id` (scheme ignored)
    ///
    /// # Returns
    /// * The volume and the slice's index within it
    pub fn volume_containing_image_id(&self, image_id: &str) -> Option<(Arc<V>, usize)> {
        let uri = image_id_to_uri(image_id);
        self.with_state(|s| {
            s.loaded_volumes().into_iter().find_map(|volume| {
                let index = volume.image_uri_index(uri)?;
                Some((volume, index))
            })
        })
    }

    /// First cached image whose id matches `image_id` once schemes are stripped
    pub fn cached_image_by_uri(&self, image_id: &str) -> Option<CachedImage<I>> {
        let uri = image_id_to_uri(image_id);
        self.with_state(|s| {
            s.ledger
                .images
                .values()
                .filter(|e| image_id_to_uri(&e.image_id) == uri)
                .min_by_key(|e| e.seq)
                .cloned()
        })
    }

    /// Remove an image entry, loaded or in flight
    ///
    /// # Errors
    /// `NotFound` if absent; `SharedKeyViolation` if a volume owns the image.
    pub fn remove_image_load_object(&self, image_id: &str) -> Result<()> {
        self.with_state(|s| s.remove_image(image_id))
    }

    /// Remove a volume entry and release its images back to the volatile pool
    pub fn remove_volume_load_object(&self, volume_id: &str) -> Result<()> {
        self.with_state(|s| s.remove_volume(volume_id))
    }

    /// Remove a geometry entry
    pub fn remove_geometry_load_object(&self, geometry_id: &str) -> Result<()> {
        self.with_state(|s| s.remove_geometry(geometry_id))
    }

    /// Remove every volume, then every image, then every geometry
    pub fn purge_cache(&self) {
        self.with_state(|s| s.purge_all())
    }

    /// Remove every volume, leaving their images cached but unshared
    pub fn purge_volume_cache(&self) {
        self.with_state(|s| {
            s.purge_volumes();
        })
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent<I, V, G>> {
        self.shared.events.subscribe()
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.shared.stats
    }

    /// Point-in-time view of budget, occupancy and counters
    pub fn snapshot(&self) -> CacheSnapshot {
        let stats = Arc::clone(&self.shared.stats);
        self.with_state(|s| CacheSnapshot {
            max_cache_size: s.budget.max_cache_size(),
            cache_size: s.budget.image_cache_size(),
            bytes_available: s.budget.bytes_available(),
            shared_bytes: s.ledger.shared_bytes(),
            images: s.ledger.images.len(),
            volumes: s.ledger.volumes.len(),
            geometries: s.ledger.geometries.len(),
            counters: stats.counters(),
        })
    }
}

impl<I: ImagePayload, V: VolumePayload, G: GeometryPayload> State<I, V, G> {
    fn reserve(&mut self, kind: EntryKind, key: &str, load: Arc<LoadHandle>) -> Result<u64> {
        match kind {
            EntryKind::Image => self.ledger.reserve_image(key, load),
            EntryKind::Volume => self.ledger.reserve_volume(key, load),
            EntryKind::Geometry => self.ledger.reserve_geometry(key, load),
        }
    }

    /// Drop the reservation numbered `seq`, if it is still the live entry
    fn rollback(&mut self, kind: EntryKind, key: &str, seq: u64) {
        let removed = match kind {
            EntryKind::Image => self.ledger.images.remove_generation(key, seq).is_some(),
            EntryKind::Volume => self.ledger.volumes.remove_generation(key, seq).is_some(),
            EntryKind::Geometry => self.ledger.geometries.remove_generation(key, seq).is_some(),
        };
        if removed {
            debug!(%kind, key, "reservation rolled back");
        }
    }

    fn record_read(&self, hit: bool) {
        if hit {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
    }

    fn loaded_volumes(&self) -> Vec<Arc<V>> {
        let mut entries: Vec<&CachedVolume<V>> = self.ledger.volumes.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().filter_map(|e| e.volume.clone()).collect()
    }

    fn admit_image(&mut self, image_id: &str, seq: u64, image: I) -> Result<PutOutcome> {
        if self.ledger.images.get_generation_mut(image_id, seq).is_none() {
            warn!(image_id, "image was purged from the cache before it completed loading");
            return Ok(PutOutcome::Abandoned);
        }

        let result = self.attach_image(image_id, seq, Arc::new(image));
        if result.is_err() {
            self.rollback(EntryKind::Image, image_id, seq);
        }
        result
    }

    fn attach_image(&mut self, image_id: &str, seq: u64, image: Arc<I>) -> Result<PutOutcome> {
        let size = image.size_in_bytes().ok_or_else(|| CacheError::InvalidSize {
            kind: EntryKind::Image,
            key: image_id.to_string(),
        })?;

        if !self.budget.is_cacheable(&self.ledger, size) {
            self.stats.record_rejection();
            let available = self.budget.available_for_new(&self.ledger);
            warn!(image_id, size, available, "cache size exceeded");
            return Err(CacheError::CacheSizeExceeded {
                requested: size,
                available,
            });
        }

        self.reclaim(size, None)?;

        let Some(entry) = self.ledger.images.get_generation_mut(image_id, seq) else {
            return Ok(PutOutcome::Abandoned);
        };
        entry.loaded = true;
        entry.size_in_bytes = size;
        // A payload backed by a volume buffer arrives already shared; otherwise
        // keep any link a volume made while this image was in flight.
        if let Some(volume_id) = image.shared_cache_key() {
            entry.shared_cache_key = Some(volume_id.to_string());
        }
        entry.image = Some(image);
        let snapshot = entry.clone();

        self.budget.increment(size);
        self.stats.record_insert();
        debug!(image_id, size, occupied = self.budget.image_cache_size(), "image added");
        self.events.emit(CacheEvent::ImageAdded { image: snapshot });
        Ok(PutOutcome::Loaded)
    }

    fn admit_volume(&mut self, volume_id: &str, seq: u64, volume: V) -> Result<PutOutcome> {
        let volume = Arc::new(volume);
        let Some(entry) = self.ledger.volumes.get_generation_mut(volume_id, seq) else {
            warn!(volume_id, "volume was purged from the cache before it completed loading");
            return Ok(PutOutcome::Abandoned);
        };
        entry.loaded = true;
        entry.volume = Some(Arc::clone(&volume));
        let snapshot = entry.clone();

        let linked = self.ledger.link_volume(volume_id, volume.image_ids());
        self.stats.record_insert();
        debug!(volume_id, slices = volume.image_ids().len(), linked, "volume added");
        self.events.emit(CacheEvent::VolumeAdded { volume: snapshot });
        Ok(PutOutcome::Loaded)
    }

    fn admit_geometry(&mut self, geometry_id: &str, seq: u64, geometry: G) -> Result<PutOutcome> {
        if self.ledger.geometries.get_generation_mut(geometry_id, seq).is_none() {
            warn!(geometry_id, "geometry was removed from the cache before it completed loading");
            return Ok(PutOutcome::Abandoned);
        }

        let Some(size) = geometry.size_in_bytes() else {
            self.rollback(EntryKind::Geometry, geometry_id, seq);
            return Err(CacheError::InvalidSize {
                kind: EntryKind::Geometry,
                key: geometry_id.to_string(),
            });
        };

        let geometry = Arc::new(geometry);
        if let Some(entry) = self.ledger.geometries.get_generation_mut(geometry_id, seq) {
            entry.loaded = true;
            entry.size_in_bytes = size;
            entry.geometry = Some(Arc::clone(&geometry));
        }

        self.stats.record_insert();
        debug!(geometry_id, size, "geometry added");
        self.events.emit(CacheEvent::GeometryAdded {
            geometry_id: geometry_id.to_string(),
            geometry,
        });
        Ok(PutOutcome::Loaded)
    }

    pub(crate) fn remove_image(&mut self, image_id: &str) -> Result<()> {
        let entry = self
            .ledger
            .images
            .get(image_id)
            .ok_or_else(|| CacheError::not_found(EntryKind::Image, image_id))?;
        if let Some(volume_id) = &entry.shared_cache_key {
            return Err(CacheError::SharedKeyViolation {
                image_id: image_id.to_string(),
                volume_id: volume_id.clone(),
            });
        }

        let entry = self.ledger.images.remove(image_id)?;
        self.budget.decrement(entry.size_in_bytes);
        self.teardown.push(Teardown::Load {
            key: image_id.to_string(),
            load: Arc::clone(&entry.load),
        });

        debug!(image_id, size = entry.size_in_bytes, "image removed");
        self.events.emit(CacheEvent::ImageRemoved {
            image_id: image_id.to_string(),
            image: entry,
        });
        Ok(())
    }

    fn remove_volume(&mut self, volume_id: &str) -> Result<()> {
        let entry = self.ledger.volumes.remove(volume_id)?;
        let unlinked = self.ledger.unlink_volume(volume_id);
        self.teardown.push(Teardown::Volume {
            volume_id: volume_id.to_string(),
            load: Arc::clone(&entry.load),
            volume: entry.volume.clone(),
        });

        debug!(volume_id, unlinked, "volume removed");
        self.events.emit(CacheEvent::VolumeRemoved {
            volume_id: volume_id.to_string(),
            volume: entry,
        });
        Ok(())
    }

    fn remove_geometry(&mut self, geometry_id: &str) -> Result<()> {
        let entry = self.ledger.geometries.remove(geometry_id)?;
        self.teardown.push(Teardown::Load {
            key: geometry_id.to_string(),
            load: entry.load,
        });

        debug!(geometry_id, "geometry removed");
        self.events.emit(CacheEvent::GeometryRemoved {
            geometry_id: geometry_id.to_string(),
        });
        Ok(())
    }

    fn purge_volumes(&mut self) -> usize {
        let volume_ids = self.ledger.volumes.keys_by_insertion();
        for volume_id in &volume_ids {
            if let Err(e) = self.remove_volume(volume_id) {
                warn!(volume_id = %volume_id, error = %e, "failed to purge volume");
            }
        }
        info!(volumes = volume_ids.len(), "volume cache purged");
        volume_ids.len()
    }

    fn purge_all(&mut self) {
        let volumes = self.purge_volumes();

        // Images may still name volumes that were never cached here.
        for image in self.ledger.images.values_mut() {
            image.shared_cache_key = None;
        }

        let image_ids = self.ledger.images.keys_by_insertion();
        for image_id in &image_ids {
            if let Err(e) = self.remove_image(image_id) {
                warn!(image_id = %image_id, error = %e, "failed to purge image");
            }
        }

        let geometry_ids = self.ledger.geometries.keys_by_insertion();
        for geometry_id in &geometry_ids {
            if let Err(e) = self.remove_geometry(geometry_id) {
                warn!(geometry_id = %geometry_id, error = %e, "failed to purge geometry");
            }
        }

        info!(
            volumes,
            images = image_ids.len(),
            geometries = geometry_ids.len(),
            "cache purged"
        );
    }
}
