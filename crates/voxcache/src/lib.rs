//! # voxcache
//!
//! Byte-budgeted in-memory cache for decoded medical images, image volumes
//! and geometry.
//!
//! ## Architecture
//! - **Ledger**: three AHash-keyed stores sharing one logical recency clock
//! - **Admission**: loaded, unshared images count against the byte budget
//! - **Eviction**: two-phase LRU purge that spares a volume's slices until last
//! - **Sharing**: images whose pixels live in a cached volume are never evicted
//! - **Loads**: puts reserve their key at once and admit when the loader resolves
//!
//! ```no_run
//! use voxcache::{Cache, CacheConfig, DecodedImage};
//! use bytes::Bytes;
//!
//! let cache: Cache = Cache::new(CacheConfig::default())?;
//! cache.put_image_sync("wadors:study/1", DecodedImage::new("wadors:study/1", 512, 512, Bytes::new()))?;
//! assert!(cache.is_loaded("wadors:study/1"));
//! # Ok::<(), voxcache::CacheError>(())
//! ```

#![warn(missing_docs)]

mod admission;
mod cache;
mod config;
mod entity;
mod error;
mod events;
mod eviction;
mod ledger;
mod load;
mod stats;
mod uri;

pub use admission::DEFAULT_MAX_CACHE_SIZE;
pub use cache::{Cache, PutFuture, PutOutcome};
pub use config::CacheConfig;
pub use entity::{
    DecodedImage, Geometry, GeometryKind, GeometryPayload, ImagePayload, ImageVolume,
    VolumePayload,
};
pub use error::{CacheError, ConfigError, Result};
pub use events::CacheEvent;
pub use ledger::{CachedGeometry, CachedImage, CachedVolume, EntryKind};
pub use load::{BoxFuture, Callback, LoadError, LoadHandle, LoadObject, LoadStatus};
pub use stats::{CacheSnapshot, CacheStats, StatCounters};
pub use uri::image_id_to_uri;
