//! Lifecycle events
//!
//! Events go out on a `tokio::sync::broadcast` channel. Nothing is buffered
//! when nobody subscribes, and a subscriber that falls more than the channel
//! capacity behind loses the oldest events.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::ledger::{CachedImage, CachedVolume};

/// Lifecycle event emitted by the cache
pub enum CacheEvent<I, V, G> {
    /// An image was admitted
    ImageAdded {
        /// Entry as it stood right after admission
        image: CachedImage<I>,
    },
    /// An image entry was removed (explicitly, by eviction, or by purge)
    ImageRemoved {
        /// Removed key
        image_id: String,
        /// Entry as it stood right before removal
        image: CachedImage<I>,
    },
    /// A volume was attached to its entry
    VolumeAdded {
        /// Entry as it stood right after attachment
        volume: CachedVolume<V>,
    },
    /// A volume entry was removed
    VolumeRemoved {
        /// Removed key
        volume_id: String,
        /// Entry as it stood right before removal
        volume: CachedVolume<V>,
    },
    /// A geometry was attached to its entry
    GeometryAdded {
        /// Geometry key
        geometry_id: String,
        /// Resolved payload
        geometry: Arc<G>,
    },
    /// A geometry entry was removed
    GeometryRemoved {
        /// Removed key
        geometry_id: String,
    },
}

impl<I, V, G> CacheEvent<I, V, G> {
    /// Short name, used in logs and by the replay tool
    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::ImageAdded { .. } => "IMAGE_ADDED",
            CacheEvent::ImageRemoved { .. } => "IMAGE_REMOVED",
            CacheEvent::VolumeAdded { .. } => "VOLUME_ADDED",
            CacheEvent::VolumeRemoved { .. } => "VOLUME_REMOVED",
            CacheEvent::GeometryAdded { .. } => "GEOMETRY_ADDED",
            CacheEvent::GeometryRemoved { .. } => "GEOMETRY_REMOVED",
        }
    }

    /// Key of the entry the event is about
    pub fn key(&self) -> &str {
        match self {
            CacheEvent::ImageAdded { image } => &image.image_id,
            CacheEvent::ImageRemoved { image_id, .. } => image_id,
            CacheEvent::VolumeAdded { volume } => &volume.volume_id,
            CacheEvent::VolumeRemoved { volume_id, .. } => volume_id,
            CacheEvent::GeometryAdded { geometry_id, .. } => geometry_id,
            CacheEvent::GeometryRemoved { geometry_id } => geometry_id,
        }
    }
}

impl<I, V, G> Clone for CacheEvent<I, V, G> {
    fn clone(&self) -> Self {
        match self {
            CacheEvent::ImageAdded { image } => CacheEvent::ImageAdded {
                image: image.clone(),
            },
            CacheEvent::ImageRemoved { image_id, image } => CacheEvent::ImageRemoved {
                image_id: image_id.clone(),
                image: image.clone(),
            },
            CacheEvent::VolumeAdded { volume } => CacheEvent::VolumeAdded {
                volume: volume.clone(),
            },
            CacheEvent::VolumeRemoved { volume_id, volume } => CacheEvent::VolumeRemoved {
                volume_id: volume_id.clone(),
                volume: volume.clone(),
            },
            CacheEvent::GeometryAdded {
                geometry_id,
                geometry,
            } => CacheEvent::GeometryAdded {
                geometry_id: geometry_id.clone(),
                geometry: Arc::clone(geometry),
            },
            CacheEvent::GeometryRemoved { geometry_id } => CacheEvent::GeometryRemoved {
                geometry_id: geometry_id.clone(),
            },
        }
    }
}

impl<I, V, G> fmt::Debug for CacheEvent<I, V, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.key())
    }
}

/// Sending side of the event stream
pub(crate) struct EventBus<I, V, G> {
    tx: broadcast::Sender<CacheEvent<I, V, G>>,
}

impl<I, V, G> Clone for EventBus<I, V, G> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<I, V, G> EventBus<I, V, G> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: CacheEvent<I, V, G>) {
        tracing::trace!(event = event.name(), key = event.key(), "cache event");
        // No receivers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent<I, V, G>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{DecodedImage, Geometry, GeometryKind, ImageVolume};
    use bytes::Bytes;

    type TestEvent = CacheEvent<DecodedImage, ImageVolume, Geometry>;

    #[test]
    fn test_emit_without_subscribers() {
        let bus: EventBus<DecodedImage, ImageVolume, Geometry> = EventBus::new(4);
        bus.emit(CacheEvent::GeometryRemoved {
            geometry_id: "g".to_string(),
        });
    }

    #[test]
    fn test_subscriber_receives_in_order() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        let geometry = Arc::new(Geometry::new("g", GeometryKind::Contour, Bytes::new()));
        let added: TestEvent = CacheEvent::GeometryAdded {
            geometry_id: "g".to_string(),
            geometry,
        };
        bus.emit(added);
        bus.emit(CacheEvent::GeometryRemoved {
            geometry_id: "g".to_string(),
        });

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.name(), "GEOMETRY_ADDED");
        assert_eq!(second.name(), "GEOMETRY_REMOVED");
        assert_eq!(second.key(), "g");
        assert_eq!(format!("{:?}", second), "GEOMETRY_REMOVED(g)");
    }
}
