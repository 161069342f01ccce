//! Entity contracts for cached payloads
//!
//! The cache never decodes pixels or builds meshes itself. It only needs the
//! shape described by these traits. [`DecodedImage`], [`ImageVolume`] and
//! [`Geometry`] are ready-made implementations backed by [`Bytes`] buffers.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::uri::image_id_to_uri;

/// A decoded 2-D image as seen by the cache
pub trait ImagePayload: Send + Sync + 'static {
    /// Bytes this image occupies; `None` when the loader could not tell
    fn size_in_bytes(&self) -> Option<u64>;

    /// Volume this image's buffer already belongs to, if any
    fn shared_cache_key(&self) -> Option<&str> {
        None
    }
}

/// A 3-D volume assembled from 2-D image slices
pub trait VolumePayload: Send + Sync + 'static {
    /// Image ids of the constituent slices, in slice order
    fn image_ids(&self) -> &[String];

    /// Stop any streaming still filling this volume
    fn cancel_loading(&self) {}

    /// Release the backing buffer
    fn dispose(&self) {}

    /// Volume this one was derived from, used for cross-volume filtering
    fn referenced_volume_id(&self) -> Option<&str> {
        None
    }

    /// Position of the slice whose normalized id equals `uri`
    fn image_uri_index(&self, uri: &str) -> Option<usize> {
        self.image_ids()
            .iter()
            .position(|image_id| image_id_to_uri(image_id) == uri)
    }
}

/// Geometry (contours, surfaces) as seen by the cache
pub trait GeometryPayload: Send + Sync + 'static {
    /// Bytes this geometry occupies; `None` when unknown
    fn size_in_bytes(&self) -> Option<u64>;
}

/// Pixel data for one decoded image
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Image id the loader resolved
    pub image_id: String,
    /// Number of rows
    pub rows: u32,
    /// Number of columns
    pub columns: u32,
    /// Raw pixel buffer
    pub pixel_data: Bytes,
    /// Set when the pixel buffer is a view into a volume
    pub shared_cache_key: Option<String>,
}

impl DecodedImage {
    /// Create an image owning its pixel buffer
    pub fn new(image_id: impl Into<String>, rows: u32, columns: u32, pixel_data: Bytes) -> Self {
        Self {
            image_id: image_id.into(),
            rows,
            columns,
            pixel_data,
            shared_cache_key: None,
        }
    }

    /// Mark the pixel buffer as borrowed from `volume_id`
    pub fn with_shared_cache_key(mut self, volume_id: impl Into<String>) -> Self {
        self.shared_cache_key = Some(volume_id.into());
        self
    }
}

impl ImagePayload for DecodedImage {
    fn size_in_bytes(&self) -> Option<u64> {
        Some(self.pixel_data.len() as u64)
    }

    fn shared_cache_key(&self) -> Option<&str> {
        self.shared_cache_key.as_deref()
    }
}

/// A volume whose scalar buffer is filled slice by slice
#[derive(Debug)]
pub struct ImageVolume {
    /// Volume id
    pub volume_id: String,
    image_ids: Vec<String>,
    referenced_volume_id: Option<String>,
    scalar_data: Mutex<Option<Bytes>>,
    loading_cancelled: AtomicBool,
}

impl ImageVolume {
    /// Create a volume over the given slices
    pub fn new(volume_id: impl Into<String>, image_ids: Vec<String>, scalar_data: Bytes) -> Self {
        Self {
            volume_id: volume_id.into(),
            image_ids,
            referenced_volume_id: None,
            scalar_data: Mutex::new(Some(scalar_data)),
            loading_cancelled: AtomicBool::new(false),
        }
    }

    /// Record the volume this one was derived from
    pub fn with_referenced_volume_id(mut self, volume_id: impl Into<String>) -> Self {
        self.referenced_volume_id = Some(volume_id.into());
        self
    }

    /// Scalar buffer, or `None` once disposed
    pub fn scalar_data(&self) -> Option<Bytes> {
        self.scalar_data.lock().clone()
    }

    /// Whether streaming into this volume was cancelled
    pub fn is_loading_cancelled(&self) -> bool {
        self.loading_cancelled.load(Ordering::Acquire)
    }
}

impl VolumePayload for ImageVolume {
    fn image_ids(&self) -> &[String] {
        &self.image_ids
    }

    fn cancel_loading(&self) {
        self.loading_cancelled.store(true, Ordering::Release);
    }

    fn dispose(&self) {
        self.scalar_data.lock().take();
    }

    fn referenced_volume_id(&self) -> Option<&str> {
        self.referenced_volume_id.as_deref()
    }
}

/// Kind of geometry held by a [`Geometry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    /// Planar contour sets
    Contour,
    /// Triangulated surface
    Surface,
}

/// Contour or surface data
#[derive(Debug, Clone)]
pub struct Geometry {
    /// Geometry id
    pub geometry_id: String,
    /// What the buffer encodes
    pub kind: GeometryKind,
    /// Serialized points or triangles
    pub data: Bytes,
}

impl Geometry {
    /// Create a geometry over `data`
    pub fn new(geometry_id: impl Into<String>, kind: GeometryKind, data: Bytes) -> Self {
        Self {
            geometry_id: geometry_id.into(),
            kind,
            data,
        }
    }
}

impl GeometryPayload for Geometry {
    fn size_in_bytes(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}
