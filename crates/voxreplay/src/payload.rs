//! Synthetic payloads for scripted workloads
//!
//! Scripts only care about sizes, so these payloads report a byte count
//! without holding the bytes. A script can ask for a 4 GB image against a
//! 3 GB budget and exercise the rejection path without allocating anything.

use voxcache::{Cache, GeometryPayload, ImagePayload, ImageVolume};

/// Cache specialised to the replay tool's payloads
pub type ReplayCache = Cache<SyntheticImage, ImageVolume, SyntheticGeometry>;

/// Image that claims `size` bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticImage {
    pub size: u64,
}

impl SyntheticImage {
    pub fn new(size: u64) -> Self {
        Self { size }
    }
}

impl ImagePayload for SyntheticImage {
    fn size_in_bytes(&self) -> Option<u64> {
        Some(self.size)
    }
}

/// Geometry that claims `size` bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticGeometry {
    pub size: u64,
}

impl SyntheticGeometry {
    pub fn new(size: u64) -> Self {
        Self { size }
    }
}

impl GeometryPayload for SyntheticGeometry {
    fn size_in_bytes(&self) -> Option<u64> {
        Some(self.size)
    }
}
