use glam::{DVec3, IVec3};
use serde::{Deserialize, Serialize};

/// Horizontal size of a chunk column in blocks.
pub const CHUNK_SIZE: i32 = 16;

/// Edge length of a renderable region (one 16x16x16 section).
pub const REGION_SIZE: i32 = 16;

/// Number of quadrant slices per chunk (2x2 in XZ, full height).
pub const SLICES_PER_CHUNK: usize = 4;

/// A chunk column in the voxel world, identified by its integer XZ coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId {
    pub x: i32,
    pub z: i32,
}

impl ChunkId {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The chunk column containing a block position.
    pub fn containing(pos: IVec3) -> Self {
        Self {
            x: pos.x >> 4,
            z: pos.z >> 4,
        }
    }

    /// Block X of the chunk's minimum corner.
    pub fn base_x(&self) -> i32 {
        self.x * CHUNK_SIZE
    }

    /// Block Z of the chunk's minimum corner.
    pub fn base_z(&self) -> i32 {
        self.z * CHUNK_SIZE
    }
}

/// Identifies one slice of one chunk. Keys debounce stamps and visibility records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SliceKey {
    pub chunk_x: i32,
    pub slice_index: u8,
    pub chunk_z: i32,
}

impl SliceKey {
    pub fn new(chunk: ChunkId, slice_index: u8) -> Self {
        Self {
            chunk_x: chunk.x,
            slice_index,
            chunk_z: chunk.z,
        }
    }

    pub fn chunk(&self) -> ChunkId {
        ChunkId::new(self.chunk_x, self.chunk_z)
    }

    /// Whether this key references the given chunk.
    pub fn belongs_to(&self, chunk: ChunkId) -> bool {
        self.chunk_x == chunk.x && self.chunk_z == chunk.z
    }
}

/// Aligned base coordinate of a 16x16x16 renderable region.
///
/// Ordered lexicographically by (x, y, z) so pending sets drain deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionOrigin {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl RegionOrigin {
    /// Origin of the region containing a block position.
    pub fn containing(pos: IVec3) -> Self {
        Self {
            x: (pos.x >> 4) << 4,
            y: (pos.y >> 4) << 4,
            z: (pos.z >> 4) << 4,
        }
    }

    pub fn as_ivec3(&self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }

    /// The chunk column this region belongs to.
    pub fn chunk(&self) -> ChunkId {
        ChunkId::containing(self.as_ivec3())
    }

    /// World-space center of the region.
    pub fn center(&self) -> DVec3 {
        let half = f64::from(REGION_SIZE) / 2.0;
        DVec3::new(
            f64::from(self.x) + half,
            f64::from(self.y) + half,
            f64::from(self.z) + half,
        )
    }
}

/// Observer (camera) state sampled from the host at a sub-tick fraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverPose {
    /// Interpolated eye position at the requested tick fraction.
    pub position: DVec3,
    /// Eye position at the previous simulation tick.
    pub previous_position: DVec3,
    /// Unit look direction.
    pub forward: DVec3,
    /// Pitch in degrees, -90 (up) to 90 (down).
    pub pitch_degrees: f32,
}

impl ObserverPose {
    /// A stationary observer at `position` looking along `forward`.
    pub fn stationary(position: DVec3, forward: DVec3) -> Self {
        Self {
            position,
            previous_position: position,
            forward: forward.normalize_or_zero(),
            pitch_degrees: 0.0,
        }
    }
}

/// Axis-aligned box in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// The box covering one region.
    pub fn of_region(origin: RegionOrigin) -> Self {
        let min = origin.as_ivec3().as_dvec3();
        Self {
            min,
            max: min + DVec3::splat(f64::from(REGION_SIZE)),
        }
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }
}
