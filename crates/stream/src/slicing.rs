use framekeeper_common::{ChunkId, SLICES_PER_CHUNK, SliceKey};
use glam::{DVec3, IVec2, IVec3};

/// Quadrant slice of `pos` inside its chunk: bit 0 is the X half, bit 1 the Z half.
pub fn slice_index(pos: IVec3) -> u8 {
    let sx = (pos.x & 15) >> 3;
    let sz = (pos.z & 15) >> 3;
    ((sz << 1) | sx) as u8
}

/// Slice key for the quadrant containing `pos`.
pub fn slice_key(pos: IVec3) -> SliceKey {
    SliceKey::new(ChunkId::containing(pos), slice_index(pos))
}

/// World-space block column at the center of a quadrant.
pub fn quadrant_center(chunk: ChunkId, slice_index: u8) -> IVec2 {
    let sx = i32::from(slice_index & 1);
    let sz = i32::from((slice_index >> 1) & 1);
    IVec2::new(
        chunk.base_x() + if sx == 0 { 4 } else { 12 },
        chunk.base_z() + if sz == 0 { 4 } else { 12 },
    )
}

/// Point used for visibility tests of a slice, level with the observer.
pub fn representative_point(key: SliceKey, observer_y: f64) -> DVec3 {
    let c = quadrant_center(key.chunk(), key.slice_index);
    DVec3::new(
        f64::from(c.x) + 0.5,
        observer_y.round() + 0.5,
        f64::from(c.y) + 0.5,
    )
}

/// All slice keys of a chunk, in index order.
pub fn slices_of(chunk: ChunkId) -> impl Iterator<Item = SliceKey> {
    (0..SLICES_PER_CHUNK as u8).map(move |i| SliceKey::new(chunk, i))
}
