mod coherence;
mod geometry;
mod level;
mod pool;
mod trace;

pub use geometry::{
    Aabb, Decal, Object, ObjectId, Plane, Sector, SectorId, Side, SideFlags, SideId, SideMaterial,
    SubsectorId, Vertex, VertexId, Wall, WallId,
};
pub use level::Level;
pub use pool::{Handle, Pool};
pub use trace::{TraceError, trace};

#[cfg(test)]
pub use level::tests as fixtures;
