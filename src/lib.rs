//! Sector/portal level geometry engine.
//!
//! A level is an editable graph of vertices, walls, sides and sectors.
//! Every mutation keeps the derived data coherent: sector membership is
//! re-derived by tracing side loops, sector surfaces are re-tessellated
//! into triangles and convex subsectors, the block grid is refreshed and
//! sector-to-sector visibility is re-flooded. Rendering walks portals
//! recursively and emits a backend-neutral command stream with stencil
//! masking and oblique near-plane clipping.
//!
//! Entry points:
//! * [`topo::Level`]: the mutable model and its batching commit pipeline.
//! * [`query`]: point location, proximity and visibility queries.
//! * [`render::Renderer`]: per-frame portal command streams.
//! * [`io`]: binary level files.

pub mod grid;
pub mod io;
pub mod query;
pub mod render;
pub mod tess;
pub mod topo;
pub mod vis;

pub use topo::Level;
