//! Backend-neutral rendering.
//!
//! The portal renderer never touches a graphics API. It emits a flat
//! [`RenderCmd`] stream; a [`RenderBackend`] executes the stream against
//! whatever API it wraps. Stencil-based portal masking is expressed as
//! three [`MaskPhase`] commands around the recursive interior.

mod alloc;
mod pick;
mod portal;
mod view;

pub use alloc::{CacheSlot, MeshRecord, RenderCache, SpanAlloc};
pub use pick::{PickInfo, pick};
pub use portal::{MAX_PORTAL_DEPTH, Renderer};
pub use view::{
    ViewCamera, oblique_near_plane, portal_plane_view, portal_view, side_model,
};

use glam::Mat4;

use crate::topo::{SectorId, SideId};

/// Pixel-space clip rectangle, y-down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl ScissorRect {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    pub fn intersect(&self, other: &ScissorRect) -> ScissorRect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.w).min(other.x + other.w);
        let y1 = (self.y + self.h).min(other.y + other.h);
        ScissorRect::new(x0, y0, x1 - x0, y1 - y0)
    }
}

/// Stencil phases of one portal, in emission order. The recursive interior
/// of the portal is emitted between `Incr` and `Depth`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskPhase {
    /// Draw the portal quad into the stencil buffer, raising it to the new
    /// reference value inside the portal shape.
    Incr,
    /// Re-draw the quad depth-only, resealing the depth buffer over the
    /// hole after the interior finished.
    Depth,
    /// Lower the stencil back for the enclosing pass.
    Decr,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RenderCmd {
    Scissor(ScissorRect),
    /// Camera matrices for all subsequent draws of this pass.
    View { view: Mat4, proj: Mat4 },
    PortalMask {
        side: SideId,
        stencil_ref: u8,
        phase: MaskPhase,
    },
    /// Floor, ceiling and wall surfaces of one sector, stencil-tested
    /// against `stencil_ref`.
    Surfaces { sector: SectorId, stencil_ref: u8 },
    /// Objects resident in one sector, drawn after its surfaces.
    Sprites { sector: SectorId, stencil_ref: u8 },
}

/// Executor for a command stream. Implementations provide the per-command
/// hooks; [`RenderBackend::execute`] does the dispatch.
pub trait RenderBackend {
    fn set_scissor(&mut self, rect: ScissorRect);
    fn set_view(&mut self, view: Mat4, proj: Mat4);
    fn portal_mask(&mut self, side: SideId, stencil_ref: u8, phase: MaskPhase);
    fn draw_surfaces(&mut self, sector: SectorId, stencil_ref: u8);
    fn draw_sprites(&mut self, sector: SectorId, stencil_ref: u8);

    fn execute(&mut self, cmds: &[RenderCmd]) {
        for cmd in cmds {
            match *cmd {
                RenderCmd::Scissor(rect) => self.set_scissor(rect),
                RenderCmd::View { view, proj } => self.set_view(view, proj),
                RenderCmd::PortalMask {
                    side,
                    stencil_ref,
                    phase,
                } => self.portal_mask(side, stencil_ref, phase),
                RenderCmd::Surfaces {
                    sector,
                    stencil_ref,
                } => self.draw_surfaces(sector, stencil_ref),
                RenderCmd::Sprites {
                    sector,
                    stencil_ref,
                } => self.draw_sprites(sector, stencil_ref),
            }
        }
    }
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
