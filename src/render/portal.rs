//! Recursive stencil-portal command emission.
//!
//! One [`Renderer::render`] call walks the portal graph from the camera's
//! sector and flattens the result into a command stream. Each portal level
//! raises the stencil reference by one; the interior of a portal is
//! emitted between the `Incr` and `Depth` mask phases, so a backend can
//! replay the stream strictly in order.

use glam::{Mat4, Vec4};
use log::trace;

use crate::query;
use crate::render::alloc::RenderCache;
use crate::render::pick::{PickInfo, pick};
use crate::render::view::{
    ViewCamera, oblique_near_plane, portal_plane_view, portal_view, side_model,
};
use crate::render::{MaskPhase, RenderCmd, ScissorRect};
use crate::tess::cross2;
use crate::topo::{Level, SectorId, SideId};

/// Hard recursion ceiling; a hall of mirrors stops here.
pub const MAX_PORTAL_DEPTH: u32 = 8;

/// Abstract buffer units reserved for sector meshes.
const CACHE_CAPACITY: u32 = 1 << 20;

pub struct Renderer {
    cmds: Vec<RenderCmd>,
    cache: RenderCache,
    viewport: ScissorRect,
    level_uid: Option<u64>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            cmds: Vec::new(),
            cache: RenderCache::new(CACHE_CAPACITY),
            viewport: ScissorRect::new(0, 0, 0, 0),
            level_uid: None,
        }
    }

    /// Bind a level; switching to a different one drops all cached
    /// residency. [`render`](Self::render) calls this itself, so an
    /// explicit call is only needed to front-load the invalidation.
    pub fn set_level(&mut self, level: &Level) {
        if self.level_uid != Some(level.uid()) {
            self.cache.invalidate_all();
            self.level_uid = Some(level.uid());
        }
    }

    /// Drop all cached residency unconditionally.
    pub fn invalidate(&mut self) {
        self.cache.invalidate_all();
    }

    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    /// What the given viewport pixel of the last-rendered frame lands on.
    pub fn info_at(
        &self,
        level: &Level,
        camera: &ViewCamera,
        pixel: (i32, i32),
    ) -> Option<PickInfo> {
        pick(level, camera, self.viewport, pixel)
    }

    /// Build the command stream for one frame. Empty when the camera is
    /// outside every sector.
    pub fn render(
        &mut self,
        level: &Level,
        camera: &ViewCamera,
        viewport: ScissorRect,
    ) -> &[RenderCmd] {
        self.set_level(level);
        self.cmds.clear();
        self.viewport = viewport;
        let Some(sec) = query::sector_at_point(level, camera.pos) else {
            trace!("camera at {:?} is in the void", camera.pos);
            return &self.cmds;
        };
        self.render_pass(
            level,
            sec,
            camera.view_matrix(),
            camera.proj_matrix(),
            viewport,
            0,
            0,
            None,
        );
        &self.cmds
    }

    #[allow(clippy::too_many_arguments)]
    fn render_pass(
        &mut self,
        level: &Level,
        sec: SectorId,
        view: Mat4,
        proj: Mat4,
        scissor: ScissorRect,
        stencil_ref: u8,
        depth: u32,
        entry: Option<SideId>,
    ) {
        if scissor.is_empty() {
            return;
        }
        self.cmds.push(RenderCmd::Scissor(scissor));
        self.cmds.push(RenderCmd::View { view, proj });

        let visible = query::visible_sectors_from(level, sec);

        /* residency for every potentially visible sector's mesh */
        let mut resident: Vec<SectorId> = Vec::new();
        for &vs in &visible {
            let Some(sector) = level.sectors.get(vs) else {
                continue;
            };
            let units = sector.tris.len() as u32 * 3;
            if units == 0 {
                continue;
            }
            if self
                .cache
                .ensure(vs.key(), sector.version as u64, units)
                .is_none()
            {
                continue; // does not fit, skip rather than overdraw garbage
            }
            resident.push(vs);
        }

        /* portals out of the resident set, nearest first */
        if depth < MAX_PORTAL_DEPTH && stencil_ref < u8::MAX {
            // the eye of *this* pass, reprojected portals included
            let eye4 = view.inverse() * Vec4::new(0.0, 0.0, 0.0, 1.0);
            let eye = glam::vec2(eye4.x, eye4.y);
            // recursive passes order portals from the entry portal, the
            // spot the whole pass is seen through
            let sort_ref = entry.map_or(eye, |e| level.side_midpoint(e));

            let mut portals: Vec<(f32, SideId, SideId, SectorId, ScissorRect)> = Vec::new();
            for &vs in &resident {
                let Some(sector) = level.sectors.get(vs) else {
                    continue;
                };
                for &side in &sector.sides {
                    if Some(side) == entry {
                        continue;
                    }
                    let Some(target) = level.portal_target(side) else {
                        continue;
                    };
                    let Some(tsec) = level.sides.get(target).and_then(|sd| sd.sector) else {
                        continue;
                    };
                    let (a, b) = level.side_seg(side);
                    if cross2(b - a, eye - a) <= 0.0 {
                        continue; // back-facing
                    }
                    let Some(rect) = self.portal_clip_rect(level, side, vs, view, proj, scissor)
                    else {
                        continue;
                    };
                    if rect.is_empty() {
                        continue;
                    }
                    let dist = (level.side_midpoint(side) - sort_ref).length_squared();
                    portals.push((dist, side, target, tsec, rect));
                }
            }
            portals.sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal));

            for (_, side, target, tsec, rect) in portals {
                let inner_ref = stencil_ref + 1;
                self.cmds.push(RenderCmd::PortalMask {
                    side,
                    stencil_ref: inner_ref,
                    phase: MaskPhase::Incr,
                });

                let v2 = portal_view(view, side_model(level, side), side_model(level, target));
                let plane = portal_plane_view(v2, level, target);
                let p2 = oblique_near_plane(proj, plane);
                self.render_pass(level, tsec, v2, p2, rect, inner_ref, depth + 1, Some(target));

                self.cmds.push(RenderCmd::PortalMask {
                    side,
                    stencil_ref: inner_ref,
                    phase: MaskPhase::Depth,
                });
                self.cmds.push(RenderCmd::PortalMask {
                    side,
                    stencil_ref: inner_ref,
                    phase: MaskPhase::Decr,
                });
                // the recursion replaced scissor and view; restore ours
                self.cmds.push(RenderCmd::Scissor(scissor));
                self.cmds.push(RenderCmd::View { view, proj });
            }
        }

        /* surfaces after the portals: the stencil test and the resealed
        portal depth keep them out of nearer portals' interiors */
        for &vs in &resident {
            self.cmds.push(RenderCmd::Surfaces {
                sector: vs,
                stencil_ref,
            });
        }

        /* sprites last, over the finished surfaces of this pass */
        for &vs in &visible {
            if level.objects.iter().any(|(_, o)| o.sector == Some(vs)) {
                self.cmds.push(RenderCmd::Sprites {
                    sector: vs,
                    stencil_ref,
                });
            }
        }
    }

    /// Screen-space bounds of the portal quad, intersected with the pass
    /// scissor. `None` when the quad is entirely behind the eye; a quad
    /// crossing the near plane conservatively keeps the whole scissor.
    fn portal_clip_rect(
        &self,
        level: &Level,
        side: SideId,
        sec: SectorId,
        view: Mat4,
        proj: Mat4,
        scissor: ScissorRect,
    ) -> Option<ScissorRect> {
        let (floor, ceil) = level
            .sectors
            .get(sec)
            .map(|s| (s.floor.height, s.ceil.height))?;
        let (a, b) = level.side_seg(side);
        let pv = proj * view;
        let corners = [
            pv * Vec4::new(a.x, a.y, floor, 1.0),
            pv * Vec4::new(b.x, b.y, floor, 1.0),
            pv * Vec4::new(b.x, b.y, ceil, 1.0),
            pv * Vec4::new(a.x, a.y, ceil, 1.0),
        ];

        const W_EPS: f32 = 1e-4;
        if corners.iter().all(|c| c.w <= W_EPS) {
            return None;
        }
        if corners.iter().any(|c| c.w <= W_EPS) {
            return Some(scissor); // straddles the near plane
        }

        let (vw, vh) = (self.viewport.w as f32, self.viewport.h as f32);
        let mut min = glam::vec2(f32::MAX, f32::MAX);
        let mut max = glam::vec2(f32::MIN, f32::MIN);
        for c in corners {
            let ndc = glam::vec2(c.x / c.w, c.y / c.w);
            let px = glam::vec2(
                (ndc.x * 0.5 + 0.5) * vw + self.viewport.x as f32,
                (0.5 - ndc.y * 0.5) * vh + self.viewport.y as f32,
            );
            min = min.min(px);
            max = max.max(px);
        }
        let rect = ScissorRect::new(
            min.x.floor() as i32,
            min.y.floor() as i32,
            (max.x.ceil() - min.x.floor()) as i32,
            (max.y.ceil() - min.y.floor()) as i32,
        );
        Some(rect.intersect(&scissor))
    }
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::topo::fixtures::{quad_sector, two_rooms};
    use glam::vec2;

    fn viewport() -> ScissorRect {
        ScissorRect::new(0, 0, 640, 480)
    }

    #[test]
    fn lone_room_renders_surfaces_only() {
        let (level, sec) = quad_sector();
        let mut r = Renderer::new();
        let cam = ViewCamera::new(vec2(32.0, 32.0), 32.0, 0.0);
        let cmds = r.render(&level, &cam, viewport());
        assert!(cmds.iter().any(|c| matches!(
            c,
            RenderCmd::Surfaces { sector, stencil_ref: 0 } if *sector == sec
        )));
        assert!(!cmds.iter().any(|c| matches!(c, RenderCmd::PortalMask { .. })));
    }

    #[test]
    fn camera_in_void_renders_nothing() {
        let (level, _sec) = quad_sector();
        let mut r = Renderer::new();
        let cam = ViewCamera::new(vec2(500.0, 500.0), 32.0, 0.0);
        assert!(r.render(&level, &cam, viewport()).is_empty());
    }

    #[test]
    fn facing_portal_recurses_to_the_depth_limit() {
        // the mutual portal is a hall of mirrors: each pass sees the other
        // side front-facing again, so recursion runs to the ceiling
        let (level, _, _) = two_rooms();
        let mut r = Renderer::new();
        let cam = ViewCamera::new(vec2(32.0, 32.0), 32.0, 0.0);
        let cmds = r.render(&level, &cam, viewport()).to_vec();

        let incrs = cmds
            .iter()
            .filter(|c| matches!(c, RenderCmd::PortalMask { phase: MaskPhase::Incr, .. }))
            .count();
        assert_eq!(incrs as u32, MAX_PORTAL_DEPTH);
        let max_ref = cmds
            .iter()
            .filter_map(|c| match c {
                RenderCmd::PortalMask { stencil_ref, .. } => Some(*stencil_ref),
                _ => None,
            })
            .max()
            .unwrap();
        assert_eq!(max_ref as u32, MAX_PORTAL_DEPTH);
    }

    #[test]
    fn mask_phases_bracket_the_interior() {
        let (level, _, [pa, _]) = two_rooms();
        let mut r = Renderer::new();
        let cam = ViewCamera::new(vec2(32.0, 32.0), 32.0, 0.0);
        let cmds = r.render(&level, &cam, viewport()).to_vec();

        // the outermost mask triple carries stencil reference 1
        let at = |phase: MaskPhase| {
            cmds.iter()
                .position(|c| {
                    matches!(
                        c,
                        RenderCmd::PortalMask { side, stencil_ref: 1, phase: p }
                            if *side == pa && *p == phase
                    )
                })
                .expect("mask phase emitted")
        };
        let (incr, depth, decr) = (at(MaskPhase::Incr), at(MaskPhase::Depth), at(MaskPhase::Decr));
        assert!(incr < depth && depth < decr);
        // the interior drew at the raised stencil reference, inside the
        // bracket, before the depth reseal
        assert!(cmds[incr..depth].iter().any(|c| matches!(
            c,
            RenderCmd::Surfaces { stencil_ref: 1, .. }
        )));
        // this pass's own surfaces come after the bracket closes
        let own_surface = cmds
            .iter()
            .position(|c| matches!(c, RenderCmd::Surfaces { stencil_ref: 0, .. }))
            .expect("own surfaces emitted");
        assert!(own_surface > decr);
    }

    #[test]
    fn portal_behind_camera_is_skipped() {
        let (level, _, _) = two_rooms();
        let mut r = Renderer::new();
        // looking straight away from the shared boundary
        let cam = ViewCamera::new(vec2(32.0, 32.0), 32.0, std::f32::consts::PI);
        let cmds = r.render(&level, &cam, viewport()).to_vec();
        assert!(!cmds
            .iter()
            .any(|c| matches!(c, RenderCmd::PortalMask { .. })));
    }

    #[test]
    fn switching_levels_drops_cached_meshes() {
        let (level_a, sec_a) = quad_sector();
        let (level_b, _) = quad_sector();
        let mut r = Renderer::new();
        let cam = ViewCamera::new(vec2(32.0, 32.0), 32.0, 0.0);

        r.render(&level_a, &cam, viewport());
        assert!(r.cache().record(sec_a.key()).is_some());

        r.render(&level_b, &cam, viewport());
        // same handle key in both levels, but the record was re-uploaded
        // for level_b, not carried over
        let rec = r.cache().record(sec_a.key()).unwrap();
        assert!(rec.version >> 48 >= 1, "renderer version not bumped");

        // re-rendering the same level keeps the cache warm
        let v = r.cache().record(sec_a.key()).unwrap().version;
        r.render(&level_b, &cam, viewport());
        assert_eq!(r.cache().record(sec_a.key()).unwrap().version, v);
    }

    #[test]
    fn info_at_uses_the_rendered_viewport() {
        let (level, _) = quad_sector();
        let mut r = Renderer::new();
        let cam = ViewCamera::new(vec2(32.0, 32.0), 32.0, 0.0);
        // nothing rendered yet: the viewport is empty, so no pick
        assert!(r.info_at(&level, &cam, (320, 240)).is_none());
        r.render(&level, &cam, viewport());
        assert!(matches!(
            r.info_at(&level, &cam, (320, 240)),
            Some(crate::render::PickInfo::Side { .. })
        ));
    }

    #[test]
    fn objects_emit_sprites_in_their_sector() {
        let (mut level, sec) = quad_sector();
        level.add_object(vec2(20.0, 20.0), 1);
        let mut r = Renderer::new();
        let cam = ViewCamera::new(vec2(32.0, 32.0), 32.0, 0.0);
        let cmds = r.render(&level, &cam, viewport()).to_vec();
        assert!(cmds.iter().any(|c| matches!(
            c,
            RenderCmd::Sprites { sector, .. } if *sector == sec
        )));
    }
}
