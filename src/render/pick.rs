//! Pixel picking.
//!
//! Casts a ray from the camera through a viewport pixel and reports the
//! nearest thing under it: a solid wall face, a floor or ceiling plane,
//! or an object. Portal faces are see-through and never picked. The
//! candidate set is the camera sector's potentially visible set, the
//! same one the renderer draws from.

use glam::{Mat4, Vec2, Vec3, Vec4};
use smallvec::SmallVec;

use crate::query;
use crate::render::view::ViewCamera;
use crate::render::ScissorRect;
use crate::tess::cross2;
use crate::topo::{Level, ObjectId, SectorId, SideId, WallId};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PickInfo {
    Side { side: SideId, point: Vec3 },
    Floor { sector: SectorId, point: Vec3 },
    Ceiling { sector: SectorId, point: Vec3 },
    Object { object: ObjectId, point: Vec3 },
}

const RAY_EPS: f32 = 1e-6;

/// Resolve what a viewport pixel lands on. `None` when the camera is in
/// the void, the pixel is outside the viewport, or the ray escapes.
pub fn pick(
    level: &Level,
    camera: &ViewCamera,
    viewport: ScissorRect,
    pixel: (i32, i32),
) -> Option<PickInfo> {
    if viewport.is_empty()
        || pixel.0 < viewport.x
        || pixel.0 >= viewport.x + viewport.w
        || pixel.1 < viewport.y
        || pixel.1 >= viewport.y + viewport.h
    {
        return None;
    }
    let cam_sec = query::sector_at_point(level, camera.pos)?;
    let dir = pixel_ray(camera, viewport, pixel)?;
    let eye = camera.eye();

    let mut best: Option<(f32, PickInfo)> = None;
    let mut consider = |t: f32, info: PickInfo| {
        if t > RAY_EPS && best.as_ref().is_none_or(|(bt, _)| t < *bt) {
            best = Some((t, info));
        }
    };

    let visible = query::visible_sectors_from(level, cam_sec);

    /* walls: walk the block grid along the ray's footprint */
    let o = Vec2::new(eye.x, eye.y);
    let d2 = Vec2::new(dir.x, dir.y);
    let reach = if d2.length_squared() > RAY_EPS { camera.far } else { 0.0 };
    let mut seen: SmallVec<[WallId; 16]> = SmallVec::new();
    level.grid.walk_segment(o, o + d2 * reach, |at| {
        let Some(cell) = level.grid.cell(at) else {
            return true;
        };
        for &w in &cell.walls {
            if seen.contains(&w) {
                continue;
            }
            seen.push(w);
            let Some(wall) = level.walls.get(w) else {
                continue;
            };
            for side in wall.sides.iter().flatten().copied() {
                if level.portal_target(side).is_some() {
                    continue;
                }
                let Some(sec) = level.sides.get(side).and_then(|sd| sd.sector) else {
                    continue;
                };
                if !visible.contains(&sec) {
                    continue;
                }
                let Some(sector) = level.sectors.get(sec) else {
                    continue;
                };
                if let Some((t, p)) =
                    hit_side(level, side, sector.floor.height, sector.ceil.height, eye, dir)
                {
                    consider(t, PickInfo::Side { side, point: p });
                }
            }
        }
        true
    });

    for &vs in &visible {
        let Some(sector) = level.sectors.get(vs) else {
            continue;
        };
        if let Some((t, p)) = hit_plane(sector.floor.height, eye, dir, level, vs) {
            // only from above
            if dir.z < 0.0 {
                consider(t, PickInfo::Floor { sector: vs, point: p });
            }
        }
        if let Some((t, p)) = hit_plane(sector.ceil.height, eye, dir, level, vs) {
            if dir.z > 0.0 {
                consider(t, PickInfo::Ceiling { sector: vs, point: p });
            }
        }
    }

    for (id, o) in level.objects.iter() {
        let Some(os) = o.sector else { continue };
        if !visible.contains(&os) {
            continue;
        }
        if let Some(t) = hit_object(o.pos, o.z, o.radius, eye, dir) {
            consider(t, PickInfo::Object { object: id, point: eye + dir * t });
        }
    }

    best.map(|(_, info)| info)
}

/// World-space unit ray through the pixel center.
fn pixel_ray(camera: &ViewCamera, viewport: ScissorRect, pixel: (i32, i32)) -> Option<Vec3> {
    let ndc = Vec2::new(
        ((pixel.0 - viewport.x) as f32 + 0.5) / viewport.w as f32 * 2.0 - 1.0,
        1.0 - ((pixel.1 - viewport.y) as f32 + 0.5) / viewport.h as f32 * 2.0,
    );
    let inv: Mat4 = (camera.proj_matrix() * camera.view_matrix()).inverse();
    let near = inv * Vec4::new(ndc.x, ndc.y, -1.0, 1.0);
    let far = inv * Vec4::new(ndc.x, ndc.y, 1.0, 1.0);
    if near.w.abs() < RAY_EPS || far.w.abs() < RAY_EPS {
        return None;
    }
    let d = far.truncate() / far.w - near.truncate() / near.w;
    (d.length_squared() > RAY_EPS).then(|| d.normalize())
}

/// Ray against the front face of a solid side, clipped to its sector's
/// floor/ceiling span.
fn hit_side(
    level: &Level,
    side: SideId,
    floor: f32,
    ceil: f32,
    eye: Vec3,
    dir: Vec3,
) -> Option<(f32, Vec3)> {
    let (a, b) = level.side_seg(side);
    let o = Vec2::new(eye.x, eye.y);
    let d = Vec2::new(dir.x, dir.y);
    let e = b - a;
    // front face only
    if cross2(e, o - a) <= 0.0 {
        return None;
    }
    let denom = cross2(d, e);
    if denom.abs() < RAY_EPS {
        return None;
    }
    let t = cross2(a - o, e) / denom;
    let s = cross2(a - o, d) / denom;
    if t <= RAY_EPS || !(0.0..=1.0).contains(&s) {
        return None;
    }
    let p = eye + dir * t;
    (p.z >= floor && p.z <= ceil).then_some((t, p))
}

/// Ray against a horizontal plane, accepted only where the hit point is
/// actually inside the sector.
fn hit_plane(
    height: f32,
    eye: Vec3,
    dir: Vec3,
    level: &Level,
    sec: SectorId,
) -> Option<(f32, Vec3)> {
    if dir.z.abs() < RAY_EPS {
        return None;
    }
    let t = (height - eye.z) / dir.z;
    if t <= RAY_EPS {
        return None;
    }
    let p = eye + dir * t;
    (query::sector_at_point(level, Vec2::new(p.x, p.y)) == Some(sec)).then_some((t, p))
}

/// Ray against an object's bounding cylinder (two radii tall, base at the
/// object's `z`).
fn hit_object(pos: Vec2, z: f32, radius: f32, eye: Vec3, dir: Vec3) -> Option<f32> {
    let top = z + 2.0 * radius;
    let o = Vec2::new(eye.x, eye.y);
    let d = Vec2::new(dir.x, dir.y);
    let oc = o - pos;

    let a = d.length_squared();
    if a < RAY_EPS {
        // straight up or down: cap hit
        if oc.length_squared() > radius * radius || dir.z.abs() < RAY_EPS {
            return None;
        }
        let cap = if dir.z < 0.0 { top } else { z };
        let t = (cap - eye.z) / dir.z;
        return (t > RAY_EPS).then_some(t);
    }

    let b = oc.dot(d);
    let c = oc.length_squared() - radius * radius;
    let disc = b * b - a * c;
    if disc < 0.0 {
        return None;
    }
    let t = (-b - disc.sqrt()) / a;
    if t <= RAY_EPS {
        return None;
    }
    let pz = eye.z + dir.z * t;
    (pz >= z && pz <= top).then_some(t)
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
