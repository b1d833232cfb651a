//! Camera and portal view math.
//!
//! World space is 2.5D: `x`/`y` span the map plane, `z` is height. The
//! camera yaws in the map plane and pitches not at all; portals reproject
//! the camera through pairs of side frames, and an oblique near plane
//! clips everything behind the destination portal.

use std::f32::consts::PI;

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::topo::{Level, SideId};

#[derive(Clone, Copy, Debug)]
pub struct ViewCamera {
    pub pos: Vec2,
    /// Eye height above the map plane.
    pub z: f32,
    /// Heading in the map plane, radians, `0` looking along `+x`.
    pub yaw: f32,
    /// Vertical field of view, radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl ViewCamera {
    pub fn new(pos: Vec2, z: f32, yaw: f32) -> Self {
        Self {
            pos,
            z,
            yaw,
            fov_y: PI / 3.0,
            aspect: 4.0 / 3.0,
            near: 0.1,
            far: 8192.0,
        }
    }

    pub fn eye(&self) -> Vec3 {
        Vec3::new(self.pos.x, self.pos.y, self.z)
    }

    pub fn view_matrix(&self) -> Mat4 {
        let dir = Vec3::new(self.yaw.cos(), self.yaw.sin(), 0.0);
        Mat4::look_to_rh(self.eye(), dir, Vec3::Z)
    }

    pub fn proj_matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y, self.aspect, self.near, self.far)
    }
}

/// World-space frame of a side: origin at the midpoint on the floor plane,
/// local `+x` along the side's facing normal, `+z` up.
pub fn side_model(level: &Level, side: SideId) -> Mat4 {
    let mid = level.side_midpoint(side);
    let floor = level
        .sides
        .get(side)
        .and_then(|s| s.sector)
        .and_then(|sec| level.sectors.get(sec))
        .map(|sec| sec.floor.height)
        .unwrap_or(0.0);
    let angle = level.side_angle(side);
    Mat4::from_translation(Vec3::new(mid.x, mid.y, floor)) * Mat4::from_rotation_z(angle)
}

/// Reproject a view matrix through a portal: geometry behind the exit side
/// is drawn as if it stood behind the entry side.
///
/// `model_in` is the entry side's frame (in the space the view looks at),
/// `model_out` the exit side's frame in destination space. The half-turn
/// accounts for the two frames facing each other.
pub fn portal_view(view: Mat4, model_in: Mat4, model_out: Mat4) -> Mat4 {
    view * model_in * Mat4::from_rotation_z(PI) * model_out.inverse()
}

/// View-space plane of the exit side, normal facing into the destination
/// sector. The positive half-space is what survives the oblique clip, so
/// the camera side of the portal is cut away.
pub fn portal_plane_view(view: Mat4, level: &Level, exit_side: SideId) -> Vec4 {
    let n2 = level.side_normal(exit_side);
    let p = level.side_midpoint(exit_side);
    // world plane facing the exit side's sector interior
    let n = Vec3::new(n2.x, n2.y, 0.0);
    let world = Vec4::new(n.x, n.y, n.z, -n.dot(Vec3::new(p.x, p.y, 0.0)));
    // planes transform by the inverse-transpose
    view.inverse().transpose() * world
}

/// Substitute the near plane of a GL-convention projection with an
/// arbitrary view-space clip plane (Lengyel's method). The far plane
/// degrades but stays usable for portal-sized frusta.
pub fn oblique_near_plane(proj: Mat4, plane: Vec4) -> Mat4 {
    let q = proj.inverse()
        * Vec4::new(
            plane.x.signum(),
            plane.y.signum(),
            1.0,
            1.0,
        );
    let c = plane * (2.0 / plane.dot(q));
    let mut m = proj;
    // third row becomes c - row4
    m.x_axis.z = c.x - m.x_axis.w;
    m.y_axis.z = c.y - m.y_axis.w;
    m.z_axis.z = c.z - m.z_axis.w;
    m.w_axis.z = c.w - m.w_axis.w;
    m
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
