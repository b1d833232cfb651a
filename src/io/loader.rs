//! Level save and load.
//!
//! File layout, little-endian:
//!
//! ```text
//! b"SLVL"  u16 version
//!   vertices sectors sector-materials walls sides side-materials
//!   decals objects
//! b"SLVL"
//! ```
//!
//! Sections are `bincode`-encoded `Vec`s in that fixed order; the material
//! arrays run parallel to their entity arrays. The trailing magic guards
//! against truncation. Loading replays the file through the normal
//! mutation API inside one batch, so a single commit rebuilds meshes,
//! subsectors, the grid and visibility from the bare topology.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bincode::config::{self, Configuration};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::{Vec2, vec2};
use log::info;

use super::raw::*;
use super::{LoadError, SaveError};
use crate::topo::{Decal, Level, SideFlags, SideId, VertexId, WallId};

pub const MAGIC: &[u8; 4] = b"SLVL";
pub const FORMAT_VERSION: u16 = 2;

fn cfg() -> Configuration {
    config::standard()
}

/*─────────────────────────────── save ────────────────────────────────*/

struct DenseMap<T> {
    indices: std::collections::HashMap<T, u16>,
}

impl<T: std::hash::Hash + Eq + Copy> DenseMap<T> {
    fn build(handles: impl Iterator<Item = T>, what: &'static str) -> Result<Self, SaveError> {
        let mut indices = std::collections::HashMap::new();
        for (i, h) in handles.enumerate() {
            if i >= NONE_IDX as usize {
                return Err(SaveError::TooLarge(what));
            }
            indices.insert(h, i as u16);
        }
        Ok(Self { indices })
    }

    fn get(&self, h: T) -> u16 {
        self.indices[&h]
    }

    fn get_opt(&self, h: Option<T>) -> u16 {
        h.map_or(NONE_IDX, |h| self.get(h))
    }
}

pub fn save_level(level: &Level, w: &mut impl Write) -> Result<(), SaveError> {
    let verts = DenseMap::build(level.verts.iter().map(|(h, _)| h), "vertices")?;
    let walls = DenseMap::build(level.walls.iter().map(|(h, _)| h), "walls")?;
    let sides = DenseMap::build(level.sides.iter().map(|(h, _)| h), "sides")?;
    let sectors = DenseMap::build(level.sectors.iter().map(|(h, _)| h), "sectors")?;

    w.write_all(MAGIC)?;
    w.write_u16::<LittleEndian>(FORMAT_VERSION)?;

    let raw_verts: Vec<RawVertex> = level
        .verts
        .iter()
        .map(|(_, v)| RawVertex {
            x: v.pos.x,
            y: v.pos.y,
        })
        .collect();
    bincode::encode_into_std_write(&raw_verts, w, cfg())?;

    let raw_sectors: Vec<RawSector> = level
        .sectors
        .iter()
        .map(|(_, sec)| RawSector {
            floor_height: sec.floor.height,
            ceil_height: sec.ceil.height,
            sides: sec.sides.iter().map(|&s| sides.get(s)).collect(),
        })
        .collect();
    bincode::encode_into_std_write(&raw_sectors, w, cfg())?;

    let raw_sector_mats: Vec<RawSectorMaterial> = level
        .sectors
        .iter()
        .map(|(_, sec)| RawSectorMaterial {
            floor_tex: sec.floor.tex,
            floor_offset: sec.floor.offset.into(),
            ceil_tex: sec.ceil.tex,
            ceil_offset: sec.ceil.offset.into(),
        })
        .collect();
    bincode::encode_into_std_write(&raw_sector_mats, w, cfg())?;

    let raw_walls: Vec<RawWall> = level
        .walls
        .iter()
        .map(|(_, wall)| RawWall {
            v: [verts.get(wall.v[0]), verts.get(wall.v[1])],
            sides: [
                sides.get_opt(wall.sides[0]),
                sides.get_opt(wall.sides[1]),
            ],
        })
        .collect();
    bincode::encode_into_std_write(&raw_walls, w, cfg())?;

    let raw_sides: Vec<RawSide> = level
        .sides
        .iter()
        .map(|(_, s)| RawSide {
            wall: walls.get(s.wall),
            index: s.index,
            sector: sectors.get_opt(s.sector),
            portal: sides.get_opt(s.portal),
            flags: s.flags.bits(),
        })
        .collect();
    bincode::encode_into_std_write(&raw_sides, w, cfg())?;

    let raw_side_mats: Vec<RawSideMaterial> = level
        .sides
        .iter()
        .map(|(_, s)| RawSideMaterial {
            tex: s.material.tex,
            offset: s.material.offset.into(),
        })
        .collect();
    bincode::encode_into_std_write(&raw_side_mats, w, cfg())?;

    let raw_decals: Vec<RawDecal> = level
        .sides
        .iter()
        .flat_map(|(h, s)| {
            let idx = sides.get(h);
            s.decals.iter().map(move |d| RawDecal {
                side: idx,
                along: d.along,
                height: d.height,
                size: d.size.into(),
                tex: d.tex,
            })
        })
        .collect();
    bincode::encode_into_std_write(&raw_decals, w, cfg())?;

    let raw_objects: Vec<RawObject> = level
        .objects
        .iter()
        .map(|(_, o)| RawObject {
            x: o.pos.x,
            y: o.pos.y,
            z: o.z,
            angle: o.angle,
            type_id: o.type_id,
            radius: o.radius,
        })
        .collect();
    bincode::encode_into_std_write(&raw_objects, w, cfg())?;

    w.write_all(MAGIC)?;
    Ok(())
}

pub fn save_file(level: &Level, path: &Path) -> Result<(), SaveError> {
    let mut w = BufWriter::new(File::create(path)?);
    save_level(level, &mut w)?;
    w.flush()?;
    Ok(())
}

/*─────────────────────────────── load ────────────────────────────────*/

fn index<'a, T: Copy>(
    table: &'a [T],
    idx: u16,
    what: &'static str,
) -> Result<T, LoadError> {
    table
        .get(idx as usize)
        .copied()
        .ok_or(LoadError::BadIndex { what, index: idx })
}

fn index_opt<T: Copy>(
    table: &[T],
    idx: u16,
    what: &'static str,
) -> Result<Option<T>, LoadError> {
    if idx == NONE_IDX {
        return Ok(None);
    }
    index(table, idx, what).map(Some)
}

pub fn load_level(r: &mut impl Read) -> Result<Level, LoadError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(LoadError::BadMagic);
    }
    let version = r.read_u16::<LittleEndian>()?;
    if version == 0 || version > FORMAT_VERSION {
        return Err(LoadError::UnsupportedVersion(version));
    }

    let raw_verts: Vec<RawVertex> = bincode::decode_from_std_read(r, cfg())?;
    let raw_sectors: Vec<RawSector> = bincode::decode_from_std_read(r, cfg())?;
    let raw_sector_mats: Vec<RawSectorMaterial> = bincode::decode_from_std_read(r, cfg())?;
    let raw_walls: Vec<RawWall> = bincode::decode_from_std_read(r, cfg())?;
    let raw_sides: Vec<RawSide> = bincode::decode_from_std_read(r, cfg())?;
    let raw_side_mats: Vec<RawSideMaterial> = bincode::decode_from_std_read(r, cfg())?;
    let raw_decals: Vec<RawDecal> = bincode::decode_from_std_read(r, cfg())?;
    let raw_objects: Vec<RawObject> = match version {
        1 => {
            let v1: Vec<RawObjectV1> = bincode::decode_from_std_read(r, cfg())?;
            v1.into_iter().map(RawObject::from).collect()
        }
        _ => bincode::decode_from_std_read(r, cfg())?,
    };

    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(LoadError::Truncated);
    }

    if raw_sector_mats.len() != raw_sectors.len() {
        return Err(LoadError::CountMismatch("sector material"));
    }
    if raw_side_mats.len() != raw_sides.len() {
        return Err(LoadError::CountMismatch("side material"));
    }

    let mut level = Level::new();
    level.begin_batch();

    let verts: Vec<VertexId> = raw_verts
        .iter()
        .map(|v| level.add_vertex(vec2(v.x, v.y)))
        .collect();

    let mut walls: Vec<WallId> = Vec::with_capacity(raw_walls.len());
    for rw in &raw_walls {
        let v0 = index(&verts, rw.v[0], "wall vertex")?;
        let v1 = index(&verts, rw.v[1], "wall vertex")?;
        walls.push(level.add_wall(v0, v1));
    }

    let mut sides: Vec<SideId> = Vec::with_capacity(raw_sides.len());
    for (rs, rm) in raw_sides.iter().zip(&raw_side_mats) {
        let wall = index(&walls, rs.wall, "side wall")?;
        if rs.index > 1 {
            return Err(LoadError::BadIndex {
                what: "side face",
                index: rs.index as u16,
            });
        }
        let id = level
            .add_side(wall, rs.index)
            .ok_or(LoadError::BadIndex {
                what: "duplicate side face",
                index: rs.wall,
            })?;
        let side = level.sides.get_mut(id).unwrap();
        side.flags = SideFlags::from_bits_truncate(rs.flags);
        side.material.tex = rm.tex;
        side.material.offset = Vec2::from(rm.offset);
        sides.push(id);
    }

    /* patch pass: references that only resolve once every side exists */
    for (rs, &id) in raw_sides.iter().zip(&sides) {
        let portal = index_opt(&sides, rs.portal, "portal side")?;
        level.sides.get_mut(id).unwrap().portal = portal;
    }
    for (rw, &w) in raw_walls.iter().zip(&walls) {
        for face in 0..2 {
            let expect = index_opt(&sides, rw.sides[face], "wall side")?;
            if level.walls.get(w).unwrap().sides[face] != expect {
                return Err(LoadError::BadIndex {
                    what: "wall/side cross-reference",
                    index: rw.sides[face],
                });
            }
        }
    }

    for (rsec, rm) in raw_sectors.iter().zip(&raw_sector_mats) {
        let mut sec_sides = Vec::with_capacity(rsec.sides.len());
        for &si in &rsec.sides {
            sec_sides.push(index(&sides, si, "sector side")?);
        }
        let sec = level.new_sector_from_sides(&sec_sides, rsec.floor_height, rsec.ceil_height);
        let sector = level.sectors.get_mut(sec).unwrap();
        sector.floor.tex = rm.floor_tex;
        sector.floor.offset = Vec2::from(rm.floor_offset);
        sector.ceil.tex = rm.ceil_tex;
        sector.ceil.offset = Vec2::from(rm.ceil_offset);
    }

    for rd in &raw_decals {
        let side = index(&sides, rd.side, "decal side")?;
        level.sides.get_mut(side).unwrap().decals.push(Decal {
            along: rd.along,
            height: rd.height,
            size: Vec2::from(rd.size),
            tex: rd.tex,
        });
    }

    let objects: Vec<_> = raw_objects
        .iter()
        .map(|ro| {
            let id = level.add_object(vec2(ro.x, ro.y), ro.type_id);
            let obj = level.objects.get_mut(id).unwrap();
            obj.z = ro.z;
            obj.angle = ro.angle;
            obj.radius = ro.radius;
            id
        })
        .collect();

    level.end_batch();

    // sectors only exist as areas after the commit; re-home the objects
    for id in objects {
        if let Some(pos) = level.objects.get(id).map(|o| o.pos) {
            level.move_object(id, pos);
        }
    }

    info!(
        "loaded level v{version}: {} vertices, {} walls, {} sides, {} sectors, {} objects",
        level.verts.len(),
        level.walls.len(),
        level.sides.len(),
        level.sectors.len(),
        level.objects.len()
    );
    Ok(level)
}

pub fn load_file(path: &Path) -> Result<Level, LoadError> {
    let mut r = BufReader::new(File::open(path)?);
    load_level(&mut r)
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::topo::fixtures::two_rooms;
    use glam::vec2;

    fn round_trip(level: &Level) -> Level {
        let mut buf = Vec::new();
        save_level(level, &mut buf).unwrap();
        load_level(&mut buf.as_slice()).unwrap()
    }

    #[test]
    fn round_trip_preserves_topology_and_visibility() {
        let (mut level, [sa, sb], _) = two_rooms();
        level.add_object(vec2(32.0, 32.0), 7);

        let loaded = round_trip(&level);
        loaded.assert_consistent();
        assert_eq!(loaded.verts.len(), level.verts.len());
        assert_eq!(loaded.walls.len(), level.walls.len());
        assert_eq!(loaded.sides.len(), level.sides.len());
        assert_eq!(loaded.sectors.len(), level.sectors.len());
        assert_eq!(loaded.objects.len(), 1);

        // field-level fidelity: positions, wall endpoints, portal wiring
        let key = |v: glam::Vec2| (v.x.to_bits(), v.y.to_bits());
        let mut pa: Vec<_> = level.verts.iter().map(|(_, v)| key(v.pos)).collect();
        let mut pb: Vec<_> = loaded.verts.iter().map(|(_, v)| key(v.pos)).collect();
        pa.sort_unstable();
        pb.sort_unstable();
        assert_eq!(pa, pb);

        let segs = |l: &Level| {
            let mut s: Vec<_> = l
                .walls
                .iter()
                .map(|(_, w)| {
                    let mut pair = [
                        key(l.verts.get(w.v[0]).unwrap().pos),
                        key(l.verts.get(w.v[1]).unwrap().pos),
                    ];
                    pair.sort_unstable();
                    pair
                })
                .collect();
            s.sort_unstable();
            s
        };
        assert_eq!(segs(&level), segs(&loaded));

        let portal_pairs = |l: &Level| {
            l.sides
                .iter()
                .filter(|(s, _)| l.portal_target(*s).is_some())
                .count()
        };
        assert_eq!(portal_pairs(&level), 2);
        assert_eq!(portal_pairs(&loaded), 2);

        // visibility is rebuilt, not stored; the rooms still see each other
        let (la, lb) = {
            let mut it = loaded.sectors.iter().map(|(h, _)| h);
            (it.next().unwrap(), it.next().unwrap())
        };
        assert!(loaded.vis.get(la.index(), lb.index()));
        assert!(loaded.vis.get(lb.index(), la.index()));
        // original still intact too
        assert!(level.vis.get(sa.index(), sb.index()));
    }

    #[test]
    fn objects_are_rehomed_after_load() {
        let (mut level, _, _) = two_rooms();
        level.add_object(vec2(100.0, 32.0), 3);
        let loaded = round_trip(&level);
        let (_, obj) = loaded.objects.iter().next().unwrap();
        let sec = obj.sector.expect("object homed");
        assert!(loaded.sectors.get(sec).unwrap().bbox.contains(vec2(100.0, 32.0)));
    }

    #[test]
    fn decals_and_materials_survive() {
        let (mut level, [sa, _], _) = two_rooms();
        let s0 = level.sectors.get(sa).unwrap().sides[0];
        {
            let side = level.sides.get_mut(s0).unwrap();
            side.material.tex = 42;
            side.material.offset = vec2(4.0, 8.0);
            side.decals.push(Decal {
                along: 10.0,
                height: 32.0,
                size: vec2(8.0, 8.0),
                tex: 5,
            });
        }
        let loaded = round_trip(&level);
        let decorated = loaded
            .sides
            .iter()
            .find(|(_, s)| s.material.tex == 42)
            .map(|(_, s)| s)
            .expect("material survived");
        assert_eq!(decorated.material.offset, vec2(4.0, 8.0));
        assert_eq!(decorated.decals.len(), 1);
        assert_eq!(decorated.decals[0].tex, 5);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = Vec::new();
        save_level(&two_rooms().0, &mut buf).unwrap();
        buf[0] = b'X';
        assert!(matches!(
            load_level(&mut buf.as_slice()),
            Err(LoadError::BadMagic)
        ));
    }

    #[test]
    fn truncated_file_is_rejected() {
        let mut buf = Vec::new();
        save_level(&two_rooms().0, &mut buf).unwrap();
        buf.truncate(buf.len() - 2);
        assert!(load_level(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn future_version_is_rejected() {
        let mut buf = Vec::new();
        save_level(&two_rooms().0, &mut buf).unwrap();
        buf[4] = 0xff;
        buf[5] = 0xff;
        assert!(matches!(
            load_level(&mut buf.as_slice()),
            Err(LoadError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn save_to_disk_and_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms.lvl");
        let (level, _, _) = two_rooms();
        save_file(&level, &path).unwrap();
        let loaded = load_file(&path).unwrap();
        assert_eq!(loaded.sectors.len(), 2);
    }
}
