//! Material table and texture atlas.
//!
//! Materials are referenced by index from rigid bodies and particle types, so
//! the table keeps its order across rebuilds. Textures are packed into one
//! RGBA atlas with a shelf packer. The packing depends only on the names and
//! sizes of the textures, so a rebuild with the same set reuses the previous
//! layout and only re-blits the pixels.
//!
//! A material whose texture is missing is drawn with its flat base colour.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use glam::{IVec2, UVec2, Vec2, Vec3, Vec4};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::SimulationError;

/// How texture coordinates wrap. `scale` texels per world unit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Tiling {
    Repeat { scale: f32 },
    MirrorRepeat { scale: f32 },
}

impl Default for Tiling {
    fn default() -> Self {
        Tiling::Repeat { scale: 1.0 }
    }
}

impl Tiling {
    /// Sign-encoded scale: negative means mirrored.
    pub fn to_wire(self) -> f32 {
        match self {
            Tiling::Repeat { scale } => scale.abs(),
            Tiling::MirrorRepeat { scale } => -scale.abs(),
        }
    }

    pub fn from_wire(value: f32) -> Self {
        if value < 0.0 {
            Tiling::MirrorRepeat { scale: -value }
        } else {
            Tiling::Repeat { scale: value }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    pub name: String,
    /// Key into the texture set passed to [`MaterialTable::build`].
    pub texture: Option<String>,
    pub base_color: Vec3,
    /// Multiplied onto texture samples.
    pub tint: Vec3,
    pub opacity: f32,
    pub tiling: Tiling,
    /// `None` leaves the edge transparent.
    pub edge_color: Option<Vec3>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            texture: None,
            base_color: Vec3::splat(0.8),
            tint: Vec3::ONE,
            opacity: 1.0,
            tiling: Tiling::default(),
            edge_color: None,
        }
    }
}

impl Material {
    pub fn flat(name: &str, color: Vec3) -> Self {
        Self { name: name.to_string(), base_color: color, ..Default::default() }
    }
}

/// GPU record of a material.
///
/// `tex_loc == (-1, -1)` means no texture. `sample_scale < 0` mirrors.
/// `edge_color.x < 0` leaves the edge transparent.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MatData {
    pub tex_loc: IVec2,
    pub tex_dims: IVec2,
    pub sample_scale: f32,
    pub opacity: f32,
    pub _pad: [f32; 2],
    pub base_color: [f32; 4],
    pub tint: [f32; 4],
    pub edge_color: [f32; 4],
}

/// Placement of one texture inside the atlas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AtlasRect {
    pub min: UVec2,
    pub size: UVec2,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AtlasLayout {
    pub size: UVec2,
    /// Parallel to the texture list the layout was packed for.
    pub rects: Vec<AtlasRect>,
}

/// Pack rectangles onto shelves, tallest first.
///
/// The atlas is as wide as the widest texture or the square root of the total
/// area rounded up to a power of two, whichever is larger.
pub fn pack_shelves(sizes: &[UVec2]) -> AtlasLayout {
    if sizes.is_empty() {
        return AtlasLayout { size: UVec2::ONE, rects: Vec::new() };
    }
    let area: u64 = sizes.iter().map(|s| s.x as u64 * s.y as u64).sum();
    let widest = sizes.iter().map(|s| s.x).max().unwrap_or(1);
    let width = widest.max(((area as f64).sqrt().ceil() as u32).next_power_of_two());

    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|a, b| sizes[*b].y.cmp(&sizes[*a].y).then(a.cmp(b)));

    let mut rects = vec![AtlasRect { min: UVec2::ZERO, size: UVec2::ZERO }; sizes.len()];
    let (mut x, mut y, mut shelf) = (0u32, 0u32, 0u32);
    for i in order {
        let s = sizes[i];
        if x + s.x > width {
            x = 0;
            y += shelf;
            shelf = 0;
        }
        rects[i] = AtlasRect { min: UVec2::new(x, y), size: s };
        x += s.x;
        shelf = shelf.max(s.y);
    }
    AtlasLayout { size: UVec2::new(width, (y + shelf).max(1)), rects }
}

fn layout_key(names: &[&str], sizes: &[UVec2]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for (name, size) in names.iter().zip(sizes) {
        name.hash(&mut hasher);
        size.x.hash(&mut hasher);
        size.y.hash(&mut hasher);
    }
    hasher.finish()
}

/// What a rebuild did to the GPU material buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUpdate {
    /// The material count changed; the buffer must be recreated and rebound.
    Recreate,
    /// Same count; the contents can be written in place.
    Update,
}

/// Load a texture from disk.
pub fn load_texture(path: impl AsRef<Path>) -> Result<RgbaImage, SimulationError> {
    Ok(image::open(path)?.to_rgba8())
}

/// Materials, their atlas and the wire records.
#[derive(Debug)]
pub struct MaterialTable {
    materials: Vec<Material>,
    atlas: RgbaImage,
    placements: HashMap<String, AtlasRect>,
    wire: Vec<MatData>,
    cached_layout: Option<(u64, AtlasLayout)>,
    layout_reuses: usize,
}

impl Default for MaterialTable {
    fn default() -> Self {
        Self {
            materials: Vec::new(),
            atlas: RgbaImage::new(1, 1),
            placements: HashMap::new(),
            wire: Vec::new(),
            cached_layout: None,
            layout_reuses: 0,
        }
    }
}

impl MaterialTable {
    pub fn build(materials: Vec<Material>, textures: &[(String, RgbaImage)]) -> Self {
        let mut table = Self::default();
        table.rebuild(materials, textures);
        table
    }

    /// Rebuild from new sources, reusing the atlas layout when the texture set
    /// has the same names and sizes as last time.
    pub fn rebuild(&mut self, materials: Vec<Material>, textures: &[(String, RgbaImage)]) -> BufferUpdate {
        let names: Vec<&str> = textures.iter().map(|(n, _)| n.as_str()).collect();
        let sizes: Vec<UVec2> = textures.iter().map(|(_, t)| UVec2::new(t.width(), t.height())).collect();
        let key = layout_key(&names, &sizes);

        let layout = match self.cached_layout.take() {
            Some((cached, layout)) if cached == key => {
                self.layout_reuses += 1;
                log::debug!("Reusing atlas layout for {} textures", textures.len());
                layout
            }
            _ => pack_shelves(&sizes),
        };

        let mut atlas = RgbaImage::new(layout.size.x, layout.size.y);
        self.placements.clear();
        for ((name, texture), rect) in textures.iter().zip(&layout.rects) {
            image::imageops::replace(&mut atlas, texture, rect.min.x as i64, rect.min.y as i64);
            self.placements.insert(name.clone(), *rect);
        }
        self.atlas = atlas;
        self.cached_layout = Some((key, layout));

        for m in &materials {
            if let Some(t) = m.texture.as_ref().filter(|t| !self.placements.contains_key(*t)) {
                log::debug!("Material '{}' has no texture '{}'; using its base colour", m.name, t);
            }
        }

        let update = if materials.len() == self.materials.len() { BufferUpdate::Update } else { BufferUpdate::Recreate };
        self.wire = materials.iter().map(|m| self.to_wire(m)).collect();
        self.materials = materials;
        update
    }

    fn to_wire(&self, m: &Material) -> MatData {
        let rect = m.texture.as_ref().and_then(|t| self.placements.get(t));
        let (tex_loc, tex_dims) = match rect {
            Some(r) => (r.min.as_ivec2(), r.size.as_ivec2()),
            None => (IVec2::splat(-1), IVec2::ZERO),
        };
        MatData {
            tex_loc,
            tex_dims,
            sample_scale: m.tiling.to_wire(),
            opacity: m.opacity,
            _pad: [0.0; 2],
            base_color: m.base_color.extend(1.0).to_array(),
            tint: m.tint.extend(1.0).to_array(),
            edge_color: m.edge_color.map_or([-1.0, 0.0, 0.0, 0.0], |c| c.extend(1.0).to_array()),
        }
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Material> {
        self.materials.get(index)
    }

    pub fn wire(&self) -> &[MatData] {
        &self.wire
    }

    pub fn atlas(&self) -> &RgbaImage {
        &self.atlas
    }

    /// How many rebuilds reused the cached atlas layout.
    pub fn layout_reuses(&self) -> usize {
        self.layout_reuses
    }

    /// Colour of material `index` at local coordinate `uv`, opacity in `w`.
    pub fn sample(&self, index: usize, uv: Vec2) -> Vec4 {
        let Some(m) = self.materials.get(index) else {
            return Vec4::ZERO;
        };
        let rect = m.texture.as_ref().and_then(|t| self.placements.get(t));
        let rgb = match rect {
            Some(r) if r.size.x > 0 && r.size.y > 0 => {
                let texel = match m.tiling {
                    Tiling::Repeat { scale } => wrap(uv * scale, r.size, false),
                    Tiling::MirrorRepeat { scale } => wrap(uv * scale, r.size, true),
                };
                let Rgba([red, green, blue, _]) = *self.atlas.get_pixel(r.min.x + texel.x, r.min.y + texel.y);
                Vec3::new(red as f32, green as f32, blue as f32) / 255.0 * m.tint
            }
            _ => m.base_color,
        };
        rgb.extend(m.opacity)
    }

    /// Edge colour of material `index`, `None` when transparent.
    pub fn edge_color(&self, index: usize) -> Option<Vec3> {
        self.materials.get(index).and_then(|m| m.edge_color)
    }
}

fn wrap(texel: Vec2, size: UVec2, mirror: bool) -> UVec2 {
    let axis = |v: f32, n: u32| {
        let n = n as f32;
        let t = if mirror {
            let period = v.rem_euclid(2.0 * n);
            if period >= n { 2.0 * n - period - 1.0 } else { period }
        } else {
            v.rem_euclid(n)
        };
        (t.floor().max(0.0) as u32).min(n as u32 - 1)
    };
    UVec2::new(axis(texel.x, size.x), axis(texel.y, size.y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(w: u32, h: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(color))
    }

    fn overlaps(a: &AtlasRect, b: &AtlasRect) -> bool {
        a.min.x < b.min.x + b.size.x
            && b.min.x < a.min.x + a.size.x
            && a.min.y < b.min.y + b.size.y
            && b.min.y < a.min.y + a.size.y
    }

    #[test]
    fn test_shelf_packing_has_no_overlap() {
        let sizes = [UVec2::new(16, 8), UVec2::new(4, 30), UVec2::new(20, 20), UVec2::new(7, 7), UVec2::new(9, 3)];
        let layout = pack_shelves(&sizes);
        for (i, a) in layout.rects.iter().enumerate() {
            assert_eq!(a.size, sizes[i]);
            assert!(a.min.x + a.size.x <= layout.size.x);
            assert!(a.min.y + a.size.y <= layout.size.y);
            for b in &layout.rects[i + 1..] {
                assert!(!overlaps(a, b), "{:?} overlaps {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_layout_reused_for_same_texture_set() {
        let textures = vec![("wood".to_string(), texture(4, 4, [200, 100, 0, 255]))];
        let materials = vec![Material { texture: Some("wood".into()), ..Material::flat("w", Vec3::ONE) }];
        let mut table = MaterialTable::build(materials.clone(), &textures);
        assert_eq!(table.layout_reuses(), 0);

        // New pixels, same names and sizes.
        let repainted = vec![("wood".to_string(), texture(4, 4, [0, 0, 255, 255]))];
        assert_eq!(table.rebuild(materials, &repainted), BufferUpdate::Update);
        assert_eq!(table.layout_reuses(), 1);
        assert!(table.sample(0, Vec2::new(0.5, 0.5)).z > 0.99);
    }

    #[test]
    fn test_material_count_change_recreates_buffer() {
        let mut table = MaterialTable::build(vec![Material::flat("a", Vec3::X)], &[]);
        let update = table.rebuild(vec![Material::flat("a", Vec3::X), Material::flat("b", Vec3::Y)], &[]);
        assert_eq!(update, BufferUpdate::Recreate);
        assert_eq!(table.wire().len(), 2);
    }

    #[test]
    fn test_missing_texture_uses_base_colour() {
        let materials = vec![Material { texture: Some("gone".into()), ..Material::flat("m", Vec3::new(0.1, 0.2, 0.3)) }];
        let table = MaterialTable::build(materials, &[]);
        assert_eq!(table.wire()[0].tex_loc, IVec2::splat(-1));
        let c = table.sample(0, Vec2::new(3.0, 4.0));
        assert!((c.truncate() - Vec3::new(0.1, 0.2, 0.3)).length() < 1e-6);
    }

    #[test]
    fn test_wire_sentinels() {
        let table = MaterialTable::build(
            vec![
                Material { tiling: Tiling::MirrorRepeat { scale: 2.0 }, ..Material::flat("m", Vec3::ONE) },
                Material { edge_color: Some(Vec3::ZERO), ..Material::flat("e", Vec3::ONE) },
            ],
            &[],
        );
        let wire = table.wire();
        assert_eq!(Tiling::from_wire(wire[0].sample_scale), Tiling::MirrorRepeat { scale: 2.0 });
        assert!(wire[0].edge_color[0] < 0.0);
        assert_eq!(wire[1].edge_color[0], 0.0);
    }

    #[test]
    fn test_mirror_wrap() {
        let size = UVec2::new(4, 4);
        assert_eq!(wrap(Vec2::new(5.0, 1.0), size, false), UVec2::new(1, 1));
        // Texel 5 mirrors back to 2 in a period of 8.
        assert_eq!(wrap(Vec2::new(5.0, 1.0), size, true), UVec2::new(2, 1));
    }
}
