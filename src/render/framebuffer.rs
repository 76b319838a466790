//! Colour and scalar pixel buffers.
//!
//! Rows run bottom to top so pixel space has the same orientation as the
//! simulation. Conversion to an image flips them.

use glam::{IVec2, UVec2, Vec4};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

/// Single-channel buffer used by the shadow stages.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarBuffer {
    size: UVec2,
    data: Vec<f32>,
}

impl ScalarBuffer {
    pub fn new(size: UVec2) -> Self {
        Self { size, data: vec![0.0; (size.x * size.y) as usize] }
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Value at `p`, clamped to the edge.
    #[inline]
    pub fn get_clamped(&self, p: IVec2) -> f32 {
        let max = self.size.as_ivec2() - 1;
        let c = p.clamp(IVec2::ZERO, max.max(IVec2::ZERO));
        self.data[(c.y as u32 * self.size.x + c.x as u32) as usize]
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.size.x + x) as usize]
    }
}

/// The shared colour buffer plus the full-resolution shadow source.
#[derive(Clone, Debug)]
pub struct Framebuffer {
    pub color: Vec<Vec4>,
    pub shadow_source: ScalarBuffer,
    size: UVec2,
}

impl Framebuffer {
    pub fn new(size: UVec2) -> Self {
        Self {
            color: vec![Vec4::ZERO; (size.x * size.y) as usize],
            shadow_source: ScalarBuffer::new(size),
            size,
        }
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    /// Reallocate on a size change. Returns whether anything changed.
    pub fn resize(&mut self, size: UVec2) -> bool {
        if size == self.size {
            return false;
        }
        *self = Self::new(size);
        true
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        (y * self.size.x + x) as usize
    }

    /// Alpha-blend `src` over the pixel and raise its shadow source.
    #[inline]
    pub fn blend(&mut self, index: usize, src: Vec4, shadow: f32) {
        let Self { color, shadow_source, .. } = self;
        blend_over(&mut color[index], &mut shadow_source.data_mut()[index], src, shadow);
    }

    /// Run `shade` for every pixel in parallel. It receives the pixel
    /// coordinate and returns the colour and shadow strength to blend, if any.
    pub fn shade<F>(&mut self, shade: F)
    where
        F: Fn(UVec2) -> Option<(Vec4, f32)> + Sync,
    {
        let width = self.size.x as usize;
        if width == 0 {
            return;
        }
        let Self { color, shadow_source, .. } = self;
        color
            .par_chunks_mut(width)
            .zip(shadow_source.data_mut().par_chunks_mut(width))
            .enumerate()
            .for_each(|(y, (color_row, shadow_row))| {
                for (x, (c, s)) in color_row.iter_mut().zip(shadow_row.iter_mut()).enumerate() {
                    if let Some((src, shadow)) = shade(UVec2::new(x as u32, y as u32)) {
                        blend_over(c, s, src, shadow);
                    }
                }
            });
    }
}

#[inline]
fn blend_over(dst: &mut Vec4, shadow_dst: &mut f32, src: Vec4, shadow: f32) {
    let a = src.w.clamp(0.0, 1.0);
    *dst = (src.truncate() * a + dst.truncate() * (1.0 - a)).extend(1.0);
    *shadow_dst = shadow_dst.max(shadow * a);
}

/// Convert a bottom-up colour buffer into a top-down image.
pub fn to_rgba_image(color: &[Vec4], size: UVec2) -> RgbaImage {
    RgbaImage::from_fn(size.x, size.y, |x, y| {
        let c = color[((size.y - 1 - y) * size.x + x) as usize].clamp(Vec4::ZERO, Vec4::ONE) * 255.0;
        Rgba([c.x.round() as u8, c.y.round() as u8, c.z.round() as u8, c.w.round() as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_only_on_change() {
        let mut fb = Framebuffer::new(UVec2::new(4, 2));
        assert!(!fb.resize(UVec2::new(4, 2)));
        assert!(fb.resize(UVec2::new(8, 2)));
        assert_eq!(fb.color.len(), 16);
    }

    #[test]
    fn test_blend_keeps_strongest_shadow() {
        let mut fb = Framebuffer::new(UVec2::new(1, 1));
        fb.blend(0, Vec4::new(1.0, 0.0, 0.0, 1.0), 0.3);
        fb.blend(0, Vec4::new(0.0, 0.0, 1.0, 0.5), 0.2);
        assert!((fb.color[0] - Vec4::new(0.5, 0.0, 0.5, 1.0)).length() < 1e-6);
        assert_eq!(fb.shadow_source.get(0, 0), 0.3);
    }

    #[test]
    fn test_shade_visits_every_pixel() {
        let mut fb = Framebuffer::new(UVec2::new(3, 2));
        fb.shade(|p| (p.y == 1).then_some((Vec4::ONE, 0.5)));
        assert_eq!(fb.color[fb.index(2, 1)], Vec4::ONE);
        assert_eq!(fb.color[fb.index(2, 0)], Vec4::ZERO);
        assert_eq!(fb.shadow_source.get(0, 1), 0.5);
    }

    #[test]
    fn test_image_is_flipped() {
        let size = UVec2::new(1, 2);
        let color = [Vec4::new(1.0, 0.0, 0.0, 1.0), Vec4::new(0.0, 1.0, 0.0, 1.0)];
        let img = to_rgba_image(&color, size);
        // Bottom row of the buffer is the last image row.
        assert_eq!(img.get_pixel(0, 1)[0], 255);
        assert_eq!(img.get_pixel(0, 0)[1], 255);
    }
}
