//! Scotoma rendering
//!
//! Drives an opaque separable blur filter with per-frame gaze-centered
//! parameters: a vertical pass into a temporary surface, then a horizontal
//! pass into the destination. Both passes mask against the original image.

use crate::types::NormalizedGazePosition;
use glam::{Vec2, Vec4};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Render target type shared by the host and the filter
pub type Surface = RgbaImage;

/// Which part of the visual field is blurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlurType {
    /// Everything except a disk around gaze
    #[default]
    Peripheral,
    /// Only the disk around gaze
    Central,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurParams {
    /// Disk radius in UV units, [0, 0.25]
    pub radius: f32,
    /// Blur neighborhood in UV units, [0, 0.05]
    pub neighborhood_size: f32,
    pub blur_type: BlurType,
    pub show_debug_ring: bool,
}

impl BlurParams {
    pub const MAX_RADIUS: f32 = 0.25;
    pub const MAX_NEIGHBORHOOD: f32 = 0.05;

    /// Clamps radius and neighborhood into their ranges
    pub fn new(radius: f32, neighborhood_size: f32, blur_type: BlurType, show_debug_ring: bool) -> Self {
        Self {
            radius: clamp_or_zero(radius, Self::MAX_RADIUS),
            neighborhood_size: clamp_or_zero(neighborhood_size, Self::MAX_NEIGHBORHOOD),
            blur_type,
            show_debug_ring,
        }
    }
}

impl Default for BlurParams {
    fn default() -> Self {
        Self::new(0.2, 0.005, BlurType::Peripheral, false)
    }
}

fn clamp_or_zero(v: f32, max: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, max)
    }
}

/// Per-pass values handed to the blur filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurUniforms {
    pub gaze_pos: Vec4,
    pub radius: f32,
    pub neighborhood_size: f32,
    pub is_peripheral: i32,
    pub show_debug: i32,
    /// (0,1,0,0) vertical, (1,0,0,0) horizontal
    pub blur_direction: Vec4,
}

pub const VERTICAL: Vec4 = Vec4::new(0.0, 1.0, 0.0, 0.0);
pub const HORIZONTAL: Vec4 = Vec4::new(1.0, 0.0, 0.0, 0.0);

/// One single-direction blur pass. `original` is the unblurred frame used for masking.
pub trait BlurFilter: Send {
    fn blit(&mut self, src: &Surface, original: &Surface, dst: &mut Surface, uniforms: &BlurUniforms);
}

pub struct ScotomaRenderer {
    filter: Box<dyn BlurFilter>,
    params: BlurParams,
}

impl ScotomaRenderer {
    pub fn new(filter: Box<dyn BlurFilter>, params: BlurParams) -> Self {
        Self { filter, params }
    }

    pub fn params(&self) -> &BlurParams {
        &self.params
    }

    pub fn toggle_debug_ring(&mut self) -> bool {
        self.params.show_debug_ring = !self.params.show_debug_ring;
        log::info!("Scotoma debug ring {}", if self.params.show_debug_ring { "on" } else { "off" });
        self.params.show_debug_ring
    }

    /// Gaze in shader UV space: Y flipped once more and clamped.
    /// No gaze (no tracker bound, invalid sample) gives the screen center.
    pub fn shader_gaze(gaze: Option<NormalizedGazePosition>) -> Vec2 {
        match gaze {
            Some(g) => Vec2::new(g.x.clamp(0.0, 1.0), (1.0 - g.y).clamp(0.0, 1.0)),
            None => Vec2::splat(0.5),
        }
    }

    /// Uniforms shared by both passes (direction is set per pass)
    pub fn uniforms(&self, gaze: Option<NormalizedGazePosition>) -> BlurUniforms {
        let g = Self::shader_gaze(gaze);
        BlurUniforms {
            gaze_pos: Vec4::new(g.x, g.y, 0.0, 0.0),
            radius: self.params.radius,
            neighborhood_size: self.params.neighborhood_size,
            is_peripheral: i32::from(self.params.blur_type == BlurType::Peripheral),
            show_debug: i32::from(self.params.show_debug_ring),
            blur_direction: VERTICAL,
        }
    }

    /// Run both passes from `src` into `dst`
    pub fn render(&mut self, gaze: Option<NormalizedGazePosition>, src: &Surface, dst: &mut Surface) {
        let mut uniforms = self.uniforms(gaze);
        if dst.dimensions() != src.dimensions() {
            *dst = Surface::new(src.width(), src.height());
        }
        let mut temp = Surface::new(src.width(), src.height());

        uniforms.blur_direction = VERTICAL;
        self.filter.blit(src, src, &mut temp, &uniforms);

        uniforms.blur_direction = HORIZONTAL;
        self.filter.blit(&temp, src, dst, &uniforms);
    }
}

const DEBUG_RING_WIDTH: f32 = 0.003;
const MAX_TAPS: i32 = 64;

/// Reference box-blur filter on the CPU, for hosts without a GPU pipeline
#[derive(Debug, Default)]
pub struct CpuBlurFilter;

impl BlurFilter for CpuBlurFilter {
    fn blit(&mut self, src: &Surface, original: &Surface, dst: &mut Surface, u: &BlurUniforms) {
        let (w, h) = src.dimensions();
        if dst.dimensions() != (w, h) {
            *dst = Surface::new(w, h);
        }
        if w == 0 || h == 0 {
            return;
        }
        let vertical = u.blur_direction.y != 0.0;
        let extent = if vertical { h } else { w } as f32;
        let half = ((u.neighborhood_size * extent).round() as i32).clamp(0, MAX_TAPS);
        let aspect = w as f32 / h as f32;
        let gaze = Vec2::new(u.gaze_pos.x, u.gaze_pos.y);

        for y in 0..h {
            for x in 0..w {
                let uv = Vec2::new((x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32);
                let d = ((uv - gaze) * Vec2::new(aspect, 1.0)).length();

                if u.show_debug != 0 && (d - u.radius).abs() < DEBUG_RING_WIDTH {
                    dst.put_pixel(x, y, Rgba([255, 0, 0, 255]));
                    continue;
                }
                let inside = d < u.radius;
                let blurred = if u.is_peripheral != 0 { !inside } else { inside };
                let px = if blurred && half > 0 {
                    box_sample(src, x, y, half, vertical)
                } else if blurred {
                    *src.get_pixel(x, y)
                } else {
                    *original.get_pixel(x, y)
                };
                dst.put_pixel(x, y, px);
            }
        }
    }
}

fn box_sample(src: &Surface, x: u32, y: u32, half: i32, vertical: bool) -> Rgba<u8> {
    let (w, h) = src.dimensions();
    let mut acc = [0u32; 4];
    let mut n = 0u32;
    for k in -half..=half {
        let (sx, sy) = if vertical {
            (x as i32, (y as i32 + k).clamp(0, h as i32 - 1))
        } else {
            ((x as i32 + k).clamp(0, w as i32 - 1), y as i32)
        };
        let p = src.get_pixel(sx as u32, sy as u32);
        for (a, c) in acc.iter_mut().zip(p.0) {
            *a += u32::from(c);
        }
        n += 1;
    }
    Rgba(acc.map(|a| (a / n) as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records uniforms and copies src to dst
    #[derive(Default)]
    struct Recorder {
        passes: std::sync::Arc<std::sync::Mutex<Vec<BlurUniforms>>>,
    }

    impl BlurFilter for Recorder {
        fn blit(&mut self, src: &Surface, _original: &Surface, dst: &mut Surface, u: &BlurUniforms) {
            self.passes.lock().unwrap().push(*u);
            dst.copy_from_slice(src);
        }
    }

    #[test]
    fn two_passes_vertical_then_horizontal() {
        let recorder = Recorder::default();
        let passes = recorder.passes.clone();
        let mut renderer = ScotomaRenderer::new(Box::new(recorder), BlurParams::default());
        let src = Surface::from_pixel(8, 4, Rgba([10, 20, 30, 255]));
        let mut dst = Surface::new(1, 1);
        renderer.render(Some(NormalizedGazePosition::new(0.25, 0.2)), &src, &mut dst);

        let passes = passes.lock().unwrap();
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0].blur_direction, VERTICAL);
        assert_eq!(passes[1].blur_direction, HORIZONTAL);
        assert_eq!(passes[0].gaze_pos.x, 0.25);
        assert!((passes[0].gaze_pos.y - 0.8).abs() < 1e-6);
        assert_eq!(passes[0].is_peripheral, 1);
        assert_eq!(dst, src);
    }

    #[test]
    fn missing_gaze_uses_center() {
        assert_eq!(ScotomaRenderer::shader_gaze(None), Vec2::splat(0.5));
        let g = ScotomaRenderer::shader_gaze(Some(NormalizedGazePosition { x: 1.4, y: -0.2 }));
        assert_eq!(g, Vec2::new(1.0, 1.0));
    }

    #[test]
    fn params_are_bounded() {
        let p = BlurParams::new(1.0, 0.5, BlurType::Central, false);
        assert_eq!(p.radius, BlurParams::MAX_RADIUS);
        assert_eq!(p.neighborhood_size, BlurParams::MAX_NEIGHBORHOOD);
        let p = BlurParams::new(f32::NAN, -1.0, BlurType::Central, false);
        assert_eq!((p.radius, p.neighborhood_size), (0.0, 0.0));
    }

    #[test]
    fn debug_ring_toggles() {
        let mut renderer = ScotomaRenderer::new(Box::new(CpuBlurFilter), BlurParams::default());
        assert!(renderer.toggle_debug_ring());
        assert_eq!(renderer.uniforms(None).show_debug, 1);
        assert!(!renderer.toggle_debug_ring());
    }

    fn stripes(w: u32, h: u32) -> Surface {
        Surface::from_fn(w, h, |x, _| {
            if x % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        })
    }

    #[test]
    fn peripheral_keeps_center_sharp() {
        let src = stripes(64, 64);
        let mut dst = Surface::new(64, 64);
        let params = BlurParams::new(0.1, 0.05, BlurType::Peripheral, false);
        let mut renderer = ScotomaRenderer::new(Box::new(CpuBlurFilter), params);
        renderer.render(None, &src, &mut dst);
        // center untouched, corner averaged towards grey
        assert_eq!(dst.get_pixel(32, 32), src.get_pixel(32, 32));
        let corner = dst.get_pixel(2, 2).0[0];
        assert!(corner > 60 && corner < 200, "corner={corner}");
    }

    #[test]
    fn central_blurs_only_the_disk() {
        let src = stripes(64, 64);
        let mut dst = Surface::new(64, 64);
        let params = BlurParams::new(0.1, 0.05, BlurType::Central, false);
        let mut renderer = ScotomaRenderer::new(Box::new(CpuBlurFilter), params);
        renderer.render(None, &src, &mut dst);
        assert_eq!(dst.get_pixel(2, 2), src.get_pixel(2, 2));
        let center = dst.get_pixel(32, 32).0[0];
        assert!(center > 60 && center < 200, "center={center}");
    }
}
