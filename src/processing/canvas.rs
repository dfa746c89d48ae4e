//! RGBA drawing surface for the compositor
//!
//! Nearest-neighbor scaling, per-pixel clipping and alpha blending on a
//! CPU-side buffer. All drawing is clipped to the canvas bounds.

use crate::capture::VideoFrame;
use crate::recorder::settings::WebcamShape;

/// Shadow drawn under the webcam overlay
const SHADOW_BLUR: f32 = 20.0;
const SHADOW_OFFSET_Y: f32 = 4.0;
const SHADOW_OPACITY: f32 = 0.35;

pub const BORDER_WIDTH: f32 = 4.0;
const BORDER_COLOR: [u8; 3] = [255, 255, 255];

/// Square region on the canvas, top-left corner plus edge length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub size: u32,
}

impl Rect {
    fn center(&self) -> (f32, f32) {
        let half = self.size as f32 / 2.0;
        (self.x as f32 + half, self.y as f32 + half)
    }
}

pub struct Canvas {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.index(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// Copy of the current contents as a frame
    pub fn snapshot(&self, timestamp_ms: u64) -> VideoFrame {
        VideoFrame::new(self.width, self.height, self.data.clone(), timestamp_ms)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    fn blend(&mut self, x: u32, y: u32, rgb: [u8; 3], alpha: f32) {
        let i = self.index(x, y);
        let a = alpha.clamp(0.0, 1.0);
        for c in 0..3 {
            let dst = self.data[i + c] as f32;
            self.data[i + c] = (rgb[c] as f32 * a + dst * (1.0 - a)).round() as u8;
        }
        self.data[i + 3] = 255;
    }

    /// Canvas pixels covering `rect` grown by `margin`, clipped to the bounds
    fn covered(&self, rect: Rect, margin: f32) -> (std::ops::Range<u32>, std::ops::Range<u32>) {
        let clamp_x = |v: f32| v.clamp(0.0, self.width as f32) as u32;
        let clamp_y = |v: f32| v.clamp(0.0, self.height as f32) as u32;
        let (x0, y0) = (rect.x as f32 - margin, rect.y as f32 - margin);
        let (x1, y1) = (
            rect.x as f32 + rect.size as f32 + margin,
            rect.y as f32 + rect.size as f32 + margin,
        );
        (
            clamp_x(x0.floor())..clamp_x(x1.ceil()),
            clamp_y(y0.floor())..clamp_y(y1.ceil()),
        )
    }

    /// Draw `frame` stretched over the whole canvas
    pub fn draw_fill(&mut self, frame: &VideoFrame) {
        if frame.width == 0 || frame.height == 0 {
            return;
        }

        if frame.width == self.width
            && frame.height == self.height
            && frame.data.len() == self.data.len()
        {
            self.data.copy_from_slice(&frame.data);
            return;
        }

        for y in 0..self.height {
            let sy = ((y as u64 * frame.height as u64) / self.height as u64) as u32;
            for x in 0..self.width {
                let sx = ((x as u64 * frame.width as u64) / self.width as u64) as u32;
                let src = ((sy * frame.width + sx) * 4) as usize;
                let dst = self.index(x, y);
                if src + 3 < frame.data.len() {
                    self.data[dst..dst + 4].copy_from_slice(&frame.data[src..src + 4]);
                }
            }
        }
    }

    /// Soft black shadow under the overlay, offset downward
    pub fn draw_shadow(&mut self, rect: Rect, shape: WebcamShape) {
        let shadow = Rect {
            y: rect.y + SHADOW_OFFSET_Y as i32,
            ..rect
        };
        let (xs, ys) = self.covered(shadow, SHADOW_BLUR);

        for y in ys {
            for x in xs.clone() {
                let distance = outside_distance(shadow, shape, x as f32 + 0.5, y as f32 + 0.5);
                let falloff = (1.0 - distance / SHADOW_BLUR).clamp(0.0, 1.0);
                if falloff > 0.0 {
                    self.blend(x, y, [0, 0, 0], SHADOW_OPACITY * falloff);
                }
            }
        }
    }

    /// Draw `frame` horizontally mirrored into `rect`. The frame is center-cropped
    /// to a square first; circles clip everything outside the inscribed circle.
    pub fn draw_mirrored(&mut self, frame: &VideoFrame, rect: Rect, shape: WebcamShape) {
        if frame.width == 0 || frame.height == 0 || rect.size == 0 {
            return;
        }

        let side = frame.width.min(frame.height) as u64;
        let ox = ((frame.width as u64 - side) / 2) as u32;
        let oy = ((frame.height as u64 - side) / 2) as u32;
        let size = rect.size as u64;
        let (cx, cy) = rect.center();
        let radius = rect.size as f32 / 2.0;
        let (xs, ys) = self.covered(rect, 0.0);

        for y in ys {
            let dy = (y as i64 - rect.y as i64) as u64;
            let sy = oy + (dy * side / size) as u32;
            for x in xs.clone() {
                if shape == WebcamShape::Circle {
                    let (px, py) = (x as f32 + 0.5 - cx, y as f32 + 0.5 - cy);
                    if px * px + py * py > radius * radius {
                        continue;
                    }
                }

                let dx = (x as i64 - rect.x as i64) as u64;
                let sx = ox + (side - 1 - (dx * side / size).min(side - 1)) as u32;
                let src = ((sy.min(frame.height - 1) * frame.width + sx) * 4) as usize;
                if src + 3 >= frame.data.len() {
                    continue;
                }

                let dst = self.index(x, y);
                self.data[dst..dst + 3].copy_from_slice(&frame.data[src..src + 3]);
                self.data[dst + 3] = 255;
            }
        }
    }

    /// Solid stroke centered on the overlay edge
    pub fn draw_border(&mut self, rect: Rect, shape: WebcamShape) {
        let half = BORDER_WIDTH / 2.0;
        let (xs, ys) = self.covered(rect, half + 1.0);
        let (cx, cy) = rect.center();
        let radius = rect.size as f32 / 2.0;

        for y in ys {
            for x in xs.clone() {
                let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
                let on_edge = match shape {
                    WebcamShape::Circle => {
                        let d = ((px - cx).powi(2) + (py - cy).powi(2)).sqrt();
                        (d - radius).abs() <= half
                    }
                    WebcamShape::Square => {
                        let ex = (px - cx).abs() - radius;
                        let ey = (py - cy).abs() - radius;
                        let edge = ex.max(ey);
                        edge.abs() <= half
                    }
                };
                if on_edge {
                    self.blend(x, y, BORDER_COLOR, 1.0);
                }
            }
        }
    }
}

/// Distance from a point to the shape, zero inside it
fn outside_distance(rect: Rect, shape: WebcamShape, px: f32, py: f32) -> f32 {
    let (cx, cy) = rect.center();
    let radius = rect.size as f32 / 2.0;
    match shape {
        WebcamShape::Circle => (((px - cx).powi(2) + (py - cy).powi(2)).sqrt() - radius).max(0.0),
        WebcamShape::Square => {
            let dx = ((px - cx).abs() - radius).max(0.0);
            let dy = ((py - cy).abs() - radius).max(0.0);
            (dx * dx + dy * dy).sqrt()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Webcam frame whose left half is red and right half is blue
    fn split_frame(width: u32, height: u32) -> VideoFrame {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for _y in 0..height {
            for x in 0..width {
                if x < width / 2 {
                    data.extend_from_slice(&[255, 0, 0, 255]);
                } else {
                    data.extend_from_slice(&[0, 0, 255, 255]);
                }
            }
        }
        VideoFrame::new(width, height, data, 0)
    }

    #[test]
    fn test_draw_fill_scales_to_canvas() {
        let mut canvas = Canvas::new(4, 4);
        canvas.draw_fill(&VideoFrame::solid(2, 2, [10, 20, 30, 255]));
        assert_eq!(canvas.pixel(3, 3), [10, 20, 30, 255]);

        canvas.draw_fill(&VideoFrame::solid(4, 4, [1, 1, 1, 255]));
        assert_eq!(canvas.pixel(0, 0), [1, 1, 1, 255]);
    }

    #[test]
    fn test_mirrored_swaps_left_and_right() {
        let mut canvas = Canvas::new(20, 20);
        let rect = Rect { x: 0, y: 0, size: 20 };
        canvas.draw_mirrored(&split_frame(20, 20), rect, WebcamShape::Square);

        assert_eq!(canvas.pixel(1, 10), [0, 0, 255, 255]);
        assert_eq!(canvas.pixel(18, 10), [255, 0, 0, 255]);
    }

    #[test]
    fn test_mirrored_crops_wide_frames_to_square() {
        let mut canvas = Canvas::new(10, 10);
        let rect = Rect { x: 0, y: 0, size: 10 };
        // 40x10: center crop keeps columns 15..25, straddling the colour split
        canvas.draw_mirrored(&split_frame(40, 10), rect, WebcamShape::Square);

        assert_eq!(canvas.pixel(0, 5), [0, 0, 255, 255]);
        assert_eq!(canvas.pixel(9, 5), [255, 0, 0, 255]);
    }

    #[test]
    fn test_circle_clips_corners() {
        let mut canvas = Canvas::new(20, 20);
        let rect = Rect { x: 0, y: 0, size: 20 };
        canvas.draw_mirrored(&VideoFrame::solid(20, 20, [9, 9, 9, 255]), rect, WebcamShape::Circle);

        assert_eq!(canvas.pixel(0, 0), [0, 0, 0, 0]);
        assert_eq!(canvas.pixel(10, 10), [9, 9, 9, 255]);
    }

    #[test]
    fn test_border_is_white_on_edge_only() {
        let mut canvas = Canvas::new(40, 40);
        let rect = Rect { x: 10, y: 10, size: 20 };
        canvas.draw_border(rect, WebcamShape::Square);

        assert_eq!(canvas.pixel(10, 20), [255, 255, 255, 255]);
        assert_eq!(canvas.pixel(20, 20), [0, 0, 0, 0]);
        assert_eq!(canvas.pixel(2, 2), [0, 0, 0, 0]);
    }

    #[test]
    fn test_shadow_darkens_below_overlay() {
        let mut canvas = Canvas::new(60, 60);
        canvas.draw_fill(&VideoFrame::solid(60, 60, [200, 200, 200, 255]));
        let rect = Rect { x: 20, y: 20, size: 20 };
        canvas.draw_shadow(rect, WebcamShape::Circle);

        assert!(canvas.pixel(30, 42)[0] < 200);
        assert_eq!(canvas.pixel(0, 0), [200, 200, 200, 255]);
    }

    #[test]
    fn test_drawing_is_clipped_to_bounds() {
        let mut canvas = Canvas::new(10, 10);
        let rect = Rect { x: 5, y: 5, size: 20 };
        canvas.draw_shadow(rect, WebcamShape::Square);
        canvas.draw_mirrored(&VideoFrame::solid(4, 4, [7, 7, 7, 255]), rect, WebcamShape::Square);
        canvas.draw_border(rect, WebcamShape::Square);
        assert_eq!(canvas.pixel(9, 9), [7, 7, 7, 255]);
    }
}
