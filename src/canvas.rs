//! Pixel Canvas (spec §4.1): pure in-memory rasterization into a fixed
//! 64x64 RGBA grid. No I/O, no errors — out-of-bounds coordinates and
//! degenerate shapes are defined as no-ops.

use crate::font;

pub const WIDTH: usize = 64;
pub const HEIGHT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Color { r, g, b, a }
    }

    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Point { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for Size {
    fn from((width, height): (u32, u32)) -> Self {
        Size { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Center,
    Right,
}

/// Fixed 64x64 grid of `Color`, row-major, top-left origin.
#[derive(Clone)]
pub struct PixelCanvas {
    pixels: Vec<Color>,
}

impl PixelCanvas {
    pub fn new() -> Self {
        PixelCanvas {
            pixels: vec![Color::default(); WIDTH * HEIGHT],
        }
    }

    pub fn clear(&mut self) {
        for p in &mut self.pixels {
            *p = Color::default();
        }
    }

    #[inline]
    fn in_bounds(x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < WIDTH && (y as usize) < HEIGHT
    }

    #[inline]
    fn index(x: i32, y: i32) -> usize {
        y as usize * WIDTH + x as usize
    }

    pub fn get_pixel(&self, x: i32, y: i32) -> Color {
        if Self::in_bounds(x, y) {
            self.pixels[Self::index(x, y)]
        } else {
            Color::TRANSPARENT
        }
    }

    /// Clipped, alpha-blended pixel write. `out = src*a + dst*(1-a)`.
    pub fn draw_pixel(&mut self, x: i32, y: i32, color: Color) {
        if !Self::in_bounds(x, y) {
            return;
        }
        let idx = Self::index(x, y);
        self.pixels[idx] = blend(self.pixels[idx], color);
    }

    /// Integer Bresenham, clipped and blended per pixel.
    pub fn draw_line(&mut self, p0: Point, p1: Point, color: Color) {
        let (mut x0, mut y0) = (p0.x, p0.y);
        let (x1, y1) = (p1.x, p1.y);
        let dx = (x1 - x0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let dy = -(y1 - y0).abs();
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            self.draw_pixel(x0, y0, color);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    /// Filled rectangle. Alias: `fill_rect`.
    pub fn draw_rect(&mut self, pos: Point, size: Size, color: Color) {
        if size.width == 0 || size.height == 0 {
            return;
        }
        for dy in 0..size.height as i32 {
            for dx in 0..size.width as i32 {
                self.draw_pixel(pos.x + dx, pos.y + dy, color);
            }
        }
    }

    pub fn fill_rect(&mut self, pos: Point, size: Size, color: Color) {
        self.draw_rect(pos, size, color);
    }

    /// Bitmap-font text draw. Returns the pixel width drawn.
    pub fn draw_text(&mut self, text: &str, pos: Point, color: Color, alignment: Alignment) -> u32 {
        let total_width = font::text_width(text);
        let start_x = match alignment {
            Alignment::Left => pos.x,
            Alignment::Center => pos.x - total_width as i32 / 2,
            Alignment::Right => pos.x - total_width as i32,
        };

        let mut cursor_x = start_x;
        for ch in text.chars() {
            let glyph = font::glyph_for(ch);
            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..font::GLYPH_WIDTH {
                    if bits[col] {
                        self.draw_pixel(cursor_x + col as i32, pos.y + row as i32, color);
                    }
                }
            }
            cursor_x += font::GLYPH_WIDTH as i32 + font::GLYPH_SPACING as i32;
        }

        total_width
    }

    /// Adaptive-precision numeric draw. See spec §4.1 and §8 boundary cases.
    pub fn draw_numeric(
        &mut self,
        value: f64,
        pos: Point,
        color: Color,
        alignment: Alignment,
        max_total_digits: u32,
    ) -> u32 {
        let formatted = font::format_numeric(value, max_total_digits);
        let total_width = font::numeric_width(&formatted);
        let start_x = match alignment {
            Alignment::Left => pos.x,
            Alignment::Center => pos.x - total_width as i32 / 2,
            Alignment::Right => pos.x - total_width as i32,
        };

        font::draw_numeric_glyphs(self, &formatted, Point { x: start_x, y: pos.y }, color);
        total_width
    }

    /// Raster image blit. No-op unless the `raster-images` feature is
    /// enabled; even then, absent/invalid image data is a no-op, never an
    /// error, per spec.
    #[cfg(feature = "raster-images")]
    pub fn draw_image(
        &mut self,
        image_path: &std::path::Path,
        pos: Point,
        size: Size,
        alpha: u8,
    ) {
        let Ok(img) = image::open(image_path) else {
            return;
        };
        let resized = img.resize_exact(size.width, size.height, image::imageops::FilterType::Nearest);
        let rgba = resized.to_rgba8();
        for (x, y, px) in rgba.enumerate_pixels() {
            let [r, g, b, a] = px.0;
            let a = ((a as u32) * (alpha as u32) / 255) as u8;
            self.draw_pixel(pos.x + x as i32, pos.y + y as i32, Color::rgba(r, g, b, a));
        }
    }

    #[cfg(not(feature = "raster-images"))]
    pub fn draw_image(
        &mut self,
        _image_path: &std::path::Path,
        _pos: Point,
        _size: Size,
        _alpha: u8,
    ) {
    }

    /// Row-major 64*64*3 RGB bytes, alpha consumed by compositing against
    /// black (the device has no alpha channel on the wire).
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(WIDTH * HEIGHT * 3);
        for p in &self.pixels {
            out.push(p.r);
            out.push(p.g);
            out.push(p.b);
        }
        out
    }
}

impl Default for PixelCanvas {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
pub fn blend(dst: Color, src: Color) -> Color {
    if src.a == 255 {
        return src;
    }
    if src.a == 0 {
        return dst;
    }
    let a = src.a as u32;
    let inv_a = 255 - a;
    let ch = |s: u8, d: u8| -> u8 {
        (((s as u32) * a + (d as u32) * inv_a + 127) / 255) as u8
    };
    Color::rgba(ch(src.r, dst.r), ch(src.g, dst.g), ch(src.b, dst.b), 255)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_zeroes_buffer() {
        let mut c = PixelCanvas::new();
        c.draw_pixel(5, 5, Color::WHITE);
        c.clear();
        assert_eq!(c.get_pixel(5, 5), Color::TRANSPARENT);
    }

    #[test]
    fn corners_are_clipped_correctly() {
        let mut c = PixelCanvas::new();
        for (x, y) in [(0, 0), (63, 0), (0, 63), (63, 63)] {
            c.draw_pixel(x, y, Color::WHITE);
            assert_eq!(c.get_pixel(x, y), Color::WHITE);
        }
    }

    #[test]
    fn out_of_bounds_is_noop() {
        let mut c = PixelCanvas::new();
        c.draw_pixel(-1, 0, Color::WHITE);
        c.draw_pixel(64, 0, Color::WHITE);
        c.draw_pixel(0, -1, Color::WHITE);
        c.draw_pixel(0, 64, Color::WHITE);
        // nothing panicked and the buffer is still all-zero
        for y in 0..HEIGHT as i32 {
            for x in 0..WIDTH as i32 {
                assert_eq!(c.get_pixel(x, y), Color::TRANSPARENT);
            }
        }
    }

    #[test]
    fn zero_sized_rect_is_noop() {
        let mut c = PixelCanvas::new();
        c.draw_rect(Point { x: 0, y: 0 }, Size { width: 0, height: 5 }, Color::WHITE);
        c.draw_rect(Point { x: 0, y: 0 }, Size { width: 5, height: 0 }, Color::WHITE);
        assert_eq!(c.get_pixel(0, 0), Color::TRANSPARENT);
    }

    #[test]
    fn alpha_blend_over_opaque_background() {
        let mut c = PixelCanvas::new();
        c.draw_pixel(10, 10, Color::rgb(255, 0, 0));
        c.draw_pixel(10, 10, Color::rgba(0, 255, 0, 128));
        let p = c.get_pixel(10, 10);
        // roughly half green, half red
        assert!(p.g > 120 && p.g < 135);
        assert!(p.r > 120 && p.r < 135);
    }

    #[test]
    fn empty_string_is_noop() {
        let mut c = PixelCanvas::new();
        let w = c.draw_text("", Point { x: 0, y: 0 }, Color::WHITE, Alignment::Left);
        assert_eq!(w, 0);
    }
}
