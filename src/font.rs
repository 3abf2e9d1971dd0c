//! Bitmap font table: 3x5 glyph cells with 1px inter-character spacing.
//! Backs `PixelCanvas::draw_text` and `draw_numeric` (spec §4.1). Unknown
//! characters fall back to `?`.

use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::canvas::{self, Color, PixelCanvas, Point};

pub const GLYPH_WIDTH: usize = 3;
pub const GLYPH_HEIGHT: usize = 5;
pub const GLYPH_SPACING: usize = 1;

/// Width a minus sign occupies, fixed by spec regardless of font metrics.
const MINUS_WIDTH: u32 = 4;
const DECIMAL_SEP_LEFT_PAD: u32 = 1;
const DECIMAL_SEP_RIGHT_PAD: u32 = 1;
const DECIMAL_SEP_MARK_WIDTH: u32 = 1;
/// Digits whose glyph doesn't use its rightmost column, so they advance one
/// pixel tighter than the rest when rendered via `draw_numeric`.
const NARROW_DIGITS: [char; 3] = ['4', '7', '9'];

pub type Glyph = [[bool; GLYPH_WIDTH]; GLYPH_HEIGHT];

fn parse_glyph(rows: [&str; GLYPH_HEIGHT]) -> Glyph {
    let mut glyph = [[false; GLYPH_WIDTH]; GLYPH_HEIGHT];
    for (r, row) in rows.iter().enumerate() {
        for (c, ch) in row.chars().enumerate().take(GLYPH_WIDTH) {
            glyph[r][c] = ch != '.';
        }
    }
    glyph
}

lazy_static! {
    static ref FONT: HashMap<char, Glyph> = build_font();
}

#[rustfmt::skip]
fn build_font() -> HashMap<char, Glyph> {
    let mut m = HashMap::new();

    m.insert(' ', parse_glyph(["...", "...", "...", "...", "..."]));
    m.insert('0', parse_glyph(["###", "#.#", "#.#", "#.#", "###"]));
    m.insert('1', parse_glyph([".#.", "##.", ".#.", ".#.", "###"]));
    m.insert('2', parse_glyph(["###", "..#", "###", "#..", "###"]));
    m.insert('3', parse_glyph(["###", "..#", "###", "..#", "###"]));
    m.insert('4', parse_glyph(["#.#", "#.#", "###", "..#", "..#"]));
    m.insert('5', parse_glyph(["###", "#..", "###", "..#", "###"]));
    m.insert('6', parse_glyph(["###", "#..", "###", "#.#", "###"]));
    m.insert('7', parse_glyph(["###", "..#", "..#", "..#", "..#"]));
    m.insert('8', parse_glyph(["###", "#.#", "###", "#.#", "###"]));
    m.insert('9', parse_glyph(["###", "#.#", "###", "..#", "###"]));

    m.insert('A', parse_glyph([".#.", "#.#", "###", "#.#", "#.#"]));
    m.insert('B', parse_glyph(["##.", "#.#", "##.", "#.#", "##."]));
    m.insert('C', parse_glyph(["###", "#..", "#..", "#..", "###"]));
    m.insert('D', parse_glyph(["##.", "#.#", "#.#", "#.#", "##."]));
    m.insert('E', parse_glyph(["###", "#..", "##.", "#..", "###"]));
    m.insert('F', parse_glyph(["###", "#..", "##.", "#..", "#.."]));
    m.insert('G', parse_glyph(["###", "#..", "#.#", "#.#", "###"]));
    m.insert('H', parse_glyph(["#.#", "#.#", "###", "#.#", "#.#"]));
    m.insert('I', parse_glyph(["###", ".#.", ".#.", ".#.", "###"]));
    m.insert('J', parse_glyph(["..#", "..#", "..#", "#.#", "###"]));
    m.insert('K', parse_glyph(["#.#", "#.#", "##.", "#.#", "#.#"]));
    m.insert('L', parse_glyph(["#..", "#..", "#..", "#..", "###"]));
    m.insert('M', parse_glyph(["#.#", "###", "###", "#.#", "#.#"]));
    m.insert('N', parse_glyph(["#.#", "##.", "#.#", "#.#", "#.#"]));
    m.insert('O', parse_glyph(["###", "#.#", "#.#", "#.#", "###"]));
    m.insert('P', parse_glyph(["###", "#.#", "###", "#..", "#.."]));
    m.insert('Q', parse_glyph(["###", "#.#", "#.#", "##.", "..#"]));
    m.insert('R', parse_glyph(["###", "#.#", "##.", "#.#", "#.#"]));
    m.insert('S', parse_glyph(["###", "#..", "###", "..#", "###"]));
    m.insert('T', parse_glyph(["###", ".#.", ".#.", ".#.", ".#."]));
    m.insert('U', parse_glyph(["#.#", "#.#", "#.#", "#.#", "###"]));
    m.insert('V', parse_glyph(["#.#", "#.#", "#.#", "#.#", ".#."]));
    m.insert('W', parse_glyph(["#.#", "#.#", "###", "###", "#.#"]));
    m.insert('X', parse_glyph(["#.#", "#.#", ".#.", "#.#", "#.#"]));
    m.insert('Y', parse_glyph(["#.#", "#.#", ".#.", ".#.", ".#."]));
    m.insert('Z', parse_glyph(["###", "..#", ".#.", "#..", "###"]));

    m.insert('.', parse_glyph(["...", "...", "...", "...", ".#."]));
    m.insert(':', parse_glyph(["...", ".#.", "...", ".#.", "..."]));
    m.insert('-', parse_glyph(["...", "...", "###", "...", "..."]));
    m.insert('%', parse_glyph(["#.#", "..#", ".#.", "#..", "#.#"]));
    m.insert('/', parse_glyph(["..#", "..#", ".#.", "#..", "#.."]));
    m.insert('?', parse_glyph(["###", "..#", ".##", "...", ".#."]));

    m
}

pub fn glyph_for(ch: char) -> &'static Glyph {
    let upper = ch.to_ascii_uppercase();
    FONT.get(&upper).unwrap_or_else(|| FONT.get(&'?').expect("'?' glyph always present"))
}

/// Total pixel width drawn by `draw_text` for `s` (no trailing spacing).
pub fn text_width(s: &str) -> u32 {
    let n = s.chars().count();
    if n == 0 {
        return 0;
    }
    (n * (GLYPH_WIDTH + GLYPH_SPACING) - GLYPH_SPACING) as u32
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericText {
    pub negative: bool,
    /// Decimal digits and at most one `.`, e.g. "12.3", "123", "0".
    pub digits: String,
}

fn count_integer_digits(x: f64) -> u32 {
    let n = x as u64;
    if n == 0 {
        1
    } else {
        n.to_string().len() as u32
    }
}

/// Formats `value` with adaptive decimal precision per spec §4.1 /§8:
/// - `max_total_digits == 1` or integer digits >= `max_total_digits`:
///   render the rounded integer.
/// - otherwise render with `max_total_digits - integer_digits` decimals.
/// A value that rounds to exactly zero at the chosen precision collapses to
/// a bare "0" with no sign and no decimal point.
pub fn format_numeric(value: f64, max_total_digits: u32) -> NumericText {
    let is_negative = value.is_sign_negative() && value != 0.0;
    let abs_value = value.abs();
    let integer_digits = count_integer_digits(abs_value.trunc()).max(1);

    let (digits, is_zero) = if max_total_digits <= 1 || integer_digits >= max_total_digits {
        let rounded = abs_value.round();
        (format!("{}", rounded as i64), rounded == 0.0)
    } else {
        let decimals = max_total_digits - integer_digits;
        let factor = 10f64.powi(decimals as i32);
        let rounded = (abs_value * factor).round() / factor;
        if rounded == 0.0 {
            ("0".to_string(), true)
        } else {
            (format!("{:.*}", decimals as usize, rounded), false)
        }
    };

    NumericText {
        negative: is_negative && !is_zero,
        digits,
    }
}

fn digit_advance(ch: char) -> u32 {
    if NARROW_DIGITS.contains(&ch) {
        (GLYPH_WIDTH - 1) as u32
    } else {
        GLYPH_WIDTH as u32
    }
}

fn decimal_sep_width() -> u32 {
    DECIMAL_SEP_LEFT_PAD + DECIMAL_SEP_MARK_WIDTH + DECIMAL_SEP_RIGHT_PAD
}

/// Total width `draw_numeric_glyphs` will occupy for `nt`.
pub fn numeric_width(nt: &NumericText) -> u32 {
    let chars: Vec<char> = nt.digits.chars().collect();
    let mut total = 0u32;
    if nt.negative {
        total += MINUS_WIDTH + GLYPH_SPACING as u32;
    }
    for (i, ch) in chars.iter().enumerate() {
        total += if *ch == '.' {
            decimal_sep_width()
        } else {
            digit_advance(*ch)
        };
        if i + 1 < chars.len() {
            total += GLYPH_SPACING as u32;
        }
    }
    total
}

/// Draws `nt` starting at `pos` (top-left of the first glyph/sign).
pub fn draw_numeric_glyphs(canvas: &mut PixelCanvas, nt: &NumericText, pos: Point, color: Color) {
    let mut x = pos.x;

    if nt.negative {
        // a thin horizontal bar at vertical mid-height
        let mid_row = (GLYPH_HEIGHT / 2) as i32;
        for dx in 0..MINUS_WIDTH as i32 {
            canvas.draw_pixel(x + dx, pos.y + mid_row, color);
        }
        x += MINUS_WIDTH as i32 + GLYPH_SPACING as i32;
    }

    for ch in nt.digits.chars() {
        if ch == '.' {
            x += DECIMAL_SEP_LEFT_PAD as i32;
            canvas.draw_pixel(x, pos.y + GLYPH_HEIGHT as i32 - 2, color);
            canvas.draw_pixel(x, pos.y + GLYPH_HEIGHT as i32 - 1, color);
            x += DECIMAL_SEP_MARK_WIDTH as i32 + DECIMAL_SEP_RIGHT_PAD as i32 + GLYPH_SPACING as i32;
            continue;
        }
        let glyph = glyph_for(ch);
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits[col] {
                    canvas.draw_pixel(x + col as i32, pos.y + row as i32, color);
                }
            }
        }
        x += digit_advance(ch) as i32 + GLYPH_SPACING as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_char_falls_back_to_question_mark() {
        assert_eq!(glyph_for('~'), glyph_for('?'));
    }

    #[test]
    fn zero_with_one_total_digit() {
        let nt = format_numeric(0.0, 1);
        assert_eq!(nt.digits, "0");
        assert!(!nt.negative);
    }

    #[test]
    fn tiny_negative_collapses_to_bare_zero() {
        let nt = format_numeric(-0.004, 3);
        assert_eq!(nt.digits, "0");
        assert!(!nt.negative);
    }

    #[test]
    fn two_integer_digits_one_decimal() {
        let nt = format_numeric(12.34, 3);
        assert_eq!(nt.digits, "12.3");
        assert!(!nt.negative);
    }

    #[test]
    fn three_integer_digits_renders_as_integer() {
        let nt = format_numeric(123.4, 3);
        assert_eq!(nt.digits, "123");
    }

    #[test]
    fn negative_value_keeps_sign_when_nonzero() {
        let nt = format_numeric(-12.34, 3);
        assert_eq!(nt.digits, "12.3");
        assert!(nt.negative);
    }

    #[test]
    fn canvas_draw_text_returns_width() {
        let mut c = canvas::PixelCanvas::new();
        let w = c.draw_text("HI", canvas::Point { x: 0, y: 0 }, Color::WHITE, canvas::Alignment::Left);
        assert_eq!(w, text_width("HI"));
    }
}
