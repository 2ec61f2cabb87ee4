use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid color {0:?}, expected #RRGGBB or #AARRGGBB")]
pub struct ColorError(pub String);

/// 32-bit ARGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub a: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Color {
        Color { a: 255, r, g, b }
    }

    pub const fn argb(a: u8, r: u8, g: u8, b: u8) -> Color {
        Color { a, r, g, b }
    }

    /// Packed signed ARGB, the representation used by the JSON rule store.
    pub fn to_argb(self) -> i32 {
        i32::from_be_bytes([self.a, self.r, self.g, self.b])
    }

    pub fn from_argb(argb: i32) -> Color {
        let [a, r, g, b] = argb.to_be_bytes();
        Color { a, r, g, b }
    }

    /// `#RRGGBB` when fully opaque, `#AARRGGBB` otherwise.
    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            format!("#{:02X}{:02X}{:02X}{:02X}", self.a, self.r, self.g, self.b)
        }
    }

    /// White text on a dark background picked from a fixed palette by hashing
    /// the word, so the same word always gets the same color.
    pub fn palette_for(word: &str) -> (Color, Color) {
        let hash = word
            .to_lowercase()
            .bytes()
            .fold(0x811c9dc5u32, |h, b| (h ^ b as u32).wrapping_mul(0x01000193));
        (Color::WHITE, PALETTE[hash as usize % PALETTE.len()])
    }
}

const PALETTE: [Color; 14] = [
    Color::rgb(139, 0, 0),
    Color::rgb(0, 100, 0),
    Color::rgb(0, 0, 139),
    Color::rgb(255, 69, 0),
    Color::rgb(128, 0, 128),
    Color::rgb(0, 128, 128),
    Color::rgb(128, 128, 0),
    Color::rgb(165, 42, 42),
    Color::rgb(139, 0, 139),
    Color::rgb(75, 0, 130),
    Color::rgb(128, 0, 0),
    Color::rgb(220, 20, 60),
    Color::rgb(120, 80, 0),
    Color::rgb(0, 100, 150),
];

impl FromStr for Color {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Color, ColorError> {
        let hex = s.trim().trim_start_matches('#');
        if !hex.bytes().all(|c| c.is_ascii_hexdigit()) {
            return Err(ColorError(s.to_string()));
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
        let parsed = match hex.len() {
            6 => byte(0).and_then(|r| Ok(Color::rgb(r, byte(2)?, byte(4)?))),
            8 => byte(0).and_then(|a| Ok(Color::argb(a, byte(2)?, byte(4)?, byte(6)?))),
            _ => return Err(ColorError(s.to_string())),
        };
        parsed.map_err(|_| ColorError(s.to_string()))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
