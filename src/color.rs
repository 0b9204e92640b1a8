//! RGB colors shared by view settings, materials and lights.
//!
//! Colors travel through settings and payloads as `#rrggbb` strings and
//! through scripts as `0xRRGGBB` integers; both decode into [`Rgb`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Linear-ish RGB triple with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid color '{0}': expected #rrggbb")]
pub struct ColorParseError(pub String);

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(1.0, 1.0, 1.0);
    pub const BLACK: Rgb = Rgb::new(0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Build from a packed `0xRRGGBB` value.
    pub fn from_hex(hex: u32) -> Self {
        Self {
            r: ((hex >> 16) & 0xff) as f32 / 255.0,
            g: ((hex >> 8) & 0xff) as f32 / 255.0,
            b: (hex & 0xff) as f32 / 255.0,
        }
    }

    pub fn to_hex(self) -> u32 {
        let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u32;
        (channel(self.r) << 16) | (channel(self.g) << 8) | channel(self.b)
    }

    pub fn lerp(self, other: Rgb, t: f32) -> Rgb {
        Rgb {
            r: self.r + (other.r - self.r) * t,
            g: self.g + (other.g - self.g) * t,
            b: self.b + (other.b - self.b) * t,
        }
    }

    pub fn scaled(self, factor: f32) -> Rgb {
        Rgb::new(self.r * factor, self.g * factor, self.b * factor)
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    pub fn to_rgba(self, alpha: f32) -> [f32; 4] {
        [self.r, self.g, self.b, alpha]
    }

    /// Decode sRGB-encoded components for shading. Values above 1 stay bright.
    pub fn to_linear(self) -> [f32; 3] {
        fn decode(c: f32) -> f32 {
            if c <= 0.04045 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        }
        [decode(self.r), decode(self.g), decode(self.b)]
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb::WHITE
    }
}

impl FromStr for Rgb {
    type Err = ColorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches('#');
        let digits = digits.strip_prefix("0x").unwrap_or(digits);
        let expanded: String = match digits.len() {
            6 => digits.to_string(),
            // Shorthand #rgb
            3 => digits.chars().flat_map(|c| [c, c]).collect(),
            _ => return Err(ColorParseError(s.to_string())),
        };
        u32::from_str_radix(&expanded, 16)
            .map(Rgb::from_hex)
            .map_err(|_| ColorParseError(s.to_string()))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.to_hex())
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Rgb {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_linear() {
        assert_eq!(Rgb::BLACK.to_linear(), [0.0; 3]);
        let white = Rgb::WHITE.to_linear();
        assert!((white[0] - 1.0).abs() < 1e-6);
        let mid = Rgb::new(0.5, 0.5, 0.5).to_linear();
        assert!((mid[0] - 0.2140).abs() < 1e-3);
        assert!(Rgb::new(2.0, 0.0, 0.0).to_linear()[0] > 1.0);
    }

    #[test]
    fn test_hex_round_trip() {
        let c = Rgb::from_hex(0x00f3ff);
        assert_eq!(c.to_hex(), 0x00f3ff);
        assert_eq!(c.to_string(), "#00f3ff");
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!("#bc13fe".parse::<Rgb>().unwrap().to_hex(), 0xbc13fe);
        assert_eq!("BC13FE".parse::<Rgb>().unwrap().to_hex(), 0xbc13fe);
        assert_eq!("#fff".parse::<Rgb>().unwrap().to_hex(), 0xffffff);
        assert!("#12345".parse::<Rgb>().is_err());
        assert!("#zzzzzz".parse::<Rgb>().is_err());
    }

    #[test]
    fn test_lerp_endpoints() {
        let a = Rgb::from_hex(0x000000);
        let b = Rgb::from_hex(0xffffff);
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
        assert!((a.lerp(b, 0.5).g - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Rgb::from_hex(0x404040)).unwrap();
        assert_eq!(json, "\"#404040\"");
        let back: Rgb = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_hex(), 0x404040);
    }
}
