use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{PresenterError, Result};

/// Half-length of each arm of the fixation cross, in pixels.
pub const FIXATION_HALF_SIZE: i32 = 20;

/// Handle of a texture owned by the graphics backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Something the surface can draw, with its native size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drawable {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
}

impl Drawable {
    /// Approximate GPU footprint assuming RGBA8.
    pub fn estimated_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// RGBA colour. Written and parsed as `"R,G,B"` or `"R,G,B,A"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

impl FromStr for Color {
    type Err = PresenterError;

    fn from_str(s: &str) -> Result<Self> {
        let parts = s
            .split(',')
            .map(|part| part.trim().parse::<u8>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| PresenterError::msg(format!("invalid colour `{s}`: {err}")))?;

        match parts[..] {
            [r, g, b] => Ok(Self::rgb(r, g, b)),
            [r, g, b, a] => Ok(Self { r, g, b, a }),
            _ => Err(PresenterError::msg(format!(
                "invalid colour `{s}`: expected R,G,B or R,G,B,A"
            ))),
        }
    }
}

impl TryFrom<String> for Color {
    type Error = PresenterError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(value: Color) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "{},{},{}", self.r, self.g, self.b)
        } else {
            write!(f, "{},{},{},{}", self.r, self.g, self.b, self.a)
        }
    }
}

/// Axis-aligned destination rectangle in window pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Rectangle of `drawable` scaled by `scale` and centred in a `window` sized area.
pub fn centered_rect(drawable: &Drawable, scale: f32, window: (u32, u32)) -> Rect {
    let width = (drawable.width as f32 * scale).round().max(0.0) as u32;
    let height = (drawable.height as f32 * scale).round().max(0.0) as u32;
    Rect {
        x: (window.0 as i32 - width as i32) / 2,
        y: (window.1 as i32 - height as i32) / 2,
        width,
        height,
    }
}

/// Window and graphics context the presentation loop draws into.
pub trait Surface {
    /// Display refresh rate, if the platform reports one.
    fn refresh_rate_hz(&self) -> Option<f32>;
    /// Drawable area in pixels.
    fn size(&self) -> (u32, u32);
    fn clear(&mut self, color: Color);
    fn draw_texture(&mut self, texture: TextureId, dest: Rect);
    fn draw_line(&mut self, from: (i32, i32), to: (i32, i32), color: Color);
    /// Shows the frame. Blocks until the next refresh when vsync is on.
    fn present(&mut self) -> Result<()>;
}

pub fn draw_fixation_cross(surface: &mut dyn Surface, color: Color) {
    let (w, h) = surface.size();
    let (cx, cy) = (w as i32 / 2, h as i32 / 2);
    surface.draw_line(
        (cx - FIXATION_HALF_SIZE, cy),
        (cx + FIXATION_HALF_SIZE, cy),
        color,
    );
    surface.draw_line(
        (cx, cy - FIXATION_HALF_SIZE),
        (cx, cy + FIXATION_HALF_SIZE),
        color,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colours_parse_with_optional_alpha() {
        assert_eq!("255, 0, 10".parse::<Color>().unwrap(), Color::rgb(255, 0, 10));
        assert_eq!(
            "1,2,3,4".parse::<Color>().unwrap(),
            Color {
                r: 1,
                g: 2,
                b: 3,
                a: 4
            }
        );
        assert!("1,2".parse::<Color>().is_err());
        assert!("256,0,0".parse::<Color>().is_err());
        assert!("red".parse::<Color>().is_err());
    }

    #[test]
    fn colours_serialise_as_strings() {
        let json = serde_json::to_string(&Color::rgb(10, 20, 30)).unwrap();
        assert_eq!(json, "\"10,20,30\"");
        let back: Color = serde_json::from_str("\"10,20,30,40\"").unwrap();
        assert_eq!(back.a, 40);
    }

    #[test]
    fn centred_and_scaled() {
        let drawable = Drawable {
            id: TextureId(1),
            width: 200,
            height: 100,
        };
        assert_eq!(
            centered_rect(&drawable, 1.0, (1920, 1080)),
            Rect {
                x: 860,
                y: 490,
                width: 200,
                height: 100
            }
        );
        let rect = centered_rect(&drawable, 2.5, (400, 300));
        assert_eq!((rect.width, rect.height), (500, 250));
        assert_eq!((rect.x, rect.y), (-50, 25));
    }
}
