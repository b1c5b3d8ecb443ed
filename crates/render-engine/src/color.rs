//! Paint values.
//!
//! Colors arrive as CSS-like strings from the editor (`"red"`, `"#1a1a1a"`,
//! `"rgba(255, 0, 0, 0.5)"`) and are resolved once, at node construction.

use image::Rgba;
use palette::Srgb;

use montage_common::error::{MontageError, MontageResult};

/// A straight (non-premultiplied) RGBA8 color.
pub type Paint = Rgba<u8>;

pub const BLACK: Paint = Rgba([0, 0, 0, 255]);
pub const WHITE: Paint = Rgba([255, 255, 255, 255]);
pub const TRANSPARENT: Paint = Rgba([0, 0, 0, 0]);

/// Parse a CSS color string.
///
/// Supports named colors, `#rgb`, `#rrggbb`, `#rrggbbaa`, `rgb(r, g, b)`,
/// `rgba(r, g, b, a)` with `a` in `[0, 1]`, and `transparent`.
pub fn parse_color(value: &str) -> MontageResult<Paint> {
    let raw = value.trim();
    let lower = raw.to_ascii_lowercase();

    if lower == "transparent" {
        return Ok(TRANSPARENT);
    }

    if let Some(args) = lower
        .strip_prefix("rgba(")
        .or_else(|| lower.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return parse_functional(args).ok_or_else(|| invalid(raw));
    }

    if let Some(hex) = lower.strip_prefix('#') {
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) || ![3, 6, 8].contains(&hex.len()) {
            return Err(invalid(raw));
        }
        if hex.len() == 8 {
            let rgb: Srgb<u8> = hex[..6].parse().map_err(|_| invalid(raw))?;
            let alpha = u8::from_str_radix(&hex[6..], 16).map_err(|_| invalid(raw))?;
            return Ok(Rgba([rgb.red, rgb.green, rgb.blue, alpha]));
        }
        let rgb: Srgb<u8> = hex.parse().map_err(|_| invalid(raw))?;
        return Ok(Rgba([rgb.red, rgb.green, rgb.blue, 255]));
    }

    palette::named::from_str(&lower)
        .map(|rgb| Rgba([rgb.red, rgb.green, rgb.blue, 255]))
        .ok_or_else(|| invalid(raw))
}

fn parse_functional(args: &str) -> Option<Paint> {
    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    if parts.len() != 3 && parts.len() != 4 {
        return None;
    }

    let channel = |s: &str| -> Option<u8> {
        let v: f64 = s.parse().ok()?;
        Some(v.round().clamp(0.0, 255.0) as u8)
    };

    let alpha = match parts.get(3) {
        Some(a) => {
            let v: f64 = a.parse().ok()?;
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        None => 255,
    };

    Some(Rgba([
        channel(parts[0])?,
        channel(parts[1])?,
        channel(parts[2])?,
        alpha,
    ]))
}

fn invalid(value: &str) -> MontageError {
    MontageError::build(format!("Invalid color value: {value:?}"))
}
