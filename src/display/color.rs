/*
 *  display/color.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Panel palette, named colors and background selection
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use embedded_graphics::pixelcolor::Rgb888;
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Colors the 6-color panel can reproduce without dithering.
pub const PANEL_SWATCHES: [(&str, [u8; 3]); 6] = [
    ("black", [0, 0, 0]),
    ("white", [255, 255, 255]),
    ("green", [0, 255, 0]),
    ("blue", [0, 0, 255]),
    ("red", [255, 0, 0]),
    ("yellow", [255, 255, 0]),
];

pub const WHITE: [u8; 3] = [255, 255, 255];
pub const BLACK: [u8; 3] = [0, 0, 0];
pub const RED: [u8; 3] = [255, 0, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];

/// Look up a configured color name (case-insensitive).
pub fn named_color(name: &str) -> Option<[u8; 3]> {
    let name = name.trim().to_ascii_lowercase();
    let rgb = match name.as_str() {
        "gray" | "grey" => [128, 128, 128],
        "light_gray" | "light_grey" => [192, 192, 192],
        "dark_gray" | "dark_grey" => [64, 64, 64],
        other => return PANEL_SWATCHES.iter().find(|(n, _)| *n == other).map(|(_, c)| *c),
    };
    Some(rgb)
}

fn distance_sq(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as i32 - y as i32;
            (d * d) as u32
        })
        .sum()
}

/// Nearest panel swatch by squared RGB distance.
pub fn nearest_swatch(rgb: [u8; 3]) -> [u8; 3] {
    let mut best = PANEL_SWATCHES[0].1;
    let mut best_d = u32::MAX;
    for (_, swatch) in PANEL_SWATCHES.iter() {
        let d = distance_sq(rgb, *swatch);
        if d < best_d {
            best_d = d;
            best = *swatch;
        }
    }
    best
}

/// Integer mean of the four corner pixels.
pub fn corner_average(img: &RgbImage) -> [u8; 3] {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return WHITE;
    }
    let corners = [(0, 0), (w - 1, 0), (0, h - 1), (w - 1, h - 1)];
    let mut sum = [0u32; 3];
    for (x, y) in corners {
        let Rgb(px) = *img.get_pixel(x, y);
        for c in 0..3 {
            sum[c] += px[c] as u32;
        }
    }
    [(sum[0] / 4) as u8, (sum[1] / 4) as u8, (sum[2] / 4) as u8]
}

/// Letterbox fill: a fixed color, or derived from the image corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ColorRepr", into = "ColorRepr")]
pub enum BackgroundColor {
    Auto,
    Rgb([u8; 3]),
}

impl Default for BackgroundColor {
    fn default() -> Self {
        BackgroundColor::Rgb(WHITE)
    }
}

impl BackgroundColor {
    /// Resolve against the already scaled image.
    pub fn resolve(&self, scaled: &RgbImage) -> [u8; 3] {
        match self {
            BackgroundColor::Rgb(rgb) => *rgb,
            BackgroundColor::Auto => nearest_swatch(corner_average(scaled)),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ColorRepr {
    Name(String),
    Rgb([u8; 3]),
}

impl TryFrom<ColorRepr> for BackgroundColor {
    type Error = String;

    fn try_from(repr: ColorRepr) -> Result<Self, Self::Error> {
        match repr {
            ColorRepr::Rgb(rgb) => Ok(BackgroundColor::Rgb(rgb)),
            ColorRepr::Name(name) if name.trim().eq_ignore_ascii_case("auto") => Ok(BackgroundColor::Auto),
            ColorRepr::Name(name) => named_color(&name)
                .map(BackgroundColor::Rgb)
                .ok_or_else(|| format!("unknown background color '{name}'")),
        }
    }
}

impl From<BackgroundColor> for ColorRepr {
    fn from(c: BackgroundColor) -> Self {
        match c {
            BackgroundColor::Auto => ColorRepr::Name("auto".to_string()),
            BackgroundColor::Rgb(rgb) => ColorRepr::Rgb(rgb),
        }
    }
}

pub fn to_rgb888(rgb: [u8; 3]) -> Rgb888 {
    Rgb888::new(rgb[0], rgb[1], rgb[2])
}
