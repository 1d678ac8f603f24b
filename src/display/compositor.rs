/*
 *  display/compositor.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Fits arbitrary images onto the fixed panel canvas
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

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use log::debug;
use std::path::Path;
use thiserror::Error;

use super::color::BackgroundColor;

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("source image has zero area ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),
}

/// Per-mode fitting policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub fill_screen: bool,
    pub auto_rotate: bool,
    pub saturation: f32,
    pub background: BackgroundColor,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            fill_screen: false,
            auto_rotate: true,
            saturation: 1.0,
            background: BackgroundColor::default(),
        }
    }
}

/// Geometry decided for one source image before any pixel work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitPlan {
    pub rotate: bool,
    /// size after the optional rotation and scaling
    pub scaled: (u32, u32),
    /// top-left of the scaled image on the canvas; negative means cropped
    pub offset: (i64, i64),
}

impl FitPlan {
    pub fn has_bars(&self, canvas: (u32, u32)) -> bool {
        self.offset.0 > 0 || self.offset.1 > 0
            || (self.scaled.0 as i64 + self.offset.0) < canvas.0 as i64
            || (self.scaled.1 as i64 + self.offset.1) < canvas.1 as i64
    }
}

fn contain_scale(w: u32, h: u32, cw: u32, ch: u32) -> f64 {
    (cw as f64 / w as f64).min(ch as f64 / h as f64)
}

/// Canvas area left uncovered when the image is contained.
fn leftover_area(w: u32, h: u32, cw: u32, ch: u32) -> f64 {
    let s = contain_scale(w, h, cw, ch);
    (cw as f64 * ch as f64) - (w as f64 * s) * (h as f64 * s)
}

fn scaled_size(w: u32, h: u32, cw: u32, ch: u32, fill: bool) -> (u32, u32) {
    let sx = cw as f64 / w as f64;
    let sy = ch as f64 / h as f64;
    if fill {
        let s = sx.max(sy);
        let nw = ((w as f64 * s).round() as u32).max(cw);
        let nh = ((h as f64 * s).round() as u32).max(ch);
        (nw, nh)
    } else {
        let s = sx.min(sy);
        let nw = ((w as f64 * s).round() as u32).clamp(1, cw);
        let nh = ((h as f64 * s).round() as u32).clamp(1, ch);
        (nw, nh)
    }
}

/// Decide rotation, scaled size and placement.
pub fn plan(source: (u32, u32), canvas: (u32, u32), opts: &FitOptions) -> Result<FitPlan, CompositeError> {
    let (w, h) = source;
    let (cw, ch) = canvas;
    if w == 0 || h == 0 {
        return Err(CompositeError::EmptyImage { width: w, height: h });
    }

    let rotate = opts.auto_rotate && leftover_area(h, w, cw, ch) < leftover_area(w, h, cw, ch) - 1e-6;
    let (w, h) = if rotate { (h, w) } else { (w, h) };

    let scaled = if (w, h) == (cw, ch) {
        (w, h)
    } else {
        scaled_size(w, h, cw, ch, opts.fill_screen)
    };
    let offset = (
        (cw as i64 - scaled.0 as i64) / 2,
        (ch as i64 - scaled.1 as i64) / 2,
    );
    Ok(FitPlan { rotate, scaled, offset })
}

/// Fit `image` onto a `canvas` sized RGB frame.
pub fn fit(image: &RgbImage, canvas: (u32, u32), opts: &FitOptions) -> Result<RgbImage, CompositeError> {
    let plan = plan(image.dimensions(), canvas, opts)?;
    debug!(
        "fit {}x{} -> {}x{} rotate={} offset={:?}",
        image.width(), image.height(), plan.scaled.0, plan.scaled.1, plan.rotate, plan.offset
    );

    let rotated;
    let source = if plan.rotate {
        rotated = imageops::rotate90(image);
        &rotated
    } else {
        image
    };

    let mut scaled = if source.dimensions() == plan.scaled {
        source.clone()
    } else {
        imageops::resize(source, plan.scaled.0, plan.scaled.1, FilterType::Lanczos3)
    };

    // auto bars sample the scaled image before any saturation change
    let bg = opts.background.resolve(&scaled);
    adjust_saturation(&mut scaled, opts.saturation);

    let (cw, ch) = canvas;
    if plan.offset.0 <= 0 && plan.offset.1 <= 0 {
        // covers the canvas, center crop any overflow
        let x = (-plan.offset.0) as u32;
        let y = (-plan.offset.1) as u32;
        if (x, y) == (0, 0) && scaled.dimensions() == canvas {
            return Ok(scaled);
        }
        return Ok(imageops::crop_imm(&scaled, x, y, cw, ch).to_image());
    }

    let mut out = RgbImage::from_pixel(cw, ch, Rgb(bg));
    imageops::replace(&mut out, &scaled, plan.offset.0, plan.offset.1);
    Ok(out)
}

/// Blend each pixel toward its luminance gray; 1.0 leaves the image unchanged.
pub fn adjust_saturation(img: &mut RgbImage, factor: f32) {
    let factor = factor.clamp(0.0, 1.0);
    if (factor - 1.0).abs() < f32::EPSILON {
        return;
    }
    for px in img.pixels_mut() {
        let [r, g, b] = px.0;
        let lum = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        let mix = |c: u8| (lum + (c as f32 - lum) * factor).round().clamp(0.0, 255.0) as u8;
        px.0 = [mix(r), mix(g), mix(b)];
    }
}

pub fn load_image(path: &Path) -> Result<RgbImage, CompositeError> {
    Ok(image::open(path)?.to_rgb8())
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, CompositeError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::color::RED;

    const CANVAS: (u32, u32) = (800, 480);

    fn letterbox() -> FitOptions {
        FitOptions { fill_screen: false, auto_rotate: false, saturation: 1.0, background: BackgroundColor::Rgb([255, 255, 255]) }
    }

    #[test]
    fn test_zero_area_is_error() {
        let img = RgbImage::new(0, 10);
        assert!(matches!(fit(&img, CANVAS, &letterbox()), Err(CompositeError::EmptyImage { .. })));
    }

    #[test]
    fn test_exact_size_is_untouched() {
        let mut img = RgbImage::from_pixel(800, 480, Rgb([10, 200, 30]));
        img.put_pixel(0, 0, Rgb([1, 2, 3]));
        img.put_pixel(799, 479, Rgb([4, 5, 6]));
        let p = plan((800, 480), CANVAS, &letterbox()).unwrap();
        assert!(!p.has_bars(CANVAS));
        assert_eq!(p.offset, (0, 0));
        let out = fit(&img, CANVAS, &letterbox()).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn test_fill_crops_wide_image() {
        let opts = FitOptions { fill_screen: true, ..letterbox() };
        let p = plan((1600, 900), CANVAS, &opts).unwrap();
        assert_eq!(p.scaled, (853, 480));
        assert_eq!(p.offset, (-26, 0));
        assert!(!p.has_bars(CANVAS));

        let img = RgbImage::from_pixel(1600, 900, Rgb([0, 0, 255]));
        let out = fit(&img, CANVAS, &opts).unwrap();
        assert_eq!(out.dimensions(), CANVAS);
        assert!(out.get_pixel(0, 0).0[2] > 200);
    }

    #[test]
    fn test_letterbox_adds_bars() {
        let p = plan((1600, 900), CANVAS, &letterbox()).unwrap();
        assert_eq!(p.scaled, (800, 450));
        assert_eq!(p.offset, (0, 15));
        let img = RgbImage::from_pixel(1600, 900, Rgb([0, 0, 0]));
        let out = fit(&img, CANVAS, &letterbox()).unwrap();
        assert_eq!(out.get_pixel(400, 0), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(400, 240), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_auto_rotate_portrait() {
        let opts = FitOptions { auto_rotate: true, ..letterbox() };
        assert!(plan((480, 800), CANVAS, &opts).unwrap().rotate);
        // already landscape: rotating would only waste more area
        assert!(!plan((1600, 900), CANVAS, &opts).unwrap().rotate);
        // square: equal leftover either way, no rotation
        assert!(!plan((500, 500), CANVAS, &opts).unwrap().rotate);
    }

    #[test]
    fn test_auto_background_bars() {
        let opts = FitOptions { background: BackgroundColor::Auto, ..letterbox() };
        let img = RgbImage::from_pixel(400, 480, Rgb([220, 30, 30]));
        let out = fit(&img, CANVAS, &opts).unwrap();
        assert_eq!(out.get_pixel(0, 240).0, RED);
    }

    #[test]
    fn test_auto_bars_ignore_saturation() {
        let opts = FitOptions { background: BackgroundColor::Auto, saturation: 0.2, ..letterbox() };
        let img = RgbImage::from_pixel(400, 480, Rgb([255, 0, 0]));
        let out = fit(&img, CANVAS, &opts).unwrap();
        assert_eq!(out.get_pixel(0, 240).0, RED);
        assert_eq!(out.get_pixel(799, 240).0, RED);
        // the image itself is desaturated
        assert_ne!(out.get_pixel(400, 240).0, RED);
    }

    #[test]
    fn test_saturation_zero_is_gray() {
        let mut img = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
        adjust_saturation(&mut img, 0.0);
        let [r, g, b] = img.get_pixel(0, 0).0;
        assert_eq!(r, g);
        assert_eq!(g, b);
        assert_eq!(r, 76);
    }

    #[test]
    fn test_saturation_half_interpolates() {
        let mut img = RgbImage::from_pixel(1, 1, Rgb([255, 0, 0]));
        adjust_saturation(&mut img, 0.5);
        assert_eq!(img.get_pixel(0, 0).0, [166, 38, 38]);
    }
}
