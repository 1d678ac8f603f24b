/*
 *  display/sink.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Render sinks: where finished canvases go
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

use image::{ImageFormat, Rgb, RgbImage};
use log::{debug, info};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::color::nearest_swatch;
use super::Canvas;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sink encode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("canvas is {got:?}, panel expects {expected:?}")]
    Size { got: (u32, u32), expected: (u32, u32) },
}

/// Receives finished RGB canvases. Palette reduction and the hardware push happen behind this.
pub trait RenderSink: Send {
    fn name(&self) -> &str;
    fn show(&mut self, canvas: &Canvas) -> Result<(), SinkError>;
}

/// Writes each frame as a PNG, emulating the panel on a desktop.
pub struct PngSink {
    path: PathBuf,
    size: (u32, u32),
    dither: bool,
}

impl PngSink {
    pub fn new(path: PathBuf, size: (u32, u32), dither: bool) -> Self {
        Self { path, size, dither }
    }
}

impl RenderSink for PngSink {
    fn name(&self) -> &str {
        "png"
    }

    fn show(&mut self, canvas: &Canvas) -> Result<(), SinkError> {
        if canvas.dimensions() != self.size {
            return Err(SinkError::Size { got: canvas.dimensions(), expected: self.size });
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let frame = if self.dither { dither_to_palette(canvas) } else { canvas.clone() };

        // readers never see a half written frame
        let tmp = self.path.with_extension("png.tmp");
        frame.save_with_format(&tmp, ImageFormat::Png)?;
        fs::rename(&tmp, &self.path)?;
        info!("Frame written to {}", self.path.display());
        Ok(())
    }
}

/// Keeps every frame in memory; handy for tests and headless runs.
#[derive(Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<Canvas>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Canvas> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }
}

impl RenderSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn show(&mut self, canvas: &Canvas) -> Result<(), SinkError> {
        debug!("recording frame {}x{}", canvas.width(), canvas.height());
        if let Ok(mut frames) = self.frames.lock() {
            frames.push(canvas.clone());
        }
        Ok(())
    }
}

/// Floyd-Steinberg dither onto the panel swatches.
pub fn dither_to_palette(canvas: &Canvas) -> Canvas {
    let (width, height) = canvas.dimensions();
    let (w, h) = (width as usize, height as usize);
    let mut work: Vec<[f32; 3]> = canvas
        .pixels()
        .map(|p| [p.0[0] as f32, p.0[1] as f32, p.0[2] as f32])
        .collect();
    let mut out = RgbImage::new(width, height);

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let old = work[idx];
            let clamped = old.map(|c| c.clamp(0.0, 255.0).round() as u8);
            let new = nearest_swatch(clamped);
            out.put_pixel(x as u32, y as u32, Rgb(new));

            let err = [
                old[0] - new[0] as f32,
                old[1] - new[1] as f32,
                old[2] - new[2] as f32,
            ];
            let mut spread = |nx: usize, ny: usize, weight: f32| {
                let n = &mut work[ny * w + nx];
                for c in 0..3 {
                    n[c] += err[c] * weight;
                }
            };
            // (x + 1, y)   * 7 / 16
            if x + 1 < w {
                spread(x + 1, y, 7.0 / 16.0);
            }
            if y + 1 < h {
                // (x - 1, y + 1) * 3 / 16
                if x > 0 {
                    spread(x - 1, y + 1, 3.0 / 16.0);
                }
                // (x, y + 1) * 5 / 16
                spread(x, y + 1, 5.0 / 16.0);
                // (x + 1, y + 1) * 1 / 16
                if x + 1 < w {
                    spread(x + 1, y + 1, 1.0 / 16.0);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::color::PANEL_SWATCHES;

    #[test]
    fn test_dither_uses_only_swatches() {
        let mut img = RgbImage::new(16, 16);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(x * 16) as u8, (y * 16) as u8, 128]);
        }
        let out = dither_to_palette(&img);
        assert!(out.pixels().all(|p| PANEL_SWATCHES.iter().any(|(_, s)| *s == p.0)));
    }

    #[test]
    fn test_dither_keeps_swatch_colors() {
        let img = RgbImage::from_pixel(8, 8, Rgb([255, 0, 0]));
        assert_eq!(dither_to_palette(&img), img);
    }

    #[test]
    fn test_png_sink_rejects_wrong_size() {
        let dir = std::env::temp_dir().join(format!("myimpression-sink-{}", std::process::id()));
        let mut sink = PngSink::new(dir.join("frame.png"), (800, 480), false);
        assert!(matches!(sink.show(&RgbImage::new(10, 10)), Err(SinkError::Size { .. })));
    }

    #[test]
    fn test_png_sink_writes_frame() {
        let dir = std::env::temp_dir().join(format!("myimpression-sink-ok-{}", std::process::id()));
        let path = dir.join("frame.png");
        let mut sink = PngSink::new(path.clone(), (8, 4), true);
        sink.show(&RgbImage::from_pixel(8, 4, Rgb([250, 250, 250]))).unwrap();
        let back = image::open(&path).unwrap().to_rgb8();
        assert_eq!(back.get_pixel(3, 2), &Rgb([255, 255, 255]));
        let _ = fs::remove_dir_all(dir);
    }
}
