/*
 *  display/mod.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display subsystem: canvases, composition, drawing and output sinks
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

// Panel palette and background choice
pub mod color;

// Scale, crop, rotate and letterbox onto the panel
pub mod compositor;

// embedded-graphics screens: dashboard, placeholders, errors
pub mod draw;
pub mod framebuffer;

// Templated weather page through a headless browser
pub mod html;

// Where finished canvases go
pub mod sink;

/// Full panel RGB canvas.
pub type Canvas = image::RgbImage;
