/*
 *  display/framebuffer.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  embedded-graphics draw target over the RGB canvas
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

use core::convert::Infallible;
use embedded_graphics::geometry::{OriginDimensions, Size};
use embedded_graphics::pixelcolor::{Rgb888, RgbColor};
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::Rectangle;
use image::{Rgb, RgbImage};

/// Borrows a canvas so the embedded-graphics primitives and fonts can draw on it.
pub struct CanvasTarget<'a> {
    img: &'a mut RgbImage,
}

impl<'a> CanvasTarget<'a> {
    pub fn new(img: &'a mut RgbImage) -> Self {
        Self { img }
    }

    /// Map (x,y) to pixel coordinates; returns None if out of bounds
    #[inline]
    fn idx(&self, p: Point) -> Option<(u32, u32)> {
        if p.x >= 0 && p.y >= 0 {
            let (x, y) = (p.x as u32, p.y as u32);
            if x < self.img.width() && y < self.img.height() {
                return Some((x, y));
            }
        }
        None
    }
}

#[inline]
fn to_pixel(c: Rgb888) -> Rgb<u8> {
    Rgb([c.r(), c.g(), c.b()])
}

impl OriginDimensions for CanvasTarget<'_> {
    fn size(&self) -> Size {
        Size::new(self.img.width(), self.img.height())
    }
}

impl DrawTarget for CanvasTarget<'_> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(p, c) in pixels {
            if let Some((x, y)) = self.idx(p) {
                self.img.put_pixel(x, y, to_pixel(c));
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        let px = to_pixel(color);
        for p in self.img.pixels_mut() {
            *p = px;
        }
        Ok(())
    }

    fn fill_solid(&mut self, area: &Rectangle, color: Self::Color) -> Result<(), Self::Error> {
        // fast path for the rectangles the layout uses
        let area = area.intersection(&self.bounding_box());
        let Size { width, height } = area.size;
        if width == 0 || height == 0 { return Ok(()); }
        let px = to_pixel(color);
        let (x0, y0) = (area.top_left.x as u32, area.top_left.y as u32);
        for y in y0..y0 + height {
            for x in x0..x0 + width {
                self.img.put_pixel(x, y, px);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};

    #[test]
    fn test_fill_clips_to_canvas() {
        let mut img = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        let mut target = CanvasTarget::new(&mut img);
        Rectangle::new(Point::new(-5, 8), Size::new(20, 20))
            .into_styled(PrimitiveStyle::with_fill(Rgb888::RED))
            .draw(&mut target)
            .unwrap();
        assert_eq!(img.get_pixel(0, 9), &Rgb([255, 0, 0]));
        assert_eq!(img.get_pixel(9, 8), &Rgb([255, 0, 0]));
        assert_eq!(img.get_pixel(0, 7), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_out_of_bounds_pixels_ignored() {
        let mut img = RgbImage::new(4, 4);
        let mut target = CanvasTarget::new(&mut img);
        target
            .draw_iter([Pixel(Point::new(-1, 0), Rgb888::WHITE), Pixel(Point::new(2, 2), Rgb888::WHITE)])
            .unwrap();
        assert_eq!(img.get_pixel(2, 2), &Rgb([255, 255, 255]));
    }
}
