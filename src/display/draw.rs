/*
 *  display/draw.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Direct drawing: message screens and the weather dashboard
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
use embedded_graphics::{
    mono_font::{
        iso_8859_1::{FONT_6X13, FONT_9X15, FONT_9X18_BOLD, FONT_10X20},
        MonoFont, MonoTextStyle,
    },
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Line, PrimitiveStyle, PrimitiveStyleBuilder, Rectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};
use embedded_text::{
    alignment::{HorizontalAlignment, VerticalAlignment},
    style::TextBoxStyleBuilder,
    TextBox,
};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use log::warn;

use super::color::{to_rgb888, BLACK, BLUE, RED, WHITE};
use super::framebuffer::CanvasTarget;
use super::Canvas;
use crate::icons::{IconHandle, IconResolver, WeatherCategory};
use crate::weather::{condition_description, WeatherSnapshot};

fn paint(canvas: &mut Canvas, f: impl FnOnce(&mut CanvasTarget<'_>) -> Result<(), Infallible>) {
    let mut target = CanvasTarget::new(canvas);
    let Ok(()) = f(&mut target);
}

pub fn draw_text<D>(target: &mut D, text: &str, top_left: Point, font: &MonoFont, color: Rgb888) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb888>,
{
    Text::with_baseline(text, top_left, MonoTextStyle::new(font, color), Baseline::Top).draw(target)?;
    Ok(())
}

pub fn draw_text_centered<D>(target: &mut D, text: &str, center_x: i32, y: i32, font: &MonoFont, color: Rgb888) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb888>,
{
    let style = TextStyleBuilder::new().alignment(Alignment::Center).baseline(Baseline::Top).build();
    Text::with_text_style(text, Point::new(center_x, y), MonoTextStyle::new(font, color), style).draw(target)?;
    Ok(())
}

pub fn draw_text_right<D>(target: &mut D, text: &str, right_x: i32, y: i32, font: &MonoFont, color: Rgb888) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb888>,
{
    let style = TextStyleBuilder::new().alignment(Alignment::Right).baseline(Baseline::Top).build();
    Text::with_text_style(text, Point::new(right_x, y), MonoTextStyle::new(font, color), style).draw(target)?;
    Ok(())
}

/// Word wrapped text centered inside `region`.
pub fn draw_text_region<D>(target: &mut D, text: &str, region: Rectangle, font: &MonoFont, color: Rgb888) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb888>,
{
    let textbox_style = TextBoxStyleBuilder::new()
        .alignment(HorizontalAlignment::Center)
        .vertical_alignment(VerticalAlignment::Top)
        .build();
    TextBox::with_textbox_style(text, region, MonoTextStyle::new(font, color), textbox_style).draw(target)?;
    Ok(())
}

pub fn draw_hline<D>(target: &mut D, y: i32, x0: i32, x1: i32, color: Rgb888, width: u32) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb888>,
{
    Line::new(Point::new(x0, y), Point::new(x1, y))
        .into_styled(PrimitiveStyle::with_stroke(color, width))
        .draw(target)
}

/// Mono fonts top out at 10x20, big figures are drawn small and scaled up.
pub fn draw_scaled_text(canvas: &mut Canvas, text: &str, top_left: (i64, i64), scale: u32, color: [u8; 3]) {
    let font = &FONT_10X20;
    let chars = text.chars().count() as u32;
    if chars == 0 || scale == 0 {
        return;
    }
    let (w, h) = (chars * font.character_size.width, font.character_size.height);
    let mut mask = RgbImage::from_pixel(w, h, Rgb(WHITE));
    paint(&mut mask, |t| draw_text(t, text, Point::zero(), font, Rgb888::BLACK));
    let big = imageops::resize(&mask, w * scale, h * scale, FilterType::Nearest);
    for (x, y, p) in big.enumerate_pixels() {
        if p.0[0] >= 128 {
            continue;
        }
        let (cx, cy) = (top_left.0 + x as i64, top_left.1 + y as i64);
        if cx >= 0 && cy >= 0 && (cx as u32) < canvas.width() && (cy as u32) < canvas.height() {
            canvas.put_pixel(cx as u32, cy as u32, Rgb(color));
        }
    }
}

/// Plain screen with a heading and wrapped detail text.
pub fn message_screen(size: (u32, u32), title: &str, detail: &str, title_color: [u8; 3]) -> Canvas {
    let (w, h) = size;
    let mut canvas = RgbImage::from_pixel(w, h, Rgb(WHITE));
    let title_scale = 3;
    let title_w = title.chars().count() as i64 * 10 * title_scale as i64;
    draw_scaled_text(
        &mut canvas,
        title,
        ((w as i64 - title_w) / 2, h as i64 / 3 - 30),
        title_scale,
        title_color,
    );
    paint(&mut canvas, |t| {
        let region = Rectangle::new(
            Point::new(40, h as i32 / 3 + 50),
            Size::new(w.saturating_sub(80), h / 2),
        );
        draw_text_region(t, detail, region, &FONT_10X20, Rgb888::BLACK)
    });
    canvas
}

pub fn error_screen(size: (u32, u32), message: &str) -> Canvas {
    message_screen(size, "ERROR", message, RED)
}

pub fn placeholder_screen(size: (u32, u32), title: &str, detail: &str) -> Canvas {
    message_screen(size, title, detail, BLACK)
}

/// Alpha blend a custom icon file into a `size` square.
fn paste_icon_file(canvas: &mut Canvas, path: &std::path::Path, top_left: (i64, i64), size: u32) -> bool {
    let icon = match image::open(path) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            warn!("Icon {} unreadable: {}", path.display(), e);
            return false;
        }
    };
    let (iw, ih) = icon.dimensions();
    if iw == 0 || ih == 0 {
        return false;
    }
    let s = (size as f64 / iw as f64).min(size as f64 / ih as f64);
    let (nw, nh) = (((iw as f64 * s).round() as u32).max(1), ((ih as f64 * s).round() as u32).max(1));
    let icon = imageops::resize(&icon, nw, nh, FilterType::Triangle);
    let ox = top_left.0 + size.saturating_sub(nw) as i64 / 2;
    let oy = top_left.1 + size.saturating_sub(nh) as i64 / 2;
    for (x, y, p) in icon.enumerate_pixels() {
        let (cx, cy) = (ox + x as i64, oy + y as i64);
        if cx < 0 || cy < 0 || cx as u32 >= canvas.width() || cy as u32 >= canvas.height() {
            continue;
        }
        let a = p.0[3] as u32;
        let dst = canvas.get_pixel_mut(cx as u32, cy as u32);
        for c in 0..3 {
            dst.0[c] = ((p.0[c] as u32 * a + dst.0[c] as u32 * (255 - a)) / 255) as u8;
        }
    }
    true
}

/// Bitmap for custom icons, a framed label for glyph based ones.
fn draw_icon(canvas: &mut Canvas, handle: &IconHandle, category: WeatherCategory, top_left: (i64, i64), size: u32) {
    if let IconHandle::Custom { path } = handle {
        if paste_icon_file(canvas, path, top_left, size) {
            return;
        }
    }
    let label = category.short_label();
    paint(canvas, |t| {
        let frame = Rectangle::new(Point::new(top_left.0 as i32, top_left.1 as i32), Size::new(size, size));
        frame
            .into_styled(PrimitiveStyleBuilder::new().stroke_color(Rgb888::BLACK).stroke_width(2).build())
            .draw(t)?;
        let font = if size >= 96 { &FONT_10X20 } else { &FONT_6X13 };
        let y = top_left.1 as i32 + (size as i32 - font.character_size.height as i32) / 2;
        draw_text_centered(t, label, top_left.0 as i32 + size as i32 / 2, y, font, Rgb888::BLACK)
    });
}

fn fmt_temp(t: f64) -> String {
    format!("{:.0}°", t)
}

/// Dashboard drawn without the browser: header, current conditions, 5 days, 12 hours.
pub fn weather_dashboard(size: (u32, u32), snapshot: &WeatherSnapshot, stale: bool, icons: &IconResolver) -> Canvas {
    let (w, h) = size;
    let mut canvas = RgbImage::from_pixel(w, h, Rgb(WHITE));
    let units = snapshot.units;
    let cur = &snapshot.current;
    let updated = snapshot.fetched_at.with_timezone(&chrono::Local).format("%H:%M").to_string();

    // header
    paint(&mut canvas, |t| {
        draw_text(t, &snapshot.location, Point::new(16, 12), &FONT_10X20, Rgb888::BLACK)?;
        let stamp = format!("Updated {updated}");
        if stale {
            draw_text_right(t, &stamp, w as i32 - 16, 6, &FONT_9X15, Rgb888::BLACK)?;
            draw_text_right(t, "STALE DATA", w as i32 - 16, 24, &FONT_9X15, to_rgb888(RED))?;
        } else {
            draw_text_right(t, &stamp, w as i32 - 16, 14, &FONT_9X15, Rgb888::BLACK)?;
        }
        draw_hline(t, 46, 8, w as i32 - 8, Rgb888::BLACK, 2)
    });

    // current conditions
    let category = WeatherCategory::from_code(cur.condition_code);
    draw_icon(&mut canvas, &icons.resolve_preferred(cur.condition_code), category, (24, 60), 128);
    let temp = format!("{:.0}{}", cur.temperature, units.temperature_suffix());
    draw_scaled_text(&mut canvas, &temp, (176, 58), 4, BLACK);
    paint(&mut canvas, |t| {
        draw_text(t, condition_description(cur.condition_code), Point::new(180, 146), &FONT_9X18_BOLD, Rgb888::BLACK)?;
        let mut details = Vec::new();
        if let Some(f) = cur.feels_like {
            details.push(format!("Feels like {:.0}{}", f, units.temperature_suffix()));
        }
        details.push(format!("Wind {:.0} {}", cur.wind_speed, units.wind_suffix()));
        details.push(format!("Humidity {:.0}%", cur.humidity));
        if let Some(p) = cur.pressure {
            details.push(format!("Pressure {:.0} hPa", p));
        }
        if let Some(uv) = cur.uv_index {
            details.push(format!("UV index {:.1}", uv));
        }
        for (i, line) in details.iter().enumerate() {
            draw_text(t, line, Point::new(w as i32 - 260, 62 + i as i32 * 24), &FONT_9X15, Rgb888::BLACK)?;
        }
        draw_hline(t, 196, 8, w as i32 - 8, Rgb888::BLACK, 1)
    });

    // five day strip
    let days = snapshot.daily.len().max(1) as i32;
    let col_w = w as i32 / days;
    for (i, day) in snapshot.daily.iter().enumerate() {
        let cx = col_w * i as i32 + col_w / 2;
        paint(&mut canvas, |t| {
            draw_text_centered(t, &day.date.format("%a").to_string(), cx, 206, &FONT_10X20, Rgb888::BLACK)
        });
        let cat = WeatherCategory::from_code(day.condition_code);
        draw_icon(&mut canvas, &icons.resolve_preferred(day.condition_code), cat, (cx as i64 - 28, 232), 56);
        paint(&mut canvas, |t| {
            let hl = format!("{} / {}", fmt_temp(day.high), fmt_temp(day.low));
            draw_text_centered(t, &hl, cx, 296, &FONT_9X15, Rgb888::BLACK)
        });
    }
    paint(&mut canvas, |t| draw_hline(t, 322, 8, w as i32 - 8, Rgb888::BLACK, 1));

    // twelve hour strip
    let slots = snapshot.hourly.len().max(1) as i32;
    let cell_w = w as i32 / slots;
    paint(&mut canvas, |t| {
        for (i, hour) in snapshot.hourly.iter().enumerate() {
            let cx = cell_w * i as i32 + cell_w / 2;
            draw_text_centered(t, &hour.time.format("%H:%M").to_string(), cx, 334, &FONT_6X13, Rgb888::BLACK)?;
            let label = WeatherCategory::from_code(hour.condition_code).short_label();
            draw_text_centered(t, label, cx, 356, &FONT_6X13, to_rgb888(BLUE))?;
            draw_text_centered(t, &fmt_temp(hour.temperature), cx, 378, &FONT_9X15, Rgb888::BLACK)?;
        }
        Ok(())
    });

    if snapshot.hourly.is_empty() && snapshot.daily.is_empty() {
        paint(&mut canvas, |t| {
            draw_text_centered(t, "No forecast data", w as i32 / 2, h as i32 - 60, &FONT_10X20, Rgb888::BLACK)
        });
    }
    canvas
}
