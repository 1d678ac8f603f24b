/*
 *  display/html.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Weather page rendered as HTML and captured by a headless browser
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

use log::{debug, info};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

use super::compositor::{self, CompositeError, FitOptions};
use super::Canvas;
use crate::icons::{IconHandle, IconResolver};
use crate::weather::{condition_description, WeatherSnapshot};

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
{{head}}
<style>
{{styles}}
</style>
</head>
<body style="width: {{width}}px; height: {{height}}px;">
{{body}}
</body>
</html>
"#;

const DEFAULT_CSS: &str = r#"
* { margin: 0; padding: 0; box-sizing: border-box; }
body { font-family: "DejaVu Sans", Arial, sans-serif; background: #fff; color: #000; overflow: hidden; }
header { display: flex; justify-content: space-between; align-items: baseline; padding: 10px 16px; border-bottom: 2px solid #000; }
header h1 { font-size: 26px; }
header .stamp { font-size: 15px; }
header .stale { color: #f00; font-weight: bold; margin-left: 8px; }
.current { display: flex; align-items: center; padding: 10px 16px; height: 160px; border-bottom: 1px solid #000; }
.current .icon { width: 128px; height: 128px; font-size: 96px; line-height: 128px; text-align: center; }
.current .temp { font-size: 84px; font-weight: bold; margin: 0 24px; }
.current .desc { font-size: 22px; }
.current ul { list-style: none; margin-left: auto; font-size: 16px; line-height: 24px; }
.daily { display: flex; height: 130px; border-bottom: 1px solid #000; }
.daily .day { flex: 1; text-align: center; padding-top: 8px; }
.daily .icon { width: 56px; height: 56px; font-size: 42px; line-height: 56px; margin: 4px auto; }
.hourly { display: flex; padding-top: 8px; }
.hourly .hour { flex: 1; text-align: center; font-size: 14px; line-height: 22px; }
.hourly .icon { width: 28px; height: 28px; font-size: 22px; line-height: 28px; margin: 0 auto; }
img.icon { object-fit: contain; }
.fa-solid { color: #00f; }
"#;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("browser '{0}' could not be started: {1}")]
    BrowserUnavailable(String, std::io::Error),
    #[error("browser screenshot timed out after {0:?}")]
    Timeout(Duration),
    #[error("browser exited unsuccessfully: {0}")]
    Process(String),
    #[error("screenshot unreadable: {0}")]
    Image(#[from] CompositeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn file_url(path: &Path) -> String {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", escape_html(&abs.to_string_lossy()))
}

fn icon_html(handle: &IconHandle) -> String {
    match handle {
        IconHandle::Custom { path } => format!(r#"<img class="icon" src="{}" alt="">"#, file_url(path)),
        IconHandle::Fontawesome { class } => format!(r#"<i class="icon fa-solid {class}"></i>"#),
        IconHandle::Emoji { glyph } => format!(r#"<div class="icon emoji">{glyph}</div>"#),
    }
}

/// Loads `weather.html`/`weather.css` from the template folder, falling back to built-ins.
pub struct WeatherPage {
    template: String,
    css: String,
}

impl WeatherPage {
    pub fn load(template_dir: &Path) -> Self {
        let template = std::fs::read_to_string(template_dir.join("weather.html"))
            .unwrap_or_else(|_| DEFAULT_TEMPLATE.to_string());
        let css = std::fs::read_to_string(template_dir.join("weather.css"))
            .unwrap_or_else(|_| DEFAULT_CSS.to_string());
        Self { template, css }
    }

    pub fn render(&self, snapshot: &WeatherSnapshot, stale: bool, icons: &IconResolver, size: (u32, u32)) -> String {
        let mut uses_fontawesome = false;
        let mut icon = |code: u16| {
            let handle = icons.resolve_preferred(code);
            uses_fontawesome |= matches!(handle, IconHandle::Fontawesome { .. });
            icon_html(&handle)
        };
        let units = snapshot.units;
        let cur = &snapshot.current;

        let mut body = String::new();
        let updated = snapshot.fetched_at.with_timezone(&chrono::Local).format("%H:%M");
        let _ = write!(
            body,
            r#"<header><h1>{}</h1><div class="stamp">Updated {}{}</div></header>"#,
            escape_html(&snapshot.location),
            updated,
            if stale { r#"<span class="stale">STALE</span>"# } else { "" },
        );

        let _ = write!(
            body,
            r#"<section class="current">{}<div class="temp">{:.0}{}</div><div class="desc">{}</div><ul>"#,
            icon(cur.condition_code),
            cur.temperature,
            units.temperature_suffix(),
            escape_html(condition_description(cur.condition_code)),
        );
        if let Some(f) = cur.feels_like {
            let _ = write!(body, "<li>Feels like {:.0}{}</li>", f, units.temperature_suffix());
        }
        let _ = write!(body, "<li>Wind {:.0} {}</li>", cur.wind_speed, units.wind_suffix());
        let _ = write!(body, "<li>Humidity {:.0}%</li>", cur.humidity);
        if let Some(p) = cur.pressure {
            let _ = write!(body, "<li>Pressure {:.0} hPa</li>", p);
        }
        if let Some(uv) = cur.uv_index {
            let _ = write!(body, "<li>UV index {:.1}</li>", uv);
        }
        body.push_str("</ul></section>");

        body.push_str(r#"<section class="daily">"#);
        for day in &snapshot.daily {
            let _ = write!(
                body,
                r#"<div class="day"><div>{}</div>{}<div>{:.0}° / {:.0}°</div></div>"#,
                day.date.format("%a"),
                icon(day.condition_code),
                day.high,
                day.low,
            );
        }
        body.push_str("</section>");

        body.push_str(r#"<section class="hourly">"#);
        for hour in &snapshot.hourly {
            let _ = write!(
                body,
                r#"<div class="hour"><div>{}</div>{}<div>{:.0}°</div></div>"#,
                hour.time.format("%H:%M"),
                icon(hour.condition_code),
                hour.temperature,
            );
        }
        body.push_str("</section>");

        let head = match icons.fontawesome_css() {
            Some(css) if uses_fontawesome => format!(r#"<link rel="stylesheet" href="{}">"#, file_url(css)),
            _ => String::new(),
        };
        self.template
            .replace("{{head}}", &head)
            .replace("{{styles}}", &self.css)
            .replace("{{width}}", &size.0.to_string())
            .replace("{{height}}", &size.1.to_string())
            .replace("{{body}}", &body)
    }
}

/// Headless browser screenshots of a local HTML file.
#[derive(Debug, Clone)]
pub struct ScreenshotService {
    browser: String,
    timeout: Duration,
    work_dir: PathBuf,
}

impl ScreenshotService {
    pub fn new(browser: &str, timeout: Duration, work_dir: PathBuf) -> Self {
        Self { browser: browser.to_string(), timeout, work_dir }
    }

    pub async fn capture(&self, html: &str, size: (u32, u32)) -> Result<Canvas, RenderError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let html_path = std::path::absolute(self.work_dir.join("weather.html"))?;
        let png_path = std::path::absolute(self.work_dir.join("weather.png"))?;
        let _ = tokio::fs::remove_file(&png_path).await;
        tokio::fs::write(&html_path, html).await?;

        let mut child = Command::new(&self.browser)
            .args(["--headless", "--disable-gpu", "--no-sandbox", "--hide-scrollbars", "--force-device-scale-factor=1"])
            .arg(format!("--window-size={},{}", size.0, size.1))
            .arg(format!("--screenshot={}", png_path.display()))
            .arg(format!("file://{}", html_path.display()))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RenderError::BrowserUnavailable(self.browser.clone(), e))?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => return Err(RenderError::Timeout(self.timeout)),
        };
        if !status.success() {
            return Err(RenderError::Process(status.to_string()));
        }

        let shot = compositor::load_image(&png_path)?;
        debug!("screenshot {}x{}", shot.width(), shot.height());
        if shot.dimensions() == size {
            info!("HTML weather rendered via {}", self.browser);
            return Ok(shot);
        }
        let opts = FitOptions { fill_screen: true, auto_rotate: false, ..FitOptions::default() };
        Ok(compositor::fit(&shot, size, &opts)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icons::IconSource;
    use crate::weather::tests_support::sample_snapshot;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn test_render_uses_builtin_template() {
        let dir = std::env::temp_dir().join(format!("myimpression-fa-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let css = dir.join("all.min.css");
        std::fs::write(&css, ".fa-solid{}").unwrap();

        let page = WeatherPage::load(Path::new("/nonexistent/templates"));
        let icons = IconResolver::new(PathBuf::from("/nonexistent/icons"), IconSource::Fontawesome)
            .with_fontawesome_css(css.clone());
        let html = page.render(&sample_snapshot(), true, &icons, (800, 480));
        assert!(html.contains("width: 800px"));
        assert!(html.contains("STALE"));
        assert!(html.contains("fa-solid"));
        assert!(html.contains(&format!("href=\"file://{}\"", css.display())));
        assert!(!html.contains("https://"));
        assert!(!html.contains("{{body}}"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_emoji_page_skips_fontawesome() {
        let page = WeatherPage::load(Path::new("/nonexistent/templates"));
        let icons = IconResolver::new(PathBuf::from("/nonexistent/icons"), IconSource::Emoji);
        let html = page.render(&sample_snapshot(), false, &icons, (800, 480));
        assert!(!html.contains("stylesheet"));
        assert!(!html.contains("STALE"));
    }

    #[test]
    fn test_missing_fontawesome_css_renders_emoji() {
        let page = WeatherPage::load(Path::new("/nonexistent/templates"));
        let icons = IconResolver::new(PathBuf::from("/nonexistent/icons"), IconSource::Fontawesome)
            .with_fontawesome_css(PathBuf::from("/nonexistent/fontawesome/all.min.css"));
        let html = page.render(&sample_snapshot(), false, &icons, (800, 480));
        assert!(!html.contains("fa-solid"));
        assert!(!html.contains("stylesheet"));
        assert!(html.contains("icon emoji"));
    }

    #[tokio::test]
    async fn test_missing_browser_is_render_error() {
        let dir = std::env::temp_dir().join(format!("myimpression-html-{}", std::process::id()));
        let svc = ScreenshotService::new("/nonexistent/chromium", Duration::from_secs(2), dir.clone());
        let res = svc.capture("<html></html>", (800, 480)).await;
        assert!(matches!(res, Err(RenderError::BrowserUnavailable(..))));
        let _ = std::fs::remove_dir_all(dir);
    }
}
