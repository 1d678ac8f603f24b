/*
 *  modes/weather.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Weather dashboard modes, drawn directly or through the browser
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

use log::{info, warn};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use super::ModeContext;
use crate::config::{WeatherConfig, WeatherHtmlConfig};
use crate::display::compositor::adjust_saturation;
use crate::display::draw::{placeholder_screen, weather_dashboard};
use crate::display::html::{ScreenshotService, WeatherPage};
use crate::display::Canvas;
use crate::icons::IconResolver;
use crate::weather::{WeatherSnapshot, WeatherState};

/// How a dashboard becomes pixels.
pub enum Renderer {
    Direct,
    Html {
        template_dir: PathBuf,
        screenshots: ScreenshotService,
        saturation: f32,
    },
}

pub struct WeatherBoard {
    renderer: Renderer,
    icons: IconResolver,
    display_time: Duration,
    updates: Option<watch::Receiver<WeatherState>>,
    state: Option<WeatherState>,
    shown_at: Option<Instant>,
}

impl WeatherBoard {
    fn with_renderer(renderer: Renderer, html: &WeatherHtmlConfig, display_time: u64) -> Self {
        Self {
            renderer,
            icons: IconResolver::new(html.custom_icon_path.clone(), html.icon_source)
                .with_fontawesome_css(html.fontawesome_css.clone()),
            display_time: Duration::from_secs(display_time),
            updates: None,
            state: None,
            shown_at: None,
        }
    }

    pub fn direct(weather: &WeatherConfig, html: &WeatherHtmlConfig) -> Self {
        Self::with_renderer(Renderer::Direct, html, weather.display_time)
    }

    pub fn html(html: &WeatherHtmlConfig, work_dir: PathBuf) -> Self {
        let renderer = Renderer::Html {
            template_dir: html.template_dir.clone(),
            screenshots: ScreenshotService::new(&html.browser, Duration::from_secs(html.render_timeout_secs), work_dir),
            saturation: html.saturation,
        };
        Self::with_renderer(renderer, html, html.display_time)
    }

    pub fn is_html(&self) -> bool {
        matches!(self.renderer, Renderer::Html { .. })
    }

    /// Always produces a canvas; unavailable data becomes a placeholder.
    pub async fn on_enter(&mut self, ctx: &ModeContext, now: Instant) -> Canvas {
        let mut updates = ctx.weather_updates.clone();
        updates.mark_unchanged();
        self.updates = Some(updates);
        self.state = Some(ctx.weather.get_snapshot().await);
        self.render(ctx, now).await
    }

    /// Re-renders when the refresh task publishes or `display_time` has passed.
    pub async fn on_tick(&mut self, ctx: &ModeContext, now: Instant) -> Option<Canvas> {
        let changed = match self.updates.as_mut() {
            Some(rx) if rx.has_changed().unwrap_or(false) => {
                self.state = Some(rx.borrow_and_update().clone());
                true
            }
            _ => false,
        };
        let due = self.shown_at.is_none_or(|t| now.saturating_duration_since(t) >= self.display_time);
        if !changed && !due {
            return None;
        }
        Some(self.render(ctx, now).await)
    }

    pub fn on_exit(&mut self) {
        self.updates = None;
        self.state = None;
        self.shown_at = None;
    }

    async fn render(&mut self, ctx: &ModeContext, now: Instant) -> Canvas {
        self.shown_at = Some(now);
        let (snapshot, stale) = match self.state.as_ref() {
            Some(WeatherState::Fresh(s)) => (s.clone(), false),
            Some(WeatherState::Stale(s)) => (s.clone(), true),
            Some(WeatherState::Unavailable(why)) => {
                return placeholder_screen(ctx.size, "Weather Unavailable", why);
            }
            None => return placeholder_screen(ctx.size, "Weather", "Waiting for data"),
        };
        match &self.renderer {
            Renderer::Direct => weather_dashboard(ctx.size, &snapshot, stale, &self.icons),
            Renderer::Html { template_dir, screenshots, saturation } => {
                match render_html(template_dir, screenshots, &snapshot, stale, &self.icons, ctx.size).await {
                    Ok(mut canvas) => {
                        adjust_saturation(&mut canvas, *saturation);
                        canvas
                    }
                    Err(e) => {
                        warn!("HTML weather render failed, drawing directly: {}", e);
                        weather_dashboard(ctx.size, &snapshot, stale, &self.icons)
                    }
                }
            }
        }
    }
}

async fn render_html(
    template_dir: &std::path::Path,
    screenshots: &ScreenshotService,
    snapshot: &WeatherSnapshot,
    stale: bool,
    icons: &IconResolver,
    size: (u32, u32),
) -> Result<Canvas, crate::display::html::RenderError> {
    let page = WeatherPage::load(template_dir);
    let html = page.render(snapshot, stale, icons, size);
    let canvas = screenshots.capture(&html, size).await?;
    info!("Weather page captured ({} bytes of HTML)", html.len());
    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DataCache;
    use crate::config::Config;
    use crate::http::HttpClient;
    use crate::images::ImageStore;
    use crate::weather::tests_support::sample_snapshot;
    use crate::weather::WeatherPipeline;
    use std::sync::Arc;

    fn offline_context(name: &str) -> (ModeContext, watch::Sender<WeatherState>, PathBuf) {
        let dir = std::env::temp_dir().join(format!("myimpression-wmode-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let config = Config::default();
        let http = HttpClient::new(Duration::from_secs(2), 1).unwrap();
        let cache = Arc::new(DataCache::new(&dir).unwrap());
        let images = ImageStore::new(dir.join("images"), http.clone()).unwrap();
        let weather = Arc::new(
            WeatherPipeline::new(config.weather.clone(), http.clone(), cache.clone())
                .with_base_url("http://127.0.0.1:9/v1/forecast", "http://127.0.0.1:9/reverse"),
        );
        let (tx, weather_updates) = watch::channel(WeatherState::Unavailable("not polled".to_string()));
        (ModeContext { size: (800, 480), http, cache, images, weather, weather_updates }, tx, dir)
    }

    #[tokio::test]
    async fn test_unavailable_then_published_snapshot() {
        let (ctx, tx, dir) = offline_context("publish");
        let config = Config::default();
        let mut board = WeatherBoard::direct(&config.weather, &config.weather_html);
        assert!(!board.is_html());

        let t0 = Instant::now();
        let placeholder = board.on_enter(&ctx, t0).await;
        assert_eq!(placeholder.dimensions(), (800, 480));
        assert!(board.on_tick(&ctx, t0 + Duration::from_secs(1)).await.is_none());

        tx.send(WeatherState::Fresh(Arc::new(sample_snapshot()))).unwrap();
        let dashboard = board.on_tick(&ctx, t0 + Duration::from_secs(2)).await.unwrap();
        assert_ne!(dashboard, placeholder);
        assert!(board.on_tick(&ctx, t0 + Duration::from_secs(3)).await.is_none());

        board.on_exit();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_html_failure_falls_back_to_direct() {
        let (ctx, _tx, dir) = offline_context("html");
        let mut config = Config::default();
        config.weather_html.browser = "/nonexistent/browser".to_string();
        config.weather_html.template_dir = dir.join("templates");
        let mut board = WeatherBoard::html(&config.weather_html, dir.join("html"));
        assert!(board.is_html());
        board.state = Some(WeatherState::Stale(Arc::new(sample_snapshot())));

        let canvas = board.render(&ctx, Instant::now()).await;
        let direct = weather_dashboard(ctx.size, &sample_snapshot(), true, &board.icons);
        assert_eq!(canvas, direct);
        let _ = std::fs::remove_dir_all(dir);
    }
}
