/*
 *  modes/mod.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display modes: the closed set the controller switches between
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

pub mod photo;
pub mod rss;
pub mod weather;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;

use crate::cache::DataCache;
use crate::config::{Config, FeedSettings};
use crate::display::compositor::CompositeError;
use crate::display::html::RenderError;
use crate::display::Canvas;
use crate::http::HttpClient;
use crate::images::ImageStore;
use crate::weather::{WeatherPipeline, WeatherState};

use photo::PhotoCycle;
use rss::{FeedGallery, FeedKind};
use weather::WeatherBoard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    PhotoCycle,
    TumblrRss,
    #[serde(rename = "deviantart_rss")]
    DeviantArtRss,
    Weather,
    WeatherHtml,
}

impl ModeKind {
    pub const ALL: [ModeKind; 5] = [
        ModeKind::PhotoCycle,
        ModeKind::TumblrRss,
        ModeKind::DeviantArtRss,
        ModeKind::Weather,
        ModeKind::WeatherHtml,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModeKind::PhotoCycle => "photo_cycle",
            ModeKind::TumblrRss => "tumblr_rss",
            ModeKind::DeviantArtRss => "deviantart_rss",
            ModeKind::Weather => "weather",
            ModeKind::WeatherHtml => "weather_html",
        }
    }

    /// 1-based, also the LED blink count.
    pub fn index(&self) -> u8 {
        match self {
            ModeKind::PhotoCycle => 1,
            ModeKind::TumblrRss => 2,
            ModeKind::DeviantArtRss => 3,
            ModeKind::Weather => 4,
            ModeKind::WeatherHtml => 5,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

#[derive(Debug, Error)]
pub enum ModeError {
    #[error("nothing to show: {0}")]
    NoContent(String),
    #[error("data unavailable: {0}")]
    DataUnavailable(String),
    #[error(transparent)]
    Composite(#[from] CompositeError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Shared services handed to every mode. Owned by the controller.
pub struct ModeContext {
    pub size: (u32, u32),
    pub http: HttpClient,
    pub cache: Arc<DataCache>,
    pub images: ImageStore,
    pub weather: Arc<WeatherPipeline>,
    pub weather_updates: watch::Receiver<WeatherState>,
}

/// One display behaviour with its own config and runtime state.
pub enum Mode {
    Photos(PhotoCycle),
    Feed(FeedGallery),
    Weather(WeatherBoard),
}

impl Mode {
    pub fn build(kind: ModeKind, config: &Config) -> Self {
        match kind {
            ModeKind::PhotoCycle => Mode::Photos(PhotoCycle::new(config.photo_cycle.clone())),
            ModeKind::TumblrRss => {
                Mode::Feed(FeedGallery::new(FeedKind::Tumblr, FeedSettings::from(&config.tumblr_rss)))
            }
            ModeKind::DeviantArtRss => {
                Mode::Feed(FeedGallery::new(FeedKind::DeviantArt, FeedSettings::from(&config.deviantart_rss)))
            }
            ModeKind::Weather => Mode::Weather(WeatherBoard::direct(&config.weather, &config.weather_html)),
            ModeKind::WeatherHtml => Mode::Weather(WeatherBoard::html(
                &config.weather_html,
                config.runtime.cache_dir.join("html"),
            )),
        }
    }

    pub fn kind(&self) -> ModeKind {
        match self {
            Mode::Photos(_) => ModeKind::PhotoCycle,
            Mode::Feed(f) => match f.kind() {
                FeedKind::Tumblr => ModeKind::TumblrRss,
                FeedKind::DeviantArt => ModeKind::DeviantArtRss,
            },
            Mode::Weather(w) if w.is_html() => ModeKind::WeatherHtml,
            Mode::Weather(_) => ModeKind::Weather,
        }
    }

    /// Prepare the mode and produce its first canvas.
    pub async fn on_enter(&mut self, ctx: &ModeContext, now: Instant) -> Result<Canvas, ModeError> {
        match self {
            Mode::Photos(p) => p.on_enter(ctx.size, now),
            Mode::Feed(f) => f.on_enter(ctx, now).await,
            Mode::Weather(w) => Ok(w.on_enter(ctx, now).await),
        }
    }

    /// A new canvas when the mode has something new to show.
    pub async fn on_tick(&mut self, ctx: &ModeContext, now: Instant) -> Option<Canvas> {
        match self {
            Mode::Photos(p) => p.on_tick(ctx.size, now),
            Mode::Feed(f) => f.on_tick(ctx, now).await,
            Mode::Weather(w) => w.on_tick(ctx, now).await,
        }
    }

    pub fn on_exit(&mut self) {
        match self {
            Mode::Photos(p) => p.on_exit(),
            Mode::Feed(f) => f.on_exit(),
            Mode::Weather(w) => w.on_exit(),
        }
    }

    /// Cursor worth keeping across switches, if this mode is configured to keep it.
    pub fn saved_cursor(&self) -> Option<usize> {
        match self {
            Mode::Photos(p) if p.persists_cursor() => Some(p.cursor()),
            Mode::Feed(f) if f.persists_cursor() => Some(f.cursor()),
            _ => None,
        }
    }

    pub fn restore_cursor(&mut self, cursor: usize) {
        match self {
            Mode::Photos(p) => p.set_cursor(cursor),
            Mode::Feed(f) => f.set_cursor(cursor),
            Mode::Weather(_) => {}
        }
    }
}
