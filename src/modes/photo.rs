/*
 *  modes/photo.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Photo slideshow from a local folder
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
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::ModeError;
use crate::config::PhotoCycleConfig;
use crate::display::compositor;
use crate::display::draw::placeholder_screen;
use crate::display::Canvas;

/// Files directly in `folder` whose extension is one of `formats`, sorted or shuffled.
pub fn scan_folder(folder: &Path, formats: &[String], random: bool) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Photo folder {} unreadable: {}", folder.display(), e);
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| formats.iter().any(|f| f.eq_ignore_ascii_case(ext)))
        })
        .collect();
    files.sort();
    if random {
        files.shuffle(&mut rand::rng());
    }
    files
}

pub struct PhotoCycle {
    config: PhotoCycleConfig,
    files: Vec<PathBuf>,
    cursor: usize,
    shown_at: Option<Instant>,
}

impl PhotoCycle {
    pub fn new(config: PhotoCycleConfig) -> Self {
        Self { config, files: Vec::new(), cursor: 0, shown_at: None }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    pub fn persists_cursor(&self) -> bool {
        self.config.persist_cursor
    }

    fn display_time(&self) -> Duration {
        Duration::from_secs(self.config.display_time)
    }

    fn rescan(&mut self) {
        self.files = scan_folder(&self.config.folder, &self.config.supported_formats, self.config.random_order);
        info!("Found {} photos in {}", self.files.len(), self.config.folder.display());
    }

    pub fn on_enter(&mut self, size: (u32, u32), now: Instant) -> Result<Canvas, ModeError> {
        self.rescan();
        if self.files.is_empty() {
            return Err(ModeError::NoContent(format!("no photos in {}", self.config.folder.display())));
        }
        if self.cursor >= self.files.len() {
            self.cursor = 0;
        }
        Ok(self.render(size, now))
    }

    pub fn on_tick(&mut self, size: (u32, u32), now: Instant) -> Option<Canvas> {
        let due = self.shown_at.is_none_or(|t| now.saturating_duration_since(t) >= self.display_time());
        if !due {
            return None;
        }
        self.cursor += 1;
        if self.cursor >= self.files.len() {
            self.cursor = 0;
            self.rescan();
        }
        Some(self.render(size, now))
    }

    pub fn on_exit(&mut self) {
        self.files.clear();
        self.shown_at = None;
    }

    /// Shows the photo at the cursor, skipping unreadable files.
    fn render(&mut self, size: (u32, u32), now: Instant) -> Canvas {
        self.shown_at = Some(now);
        let opts = self.config.fit_options();
        for _ in 0..self.files.len() {
            let path = &self.files[self.cursor];
            match compositor::load_image(path).and_then(|img| compositor::fit(&img, size, &opts)) {
                Ok(canvas) => {
                    info!("Photo {}/{}: {}", self.cursor + 1, self.files.len(), path.display());
                    return canvas;
                }
                Err(e) => {
                    warn!("Skipping photo {}: {}", path.display(), e);
                    self.cursor = (self.cursor + 1) % self.files.len();
                }
            }
        }
        placeholder_screen(size, "No Readable Photos", &format!("Add images to {}", self.config.folder.display()))
    }
}
