/*
 *  controller.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Mode controller - switches display modes on button presses and
 *  drives the active mode from the control loop
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

use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::buttons::{ButtonEvent, ButtonId, Debouncer, LedSignal};
use crate::config::Config;
use crate::display::draw::error_screen;
use crate::display::sink::RenderSink;
use crate::display::Canvas;
use crate::modes::{Mode, ModeContext, ModeKind};

/// Owns the active mode. Nothing else mutates it.
pub struct ModeController {
    config: Config,
    buttons: BTreeMap<ButtonId, ModeKind>,
    debouncer: Debouncer,
    tick: Duration,
    ctx: ModeContext,
    sink: Box<dyn RenderSink>,
    led: Option<mpsc::UnboundedSender<LedSignal>>,
    active: Option<Mode>,
    cursors: HashMap<ModeKind, usize>,
}

impl ModeController {
    pub fn new(config: Config, ctx: ModeContext, sink: Box<dyn RenderSink>) -> Self {
        Self {
            buttons: config.buttons.clone(),
            debouncer: Debouncer::new(config.runtime.debounce()),
            tick: config.runtime.tick(),
            config,
            ctx,
            sink,
            led: None,
            active: None,
            cursors: HashMap::new(),
        }
    }

    /// Feedback blinks go to this LED task.
    pub fn with_led(mut self, led: mpsc::UnboundedSender<LedSignal>) -> Self {
        self.led = Some(led);
        self
    }

    pub fn current_mode(&self) -> Option<ModeKind> {
        self.active.as_ref().map(|m| m.kind())
    }

    pub fn context(&self) -> &ModeContext {
        &self.ctx
    }

    /// Enter the configured start mode.
    pub async fn start(&mut self) -> bool {
        let mode = self.config.runtime.start_mode;
        info!("Starting in {:?}", mode);
        self.switch_to(mode, Instant::now()).await
    }

    /// Returns true when the press changed the mode.
    pub async fn handle_button(&mut self, event: ButtonEvent) -> bool {
        if !self.debouncer.accept(&event) {
            return false;
        }
        self.signal(LedSignal::Press);
        let Some(target) = self.buttons.get(&event.button).copied() else {
            warn!("Button {:?} is not mapped to a mode", event.button);
            return false;
        };
        if self.current_mode() == Some(target) {
            debug!("{:?} already active", target);
            return false;
        }
        self.switch_to(target, Instant::now()).await
    }

    /// Exit the current mode and enter `target`. On failure the previous mode is
    /// re-entered, or the error canvas shown when there is none.
    pub async fn switch_to(&mut self, target: ModeKind, now: Instant) -> bool {
        let mut previous = self.active.take();
        let from = previous.as_ref().map(|m| m.kind());
        if let Some(prev) = previous.as_mut() {
            if let Some(cursor) = prev.saved_cursor() {
                self.cursors.insert(prev.kind(), cursor);
            }
            prev.on_exit();
        }

        let mut next = Mode::build(target, &self.config);
        if let Some(cursor) = self.cursors.get(&target) {
            next.restore_cursor(*cursor);
        }

        match next.on_enter(&self.ctx, now).await {
            Ok(canvas) => {
                info!("Display mode changed: {:?} -> {:?}", from, target);
                self.active = Some(next);
                self.signal(LedSignal::Mode(target.index()));
                self.show(&canvas);
                true
            }
            Err(e) => {
                error!("Failed to enter {:?}: {}", target, e);
                let failure = format!("{} failed: {}", target.name(), e);
                match previous {
                    Some(mut prev) => match prev.on_enter(&self.ctx, now).await {
                        Ok(canvas) => {
                            warn!("Reverted to {:?}", prev.kind());
                            self.active = Some(prev);
                            self.show(&canvas);
                        }
                        Err(e) => {
                            error!("Previous mode {:?} failed too: {}", prev.kind(), e);
                            self.show_error(&failure);
                        }
                    },
                    None => self.show_error(&failure),
                }
                false
            }
        }
    }

    /// Let the active mode render if it has something new.
    pub async fn tick(&mut self, now: Instant) {
        let canvas = match self.active.as_mut() {
            Some(mode) => mode.on_tick(&self.ctx, now).await,
            None => None,
        };
        if let Some(canvas) = canvas {
            self.show(&canvas);
        }
    }

    /// Control loop: drain presses, tick the mode, repeat every `tick_ms` until stopped.
    pub async fn run(&mut self, mut events: mpsc::UnboundedReceiver<ButtonEvent>, mut stop: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.recv() => {
                    info!("Control loop received stop signal. Exiting.");
                    break;
                }
            }
            while let Ok(event) = events.try_recv() {
                self.handle_button(event).await;
            }
            self.tick(Instant::now()).await;
        }
        self.shutdown();
    }

    pub fn shutdown(&mut self) {
        if let Some(mut mode) = self.active.take() {
            info!("Leaving {:?}", mode.kind());
            mode.on_exit();
        }
    }

    fn signal(&self, signal: LedSignal) {
        if let Some(led) = self.led.as_ref() {
            let _ = led.send(signal);
        }
    }

    fn show(&mut self, canvas: &Canvas) {
        if let Err(e) = self.sink.show(canvas) {
            error!("Render sink {} failed: {}", self.sink.name(), e);
        }
    }

    fn show_error(&mut self, message: &str) {
        let canvas = error_screen(self.ctx.size, message);
        self.show(&canvas);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DataCache;
    use crate::display::color::RED;
    use crate::display::sink::RecordingSink;
    use crate::http::HttpClient;
    use crate::images::ImageStore;
    use crate::weather::{WeatherPipeline, WeatherState};
    use image::{ImageFormat, Rgb, RgbImage};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::sync::watch;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("myimpression-ctl-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("photos")).unwrap();
        dir
    }

    fn offline_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.runtime.cache_dir = dir.join("cache");
        config.runtime.debounce_ms = 300;
        config.photo_cycle.folder = dir.join("photos");
        config.tumblr_rss.rss_url = "http://127.0.0.1:9/rss".to_string();
        config.weather.location_name = Some("Test Town".to_string());
        config
    }

    fn controller(config: Config) -> (ModeController, RecordingSink) {
        let http = HttpClient::new(Duration::from_secs(2), 1).unwrap();
        let cache = Arc::new(DataCache::new(&config.runtime.cache_dir).unwrap());
        let images = ImageStore::new(config.runtime.cache_dir.join("images"), http.clone()).unwrap();
        let weather = Arc::new(
            WeatherPipeline::new(config.weather.clone(), http.clone(), cache.clone())
                .with_base_url("http://127.0.0.1:9/v1/forecast", "http://127.0.0.1:9/reverse"),
        );
        let (_tx, weather_updates) = watch::channel(WeatherState::Unavailable("offline".to_string()));
        let ctx = ModeContext { size: (800, 480), http, cache, images, weather, weather_updates };
        let sink = RecordingSink::new();
        (ModeController::new(config, ctx, Box::new(sink.clone())), sink)
    }

    fn add_photo(dir: &std::path::Path, name: &str) {
        RgbImage::from_pixel(80, 48, Rgb([0, 255, 0]))
            .save_with_format(dir.join("photos").join(name), ImageFormat::Png)
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_start_shows_error_canvas() {
        let dir = scratch("start");
        let (mut ctl, sink) = controller(offline_config(&dir));
        assert!(!ctl.start().await);
        assert_eq!(ctl.current_mode(), None);
        assert_eq!(sink.count(), 1);
        assert!(sink.frames()[0].pixels().any(|p| p.0 == RED));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_button_switches_mode() {
        let dir = scratch("switch");
        add_photo(&dir, "a.png");
        let (mut ctl, sink) = controller(offline_config(&dir));
        assert!(ctl.start().await);
        assert_eq!(ctl.current_mode(), Some(ModeKind::PhotoCycle));

        assert!(ctl.handle_button(ButtonEvent::now(ButtonId::C)).await);
        assert_eq!(ctl.current_mode(), Some(ModeKind::Weather));
        assert_eq!(sink.count(), 2);

        // same mode again is not a transition
        let later = ButtonEvent { button: ButtonId::C, at: Instant::now() + Duration::from_secs(1) };
        assert!(!ctl.handle_button(later).await);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_debounced_presses_switch_once() {
        let dir = scratch("debounce");
        add_photo(&dir, "a.png");
        let mut config = offline_config(&dir);
        config.runtime.start_mode = ModeKind::Weather;
        let (mut ctl, sink) = controller(config);
        ctl.start().await;

        let t0 = Instant::now();
        assert!(ctl.handle_button(ButtonEvent { button: ButtonId::A, at: t0 }).await);
        ctl.switch_to(ModeKind::Weather, Instant::now()).await;
        // second press of A 100ms later is dropped by the debouncer
        assert!(!ctl.handle_button(ButtonEvent { button: ButtonId::A, at: t0 + Duration::from_millis(100) }).await);
        assert_eq!(ctl.current_mode(), Some(ModeKind::Weather));
        assert_eq!(sink.count(), 3);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_failed_switch_reverts() {
        let dir = scratch("revert");
        add_photo(&dir, "a.png");
        let (mut ctl, sink) = controller(offline_config(&dir));
        ctl.start().await;

        // tumblr feed is unreachable and nothing is cached
        assert!(!ctl.handle_button(ButtonEvent::now(ButtonId::B)).await);
        assert_eq!(ctl.current_mode(), Some(ModeKind::PhotoCycle));
        assert_eq!(sink.count(), 2);
        assert!(!sink.frames()[1].pixels().any(|p| p.0 == RED));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_persisted_cursor_restored() {
        let dir = scratch("cursor");
        add_photo(&dir, "a.png");
        add_photo(&dir, "b.png");
        let mut config = offline_config(&dir);
        config.photo_cycle.persist_cursor = true;
        let (mut ctl, _sink) = controller(config);
        ctl.start().await;
        ctl.tick(Instant::now() + Duration::from_secs(60)).await;

        ctl.switch_to(ModeKind::Weather, Instant::now()).await;
        ctl.switch_to(ModeKind::PhotoCycle, Instant::now()).await;
        match ctl.active.as_ref() {
            Some(mode) => assert_eq!(mode.saved_cursor(), Some(1)),
            None => panic!("photo mode not active"),
        }
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        let dir = scratch("run");
        add_photo(&dir, "a.png");
        let (mut ctl, _sink) = controller(offline_config(&dir));
        ctl.start().await;
        let (events_tx, events) = mpsc::unbounded_channel();
        let (stop_tx, stop) = mpsc::channel(1);
        events_tx.send(ButtonEvent::now(ButtonId::C)).unwrap();
        stop_tx.send(()).await.unwrap();
        ctl.run(events, stop).await;
        assert_eq!(ctl.current_mode(), None);
        let _ = std::fs::remove_dir_all(dir);
    }
}
