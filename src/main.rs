/*
 *  main.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
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

use env_logger::Env;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use tokio::signal::unix::{signal, SignalKind};

use myimpression::buttons::{open_buttons, open_led, spawn_led_task};
use myimpression::cache::DataCache;
use myimpression::config::{self, Config};
use myimpression::controller::ModeController;
use myimpression::display::sink::PngSink;
use myimpression::http::HttpClient;
use myimpression::images::ImageStore;
use myimpression::modes::ModeContext;
use myimpression::weather::{spawn_refresh, WeatherPipeline};

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

/// Waits for SIGINT, SIGTERM or SIGHUP and logs which one arrived.
async fn signal_handler() -> Result<(), Box<dyn std::error::Error>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let runtime = config.runtime.clone();
    let size = (config.display.width(), config.display.height());

    let http = HttpClient::new(runtime.http_timeout(), runtime.http_retries)?;
    let cache = Arc::new(DataCache::new(&runtime.cache_dir)?);
    let images = ImageStore::new(runtime.cache_dir.join("images"), http.clone())?;
    info!("Cache in {}", cache.dir().display());

    let weather = Arc::new(WeatherPipeline::new(config.weather.clone(), http.clone(), cache.clone()));
    let refresh = spawn_refresh(weather.clone());

    let ctx = ModeContext {
        size,
        http,
        cache,
        images,
        weather,
        weather_updates: refresh.subscribe(),
    };

    let sink = PngSink::new(runtime.output.clone(), size, config.display.dither);
    info!("Rendering {}x{} frames to {}", size.0, size.1, runtime.output.display());

    // hardware init failures end the process
    let mut buttons = open_buttons()?;
    let events = buttons.subscribe()?;
    info!("Button source: {}", buttons.name());

    let mut controller = ModeController::new(config, ctx, Box::new(sink));
    let led_task = if runtime.led {
        let (led_tx, led_task) = spawn_led_task(open_led()?);
        controller = controller.with_led(led_tx);
        Some(led_task)
    } else {
        None
    };

    if !controller.start().await {
        warn!("Start mode {:?} failed; waiting for a button press", runtime.start_mode);
    }

    // stop_tx stays alive so only a signal ends the loop
    let (_stop_tx, stop_rx) = mpsc::channel::<()>(1);
    tokio::select! {
        res = signal_handler() => {
            if let Err(e) = res {
                error!("Signal handling failed: {}", e);
            }
        }
        _ = controller.run(events, stop_rx) => {}
    }
    controller.shutdown();
    // closes the LED channel so its task turns the LED off and ends
    drop(controller);

    refresh.stop().await;
    if let Some(led_task) = led_task {
        let _ = led_task.await;
    }
    drop(buttons);

    info!("Shutdown complete.");
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = match config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    let level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();

    info!("{} starting", FRAME_VERSION);
    info!("v.{} built {}", env!("CARGO_PKG_VERSION"), BUILD_DATE);

    if let Err(e) = run(config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
